use chrono::Local;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;

use crate::app::{ActiveView, SessionHost, SessionKind};
use crate::input::InputMode;
use crate::k8s::SessionConnector;
use crate::log_session::LogSession;
use crate::model::ConnectionState;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const SEPARATOR: &str = "\u{e0b0}";
const SEPARATOR_RTL: &str = "\u{e0b2}";

pub fn render<C: SessionConnector>(frame: &mut Frame, host: &mut SessionHost<C>) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], host);
    render_body(frame, root[1], host);
    render_footer(frame, root[2], host);
}

fn render_header<C: SessionConnector>(frame: &mut Frame, area: Rect, host: &SessionHost<C>) {
    let left_line = build_left_header_line(host);
    let right_line = build_right_header_line(host);
    let right_width = spans_width(&right_line.spans) as u16;
    if area.width < 42 || right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line).style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn build_left_header_line<C: SessionConnector>(host: &SessionHost<C>) -> Line<'static> {
    let target = host.target();
    let kind_icon = match host.kind() {
        SessionKind::Shell => "\u{f489}",
        SessionKind::Logs => "\u{f15c}",
    };
    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " podlink ", Color::White, PL_A, PL_B);
    push_powerline_segment(
        &mut spans,
        format!(" {kind_icon} {} ", host.kind().title()),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {}/{} ", target.namespace, target.label()),
        Color::White,
        PL_C,
        BG,
    );
    spans.push(Span::styled(
        format!(" ctx {}", compact_text(host.context(), 32)),
        Style::default().fg(MUTED).bg(BG),
    ));
    Line::from(spans)
}

fn build_right_header_line<C: SessionConnector>(host: &SessionHost<C>) -> Line<'static> {
    let state = host.connection_state();
    let (fg, bg) = state_colors(state);
    let mut spans = Vec::new();
    let mut next_bg = BG;

    let mut clock = Local::now();
    match host.view() {
        Some(ActiveView::Logs(session)) => {
            let follow = if session.is_paused() {
                " ⏸ paused "
            } else {
                " ⇣ follow "
            };
            push_powerline_segment_rtl(&mut spans, follow, Color::White, PL_B, next_bg);
            push_powerline_segment_rtl(
                &mut spans,
                format!(" {} lines ", session.lines().len()),
                Color::White,
                PANEL,
                PL_B,
            );
            next_bg = PANEL;
            if let Some(last) = session.last_activity() {
                clock = last;
            }
        }
        Some(ActiveView::Shell(session)) => {
            let grid = host.grid();
            let mut label = format!(" {}x{} ", grid.cols, grid.rows);
            if let Some(surface) = session.surface()
                && surface.scrollback() > 0
            {
                label = format!(" ↑{}{label}", surface.scrollback());
            }
            push_powerline_segment_rtl(&mut spans, label, Color::White, PANEL, next_bg);
            next_bg = PANEL;
        }
        None => {}
    }
    let state_label = match host.view() {
        Some(ActiveView::Logs(session)) => session.status().title(),
        _ => state.title(),
    };
    push_powerline_segment_rtl(
        &mut spans,
        format!(" {state_label} "),
        fg,
        bg,
        next_bg,
    );
    spans.push(Span::styled(
        format!(" {} ", clock.format("%H:%M:%S")),
        Style::default().fg(fg).bg(bg),
    ));
    Line::from(spans)
}

fn render_body<C: SessionConnector>(frame: &mut Frame, area: Rect, host: &mut SessionHost<C>) {
    host.set_page_size(area.height as usize);
    let lines = match host.view() {
        Some(ActiveView::Shell(session)) => session
            .surface()
            .map(|surface| surface.render_lines())
            .unwrap_or_default(),
        Some(ActiveView::Logs(session)) => {
            let (start, end) = host.visible_log_range();
            log_lines(session, start, end)
        }
        None => Vec::new(),
    };
    frame.render_widget(
        Paragraph::new(lines).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn log_lines(session: &LogSession, start: usize, end: usize) -> Vec<Line<'static>> {
    session.lines()[start..end]
        .iter()
        .map(|line| {
            let style = if line.starts_with("error: ") {
                Style::default().fg(ERROR).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(Span::styled(line.clone(), style))
        })
        .collect()
}

fn render_footer<C: SessionConnector>(frame: &mut Frame, area: Rect, host: &SessionHost<C>) {
    let status_text = host.status().to_string();
    let status_icon = footer_status_icon(&status_text);
    let status_width_hint = area.width.saturating_sub(24).min(120) as usize;

    let mut spans = Vec::new();
    let (mode_label, mode_bg) = match host.mode() {
        InputMode::ShellLive => (" 󰆍 tty ", PL_A),
        InputMode::ShellEnded => (" 󰅙 end ", WARN),
        InputMode::Logs => (" 󰦪 log ", PL_A),
    };
    let mode_fg = if mode_bg == WARN {
        Color::Black
    } else {
        Color::White
    };
    push_powerline_segment(&mut spans, mode_label, mode_fg, mode_bg, PL_B);
    push_powerline_segment(
        &mut spans,
        format!(
            " {status_icon} {} ",
            compact_text(&status_text, status_width_hint)
        ),
        Color::White,
        PL_B,
        BG,
    );
    spans.push(Span::styled(
        format!(" {}", key_hints(host.mode(), host.containers().len() > 1)),
        Style::default().fg(MUTED).bg(BG),
    ));
    frame.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)), area);
}

fn key_hints(mode: InputMode, can_switch: bool) -> String {
    let switch = if can_switch { "  c container" } else { "" };
    match mode {
        InputMode::ShellLive => "Ctrl+] detach  Shift+PgUp/PgDn scroll".to_string(),
        InputMode::ShellEnded => format!("r reopen{switch}  q quit"),
        InputMode::Logs => format!("space pause  j/k g/G scroll  e export  r reopen{switch}  q quit"),
    }
}

fn state_colors(state: ConnectionState) -> (Color, Color) {
    match state {
        ConnectionState::Connecting => (Color::Black, WARN),
        ConnectionState::Connected => (Color::Black, ACCENT),
        ConnectionState::Error => (Color::Black, ERROR),
        ConnectionState::Closed => (Color::White, PANEL),
    }
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = [
        "failed",
        "error",
        "timed out",
        "unreachable",
        "refused",
        "forbidden",
        "denied",
    ]
    .iter()
    .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled(SEPARATOR, Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        SEPARATOR_RTL,
        Style::default().fg(bg).bg(next_bg),
    ));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut shortened = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}
