use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use tokio::sync::mpsc;
use vt100::{Color as VtColor, Parser};

use crate::model::GridSize;

const SCROLLBACK_LINES: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceInput {
    Keys(Vec<u8>),
    Paste(String),
    Resize(GridSize),
}

/// The character grid a terminal session writes to.
pub trait TerminalSurface {
    fn write(&mut self, text: &str);

    fn grid_size(&self) -> GridSize;

    fn fit(&mut self, size: GridSize);

    /// Replaces any previous subscriber; dropping the receiver unsubscribes.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SurfaceInput>;
}

pub struct Vt100Surface {
    parser: Parser,
    input: Option<mpsc::UnboundedSender<SurfaceInput>>,
}

impl Vt100Surface {
    pub fn new(size: GridSize) -> Self {
        Self {
            parser: Parser::new(size.rows, size.cols, SCROLLBACK_LINES),
            input: None,
        }
    }

    /// Forwards a host input event to the subscriber. Returns false once
    /// nobody listens anymore.
    pub fn emit(&self, input: SurfaceInput) -> bool {
        self.input
            .as_ref()
            .is_some_and(|subscriber| subscriber.send(input).is_ok())
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let current = self.parser.screen().scrollback();
        self.parser
            .screen_mut()
            .set_scrollback(current.saturating_add(lines));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let current = self.parser.screen().scrollback();
        self.parser
            .screen_mut()
            .set_scrollback(current.saturating_sub(lines));
    }

    pub fn scroll_reset(&mut self) {
        self.parser.screen_mut().set_scrollback(0);
    }

    pub fn scrollback(&self) -> usize {
        self.parser.screen().scrollback()
    }

    #[cfg(test)]
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }

    pub fn render_lines(&self) -> Vec<Line<'static>> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let (cursor_row, cursor_col) = screen.cursor_position();
        let show_cursor = !screen.hide_cursor() && screen.scrollback() == 0;

        let mut lines = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut spans = Vec::<Span<'static>>::new();
            let mut run = String::new();
            let mut run_style: Option<Style> = None;

            for col in 0..cols {
                let Some(cell) = screen.cell(row, col) else {
                    push_cell(&mut spans, &mut run, &mut run_style, Style::default(), " ");
                    continue;
                };
                if cell.is_wide_continuation() {
                    continue;
                }

                let mut style = style_for_cell(cell);
                if show_cursor && row == cursor_row && col == cursor_col {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                let content = if cell.has_contents() {
                    cell.contents().to_string()
                } else {
                    " ".to_string()
                };
                push_cell(&mut spans, &mut run, &mut run_style, style, &content);
            }

            if let Some(style) = run_style {
                spans.push(Span::styled(run, style));
            }
            lines.push(Line::from(spans));
        }

        lines
    }
}

impl TerminalSurface for Vt100Surface {
    fn write(&mut self, text: &str) {
        self.parser.process(text.as_bytes());
    }

    fn grid_size(&self) -> GridSize {
        let (rows, cols) = self.parser.screen().size();
        GridSize::new(cols, rows)
    }

    fn fit(&mut self, size: GridSize) {
        self.parser.screen_mut().set_size(size.rows, size.cols);
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SurfaceInput> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.input = Some(tx);
        rx
    }
}

fn push_cell(
    spans: &mut Vec<Span<'static>>,
    run: &mut String,
    run_style: &mut Option<Style>,
    style: Style,
    content: &str,
) {
    match run_style {
        Some(current) if *current == style => run.push_str(content),
        Some(current) => {
            spans.push(Span::styled(std::mem::take(run), *current));
            *run_style = Some(style);
            run.push_str(content);
        }
        None => {
            *run_style = Some(style);
            run.push_str(content);
        }
    }
}

fn style_for_cell(cell: &vt100::Cell) -> Style {
    let mut style = Style::default()
        .fg(map_color(cell.fgcolor()))
        .bg(map_color(cell.bgcolor()));
    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.dim() {
        style = style.add_modifier(Modifier::DIM);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }
    style
}

fn map_color(color: VtColor) -> Color {
    match color {
        VtColor::Default => Color::Reset,
        VtColor::Idx(idx) => Color::Indexed(idx),
        VtColor::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}
