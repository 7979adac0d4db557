mod app;
mod cli;
mod config;
mod decoder;
mod error;
mod input;
mod k8s;
mod log_session;
mod model;
mod surface;
mod terminal_session;
mod transport;
mod ui;

use anyhow::{Context, Result};
use app::{SessionHost, SessionKind};
use clap::Parser;
use cli::{CliArgs, SessionCommand, TargetArgs};
use config::ConsoleConfig;
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyEventKind,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use k8s::{KubeConnector, KubeGateway, LogOptions, SessionConnector};
use model::GridSize;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{info, trace};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const TICK: Duration = Duration::from_secs(1);

struct LaunchPlan {
    kind: SessionKind,
    target: TargetArgs,
    shell: Vec<String>,
    logs: LogOptions,
    export_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let config = ConsoleConfig::discover()?;
    if let Some(source) = &config.source {
        info!(%source, "loaded console config");
    }
    let plan = launch_plan(args.command, config);

    let gateway = KubeGateway::new(args.context).await?;
    let target = gateway
        .resolve_target(
            plan.target.namespace.clone(),
            &plan.target.pod,
            plan.target.container.clone(),
        )
        .await?;
    let containers = gateway
        .pod_containers(&target.namespace, &target.pod_name)
        .await?;
    info!(
        context = gateway.context(),
        cluster = gateway.cluster(),
        pod = %target,
        "launching {} session",
        plan.kind.title()
    );

    let connector = KubeConnector::new(gateway.client(), plan.shell, plan.logs);
    let size = crossterm::terminal::size()
        .map(|(cols, rows)| GridSize::new(cols, rows))
        .unwrap_or_default();
    let mut host = SessionHost::new(
        connector,
        plan.kind,
        target,
        containers,
        gateway.context().to_string(),
        plan.export_dir,
        size,
    );

    run(&mut host).await
}

fn launch_plan(command: SessionCommand, config: ConsoleConfig) -> LaunchPlan {
    match command {
        SessionCommand::Shell { target, command } => LaunchPlan {
            kind: SessionKind::Shell,
            target,
            shell: if command.is_empty() {
                config.shell
            } else {
                command
            },
            logs: LogOptions::default(),
            export_dir: config.export_dir,
        },
        SessionCommand::Logs {
            target,
            tail,
            timestamps,
            previous,
            export_dir,
        } => LaunchPlan {
            kind: SessionKind::Logs,
            target,
            shell: config.shell,
            logs: LogOptions {
                tail_lines: tail.filter(|lines| *lines > 0).or(config.tail_lines),
                timestamps: timestamps || config.timestamps,
                previous,
            },
            export_dir: export_dir.unwrap_or(config.export_dir),
        },
    }
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

async fn run<C: SessionConnector>(host: &mut SessionHost<C>) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    host.mount();
    let run_result = run_loop(&mut terminal, host).await;
    host.unmount();
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableBracketedPaste,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
            .context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        LeaveAlternateScreen
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop<C: SessionConnector>(
    terminal: &mut TuiTerminal,
    host: &mut SessionHost<C>,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, host))
            .context("failed to render terminal frame")?;

        if !host.running() {
            break;
        }

        let live = host.is_live();
        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind != KeyEventKind::Release => {
                        if let Some(action) = input::map_key(host.mode(), key) {
                            trace!("action={action:?}");
                            host.apply_action(action);
                        }
                    }
                    Some(Ok(Event::Paste(text))) => host.paste(text),
                    Some(Ok(Event::Resize(cols, rows))) => host.resize(GridSize::new(cols, rows)),
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        host.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        host.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = host.pump(), if live => {
                host.drain_ready();
            }
            _ = ticker.tick() => {}
        }
    }

    Ok(())
}
