use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::input::{Action, InputMode};
use crate::k8s::SessionConnector;
use crate::log_session::{LogSession, LogStatus};
use crate::model::{ConnectionState, GridSize, Target};
use crate::surface::{SurfaceInput, Vt100Surface};
use crate::terminal_session::TerminalSession;

/// Rows taken by the header and footer bars.
pub const CHROME_ROWS: u16 = 2;
const SHELL_SCROLL_LINES: usize = 10;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionKind {
    Shell,
    Logs,
}

impl SessionKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Logs => "logs",
        }
    }
}

pub enum ActiveView {
    Shell(TerminalSession<Vt100Surface>),
    Logs(LogSession),
}

/// Owns the single mounted session and everything the console shows
/// around it.
pub struct SessionHost<C: SessionConnector> {
    connector: C,
    kind: SessionKind,
    target: Target,
    containers: Vec<String>,
    context: String,
    export_dir: PathBuf,
    view: Option<ActiveView>,
    grid: GridSize,
    page_size: usize,
    log_top: Option<usize>,
    status: String,
    running: bool,
}

impl<C: SessionConnector> SessionHost<C> {
    pub fn new(
        connector: C,
        kind: SessionKind,
        target: Target,
        containers: Vec<String>,
        context: String,
        export_dir: PathBuf,
        terminal: GridSize,
    ) -> Self {
        let grid = body_grid(terminal);
        Self {
            connector,
            kind,
            target,
            containers,
            context,
            export_dir,
            view: None,
            grid,
            page_size: grid.rows as usize,
            log_top: None,
            status: String::new(),
            running: true,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn view(&self) -> Option<&ActiveView> {
        self.view.as_ref()
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn set_page_size(&mut self, rows: usize) {
        self.page_size = rows.max(1);
    }

    pub fn mode(&self) -> InputMode {
        match &self.view {
            Some(ActiveView::Logs(_)) => InputMode::Logs,
            Some(ActiveView::Shell(session)) if !session.state().is_finished() => {
                InputMode::ShellLive
            }
            _ if self.kind == SessionKind::Logs => InputMode::Logs,
            _ => InputMode::ShellEnded,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        match &self.view {
            Some(ActiveView::Shell(session)) => session.state(),
            Some(ActiveView::Logs(session)) => match session.status() {
                LogStatus::Opening => ConnectionState::Connecting,
                LogStatus::Streaming => ConnectionState::Connected,
                LogStatus::Failed => ConnectionState::Error,
                LogStatus::Ended | LogStatus::Stopped => ConnectionState::Closed,
            },
            None => ConnectionState::Closed,
        }
    }

    pub fn mount(&mut self) {
        if self.view.is_some() {
            return;
        }
        self.log_top = None;
        let view = match self.kind {
            SessionKind::Shell => {
                let transport = self.connector.open_duplex(&self.target);
                let surface = Vt100Surface::new(self.grid);
                ActiveView::Shell(TerminalSession::start(
                    self.target.clone(),
                    transport,
                    surface,
                ))
            }
            SessionKind::Logs => {
                let transport = self.connector.open_simplex(&self.target);
                ActiveView::Logs(LogSession::start(self.target.clone(), transport))
            }
        };
        info!(pod = %self.target, kind = self.kind.title(), "session mounted");
        self.view = Some(view);
        self.set_status(format!("Opening {} for {}", self.kind.title(), self.target.label()));
    }

    pub fn unmount(&mut self) {
        match self.view.take() {
            Some(ActiveView::Shell(mut session)) => {
                session.stop();
            }
            Some(ActiveView::Logs(mut session)) => session.stop(),
            None => return,
        }
        debug!(pod = %self.target, "session unmounted");
    }

    /// Tears the current session down before a new one sees the target.
    pub fn retarget(&mut self, target: Target) {
        self.unmount();
        self.target = target;
        self.mount();
    }

    pub fn is_live(&self) -> bool {
        match &self.view {
            Some(ActiveView::Shell(session)) => session.is_live(),
            Some(ActiveView::Logs(session)) => session.is_live(),
            None => false,
        }
    }

    /// Waits for the mounted session to make progress.
    pub async fn pump(&mut self) -> bool {
        let before = self.connection_state();
        let progressed = match self.view.as_mut() {
            Some(ActiveView::Shell(session)) => session.pump().await,
            Some(ActiveView::Logs(session)) => session.pump().await,
            None => false,
        };
        self.note_transition(before);
        progressed
    }

    pub fn drain_ready(&mut self) -> usize {
        let before = self.connection_state();
        let handled = match self.view.as_mut() {
            Some(ActiveView::Shell(session)) => session.drain_ready(),
            Some(ActiveView::Logs(session)) => session.drain_ready(),
            None => 0,
        };
        self.note_transition(before);
        handled
    }

    pub fn paste(&mut self, text: String) {
        if self.mode() != InputMode::ShellLive {
            return;
        }
        self.emit(SurfaceInput::Paste(text));
    }

    pub fn resize(&mut self, terminal: GridSize) {
        self.grid = body_grid(terminal);
        self.page_size = self.grid.rows as usize;
        self.emit(SurfaceInput::Resize(self.grid));
    }

    pub fn apply_action(&mut self, action: Action) {
        match action {
            Action::Quit => {
                self.unmount();
                self.running = false;
            }
            Action::Forward(bytes) => {
                if let Some(surface) = self.shell_surface_mut() {
                    surface.scroll_reset();
                }
                self.emit(SurfaceInput::Keys(bytes));
            }
            Action::TogglePause => self.toggle_pause(),
            Action::Up => self.scroll_logs_up(1),
            Action::Down => self.scroll_logs_down(1),
            Action::PageUp => {
                if let Some(surface) = self.shell_surface_mut() {
                    surface.scroll_up(SHELL_SCROLL_LINES);
                } else {
                    self.scroll_logs_up(self.page_size);
                }
            }
            Action::PageDown => {
                if let Some(surface) = self.shell_surface_mut() {
                    surface.scroll_down(SHELL_SCROLL_LINES);
                } else {
                    self.scroll_logs_down(self.page_size);
                }
            }
            Action::Top => {
                if let Some(session) = self.logs_mut() {
                    session.pause();
                    self.log_top = Some(0);
                }
            }
            Action::Bottom => {
                if let Some(session) = self.logs_mut() {
                    session.resume();
                    self.log_top = None;
                    self.set_status("Following log tail");
                }
            }
            Action::Export => self.export_logs(),
            Action::Reopen => {
                let target = self.target.clone();
                self.retarget(target);
            }
            Action::NextContainer => self.next_container(),
        }
    }

    /// Line range of the log buffer that fits the body.
    pub fn visible_log_range(&self) -> (usize, usize) {
        let Some(ActiveView::Logs(session)) = &self.view else {
            return (0, 0);
        };
        let total = session.lines().len();
        let tail_start = total.saturating_sub(self.page_size);
        let start = match self.log_top {
            Some(top) if !session.follows_tail() => top.min(tail_start),
            _ => tail_start,
        };
        (start, (start + self.page_size).min(total))
    }

    fn note_transition(&mut self, before: ConnectionState) {
        let after = self.connection_state();
        if before == after {
            return;
        }
        let label = self.target.label();
        let status = match (self.kind, after) {
            (_, ConnectionState::Connecting) => return,
            (SessionKind::Shell, ConnectionState::Closed) if before == ConnectionState::Connecting => {
                format!("Could not connect to {label} (r reopen, q quit)")
            }
            (SessionKind::Shell, ConnectionState::Connected) => {
                format!("Connected to {label} (Ctrl+] detaches)")
            }
            (SessionKind::Logs, ConnectionState::Connected) => format!("Streaming logs of {label}"),
            (SessionKind::Shell, ConnectionState::Closed) => {
                format!("Session to {label} closed (r reopen, c next container, q quit)")
            }
            (SessionKind::Logs, ConnectionState::Closed) => format!("Log stream of {label} ended"),
            (SessionKind::Shell, ConnectionState::Error) => {
                format!("Session to {label} failed (r reopen, q quit)")
            }
            (SessionKind::Logs, ConnectionState::Error) => {
                format!("Log stream of {label} failed (r reopen)")
            }
        };
        self.set_status(status);
    }

    fn emit(&mut self, input: SurfaceInput) {
        let delivered = self
            .shell_surface_mut()
            .is_some_and(|surface| surface.emit(input));
        if delivered && let Some(ActiveView::Shell(session)) = self.view.as_mut() {
            session.drain_ready();
        }
    }

    fn shell_surface_mut(&mut self) -> Option<&mut Vt100Surface> {
        match self.view.as_mut() {
            Some(ActiveView::Shell(session)) => session.surface_mut(),
            _ => None,
        }
    }

    fn logs_mut(&mut self) -> Option<&mut LogSession> {
        match self.view.as_mut() {
            Some(ActiveView::Logs(session)) => Some(session),
            _ => None,
        }
    }

    fn toggle_pause(&mut self) {
        let (start, _) = self.visible_log_range();
        let Some(session) = self.logs_mut() else {
            return;
        };
        if session.toggle_pause() {
            self.log_top = Some(start);
            self.set_status("Paused (space resumes)");
        } else {
            self.log_top = None;
            self.set_status("Following log tail");
        }
    }

    fn scroll_logs_up(&mut self, lines: usize) {
        let (start, _) = self.visible_log_range();
        let Some(session) = self.logs_mut() else {
            return;
        };
        session.pause();
        self.log_top = Some(start.saturating_sub(lines));
    }

    fn scroll_logs_down(&mut self, lines: usize) {
        let (start, _) = self.visible_log_range();
        let Some(session) = self.logs_mut() else {
            return;
        };
        if session.follows_tail() {
            return;
        }
        self.log_top = Some(start.saturating_add(lines));
    }

    fn export_logs(&mut self) {
        let Some(ActiveView::Logs(session)) = &self.view else {
            return;
        };
        let lines = session.lines().len();
        let status = match session.export_to(&self.export_dir) {
            Ok(path) => format!("Exported {lines} lines to {}", path.display()),
            Err(error) => {
                warn!("log export failed: {error}");
                format!("Export failed: {error}")
            }
        };
        self.set_status(status);
    }

    fn next_container(&mut self) {
        let Some(next) = next_container(&self.containers, self.target.container.as_deref()) else {
            self.set_status(format!("{} has no other containers", self.target.pod_name));
            return;
        };
        let target = self.target.with_container(next);
        self.retarget(target);
    }
}

impl<C: SessionConnector> Drop for SessionHost<C> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn body_grid(terminal: GridSize) -> GridSize {
    GridSize::new(terminal.cols, terminal.rows.saturating_sub(CHROME_ROWS))
}

fn next_container(containers: &[String], current: Option<&str>) -> Option<String> {
    if containers.len() < 2 {
        return None;
    }
    let index = current
        .and_then(|current| containers.iter().position(|name| name == current))
        .map_or(0, |index| (index + 1) % containers.len());
    containers.get(index).cloned()
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{ActiveView, SessionHost, SessionKind, next_container};
    use crate::error::SessionError;
    use crate::input::{Action, InputMode};
    use crate::k8s::SessionConnector;
    use crate::model::{ConnectionState, GridSize, Target};
    use crate::transport::{
        DuplexRemote, DuplexTransport, Outbound, SimplexRemote, SimplexTransport,
    };
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeConnector {
        duplex: Arc<Mutex<Vec<(Target, DuplexRemote)>>>,
        simplex: Arc<Mutex<Vec<(Target, SimplexRemote)>>>,
    }

    impl SessionConnector for FakeConnector {
        fn open_duplex(&self, target: &Target) -> DuplexTransport {
            let (transport, remote) = DuplexTransport::pair();
            self.duplex.lock().unwrap().push((target.clone(), remote));
            transport
        }

        fn open_simplex(&self, target: &Target) -> SimplexTransport {
            let (transport, remote) = SimplexTransport::pair();
            self.simplex.lock().unwrap().push((target.clone(), remote));
            transport
        }
    }

    fn host(kind: SessionKind, export_dir: PathBuf) -> (SessionHost<FakeConnector>, FakeConnector) {
        let connector = FakeConnector::default();
        let mut host = SessionHost::new(
            connector.clone(),
            kind,
            Target::new("prod", "web-1", Some("app".to_string())),
            vec!["app".to_string(), "sidecar".to_string()],
            "kind-dev".to_string(),
            export_dir,
            GridSize::new(80, 12),
        );
        host.mount();
        (host, connector)
    }

    fn log_lines(host: &SessionHost<FakeConnector>) -> Vec<String> {
        match host.view() {
            Some(ActiveView::Logs(session)) => session.lines().to_vec(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn logs_view_collects_lines() {
        let (mut host, connector) = host(SessionKind::Logs, PathBuf::from("."));
        connector.simplex.lock().unwrap()[0]
            .1
            .chunk(b"alpha\nbeta\n".to_vec());
        host.drain_ready();
        assert_eq!(log_lines(&host), vec!["alpha", "beta"]);
        assert_eq!(host.mode(), InputMode::Logs);
        assert_eq!(host.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn logs_view_is_connecting_until_the_stream_opens() {
        let (mut host, connector) = host(SessionKind::Logs, PathBuf::from("."));
        assert_eq!(host.connection_state(), ConnectionState::Connecting);

        connector.simplex.lock().unwrap()[0].1.opened();
        host.drain_ready();
        assert_eq!(host.connection_state(), ConnectionState::Connected);
        assert!(host.status().starts_with("Streaming logs of web-1"));
    }

    #[test]
    fn shell_open_failure_closes_without_connecting() {
        let (mut host, connector) = host(SessionKind::Shell, PathBuf::from("."));
        connector.duplex.lock().unwrap()[0]
            .1
            .failed(SessionError::connection("refused"));
        host.drain_ready();

        assert_eq!(host.connection_state(), ConnectionState::Closed);
        assert_eq!(host.mode(), InputMode::ShellEnded);
        assert!(host.status().starts_with("Could not connect to web-1 (app)"));
    }

    #[test]
    fn next_container_stops_previous_session_first() {
        let (mut host, connector) = host(SessionKind::Logs, PathBuf::from("."));
        host.apply_action(Action::NextContainer);

        let opened = connector.simplex.lock().unwrap();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].1.is_cancelled());
        assert!(!opened[1].1.is_cancelled());
        assert_eq!(opened[1].0.container.as_deref(), Some("sidecar"));
        assert_eq!(host.target().container.as_deref(), Some("sidecar"));
    }

    #[test]
    fn quit_detaches_shell_and_stops_running() {
        let (mut host, connector) = host(SessionKind::Shell, PathBuf::from("."));
        host.apply_action(Action::Quit);

        assert!(!host.running());
        assert!(host.view().is_none());
        assert!(connector.duplex.lock().unwrap()[0].1.is_detached());
    }

    #[test]
    fn shell_keys_reach_the_remote_after_open() {
        let (mut host, connector) = host(SessionKind::Shell, PathBuf::from("."));
        host.apply_action(Action::Forward(b"x".to_vec()));

        let mut opened = connector.duplex.lock().unwrap();
        let remote = &mut opened[0].1;
        assert_eq!(remote.try_outbound(), None);

        remote.opened();
        host.drain_ready();
        assert_eq!(host.mode(), InputMode::ShellLive);
        assert_eq!(
            remote.try_outbound(),
            Some(Outbound::Resize(GridSize::new(80, 10)))
        );

        host.apply_action(Action::Forward(b"ls\r".to_vec()));
        assert_eq!(remote.try_outbound(), Some(Outbound::Input(b"ls\r".to_vec())));

        host.paste("echo hi".to_string());
        assert_eq!(
            remote.try_outbound(),
            Some(Outbound::Input(b"echo hi".to_vec()))
        );
    }

    #[test]
    fn resize_subtracts_chrome_rows() {
        let (mut host, connector) = host(SessionKind::Shell, PathBuf::from("."));
        let mut opened = connector.duplex.lock().unwrap();
        let remote = &mut opened[0].1;
        remote.opened();
        host.drain_ready();
        let _ = remote.try_outbound();

        host.resize(GridSize::new(120, 40));
        assert_eq!(host.grid(), GridSize::new(120, 38));
        assert_eq!(
            remote.try_outbound(),
            Some(Outbound::Resize(GridSize::new(120, 38)))
        );
    }

    #[test]
    fn remote_close_switches_to_ended_mode() {
        let (mut host, connector) = host(SessionKind::Shell, PathBuf::from("."));
        {
            let opened = connector.duplex.lock().unwrap();
            opened[0].1.opened();
            opened[0].1.ended();
        }
        host.drain_ready();

        assert_eq!(host.connection_state(), ConnectionState::Closed);
        assert_eq!(host.mode(), InputMode::ShellEnded);
        assert!(host.status().contains("closed"));

        host.apply_action(Action::Reopen);
        assert_eq!(connector.duplex.lock().unwrap().len(), 2);
        assert_eq!(host.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn scrolling_up_pauses_and_bottom_resumes() {
        let (mut host, connector) = host(SessionKind::Logs, PathBuf::from("."));
        host.set_page_size(5);
        let body = (0..20).map(|n| format!("line {n}\n")).collect::<String>();
        connector.simplex.lock().unwrap()[0].1.chunk(body.into_bytes());
        host.drain_ready();
        assert_eq!(host.visible_log_range(), (15, 20));

        host.apply_action(Action::Up);
        assert_eq!(host.visible_log_range(), (14, 19));

        connector.simplex.lock().unwrap()[0]
            .1
            .chunk(b"late\n".to_vec());
        host.drain_ready();
        assert_eq!(host.visible_log_range(), (14, 19));
        assert_eq!(log_lines(&host).len(), 21);

        host.apply_action(Action::Top);
        assert_eq!(host.visible_log_range(), (0, 5));

        host.apply_action(Action::Bottom);
        assert_eq!(host.visible_log_range(), (16, 21));
    }

    #[test]
    fn pause_freezes_the_window() {
        let (mut host, connector) = host(SessionKind::Logs, PathBuf::from("."));
        host.set_page_size(2);
        connector.simplex.lock().unwrap()[0]
            .1
            .chunk(b"a\nb\nc\n".to_vec());
        host.drain_ready();

        host.apply_action(Action::TogglePause);
        connector.simplex.lock().unwrap()[0]
            .1
            .chunk(b"d\n".to_vec());
        host.drain_ready();
        assert_eq!(host.visible_log_range(), (1, 3));

        host.apply_action(Action::TogglePause);
        assert_eq!(host.visible_log_range(), (2, 4));
    }

    #[test]
    fn export_reports_written_path() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, connector) = host(SessionKind::Logs, dir.path().to_path_buf());
        connector.simplex.lock().unwrap()[0]
            .1
            .chunk(b"one\ntwo\n".to_vec());
        host.drain_ready();

        host.apply_action(Action::Export);
        let written = std::fs::read_to_string(dir.path().join("web-1.log")).unwrap();
        assert_eq!(written, "one\ntwo\n");
        assert!(host.status().starts_with("Exported 2 lines"));
    }

    #[test]
    fn next_container_wraps_and_needs_alternatives() {
        let containers = vec!["app".to_string(), "sidecar".to_string()];
        assert_eq!(
            next_container(&containers, Some("sidecar")),
            Some("app".to_string())
        );
        assert_eq!(next_container(&containers, None), Some("app".to_string()));
        assert_eq!(next_container(&containers[..1], Some("app")), None);
    }
}
