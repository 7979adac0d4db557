use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::{ConnectionState, GridSize, Target};
use crate::surface::{SurfaceInput, TerminalSurface};
use crate::transport::{DecodedStream, DuplexTransport, StreamUpdate};

const BANNER_OK: &str = "\x1b[1;32m";
const BANNER_WARN: &str = "\x1b[1;33m";
const BANNER_ERROR: &str = "\x1b[1;31m";
const BANNER_RESET: &str = "\x1b[0m";

enum Wake {
    Update(Option<StreamUpdate>),
    Input(Option<SurfaceInput>),
}

pub struct TerminalSession<S: TerminalSurface> {
    target: Target,
    stream: Option<DecodedStream<DuplexTransport>>,
    surface: Option<S>,
    input: Option<mpsc::UnboundedReceiver<SurfaceInput>>,
    state: ConnectionState,
}

impl<S: TerminalSurface> TerminalSession<S> {
    pub fn start(target: Target, transport: DuplexTransport, mut surface: S) -> Self {
        let input = surface.subscribe();
        info!(pod = %target, "terminal session connecting");
        Self {
            target,
            stream: Some(DecodedStream::new(transport)),
            surface: Some(surface),
            input: Some(input),
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    /// True while the transport or the input subscription can still wake
    /// the session.
    pub fn is_live(&self) -> bool {
        self.stream.as_ref().is_some_and(DecodedStream::is_active) || self.input.is_some()
    }

    /// Waits for the next transport update or surface input event and
    /// handles it. Returns false once nothing can wake the session anymore.
    pub async fn pump(&mut self) -> bool {
        let stream_active = self.stream.as_ref().is_some_and(DecodedStream::is_active);
        let input_active = input_open(&self.input);
        let wake = {
            let stream = self.stream.as_mut();
            let input = self.input.as_mut();
            tokio::select! {
                update = async move { stream?.next().await }, if stream_active => Wake::Update(update),
                event = async move { input?.recv().await }, if input_active => Wake::Input(event),
                else => return false,
            }
        };

        match wake {
            Wake::Update(Some(update)) => self.apply(update),
            Wake::Update(None) => {}
            Wake::Input(Some(event)) => self.handle_input(event),
            Wake::Input(None) => self.input = None,
        }
        true
    }

    /// Handles everything already buffered on both sides without waiting.
    pub fn drain_ready(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Some(event) = self.input.as_mut().and_then(|input| input.try_recv().ok()) {
                self.handle_input(event);
                handled += 1;
                continue;
            }
            if let Some(update) = self.stream.as_mut().and_then(DecodedStream::try_next) {
                self.apply(update);
                handled += 1;
                continue;
            }
            return handled;
        }
    }

    pub fn handle_input(&mut self, event: SurfaceInput) {
        match event {
            SurfaceInput::Keys(bytes) => self.send(&bytes),
            SurfaceInput::Paste(text) => self.send(text.as_bytes()),
            SurfaceInput::Resize(size) => self.resize(size),
        }
    }

    /// Unsubscribes input, closes the transport, then hands the surface
    /// back. Safe to call repeatedly.
    pub fn stop(&mut self) -> Option<S> {
        self.input = None;
        if let Some(mut stream) = self.stream.take() {
            let state = stream.transport().state();
            stream.close();
            debug!(pod = %self.target, ?state, "terminal session stopped");
        }
        if !self.state.is_finished() {
            self.state = ConnectionState::Closed;
        }
        self.surface.take()
    }

    fn send(&mut self, bytes: &[u8]) {
        if let Some(stream) = self.stream.as_mut() {
            stream.transport_mut().send(bytes);
        }
    }

    fn resize(&mut self, size: GridSize) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        surface.fit(size);
        let fitted = surface.grid_size();
        if let Some(stream) = self.stream.as_mut() {
            stream.transport_mut().resize(fitted);
        }
    }

    fn apply(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Opened => {
                self.state = ConnectionState::Connected;
                info!(pod = %self.target, "terminal session connected");
                self.banner(BANNER_OK, &format!("Connected to {}", self.target.label()));
                if let Some(size) = self.surface.as_ref().map(TerminalSurface::grid_size)
                    && let Some(stream) = self.stream.as_mut()
                {
                    stream.transport_mut().resize(size);
                }
            }
            StreamUpdate::Text(text) => self.write(&text),
            StreamUpdate::Ended(tail) => {
                self.write(&tail);
                self.state = ConnectionState::Closed;
                info!(pod = %self.target, "terminal session closed by remote");
                self.finish();
                self.banner(
                    BANNER_WARN,
                    &format!("Disconnected from {}", self.target.label()),
                );
            }
            StreamUpdate::Failed { tail, error } => {
                self.write(&tail);
                // A failed open never reaches Connected.
                self.state = if self.state == ConnectionState::Connecting {
                    ConnectionState::Closed
                } else {
                    ConnectionState::Error
                };
                warn!(pod = %self.target, "terminal session failed: {error}");
                self.finish();
                self.banner(BANNER_ERROR, &failure_banner(&self.target, &error));
            }
        }
    }

    fn finish(&mut self) {
        self.input = None;
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.write(text);
        }
    }

    fn banner(&mut self, color: &str, message: &str) {
        let line = format!("\r\n{color}[podlink] {message}{BANNER_RESET}\r\n");
        self.write(&line);
    }
}

impl<S: TerminalSurface> Drop for TerminalSession<S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn input_open(input: &Option<mpsc::UnboundedReceiver<SurfaceInput>>) -> bool {
    input.as_ref().is_some_and(|input| !input.is_closed())
}

fn failure_banner(target: &Target, error: &SessionError) -> String {
    match error {
        SessionError::Connection { .. } => {
            format!("Could not connect to {}: {error}", target.label())
        }
        _ => format!("Disconnected from {}: {error}", target.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::TerminalSession;
    use crate::error::SessionError;
    use crate::model::{ConnectionState, GridSize, Target};
    use crate::surface::{SurfaceInput, TerminalSurface};
    use crate::transport::{DuplexRemote, DuplexTransport, Outbound};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSurface {
        written: Vec<String>,
        size: GridSize,
        input: Option<mpsc::UnboundedSender<SurfaceInput>>,
    }

    impl RecordingSurface {
        fn output(&self) -> String {
            self.written.concat()
        }

        fn emit(&self, event: SurfaceInput) -> bool {
            self.input
                .as_ref()
                .is_some_and(|input| input.send(event).is_ok())
        }
    }

    impl TerminalSurface for RecordingSurface {
        fn write(&mut self, text: &str) {
            self.written.push(text.to_string());
        }

        fn grid_size(&self) -> GridSize {
            self.size
        }

        fn fit(&mut self, size: GridSize) {
            self.size = size;
        }

        fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SurfaceInput> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.input = Some(tx);
            rx
        }
    }

    fn session() -> (TerminalSession<RecordingSurface>, DuplexRemote) {
        let (transport, remote) = DuplexTransport::pair();
        let target = Target::new("default", "web-1", Some("app".to_string()));
        (
            TerminalSession::start(target, transport, RecordingSurface::default()),
            remote,
        )
    }

    fn drain_outbound(remote: &mut DuplexRemote) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Some(message) = remote.try_outbound() {
            out.push(message);
        }
        out
    }

    #[test]
    fn connect_echo_and_remote_close() {
        let (mut session, mut remote) = session();
        assert_eq!(session.state(), ConnectionState::Connecting);

        remote.opened();
        session.drain_ready();
        assert_eq!(session.state(), ConnectionState::Connected);
        let surface = session.surface().unwrap();
        assert!(surface.output().contains("Connected to web-1 (app)"));

        remote.chunk(b"ls\r\n".to_vec());
        session.drain_ready();
        let surface = session.surface().unwrap();
        assert_eq!(surface.written.last().map(String::as_str), Some("ls\r\n"));

        remote.ended();
        session.drain_ready();
        assert_eq!(session.state(), ConnectionState::Closed);
        let surface = session.surface().unwrap();
        assert!(surface.output().contains("Disconnected from web-1 (app)"));

        drain_outbound(&mut remote);
        session.handle_input(SurfaceInput::Keys(b"whoami\r".to_vec()));
        assert!(!session.surface().unwrap().emit(SurfaceInput::Keys(b"x".to_vec())));
        session.drain_ready();
        assert!(drain_outbound(&mut remote).is_empty());
    }

    #[test]
    fn keystrokes_pass_through_untransformed() {
        let (mut session, mut remote) = session();
        remote.opened();
        session.drain_ready();
        drain_outbound(&mut remote);

        let surface = session.surface().unwrap();
        assert!(surface.emit(SurfaceInput::Keys(vec![0x03])));
        assert!(surface.emit(SurfaceInput::Paste("echo \u{e9}\n".to_string())));
        session.drain_ready();

        assert_eq!(
            drain_outbound(&mut remote),
            vec![
                Outbound::Input(vec![0x03]),
                Outbound::Input("echo \u{e9}\n".as_bytes().to_vec()),
            ]
        );
    }

    #[test]
    fn input_before_open_is_never_delivered() {
        let (mut session, mut remote) = session();
        session.handle_input(SurfaceInput::Keys(b"early".to_vec()));
        session.handle_input(SurfaceInput::Resize(GridSize::new(100, 40)));

        remote.opened();
        session.drain_ready();
        session.handle_input(SurfaceInput::Keys(b"late".to_vec()));

        let outbound = drain_outbound(&mut remote);
        assert!(!outbound.contains(&Outbound::Input(b"early".to_vec())));
        assert_eq!(outbound.last(), Some(&Outbound::Input(b"late".to_vec())));
    }

    #[test]
    fn open_announces_initial_grid_size() {
        let (mut session, mut remote) = session();
        remote.opened();
        session.drain_ready();
        assert_eq!(
            drain_outbound(&mut remote),
            vec![Outbound::Resize(GridSize::default())]
        );
    }

    #[test]
    fn resize_fits_surface_then_resizes_remote() {
        let (mut session, mut remote) = session();
        remote.opened();
        session.drain_ready();
        drain_outbound(&mut remote);

        session.handle_input(SurfaceInput::Resize(GridSize::new(132, 43)));
        assert_eq!(
            session.surface().unwrap().grid_size(),
            GridSize::new(132, 43)
        );
        assert_eq!(
            drain_outbound(&mut remote),
            vec![Outbound::Resize(GridSize::new(132, 43))]
        );
    }

    #[test]
    fn failed_open_renders_error_banner() {
        let (mut session, remote) = session();
        remote.failed(SessionError::connection("pods \"web-1\" not found"));
        session.drain_ready();

        assert_eq!(session.state(), ConnectionState::Closed);
        let output = session.surface().unwrap().output();
        assert!(output.contains("Could not connect to web-1 (app)"));
        assert!(!output.contains("Connected to"));
        assert!(!session.is_live());
    }

    #[test]
    fn mid_session_error_renders_disconnect_banner() {
        let (mut session, remote) = session();
        remote.opened();
        remote.chunk(b"$ ".to_vec());
        remote.failed(SessionError::transport("websocket reset"));
        session.drain_ready();

        assert_eq!(session.state(), ConnectionState::Error);
        let output = session.surface().unwrap().output();
        assert!(output.contains("$ "));
        assert!(output.contains("Disconnected from web-1 (app): stream interrupted: websocket reset"));
    }

    #[test]
    fn stop_unsubscribes_before_closing_and_is_idempotent() {
        let (mut session, remote) = session();
        remote.opened();
        session.drain_ready();

        let surface = session.stop().expect("surface is released once");
        assert!(!surface.emit(SurfaceInput::Keys(b"x".to_vec())));
        assert!(remote.is_detached());
        assert_eq!(session.state(), ConnectionState::Closed);

        assert!(session.stop().is_none());
        assert!(!remote.chunk(b"late".to_vec()));
        assert_eq!(session.drain_ready(), 0);
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn pump_forwards_input_and_output() {
        let (mut session, mut remote) = session();
        remote.opened();
        assert!(session.pump().await);
        drain_outbound(&mut remote);

        session
            .surface()
            .unwrap()
            .emit(SurfaceInput::Keys(b"pwd\r".to_vec()));
        assert!(session.pump().await);
        assert_eq!(
            remote.next_outbound().await,
            Some(Outbound::Input(b"pwd\r".to_vec()))
        );

        remote.chunk(b"/root\r\n".to_vec());
        assert!(session.pump().await);
        assert!(session.surface().unwrap().output().ends_with("/root\r\n"));

        remote.ended();
        assert!(session.pump().await);
        assert!(!session.pump().await);
    }
}
