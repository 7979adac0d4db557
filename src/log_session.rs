use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::Target;
use crate::transport::{DecodedStream, SimplexTransport, StreamUpdate};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogStatus {
    Opening,
    Streaming,
    Ended,
    Failed,
    Stopped,
}

impl LogStatus {
    pub fn title(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Ended => "ended",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Tails one container's log stream into an append-only line buffer.
#[derive(Debug)]
pub struct LogSession {
    target: Target,
    stream: Option<DecodedStream<SimplexTransport>>,
    lines: Vec<String>,
    fragment: String,
    paused: bool,
    status: LogStatus,
    last_activity: Option<DateTime<Local>>,
}

impl LogSession {
    pub fn start(target: Target, transport: SimplexTransport) -> Self {
        info!(pod = %target, "log session started");
        Self {
            target,
            stream: Some(DecodedStream::new(transport)),
            lines: Vec::new(),
            fragment: String::new(),
            paused: false,
            status: LogStatus::Opening,
            last_activity: None,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn status(&self) -> LogStatus {
        self.status
    }

    pub fn last_activity(&self) -> Option<DateTime<Local>> {
        self.last_activity
    }

    pub fn is_live(&self) -> bool {
        self.stream.as_ref().is_some_and(DecodedStream::is_active)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// View-only: lines keep appending, the view just stops following.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn follows_tail(&self) -> bool {
        !self.paused
    }

    /// Waits for the next transport update and applies it. Returns false
    /// once the stream is finished.
    pub async fn pump(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match stream.next().await {
            Some(update) => {
                self.apply(update);
                true
            }
            None => false,
        }
    }

    /// Applies every update that is already buffered.
    pub fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(update) = self.stream.as_mut().and_then(DecodedStream::try_next) {
            self.apply(update);
            applied += 1;
        }
        applied
    }

    pub fn export(&self) -> String {
        self.lines.join("\n")
    }

    pub fn export_to(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        let path = dir.join(self.target.export_file_name());
        let mut snapshot = self.export();
        if !snapshot.is_empty() {
            snapshot.push('\n');
        }
        fs::write(&path, snapshot).map_err(|error| SessionError::Export {
            path: path.clone(),
            message: error.to_string(),
        })?;
        info!(path = %path.display(), lines = self.lines.len(), "exported log snapshot");
        Ok(path)
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let state = stream.transport().state();
            stream.close();
            debug!(pod = %self.target, ?state, "log session stopped");
        }
        if matches!(self.status, LogStatus::Opening | LogStatus::Streaming) {
            self.status = LogStatus::Stopped;
        }
    }

    fn apply(&mut self, update: StreamUpdate) {
        self.last_activity = Some(Local::now());
        match update {
            StreamUpdate::Opened => self.mark_streaming(),
            StreamUpdate::Text(text) => {
                self.mark_streaming();
                self.append_text(&text);
            }
            StreamUpdate::Ended(tail) => {
                self.append_text(&tail);
                self.flush_fragment();
                self.status = LogStatus::Ended;
                info!(pod = %self.target, lines = self.lines.len(), "log stream ended");
            }
            StreamUpdate::Failed { tail, error } => {
                self.append_text(&tail);
                self.flush_fragment();
                self.record_failure(&error);
            }
        }
    }

    fn mark_streaming(&mut self) {
        if self.status == LogStatus::Opening {
            debug!(pod = %self.target, "log stream open");
            self.status = LogStatus::Streaming;
        }
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.fragment.push_str(text);
        let Some(last_break) = self.fragment.rfind('\n') else {
            return;
        };

        let remainder = self.fragment.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.fragment, remainder);
        self.lines.extend(
            complete[..complete.len() - 1]
                .split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string()),
        );
    }

    fn flush_fragment(&mut self) {
        if self.fragment.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.fragment);
        self.lines
            .push(line.strip_suffix('\r').unwrap_or(&line).to_string());
    }

    fn record_failure(&mut self, error: &SessionError) {
        warn!(pod = %self.target, "log stream failed: {error}");
        let line = match error {
            SessionError::Connection { .. } => {
                format!("error: unable to open logs for {}: {error}", self.target)
            }
            _ => format!("error: log stream for {} interrupted: {error}", self.target),
        };
        self.lines.push(line);
        self.status = LogStatus::Failed;
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        self.stop();
    }
}
