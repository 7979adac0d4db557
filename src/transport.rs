use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::decoder::ByteDecoder;
use crate::error::SessionError;
use crate::model::GridSize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Chunk(Vec<u8>),
    Ended,
    Failed(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Input(Vec<u8>),
    Resize(GridSize),
}

pub trait StreamTransport {
    fn is_terminated(&self) -> bool;

    fn try_next_event(&mut self) -> Option<StreamEvent>;

    fn next_event(&mut self) -> impl Future<Output = Option<StreamEvent>>;

    fn shutdown(&mut self);
}

#[derive(Debug)]
struct EventChannel {
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    task: Option<JoinHandle<()>>,
}

enum Polled {
    Ready(StreamEvent),
    Empty,
    Disconnected,
}

impl EventChannel {
    fn new(events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self {
            events: Some(events),
            task: None,
        }
    }

    fn attach(&mut self, task: JoinHandle<()>) {
        if self.events.is_none() {
            task.abort();
            return;
        }
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    fn poll(&mut self) -> Polled {
        let Some(events) = self.events.as_mut() else {
            return Polled::Empty;
        };
        match events.try_recv() {
            Ok(event) => Polled::Ready(event),
            Err(mpsc::error::TryRecvError::Empty) => Polled::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => Polled::Disconnected,
        }
    }

    async fn recv(&mut self) -> Option<Option<StreamEvent>> {
        let events = self.events.as_mut()?;
        Some(events.recv().await)
    }

    fn shutdown(&mut self) {
        self.events = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DuplexState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct DuplexTransport {
    state: DuplexState,
    channel: EventChannel,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

/// Connector-side half of a duplex transport.
#[derive(Debug)]
pub struct DuplexRemote {
    events: mpsc::UnboundedSender<StreamEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl DuplexTransport {
    pub fn pair() -> (Self, DuplexRemote) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: DuplexState::Connecting,
                channel: EventChannel::new(events_rx),
                outbound: Some(outbound_tx),
            },
            DuplexRemote {
                events: events_tx,
                outbound: outbound_rx,
            },
        )
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.channel.attach(task);
    }

    pub fn state(&self) -> DuplexState {
        self.state
    }

    /// Dropped unless the transport is `Open`.
    pub fn send(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        self.push(Outbound::Input(data.to_vec()))
    }

    pub fn resize(&mut self, size: GridSize) -> bool {
        self.push(Outbound::Resize(size))
    }

    pub fn close(&mut self) {
        if self.state != DuplexState::Closed {
            debug!(state = ?self.state, "closing duplex transport");
        }
        self.state = DuplexState::Closed;
        self.outbound = None;
        self.channel.shutdown();
    }

    fn push(&mut self, message: Outbound) -> bool {
        if self.state != DuplexState::Open {
            trace!(state = ?self.state, "dropping outbound message");
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };
        outbound.send(message).is_ok()
    }

    fn observe(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        match event {
            StreamEvent::Opened => {
                if self.state != DuplexState::Connecting {
                    return None;
                }
                self.state = DuplexState::Open;
                Some(StreamEvent::Opened)
            }
            StreamEvent::Chunk(bytes) => Some(StreamEvent::Chunk(bytes)),
            StreamEvent::Ended | StreamEvent::Failed(_) => {
                self.close();
                Some(event)
            }
        }
    }
}

impl StreamTransport for DuplexTransport {
    fn is_terminated(&self) -> bool {
        self.state == DuplexState::Closed
    }

    fn try_next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.channel.poll() {
                Polled::Ready(event) => {
                    if let Some(event) = self.observe(event) {
                        return Some(event);
                    }
                }
                Polled::Empty => return None,
                Polled::Disconnected => return self.observe(StreamEvent::Ended),
            }
        }
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let event = self.channel.recv().await?.unwrap_or(StreamEvent::Ended);
            if let Some(event) = self.observe(event) {
                return Some(event);
            }
        }
    }

    fn shutdown(&mut self) {
        self.close();
    }
}

impl DuplexRemote {
    pub fn opened(&self) -> bool {
        self.events.send(StreamEvent::Opened).is_ok()
    }

    pub fn chunk(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.events.send(StreamEvent::Chunk(bytes.into())).is_ok()
    }

    pub fn ended(&self) {
        let _ = self.events.send(StreamEvent::Ended);
    }

    pub fn failed(&self, error: SessionError) {
        let _ = self.events.send(StreamEvent::Failed(error));
    }

    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    #[cfg(test)]
    pub fn try_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SimplexState {
    Reading,
    Done,
}

#[derive(Debug)]
pub struct SimplexTransport {
    state: SimplexState,
    opened: bool,
    channel: EventChannel,
}

#[derive(Debug, Clone)]
pub struct SimplexRemote {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl SimplexTransport {
    pub fn pair() -> (Self, SimplexRemote) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: SimplexState::Reading,
                opened: false,
                channel: EventChannel::new(events_rx),
            },
            SimplexRemote { events: events_tx },
        )
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.channel.attach(task);
    }

    pub fn state(&self) -> SimplexState {
        self.state
    }

    pub fn cancel(&mut self) {
        if self.state != SimplexState::Done {
            debug!("cancelling simplex transport");
        }
        self.state = SimplexState::Done;
        self.channel.shutdown();
    }

    fn observe(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        match event {
            StreamEvent::Opened => {
                if self.opened || self.state == SimplexState::Done {
                    return None;
                }
                self.opened = true;
                Some(StreamEvent::Opened)
            }
            StreamEvent::Chunk(bytes) => Some(StreamEvent::Chunk(bytes)),
            StreamEvent::Ended | StreamEvent::Failed(_) => {
                self.cancel();
                Some(event)
            }
        }
    }
}

impl StreamTransport for SimplexTransport {
    fn is_terminated(&self) -> bool {
        self.state == SimplexState::Done
    }

    fn try_next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.channel.poll() {
                Polled::Ready(event) => {
                    if let Some(event) = self.observe(event) {
                        return Some(event);
                    }
                }
                Polled::Empty => return None,
                Polled::Disconnected => return self.observe(StreamEvent::Ended),
            }
        }
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let event = self.channel.recv().await?.unwrap_or(StreamEvent::Ended);
            if let Some(event) = self.observe(event) {
                return Some(event);
            }
        }
    }

    fn shutdown(&mut self) {
        self.cancel();
    }
}

impl SimplexRemote {
    pub fn opened(&self) -> bool {
        self.events.send(StreamEvent::Opened).is_ok()
    }

    pub fn chunk(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.events.send(StreamEvent::Chunk(bytes.into())).is_ok()
    }

    pub fn ended(&self) {
        let _ = self.events.send(StreamEvent::Ended);
    }

    pub fn failed(&self, error: SessionError) {
        let _ = self.events.send(StreamEvent::Failed(error));
    }

    pub fn is_cancelled(&self) -> bool {
        self.events.is_closed()
    }

    pub async fn cancelled(&self) {
        self.events.closed().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Opened,
    Text(String),
    Ended(String),
    Failed {
        tail: String,
        error: SessionError,
    },
}

#[derive(Debug)]
pub struct DecodedStream<T> {
    transport: T,
    decoder: ByteDecoder,
}

impl<T: StreamTransport> DecodedStream<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: ByteDecoder::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_active(&self) -> bool {
        !self.transport.is_terminated()
    }

    pub fn try_next(&mut self) -> Option<StreamUpdate> {
        loop {
            let event = self.transport.try_next_event()?;
            if let Some(update) = self.decode(event) {
                return Some(update);
            }
        }
    }

    pub async fn next(&mut self) -> Option<StreamUpdate> {
        loop {
            let event = self.transport.next_event().await?;
            if let Some(update) = self.decode(event) {
                return Some(update);
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.shutdown();
        self.decoder = ByteDecoder::new();
    }

    fn decode(&mut self, event: StreamEvent) -> Option<StreamUpdate> {
        match event {
            StreamEvent::Opened => Some(StreamUpdate::Opened),
            StreamEvent::Chunk(bytes) => {
                let text = self.decoder.feed(&bytes);
                if text.is_empty() {
                    None
                } else {
                    Some(StreamUpdate::Text(text))
                }
            }
            StreamEvent::Ended => Some(StreamUpdate::Ended(self.decoder.finish())),
            StreamEvent::Failed(error) => Some(StreamUpdate::Failed {
                tail: self.decoder.finish(),
                error,
            }),
        }
    }
}
