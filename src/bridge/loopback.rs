// ABOUTME: In-process transport double for exercising the bridge without a network
// Records every outbound payload per connection and lets callers script the remote side

use crate::bridge::protocol::{BridgeError, Payload};
use crate::bridge::transport::{
    ConnectionHandle, Connector, EventSender, Generation, TransportEvent, TransportMessage,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// One connection opened through the loopback connector
#[derive(Debug)]
struct LoopbackLink {
    generation: Generation,
    url: String,
    outbound: mpsc::UnboundedReceiver<Payload>,
    events: EventSender,
    sent: Vec<Payload>,
    closed: bool,
}

impl LoopbackLink {
    /// Pull queued payloads into `sent` and notice whether the handle was dropped
    fn drain(&mut self) {
        loop {
            match self.outbound.try_recv() {
                Ok(payload) => self.sent.push(payload),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(TransportMessage {
            generation: self.generation,
            event,
        });
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    links: Vec<LoopbackLink>,
    refuse_next: Option<String>,
    echo: bool,
}

/// Connector whose connections stay entirely in memory.
///
/// Clones share state, so a test keeps one clone while the bridge owns another.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflect every outbound payload straight back as inbound data on `pump`
    pub fn with_echo() -> Self {
        let connector = Self::new();
        connector.lock().echo = true;
        connector
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        // A panicking test thread must not hide later assertions
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next `open` call fail synchronously
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.lock().refuse_next = Some(reason.into());
    }

    /// Number of `open` calls that produced a handle
    pub fn opened(&self) -> usize {
        self.lock().links.len()
    }

    /// Handles not yet closed by their owner
    pub fn live_connections(&self) -> Vec<Generation> {
        let mut state = self.lock();
        state
            .links
            .iter_mut()
            .filter_map(|link| {
                link.drain();
                (!link.closed).then_some(link.generation)
            })
            .collect()
    }

    pub fn latest_generation(&self) -> Option<Generation> {
        self.lock().links.last().map(|link| link.generation)
    }

    pub fn url_of(&self, generation: Generation) -> Option<String> {
        self.lock()
            .links
            .iter()
            .find(|link| link.generation == generation)
            .map(|link| link.url.clone())
    }

    /// Everything the bridge has sent on a connection so far
    pub fn sent(&self, generation: Generation) -> Vec<Payload> {
        let mut state = self.lock();
        state
            .links
            .iter_mut()
            .find(|link| link.generation == generation)
            .map(|link| {
                link.drain();
                link.sent.clone()
            })
            .unwrap_or_default()
    }

    /// Text frames on a connection decoded as JSON; non-JSON frames are skipped
    pub fn sent_json(&self, generation: Generation) -> Vec<serde_json::Value> {
        self.sent(generation)
            .iter()
            .filter_map(|payload| match payload {
                Payload::Text(text) => serde_json::from_str(text).ok(),
                Payload::Binary(_) => None,
            })
            .collect()
    }

    /// Complete the handshake for a connection
    pub fn accept(&self, generation: Generation) {
        self.emit(generation, TransportEvent::Opened);
    }

    /// Push terminal output from the remote side
    pub fn push(&self, generation: Generation, payload: Payload) {
        self.emit(generation, TransportEvent::Data(payload));
    }

    pub fn fail(&self, generation: Generation, reason: impl Into<String>) {
        self.emit(generation, TransportEvent::Error(reason.into()));
    }

    pub fn close_from_remote(&self, generation: Generation, reason: Option<&str>) {
        self.emit(
            generation,
            TransportEvent::Closed(reason.map(ToString::to_string)),
        );
    }

    /// Echo mode: reflect outbound payloads sent since the last pump
    pub fn pump(&self) {
        let mut state = self.lock();
        if !state.echo {
            return;
        }
        for link in &mut state.links {
            let already = link.sent.len();
            link.drain();
            for payload in link.sent[already..].iter().cloned() {
                link.emit(TransportEvent::Data(payload));
            }
        }
    }

    fn emit(&self, generation: Generation, event: TransportEvent) {
        let state = self.lock();
        if let Some(link) = state.links.iter().find(|link| link.generation == generation) {
            link.emit(event);
        }
    }
}

impl Connector for LoopbackConnector {
    fn open(
        &self,
        url: &str,
        generation: Generation,
        events: EventSender,
    ) -> Result<ConnectionHandle, BridgeError> {
        let mut state = self.lock();
        if let Some(reason) = state.refuse_next.take() {
            return Err(BridgeError::TransportOpenFailure {
                url: url.to_string(),
                reason,
            });
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        state.links.push(LoopbackLink {
            generation,
            url: url.to_string(),
            outbound: outbound_rx,
            events,
            sent: Vec::new(),
            closed: false,
        });

        Ok(ConnectionHandle::new(generation, outbound_tx, None))
    }
}
