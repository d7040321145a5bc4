// ABOUTME: Transport seam for the terminal bridge and its WebSocket implementation
// One ConnectionHandle per socket; all socket activity is reported as generation-tagged events

use crate::bridge::protocol::{BridgeError, Payload};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

/// Identifies one connection attempt. Bumped on every connect.
pub type Generation = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed, frames may flow
    Opened,
    /// Inbound terminal output
    Data(Payload),
    /// Handshake never completed
    OpenFailed(String),
    /// Socket failed after opening
    Error(String),
    /// Remote side closed the socket, with its reason if any
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub generation: Generation,
    pub event: TransportEvent,
}

pub type EventSender = mpsc::UnboundedSender<TransportMessage>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportMessage>;

/// Opens transport connections on behalf of the bridge.
pub trait Connector {
    /// Start connecting to `url`. Progress is reported on `events`, tagged with `generation`.
    fn open(
        &self,
        url: &str,
        generation: Generation,
        events: EventSender,
    ) -> Result<ConnectionHandle, BridgeError>;
}

/// Owning handle to one live transport connection.
///
/// Dropping or closing the handle tears the connection down immediately;
/// anything still queued for sending is discarded.
#[derive(Debug)]
pub struct ConnectionHandle {
    generation: Generation,
    outbound: Option<mpsc::UnboundedSender<Payload>>,
    task: Option<AbortHandle>,
}

impl ConnectionHandle {
    pub fn new(
        generation: Generation,
        outbound: mpsc::UnboundedSender<Payload>,
        task: Option<AbortHandle>,
    ) -> Self {
        Self {
            generation,
            outbound: Some(outbound),
            task,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.as_ref().map_or(true, mpsc::UnboundedSender::is_closed)
    }

    pub fn send(&self, payload: Payload) -> Result<(), BridgeError> {
        let sender = self.outbound.as_ref().ok_or_else(|| {
            BridgeError::TransportRuntimeError("connection already closed".to_string())
        })?;
        sender.send(payload).map_err(|_| {
            BridgeError::TransportRuntimeError("connection task has stopped".to_string())
        })
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!("Closing connection generation {}", self.generation);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================
// WebSocket connector
// ============================================

/// Connector backed by tokio-tungstenite. Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        url: &str,
        generation: Generation,
        events: EventSender,
    ) -> Result<ConnectionHandle, BridgeError> {
        let request = url
            .into_client_request()
            .map_err(|e| BridgeError::TransportOpenFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_task(request, generation, outbound_rx, events));

        Ok(ConnectionHandle::new(
            generation,
            outbound_tx,
            Some(task.abort_handle()),
        ))
    }
}

async fn connection_task(
    request: Request,
    generation: Generation,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    events: EventSender,
) {
    let emit = |event: TransportEvent| {
        // The bridge may already be gone; nothing left to notify then
        let _ = events.send(TransportMessage { generation, event });
    };

    let uri = request.uri().to_string();
    info!("Opening WebSocket connection to {} (generation {})", uri, generation);

    let ws_stream = match connect_async(request).await {
        Ok((stream, response)) => {
            debug!("WebSocket handshake status: {:?}", response.status());
            stream
        }
        Err(e) => {
            error!("WebSocket handshake with {} failed: {}", uri, e);
            emit(TransportEvent::OpenFailed(e.to_string()));
            return;
        }
    };

    info!("WebSocket connected to {}", uri);
    emit(TransportEvent::Opened);

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(payload) = queued else {
                    // Handle dropped: close politely and stop
                    debug!("Outbound channel closed for generation {}", generation);
                    let _ = sink.close().await;
                    return;
                };
                let message = match payload {
                    Payload::Text(text) => tungstenite::Message::Text(text),
                    Payload::Binary(bytes) => tungstenite::Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    error!("Failed to send WebSocket frame: {}", e);
                    emit(TransportEvent::Error(e.to_string()));
                    return;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        emit(TransportEvent::Data(Payload::Text(text)));
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        emit(TransportEvent::Data(Payload::Binary(bytes)));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        info!("WebSocket closed by server: {:?}", reason);
                        emit(TransportEvent::Closed(reason));
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        emit(TransportEvent::Closed(None));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_handle_rejects_sends() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionHandle::new(7, tx, None);
        assert!(handle.send(Payload::from("ls\r")).is_ok());

        handle.close();
        handle.close();

        assert!(handle.is_closed());
        assert!(handle.send(Payload::from("ls\r")).is_err());
    }

    #[test]
    fn handle_reports_closed_when_task_side_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(1, tx, None);
        drop(rx);
        assert!(handle.is_closed());
    }

    #[test]
    fn malformed_url_is_an_open_failure() {
        let (events, _rx) = mpsc::unbounded_channel();
        let result = WebSocketConnector::new().open("not a url", 1, events);
        assert!(matches!(
            result,
            Err(BridgeError::TransportOpenFailure { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_open_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (events, mut rx) = mpsc::unbounded_channel();
        let _handle = WebSocketConnector::new()
            .open(&format!("ws://127.0.0.1:{port}/ssh"), 3, events)
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.generation, 3);
        assert!(matches!(message.event, TransportEvent::OpenFailed(_)));
    }
}
