// ABOUTME: Terminal session bridge tying one transport connection to one terminal view
// Keeps the remote side sized like the local view and reports connection loss inline

use crate::bridge::protocol::{
    BridgeError, ConnectionStatus, Credentials, InitFrame, Payload, ResizeFrame, Viewport,
};
use crate::bridge::transport::{
    ConnectionHandle, Connector, EventReceiver, EventSender, Generation, TransportEvent,
    TransportMessage,
};
use crate::terminal::resize::{ResizeEvents, ResizeListener};
use crate::terminal::view::TerminalView;
use chrono::Local;
use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Live terminal view backed by a remote shell reached through the SSH bridge.
///
/// At most one [`ConnectionHandle`] exists at a time. Every connect bumps the
/// generation, and transport events carrying an older generation are dropped,
/// so a superseded connection can never write output or receive an init frame.
pub struct TerminalBridge<C: Connector> {
    credentials: Credentials,
    endpoint: String,
    connector: C,

    view: TerminalView,
    resize: ResizeListener,
    viewport: Viewport,

    status: ConnectionStatus,
    connection: Option<ConnectionHandle>,
    generation: Generation,
    events: EventSender,
    last_error: Option<String>,

    torn_down: bool,
}

impl<C: Connector> TerminalBridge<C> {
    /// Build the terminal view for `area` and start listening for resizes.
    ///
    /// Nothing is connected yet; call [`connect`](Self::connect) next. The
    /// returned receiver must be drained into
    /// [`handle_transport_event`](Self::handle_transport_event).
    pub fn initialize(
        credentials: Credentials,
        endpoint: impl Into<String>,
        connector: C,
        resize_events: &ResizeEvents,
        area: Rect,
    ) -> Result<(Self, EventReceiver), BridgeError> {
        credentials.validate()?;

        let viewport = Viewport::fit(area);
        let mut view = TerminalView::new(viewport);
        view.set_title(format!(" {}@{} ", credentials.username, credentials.host));

        let (events, receiver) = mpsc::unbounded_channel();

        let bridge = Self {
            credentials,
            endpoint: endpoint.into(),
            connector,
            view,
            resize: resize_events.subscribe(),
            viewport,
            status: ConnectionStatus::Closed,
            connection: None,
            generation: 0,
            events,
            last_error: None,
            torn_down: false,
        };

        info!(
            "Terminal bridge initialized for {}@{} at {}",
            bridge.credentials.username, bridge.credentials.host, viewport
        );

        Ok((bridge, receiver))
    }

    /// Open a fresh connection, closing the current one first.
    pub fn connect(&mut self) {
        if self.torn_down {
            warn!("Ignoring connect on a torn down bridge");
            return;
        }

        if let Some(mut previous) = self.connection.take() {
            info!(
                "Closing connection generation {} before reconnecting",
                previous.generation()
            );
            previous.close();
        }

        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        self.last_error = None;
        self.view.write_status_line(&format!(
            "{} connecting to {}@{}",
            Self::timestamp(),
            self.credentials.username,
            self.credentials.host
        ));

        info!(
            "Connecting to {} (generation {})",
            self.endpoint, self.generation
        );

        match self
            .connector
            .open(&self.endpoint, self.generation, self.events.clone())
        {
            Ok(handle) => self.connection = Some(handle),
            Err(e) => {
                error!("Failed to open connection: {}", e);
                self.on_transport_error(&e);
            }
        }
    }

    /// User-requested reconnect
    pub fn restart(&mut self) {
        info!("Restart requested");
        self.connect();
    }

    /// Route one transport event. Events from superseded connections are ignored.
    pub fn handle_transport_event(&mut self, message: TransportMessage) {
        if self.torn_down {
            return;
        }
        if message.generation != self.generation || self.connection.is_none() {
            debug!(
                "Dropping event from stale connection generation {} (current {})",
                message.generation, self.generation
            );
            return;
        }

        match message.event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Data(payload) => self.on_remote_data(&payload),
            TransportEvent::OpenFailed(reason) => {
                self.on_transport_error(&BridgeError::TransportOpenFailure {
                    url: self.endpoint.clone(),
                    reason,
                });
            }
            TransportEvent::Error(reason) => {
                self.on_transport_error(&BridgeError::TransportRuntimeError(reason));
            }
            TransportEvent::Closed(reason) => self.on_transport_close(reason),
        }
    }

    fn on_open(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            warn!("Unexpected open while {}", self.status.label());
            return;
        }
        self.status = ConnectionStatus::Connected;
        info!(
            "Connected (generation {}), sending init frame at {}",
            self.generation, self.viewport
        );

        let frame = InitFrame::new(&self.credentials, self.viewport);
        if let Err(e) = Payload::control(&frame).and_then(|payload| self.send(payload)) {
            self.on_transport_error(&e);
        }
    }

    /// Write remote output into the terminal untouched
    pub fn on_remote_data(&mut self, payload: &Payload) {
        match payload {
            Payload::Binary(bytes) => self.view.write_bytes(bytes),
            Payload::Text(text) => self.view.write_str(text),
        }
    }

    /// Forward local keystrokes or pastes. Dropped unless connected.
    pub fn on_local_input(&mut self, payload: Payload) -> bool {
        if !self.status.is_open() {
            debug!("Not connected, dropping {} input bytes", payload.len());
            return false;
        }
        match self.send(payload) {
            Ok(()) => true,
            Err(e) => {
                self.on_transport_error(&e);
                false
            }
        }
    }

    /// Re-fit to a new pane area
    pub fn on_viewport_change(&mut self, area: Rect) -> bool {
        self.resize_to(Viewport::fit(area))
    }

    /// Apply new dimensions; returns whether a resize frame went out.
    ///
    /// While disconnected only the local state changes, so the next init
    /// frame carries the latest size.
    pub fn resize_to(&mut self, viewport: Viewport) -> bool {
        if viewport == self.viewport || self.torn_down {
            return false;
        }

        debug!("Viewport changed {} -> {}", self.viewport, viewport);
        self.viewport = viewport;
        self.view.resize(viewport);

        if !self.status.is_open() {
            return false;
        }

        match Payload::control(&ResizeFrame::new(viewport)).and_then(|payload| self.send(payload))
        {
            Ok(()) => true,
            Err(e) => {
                self.on_transport_error(&e);
                false
            }
        }
    }

    /// Apply every queued resize notification
    pub fn drain_resize_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(area) = self.resize.try_recv() {
            self.on_viewport_change(area);
            applied += 1;
        }
        applied
    }

    /// Wait for the next resize notification
    pub async fn next_resize(&mut self) -> Option<Rect> {
        self.resize.recv().await
    }

    pub fn on_transport_error(&mut self, err: &BridgeError) {
        warn!("Transport error: {}", err);
        self.close_with(err.to_string());
    }

    pub fn on_transport_close(&mut self, reason: Option<String>) {
        let err = BridgeError::TransportClosedByPeer(reason);
        info!("{}", err);
        self.close_with(err.to_string());
    }

    fn close_with(&mut self, message: String) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.status = ConnectionStatus::Closed;
        self.view
            .write_status_line(&format!("{} {}", Self::timestamp(), message));
        self.last_error = Some(message);
    }

    fn send(&self, payload: Payload) -> Result<(), BridgeError> {
        let connection = self.connection.as_ref().ok_or_else(|| {
            BridgeError::TransportRuntimeError("no active connection".to_string())
        })?;
        connection.send(payload)
    }

    /// Release the transport, the resize subscription and the view. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        info!("Tearing down terminal bridge");

        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.status = ConnectionStatus::Closed;
        self.resize.unsubscribe();
        self.view.dispose();
    }

    fn timestamp() -> String {
        Local::now().format("%H:%M:%S").to_string()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> &TerminalView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut TerminalView {
        &mut self.view
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl<C: Connector> Drop for TerminalBridge<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
