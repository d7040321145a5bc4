// ABOUTME: Application state for the session window and the run loop driving the bridge
// Mirrors bridge status for rendering and routes crossterm, transport and resize events

use crate::app::events::{AppEvent, EventHandler};
use crate::bridge::protocol::{ConnectionStatus, Payload, Viewport};
use crate::bridge::session::TerminalBridge;
use crate::bridge::transport::{Connector, EventReceiver, TransportMessage};
use crate::components::LayoutComponent;
use crate::terminal::resize::ResizeEvents;
use anyhow::Result;
use crossterm::event::{Event, EventStream};
use futures_util::StreamExt;
use ratatui::{backend::Backend, layout::Rect, Frame, Terminal};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// Session window waiting for its opener
    AwaitingCredentials,
    /// Handoff gave up; reload or quit
    HandoffFailed(String),
    Session,
}

#[derive(Debug)]
pub struct AppState {
    pub view: View,
    pub status: ConnectionStatus,
    pub session_label: String,
    pub viewport: Viewport,
    pub last_error: Option<String>,
    /// Ctrl+] was pressed; the next key is a command
    pub command_pending: bool,
    pub should_quit: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            view: View::Session,
            status: ConnectionStatus::Closed,
            session_label: String::new(),
            viewport: Viewport::default(),
            last_error: None,
            command_pending: false,
            should_quit: false,
        }
    }
}

impl AppState {
    pub fn awaiting_credentials() -> Self {
        Self {
            view: View::AwaitingCredentials,
            ..Self::default()
        }
    }
}

/// Session window with a live bridge
pub struct App<C: Connector> {
    pub state: AppState,
    bridge: TerminalBridge<C>,
    transport: EventReceiver,
    resize_events: ResizeEvents,
    layout: LayoutComponent,
}

impl<C: Connector> App<C> {
    pub fn new(
        bridge: TerminalBridge<C>,
        transport: EventReceiver,
        resize_events: ResizeEvents,
    ) -> Self {
        let credentials = bridge.credentials();
        let state = AppState {
            session_label: format!("{}@{}", credentials.username, credentials.host),
            viewport: bridge.viewport(),
            ..AppState::default()
        };

        let mut app = Self {
            state,
            bridge,
            transport,
            resize_events,
            layout: LayoutComponent::new(),
        };
        app.sync_state();
        app
    }

    /// Open the first connection
    pub fn start(&mut self) {
        self.bridge.connect();
        self.sync_state();
    }

    pub fn bridge(&self) -> &TerminalBridge<C> {
        &self.bridge
    }

    /// Apply every transport event already queued
    pub fn drain_transport(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.transport.try_recv() {
            self.handle_transport(message);
            handled += 1;
        }
        handled
    }

    pub fn handle_transport(&mut self, message: TransportMessage) {
        self.bridge.handle_transport_event(message);
        self.sync_state();
    }

    /// Feed one crossterm event
    pub fn handle_terminal_event(&mut self, event: Event) {
        match event {
            Event::Key(key) => {
                if let Some(app_event) = EventHandler::handle_key_event(key, &mut self.state) {
                    self.dispatch(app_event);
                }
            }
            Event::Paste(text) => {
                if let Some(app_event) = EventHandler::handle_paste(text, &self.state) {
                    self.dispatch(app_event);
                }
            }
            Event::Resize(width, height) => {
                let area = LayoutComponent::terminal_area(Rect::new(0, 0, width, height));
                self.resize_events.publish(area);
            }
            Event::Mouse(_) | Event::FocusGained | Event::FocusLost => {}
        }
    }

    pub fn dispatch(&mut self, event: AppEvent) {
        debug!("Dispatching {:?}", event);
        match event {
            AppEvent::Forward(bytes) => {
                self.bridge.view_mut().scroll_to_bottom();
                self.bridge.on_local_input(Payload::Binary(bytes));
            }
            AppEvent::Restart => self.bridge.restart(),
            AppEvent::ScrollUp => self.bridge.view_mut().scroll_up(10),
            AppEvent::ScrollDown => self.bridge.view_mut().scroll_down(10),
            AppEvent::Quit | AppEvent::CommandPrefix | AppEvent::Reload => {
                EventHandler::process_event(event, &mut self.state);
            }
        }
        self.sync_state();
    }

    fn sync_state(&mut self) {
        self.state.status = self.bridge.status();
        self.state.viewport = self.bridge.viewport();
        self.state.last_error = self.bridge.last_error().map(ToString::to_string);
    }

    pub fn render(&self, frame: &mut Frame<'_>) {
        self.layout.render(frame, &self.state, Some(self.bridge.view()));
    }

    /// Drive the session until the user quits
    pub async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let mut events = EventStream::new();

        let size = terminal.size()?;
        self.bridge
            .on_viewport_change(LayoutComponent::terminal_area(size));
        self.start();

        loop {
            terminal.draw(|frame| self.render(frame))?;

            if self.state.should_quit {
                break;
            }

            tokio::select! {
                maybe_event = events.next() => match maybe_event {
                    Some(Ok(event)) => self.handle_terminal_event(event),
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
                Some(message) = self.transport.recv() => {
                    self.handle_transport(message);
                    // Bursty output: render once for everything queued
                    self.drain_transport();
                }
                Some(area) = self.bridge.next_resize() => {
                    self.bridge.on_viewport_change(area);
                    self.sync_state();
                }
            }
        }

        info!("Session window closing");
        self.bridge.teardown();
        Ok(())
    }
}
