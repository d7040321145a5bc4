// ABOUTME: Session-window side of the credential handoff
// Requests credentials on load, acknowledges them, and fails visibly if none arrive in time

use crate::bridge::protocol::Credentials;
use crate::handoff::error::HandoffError;
use crate::handoff::message::{MessageLink, WindowMessage};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupState {
    AwaitingCredentials,
    Received(Credentials),
    /// The wait deadline passed with no usable credentials
    Failed(String),
}

/// Receive/ack state machine for the session window
#[derive(Debug)]
pub struct PopupHandoff {
    origin: String,
    state: PopupState,
}

impl PopupHandoff {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            state: PopupState::AwaitingCredentials,
        }
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match &self.state {
            PopupState::Received(credentials) => Some(credentials),
            _ => None,
        }
    }

    /// Message to post whenever the window (re)loads; forgets anything received before
    pub fn on_load(&mut self) -> WindowMessage {
        self.state = PopupState::AwaitingCredentials;
        WindowMessage::request_credentials(&self.origin)
    }

    /// Returns the acknowledgment to post back, if the message deserves one.
    ///
    /// Repeated credential posts are acknowledged again, but the first
    /// credentials received stay in effect.
    pub fn on_message(&mut self, message: &WindowMessage) -> Option<WindowMessage> {
        if message.origin() != self.origin {
            warn!("Ignoring {} message from foreign origin", message.kind());
            return None;
        }

        let credentials = message.to_credentials()?;
        if let Err(e) = credentials.validate() {
            warn!("Rejecting credentials from opener: {}", e);
            return None;
        }

        match self.state {
            PopupState::AwaitingCredentials | PopupState::Failed(_) => {
                info!(
                    "Received credentials for {}@{}",
                    credentials.username, credentials.host
                );
                self.state = PopupState::Received(credentials);
            }
            PopupState::Received(_) => debug!("Credentials already received, acknowledging again"),
        }

        Some(WindowMessage::ack(&self.origin))
    }

    /// Give up waiting. No effect once credentials arrived.
    pub fn on_deadline(&mut self, waited: Duration) {
        if self.state == PopupState::AwaitingCredentials {
            warn!("No credentials received within {:?}", waited);
            self.state = PopupState::Failed(format!(
                "failed to receive session from opener within {}s",
                waited.as_secs()
            ));
        }
    }
}

/// Connection from the session window back to its opener
#[derive(Debug)]
pub struct PopupEndpoint {
    link: MessageLink,
    handoff: PopupHandoff,
    wait_timeout: Duration,
}

impl PopupEndpoint {
    pub async fn connect(
        addr: SocketAddr,
        origin: impl Into<String>,
        wait_timeout: Duration,
    ) -> Result<Self, HandoffError> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to opener at {}", addr);
        Ok(Self {
            link: MessageLink::new(stream),
            handoff: PopupHandoff::new(origin),
            wait_timeout,
        })
    }

    pub fn state(&self) -> &PopupState {
        self.handoff.state()
    }

    /// Request credentials and wait for them, acknowledging on receipt.
    /// Calling it again behaves like reloading the window.
    pub async fn receive(&mut self) -> Result<Credentials, HandoffError> {
        let request = self.handoff.on_load();
        self.link.send(&request).await?;

        let deadline = Instant::now() + self.wait_timeout;
        loop {
            tokio::select! {
                received = self.link.next() => {
                    let Some(message) = received? else {
                        return Err(HandoffError::PeerClosed);
                    };
                    if let Some(ack) = self.handoff.on_message(&message) {
                        self.link.send(&ack).await?;
                    }
                    if let Some(credentials) = self.handoff.credentials() {
                        return Ok(credentials.clone());
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    self.handoff.on_deadline(self.wait_timeout);
                    return Err(HandoffError::TimedOut(self.wait_timeout));
                }
            }
        }
    }

    /// Keep acknowledging late duplicate posts until the opener hangs up
    pub async fn serve(mut self) -> Result<(), HandoffError> {
        while let Some(message) = self.link.next().await? {
            if let Some(ack) = self.handoff.on_message(&message) {
                self.link.send(&ack).await?;
            }
        }
        debug!("Opener closed the handoff link");
        Ok(())
    }
}
