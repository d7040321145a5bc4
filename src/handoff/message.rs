// ABOUTME: Messages exchanged between the opener and the session window during credential handoff
// Newline-delimited JSON over a loopback socket; every message carries the session origin token

use crate::bridge::protocol::Credentials;
use crate::handoff::error::HandoffError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowMessage {
    /// Opener → session window
    Credentials {
        origin: String,
        host: String,
        username: String,
        #[serde(rename = "privateKey")]
        private_key: String,
    },
    /// Session window → opener, acknowledging a credentials message
    Ack { origin: String },
    /// Session window → opener, sent on every load of the session window
    RequestCredentials { origin: String },
}

impl WindowMessage {
    pub fn credentials(origin: &str, credentials: &Credentials) -> Self {
        Self::Credentials {
            origin: origin.to_string(),
            host: credentials.host.clone(),
            username: credentials.username.clone(),
            private_key: credentials.private_key.clone(),
        }
    }

    pub fn ack(origin: &str) -> Self {
        Self::Ack {
            origin: origin.to_string(),
        }
    }

    pub fn request_credentials(origin: &str) -> Self {
        Self::RequestCredentials {
            origin: origin.to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::Credentials { origin, .. }
            | Self::Ack { origin }
            | Self::RequestCredentials { origin } => origin,
        }
    }

    /// The credentials carried by this message, if any
    pub fn to_credentials(&self) -> Option<Credentials> {
        match self {
            Self::Credentials {
                host,
                username,
                private_key,
                ..
            } => Some(Credentials::new(host, username, private_key)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credentials { .. } => "credentials",
            Self::Ack { .. } => "ack",
            Self::RequestCredentials { .. } => "request_credentials",
        }
    }
}

impl std::fmt::Debug for WindowMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials {
                origin,
                host,
                username,
                ..
            } => f
                .debug_struct("Credentials")
                .field("origin", origin)
                .field("host", host)
                .field("username", username)
                .field("private_key", &"[REDACTED]")
                .finish(),
            Self::Ack { origin } => f.debug_struct("Ack").field("origin", origin).finish(),
            Self::RequestCredentials { origin } => f
                .debug_struct("RequestCredentials")
                .field("origin", origin)
                .finish(),
        }
    }
}

/// One end of a handoff connection
#[derive(Debug)]
pub struct MessageLink {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl MessageLink {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, message: &WindowMessage) -> Result<(), HandoffError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!("Posted {} message", message.kind());
        Ok(())
    }

    /// Next well-formed message; `None` once the peer hangs up.
    /// Lines that do not decode are skipped.
    pub async fn next(&mut self) -> Result<Option<WindowMessage>, HandoffError> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WindowMessage>(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("Ignoring undecodable handoff message: {}", e),
            }
        }
        Ok(None)
    }
}
