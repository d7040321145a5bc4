// ABOUTME: Wire frames and data model shared between the terminal bridge and the SSH proxy
// Init and resize control frames are JSON text; everything else is raw terminal data

use ratatui::layout::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================
// Session Credentials
// ============================================

/// Credentials for one remote shell session. Supplied once, never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            private_key: private_key.into(),
        }
    }

    /// Reject credentials with any empty field
    pub fn validate(&self) -> Result<(), BridgeError> {
        let missing = if self.host.trim().is_empty() {
            Some("host")
        } else if self.username.trim().is_empty() {
            Some("username")
        } else if self.private_key.trim().is_empty() {
            Some("privateKey")
        } else {
            None
        };

        match missing {
            Some(field) => Err(BridgeError::InvalidCredentials(format!("{field} is empty"))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================
// Viewport
// ============================================

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub columns: u16,
    pub rows: u16,
}

impl Viewport {
    pub const fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }

    /// Fit the terminal to the inner area of a fully bordered pane.
    pub fn fit(area: Rect) -> Self {
        Self {
            columns: area.width.saturating_sub(2).max(1),
            rows: area.height.saturating_sub(2).max(1),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

// ============================================
// Connection Status
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Closed,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Connecting => "◌",
            Self::Connected => "●",
            Self::Closed => "✗",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ============================================
// Control Frames
// ============================================

/// First frame on every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitFrame {
    pub host: String,
    pub username: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    pub columns: u16,
    pub rows: u16,
}

impl InitFrame {
    pub fn new(credentials: &Credentials, viewport: Viewport) -> Self {
        Self {
            host: credentials.host.clone(),
            username: credentials.username.clone(),
            private_key: credentials.private_key.clone(),
            columns: viewport.columns,
            rows: viewport.rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeFrame {
    pub resize: bool,
    pub columns: u16,
    pub rows: u16,
}

impl ResizeFrame {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            resize: true,
            columns: viewport.columns,
            rows: viewport.rows,
        }
    }
}

// ============================================
// Payloads
// ============================================

/// Raw data carried by the transport in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Encode a control frame as a JSON text payload
    pub fn control<T: Serialize>(frame: &T) -> Result<Self, BridgeError> {
        Ok(Self::Text(serde_json::to_string(frame)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

// ============================================
// Errors
// ============================================

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to open connection to {url}: {reason}")]
    TransportOpenFailure { url: String, reason: String },

    #[error("connection error: {0}")]
    TransportRuntimeError(String),

    #[error("connection closed by remote{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    TransportClosedByPeer(Option<String>),

    #[error("credential handoff gave up after {attempts} attempts")]
    CredentialHandoffTimeout { attempts: u32 },

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("frame encoding failed: {0}")]
    Frame(#[from] serde_json::Error),
}
