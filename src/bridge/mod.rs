// ABOUTME: Terminal session bridge between a local terminal view and a remote SSH proxy
// Owns one WebSocket at a time, keeps the remote PTY sized, and reconnects only on request

pub mod loopback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use loopback::LoopbackConnector;
pub use protocol::{BridgeError, ConnectionStatus, Credentials, Payload, Viewport};
pub use session::TerminalBridge;
pub use transport::{Connector, TransportEvent, TransportMessage, WebSocketConnector};
