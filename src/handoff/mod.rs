// ABOUTME: Cross-window credential handoff between an opener and a separately launched session window
// Unreliable-delivery handshake: bounded credential posts on one side, request/ack on the other

pub mod error;
pub mod launcher;
pub mod message;
pub mod opener;
pub mod popup;

pub use error::HandoffError;
pub use launcher::{CommandLauncher, LaunchRequest, WindowLauncher};
pub use message::{MessageLink, WindowMessage};
pub use opener::{
    OpenerEndpoint, OpenerHandoff, OpenerNotice, OpenerReaction, OpenerReport, OpenerState,
    RetryPolicy,
};
pub use popup::{PopupEndpoint, PopupHandoff, PopupState};
