// ABOUTME: Session window application: state, key handling and the async run loop

pub mod events;
pub mod state;

pub use events::{AppEvent, EventHandler};
pub use state::{App, AppState, View};
