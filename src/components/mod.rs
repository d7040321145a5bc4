// ABOUTME: UI components for the session window: layout, status bar and handoff screens

pub mod handoff_screen;
pub mod layout;
pub mod status_bar;

pub use handoff_screen::HandoffScreenComponent;
pub use layout::LayoutComponent;
pub use status_bar::StatusBarComponent;
