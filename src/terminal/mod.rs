// ABOUTME: Terminal emulation and key encoding for the session view
// The emulator itself is the vt100 crate; this module adapts it to ratatui and crossterm

pub mod input;
pub mod resize;
pub mod view;

pub use input::encode_key;
pub use resize::ResizeListener;
pub use view::TerminalView;
