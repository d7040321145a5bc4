// ABOUTME: Event handling for the session window: key passthrough, command prefix, restart and quit

use crate::app::state::{AppState, View};
use crate::bridge::protocol::ConnectionStatus;
use crate::terminal::input::encode_key;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Ctrl+] as sent by most terminals
pub const COMMAND_PREFIX_BYTE: u8 = 0x1d;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Raw bytes for the remote shell
    Forward(Vec<u8>),
    Restart,
    Quit,
    CommandPrefix,
    ScrollUp,
    ScrollDown,
    /// Ask the opener for credentials again
    Reload,
}

pub struct EventHandler;

impl EventHandler {
    pub fn handle_key_event(key_event: KeyEvent, state: &mut AppState) -> Option<AppEvent> {
        if key_event.kind == KeyEventKind::Release {
            return None;
        }

        match state.view {
            View::AwaitingCredentials => Self::handle_waiting_keys(key_event),
            View::HandoffFailed(_) => Self::handle_failed_keys(key_event),
            View::Session => Self::handle_session_keys(key_event, state),
        }
    }

    /// Pasted text goes out verbatim while a session is up
    pub fn handle_paste(text: String, state: &AppState) -> Option<AppEvent> {
        if state.view == View::Session && !text.is_empty() {
            Some(AppEvent::Forward(text.into_bytes()))
        } else {
            None
        }
    }

    fn is_quit_combo(key_event: &KeyEvent) -> bool {
        matches!(key_event.code, KeyCode::Char('c'))
            && key_event.modifiers.contains(KeyModifiers::CONTROL)
    }

    fn is_command_prefix(key_event: &KeyEvent) -> bool {
        matches!(key_event.code, KeyCode::Char(']') | KeyCode::Char('5'))
            && key_event.modifiers.contains(KeyModifiers::CONTROL)
    }

    fn handle_waiting_keys(key_event: KeyEvent) -> Option<AppEvent> {
        match key_event.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),
            _ if Self::is_quit_combo(&key_event) => Some(AppEvent::Quit),
            _ => None,
        }
    }

    fn handle_failed_keys(key_event: KeyEvent) -> Option<AppEvent> {
        match key_event.code {
            KeyCode::Char('r') => Some(AppEvent::Reload),
            KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),
            _ if Self::is_quit_combo(&key_event) => Some(AppEvent::Quit),
            _ => None,
        }
    }

    fn handle_session_keys(key_event: KeyEvent, state: &mut AppState) -> Option<AppEvent> {
        if state.command_pending {
            state.command_pending = false;
            return Self::handle_command_key(key_event);
        }

        if Self::is_command_prefix(&key_event) {
            return Some(AppEvent::CommandPrefix);
        }

        match state.status {
            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                encode_key(key_event).map(AppEvent::Forward)
            }
            // Nothing reaches the remote side while closed
            ConnectionStatus::Closed => match key_event.code {
                KeyCode::Char('r') => Some(AppEvent::Restart),
                KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),
                KeyCode::PageUp => Some(AppEvent::ScrollUp),
                KeyCode::PageDown => Some(AppEvent::ScrollDown),
                _ => None,
            },
        }
    }

    fn handle_command_key(key_event: KeyEvent) -> Option<AppEvent> {
        match key_event.code {
            KeyCode::Char('r') => Some(AppEvent::Restart),
            KeyCode::Char('q') => Some(AppEvent::Quit),
            KeyCode::Char(']') => Some(AppEvent::Forward(vec![COMMAND_PREFIX_BYTE])),
            KeyCode::PageUp => Some(AppEvent::ScrollUp),
            KeyCode::PageDown => Some(AppEvent::ScrollDown),
            _ => None,
        }
    }

    /// Apply events that only touch UI state
    pub fn process_event(event: AppEvent, state: &mut AppState) {
        match event {
            AppEvent::Quit => state.should_quit = true,
            AppEvent::CommandPrefix => state.command_pending = true,
            AppEvent::Reload => {
                state.view = View::AwaitingCredentials;
                state.last_error = None;
            }
            AppEvent::Forward(_) | AppEvent::Restart | AppEvent::ScrollUp | AppEvent::ScrollDown => {}
        }
    }
}
