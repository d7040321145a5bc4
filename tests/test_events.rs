// ABOUTME: Tests for session window event handling to ensure keys map to the right actions
// and that keystrokes only reach the remote shell while a connection is up

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use pretty_assertions::assert_eq;
use ratatui::layout::Rect;
use ssh_bridge_console::app::events::COMMAND_PREFIX_BYTE;
use ssh_bridge_console::app::{App, AppEvent, AppState, EventHandler, View};
use ssh_bridge_console::bridge::{
    ConnectionStatus, Credentials, LoopbackConnector, Payload, TerminalBridge,
};
use ssh_bridge_console::terminal::resize::ResizeEvents;

fn create_key_event(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn create_key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
    KeyEvent::new(code, modifiers)
}

fn session_state(status: ConnectionStatus) -> AppState {
    AppState {
        status,
        ..AppState::default()
    }
}

fn create_app() -> (App<LoopbackConnector>, LoopbackConnector) {
    let connector = LoopbackConnector::new();
    let resize_events = ResizeEvents::new();
    let (bridge, transport) = TerminalBridge::initialize(
        Credentials::new("10.0.0.5", "ec2-user", "PEM..."),
        "ws://bridge.test/ssh",
        connector.clone(),
        &resize_events,
        Rect::new(0, 0, 82, 26),
    )
    .unwrap();
    (App::new(bridge, transport, resize_events), connector)
}

#[test]
fn test_keys_forward_while_connected() {
    let mut state = session_state(ConnectionStatus::Connected);

    let letter = EventHandler::handle_key_event(create_key_event(KeyCode::Char('l')), &mut state);
    assert_eq!(letter, Some(AppEvent::Forward(b"l".to_vec())));

    let enter = EventHandler::handle_key_event(create_key_event(KeyCode::Enter), &mut state);
    assert_eq!(enter, Some(AppEvent::Forward(b"\r".to_vec())));

    // Ctrl+C belongs to the remote shell during a session
    let interrupt = EventHandler::handle_key_event(
        create_key_event_with_modifiers(KeyCode::Char('c'), KeyModifiers::CONTROL),
        &mut state,
    );
    assert_eq!(interrupt, Some(AppEvent::Forward(vec![0x03])));

    let up = EventHandler::handle_key_event(create_key_event(KeyCode::Up), &mut state);
    assert_eq!(up, Some(AppEvent::Forward(b"\x1b[A".to_vec())));
}

#[test]
fn test_closed_session_offers_restart_and_quit_only() {
    let mut state = session_state(ConnectionStatus::Closed);

    let restart = EventHandler::handle_key_event(create_key_event(KeyCode::Char('r')), &mut state);
    assert_eq!(restart, Some(AppEvent::Restart));

    let quit = EventHandler::handle_key_event(create_key_event(KeyCode::Char('q')), &mut state);
    assert_eq!(quit, Some(AppEvent::Quit));

    let other = EventHandler::handle_key_event(create_key_event(KeyCode::Char('x')), &mut state);
    assert_eq!(other, None);
}

#[test]
fn test_command_prefix_then_command() {
    let mut state = session_state(ConnectionStatus::Connected);

    let prefix = EventHandler::handle_key_event(
        create_key_event_with_modifiers(KeyCode::Char(']'), KeyModifiers::CONTROL),
        &mut state,
    );
    assert_eq!(prefix, Some(AppEvent::CommandPrefix));
    EventHandler::process_event(AppEvent::CommandPrefix, &mut state);
    assert!(state.command_pending);

    let restart = EventHandler::handle_key_event(create_key_event(KeyCode::Char('r')), &mut state);
    assert_eq!(restart, Some(AppEvent::Restart));
    assert!(!state.command_pending);

    EventHandler::process_event(AppEvent::CommandPrefix, &mut state);
    let literal = EventHandler::handle_key_event(create_key_event(KeyCode::Char(']')), &mut state);
    assert_eq!(literal, Some(AppEvent::Forward(vec![COMMAND_PREFIX_BYTE])));

    EventHandler::process_event(AppEvent::CommandPrefix, &mut state);
    let quit = EventHandler::handle_key_event(create_key_event(KeyCode::Char('q')), &mut state);
    assert_eq!(quit, Some(AppEvent::Quit));
    EventHandler::process_event(AppEvent::Quit, &mut state);
    assert!(state.should_quit);
}

#[test]
fn test_handoff_screens() {
    let mut waiting = AppState::awaiting_credentials();
    assert_eq!(
        EventHandler::handle_key_event(create_key_event(KeyCode::Char('r')), &mut waiting),
        None
    );
    assert_eq!(
        EventHandler::handle_key_event(create_key_event(KeyCode::Esc), &mut waiting),
        Some(AppEvent::Quit)
    );

    let mut failed = AppState {
        view: View::HandoffFailed("no credentials after 10s".to_string()),
        ..AppState::default()
    };
    let reload = EventHandler::handle_key_event(create_key_event(KeyCode::Char('r')), &mut failed);
    assert_eq!(reload, Some(AppEvent::Reload));

    EventHandler::process_event(AppEvent::Reload, &mut failed);
    assert_eq!(failed.view, View::AwaitingCredentials);
}

#[test]
fn test_paste_only_reaches_live_sessions() {
    let state = session_state(ConnectionStatus::Connected);
    assert_eq!(
        EventHandler::handle_paste("ls -la\n".to_string(), &state),
        Some(AppEvent::Forward(b"ls -la\n".to_vec()))
    );

    let waiting = AppState::awaiting_credentials();
    assert_eq!(EventHandler::handle_paste("ls".to_string(), &waiting), None);
}

#[test]
fn test_app_forwards_typing_after_connect() {
    let (mut app, connector) = create_app();
    app.start();
    assert_eq!(app.state.status, ConnectionStatus::Connecting);

    connector.accept(app.bridge().generation());
    app.drain_transport();
    assert_eq!(app.state.status, ConnectionStatus::Connected);
    assert_eq!(app.state.session_label, "ec2-user@10.0.0.5");

    app.handle_terminal_event(Event::Key(create_key_event(KeyCode::Char('l'))));
    app.handle_terminal_event(Event::Paste("s\r".to_string()));

    let sent = connector.sent(app.bridge().generation());
    assert_eq!(
        &sent[1..],
        &[Payload::Binary(b"l".to_vec()), Payload::Binary(b"s\r".to_vec())]
    );
}

#[test]
fn test_app_error_then_restart_from_keyboard() {
    let (mut app, connector) = create_app();
    app.start();
    let first = app.bridge().generation();
    connector.accept(first);
    connector.fail(first, "broken pipe");
    app.drain_transport();

    assert_eq!(app.state.status, ConnectionStatus::Closed);
    assert!(app.state.last_error.as_deref().unwrap().contains("broken pipe"));

    // Typing while closed goes nowhere
    app.handle_terminal_event(Event::Key(create_key_event(KeyCode::Char('l'))));
    assert_eq!(connector.sent(first).len(), 1);

    app.handle_terminal_event(Event::Key(create_key_event(KeyCode::Char('r'))));
    assert_eq!(app.state.status, ConnectionStatus::Connecting);
    assert_ne!(app.bridge().generation(), first);
    assert!(app.state.last_error.is_none());
}
