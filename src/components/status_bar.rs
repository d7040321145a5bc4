// ABOUTME: One-line status bar showing connection state, session and the restart affordance

use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    widgets::Paragraph,
};

use crate::app::{AppState, View};
use crate::bridge::protocol::ConnectionStatus;

pub struct StatusBarComponent;

impl StatusBarComponent {
    pub fn new() -> Self {
        Self
    }

    /// Status bar text for the current state
    pub fn line(state: &AppState) -> Line<'static> {
        if state.view != View::Session {
            return Line::from(Span::styled(
                " session window ",
                Style::default().fg(Color::Gray),
            ));
        }

        if state.command_pending {
            return Line::from(Span::styled(
                " command: [r] restart  [q] quit  []] send Ctrl+]  [PgUp/PgDn] scroll ",
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ));
        }

        let status_color = match state.status {
            ConnectionStatus::Connected => Color::Green,
            ConnectionStatus::Connecting => Color::Yellow,
            ConnectionStatus::Closed => Color::Red,
        };

        let mut spans = vec![
            Span::styled(
                format!(" {} {} ", state.status.indicator(), state.status.label()),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" {}  {} ", state.session_label, state.viewport)),
        ];

        match state.status {
            ConnectionStatus::Closed => {
                if let Some(error) = &state.last_error {
                    spans.push(Span::styled(
                        format!(" {error} "),
                        Style::default().fg(Color::Red),
                    ));
                }
                spans.push(Span::styled(
                    " [r] Restart  [q] Quit ",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ));
            }
            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                spans.push(Span::styled(
                    " Ctrl+] for commands ",
                    Style::default().fg(Color::DarkGray),
                ));
            }
        }

        Line::from(spans)
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, state: &AppState) {
        frame.render_widget(Paragraph::new(Self::line(state)), area);
    }
}

impl Default for StatusBarComponent {
    fn default() -> Self {
        Self::new()
    }
}
