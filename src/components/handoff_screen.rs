// ABOUTME: Placeholder shown in the session window while credentials are awaited or after the handoff failed

use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::app::{AppState, View};

pub struct HandoffScreenComponent;

impl HandoffScreenComponent {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, state: &AppState) {
        let (title, color, lines) = match &state.view {
            View::HandoffFailed(reason) => (
                "❌ Session Unavailable",
                Color::Red,
                vec![
                    Line::from("Failed to receive session")
                        .style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
                    Line::from(""),
                    Line::from(reason.clone()),
                    Line::from(""),
                    Line::from("[r] Request again  [q] Quit").style(Style::default().fg(Color::Gray)),
                ],
            ),
            _ => (
                "⏳ Waiting",
                Color::Yellow,
                vec![
                    Line::from("Waiting for session credentials from the opener...")
                        .style(Style::default().fg(Color::Yellow)),
                    Line::from(""),
                    Line::from("[q] Quit").style(Style::default().fg(Color::Gray)),
                ],
            ),
        };

        let popup_area = Self::centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color));

        let paragraph = Paragraph::new(lines)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });

        frame.render_widget(paragraph, popup_area);
    }

    fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(area);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

impl Default for HandoffScreenComponent {
    fn default() -> Self {
        Self::new()
    }
}
