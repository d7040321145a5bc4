// ABOUTME: Main layout component: terminal pane above a one-line status bar, handoff screens as overlays

use ratatui::prelude::*;

use super::{HandoffScreenComponent, StatusBarComponent};
use crate::app::{AppState, View};
use crate::terminal::TerminalView;

pub struct LayoutComponent {
    status_bar: StatusBarComponent,
    handoff_screen: HandoffScreenComponent,
}

impl LayoutComponent {
    pub fn new() -> Self {
        Self {
            status_bar: StatusBarComponent::new(),
            handoff_screen: HandoffScreenComponent::new(),
        }
    }

    fn split(screen: Rect) -> (Rect, Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(0),    // Terminal pane
                Constraint::Length(1), // Status bar
            ])
            .split(screen);
        (chunks[0], chunks[1])
    }

    /// Area the terminal pane occupies on a screen of the given size
    pub fn terminal_area(screen: Rect) -> Rect {
        Self::split(screen).0
    }

    pub fn render(&self, frame: &mut Frame, state: &AppState, view: Option<&TerminalView>) {
        let (terminal_area, status_area) = Self::split(frame.size());

        match &state.view {
            View::Session => {
                if let Some(view) = view {
                    frame.render_widget(view, terminal_area);
                }
            }
            View::AwaitingCredentials | View::HandoffFailed(_) => {
                self.handoff_screen.render(frame, terminal_area, state);
            }
        }

        self.status_bar.render(frame, status_area, state);
    }
}

impl Default for LayoutComponent {
    fn default() -> Self {
        Self::new()
    }
}
