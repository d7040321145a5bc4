// ABOUTME: Terminal view widget rendering remote shell output in the TUI
// Feeds raw bytes through a vt100 parser and draws the resulting screen with ratatui

use crate::bridge::protocol::Viewport;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Widget},
};
use tracing::trace;

/// Lines of history kept above the visible screen
const SCROLLBACK_LINES: usize = 5000;

/// Terminal emulation widget for one remote session
pub struct TerminalView {
    /// VT100 parser holding screen and scrollback state
    parser: vt100::Parser,

    viewport: Viewport,

    title: String,

    /// Border style based on focus state
    border_style: Style,

    disposed: bool,
}

impl TerminalView {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            parser: vt100::Parser::new(viewport.rows, viewport.columns, SCROLLBACK_LINES),
            viewport,
            title: String::from("Terminal"),
            border_style: Style::default().fg(Color::Cyan),
            disposed: false,
        }
    }

    /// Feed raw output bytes, exactly as received
    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.disposed {
            return;
        }
        trace!("Terminal view processing {} bytes", data.len());
        self.parser.process(data);
    }

    pub fn write_str(&mut self, data: &str) {
        self.write_bytes(data.as_bytes());
    }

    /// Print a bracketed status message on its own line
    pub fn write_status_line(&mut self, message: &str) {
        self.write_str(&format!("\r\n\x1b[1;33m[{message}]\x1b[0m\r\n"));
    }

    pub fn resize(&mut self, viewport: Viewport) {
        if self.disposed || viewport == self.viewport {
            return;
        }
        self.viewport = viewport;
        self.parser.set_size(viewport.rows, viewport.columns);
        let offset = self.parser.screen().scrollback();
        self.parser
            .set_scrollback(offset.min(usize::from(viewport.rows)));
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Scroll up by n lines, at most one screen height back.
    ///
    /// vt100 cannot render an offset larger than the visible row count.
    pub fn scroll_up(&mut self, n: usize) {
        let offset = self.parser.screen().scrollback();
        let limit = usize::from(self.viewport.rows);
        self.parser.set_scrollback(offset.saturating_add(n).min(limit));
    }

    /// Scroll down by n lines
    pub fn scroll_down(&mut self, n: usize) {
        let offset = self.parser.screen().scrollback();
        self.parser.set_scrollback(offset.saturating_sub(n));
    }

    pub fn scroll_to_bottom(&mut self) {
        self.parser.set_scrollback(0);
    }

    /// Lines currently scrolled back from the live screen (0 = live)
    pub fn scroll_offset(&self) -> usize {
        self.parser.screen().scrollback()
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.border_style = if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };
    }

    /// Release the emulator state. Further writes are ignored.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.parser = vt100::Parser::new(1, 1, 0);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Plain text of the visible screen
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }

    /// Convert VT100 cell attributes to ratatui Style
    fn cell_to_style(cell: &vt100::Cell) -> Style {
        let mut style = Style::default();

        style = match cell.fgcolor() {
            vt100::Color::Default => style,
            vt100::Color::Idx(n) => style.fg(Self::ansi_to_ratatui_color(n)),
            vt100::Color::Rgb(r, g, b) => style.fg(Color::Rgb(r, g, b)),
        };

        style = match cell.bgcolor() {
            vt100::Color::Default => style,
            vt100::Color::Idx(n) => style.bg(Self::ansi_to_ratatui_color(n)),
            vt100::Color::Rgb(r, g, b) => style.bg(Color::Rgb(r, g, b)),
        };

        if cell.bold() {
            style = style.add_modifier(Modifier::BOLD);
        }
        if cell.italic() {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if cell.underline() {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        if cell.inverse() {
            style = style.add_modifier(Modifier::REVERSED);
        }

        style
    }

    fn ansi_to_ratatui_color(idx: u8) -> Color {
        match idx {
            0 => Color::Black,
            1 => Color::Red,
            2 => Color::Green,
            3 => Color::Yellow,
            4 => Color::Blue,
            5 => Color::Magenta,
            6 => Color::Cyan,
            7 => Color::Gray,
            8 => Color::DarkGray,
            9 => Color::LightRed,
            10 => Color::LightGreen,
            11 => Color::LightYellow,
            12 => Color::LightBlue,
            13 => Color::LightMagenta,
            14 => Color::LightCyan,
            15 => Color::White,
            n => Color::Indexed(n),
        }
    }

    fn render_screen(&self, inner: Rect, buf: &mut Buffer) {
        let screen = self.parser.screen();

        for row in 0..inner.height {
            for col in 0..inner.width {
                let Some(cell) = screen.cell(row, col) else {
                    continue;
                };
                if cell.is_wide_continuation() {
                    continue;
                }
                let contents = cell.contents();
                let symbol = if contents.is_empty() { " " } else { contents.as_str() };
                buf.get_mut(inner.x + col, inner.y + row)
                    .set_symbol(symbol)
                    .set_style(Self::cell_to_style(cell));
            }
        }

        // Cursor only makes sense on the live screen
        if !screen.hide_cursor() && screen.scrollback() == 0 && inner.width > 0 && inner.height > 0
        {
            let (cursor_row, cursor_col) = screen.cursor_position();
            let x = inner.x + cursor_col.min(inner.width - 1);
            let y = inner.y + cursor_row.min(inner.height - 1);
            buf.get_mut(x, y)
                .set_style(Style::default().add_modifier(Modifier::REVERSED));
        }
    }

    fn render_scroll_indicator(&self, area: Rect, buf: &mut Buffer) {
        let offset = self.scroll_offset();
        if offset == 0 || area.width < 4 {
            return;
        }
        let indicator = format!(" ▲ {offset} lines above ");
        buf.set_stringn(
            area.x + 2,
            area.y,
            indicator,
            usize::from(area.width - 4),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        );
    }
}

impl Widget for &TerminalView {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(self.title.clone())
            .borders(Borders::ALL)
            .border_style(self.border_style);

        let inner = block.inner(area);
        block.render(area, buf);

        if self.disposed {
            return;
        }

        self.render_screen(inner, buf);
        self.render_scroll_indicator(area, buf);
    }
}
