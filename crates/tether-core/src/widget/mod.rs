//! Headless terminal widget: a minimal emulator with scrollback and a
//! viewport, driven by `vte`.

mod buffer;
mod cursor;

pub use buffer::LineBuffer;
pub use cursor::Cursor;

use std::sync::Arc;
use tether_common::{
    error::LayoutError,
    traits::{RenderSurface, TerminalWidget},
    types::{BufferMetrics, Size},
};
use tracing::{debug, trace};
use vte::{Params, Perform};

/// Default number of lines kept above the live screen
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Size of one character cell in surface units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: f64,
    pub height: f64,
}

impl CellMetrics {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for CellMetrics {
    /// Surfaces that report their geometry in cells
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Grid state the parser writes into
struct Screen {
    size: Size,
    buffer: LineBuffer,
    cursor: Cursor,
    viewport_y: usize,
    scrollback: usize,
}

impl Screen {
    fn new(size: Size, scrollback: usize) -> Self {
        Self {
            size,
            buffer: LineBuffer::new(size.rows as usize, size.rows as usize + scrollback),
            cursor: Cursor::new(),
            viewport_y: 0,
            scrollback,
        }
    }

    fn base_y(&self) -> usize {
        self.buffer.len().saturating_sub(self.size.rows as usize)
    }

    fn cursor_line(&self) -> usize {
        self.base_y() + self.cursor.row() as usize
    }

    fn follows_tail(&self) -> bool {
        self.viewport_y >= self.base_y()
    }

    /// Account for lines dropped off the top of the scrollback
    fn shift_viewport(&mut self, dropped: usize) {
        self.viewport_y = self.viewport_y.saturating_sub(dropped);
    }

    fn line_feed(&mut self) {
        let follow = self.follows_tail();
        if self.cursor.row() + 1 < self.size.rows {
            self.cursor.move_down(1);
        } else {
            let dropped = self.buffer.push_blank();
            self.shift_viewport(dropped);
        }
        if follow {
            self.viewport_y = self.base_y();
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let line = self.cursor_line();
        let col = self.cursor.col() as usize;
        match mode {
            1 => self.buffer.erase(line, 0, col + 1),
            2 => self.buffer.erase(line, 0, usize::MAX),
            _ => self.buffer.erase(line, col, usize::MAX),
        }
    }

    fn erase_in_display(&mut self, mode: u16) {
        let base = self.base_y();
        let cursor_line = self.cursor_line();
        let end = self.buffer.len();
        match mode {
            1 => {
                for line in base..cursor_line {
                    self.buffer.erase(line, 0, usize::MAX);
                }
                self.erase_in_line(1);
            }
            2 => {
                for line in base..end {
                    self.buffer.erase(line, 0, usize::MAX);
                }
            }
            3 => {
                debug!("Clearing {} lines of scrollback", base);
                self.buffer.drop_front(base);
                self.viewport_y = 0;
            }
            _ => {
                self.erase_in_line(0);
                for line in cursor_line + 1..end {
                    self.buffer.erase(line, 0, usize::MAX);
                }
            }
        }
    }

    /// Apply a new grid size without reflowing content
    fn resize(&mut self, size: Size) {
        let follow = self.follows_tail();
        let cursor_line = self.cursor_line();
        let rows = size.rows as usize;

        self.size = size;
        // Shrinking drops blank lines under the cursor before pushing
        // content into scrollback.
        self.buffer.trim_trailing_blank(rows.max(cursor_line + 1));
        self.buffer.ensure_len(rows);
        let dropped = self.buffer.set_max_lines(rows + self.scrollback);
        self.shift_viewport(dropped);

        let base = self.base_y();
        let row = cursor_line.saturating_sub(dropped).saturating_sub(base);
        self.cursor.set_row(row.min(u16::MAX as usize) as u16);
        self.cursor.clamp(size);
        self.viewport_y = if follow { base } else { self.viewport_y.min(base) };
    }
}

fn param(params: &Params, index: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first().copied())
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

impl Perform for Screen {
    fn print(&mut self, c: char) {
        if self.cursor.col() >= self.size.cols {
            self.cursor.set_col(0);
            self.line_feed();
        }
        let line = self.cursor_line();
        self.buffer.put(line, self.cursor.col() as usize, c);
        self.cursor.move_right(1);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | 0x0b | 0x0c => self.line_feed(),
            b'\r' => self.cursor.set_col(0),
            0x08 => self.cursor.move_left(1),
            b'\t' => {
                let next = (self.cursor.col() / 8 + 1) * 8;
                self.cursor.set_col(next.min(self.size.cols.saturating_sub(1)));
            }
            _ => trace!("Ignoring control byte {:#04x}", byte),
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'A' => self.cursor.move_up(param(params, 0, 1)),
            'B' => self.cursor.move_down(param(params, 0, 1)),
            'C' => self.cursor.move_right(param(params, 0, 1)),
            'D' => self.cursor.move_left(param(params, 0, 1)),
            'H' | 'f' => {
                let row = param(params, 0, 1) - 1;
                let col = param(params, 1, 1) - 1;
                self.cursor.set(col, row);
            }
            'J' => self.erase_in_display(params.iter().next().and_then(|p| p.first().copied()).unwrap_or(0)),
            'K' => self.erase_in_line(params.iter().next().and_then(|p| p.first().copied()).unwrap_or(0)),
            's' => self.cursor.save(),
            'u' => self.cursor.restore(),
            _ => trace!("Ignoring CSI {}", action),
        }
        self.cursor.clamp(self.size);
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'7' => self.cursor.save(),
            b'8' => self.cursor.restore(),
            _ => trace!("Ignoring ESC {}", byte as char),
        }
    }
}

/// A [`TerminalWidget`] that keeps its grid in memory.
///
/// `fit` measures the attached surface (if any) in [`CellMetrics`] units.
/// Rows touched by `refresh` accumulate until [`HeadlessTerminal::take_dirty`].
pub struct HeadlessTerminal {
    parser: vte::Parser,
    screen: Screen,
    surface: Option<Arc<dyn RenderSurface>>,
    cell: CellMetrics,
    dirty: Option<(u16, u16)>,
}

impl HeadlessTerminal {
    pub fn new(size: Size) -> Self {
        Self::with_scrollback(size, DEFAULT_SCROLLBACK)
    }

    pub fn with_scrollback(size: Size, scrollback: usize) -> Self {
        Self {
            parser: vte::Parser::new(),
            screen: Screen::new(size, scrollback),
            surface: None,
            cell: CellMetrics::default(),
            dirty: None,
        }
    }

    /// Measure `surface` on every fit
    pub fn attach(mut self, surface: Arc<dyn RenderSurface>, cell: CellMetrics) -> Self {
        self.surface = Some(surface);
        self.cell = cell;
        self
    }

    /// Apply a grid size directly
    pub fn resize(&mut self, size: Size) {
        if size != self.screen.size {
            debug!("Resizing grid {:?} -> {:?}", self.screen.size, size);
            self.screen.resize(size);
            self.mark_dirty(0, size.rows.saturating_sub(1));
        }
    }

    /// Lines currently inside the viewport
    pub fn visible_lines(&self) -> Vec<String> {
        let start = self.screen.viewport_y;
        let end = (start + self.screen.size.rows as usize).min(self.screen.buffer.len());
        (start..end).filter_map(|i| self.screen.buffer.text(i)).collect()
    }

    /// Rows that need repainting since the last call
    pub fn take_dirty(&mut self) -> Option<(u16, u16)> {
        self.dirty.take()
    }

    fn mark_dirty(&mut self, start: u16, end: u16) {
        self.dirty = Some(match self.dirty {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
    }

    fn measure(&self, surface: &dyn RenderSurface) -> Result<Size, LayoutError> {
        if !surface.is_attached() {
            return Err(LayoutError::Detached);
        }
        if self.cell.width <= 0.0 || self.cell.height <= 0.0 {
            return Err(LayoutError::Dimensions("cell metrics unavailable".to_string()));
        }
        let bbox = surface.bounding_box();
        let cols = (bbox.width / self.cell.width).floor();
        let rows = (bbox.height / self.cell.height).floor();
        if !(cols >= 1.0 && rows >= 1.0) {
            return Err(LayoutError::Dimensions(format!(
                "{}x{} surface holds no cells",
                bbox.width, bbox.height
            )));
        }
        let max = u16::MAX as f64;
        Ok(Size::new(cols.min(max) as u16, rows.min(max) as u16))
    }
}

impl TerminalWidget for HeadlessTerminal {
    fn size(&self) -> Size {
        self.screen.size
    }

    fn metrics(&self) -> Option<BufferMetrics> {
        Some(BufferMetrics {
            viewport_y: self.screen.viewport_y,
            base_y: self.screen.base_y(),
            cursor_x: self.screen.cursor.col(),
            cursor_y: self.screen.cursor.row(),
            total_lines: self.screen.buffer.len(),
            cols: self.screen.size.cols,
            rows: self.screen.size.rows,
        })
    }

    fn line(&self, index: usize) -> Option<String> {
        self.screen.buffer.text(index)
    }

    fn write(&mut self, data: &[u8]) {
        for byte in data {
            self.parser.advance(&mut self.screen, *byte);
        }
        self.mark_dirty(0, self.screen.size.rows.saturating_sub(1));
    }

    fn fit(&mut self) -> Result<Size, LayoutError> {
        let Some(surface) = self.surface.clone() else {
            return Ok(self.screen.size);
        };
        let size = self.measure(surface.as_ref())?;
        self.resize(size);
        Ok(size)
    }

    fn refresh(&mut self, start: u16, end: u16) {
        self.mark_dirty(start, end);
    }

    fn scroll_lines(&mut self, delta: i64) {
        let base = self.screen.base_y() as i64;
        let target = (self.screen.viewport_y as i64 + delta).clamp(0, base);
        self.screen.viewport_y = target as usize;
        self.mark_dirty(0, self.screen.size.rows.saturating_sub(1));
    }

    fn scroll_to_bottom(&mut self) {
        self.screen.viewport_y = self.screen.base_y();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::types::{Rect, SurfaceStyle};

    struct Pane {
        rect: Rect,
        attached: bool,
    }

    impl RenderSurface for Pane {
        fn is_attached(&self) -> bool {
            self.attached
        }

        fn bounding_box(&self) -> Rect {
            self.rect
        }

        fn computed_style(&self) -> SurfaceStyle {
            SurfaceStyle::default()
        }
    }

    fn lines(term: &HeadlessTerminal, count: usize) -> Vec<String> {
        (0..count).filter_map(|i| term.line(i)).collect()
    }

    #[test]
    fn test_print_and_newlines() {
        let mut term = HeadlessTerminal::new(Size::new(20, 4));
        term.write(b"hello\r\nworld");
        assert_eq!(lines(&term, 2), vec!["hello", "world"]);
        let metrics = term.metrics().unwrap();
        assert_eq!((metrics.cursor_x, metrics.cursor_y), (5, 1));
        assert_eq!(metrics.total_lines, 4);
    }

    #[test]
    fn test_output_scrolls_into_scrollback() {
        let mut term = HeadlessTerminal::new(Size::new(20, 3));
        for i in 0..10 {
            term.write(format!("line {i}\r\n").as_bytes());
        }
        let metrics = term.metrics().unwrap();
        assert_eq!(metrics.total_lines, 11);
        assert_eq!(metrics.base_y, 8);
        assert!(metrics.is_at_bottom());
        assert_eq!(term.visible_lines(), vec!["line 8", "line 9", ""]);
    }

    #[test]
    fn test_scrolled_viewport_stays_put() {
        let mut term = HeadlessTerminal::new(Size::new(20, 3));
        for i in 0..10 {
            term.write(format!("line {i}\r\n").as_bytes());
        }
        term.scroll_lines(-4);
        assert_eq!(term.metrics().unwrap().viewport_y, 4);

        term.write(b"more\r\n");
        let metrics = term.metrics().unwrap();
        assert_eq!(metrics.viewport_y, 4);
        assert!(!metrics.is_at_bottom());

        term.scroll_to_bottom();
        assert!(term.metrics().unwrap().is_at_bottom());
    }

    #[test]
    fn test_erase_sequences() {
        let mut term = HeadlessTerminal::new(Size::new(20, 3));
        term.write(b"abcdef\x1b[3D\x1b[K");
        assert_eq!(term.line(0).unwrap(), "abc");

        term.write(b"\r\nxyz\x1b[2J");
        assert_eq!(lines(&term, 3), vec!["", "", ""]);
    }

    #[test]
    fn test_clear_scrollback_collapses_buffer() {
        let mut term = HeadlessTerminal::new(Size::new(20, 3));
        for i in 0..10 {
            term.write(format!("line {i}\r\n").as_bytes());
        }
        term.write(b"\x1b[3J");
        let metrics = term.metrics().unwrap();
        assert_eq!(metrics.total_lines, 3);
        assert_eq!(metrics.viewport_y, 0);
    }

    #[test]
    fn test_wraps_at_right_margin() {
        let mut term = HeadlessTerminal::new(Size::new(4, 3));
        term.write(b"abcdef");
        assert_eq!(lines(&term, 2), vec!["abcd", "ef"]);
    }

    #[test]
    fn test_fit_measures_surface() {
        let pane = Arc::new(Pane {
            rect: Rect::from_size(900.0, 340.0),
            attached: true,
        });
        let mut term =
            HeadlessTerminal::new(Size::new(80, 24)).attach(pane, CellMetrics::new(9.0, 17.0));
        assert_eq!(term.fit().unwrap(), Size::new(100, 20));
        assert_eq!(term.size(), Size::new(100, 20));
        assert!(term.take_dirty().is_some());
        assert!(term.take_dirty().is_none());
    }

    #[test]
    fn test_fit_errors() {
        let detached = Arc::new(Pane {
            rect: Rect::from_size(900.0, 340.0),
            attached: false,
        });
        let mut term = HeadlessTerminal::new(Size::new(80, 24)).attach(detached, CellMetrics::default());
        assert_eq!(term.fit(), Err(LayoutError::Detached));

        let empty = Arc::new(Pane {
            rect: Rect::default(),
            attached: true,
        });
        let mut term = HeadlessTerminal::new(Size::new(80, 24)).attach(empty, CellMetrics::default());
        assert!(matches!(term.fit(), Err(LayoutError::Dimensions(_))));
        assert_eq!(term.size(), Size::new(80, 24));
    }

    #[test]
    fn test_shrink_keeps_content_above_cursor() {
        let mut term = HeadlessTerminal::new(Size::new(20, 10));
        term.write(b"one\r\ntwo\r\nthree");
        term.resize(Size::new(20, 2));
        let metrics = term.metrics().unwrap();
        // blank rows under the cursor go first
        assert_eq!(metrics.total_lines, 3);
        assert_eq!(metrics.base_y, 1);
        assert_eq!(metrics.cursor_y, 1);
        assert_eq!(term.visible_lines(), vec!["two", "three"]);
    }
}
