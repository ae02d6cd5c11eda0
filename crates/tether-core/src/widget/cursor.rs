use tether_common::types::Size;

/// Cursor position relative to the top of the live screen
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    col: u16,
    row: u16,
    saved: Option<(u16, u16)>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn col(&self) -> u16 {
        self.col
    }

    pub fn row(&self) -> u16 {
        self.row
    }

    pub fn set(&mut self, col: u16, row: u16) {
        self.col = col;
        self.row = row;
    }

    pub fn set_col(&mut self, col: u16) {
        self.col = col;
    }

    pub fn set_row(&mut self, row: u16) {
        self.row = row;
    }

    pub fn move_up(&mut self, n: u16) {
        self.row = self.row.saturating_sub(n);
    }

    pub fn move_down(&mut self, n: u16) {
        self.row = self.row.saturating_add(n);
    }

    pub fn move_left(&mut self, n: u16) {
        self.col = self.col.saturating_sub(n);
    }

    pub fn move_right(&mut self, n: u16) {
        self.col = self.col.saturating_add(n);
    }

    pub fn save(&mut self) {
        self.saved = Some((self.col, self.row));
    }

    pub fn restore(&mut self) {
        if let Some((col, row)) = self.saved {
            self.col = col;
            self.row = row;
        }
    }

    /// Keep the cursor inside a grid of `size`
    pub fn clamp(&mut self, size: Size) {
        self.col = self.col.min(size.cols.saturating_sub(1));
        self.row = self.row.min(size.rows.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_movement() {
        let mut cursor = Cursor::new();
        cursor.move_right(5);
        cursor.move_down(3);
        cursor.move_left(2);
        cursor.move_up(1);
        assert_eq!((cursor.col(), cursor.row()), (3, 2));

        cursor.move_left(10);
        cursor.move_up(10);
        assert_eq!((cursor.col(), cursor.row()), (0, 0));
    }

    #[test]
    fn test_save_restore_and_clamp() {
        let mut cursor = Cursor::new();
        cursor.set(50, 30);
        cursor.save();
        cursor.set(1, 1);
        cursor.restore();
        assert_eq!((cursor.col(), cursor.row()), (50, 30));

        cursor.clamp(Size::new(40, 24));
        assert_eq!((cursor.col(), cursor.row()), (39, 23));
    }
}
