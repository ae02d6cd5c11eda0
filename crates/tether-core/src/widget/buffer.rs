use std::collections::VecDeque;

/// Scrollback plus screen lines of the headless terminal.
///
/// Index 0 is the oldest retained line; the last `rows` lines are the live
/// screen. Lines are stored as cells so writes can land at any column.
pub struct LineBuffer {
    lines: VecDeque<Vec<char>>,
    max_lines: usize,
}

impl LineBuffer {
    /// Create a buffer holding `rows` blank lines and at most `max_lines` lines
    pub fn new(rows: usize, max_lines: usize) -> Self {
        let max_lines = max_lines.max(rows).max(1);
        let mut buffer = Self {
            lines: VecDeque::with_capacity(max_lines.min(100_000)),
            max_lines,
        };
        buffer.ensure_len(rows);
        buffer
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Text of a line with trailing blanks removed
    pub fn text(&self, index: usize) -> Option<String> {
        self.lines.get(index).map(|cells| {
            let text: String = cells.iter().collect();
            text.trim_end().to_string()
        })
    }

    /// Put `c` at `col` of line `index`, padding with blanks as needed
    pub fn put(&mut self, index: usize, col: usize, c: char) {
        if let Some(line) = self.lines.get_mut(index) {
            if line.len() <= col {
                line.resize(col + 1, ' ');
            }
            line[col] = c;
        }
    }

    /// Blank the cells of line `index` in `from..to` (clamped to the line)
    pub fn erase(&mut self, index: usize, from: usize, to: usize) {
        if let Some(line) = self.lines.get_mut(index) {
            let to = to.min(line.len());
            if from < to {
                line[from..to].fill(' ');
            }
        }
    }

    /// Append a blank line. Returns how many old lines were dropped to make room.
    pub fn push_blank(&mut self) -> usize {
        self.lines.push_back(Vec::new());
        self.enforce_limit()
    }

    /// Append blank lines until the buffer holds at least `len` lines
    pub fn ensure_len(&mut self, len: usize) {
        while self.lines.len() < len {
            self.lines.push_back(Vec::new());
        }
    }

    /// Remove blank lines from the end while more than `keep` lines remain
    pub fn trim_trailing_blank(&mut self, keep: usize) -> usize {
        let mut removed = 0;
        while self.lines.len() > keep
            && self
                .lines
                .back()
                .is_some_and(|line| line.iter().all(|c| *c == ' '))
        {
            self.lines.pop_back();
            removed += 1;
        }
        removed
    }

    /// Drop the `count` oldest lines
    pub fn drop_front(&mut self, count: usize) {
        let count = count.min(self.lines.len());
        self.lines.drain(..count);
    }

    /// Change the retention limit. Returns how many old lines were dropped.
    pub fn set_max_lines(&mut self, max_lines: usize) -> usize {
        self.max_lines = max_lines.max(1);
        self.enforce_limit()
    }

    fn enforce_limit(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.max_lines);
        self.drop_front(excess);
        excess
    }
}
