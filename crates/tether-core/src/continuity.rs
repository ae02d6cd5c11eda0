//! Keeps visible content alive across resize-triggered fits.

use std::collections::HashMap;
use tether_common::{
    traits::TerminalWidget,
    types::{BufferMetrics, BufferSnapshot},
};
use tracing::{debug, info, warn};

use crate::config::ContinuityConfig;

#[derive(Debug, Clone, Default)]
pub struct BufferContinuityManager {
    config: ContinuityConfig,
}

impl BufferContinuityManager {
    pub fn new(config: ContinuityConfig) -> Self {
        Self { config }
    }

    /// Capture the visible region (plus the configured margin above it).
    ///
    /// Returns `None` when the widget has no active buffer.
    pub fn snapshot(&self, widget: &dyn TerminalWidget) -> Option<BufferSnapshot> {
        let metrics = widget.metrics()?;
        let start = metrics.viewport_y.saturating_sub(self.config.margin);
        let end = (metrics.viewport_y + metrics.rows as usize).min(metrics.total_lines);
        let content_lines: Vec<String> = (start..end).filter_map(|i| widget.line(i)).collect();
        let has_content = content_lines.iter().any(|line| !line.trim().is_empty());

        debug!(
            "Snapshot: {} lines captured, viewport {} base {} total {}",
            content_lines.len(),
            metrics.viewport_y,
            metrics.base_y,
            metrics.total_lines
        );

        Some(BufferSnapshot {
            viewport_y: metrics.viewport_y,
            base_y: metrics.base_y,
            cursor_x: metrics.cursor_x,
            cursor_y: metrics.cursor_y,
            total_lines: metrics.total_lines,
            has_content,
            content_lines,
        })
    }

    /// Whether the fit most likely discarded visible content
    pub fn needs_restoration(&self, widget: &dyn TerminalWidget, snapshot: &BufferSnapshot) -> bool {
        match widget.metrics() {
            Some(current) => self.diverged(&current, snapshot),
            // The buffer vanished entirely.
            None => snapshot.has_content,
        }
    }

    fn diverged(&self, current: &BufferMetrics, snapshot: &BufferSnapshot) -> bool {
        let line_delta = current.total_lines.abs_diff(snapshot.total_lines);
        let viewport_delta = current.viewport_y.abs_diff(snapshot.viewport_y);
        let collapsed = snapshot.has_content && current.total_lines < self.config.min_lines;

        line_delta > self.config.max_line_delta
            || viewport_delta > self.config.max_viewport_delta
            || collapsed
    }

    fn shrank(&self, current: &BufferMetrics, snapshot: &BufferSnapshot) -> bool {
        snapshot.has_content
            && (current.total_lines < self.config.min_lines
                || snapshot.total_lines.saturating_sub(current.total_lines)
                    > self.config.max_line_delta)
    }

    /// Index of the first non-blank captured line the buffer no longer holds.
    ///
    /// Lines are matched by content, counting repeats, so a fit that only
    /// trimmed blank rows reports nothing missing.
    fn first_missing(
        widget: &dyn TerminalWidget,
        current: &BufferMetrics,
        snapshot: &BufferSnapshot,
    ) -> Option<usize> {
        let mut present: HashMap<String, usize> = HashMap::new();
        for line in (0..current.total_lines).filter_map(|i| widget.line(i)) {
            if !line.trim().is_empty() {
                *present.entry(line).or_default() += 1;
            }
        }
        snapshot.content_lines.iter().position(|line| {
            if line.trim().is_empty() {
                return false;
            }
            match present.get_mut(line) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            }
        })
    }

    /// Best-effort recovery after a lossy fit.
    ///
    /// Replays captured lines the buffer lost, forces a redraw of the visible
    /// rows, then re-aligns the viewport. Returns `false` when the widget has
    /// no buffer to restore into.
    pub fn restore(&self, widget: &mut dyn TerminalWidget, snapshot: &BufferSnapshot) -> bool {
        let Some(before) = widget.metrics() else {
            warn!("No active buffer, skipping restoration");
            return false;
        };

        let missing = if self.shrank(&before, snapshot) {
            Self::first_missing(&*widget, &before, snapshot)
        } else {
            None
        };
        match missing {
            Some(first) => {
                let keep = snapshot
                    .content_lines
                    .iter()
                    .rposition(|line| !line.trim().is_empty())
                    .map_or(first, |last| last + 1);
                let lines = &snapshot.content_lines[first..keep];
                let mut replay = String::new();
                if before.cursor_x != 0 {
                    replay.push_str("\r\n");
                }
                replay.push_str(&lines.join("\r\n"));
                info!(
                    "Restoring {} lines lost by resize ({} -> {} total)",
                    lines.len(),
                    snapshot.total_lines,
                    before.total_lines
                );
                widget.write(replay.as_bytes());
            }
            None if before.total_lines != snapshot.total_lines => {
                debug!("Buffer shrank without losing content, redrawing only");
            }
            None => {}
        }

        let Some(after) = widget.metrics() else {
            warn!("Buffer disappeared during restoration");
            return false;
        };
        widget.refresh(0, after.rows.saturating_sub(1));

        if snapshot.was_at_bottom() {
            widget.scroll_to_bottom();
        } else {
            let delta = snapshot.viewport_y as i64 - after.viewport_y as i64;
            if delta != 0 {
                debug!("Re-aligning viewport by {} lines", delta);
                widget.scroll_lines(delta);
            }
        }
        true
    }
}
