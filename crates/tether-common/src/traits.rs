use crate::error::{LayoutError, Result};
use crate::types::{BufferMetrics, Rect, SessionId, Size, SurfaceStyle};
use async_trait::async_trait;

/// The host element a terminal widget draws into
pub trait RenderSurface: Send + Sync {
    /// Whether the element is attached to the host document
    fn is_attached(&self) -> bool;

    /// Current bounding box of the element
    fn bounding_box(&self) -> Rect;

    /// Computed visibility of the element
    fn computed_style(&self) -> SurfaceStyle;
}

/// Terminal rendering widget (emulator + renderer), consumed as a black box.
///
/// Offsets are absolute line indices into the widget's active buffer, the
/// same coordinates reported by [`BufferMetrics`].
pub trait TerminalWidget: Send {
    /// Current grid size
    fn size(&self) -> Size;

    /// Metrics of the active buffer, `None` when no buffer is active
    fn metrics(&self) -> Option<BufferMetrics>;

    /// Text of a buffer line, without trailing styling
    fn line(&self, index: usize) -> Option<String>;

    /// Feed output bytes to the emulator
    fn write(&mut self, data: &[u8]);

    /// Recompute the grid size from the surface and apply it.
    ///
    /// Fails when the surface cannot be measured or the widget's internal
    /// state is inconsistent.
    fn fit(&mut self) -> std::result::Result<Size, LayoutError>;

    /// Force a redraw of rows `start..=end` of the viewport
    fn refresh(&mut self, start: u16, end: u16);

    /// Move the viewport by `delta` lines (negative is up)
    fn scroll_lines(&mut self, delta: i64);

    /// Pin the viewport to the live tail
    fn scroll_to_bottom(&mut self);
}

/// Remote session lifecycle calls
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Ask the backend for a new process-backed session
    async fn create_session(&self, size: Size) -> Result<SessionId>;

    /// Tear the backend session down
    async fn delete_session(&self, id: &SessionId) -> Result<()>;
}
