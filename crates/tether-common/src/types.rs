use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

impl Size {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Both dimensions are non-zero
    pub fn is_positive(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

/// The debounced result of one or more raw viewport notifications.
///
/// This is the only resize message that is ever sent to the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

impl ResizeRequest {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    pub fn size(&self) -> Size {
        Size::new(self.cols, self.rows)
    }
}

impl From<Size> for ResizeRequest {
    fn from(size: Size) -> Self {
        Self::new(size.cols, size.rows)
    }
}

/// Prefix that marks a session id as locally generated, with no backend behind it
pub const SIMULATED_PREFIX: &str = "simulated-";

/// Remote session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a locally-unique id for a session that has no backend
    pub fn simulated() -> Self {
        Self(format!("{}{}", SIMULATED_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_simulated(&self) -> bool {
        self.0.starts_with(SIMULATED_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session metadata, created once per mounted terminal
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub is_simulated: bool,
    pub created_at: SystemTime,
    pub last_activity: SystemTime,
}

impl Session {
    /// A session backed by the remote service
    pub fn remote(id: SessionId) -> Self {
        let now = SystemTime::now();
        Self {
            is_simulated: id.is_simulated(),
            id,
            created_at: now,
            last_activity: now,
        }
    }

    /// A local stand-in used when the backend could not be reached
    pub fn simulated() -> Self {
        let now = SystemTime::now();
        Self {
            id: SessionId::simulated(),
            is_simulated: true,
            created_at: now,
            last_activity: now,
        }
    }

    /// Record activity on the session
    pub fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }
}

/// Lifecycle of the duplex channel attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Retrying,
    Failed,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Connected)
                | (Disconnected, Retrying)
                | (Retrying, Connecting)
                | (Retrying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Failed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounding box of a render surface, in host units (usually CSS pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// The parts of a surface's computed style that decide visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceStyle {
    pub display_none: bool,
    pub visibility_hidden: bool,
}

bitflags! {
    /// Reasons a render surface is not ready for layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceIssues: u8 {
        const DETACHED          = 0b0001;
        const ZERO_SIZE         = 0b0010;
        const DISPLAY_NONE      = 0b0100;
        const VISIBILITY_HIDDEN = 0b1000;
    }
}

/// Position and extent of the widget's active buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferMetrics {
    /// First line currently displayed
    pub viewport_y: usize,
    /// First line of the live tail
    pub base_y: usize,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub total_lines: usize,
    pub cols: u16,
    pub rows: u16,
}

impl BufferMetrics {
    pub fn is_at_bottom(&self) -> bool {
        self.viewport_y == self.base_y
    }
}

/// Visible buffer content captured right before a resize-triggered fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub viewport_y: usize,
    pub base_y: usize,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub total_lines: usize,
    pub has_content: bool,
    pub content_lines: Vec<String>,
}

impl BufferSnapshot {
    pub fn was_at_bottom(&self) -> bool {
        self.viewport_y == self.base_y
    }
}

/// Whether the user has scrolled away from the live tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub is_user_scrolled: bool,
    pub last_checked_at: Option<std::time::Instant>,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            is_user_scrolled: false,
            last_checked_at: None,
        }
    }
}
