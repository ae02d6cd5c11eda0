//! Resilience layer between a terminal widget and a remote PTY session.
//!
//! [`SessionBroker`] is the entry point: it acquires a session, keeps the
//! duplex channel alive, coalesces resizes, protects visible content across
//! fits, and tracks whether the user is reading scrollback.

pub mod config;
pub mod continuity;
pub mod events;
pub mod guard;
pub mod resize;
pub mod retry;
pub mod scroll;
pub mod session;
pub mod transport;
pub mod widget;

use std::sync::Arc;
use tether_common::traits::TerminalWidget;

pub use config::TetherConfig;
pub use continuity::BufferContinuityManager;
pub use events::{Event, EventBus, Notice, Subscription};
pub use guard::RenderSurfaceGuard;
pub use resize::{ResizeCoordinator, ResizeNotifier, ResizeSource};
pub use retry::{retry, Backoff, RetryError, RetryPolicy};
pub use scroll::ScrollFollowController;
pub use session::{HttpSessionApi, SessionBroker, SessionStats};
pub use transport::{ConnectionStateCell, TransportConnection, TransportHandle};
pub use widget::{CellMetrics, HeadlessTerminal};

/// The widget is the one piece of mutable state shared across tasks
pub type SharedWidget = Arc<tokio::sync::Mutex<dyn TerminalWidget>>;

/// Wrap a widget for sharing between the broker's tasks
pub fn share_widget<W: TerminalWidget + 'static>(widget: W) -> SharedWidget {
    Arc::new(tokio::sync::Mutex::new(widget))
}
