//! Tracks whether the user scrolled away from the live tail, and decides
//! whether new output may move the viewport.
//!
//! Tracking (the periodic `observe`) and forcing (`on_output` / `follow`) are
//! separate operations: output never overrides a manual scroll position.

use std::sync::Arc;
use std::time::Duration;
use tether_common::{
    traits::TerminalWidget,
    types::{BufferMetrics, ScrollState},
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::{Event, EventBus};
use crate::SharedWidget;

#[derive(Debug)]
pub struct ScrollFollowController {
    debounce: Duration,
    state: ScrollState,
    /// Candidate value for `is_user_scrolled` and when it was first seen
    pending: Option<(bool, Instant)>,
}

impl ScrollFollowController {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: ScrollState::default(),
            pending: None,
        }
    }

    pub fn state(&self) -> ScrollState {
        self.state
    }

    pub fn is_user_scrolled(&self) -> bool {
        self.state.is_user_scrolled
    }

    /// Feed one periodic reading of the buffer position.
    ///
    /// Returns the new `is_user_scrolled` value when it flips. A flip only
    /// commits once the reading has held for the debounce window.
    pub fn observe(&mut self, metrics: &BufferMetrics, now: Instant) -> Option<bool> {
        self.state.last_checked_at = Some(now.into_std());
        let scrolled = !metrics.is_at_bottom();

        if scrolled == self.state.is_user_scrolled {
            self.pending = None;
            return None;
        }

        let since = match self.pending {
            Some((target, since)) if target == scrolled => since,
            _ => now,
        };
        if now.duration_since(since) >= self.debounce {
            self.pending = None;
            self.state.is_user_scrolled = scrolled;
            debug!(
                "User scrolled: {} (viewport {}, base {})",
                scrolled, metrics.viewport_y, metrics.base_y
            );
            Some(scrolled)
        } else {
            self.pending = Some((scrolled, since));
            None
        }
    }

    /// Called after output was written. Pins the view to the tail unless the
    /// user is reading scrollback, or has just scrolled away and the reading
    /// is still inside the debounce window. Returns whether it scrolled.
    pub fn on_output(&self, widget: &mut dyn TerminalWidget) -> bool {
        if self.state.is_user_scrolled {
            trace!("Output while scrolled back, leaving viewport alone");
            return false;
        }
        if matches!(self.pending, Some((true, _))) {
            trace!("Output while a scroll-back is settling, leaving viewport alone");
            return false;
        }
        widget.scroll_to_bottom();
        true
    }

    /// The explicit "jump to bottom" action
    pub fn follow(&mut self, widget: &mut dyn TerminalWidget) {
        self.state.is_user_scrolled = false;
        self.pending = None;
        widget.scroll_to_bottom();
    }
}

/// Poll the widget on a fixed cadence and publish committed flips
pub fn spawn_scroll_monitor(
    controller: Arc<Mutex<ScrollFollowController>>,
    widget: SharedWidget,
    interval: Duration,
    bus: EventBus,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let metrics = widget.lock().await.metrics();
            let Some(metrics) = metrics else { continue };
            let flipped = controller.lock().await.observe(&metrics, Instant::now());
            if let Some(user_scrolled) = flipped {
                bus.publish(Event::ScrollChanged { user_scrolled });
            }
        }
        debug!("Scroll monitor stopped");
    })
}
