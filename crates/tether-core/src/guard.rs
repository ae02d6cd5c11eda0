//! Readiness checks for the render surface.
//!
//! A widget's fit/layout operation fails against an element with zero
//! dimensions, and a failed layout can leave the terminal without its content.
//! Every layout-affecting call site checks readiness first.

use std::time::Duration;
use tether_common::{
    traits::RenderSurface,
    types::SurfaceIssues,
};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::retry::Backoff;

#[derive(Debug, Clone, Copy)]
pub struct RenderSurfaceGuard {
    poll: Backoff,
}

impl RenderSurfaceGuard {
    pub fn new(poll: Backoff) -> Self {
        Self { poll }
    }

    /// Every condition that currently prevents layout
    pub fn inspect(&self, surface: &dyn RenderSurface) -> SurfaceIssues {
        let mut issues = SurfaceIssues::empty();
        if !surface.is_attached() {
            // Detached elements report stale geometry; nothing else is meaningful.
            return SurfaceIssues::DETACHED;
        }
        if !surface.bounding_box().has_area() {
            issues |= SurfaceIssues::ZERO_SIZE;
        }
        let style = surface.computed_style();
        if style.display_none {
            issues |= SurfaceIssues::DISPLAY_NONE;
        }
        if style.visibility_hidden {
            issues |= SurfaceIssues::VISIBILITY_HIDDEN;
        }
        issues
    }

    /// Synchronous readiness check
    pub fn is_ready(&self, surface: &dyn RenderSurface) -> bool {
        let issues = self.inspect(surface);
        if !issues.is_empty() {
            trace!("Surface not ready: {:?}", issues);
        }
        issues.is_empty()
    }

    /// Poll `is_ready` with increasing intervals until it passes or `timeout`
    /// elapses. `false` means "try again later", never a fatal condition.
    pub async fn wait_until_ready(&self, surface: &dyn RenderSurface, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;
        loop {
            if self.is_ready(surface) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "Surface still not ready after {:?}: {:?}",
                    timeout,
                    self.inspect(surface)
                );
                return false;
            }
            let wait = self.poll.delay(attempt).min(deadline - now);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RenderSurfaceGuard {
    fn default() -> Self {
        Self::new(Backoff::new(
            Duration::from_millis(10),
            Duration::from_millis(200),
        ))
    }
}
