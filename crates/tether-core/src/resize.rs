//! Debounced resize handling: guard, snapshot, fit, propagate, restore.

use std::sync::Arc;
use std::time::Duration;
use tether_common::{
    error::LayoutError,
    traits::RenderSurface,
    types::{BufferSnapshot, ResizeRequest, Size},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ResizeConfig;
use crate::continuity::BufferContinuityManager;
use crate::events::{Event, EventBus};
use crate::guard::RenderSurfaceGuard;
use crate::retry::{retry, RetryError};
use crate::transport::TransportHandle;
use crate::SharedWidget;

/// Which observer reported a size change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSource {
    Container,
    /// Some host layouts resize the parent without notifying the child
    Parent,
    /// Requested by the broker itself (initial layout)
    Initial,
}

#[derive(Debug, Clone, Copy)]
struct Notification {
    source: ResizeSource,
    size: Size,
}

/// Cloneable handle observers use to report raw size changes
#[derive(Clone)]
pub struct ResizeNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ResizeNotifier {
    /// Report a raw size change. Returns `false` once the coordinator is gone.
    pub fn notify(&self, source: ResizeSource, size: Size) -> bool {
        trace!("Raw resize from {:?}: {:?}", source, size);
        self.tx.send(Notification { source, size }).is_ok()
    }
}

/// Wait for a burst of values and return the last one once `window` passes
/// without a new value. `None` when the sender side is gone or on cancel.
pub async fn coalesce<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    window: Duration,
    cancel: &CancellationToken,
) -> Option<T> {
    let mut latest = tokio::select! {
        _ = cancel.cancelled() => return None,
        first = rx.recv() => first?,
    };

    let quiet = tokio::time::sleep(window);
    tokio::pin!(quiet);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = &mut quiet => return Some(latest),
            next = rx.recv() => match next {
                Some(value) => {
                    latest = value;
                    quiet.as_mut().reset(Instant::now() + window);
                }
                // Senders are gone; act on what already arrived.
                None => return Some(latest),
            },
        }
    }
}

/// Result of one coalesced resize cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Fit succeeded and the new size was handed to the transport
    Applied { request: ResizeRequest, restored: bool },
    /// The surface never became measurable within the readiness budget
    SurfaceNotReady,
    /// The widget's fit failed; nothing changed
    LayoutFailed(LayoutError),
    /// Fit produced a zero dimension
    Degenerate(Size),
    Cancelled,
}

pub struct ResizeCoordinator {
    config: ResizeConfig,
    guard: RenderSurfaceGuard,
    continuity: BufferContinuityManager,
    surface: Arc<dyn RenderSurface>,
    widget: SharedWidget,
    transport: Option<TransportHandle>,
    bus: EventBus,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl ResizeCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ResizeConfig,
        guard: RenderSurfaceGuard,
        continuity: BufferContinuityManager,
        surface: Arc<dyn RenderSurface>,
        widget: SharedWidget,
        transport: Option<TransportHandle>,
        bus: EventBus,
    ) -> (Self, ResizeNotifier) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            config,
            guard,
            continuity,
            surface,
            widget,
            transport,
            bus,
            rx,
        };
        (coordinator, ResizeNotifier { tx })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Process coalesced notifications until cancelled or every notifier is dropped
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("Resize coordinator started");
        let window = self.config.debounce();
        loop {
            let Some(latest) = coalesce(&mut self.rx, window, &cancel).await else {
                break;
            };
            debug!("Coalesced resize from {:?}: {:?}", latest.source, latest.size);

            match self.run_cycle(latest.size, &cancel).await {
                CycleOutcome::Applied { request, restored } => {
                    debug!("Resize applied: {:?} (restored: {})", request, restored);
                }
                CycleOutcome::Cancelled => break,
                other => debug!("Resize cycle skipped: {:?}", other),
            }
        }
        debug!("Resize coordinator stopped");
    }

    /// One guard → snapshot → fit → propagate → restore pass.
    ///
    /// `reported` is the size the observers last saw. The fit measures the
    /// surface itself and its result is what gets propagated.
    #[instrument(skip(self, cancel))]
    pub async fn run_cycle(&self, reported: Size, cancel: &CancellationToken) -> CycleOutcome {
        let policy = self.config.readiness_policy();
        let ready = retry(&policy, cancel, |_| {
            let issues = self.guard.inspect(self.surface.as_ref());
            std::future::ready(if issues.is_empty() {
                Ok(())
            } else {
                Err(format!("{:?}", issues))
            })
        })
        .await;
        match ready {
            Ok(()) => {}
            Err(RetryError::Cancelled) => return CycleOutcome::Cancelled,
            Err(RetryError::Exhausted { attempts, last }) => {
                debug!("Surface not ready after {} checks ({}), skipping", attempts, last);
                return CycleOutcome::SurfaceNotReady;
            }
        }

        let (snapshot, fitted) = {
            let mut widget = self.widget.lock().await;
            let snapshot = self.continuity.snapshot(&*widget);
            (snapshot, widget.fit())
        };

        let size = match fitted {
            Ok(size) => size,
            Err(err) => {
                warn!(cause = err.classification(), "Fit failed, skipping cycle: {}", err);
                return CycleOutcome::LayoutFailed(err);
            }
        };
        if size != reported {
            debug!("Fit measured {:?}, observers reported {:?}", size, reported);
        }
        if !size.is_positive() {
            debug!("Fit produced {:?}, not propagating", size);
            return CycleOutcome::Degenerate(size);
        }

        let request = ResizeRequest::from(size);
        if let Some(transport) = &self.transport {
            transport.send_resize(request);
        }
        self.bus.publish(Event::Resized(request));

        let restored = match snapshot {
            Some(snapshot) => match self.settle_and_restore(&snapshot, cancel).await {
                Some(restored) => restored,
                None => return CycleOutcome::Cancelled,
            },
            None => false,
        };

        CycleOutcome::Applied { request, restored }
    }

    /// `None` when cancelled while settling
    async fn settle_and_restore(
        &self,
        snapshot: &BufferSnapshot,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(self.config.settle()) => {}
        }

        let mut widget = self.widget.lock().await;
        if !self.continuity.needs_restoration(&*widget, snapshot) {
            return Some(false);
        }
        info!("Resize discarded visible content, restoring");
        let restored = self.continuity.restore(&mut *widget, snapshot);
        if !restored {
            warn!("Buffer restoration failed; screen may be incomplete");
        }
        Some(restored)
    }
}
