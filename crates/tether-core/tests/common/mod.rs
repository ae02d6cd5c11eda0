//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_common::{
    error::{LayoutError, Result, TetherError},
    traits::{RenderSurface, SessionApi, TerminalWidget},
    types::{BufferMetrics, ConnectionState, Rect, SessionId, Size, SurfaceStyle},
};
use tether_core::events::{Event, Subscription};
use tether_core::transport::{ChannelConnector, ChannelLink};
use tether_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Surface whose readiness the test flips at will. Geometry is in cells.
pub struct FakeSurface {
    ready: AtomicBool,
    size: Size,
}

impl FakeSurface {
    pub fn ready(size: Size) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            size,
        })
    }

    pub fn hidden(size: Size) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            size,
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl RenderSurface for FakeSurface {
    fn is_attached(&self) -> bool {
        true
    }

    fn bounding_box(&self) -> Rect {
        if self.ready.load(Ordering::SeqCst) {
            Rect::from_size(self.size.cols as f64, self.size.rows as f64)
        } else {
            Rect::default()
        }
    }

    fn computed_style(&self) -> SurfaceStyle {
        SurfaceStyle::default()
    }
}

/// Line-list widget that records every fit
pub struct FakeWidget {
    pub lines: Vec<String>,
    pub size: Size,
    pub viewport_y: usize,
    pub fit_size: Size,
    /// Imitate a fit that throws away the buffer
    pub lossy_fit: bool,
    pub fits: Vec<Instant>,
}

impl FakeWidget {
    pub fn new(size: Size) -> Self {
        Self {
            lines: vec![String::new(); size.rows as usize],
            size,
            viewport_y: 0,
            fit_size: size,
            lossy_fit: false,
            fits: Vec::new(),
        }
    }

    pub fn with_content(size: Size, count: usize) -> Self {
        let mut widget = Self::new(size);
        widget.lines = (0..count).map(|i| format!("line {i}")).collect();
        widget.viewport_y = widget.base_y();
        widget
    }

    fn base_y(&self) -> usize {
        self.lines.len().saturating_sub(self.size.rows as usize)
    }
}

impl TerminalWidget for FakeWidget {
    fn size(&self) -> Size {
        self.size
    }

    fn metrics(&self) -> Option<BufferMetrics> {
        Some(BufferMetrics {
            viewport_y: self.viewport_y,
            base_y: self.base_y(),
            cursor_x: 0,
            cursor_y: 0,
            total_lines: self.lines.len(),
            cols: self.size.cols,
            rows: self.size.rows,
        })
    }

    fn line(&self, index: usize) -> Option<String> {
        self.lines.get(index).cloned()
    }

    fn write(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        self.lines.extend(text.split("\r\n").map(str::to_string));
        self.viewport_y = self.base_y();
    }

    fn fit(&mut self) -> std::result::Result<Size, LayoutError> {
        self.fits.push(Instant::now());
        self.size = self.fit_size;
        if self.lossy_fit {
            self.lines.truncate(2);
            self.viewport_y = 0;
        }
        Ok(self.size)
    }

    fn refresh(&mut self, _start: u16, _end: u16) {}

    fn scroll_lines(&mut self, delta: i64) {
        let target = (self.viewport_y as i64 + delta).clamp(0, self.base_y() as i64);
        self.viewport_y = target as usize;
    }

    fn scroll_to_bottom(&mut self) {
        self.viewport_y = self.base_y();
    }
}

#[derive(Clone, Copy)]
pub enum ApiMode {
    Succeed,
    Fail,
    Hang,
}

/// Session API that fails a fixed number of times, then behaves per `mode`
pub struct FakeApi {
    mode: ApiMode,
    failures_left: AtomicU32,
    id: String,
    pub creates: AtomicUsize,
    pub deleted: Mutex<Vec<SessionId>>,
}

impl FakeApi {
    pub fn new(mode: ApiMode) -> Arc<Self> {
        Self::flaky(mode, 0)
    }

    pub fn flaky(mode: ApiMode, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            mode,
            failures_left: AtomicU32::new(failures),
            id: "abc123".to_string(),
            creates: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        })
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<SessionId> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn create_session(&self, _size: Size) -> Result<SessionId> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let flaky = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(TetherError::Acquisition("503".to_string()));
        }
        match self.mode {
            ApiMode::Succeed => Ok(SessionId::new(self.id.clone())),
            ApiMode::Fail => Err(TetherError::Acquisition("connection refused".to_string())),
            ApiMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TetherError::Timeout)
            }
        }
    }

    async fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.deleted.lock().unwrap().push(id.clone());
        Ok(())
    }
}

struct Remote {
    to_client: mpsc::UnboundedSender<ServerMessage>,
    close: CancellationToken,
}

/// In-memory backend: acknowledges joins and records every client message
pub struct ScriptedConnector {
    refuse: AtomicBool,
    ack_joins: AtomicBool,
    connects: AtomicU32,
    log: Arc<Mutex<Vec<ClientMessage>>>,
    remotes: Mutex<Vec<Remote>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refuse: AtomicBool::new(false),
            ack_joins: AtomicBool::new(true),
            connects: AtomicU32::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
            remotes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_ack_joins(&self, ack: bool) {
        self.ack_joins.store(ack, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<ClientMessage> {
        self.log.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.log()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Resize { cols, rows, .. } => Some((cols, rows)),
                _ => None,
            })
            .collect()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Input { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Deliver a frame on the newest connection
    pub fn push(&self, message: ServerMessage) {
        if let Some(remote) = self.remotes.lock().unwrap().last() {
            let _ = remote.to_client.send(message);
        }
    }

    /// Close the newest connection from the server side
    pub fn drop_connection(&self) {
        if let Some(remote) = self.remotes.lock().unwrap().pop() {
            remote.close.cancel();
        }
    }
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn connect(&self) -> Result<ChannelLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TetherError::Transport("connection refused".to_string()));
        }

        let (link, mut remote) = ChannelLink::pair();
        let close = CancellationToken::new();
        self.remotes.lock().unwrap().push(Remote {
            to_client: remote.outbound.clone(),
            close: close.clone(),
        });

        let log = self.log.clone();
        let ack = self.ack_joins.load(Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = close.cancelled() => break,
                    message = remote.inbound.recv() => message,
                };
                let Some(message) = message else { break };
                log.lock().unwrap().push(message.clone());
                if let ClientMessage::Create { id } = message {
                    if ack {
                        let _ = remote.outbound.send(ServerMessage::Created { id });
                    }
                }
            }
        });
        Ok(link)
    }
}

/// Drain everything already published
pub fn drain(subscription: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

pub fn connection_states(events: &[Event]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ConnectionChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}
