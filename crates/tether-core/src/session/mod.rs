//! Session lifecycle: acquire on mount, wire up every component, tear down on
//! unmount.

mod http;

pub use http::HttpSessionApi;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tether_common::{
    error::{Result, TetherError},
    traits::{RenderSurface, SessionApi},
    types::{ConnectionState, Session, SessionId, Size},
};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::TetherConfig;
use crate::continuity::BufferContinuityManager;
use crate::events::{Event, EventBus, Notice, Subscription};
use crate::guard::RenderSurfaceGuard;
use crate::resize::{ResizeCoordinator, ResizeNotifier, ResizeSource};
use crate::retry::{retry, RetryError};
use crate::scroll::{spawn_scroll_monitor, ScrollFollowController};
use crate::transport::{
    ChannelConnector, ConnectionStateCell, TransportConnection, TransportHandle, WebSocketConnector,
};
use crate::SharedWidget;

/// Serializable summary of a mounted session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub id: String,
    pub simulated: bool,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub connection: ConnectionState,
}

/// Everything owned by one mount
struct Mounted {
    session: Arc<Mutex<Session>>,
    state: ConnectionStateCell,
    transport: Option<TransportHandle>,
    notifier: ResizeNotifier,
    scroll: Arc<AsyncMutex<ScrollFollowController>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Mounted {
    fn session(&self) -> Session {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Owns the session for one mounted terminal
pub struct SessionBroker {
    config: TetherConfig,
    api: Arc<dyn SessionApi>,
    connector: Arc<dyn ChannelConnector>,
    surface: Arc<dyn RenderSurface>,
    widget: SharedWidget,
    bus: EventBus,
    mounted: Option<Mounted>,
}

impl SessionBroker {
    pub fn new(
        config: TetherConfig,
        api: Arc<dyn SessionApi>,
        connector: Arc<dyn ChannelConnector>,
        surface: Arc<dyn RenderSurface>,
        widget: SharedWidget,
    ) -> Self {
        Self {
            config,
            api,
            connector,
            surface,
            widget,
            bus: EventBus::new(),
            mounted: None,
        }
    }

    /// Broker talking to the HTTP and WebSocket endpoints named in `config`
    pub fn connect(
        config: TetherConfig,
        surface: Arc<dyn RenderSurface>,
        widget: SharedWidget,
    ) -> Self {
        let api = Arc::new(HttpSessionApi::new(config.server.api_url.clone()));
        let connector = Arc::new(WebSocketConnector::new(config.server.channel_url.clone()));
        Self::new(config, api, connector, surface, widget)
    }

    /// Acquire a session and start every component.
    ///
    /// Never fails: when the backend is unreachable the broker runs on a
    /// simulated session. Calling `mount` again returns the existing session.
    #[instrument(skip(self))]
    pub async fn mount(&mut self) -> Session {
        if let Some(mounted) = &self.mounted {
            debug!("Already mounted");
            return mounted.session();
        }

        let size = self.widget.lock().await.size();
        let cancel = CancellationToken::new();
        let session = self.acquire(size, &cancel).await;
        info!(
            "Mounted session {} (simulated: {})",
            session.id, session.is_simulated
        );

        let session = Arc::new(Mutex::new(session));
        let state = ConnectionStateCell::new();
        let scroll = Arc::new(AsyncMutex::new(ScrollFollowController::new(
            self.config.scroll.debounce(),
        )));
        let mut tasks = Vec::new();

        let transport = {
            let id = session
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .id
                .clone();
            if id.is_simulated() {
                None
            } else {
                let (output_tx, output_rx) = mpsc::unbounded_channel();
                let (connection, handle, driver) = TransportConnection::new(
                    id,
                    self.connector.clone(),
                    &self.config.transport,
                    state.clone(),
                    self.bus.clone(),
                    output_tx,
                );
                tasks.push(self.spawn_writer(output_rx, scroll.clone(), session.clone(), cancel.clone()));
                tasks.push(connection.spawn(driver, cancel.clone()));
                Some(handle)
            }
        };

        tasks.push(spawn_scroll_monitor(
            scroll.clone(),
            self.widget.clone(),
            self.config.scroll.poll_interval(),
            self.bus.clone(),
            cancel.clone(),
        ));

        let guard = RenderSurfaceGuard::new(self.config.guard.poll_backoff());
        let (coordinator, notifier) = ResizeCoordinator::new(
            self.config.resize.clone(),
            guard,
            BufferContinuityManager::new(self.config.continuity.clone()),
            self.surface.clone(),
            self.widget.clone(),
            transport.clone(),
            self.bus.clone(),
        );
        tasks.push(coordinator.spawn(cancel.clone()));
        tasks.push(self.spawn_initial_fit(guard, notifier.clone(), size, cancel.clone()));

        let mounted = Mounted {
            session,
            state,
            transport,
            notifier,
            scroll,
            cancel,
            tasks,
        };
        let session = mounted.session();
        self.mounted = Some(mounted);
        self.bus.publish(Event::SessionReady(session.id.clone()));
        session
    }

    /// Create a remote session, falling back to a simulated one
    async fn acquire(&self, size: Size, cancel: &CancellationToken) -> Session {
        let policy = self.config.server.acquire_policy();
        let timeout = self.config.server.acquire_timeout();
        let api = self.api.clone();

        let created = retry(&policy, cancel, |attempt| {
            let api = api.clone();
            async move {
                debug!("Creating session (attempt {})", attempt + 1);
                match tokio::time::timeout(timeout, api.create_session(size)).await {
                    Ok(created) => created,
                    Err(_) => Err(TetherError::Timeout),
                }
            }
        })
        .await;

        match created {
            Ok(id) => Session::remote(id),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    "Session backend unavailable after {} attempts ({}), using a simulated session",
                    attempts, last
                );
                self.bus.publish(Event::Notice(Notice::NoBackend));
                Session::simulated()
            }
            Err(RetryError::Cancelled) => {
                self.bus.publish(Event::Notice(Notice::NoBackend));
                Session::simulated()
            }
        }
    }

    /// The single consumer of inbound data, so writes land in arrival order
    fn spawn_writer(
        &self,
        mut output: mpsc::UnboundedReceiver<String>,
        scroll: Arc<AsyncMutex<ScrollFollowController>>,
        session: Arc<Mutex<Session>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let widget = self.widget.clone();
        tokio::spawn(async move {
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = output.recv() => chunk,
                };
                let Some(chunk) = chunk else { break };
                {
                    // widget before controller, same order as follow()
                    let mut widget = widget.lock().await;
                    widget.write(chunk.as_bytes());
                    scroll.lock().await.on_output(&mut *widget);
                }
                session
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .touch();
            }
            debug!("Output writer stopped");
        })
    }

    fn spawn_initial_fit(
        &self,
        guard: RenderSurfaceGuard,
        notifier: ResizeNotifier,
        size: Size,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let surface = self.surface.clone();
        let timeout = self.config.guard.timeout();
        tokio::spawn(async move {
            let ready = tokio::select! {
                _ = cancel.cancelled() => return,
                ready = guard.wait_until_ready(surface.as_ref(), timeout) => ready,
            };
            if !ready {
                debug!("Surface not ready after {:?}, requesting initial fit anyway", timeout);
            }
            notifier.notify(ResizeSource::Initial, size);
        })
    }

    pub fn session(&self) -> Option<Session> {
        self.mounted.as_ref().map(Mounted::session)
    }

    pub fn is_ready(&self) -> bool {
        self.mounted.is_some()
    }

    /// Route keystrokes to the remote session.
    ///
    /// A simulated session swallows input. A real one rejects it unless the
    /// channel is connected.
    pub fn send_input(&self, data: &str) -> Result<()> {
        let Some(mounted) = &self.mounted else {
            return Err(TetherError::NotConnected);
        };
        let Some(transport) = &mounted.transport else {
            debug!("Simulated session, ignoring {} bytes of input", data.len());
            return Ok(());
        };
        transport.send_input(data)?;
        mounted
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .touch();
        Ok(())
    }

    /// Handle for reporting raw size changes of the container or its parent
    pub fn resize_notifier(&self) -> Option<ResizeNotifier> {
        self.mounted.as_ref().map(|m| m.notifier.clone())
    }

    /// Jump to the live tail and resume following output
    pub async fn follow(&self) {
        let Some(mounted) = &self.mounted else { return };
        let mut widget = self.widget.lock().await;
        let mut scroll = mounted.scroll.lock().await;
        let was_scrolled = scroll.is_user_scrolled();
        scroll.follow(&mut *widget);
        if was_scrolled {
            self.bus
                .publish(Event::ScrollChanged { user_scrolled: false });
        }
    }

    pub async fn is_user_scrolled(&self) -> bool {
        match &self.mounted {
            Some(mounted) => mounted.scroll.lock().await.is_user_scrolled(),
            None => false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.mounted
            .as_ref()
            .map_or(ConnectionState::Idle, |m| m.state.get())
    }

    pub fn watch_connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.mounted.as_ref().map(|m| m.state.subscribe())
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn stats(&self) -> Option<SessionStats> {
        let mounted = self.mounted.as_ref()?;
        let session = mounted.session();
        let millis = |d: std::time::Duration| d.as_millis().min(u64::MAX as u128) as u64;
        Some(SessionStats {
            id: session.id.to_string(),
            simulated: session.is_simulated,
            age_ms: millis(session.created_at.elapsed().unwrap_or_default()),
            idle_ms: millis(session.last_activity.elapsed().unwrap_or_default()),
            connection: mounted.state.get(),
        })
    }

    /// Stop every task, leave the channel, and delete the remote session
    #[instrument(skip(self))]
    pub async fn unmount(&mut self) {
        let Some(mounted) = self.mounted.take() else {
            return;
        };
        mounted.cancel.cancel();
        for task in mounted.tasks {
            if let Err(e) = task.await {
                warn!("Task ended abnormally: {}", e);
            }
        }

        let session = mounted
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if !session.is_simulated {
            spawn_delete(self.api.clone(), session.id.clone());
        }
        info!("Unmounted session {}", session.id);
        self.bus.publish(Event::Closed);
    }
}

/// Fire-and-forget backend teardown
fn spawn_delete(api: Arc<dyn SessionApi>, id: SessionId) {
    tokio::spawn(async move {
        match api.delete_session(&id).await {
            Ok(()) => debug!("Deleted session {}", id),
            Err(e) => warn!("Failed to delete session {}: {}", id, e),
        }
    });
}

impl Drop for SessionBroker {
    fn drop(&mut self) {
        let Some(mounted) = self.mounted.take() else {
            return;
        };
        mounted.cancel.cancel();
        let session = mounted.session();
        if !session.is_simulated && tokio::runtime::Handle::try_current().is_ok() {
            spawn_delete(self.api.clone(), session.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialize() {
        let stats = SessionStats {
            id: "abc".to_string(),
            simulated: false,
            age_ms: 1500,
            idle_ms: 20,
            connection: ConnectionState::Retrying,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["connection"], "retrying");
        assert_eq!(json["age_ms"], 1500);
    }
}
