//! Duplex channel to a remote session, kept alive across network drops.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Retrying -> Connecting ...
//!              |                                        |
//!              +--> Disconnected                        +--> Failed
//! ```

mod channel;
mod state;
mod websocket;

pub use channel::{ChannelConnector, ChannelLink, RemoteEnd};
pub use state::ConnectionStateCell;
pub use websocket::WebSocketConnector;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_common::{
    error::{Result, TetherError},
    types::{ConnectionState, ResizeRequest, SessionId},
};
use tether_protocol::{ClientMessage, ServerMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::events::{Event, EventBus, Notice};
use crate::retry::RetryPolicy;

#[derive(Debug)]
enum Outbound {
    Input(String),
    Resize(ResizeRequest),
}

/// How a connected phase ended
#[derive(Debug, PartialEq, Eq)]
enum LinkEnd {
    Closed,
    Cancelled,
}

/// Client-facing side of a running transport
#[derive(Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: ConnectionStateCell,
    bus: EventBus,
    last_resize: Arc<Mutex<Option<ResizeRequest>>>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Transmit keystrokes. Input is never queued: outside `Connected` it is
    /// dropped and a "not connected" notice is published.
    pub fn send_input(&self, data: &str) -> Result<()> {
        if self.state.get() != ConnectionState::Connected {
            debug!("Dropping {} bytes of input while {}", data.len(), self.state.get());
            self.bus.publish(Event::Notice(Notice::NotConnected));
            return Err(TetherError::NotConnected);
        }
        self.outbound
            .send(Outbound::Input(data.to_string()))
            .map_err(|_| TetherError::Transport("transport stopped".to_string()))
    }

    /// Remember `request` for resync and transmit it if connected.
    /// Returns whether it was handed to the channel.
    pub fn send_resize(&self, request: ResizeRequest) -> bool {
        // Held across the state check so a join either resyncs this request
        // or sees it already queued, never both.
        let mut last = self
            .last_resize
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(request);
        if self.state.get() != ConnectionState::Connected {
            debug!("Not connected, {:?} will be sent on join", request);
            return false;
        }
        self.outbound.send(Outbound::Resize(request)).is_ok()
    }
}

pub struct TransportConnection {
    session_id: SessionId,
    connector: Arc<dyn ChannelConnector>,
    policy: RetryPolicy,
    join_timeout: Duration,
    state: ConnectionStateCell,
    bus: EventBus,
    output: mpsc::UnboundedSender<String>,
    last_resize: Arc<Mutex<Option<ResizeRequest>>>,
}

impl TransportConnection {
    /// Build a transport for `session_id`. Inbound data is delivered, in
    /// arrival order, to `output`.
    pub fn new(
        session_id: SessionId,
        connector: Arc<dyn ChannelConnector>,
        config: &TransportConfig,
        state: ConnectionStateCell,
        bus: EventBus,
        output: mpsc::UnboundedSender<String>,
    ) -> (Self, TransportHandle, TransportDriver) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let last_resize = Arc::new(Mutex::new(None));
        let handle = TransportHandle {
            outbound: outbound_tx,
            state: state.clone(),
            bus: bus.clone(),
            last_resize: last_resize.clone(),
        };
        let connection = Self {
            session_id,
            connector,
            policy: config.retry_policy(),
            join_timeout: config.join_timeout(),
            state,
            bus,
            output,
            last_resize,
        };
        (connection, handle, TransportDriver { outbound_rx })
    }

    pub fn spawn(self, driver: TransportDriver, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(driver, cancel))
    }

    /// Attach, pump, and reconnect until cancelled or `Failed`
    #[instrument(skip_all, fields(session = %self.session_id))]
    pub async fn run(self, driver: TransportDriver, cancel: CancellationToken) {
        let mut outbound = driver.outbound_rx;
        let mut failures: u32 = 0;

        loop {
            self.enter(ConnectionState::Connecting);
            let attached = tokio::select! {
                _ = cancel.cancelled() => return,
                attached = self.attach() => attached,
            };

            match attached {
                Ok(mut link) => {
                    failures = 0;
                    {
                        let last = self
                            .last_resize
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        // Anything queued before this point belongs to a dead connection.
                        while let Ok(stale) = outbound.try_recv() {
                            trace!("Discarding stale {:?}", stale);
                        }
                        self.enter(ConnectionState::Connected);
                        self.resync(&link, *last);
                    }

                    match self.pump(&mut link, &mut outbound, &cancel).await {
                        LinkEnd::Cancelled => {
                            let _ = link.outbound.send(ClientMessage::Leave {
                                id: self.session_id.clone(),
                            });
                            info!("Left session");
                            return;
                        }
                        LinkEnd::Closed => warn!("Channel closed"),
                    }
                }
                Err(e) => warn!("Attach failed: {}", e),
            }

            if cancel.is_cancelled() {
                return;
            }
            self.enter(ConnectionState::Disconnected);
            self.enter(ConnectionState::Retrying);

            if self.policy.is_exhausted(failures) {
                error!("Giving up after {} reconnect attempts", failures);
                self.enter(ConnectionState::Failed);
                self.bus
                    .publish(Event::Notice(Notice::ConnectionFailed { attempts: failures }));
                return;
            }

            let delay = self.policy.backoff.delay(failures);
            failures += 1;
            info!("Reconnect attempt {} in {:?}", failures, delay);
            self.bus.publish(Event::Notice(Notice::Reconnecting {
                attempt: failures,
                delay,
            }));

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // The owning session may have been torn down while we slept.
            if cancel.is_cancelled() {
                return;
            }
        }
    }

    /// Open a channel and complete the join handshake
    async fn attach(&self) -> Result<ChannelLink> {
        let mut link = self.connector.connect().await?;
        link.outbound
            .send(ClientMessage::Create {
                id: self.session_id.clone(),
            })
            .map_err(|_| TetherError::Transport("channel closed before join".to_string()))?;

        let joined = tokio::time::timeout(self.join_timeout, async {
            while let Some(message) = link.inbound.recv().await {
                match message {
                    ServerMessage::Created { id } if id == self.session_id => return Ok(()),
                    ServerMessage::Error { message } => {
                        return Err(TetherError::Transport(format!("join rejected: {}", message)))
                    }
                    other => trace!("Ignoring {} before join ack", other.event_name()),
                }
            }
            Err(TetherError::Transport("channel closed during join".to_string()))
        })
        .await;

        match joined {
            Ok(Ok(())) => {
                debug!("Joined session");
                Ok(link)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TetherError::Timeout),
        }
    }

    /// Re-send the last known size so the remote PTY matches the widget
    fn resync(&self, link: &ChannelLink, last: Option<ResizeRequest>) {
        if let Some(request) = last {
            debug!("Resyncing remote size to {:?}", request);
            let _ = link
                .outbound
                .send(ClientMessage::resize(self.session_id.clone(), request));
        }
    }

    /// Keystrokes go out ahead of queued inbound frames so an interrupt is
    /// not stuck behind a flood of output.
    async fn pump(
        &self,
        link: &mut ChannelLink,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
        cancel: &CancellationToken,
    ) -> LinkEnd {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return LinkEnd::Cancelled,
                command = outbound.recv() => {
                    let message = match command {
                        Some(Outbound::Input(data)) => ClientMessage::Input {
                            id: self.session_id.clone(),
                            data,
                        },
                        Some(Outbound::Resize(request)) => {
                            ClientMessage::resize(self.session_id.clone(), request)
                        }
                        // Every handle is gone; nobody owns this session any more.
                        None => return LinkEnd::Cancelled,
                    };
                    if link.outbound.send(message).is_err() {
                        return LinkEnd::Closed;
                    }
                }
                inbound = link.inbound.recv() => {
                    let Some(message) = inbound else {
                        return LinkEnd::Closed;
                    };
                    self.handle_inbound(message);
                }
            }
        }
    }

    fn handle_inbound(&self, message: ServerMessage) {
        match message {
            ServerMessage::Data { id, data } if id == self.session_id => {
                if self.output.send(data).is_err() {
                    debug!("Output sink closed, dropping data");
                }
            }
            ServerMessage::Created { id } if id == self.session_id => {
                debug!("Re-join acknowledged");
                self.enter(ConnectionState::Connected);
            }
            ServerMessage::Error { message } => {
                warn!("Remote error: {}", message);
                self.bus.publish(Event::Notice(Notice::Remote(message)));
            }
            other => trace!("Ignoring {} for another session", other.event_name()),
        }
    }

    fn enter(&self, next: ConnectionState) {
        match self.state.transition(next) {
            Ok(previous) => {
                debug!("Connection {} -> {}", previous, next);
                self.bus.publish(Event::ConnectionChanged(next));
            }
            Err(e) => error!("{}", e),
        }
    }
}

/// Receiving half of the handle's command queue, consumed by `run`
pub struct TransportDriver {
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}
