use async_trait::async_trait;
use tether_common::error::Result;
use tether_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

/// One established duplex channel.
///
/// The channel is closed once `inbound` yields `None`; dropping the link
/// closes the client side.
pub struct ChannelLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

/// The backend's view of an in-memory link
pub struct RemoteEnd {
    pub inbound: mpsc::UnboundedReceiver<ClientMessage>,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl ChannelLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// An in-memory link and the remote end that answers it
    pub fn pair() -> (ChannelLink, RemoteEnd) {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        (
            ChannelLink::new(client_tx, server_rx),
            RemoteEnd {
                inbound: client_rx,
                outbound: server_tx,
            },
        )
    }
}

/// Opens duplex channels to the session backend
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<ChannelLink>;
}
