use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tether_common::error::{Result, TetherError};
use tether_protocol::{ClientMessage, JsonCodec, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

use super::channel::{ChannelConnector, ChannelLink};

/// Duplex channel over a WebSocket carrying JSON text frames
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<ChannelLink> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TetherError::Transport(format!("WebSocket connect failed: {}", e)))?;
        info!("WebSocket connected");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

        // Outgoing: ends when the link is dropped or the socket refuses a write
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = match JsonCodec::encode_client(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", message.event_name(), e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("WebSocket writer finished");
        });

        // Incoming: dropping `in_tx` is how the transport learns the channel closed
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match JsonCodec::decode_server(&text) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(ChannelLink::new(out_tx, in_rx))
    }
}
