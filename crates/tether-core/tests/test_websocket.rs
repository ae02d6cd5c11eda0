use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tether_common::{
    error::TetherError,
    types::{ConnectionState, ResizeRequest, SessionId},
};
use tether_core::config::TransportConfig;
use tether_core::events::EventBus;
use tether_core::transport::{
    ChannelConnector, ConnectionStateCell, TransportConnection, WebSocketConnector,
};
use tether_protocol::{ClientMessage, JsonCodec, ServerMessage};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tokio_test::assert_ok;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Accept one WebSocket client, acknowledge its join with a prompt, and
/// forward every decoded client frame to `log`.
async fn serve_one(listener: TcpListener, log: mpsc::UnboundedSender<ClientMessage>) {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = accept_async(stream).await.expect("handshake");

    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let message = JsonCodec::decode_client(&text).expect("client frame");
        if let ClientMessage::Create { id } = &message {
            let replies = [
                ServerMessage::Created { id: id.clone() },
                ServerMessage::Data {
                    id: id.clone(),
                    data: "$ ".to_string(),
                },
            ];
            for reply in replies {
                let frame = JsonCodec::encode_server(&reply).expect("server frame");
                ws.send(Message::Text(frame)).await.expect("send");
            }
        }
        if log.send(message).is_err() {
            break;
        }
    }
}

async fn next_frame(log: &mut mpsc::UnboundedReceiver<ClientMessage>) -> ClientMessage {
    time::timeout(Duration::from_secs(5), log.recv())
        .await
        .expect("frame within 5s")
        .expect("server still running")
}

#[tokio::test]
async fn test_join_data_and_leave_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (log_tx, mut log) = mpsc::unbounded_channel();
    let server = tokio::spawn(serve_one(listener, log_tx));

    let id = SessionId::new("abc123");
    let (output_tx, mut output) = mpsc::unbounded_channel();
    let (connection, handle, driver) = TransportConnection::new(
        id.clone(),
        Arc::new(WebSocketConnector::new(url)),
        &TransportConfig::default(),
        ConnectionStateCell::new(),
        EventBus::new(),
        output_tx,
    );
    let cancel = CancellationToken::new();
    let task = connection.spawn(driver, cancel.clone());

    let prompt = time::timeout(Duration::from_secs(5), output.recv())
        .await
        .expect("prompt within 5s");
    assert_eq!(prompt.as_deref(), Some("$ "));
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(next_frame(&mut log).await, ClientMessage::Create { id: id.clone() });

    assert_ok!(handle.send_input("ls\r"));
    assert!(handle.send_resize(ResizeRequest::new(100, 30)));
    assert_eq!(
        next_frame(&mut log).await,
        ClientMessage::Input {
            id: id.clone(),
            data: "ls\r".to_string()
        }
    );
    assert_eq!(
        next_frame(&mut log).await,
        ClientMessage::resize(id.clone(), ResizeRequest::new(100, 30))
    );

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(next_frame(&mut log).await, ClientMessage::Leave { id });

    // the client closes the socket after leaving
    time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server saw the close")
        .unwrap();
}

#[tokio::test]
async fn test_refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WebSocketConnector::new(format!("ws://{addr}"));
    match connector.connect().await {
        Err(TetherError::Transport(message)) => assert!(message.contains("connect failed")),
        Err(other) => panic!("expected a transport error, got {other}"),
        Ok(_) => panic!("connected to a closed port"),
    }
}
