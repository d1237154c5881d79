//! Live relay tests over real WebSocket connections.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use aurelay::config::DeliveryMode;
use aurelay_protocol::{ChatMessage, ClientCommand, ServerEvent};

mod common;
use common::spawn_relay;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect a client socket and consume the initial `connected` event.
async fn connect_user(base_url: &str, user_id: i64) -> WsStream {
    let host = base_url.trim_start_matches("http://");
    let (mut ws, _) = connect_async(format!("ws://{host}/ws?user_id={user_id}"))
        .await
        .unwrap();
    match next_event(&mut ws).await {
        ServerEvent::Connected { user_id: confirmed } => assert_eq!(confirmed, user_id),
        other => panic!("expected connected event, got {other:?}"),
    }
    ws
}

/// Next protocol event, skipping keepalive pings.
async fn next_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for server event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            let event: ServerEvent = serde_json::from_str(&text).unwrap();
            if matches!(event, ServerEvent::Ping) {
                continue;
            }
            return event;
        }
    }
}

/// Assert that no event arrives within a short window.
async fn expect_silence(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected no event, got {result:?}");
}

async fn send_command(ws: &mut WsStream, cmd: &ClientCommand) {
    let json = serde_json::to_string(cmd).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

fn send(correlation_id: &str, receiver_id: i64, body: &str) -> ClientCommand {
    ClientCommand::Send {
        correlation_id: correlation_id.to_string(),
        receiver_id,
        body: body.to_string(),
    }
}

/// The sender gets an ack with its correlation id, the receiver gets the
/// message, and an uninvolved connection sees nothing.
#[tokio::test]
async fn test_targeted_delivery() {
    let (base_url, state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;
    let mut bob = connect_user(&base_url, 2).await;
    let mut carol = connect_user(&base_url, 3).await;

    send_command(&mut alice, &send("c-1", 2, "hello bob")).await;

    let acked: ChatMessage = match next_event(&mut alice).await {
        ServerEvent::Ack {
            correlation_id,
            message,
        } => {
            assert_eq!(correlation_id, "c-1");
            message
        }
        other => panic!("expected ack, got {other:?}"),
    };
    assert_eq!(acked.sender_id, 1);
    assert_eq!(acked.receiver_id, 2);
    assert_eq!(acked.body, "hello bob");

    match next_event(&mut bob).await {
        ServerEvent::Deliver { message } => {
            assert_eq!(message.id, acked.id);
            assert_eq!(message.body, "hello bob");
        }
        other => panic!("expected deliver, got {other:?}"),
    }

    expect_silence(&mut carol).await;
    assert_eq!(state.messages.count().await.unwrap(), 1);
}

/// A delivered message is already durable: the receiver can turn around and
/// find the same record in history.
#[tokio::test]
async fn test_delivered_message_is_persisted() {
    let (base_url, state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;
    let mut bob = connect_user(&base_url, 2).await;

    send_command(&mut alice, &send("c-1", 2, "durable")).await;

    let delivered = match next_event(&mut bob).await {
        ServerEvent::Deliver { message } => message,
        other => panic!("expected deliver, got {other:?}"),
    };

    let history = state.messages.conversation_between(2, 1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, delivered.id);
    assert_eq!(history[0].sent_at, delivered.sent_at);
}

/// A whitespace-only body is rejected: nothing is stored, nothing fans out.
#[tokio::test]
async fn test_empty_body_rejected() {
    let (base_url, state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;
    let mut bob = connect_user(&base_url, 2).await;

    send_command(&mut alice, &send("c-1", 2, "   ")).await;

    match next_event(&mut alice).await {
        ServerEvent::SendRejected { correlation_id, .. } => {
            assert_eq!(correlation_id, "c-1");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    expect_silence(&mut bob).await;
    assert_eq!(state.messages.count().await.unwrap(), 0);
}

/// A self-addressed message is rejected.
#[tokio::test]
async fn test_self_send_rejected() {
    let (base_url, state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;

    send_command(&mut alice, &send("c-1", 1, "note to self")).await;

    assert!(matches!(
        next_event(&mut alice).await,
        ServerEvent::SendRejected { .. }
    ));
    assert_eq!(state.messages.count().await.unwrap(), 0);
}

/// An unparseable frame gets an error event, and the connection stays usable.
#[tokio::test]
async fn test_invalid_command_keeps_connection() {
    let (base_url, _state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;

    alice
        .send(Message::Text("{\"type\":\"bogus\"}".into()))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut alice).await,
        ServerEvent::Error { .. }
    ));

    send_command(&mut alice, &send("c-1", 2, "still alive")).await;
    assert!(matches!(next_event(&mut alice).await, ServerEvent::Ack { .. }));
}

/// A message to an offline receiver is stored, not replayed on connect; the
/// receiver catches up through the history endpoint.
#[tokio::test]
async fn test_offline_receiver_catches_up_via_history() {
    let (base_url, _state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;

    send_command(&mut alice, &send("c-1", 2, "while you were out")).await;
    assert!(matches!(next_event(&mut alice).await, ServerEvent::Ack { .. }));

    // Bob connects after the fact: no replay on the socket.
    let mut bob = connect_user(&base_url, 2).await;
    expect_silence(&mut bob).await;

    // The history fetch is how the message reaches him.
    let api = aurelay_client::ApiClient::new(base_url);
    let history = api.fetch_history(2, 1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "while you were out");
}

/// Every connection of the receiving user gets its own copy.
#[tokio::test]
async fn test_multi_device_receiver() {
    let (base_url, _state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;
    let mut bob_phone = connect_user(&base_url, 2).await;
    let mut bob_tablet = connect_user(&base_url, 2).await;

    send_command(&mut alice, &send("c-1", 2, "ping all devices")).await;

    for ws in [&mut bob_phone, &mut bob_tablet] {
        match next_event(ws).await {
            ServerEvent::Deliver { message } => assert_eq!(message.body, "ping all devices"),
            other => panic!("expected deliver, got {other:?}"),
        }
    }
}

/// Legacy broadcast mode pushes the message to every connection except the
/// sender's own.
#[tokio::test]
async fn test_broadcast_mode_reaches_bystanders() {
    let (base_url, _state) = spawn_relay(DeliveryMode::Broadcast).await;
    let mut alice = connect_user(&base_url, 1).await;
    let mut bob = connect_user(&base_url, 2).await;
    let mut carol = connect_user(&base_url, 3).await;

    send_command(&mut alice, &send("c-1", 2, "for bob")).await;

    // Sender sees the ack and nothing else.
    assert!(matches!(next_event(&mut alice).await, ServerEvent::Ack { .. }));
    expect_silence(&mut alice).await;

    for ws in [&mut bob, &mut carol] {
        match next_event(ws).await {
            ServerEvent::Deliver { message } => assert_eq!(message.body, "for bob"),
            other => panic!("expected deliver, got {other:?}"),
        }
    }
}

/// A closed connection leaves the registry; later sends to that user are
/// simply stored for the history fetch.
#[tokio::test]
async fn test_disconnect_removes_registration() {
    let (base_url, state) = spawn_relay(DeliveryMode::Targeted).await;
    let mut alice = connect_user(&base_url, 1).await;
    let bob = connect_user(&base_url, 2).await;

    drop(bob);
    // Give the server a moment to observe the close.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.hub.user_count(), 1);

    send_command(&mut alice, &send("c-1", 2, "into the void")).await;
    assert!(matches!(next_event(&mut alice).await, ServerEvent::Ack { .. }));
    assert_eq!(state.messages.count().await.unwrap(), 1);
}
