//! End-to-end tests for the chat server.
//!
//! Each test starts a real `ChatServer` on an ephemeral loopback port and
//! talks to it with client-side `Session`s, checking the protocol behavior
//! as seen on the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tcp_chat::protocol::{EVENT_CHANNEL_SIZE, MAX_FRAME_PAYLOAD};
use tcp_chat::{
    AppError, ChatClient, ChatServer, ClientEvent, Command, Message, ServerHandle, Session,
    SessionReader,
};

const WAIT: Duration = Duration::from_secs(5);

// ── Harness ─────────────────────────────────────────────────────────

async fn start_server() -> (SocketAddr, ServerHandle, JoinHandle<()>) {
    let server = ChatServer::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = server.local_addr().expect("no local addr");
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    (addr, handle, task)
}

async fn next(reader: &mut SessionReader) -> Option<Message> {
    timeout(WAIT, reader.receive())
        .await
        .expect("timed out waiting for a frame")
        .expect("receive failed")
}

async fn expect_message(reader: &mut SessionReader) -> Message {
    next(reader).await.expect("connection closed unexpectedly")
}

/// Connect, authenticate and consume SUCCESS, ONLINE and the own join notice
async fn join(addr: SocketAddr, name: &str) -> (Arc<Session>, SessionReader, String) {
    let (session, mut reader) = Session::connect(addr).await.expect("connect failed");
    session.send(Message::auth_request(name)).await.unwrap();

    let success = expect_message(&mut reader).await;
    assert_eq!(success.command, Command::Success, "auth failed: {:?}", success);
    let online = expect_message(&mut reader).await;
    assert_eq!(online.command, Command::OnlineUsers);
    let joined = expect_message(&mut reader).await;
    assert_eq!(joined.command, Command::UserJoined);
    assert!(joined.data.contains(name));

    (session, reader, online.data)
}

/// PING and expect the very next frame to be PONG
async fn assert_quiet_then_pong(session: &Session, reader: &mut SessionReader) {
    session.send(Message::new(Command::Ping, "ping", "x")).await.unwrap();
    let reply = expect_message(reader).await;
    assert_eq!(reply.command, Command::Pong, "unexpected frame: {:?}", reply);
}

/// Next client event, `None` once every sender is gone
async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> Option<ClientEvent> {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a client event")
}

/// Drain the remaining events of a client that has finished
async fn remaining_events(events: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Some(event) = next_event(events).await {
        seen.push(event);
    }
    seen
}

/// JSON overhead of a chat frame with empty data and sender
fn chat_frame_overhead() -> usize {
    Message::new(Command::Message, "", "")
        .to_payload()
        .unwrap()
        .len()
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_first_user_sees_empty_online_list() {
    let (addr, handle, _task) = start_server().await;

    let (_alice, _reader, online) = join(addr, "alice").await;
    assert_eq!(online, "");
    assert_eq!(handle.online_users().await, vec!["alice".to_string()]);

    handle.stop();
}

#[tokio::test]
async fn handshake_duplicate_name_rejected_then_retry() {
    let (addr, handle, _task) = start_server().await;
    let (_alice, mut alice_reader, _) = join(addr, "alice").await;

    let (session, mut reader) = Session::connect(addr).await.unwrap();
    session.send(Message::auth_request("alice")).await.unwrap();
    let reply = expect_message(&mut reader).await;
    assert_eq!(reply.command, Command::Error);
    assert_eq!(reply.sender, "System");

    // Same connection, new name.
    session.send(Message::auth_request("alice2")).await.unwrap();
    assert_eq!(expect_message(&mut reader).await.command, Command::Success);
    let online = expect_message(&mut reader).await;
    assert_eq!(online.command, Command::OnlineUsers);
    assert_eq!(online.data, "alice");

    let notice = expect_message(&mut alice_reader).await;
    assert_eq!(notice.command, Command::UserJoined);
    assert!(notice.data.contains("alice2"));

    handle.stop();
}

#[tokio::test]
async fn handshake_empty_name_rejected() {
    let (addr, handle, _task) = start_server().await;

    let (session, mut reader) = Session::connect(addr).await.unwrap();
    session.send(Message::auth_request("  ")).await.unwrap();
    assert_eq!(expect_message(&mut reader).await.command, Command::Error);
    assert!(handle.online_users().await.is_empty());

    handle.stop();
}

#[tokio::test]
async fn wrong_first_command_closes_without_user_left() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;

    let (session, mut reader) = Session::connect(addr).await.unwrap();
    session.send(Message::user("mallory", "let me in")).await.unwrap();
    assert_eq!(expect_message(&mut reader).await.command, Command::Error);
    assert_eq!(next(&mut reader).await, None);

    // No USER_LEFT for a session that never registered.
    assert_quiet_then_pong(&alice, &mut alice_reader).await;

    handle.stop();
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_message_broadcast_to_everyone() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;
    let (_bob, mut bob_reader, online) = join(addr, "bob").await;
    assert_eq!(online, "alice");
    assert_eq!(expect_message(&mut alice_reader).await.command, Command::UserJoined);

    alice.send(Message::user("alice", "hello room")).await.unwrap();

    let at_bob = expect_message(&mut bob_reader).await;
    assert_eq!(at_bob.command, Command::Message);
    assert_eq!(at_bob.data, "hello room");
    assert_eq!(at_bob.sender, "alice");

    // The sender gets the echo, attributed to itself.
    let echo = expect_message(&mut alice_reader).await;
    assert_eq!(echo.data, "hello room");
    assert_eq!(echo.sender, "alice");

    handle.stop();
}

#[tokio::test]
async fn private_message_to_absent_user_is_dropped() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;

    alice
        .send(Message::user("alice", "/pm bob hello there"))
        .await
        .unwrap();

    assert_quiet_then_pong(&alice, &mut alice_reader).await;
    handle.stop();
}

#[tokio::test]
async fn private_message_delivered_verbatim() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;
    let (_bob, mut bob_reader, _) = join(addr, "bob").await;
    expect_message(&mut alice_reader).await;

    alice
        .send(Message::user("alice", "/pm bob hello  there, bob"))
        .await
        .unwrap();

    let private = expect_message(&mut bob_reader).await;
    assert_eq!(private.command, Command::Message);
    assert_eq!(private.data, "[Private from alice] hello  there, bob");
    assert_eq!(private.sender, "alice");

    // Only the target receives it.
    assert_quiet_then_pong(&alice, &mut alice_reader).await;
    handle.stop();
}

#[tokio::test]
async fn command_misuse_reports_errors() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut reader, _) = join(addr, "alice").await;

    for data in ["/pm alice note to self", "/pm bob", "/dance"] {
        alice.send(Message::user("alice", data)).await.unwrap();
        let reply = expect_message(&mut reader).await;
        assert_eq!(reply.command, Command::Error, "for {:?}", data);
    }

    alice.send(Message::user("alice", "/dance")).await.unwrap();
    assert!(expect_message(&mut reader).await.data.contains("/dance"));

    // Connection is still usable.
    assert_quiet_then_pong(&alice, &mut reader).await;
    handle.stop();
}

#[tokio::test]
async fn server_commands() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut reader, _) = join(addr, "alice").await;

    alice.send(Message::user("alice", "/users")).await.unwrap();
    let users = expect_message(&mut reader).await;
    assert_eq!(users.command, Command::OnlineUsers);
    assert_eq!(users.data, "alice");

    alice.send(Message::user("alice", "/TIME")).await.unwrap();
    let time = expect_message(&mut reader).await;
    assert_eq!(time.command, Command::ServerTime);
    assert_eq!(time.data.len(), "2024-01-01 00:00:00".len());

    alice.send(Message::user("alice", "/help")).await.unwrap();
    let help_text = expect_message(&mut reader).await;
    assert_eq!(help_text.command, Command::Help);

    alice.send(Message::new(Command::Help, "", "alice")).await.unwrap();
    let help_cmd = expect_message(&mut reader).await;
    assert_eq!(help_cmd.command, Command::Help);
    assert_eq!(help_cmd.data, help_text.data);

    alice.send(Message::success("not yours to send")).await.unwrap();
    assert_eq!(expect_message(&mut reader).await.command, Command::Error);

    handle.stop();
}

#[tokio::test]
async fn chat_message_too_long_to_relay_reports_error() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;
    let (bob, mut bob_reader, _) = join(addr, "bob").await;
    expect_message(&mut alice_reader).await;

    // Exactly at the frame limit as sent; the relayed copy adds "alice".
    let mut at_limit = Message::new(Command::Message, "", "");
    at_limit.data = "x".repeat(MAX_FRAME_PAYLOAD - chat_frame_overhead());
    alice.send(at_limit).await.unwrap();

    let reply = expect_message(&mut alice_reader).await;
    assert_eq!(reply.command, Command::Error);
    assert!(reply.data.contains("too long"));

    // The private prefix pushes the relayed copy over the limit too.
    let mut private = Message::new(Command::Message, "", "");
    let room = MAX_FRAME_PAYLOAD - chat_frame_overhead() - "/pm bob ".len();
    private.data = format!("/pm bob {}", "x".repeat(room));
    alice.send(private).await.unwrap();
    assert_eq!(expect_message(&mut alice_reader).await.command, Command::Error);

    // Nothing reached bob, and both connections stay usable.
    assert_quiet_then_pong(&bob, &mut bob_reader).await;
    assert_quiet_then_pong(&alice, &mut alice_reader).await;
    handle.stop();
}

// ── Client ──────────────────────────────────────────────────────────

#[tokio::test]
async fn client_retries_taken_name_then_exits() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;

    let (event_tx, mut events) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let client = ChatClient::connect(addr, event_tx).await.unwrap();
    let input = BufReader::new(&b"alice\nalice2\nhello\n/exit\n"[..]).lines();

    timeout(WAIT, client.run(input))
        .await
        .expect("client did not exit")
        .expect("client failed");

    let seen = remaining_events(&mut events).await;
    assert_eq!(seen[0], ClientEvent::UsernamePrompt);
    assert!(
        matches!(&seen[1], ClientEvent::AuthRejected(reason) if reason.contains("already")),
        "unexpected event: {:?}",
        seen[1]
    );
    assert_eq!(seen[2], ClientEvent::UsernamePrompt);
    assert!(
        matches!(&seen[3], ClientEvent::Authenticated { username, .. } if username == "alice2"),
        "unexpected event: {:?}",
        seen[3]
    );
    // A local exit is not reported as a lost connection.
    assert!(!seen.contains(&ClientEvent::Disconnected));

    let joined = expect_message(&mut alice_reader).await;
    assert_eq!(joined.command, Command::UserJoined);
    assert!(joined.data.contains("alice2"));

    let chat = expect_message(&mut alice_reader).await;
    assert_eq!(chat.command, Command::Message);
    assert_eq!(chat.data, "hello");
    assert_eq!(chat.sender, "alice2");

    let left = expect_message(&mut alice_reader).await;
    assert_eq!(left.command, Command::UserLeft);
    assert!(left.data.contains("alice2"));

    // Closed once: no second leave notice, and the name is free again.
    assert_quiet_then_pong(&alice, &mut alice_reader).await;
    assert_eq!(handle.online_users().await, vec!["alice".to_string()]);
    handle.stop();
}

#[tokio::test]
async fn client_reports_server_shutdown() {
    let (addr, handle, _task) = start_server().await;

    let (event_tx, mut events) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let client = ChatClient::connect(addr, event_tx).await.unwrap();

    // Keyboard stays open: only the server side can end this session.
    let (mut keyboard, input) = duplex(64);
    keyboard.write_all(b"bob\n").await.unwrap();
    let run = tokio::spawn(client.run(BufReader::new(input).lines()));

    assert_eq!(next_event(&mut events).await, Some(ClientEvent::UsernamePrompt));
    assert!(matches!(
        next_event(&mut events).await,
        Some(ClientEvent::Authenticated { username, .. }) if username == "bob"
    ));

    handle.stop();

    loop {
        match next_event(&mut events).await {
            Some(ClientEvent::Received(_)) => continue,
            Some(ClientEvent::Disconnected) => break,
            other => panic!("Expected Disconnected, got {:?}", other),
        }
    }

    timeout(WAIT, run)
        .await
        .expect("client did not stop")
        .expect("client task panicked")
        .expect("client failed");
    drop(keyboard);
}

#[tokio::test]
async fn client_authentication_aborts_on_hangup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept, read the auth request, then hang up without replying.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (_session, mut reader) = Session::new(stream, CancellationToken::new()).unwrap();
        reader.receive().await.unwrap()
    });

    let (event_tx, mut events) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let client = ChatClient::connect(addr, event_tx).await.unwrap();
    let input = BufReader::new(&b"carol\n"[..]).lines();

    let result = timeout(WAIT, client.run(input)).await.expect("client hung");
    assert!(
        matches!(result, Err(AppError::ConnectionClosed)),
        "unexpected result: {:?}",
        result
    );

    let request = server.await.unwrap().expect("no auth request");
    assert_eq!(request.command, Command::AuthRequest);
    assert_eq!(request.data, "carol");

    assert_eq!(
        remaining_events(&mut events).await,
        vec![ClientEvent::UsernamePrompt, ClientEvent::Disconnected]
    );
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_broadcasts_user_left_and_frees_name() {
    let (addr, handle, _task) = start_server().await;
    let (_alice, mut alice_reader, _) = join(addr, "alice").await;
    let (bob, _bob_reader, _) = join(addr, "bob").await;
    expect_message(&mut alice_reader).await;

    bob.close().await;

    let left = expect_message(&mut alice_reader).await;
    assert_eq!(left.command, Command::UserLeft);
    assert!(left.data.contains("bob"));
    assert_eq!(handle.online_users().await, vec!["alice".to_string()]);

    let (_bob_again, _reader, online) = join(addr, "bob").await;
    assert_eq!(online, "alice");

    handle.stop();
}

#[tokio::test]
async fn oversized_frame_closes_only_that_connection() {
    let (addr, handle, _task) = start_server().await;
    let (alice, mut alice_reader, _) = join(addr, "alice").await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&5000i32.to_le_bytes()).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, raw.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0);

    assert_quiet_then_pong(&alice, &mut alice_reader).await;
    handle.stop();
}

#[tokio::test]
async fn stop_closes_every_session() {
    let (addr, handle, task) = start_server().await;
    let (_alice, mut alice_reader, _) = join(addr, "alice").await;
    let (_bob, mut bob_reader, _) = join(addr, "bob").await;
    expect_message(&mut alice_reader).await;

    // Connected but not yet authenticated.
    let (_pending, mut pending_reader) = Session::connect(addr).await.unwrap();

    handle.stop();
    timeout(WAIT, task).await.unwrap().unwrap();

    for reader in [&mut alice_reader, &mut bob_reader, &mut pending_reader] {
        loop {
            // Leave notices may still be in flight before EOF.
            match next(reader).await {
                Some(message) => assert_eq!(message.command, Command::UserLeft),
                None => break,
            }
        }
    }
}
