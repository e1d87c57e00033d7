//! End-to-end engine tests over loopback sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hoo_net::{EngineConfig, Message, MessageKind, NetworkEngine, NetworkError, SessionId};
use hoo_protocol::frame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(5);

fn config(capacity: usize) -> EngineConfig {
    EngineConfig {
        poll_timeout: Duration::from_millis(50),
        ..EngineConfig::with_capacity(capacity)
    }
}

async fn started(config: EngineConfig) -> (NetworkEngine, SocketAddr) {
    let engine = NetworkEngine::new(config);
    let addr = engine.open("127.0.0.1", 0).await.unwrap();
    engine.launch();
    (engine, addr)
}

async fn next(engine: &NetworkEngine) -> Message {
    tokio::time::timeout(WAIT, engine.next_message())
        .await
        .expect("timed out waiting for a message")
        .expect("engine stopped")
}

async fn send_frame(stream: &mut TcpStream, message: &Message) {
    stream.write_all(&frame::encode(message)).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> Option<Message> {
    let mut header = [0u8; frame::HEADER_LEN];
    if stream.read_exact(&mut header).await.is_err() {
        return None;
    }
    let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    let mut buf = header.to_vec();
    buf.resize(frame::HEADER_LEN + len, 0);
    stream.read_exact(&mut buf[frame::HEADER_LEN..]).await.ok()?;
    frame::decode(&buf).unwrap().map(|(message, _)| message)
}

async fn assert_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("timed out waiting for EOF")
        .unwrap_or(0);
    assert_eq!(n, 0, "expected EOF");
}

// =========================================================================
// inbound ordering
// =========================================================================

#[tokio::test]
async fn test_peer_messages_arrive_in_order_then_close() {
    let (engine, addr) = started(config(4)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let open = next(&engine).await;
    assert_eq!(open.kind, MessageKind::OpenSession);
    let id = open.session_id;
    assert_eq!(id, SessionId(0));

    // The id the peer writes is ignored; the engine stamps its own.
    send_frame(&mut client, &Message::application(SessionId(42), b"A".to_vec())).await;
    send_frame(&mut client, &Message::application(SessionId(42), b"B".to_vec())).await;
    drop(client);

    let a = next(&engine).await;
    let b = next(&engine).await;
    let close = next(&engine).await;
    assert_eq!((a.kind, a.session_id, a.payload.as_slice()), (MessageKind::Application, id, &b"A"[..]));
    assert_eq!((b.kind, b.session_id, b.payload.as_slice()), (MessageKind::Application, id, &b"B"[..]));
    assert_eq!(close, Message::close_session(id));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_closes_session() {
    let (engine, addr) = started(config(4)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    client.write_all(&[0xee, 0, 0, 0, 0]).await.unwrap();

    assert_eq!(next(&engine).await, Message::close_session(id));
    assert_eof(&mut client).await;
    engine.shutdown().await;
}

// =========================================================================
// timeouts
// =========================================================================

#[tokio::test]
async fn test_idle_connection_times_out_with_one_close() {
    let (engine, addr) = started(EngineConfig {
        connection_timeout: Some(Duration::from_millis(200)),
        ..config(4)
    })
    .await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    assert_eq!(next(&engine).await, Message::close_session(id));
    assert_eof(&mut client).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.get_message().is_none());
    assert_eq!(engine.connection_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_set_connections_time_out_zero_disables() {
    let (engine, addr) = started(EngineConfig {
        connection_timeout: Some(Duration::from_millis(100)),
        ..config(4)
    })
    .await;
    engine.set_connections_time_out(0);
    let _client = TcpStream::connect(addr).await.unwrap();
    next(&engine).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.get_message().is_none());
    assert_eq!(engine.connection_count(), 1);
    engine.shutdown().await;
}

// =========================================================================
// admission
// =========================================================================

#[tokio::test]
async fn test_full_pool_rejects_with_max_connections_reached() {
    let (engine, addr) = started(config(1)).await;
    let _first = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&engine).await.kind, MessageKind::OpenSession);

    let mut second = TcpStream::connect(addr).await.unwrap();
    let reject = tokio::time::timeout(WAIT, read_frame(&mut second))
        .await
        .unwrap()
        .expect("rejection frame");
    assert_eq!(reject.kind, MessageKind::MaxConnectionsReached);
    assert_eq!(reject.session_id, SessionId::NONE);
    assert_eof(&mut second).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.get_message().is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_blacklisted_peer_is_closed_silently() {
    let (engine, addr) = started(config(2)).await;
    engine.ban_address(IpAddr::V4(Ipv4Addr::LOCALHOST), None);

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eof(&mut client).await;
    assert!(engine.get_message().is_none());
    assert_eq!(engine.connection_count(), 0);

    assert!(engine.unban_address(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let _client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&engine).await.kind, MessageKind::OpenSession);
    engine.shutdown().await;
}

// =========================================================================
// outbound
// =========================================================================

#[tokio::test]
async fn test_send_message_reaches_peer() {
    let (engine, addr) = started(config(2)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    engine.send_message(Message::application(id, b"hello".to_vec()));

    let received = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::application(id, b"hello".to_vec()));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_send_close_session_queues_one_close() {
    let (engine, addr) = started(config(2)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    engine.send_message(Message::close_session(id));
    assert_eof(&mut client).await;
    assert_eq!(engine.connection_count(), 0);
    assert_eq!(next(&engine).await, Message::close_session(id));

    // A second request for the freed slot is ignored.
    engine.send_message(Message::close_session(id));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.get_message().is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_send_close_session_on_reused_slot_closes_new_peer() {
    let (engine, addr) = started(config(2)).await;

    let first = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&engine).await, Message::open_session(SessionId(0)));
    drop(first);
    assert_eq!(next(&engine).await, Message::close_session(SessionId(0)));

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&engine).await, Message::open_session(SessionId(0)));

    engine.send_message(Message::close_session(SessionId(0)));
    assert_eof(&mut second).await;
    assert_eq!(next(&engine).await, Message::close_session(SessionId(0)));
    assert_eq!(engine.connection_count(), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.get_message().is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_send_message_oversized_payload_dropped_connection_kept() {
    let (engine, addr) = started(config(2)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    engine.send_message(Message::application(id, vec![0; frame::MAX_PAYLOAD_LEN + 1]));
    engine.send_message(Message::application(id, b"small".to_vec()));

    let received = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::application(id, b"small".to_vec()));
    assert_eq!(engine.connection_count(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_stalled_peer_past_output_limit_closed_once() {
    let (engine, addr) = started(EngineConfig {
        max_pending_output: 64 * 1024,
        ..config(2)
    })
    .await;
    // Never read from this side.
    let _client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    let chunk = vec![1u8; 64 * 1024];
    for round in 0..1024 {
        if engine.connection_count() == 0 {
            break;
        }
        engine.send_message(Message::application(id, chunk.clone()));
        if round % 16 == 0 {
            tokio::task::yield_now().await;
        }
    }

    assert_eq!(next(&engine).await, Message::close_session(id));
    assert_eq!(engine.connection_count(), 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.get_message().is_none());
    engine.shutdown().await;
}

// =========================================================================
// lifecycle
// =========================================================================

#[tokio::test]
async fn test_shutdown_queues_close_for_open_sessions() {
    let (engine, addr) = started(config(4)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let id = next(&engine).await.session_id;

    engine.shutdown().await;
    assert_eof(&mut client).await;
    assert_eq!(next(&engine).await, Message::close_session(id));
    assert!(engine.next_message().await.is_none());
    assert_eq!(engine.connection_count(), 0);
}

#[tokio::test]
async fn test_drop_engine_releases_listener() {
    let (engine, addr) = started(config(2)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    next(&engine).await;

    drop(engine);
    assert_eof(&mut client).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}

// =========================================================================
// outbound dial
// =========================================================================

#[tokio::test]
async fn test_connect_between_engines() {
    let (server, addr) = started(config(2)).await;
    let client = NetworkEngine::new(config(1));

    let id = client
        .connect("127.0.0.1", addr.port())
        .await
        .unwrap()
        .expect("dial succeeds");
    client.launch();

    let open = next(&server).await;
    assert_eq!(open.kind, MessageKind::OpenSession);

    client.send_message(Message::application(id, b"ping".to_vec()));
    let ping = next(&server).await;
    assert_eq!(ping.payload, b"ping");

    server.send_message(Message::application(open.session_id, b"pong".to_vec()));
    let pong = next(&client).await;
    assert_eq!((pong.session_id, pong.payload.as_slice()), (id, &b"pong"[..]));

    client.shutdown().await;
    assert_eq!(next(&server).await, Message::close_session(open.session_id));
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_full_pool_fails_pool_exhausted() {
    let (server, addr) = started(config(2)).await;
    let client = NetworkEngine::new(config(0));

    assert!(matches!(
        client.connect("127.0.0.1", addr.port()).await,
        Err(NetworkError::PoolExhausted)
    ));
    server.shutdown().await;
}
