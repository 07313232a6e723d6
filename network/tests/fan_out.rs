// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host relay behaviour with several connected peers

mod common;

use common::{init_logging, next_event, test_config, wait_for_event, wait_until};
use lanlink_network::{Message, Session, SessionEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut buf))
        .await
        .expect("data before timeout")
        .unwrap();
    assert_eq!(buf, expected);
}

async fn expect_silence(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected data: {:?}", read);
}

#[tokio::test]
async fn test_message_from_one_client_reaches_the_others_only() {
    init_logging();

    let host = Session::new(test_config());
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        host.on_message(move |m| received.lock().push((m.from, m.message.clone())));
    }
    let mut events = host.subscribe();
    host.start_host("MyLevel").await.unwrap();
    let addr = host.local_session_addr().unwrap();
    assert!(matches!(
        next_event(&mut events, Duration::from_secs(1)).await,
        SessionEvent::HostingStarted { .. }
    ));

    let mut c1 = TcpStream::connect(addr).await.unwrap();
    let mut c2 = TcpStream::connect(addr).await.unwrap();
    let mut c3 = TcpStream::connect(addr).await.unwrap();
    for _ in 0..3 {
        assert!(matches!(
            next_event(&mut events, Duration::from_secs(1)).await,
            SessionEvent::PeerConnected { .. }
        ));
    }
    assert_eq!(host.connection_count(), 3);

    c1.write_all(b"1,7,12.5,-3\n").await.unwrap();
    expect_bytes(&mut c2, b"1,7,12.5,-3\n").await;
    expect_bytes(&mut c3, b"1,7,12.5,-3\n").await;
    expect_silence(&mut c1).await;

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, c1.local_addr().unwrap());
    assert_eq!(received[0].1, Message::place(7, 12.5, -3.0));
    drop(received);

    host.shutdown().await;
}

#[tokio::test]
async fn test_lines_are_relayed_verbatim() {
    init_logging();

    let host = Session::new(test_config());
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        host.on_message(move |m| received.lock().push(m.raw.clone()));
    }
    host.start_host("MyLevel").await.unwrap();
    let addr = host.local_session_addr().unwrap();

    let mut sender = TcpStream::connect(addr).await.unwrap();
    let mut watcher = TcpStream::connect(addr).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || host.connection_count() == 2).await);

    // One line over three writes, CRLF kept on the wire
    for part in [&b"1,4,"[..], b"0.5,", b"2\r\n"] {
        sender.write_all(part).await.unwrap();
        sender.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    expect_bytes(&mut watcher, b"1,4,0.5,2\r\n").await;

    // Lines the host cannot parse still reach the other peers
    let batch = b"1,1,1,1\n1,not-a-number,0,0\n\xff\xfe\n2,#ff0000\n";
    sender.write_all(batch).await.unwrap();
    expect_bytes(&mut watcher, batch).await;

    assert!(wait_until(Duration::from_secs(1), || received.lock().len() == 3).await);
    assert_eq!(
        received.lock().as_slice(),
        &["1,4,0.5,2".to_string(), "1,1,1,1".to_string(), "2,#ff0000".to_string()]
    );
    assert_eq!(host.connection_count(), 2);

    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_peer_is_dropped_and_others_keep_receiving() {
    init_logging();

    let mut config = test_config();
    config.outbound_queue = 16;
    let host = Session::new(config);
    let mut events = host.subscribe();
    host.start_host("MyLevel").await.unwrap();
    let addr = host.local_session_addr().unwrap();

    // Never read from
    let stalled = TcpStream::connect(addr).await.unwrap();
    let stalled_addr = stalled.local_addr().unwrap();
    let mut reader = TcpStream::connect(addr).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || host.connection_count() == 2).await);

    let reading = tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        while !seen.ends_with(b"9,done\n") {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        seen
    });

    let big = format!("9,{}", "x".repeat(60_000));
    let mut sent = 0;
    while host.connection_count() == 2 && sent < 2000 {
        host.send_line(&big).unwrap();
        sent += 1;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(host.connection_count(), 1, "stalled peer open after {} frames", sent);

    let gone = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::PeerDisconnected { .. })
    })
    .await;
    assert!(matches!(gone, SessionEvent::PeerDisconnected { addr, .. } if addr == stalled_addr));

    assert_eq!(host.send_line("9,done").unwrap(), 1);
    let seen = tokio::time::timeout(Duration::from_secs(10), reading)
        .await
        .expect("reader finished")
        .unwrap();
    assert_eq!(seen.len(), sent * (big.len() + 1) + b"9,done\n".len());
    assert!(host.is_running());

    drop(stalled);
    host.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_keeps_connection() {
    init_logging();

    let mut config = test_config();
    config.max_line_len = 32;
    let host = Session::new(config);
    host.start_host("MyLevel").await.unwrap();
    let addr = host.local_session_addr().unwrap();

    let mut sender = TcpStream::connect(addr).await.unwrap();
    let mut watcher = TcpStream::connect(addr).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || host.connection_count() == 2).await);

    let mut payload = vec![b'9'; 100];
    payload.extend_from_slice(b"\n1,2,3,4\n");
    sender.write_all(&payload).await.unwrap();

    expect_bytes(&mut watcher, b"1,2,3,4\n").await;
    assert_eq!(host.connection_count(), 2);

    host.shutdown().await;
}

#[tokio::test]
async fn test_session_clients_exchange_through_host() {
    init_logging();

    let host = Session::new(test_config());
    host.start_host("MyLevel").await.unwrap();
    let addr = host.local_session_addr().unwrap().to_string();

    let alice = Session::new(test_config());
    let bob = Session::new(test_config());
    let bob_inbox = Arc::new(Mutex::new(Vec::new()));
    {
        let inbox = bob_inbox.clone();
        bob.on_message(move |m| inbox.lock().push(m.message.clone()));
    }
    alice.connect_to_server(&addr).await.unwrap();
    bob.connect_to_server(&addr).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || host.connection_count() == 2).await);

    assert_eq!(alice.send(&Message::place(42, 1.5, 2.5)).unwrap(), 1);
    assert!(wait_until(Duration::from_secs(1), || !bob_inbox.lock().is_empty()).await);
    assert_eq!(bob_inbox.lock()[0], Message::place(42, 1.5, 2.5));

    // Host messages reach every client
    assert_eq!(host.send_line("2,#00ff00").unwrap(), 2);
    assert!(wait_until(Duration::from_secs(1), || bob_inbox.lock().len() == 2).await);

    alice.shutdown().await;
    bob.shutdown().await;
    host.shutdown().await;
}
