//! Session behavior of the async connection over an in-memory duplex pipe

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncWriteExt, DuplexStream};
use zero_z3950::error::Error;
use zero_z3950::tokio::{Conn, read_pdu};
use zero_z3950::{Opts, QueryType, SessionState};

use common::MockServer;

/// Answer requests from `stream` until the client hangs up
async fn serve(mut stream: DuplexStream, server: Arc<Mutex<MockServer>>) {
    let mut buffer = Vec::new();
    while read_pdu(&mut stream, &mut buffer, 1 << 20).await.is_ok() {
        let reply = {
            let mut server = server.lock().unwrap();
            server.bytes_received += buffer.len();
            server.respond(&buffer)
        };
        if let Some(reply) = reply
            && stream.write_all(&reply).await.is_err()
        {
            break;
        }
    }
}

fn session_with(server: MockServer, opts: Opts) -> (Conn<DuplexStream>, Arc<Mutex<MockServer>>) {
    let server = Arc::new(Mutex::new(server));
    let (client, peer) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(peer, Arc::clone(&server)));
    (Conn::with_stream(client, opts).unwrap(), server)
}

async fn connected(server: MockServer) -> (Conn<DuplexStream>, Arc<Mutex<MockServer>>) {
    let (mut conn, server) = session_with(server, Opts::default());
    conn.connect().await.unwrap();
    (conn, server)
}

#[tokio::test]
async fn search_and_fetch() {
    let (mut conn, server) = connected(MockServer::new(3)).await;
    assert_eq!(conn.state(), SessionState::Ready);
    assert_eq!(conn.protocol_version(), Some(3));
    conn.set_syntax("usmarc").unwrap();

    let mut rs = conn
        .search("@attr 1=7 0253333490", QueryType::Prefix)
        .await
        .unwrap();
    assert_eq!(rs.size(), 3);

    let record = conn.record(&mut rs, 0).await.unwrap();
    assert_eq!(record.syntax(), "usmarc");
    assert_eq!(record.raw_bytes(), MockServer::body(0).as_slice());

    conn.record(&mut rs, 0).await.unwrap();
    assert_eq!(server.lock().unwrap().count("PresentRequest"), 1);

    assert!(conn.release(rs).await.unwrap());
    conn.close().await.unwrap();
    assert_eq!(conn.state(), SessionState::Closed);
}

#[tokio::test]
async fn search_failure_keeps_session_ready() {
    let mut server = MockServer::new(5);
    server.unavailable_database = Some("Default".to_string());
    let (mut conn, server) = connected(server).await;

    let err = conn.search("dinosaur", QueryType::Prefix).await.unwrap_err();
    assert!(matches!(err, Error::SearchFailed { code: 109, .. }), "{err:?}");
    assert_eq!(conn.state(), SessionState::Ready);

    server.lock().unwrap().unavailable_database = None;
    let rs = conn.search("dinosaur", QueryType::Prefix).await.unwrap();
    assert_eq!(rs.size(), 5);
}

#[tokio::test]
async fn silent_server_times_out() {
    let mut server = MockServer::new(3);
    server.silent_after_init = true;
    let (mut conn, _server) = connected(server).await;
    conn.set_timeout(Some(Duration::from_millis(50)));

    let err = conn.search("dinosaur", QueryType::Prefix).await.unwrap_err();
    assert!(matches!(err, Error::Timeout), "{err:?}");
    assert_eq!(conn.state(), SessionState::Closed);
    assert!(matches!(
        conn.search("dinosaur", QueryType::Prefix).await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn dropped_call_closes_session() {
    let mut server = MockServer::new(3);
    server.silent_after_init = true;
    let (mut conn, _server) = connected(server).await;
    conn.set_timeout(None);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        conn.search("dinosaur", QueryType::Prefix),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(conn.state(), SessionState::Searching);

    assert!(matches!(
        conn.search("dinosaur", QueryType::Prefix).await,
        Err(Error::SessionClosed)
    ));
    assert_eq!(conn.state(), SessionState::Closed);
}

#[tokio::test]
async fn hang_up_during_init() {
    let mut server = MockServer::new(1);
    server.hang_up_on_init = true;
    let server = Arc::new(Mutex::new(server));
    let (client, peer) = tokio::io::duplex(1024);
    let mut conn = Conn::with_stream(client, Opts::default()).unwrap();

    let peer_server = Arc::clone(&server);
    tokio::spawn(async move {
        let mut peer = peer;
        let mut buffer = Vec::new();
        if read_pdu(&mut peer, &mut buffer, 1 << 20).await.is_ok() {
            peer_server.lock().unwrap().respond(&buffer);
        }
        // dropping `peer` closes the pipe
    });

    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert_eq!(conn.state(), SessionState::Closed);
    assert_eq!(server.lock().unwrap().count("InitRequest"), 1);
}

#[tokio::test]
async fn parse_error_sends_nothing() {
    let (mut conn, server) = connected(MockServer::new(1)).await;
    let before = server.lock().unwrap().requests.len();

    let err = conn
        .search("@and @attr 1=4 dinosaur", QueryType::Prefix)
        .await
        .unwrap_err();
    let Error::Parse(parse) = err else {
        panic!("expected a parse error, got {err:?}");
    };
    assert_eq!(parse.offset, 23);
    assert_eq!(server.lock().unwrap().requests.len(), before);
    assert_eq!(conn.state(), SessionState::Ready);
}

#[tokio::test]
async fn sessions_on_separate_tasks() {
    let handles: Vec<_> = (0..4)
        .map(|hits| {
            tokio::spawn(async move {
                let (mut conn, _server) = connected(MockServer::new(hits + 1)).await;
                let mut rs = conn.search("dinosaur", QueryType::Prefix).await.unwrap();
                let fetched = conn.fetch(&mut rs, 0, hits + 1).await.unwrap();
                conn.close().await.unwrap();
                (conn.session_id(), fetched.delivered)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for (hits, handle) in handles.into_iter().enumerate() {
        let (id, delivered) = handle.await.unwrap();
        assert_eq!(delivered, hits + 1);
        ids.push(id);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}
