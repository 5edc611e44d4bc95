//! End-to-end behaviour of a single connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};

use agent_builder::config::ConnectionConfig;
use agent_builder::net::connection::ConnectionState;
use agent_builder::protocol::Envelope;
use agent_builder::{
    BoxError, Connection, CorrelationId, Incoming, Payload, ProtocolError, UnhandledPayload,
};

mod common;
use common::*;

#[tokio::test]
async fn request_arrives_without_pending_entry() {
    let ((a, _a_in), (_b, mut b_in)) = connection_pair();

    a.request(note("hello")).await.unwrap();
    assert_eq!(a.pending_queries(), 0);

    let packet = tokio::time::timeout(WAIT, b_in.recv()).await.unwrap().unwrap();
    assert_eq!(packet.payload(), &note("hello"));
}

#[tokio::test]
async fn query_receives_correlated_reply() {
    let ((a, _a_in), (_b, mut b_in)) = connection_pair();

    let responder = tokio::spawn(async move {
        let packet = b_in.recv().await.unwrap();
        match packet.payload() {
            TestPayload::Ping(p) => packet.response(pong(p.seq)).await.unwrap(),
            other => panic!("unexpected {:?}", other),
        }
        b_in
    });

    let reply = tokio::time::timeout(WAIT, a.query(ping(7))).await.unwrap().unwrap();
    assert_eq!(reply, pong(7));
    assert_eq!(a.pending_queries(), 0);
    assert!(a.latency() > Duration::ZERO);

    responder.await.unwrap();
}

async fn echo(mut incoming: Incoming<TestPayload>) {
    while let Some(packet) = incoming.recv().await {
        if let TestPayload::Ping(p) = packet.payload() {
            packet.response(pong(p.seq)).await.unwrap();
        }
    }
}

#[tokio::test]
async fn both_sides_query_each_other() {
    let ((a, a_in), (b, b_in)) = connection_pair();

    tokio::spawn(echo(a_in));
    tokio::spawn(echo(b_in));

    let (from_a, from_b) = tokio::join!(a.query(ping(1)), b.query(ping(2)));
    assert_eq!(from_a.unwrap(), pong(1));
    assert_eq!(from_b.unwrap(), pong(2));
}

#[tokio::test]
async fn replies_match_by_id_not_order() {
    let config = ConnectionConfig::default();
    let ((a, _a_in), mut peer) = connection_with_raw_peer(&config);

    let mut queries = tokio::task::JoinSet::new();
    for seq in 0..8u32 {
        let a = a.clone();
        queries.spawn(async move { (seq, a.query(ping(seq)).await) });
    }

    let mut received = Vec::new();
    for _ in 0..8 {
        let envelope = tokio::time::timeout(WAIT, peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        received.push(envelope);
    }

    for envelope in received.into_iter().rev() {
        let seq = match envelope.payload {
            TestPayload::Ping(p) => p.seq,
            other => panic!("unexpected {:?}", other),
        };
        peer.send(Envelope::with_id(envelope.id, pong(seq))).await.unwrap();
    }

    while let Some(joined) = queries.join_next().await {
        let (seq, reply) = joined.unwrap();
        assert_eq!(reply.unwrap(), pong(seq));
    }
    assert_eq!(a.pending_queries(), 0);
}

#[tokio::test]
async fn unmatched_reply_is_delivered_as_incoming() {
    let config = ConnectionConfig::default();
    let ((_a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let stray = CorrelationId::new();
    peer.send(Envelope::with_id(stray, pong(3))).await.unwrap();

    let packet = tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().unwrap();
    assert_eq!(packet.id(), stray);
    assert_eq!(packet.into_payload(), pong(3));
}

#[tokio::test]
async fn duplicate_reply_goes_to_incoming() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });

    let envelope = peer.next().await.unwrap().unwrap();
    peer.send(Envelope::with_id(envelope.id, pong(1))).await.unwrap();
    peer.send(Envelope::with_id(envelope.id, pong(2))).await.unwrap();

    assert_eq!(query.await.unwrap().unwrap(), pong(1));
    let packet = tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().unwrap();
    assert_eq!(packet.id(), envelope.id);
    assert_eq!(packet.payload(), &pong(2));
}

#[tokio::test]
async fn close_fails_pending_queries_and_ends_incoming() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });
    // Once the peer has the frame, the entry is registered.
    peer.next().await.unwrap().unwrap();
    assert_eq!(a.pending_queries(), 1);

    tokio::time::timeout(WAIT, a.close()).await.unwrap();

    let result = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert!(tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().is_none());
    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(a.pending_queries(), 0);

    assert!(matches!(
        a.request(note("late")).await,
        Err(ProtocolError::ConnectionClosed)
    ));
    assert!(matches!(
        a.query(ping(2)).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn peer_eof_closes_connection() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });
    peer.next().await.unwrap().unwrap();
    drop(peer);

    let result = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    tokio::time::timeout(WAIT, a.closed()).await.unwrap();
    assert!(a.is_closed());
    assert!(a_in.recv().await.is_none());
}

#[tokio::test]
async fn unknown_type_terminates_connection() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    peer.send(Envelope::new(TestPayload::from(Mystery {}))).await.unwrap();

    tokio::time::timeout(WAIT, a.closed()).await.unwrap();
    assert!(a_in.recv().await.is_none());
    assert!(matches!(
        a.request(note("after")).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn unregistered_outbound_type_is_rejected_without_closing() {
    let ((a, _a_in), (_b, _b_in)) = connection_pair();

    let err = a.request(TestPayload::from(Mystery {})).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Encode(_)));
    assert!(!a.is_closed());

    a.request(note("still open")).await.unwrap();
}

#[tokio::test]
async fn query_timeout_removes_entry() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let result = a.query_timeout(ping(1), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(ProtocolError::QueryTimeout(_))));
    assert_eq!(a.pending_queries(), 0);

    // A late reply has nobody waiting for it.
    let envelope = peer.next().await.unwrap().unwrap();
    peer.send(Envelope::with_id(envelope.id, pong(1))).await.unwrap();
    let packet = tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().unwrap();
    assert_eq!(packet.id(), envelope.id);
}

#[tokio::test]
async fn configured_deadline_applies_to_query() {
    let config = ConnectionConfig {
        query_timeout_ms: Some(50),
        ..ConnectionConfig::default()
    };
    let ((a, _a_in), _peer) = connection_with_raw_peer(&config);

    let result = a.query(ping(1)).await;
    assert!(matches!(result, Err(ProtocolError::QueryTimeout(_))));
    assert!(!a.is_closed());
}

#[tokio::test]
async fn dropped_query_releases_entry() {
    let config = ConnectionConfig::default();
    let ((a, _a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });
    peer.next().await.unwrap().unwrap();
    assert_eq!(a.pending_queries(), 1);

    query.abort();
    let _ = query.await;
    assert_eq!(a.pending_queries(), 0);
}

#[tokio::test]
async fn query_with_propagates_handler_error() {
    let ((a, _a_in), (_b, mut b_in)) = connection_pair();

    tokio::spawn(async move {
        while let Some(packet) = b_in.recv().await {
            packet.response(note("not a pong")).await.unwrap();
        }
    });

    let result: Result<u32, BoxError> = a
        .query_with(ping(1), |reply| match reply {
            TestPayload::Pong(p) => Ok(p.seq),
            other => Err(UnhandledPayload::new(other.payload_type()).into()),
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "Unhandled payload type 'note'");
}

#[tokio::test]
async fn close_releases_write_stalled_on_unread_peer() {
    // The peer end is kept open but never read, so the pipe fills up.
    let (left, _right) = tokio::io::duplex(16);
    let (a, _a_in) = Connection::open(
        left,
        addr(1000),
        addr(2000),
        registry(),
        &ConnectionConfig::default(),
    );
    let big = "x".repeat(200);

    let query = tokio::spawn({
        let a = a.clone();
        let big = big.clone();
        async move { a.query(note(&big)).await }
    });
    assert!(eventually(|| a.pending_queries() == 1).await);
    let request = tokio::spawn({
        let a = a.clone();
        async move { a.request(note(&big)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!query.is_finished());

    tokio::time::timeout(Duration::from_secs(1), a.close())
        .await
        .unwrap();
    assert_eq!(a.state(), ConnectionState::Closed);

    let result = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    let result = tokio::time::timeout(WAIT, request).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(a.pending_queries(), 0);
}

#[tokio::test]
async fn undrained_incoming_holds_back_replies() {
    let config = ConnectionConfig {
        incoming_buffer: 1,
        ..ConnectionConfig::default()
    };
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });
    let envelope = peer.next().await.unwrap().unwrap();

    peer.send(Envelope::new(note("first"))).await.unwrap();
    peer.send(Envelope::new(note("second"))).await.unwrap();
    peer.send(Envelope::with_id(envelope.id, pong(1))).await.unwrap();

    // "first" fills the buffer; the read loop is parked delivering "second"
    // and has not read the reply yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!query.is_finished());
    assert_eq!(a.pending_queries(), 1);

    let first = tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().unwrap();
    assert_eq!(first.payload(), &note("first"));

    let reply = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert_eq!(reply.unwrap(), pong(1));

    let second = tokio::time::timeout(WAIT, a_in.recv()).await.unwrap().unwrap();
    assert_eq!(second.payload(), &note("second"));
}

#[tokio::test]
async fn buffered_packets_are_discarded_on_close() {
    let config = ConnectionConfig::default();
    let ((a, mut a_in), mut peer) = connection_with_raw_peer(&config);

    let query = tokio::spawn({
        let a = a.clone();
        async move { a.query(ping(1)).await }
    });
    let envelope = peer.next().await.unwrap().unwrap();

    // Wire order guarantees the note is buffered before the reply resolves
    // the query.
    peer.send(Envelope::new(note("buffered"))).await.unwrap();
    peer.send(Envelope::with_id(envelope.id, pong(1))).await.unwrap();
    let reply = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert_eq!(reply.unwrap(), pong(1));

    tokio::time::timeout(WAIT, a.close()).await.unwrap();
    assert!(a_in.recv().await.is_none());
}
