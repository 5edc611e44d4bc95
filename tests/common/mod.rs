//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use agent_builder::config::ConnectionConfig;
use agent_builder::protocol::EnvelopeCodec;
use agent_builder::{CodecRegistry, Connection, Incoming, Payload, PayloadType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
}

impl PayloadType for Ping {
    const TYPE_ID: &'static str = "ping";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
}

impl PayloadType for Pong {
    const TYPE_ID: &'static str = "pong";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl PayloadType for Note {
    const TYPE_ID: &'static str = "note";
}

/// Only registered on the raw peer side in tests that need an id the
/// connection does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mystery {}

impl PayloadType for Mystery {
    const TYPE_ID: &'static str = "mystery";
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestPayload {
    Ping(Ping),
    Pong(Pong),
    Note(Note),
    Mystery(Mystery),
}

impl Payload for TestPayload {
    fn payload_type(&self) -> &'static str {
        match self {
            TestPayload::Ping(_) => Ping::TYPE_ID,
            TestPayload::Pong(_) => Pong::TYPE_ID,
            TestPayload::Note(_) => Note::TYPE_ID,
            TestPayload::Mystery(_) => Mystery::TYPE_ID,
        }
    }

    fn to_fields(&self) -> Result<Value, serde_json::Error> {
        match self {
            TestPayload::Ping(v) => serde_json::to_value(v),
            TestPayload::Pong(v) => serde_json::to_value(v),
            TestPayload::Note(v) => serde_json::to_value(v),
            TestPayload::Mystery(v) => serde_json::to_value(v),
        }
    }
}

impl From<Ping> for TestPayload {
    fn from(v: Ping) -> Self {
        TestPayload::Ping(v)
    }
}

impl From<Pong> for TestPayload {
    fn from(v: Pong) -> Self {
        TestPayload::Pong(v)
    }
}

impl From<Note> for TestPayload {
    fn from(v: Note) -> Self {
        TestPayload::Note(v)
    }
}

impl From<Mystery> for TestPayload {
    fn from(v: Mystery) -> Self {
        TestPayload::Mystery(v)
    }
}

pub fn ping(seq: u32) -> TestPayload {
    Ping { seq }.into()
}

pub fn pong(seq: u32) -> TestPayload {
    Pong { seq }.into()
}

pub fn note(text: &str) -> TestPayload {
    Note { text: text.into() }.into()
}

/// Registry with every type except `Mystery`.
pub fn registry() -> Arc<CodecRegistry<TestPayload>> {
    let registry = CodecRegistry::new()
        .with::<Ping>()
        .and_then(|r| r.with::<Pong>())
        .and_then(|r| r.with::<Note>())
        .unwrap();
    Arc::new(registry)
}

/// Registry that also knows `Mystery`.
pub fn extended_registry() -> Arc<CodecRegistry<TestPayload>> {
    let mut registry = CodecRegistry::new();
    registry.register::<Ping>().unwrap();
    registry.register::<Pong>().unwrap();
    registry.register::<Note>().unwrap();
    registry.register::<Mystery>().unwrap();
    Arc::new(registry)
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub type Side = (Connection<TestPayload>, Incoming<TestPayload>);

/// Two connections wired to each other over an in-memory pipe.
pub fn connection_pair() -> (Side, Side) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let config = ConnectionConfig::default();
    let a = Connection::open(left, addr(1000), addr(2000), registry(), &config);
    let b = Connection::open(right, addr(2000), addr(1000), registry(), &config);
    (a, b)
}

/// Raw framed end of a pipe, driven by hand to script arbitrary peer behaviour.
pub type RawPeer = Framed<DuplexStream, EnvelopeCodec<TestPayload>>;

/// A connection whose peer is a raw framed stream that knows `Mystery`.
pub fn connection_with_raw_peer(config: &ConnectionConfig) -> (Side, RawPeer) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let side = Connection::open(left, addr(1000), addr(2000), registry(), config);
    let peer = Framed::new(
        right,
        EnvelopeCodec::new(extended_registry(), config.max_frame_length),
    );
    (side, peer)
}

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
