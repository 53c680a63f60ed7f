//! In-process adapter for unit tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use relay_config::DebugAdapterEntry;
use relay_rpc::transport::{read_frame, FrameWriter};
use relay_rpc::{CapabilityMap, ClientOptions, DapWire, ProtocolClient};
use serde_json::{json, Value};
use tokio::io::{BufReader, DuplexStream, ReadHalf};

use crate::session::{DebugSession, EventStream};

/// The far end of a session, driven step by step by the test.
pub(crate) struct FakeAdapter {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter,
    seq: AtomicI64,
}

impl FakeAdapter {
    pub(crate) async fn recv(&mut self) -> Value {
        read_frame(&mut self.reader)
            .await
            .unwrap()
            .expect("adapter channel closed")
    }

    /// Next request, which must be `command`.
    pub(crate) async fn expect(&mut self, command: &str) -> Value {
        let request = self.recv().await;
        assert_eq!(request["command"], command, "unexpected request {request}");
        request
    }

    pub(crate) async fn respond(&self, request: &Value, body: Value) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.writer
            .write(&json!({
                "seq": seq,
                "type": "response",
                "request_seq": request["seq"],
                "command": request["command"],
                "success": true,
                "body": body
            }))
            .await
            .unwrap();
    }

    pub(crate) async fn fail(&self, request: &Value, message: &str) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.writer
            .write(&json!({
                "seq": seq,
                "type": "response",
                "request_seq": request["seq"],
                "command": request["command"],
                "success": false,
                "message": message
            }))
            .await
            .unwrap();
    }

    pub(crate) async fn event(&self, name: &str, body: Value) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.writer
            .write(&json!({"seq": seq, "type": "event", "event": name, "body": body}))
            .await
            .unwrap();
    }
}

pub(crate) fn adapter_entry() -> DebugAdapterEntry {
    let mut launch = toml::Table::new();
    launch.insert("request".into(), toml::Value::String("launch".into()));
    launch.insert("program".into(), toml::Value::String("${program}".into()));
    DebugAdapterEntry {
        command: "fake-adapter".into(),
        args: Vec::new(),
        adapter_id: "fake".into(),
        configuration_done: None,
        initialize: None,
        launch,
        attach: toml::Table::new(),
    }
}

pub(crate) fn connect(
    language: &str,
    adapter: DebugAdapterEntry,
) -> (Arc<DebugSession>, EventStream, FakeAdapter) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (our_read, our_write) = tokio::io::split(ours);
    let (their_read, their_write) = tokio::io::split(theirs);
    let client = ProtocolClient::connect(
        format!("{language}-debug"),
        DapWire,
        our_read,
        our_write,
        ClientOptions::default(),
        CapabilityMap::default(),
    );
    let (session, events) = DebugSession::attach(language, adapter, client);
    let fake = FakeAdapter {
        reader: BufReader::new(their_read),
        writer: FrameWriter::new(their_write),
        seq: AtomicI64::new(1),
    };
    (session, events, fake)
}
