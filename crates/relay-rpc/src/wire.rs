//! Envelope formats for the two channels.
//!
//! The analysis channel speaks JSON-RPC 2.0 (`id`/`method`/`params`,
//! `result`|`error`). The debug channel uses sequence-numbered envelopes
//! (`seq`/`type`/`command`/`arguments`, `request_seq`/`success`). Both
//! decode into the same [`Inbound`] shape so the client engine does not
//! care which one it is driving.

use serde_json::{json, Value};

use crate::error::{ErrorPayload, RpcError};

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response {
        /// Id of the originating request.
        id: i64,
        /// Result body or the peer's error.
        outcome: Result<Value, ErrorPayload>,
    },
    /// Event or notification, no originating id.
    Event { name: String, body: Value },
    /// Request initiated by the peer.
    Request { id: Value, method: String, params: Value },
}

/// Encodes outgoing envelopes and classifies incoming ones.
pub trait WireFormat: Send + Sync + 'static {
    /// Short label used in logs.
    fn label(&self) -> &'static str;
    /// Envelope for a request with a fresh id.
    fn request(&self, id: i64, method: &str, params: Value) -> Value;
    /// Envelope for a notification. `seq` is only used by formats that
    /// number every message.
    fn notification(&self, seq: i64, method: &str, params: Value) -> Value;
    /// Failure reply to a peer-initiated request.
    fn error_reply(&self, seq: i64, request_id: &Value, method: &str, message: &str) -> Value;
    /// Classify an inbound message.
    fn decode(&self, message: Value) -> Result<Inbound, RpcError>;
}

/// JSON-RPC 2.0 envelopes (analysis channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcWire;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

impl WireFormat for JsonRpcWire {
    fn label(&self) -> &'static str {
        "jsonrpc"
    }

    fn request(&self, id: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn notification(&self, _seq: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "method": method, "params": params })
    }

    fn error_reply(&self, _seq: i64, request_id: &Value, _method: &str, message: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "error": { "code": METHOD_NOT_FOUND, "message": message }
        })
    }

    fn decode(&self, mut message: Value) -> Result<Inbound, RpcError> {
        let id = message.get_mut("id").map(Value::take);
        let method = message
            .get("method")
            .map(|m| {
                m.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RpcError::Protocol("method must be a string".into()))
            })
            .transpose()?;
        let params = message.get_mut("params").map(Value::take).unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Inbound::Request { id, method, params }),
            (Some(id), None) => {
                let id = id
                    .as_i64()
                    .ok_or_else(|| RpcError::Protocol(format!("response id must be an integer, got {id}")))?;
                let outcome = match message.get_mut("error").map(Value::take) {
                    Some(err) if !err.is_null() => Err(ErrorPayload {
                        code: err.get("code").and_then(Value::as_i64),
                        message: err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string(),
                        data: err.get("data").cloned(),
                    }),
                    _ => Ok(message.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
                };
                Ok(Inbound::Response { id, outcome })
            }
            (None, Some(method)) => Ok(Inbound::Event { name: method, body: params }),
            (None, None) => Err(RpcError::Protocol(
                "message has neither id nor method".into(),
            )),
        }
    }
}

/// Sequence-numbered envelopes (debug channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct DapWire;

impl WireFormat for DapWire {
    fn label(&self) -> &'static str {
        "dap"
    }

    fn request(&self, id: i64, method: &str, params: Value) -> Value {
        let mut msg = json!({ "seq": id, "type": "request", "command": method });
        if !params.is_null() {
            msg["arguments"] = params;
        }
        msg
    }

    fn notification(&self, seq: i64, method: &str, params: Value) -> Value {
        json!({ "seq": seq, "type": "event", "event": method, "body": params })
    }

    fn error_reply(&self, seq: i64, request_id: &Value, method: &str, message: &str) -> Value {
        json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_id,
            "command": method,
            "success": false,
            "message": message
        })
    }

    fn decode(&self, mut message: Value) -> Result<Inbound, RpcError> {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Protocol("message without type".into()))?
            .to_string();
        let body = message.get_mut("body").map(Value::take).unwrap_or(Value::Null);

        match kind.as_str() {
            "response" => {
                let id = message
                    .get("request_seq")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| RpcError::Protocol("response without request_seq".into()))?;
                let success = message
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let outcome = if success {
                    Ok(body)
                } else {
                    Err(dap_failure(&message, body))
                };
                Ok(Inbound::Response { id, outcome })
            }
            "event" => {
                let name = message
                    .get("event")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Protocol("event without name".into()))?
                    .to_string();
                Ok(Inbound::Event { name, body })
            }
            "request" => {
                let method = message
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Protocol("request without command".into()))?
                    .to_string();
                let params = message
                    .get_mut("arguments")
                    .map(Value::take)
                    .unwrap_or(Value::Null);
                let id = message.get("seq").cloned().unwrap_or(Value::Null);
                Ok(Inbound::Request { id, method, params })
            }
            other => Err(RpcError::Protocol(format!("unknown message type '{other}'"))),
        }
    }
}

/// Failure text of an unsuccessful debug response: the structured
/// `body.error.format` when present, else the short `message`.
fn dap_failure(message: &Value, body: Value) -> ErrorPayload {
    let detailed = body
        .pointer("/error/format")
        .and_then(Value::as_str)
        .map(str::to_string);
    let short = message
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    ErrorPayload {
        code: body.pointer("/error/id").and_then(Value::as_i64),
        message: detailed
            .or(short)
            .unwrap_or_else(|| "request failed".to_string()),
        data: (!body.is_null()).then_some(body),
    }
}
