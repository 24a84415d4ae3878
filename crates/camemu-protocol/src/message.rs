use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Ordered, flat parameter map carried by every envelope.
pub type Params = Map<String, Value>;

/// Message verbs used on the control and notification channels.
pub mod values {
    pub const STATUS: &str = "status";
    pub const REQUEST_CONFIGURATION: &str = "request_configuration";
    pub const CONFIGURE: &str = "configure";
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const ARM: &str = "arm";
    pub const DISARM: &str = "disarm";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const RESET: &str = "reset";
    pub const FRAME_READY: &str = "frame_ready";
    pub const FRAME_RELEASE: &str = "frame_release";
    pub const BUFFER_CONFIG: &str = "buffer_config";
    pub const REQUEST_BUFFER_CONFIG: &str = "request_buffer_config";
}

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[serde(rename = "cmd")]
    Command,
    Notify,
    Ack,
    Nack,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "cmd",
            MessageKind::Notify => "notify",
            MessageKind::Ack => "ack",
            MessageKind::Nack => "nack",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "cmd" => Some(MessageKind::Command),
            "notify" => Some(MessageKind::Notify),
            "ack" => Some(MessageKind::Ack),
            "nack" => Some(MessageKind::Nack),
            _ => None,
        }
    }

    /// Replies are the only kinds a control client waits for.
    pub fn is_reply(self) -> bool {
        matches!(self, MessageKind::Ack | MessageKind::Nack)
    }
}

/// Control or notification envelope.
///
/// On the wire this is a JSON object:
///
/// ```text
/// {"msg_type": "cmd", "msg_val": "status", "id": 7, "params": {}, "timestamp": "..."}
/// ```
///
/// `id` is mandatory for commands and replies and optional for notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "msg_type")]
    pub kind: MessageKind,
    #[serde(rename = "msg_val")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ControlMessage {
    /// Build an envelope with explicit fields.
    pub fn new(kind: MessageKind, value: impl Into<String>, id: Option<u32>) -> Self {
        Self {
            kind,
            value: value.into(),
            id,
            params: Params::new(),
            timestamp: Some(now_timestamp()),
        }
    }

    /// A `cmd` request.
    pub fn command(value: impl Into<String>, id: u32) -> Self {
        Self::new(MessageKind::Command, value, Some(id))
    }

    /// A fire-and-forget `notify` message.
    pub fn notify(value: impl Into<String>) -> Self {
        Self::new(MessageKind::Notify, value, None)
    }

    /// The `ack` or `nack` answering this request; value and id are echoed.
    pub fn reply(&self, accepted: bool) -> Self {
        let kind = if accepted {
            MessageKind::Ack
        } else {
            MessageKind::Nack
        };
        Self::new(kind, self.value.clone(), self.id)
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Numeric parameter, rejecting negatives and non-numbers.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Serialize to the JSON wire payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a JSON wire payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| ProtocolError::MalformedMessage(format!("invalid json: {err}")))?;
        let Value::Object(mut object) = value else {
            return Err(malformed("envelope is not a json object"));
        };

        let kind = match object.get("msg_type") {
            Some(Value::String(raw)) => MessageKind::parse(raw)
                .ok_or_else(|| malformed(format!("unknown msg_type '{raw}'")))?,
            Some(_) => return Err(malformed("msg_type is not a string")),
            None => return Err(malformed("missing msg_type")),
        };

        let value = match object.remove("msg_val") {
            Some(Value::String(raw)) => raw,
            Some(_) => return Err(malformed("msg_val is not a string")),
            None => return Err(malformed("missing msg_val")),
        };

        let id = match object.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let id = n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| malformed(format!("id {n} is out of range")))?;
                Some(id)
            }
            Some(_) => return Err(malformed("id is not numeric")),
        };
        if id.is_none() && kind != MessageKind::Notify {
            return Err(malformed(format!("missing id on {} message", kind.as_str())));
        }

        let params = match object.remove("params") {
            None | Some(Value::Null) => Params::new(),
            Some(Value::Object(params)) => params,
            Some(_) => return Err(malformed("params is not an object")),
        };

        let timestamp = match object.remove("timestamp") {
            Some(Value::String(raw)) => Some(raw),
            _ => None,
        };

        Ok(Self {
            kind,
            value,
            id,
            params,
            timestamp,
        })
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{}:{}", self.kind.as_str(), self.value),
        }
    }
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedMessage(reason.into())
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn now_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| format!("{}.{:06}", d.as_secs(), d.subsec_micros()))
        .unwrap_or_else(|_| "0.000000".to_string())
}

/// Source of message ids for one control session.
///
/// Ids start at 1 and wrap modulo 2^32.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: AtomicU32,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a sequence after `last`; the next id returned is `last + 1`.
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: AtomicU32::new(last),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}
