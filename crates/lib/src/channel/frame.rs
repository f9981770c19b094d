//! Hub wire frames: a JSON object with a required string `type`; every other field is payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const HANDSHAKE_TYPE: &str = "test";
const HANDSHAKE_MESSAGE: &str = "Hello from client!";

/// Wire frame: `{ "type": "...", ...payload }`. The payload never holds a `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("encoding frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Frame {
    pub fn new(typ: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field. A field named `type` is ignored; the frame type is fixed at construction.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.payload.insert(key, value.into());
        }
        self
    }

    /// First frame sent after the connection opens.
    pub fn handshake() -> Self {
        Self::new(HANDSHAKE_TYPE).with_field("message", HANDSHAKE_MESSAGE)
    }

    /// Build a frame from an arbitrary JSON value (e.g. a configured handshake).
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let Value::Object(mut obj) = value else {
            return Err(FrameError::Malformed("frame is not a JSON object".to_string()));
        };
        let typ = match obj.remove("type") {
            Some(Value::String(t)) => t,
            Some(_) => return Err(FrameError::Malformed("\"type\" is not a string".to_string())),
            None => return Err(FrameError::Malformed("missing \"type\"".to_string())),
        };
        Ok(Self { typ, payload: obj })
    }

    /// Parse wire text.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Serialize to wire text.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Every field except `type`.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}
