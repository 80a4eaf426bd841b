//! Live Socket Codec
//!
//! The socket pushes either one JSON object or an array of objects per text
//! frame. Every object carries a `type` discriminator.

use serde_json::Value;

use super::messages::{QrawlerMessage, SubscriptionCommand};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// An element carried no `type` field.
    #[error("message without type field")]
    MissingType,

    /// Frame was neither an object nor an array.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

const KNOWN_TYPES: [&str; 3] = ["tick", "subscribed", "error"];

/// JSON codec for the live socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Elements of an unknown `type` are skipped so that a new control
    /// message never costs the ticks batched next to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, an element has no `type`,
    /// or a known element fails to deserialize.
    pub fn decode(&self, text: &str) -> Result<Vec<QrawlerMessage>, CodecError> {
        let trimmed = text.trim();
        let elements = match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            _ => {
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {}",
                    trimmed.chars().take(50).collect::<String>()
                )));
            }
        };

        let mut messages = Vec::with_capacity(elements.len());
        for element in elements {
            let kind = element
                .get("type")
                .and_then(Value::as_str)
                .ok_or(CodecError::MissingType)?;
            if !KNOWN_TYPES.contains(&kind) {
                tracing::debug!(kind, "Skipping unknown message type");
                continue;
            }
            messages.push(serde_json::from_value(element)?);
        }
        Ok(messages)
    }

    /// Encode a subscription command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, command: &SubscriptionCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }
}
