use crate::core::errors::ConnectorError;
use crate::core::types::ProtocolMessage;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for converting between raw WebSocket frames and envelopes
///
/// Control frames (ping, pong, close) never reach the codec; they are handled
/// at the transport level.
pub trait EnvelopeCodec: Send + Sync + 'static {
    /// Encode an outbound envelope into a frame
    fn encode(&self, message: &ProtocolMessage) -> Result<Message, ConnectorError>;

    /// Decode a data frame
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded envelope
    /// - `Ok(None)` - Frame ignored by the codec
    /// - `Err(error)` - Frame could not be decoded
    fn decode(&self, message: Message) -> Result<Option<ProtocolMessage>, ConnectorError>;
}

/// JSON text-frame codec for `{ kind, requestId, payload }` envelopes
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeCodec;

impl EnvelopeCodec for JsonEnvelopeCodec {
    fn encode(&self, message: &ProtocolMessage) -> Result<Message, ConnectorError> {
        let text = serde_json::to_string(message).map_err(|e| {
            ConnectorError::MalformedResponse(format!("Failed to encode envelope: {}", e))
        })?;
        Ok(Message::Text(text))
    }

    fn decode(&self, message: Message) -> Result<Option<ProtocolMessage>, ConnectorError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                ConnectorError::MalformedResponse(format!(
                    "Invalid UTF-8 in binary frame: {}",
                    e
                ))
            })?,
            _ => return Ok(None),
        };

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text).map(Some).map_err(|e| {
            ConnectorError::MalformedResponse(format!("Failed to parse envelope: {}", e))
        })
    }
}
