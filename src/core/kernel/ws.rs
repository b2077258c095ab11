use crate::core::errors::ConnectorError;
use crate::core::kernel::channel::Channel;
use crate::core::kernel::codec::EnvelopeCodec;
use crate::core::types::ProtocolMessage;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket channel configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Upper bound on a single inbound frame, in bytes
    pub max_frame_bytes: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_frame_bytes: 1 << 20,
        }
    }
}

/// Channel statistics
#[derive(Debug, Default, Clone)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub discarded_frames: u64,
}

/// Tungstenite-based duplex channel
pub struct TungsteniteChannel<C: EnvelopeCodec> {
    url: String,
    label: String,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
    connected: bool,
    codec: C,
    config: WsConfig,
    stats: ChannelStats,
}

impl<C: EnvelopeCodec> TungsteniteChannel<C> {
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `label` - Strategy name for logging/tracing
    /// * `codec` - Envelope codec
    pub fn new(url: String, label: String, codec: C) -> Self {
        Self {
            url,
            label,
            write: None,
            read: None,
            connected: false,
            codec,
            config: WsConfig::default(),
            stats: ChannelStats::default(),
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    #[instrument(skip(self), fields(strategy = %self.label, url = %self.url))]
    pub async fn connect(&mut self) -> Result<(), ConnectorError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                ConnectorError::Timeout(format!(
                    "WebSocket connection to {} timed out after {:?}",
                    self.url, connect_timeout
                ))
            })?
            .map_err(|e| {
                ConnectorError::Transport(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        debug!("WebSocket channel open");
        Ok(())
    }

    async fn send_frame(&mut self, frame: Message) -> Result<(), ConnectorError> {
        let write = self.write.as_mut().ok_or_else(|| {
            ConnectorError::Transport("WebSocket write stream not available".to_string())
        })?;

        let len = frame.len() as u64;
        if let Err(e) = write.send(frame).await {
            self.connected = false;
            return Err(ConnectorError::Transport(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += len;
        Ok(())
    }
}

#[async_trait]
impl<C: EnvelopeCodec> Channel for TungsteniteChannel<C> {
    #[instrument(skip(self, message), fields(strategy = %self.label, kind = %message.kind, request_id = ?message.request_id))]
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), ConnectorError> {
        if !self.connected {
            return Err(ConnectorError::Transport(
                "WebSocket not connected".to_string(),
            ));
        }
        let frame = self.codec.encode(&message)?;
        self.send_frame(frame).await
    }

    async fn recv(&mut self) -> Option<Result<ProtocolMessage, ConnectorError>> {
        loop {
            if !self.connected {
                return None;
            }
            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(frame)) => match frame {
                    Message::Close(_) => {
                        self.connected = false;
                        return None;
                    }
                    Message::Ping(data) => {
                        // Auto-respond to pings at transport level
                        if let Err(e) = self.send_frame(Message::Pong(data)).await {
                            warn!("Failed to send pong response: {}", e);
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    data => {
                        self.stats.messages_received += 1;
                        self.stats.bytes_received += data.len() as u64;
                        if data.len() > self.config.max_frame_bytes {
                            self.stats.discarded_frames += 1;
                            warn!(strategy = %self.label, len = data.len(), "discarding oversized frame");
                            continue;
                        }
                        match self.codec.decode(data) {
                            Ok(Some(message)) => return Some(Ok(message)),
                            Ok(None) => {}
                            Err(e) => {
                                self.stats.discarded_frames += 1;
                                warn!(strategy = %self.label, "discarding undecodable frame: {}", e);
                            }
                        }
                    }
                },
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(e.into()));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(strategy = %self.label))]
    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::JsonEnvelopeCodec;
    use crate::core::types::MessageKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mut channel = TungsteniteChannel::new(
            "wss://127.0.0.1:9/ws".to_string(),
            "primary".to_string(),
            JsonEnvelopeCodec,
        );
        let msg = ProtocolMessage::request(MessageKind::Authorize, 1, json!({}));
        let err = channel.send(msg).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Transport(_)));
        assert!(channel.recv().await.is_none());
        assert!(!channel.is_connected());
    }
}
