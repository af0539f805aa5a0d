//! Websocket client for the relay, used by integration tests and headless
//! tooling.
//!
//! Provides:
//! - Connection lifecycle (connect, state tracking)
//! - Typed envelope send helpers
//! - A receive channel of decoded server envelopes

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    ClientEnvelope, LinkPermission, ProtocolError, Rotation, ServerEnvelope, Vec3,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A thin websocket client speaking the relay protocol.
///
/// Inbound server envelopes are decoded on a reader task and handed to the
/// application over a channel; the channel closing means the connection is
/// gone.
pub struct RelayClient {
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the websocket writer task.
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application.
    event_rx: Option<mpsc::Receiver<ServerEnvelope>>,

    /// Event sender (held by the reader task).
    event_tx: mpsc::Sender<ServerEnvelope>,

    server_url: String,
}

impl RelayClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ServerEnvelope>> {
        self.event_rx.take()
    }

    /// Connect to the relay and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(err) => {
                log::debug!("connect to {} failed: {err}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        // Writer task: forward outgoing frames to the websocket, then close
        // the connection once the channel drains.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;

        // Reader task: decode inbound frames and hand them to the
        // application. Exiting drops `event_tx`, which closes the event
        // channel and signals disconnection.
        let event_tx = self.event_tx.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEnvelope::decode(text.as_str()) {
                        Ok(envelope) => {
                            if event_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => log::debug!("dropping undecodable server frame: {err}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    /// Close the connection. Queued frames flush first; the writer task
    /// then sends a close frame.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Encode and send one envelope. Fails when not connected.
    pub async fn send(&self, envelope: &ClientEnvelope) -> Result<(), ProtocolError> {
        let text = envelope.encode()?;
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(text).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Ask the relay for a fresh invite-coded session.
    pub async fn create_session(
        &self,
        user_name: Option<String>,
        link_permission: Option<LinkPermission>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEnvelope::CreateSession {
            user_id: None,
            user_name,
            project_xml: None,
            link_permission,
        })
        .await
    }

    /// Join an existing session by invite code.
    pub async fn join_session(
        &self,
        invite_code: impl Into<String>,
        user_name: Option<String>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEnvelope::JoinSession {
            invite_code: invite_code.into(),
            user_id: None,
            user_name,
        })
        .await
    }

    /// Report avatar movement.
    pub async fn send_move(&self, position: Vec3, rotation: Rotation) -> Result<(), ProtocolError> {
        self.send(&ClientEnvelope::Move { position, rotation }).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RelayClient::new("ws://localhost:9080");
        assert_eq!(client.server_url(), "ws://localhost:9080");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = RelayClient::new("ws://localhost:9080");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let client = RelayClient::new("ws://localhost:9080");
        let result = client.send_move(Vec3::ZERO, Rotation::default()).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = RelayClient::new("ws://localhost:9080");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
