//! WebSocket monitor for the lifecycle event bus.
//!
//! [`BridgeMonitor`] serves a WebSocket endpoint where external tools
//! (dashboards, test harnesses) receive every bus event as one JSON text
//! frame.  Inbound frames are ignored apart from `Close`.

use std::net::SocketAddr;
use std::sync::Arc;

use actbridge_types::{BridgeError, Event};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;

/// Streams bus events to WebSocket clients.
#[derive(Clone)]
pub struct BridgeMonitor {
    bus: Arc<EventBus>,
}

impl BridgeMonitor {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Serialise one event as a monitor frame.
    pub fn encode(event: &Event) -> Result<String, BridgeError> {
        serde_json::to_string(event).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    /// Start a WebSocket server on `addr`.
    ///
    /// Runs until the listener fails to bind; per-client failures are logged
    /// and only end that client's session.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Config(format!("monitor bind error on {addr}: {e}")))?;
        info!(%addr, "bridge monitor listening");
        self.serve(listener).await;
        Ok(())
    }

    async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let monitor = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = monitor.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "monitor client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "monitor accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream).await.map_err(|e| {
            BridgeError::Serialization(format!("ws handshake from {peer}: {e}"))
        })?;
        debug!(peer = %peer, "monitor client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let json = Self::encode(&event)?;
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "monitor client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "monitor client disconnected");
        Ok(())
    }
}
