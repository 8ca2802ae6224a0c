//! WebSocket server loop for the relay

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use votemesh_core::{RelayConfig, VotemeshError, VotemeshResult};

use crate::registry::{create_relay_registry, PeerConnection, RelayFrame, SharedRelayRegistry};
use crate::session::RelaySession;

/// How long shutdown waits for clients to acknowledge the close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct RelayServer {
    listener: TcpListener,
    registry: SharedRelayRegistry,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> VotemeshResult<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| VotemeshError::NetworkError(format!("{}: {}", config.listen_addr, e)))?;
        Ok(Self::from_listener(
            listener,
            create_relay_registry(config.default_room.clone()),
        ))
    }

    pub fn from_listener(listener: TcpListener, registry: SharedRelayRegistry) -> Self {
        Self { listener, registry }
    }

    pub fn local_addr(&self) -> VotemeshResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| VotemeshError::NetworkError(e.to_string()))
    }

    pub fn registry(&self) -> SharedRelayRegistry {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` resolves, then close every socket
    pub async fn serve<F>(self, shutdown: F) -> VotemeshResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(registry, stream, addr).await {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
            }
        }

        info!("Shutting down relay server");
        let closing = registry.close_all();
        info!("Closing {} connections", closing);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while registry.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connections still open after shutdown grace",
                registry.connection_count()
            );
        }
        Ok(())
    }
}

async fn handle_connection(
    registry: SharedRelayRegistry,
    stream: TcpStream,
    addr: SocketAddr,
) -> VotemeshResult<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| VotemeshError::ConnectionFailed(e.to_string()))?;
    info!("New connection from {}", addr);

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                RelayFrame::Text(text) => sink.send(Message::Text(text)).await,
                RelayFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection = PeerConnection::new(registry.next_connection_id(), tx);
    let mut session = RelaySession::new(registry, connection);
    session.welcome();

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(&text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => session.handle_text(&text),
                Err(_) => debug!("Dropping non-UTF-8 frame from {}", addr),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Connection error from {}: {}", addr, e);
                break;
            }
        }
    }

    info!("Connection from {} closed", addr);
    session.close();
    Ok(())
}
