//! WebSocket push server
//!
//! Each accepted viewer gets a bounded queue drained by a writer task. The
//! registry only ever sees the queue, so a slow socket never blocks a
//! broadcast for longer than the send timeout. Frames sent by the viewer are
//! read only to notice disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::{PushError, PushSink, SubscriberId, SubscriberRegistry};
use crate::config::PushConfig;

/// Registry handle backed by a connection's outbound queue
struct WsSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<str>>,
}

#[async_trait]
impl PushSink for WsSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    async fn send_json(&self, json: Arc<str>) -> Result<(), PushError> {
        self.tx.send(json).await.map_err(|_| PushError::Closed)
    }
}

/// Accepts viewers and registers them for broadcasts
pub struct PushServer {
    config: PushConfig,
    registry: Arc<SubscriberRegistry>,
}

impl PushServer {
    pub fn new(config: PushConfig, registry: Arc<SubscriberRegistry>) -> Self {
        Self { config, registry }
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: broadcast::Sender<()>,
    ) -> std::io::Result<()> {
        info!(
            "Push server listening on ws://{}{}",
            listener.local_addr()?,
            self.config.path
        );

        let mut shutdown_rx = shutdown.subscribe();
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Push accept error: {}", e);
                        continue;
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("Push server shutting down");
                    return Ok(());
                }
            };

            let registry = self.registry.clone();
            let path = self.config.path.clone();
            let capacity = self.config.channel_capacity.max(1);
            let conn_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer, path, capacity, registry, conn_shutdown).await
                {
                    debug!("Push connection {} ended: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    path: String,
    capacity: usize,
    registry: Arc<SubscriberRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), PushError> {
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, response: Response| {
        if req.uri().path() != path {
            let mut error = ErrorResponse::new(Some(format!(
                "Invalid path: expected '{}', got '{}'",
                path,
                req.uri().path()
            )));
            *error.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
            return Err(error);
        }
        Ok(response)
    })
    .await
    .map_err(|e| PushError::Transport(e.to_string()))?;

    let (mut sink, mut frames) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(capacity);

    let id = registry.next_id();
    registry.register(Arc::new(WsSubscriber { id, tx }));
    info!("Push subscriber {} connected from {}", id, peer);

    // Ends when the registry drops the handle or the socket fails
    let mut writer = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(json.to_string())).await {
                return Err(PushError::Transport(e.to_string()));
            }
        }
        let _ = sink.close().await;
        Ok(())
    });

    let result = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(PushError::Transport(e.to_string())),
            },
            written = &mut writer => {
                break match written {
                    Ok(result) => result,
                    Err(e) => Err(PushError::Transport(e.to_string())),
                };
            }
            _ = shutdown.recv() => break Ok(()),
        }
    };

    if registry.unregister(id) {
        info!("Push subscriber {} disconnected", id);
    } else {
        warn!("Push subscriber {} was evicted", id);
    }
    writer.abort();
    result
}
