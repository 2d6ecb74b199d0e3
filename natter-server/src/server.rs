//! TCP listener and accept loop
//!
//! Owns the registry and the broadcaster and turns every accepted socket
//! into a session task. Shutdown is a broadcast signal; the accept loop
//! stops on the first one while established sessions run to their own end.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use natter_utils::Result;

use crate::broadcaster::Broadcaster;
use crate::config::AppConfig;
use crate::registry::Registry;
use crate::session;

/// The chat server: shared room state plus the accept loop
pub struct ChatServer {
    config: AppConfig,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    shutdown_tx: broadcast::Sender<()>,
}

impl ChatServer {
    /// Assemble a server from validated configuration
    ///
    /// The fan-out worker starts here; the listener does not exist until
    /// [`run`](Self::run).
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster =
            Broadcaster::spawn(Arc::clone(&registry), config.broadcast.queue_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            broadcaster,
            shutdown_tx,
        }
    }

    /// Sender half of the shutdown signal
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Shared session registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Bind the configured address and accept until shutdown
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.listen.addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %addr, error = %e, "failed to bind listener");
                return Err(e.into());
            }
        };

        info!(addr = %addr, "listening");
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "connection accepted");
                        tokio::spawn(session::run_session(
                            stream,
                            peer,
                            Arc::clone(&self.registry),
                            self.broadcaster.clone(),
                            self.config.session.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!(online = self.registry.len(), "shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    use natter_protocol::LineCodec;
    use natter_utils::NatterError;

    use crate::config::ListenConfig;

    #[tokio::test]
    async fn test_accept_loop_stops_on_shutdown() {
        let server = ChatServer::new(AppConfig::default());
        let shutdown = server.shutdown_handle();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let task = tokio::spawn(async move { server.serve(listener).await });

        // Let the loop subscribe before signalling
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.send(());

        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok(), "accept loop did not stop");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_accepted_connection_joins_room() {
        let server = ChatServer::new(AppConfig::default());
        let registry = server.registry();
        let shutdown = server.shutdown_handle();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move { server.serve(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let peer = stream.local_addr().unwrap().to_string();
        let mut framed = Framed::new(stream, LineCodec::new());

        let line = timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("no join announcement")
            .unwrap()
            .unwrap();
        assert_eq!(line, format!("[{peer}]{peer}: online ~ "));
        assert_eq!(registry.len(), 1);

        drop(framed);
        let _ = shutdown.send(());
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    #[tokio::test]
    async fn test_run_reports_bind_failure() {
        // Hold the port so the server cannot take it
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap();

        let config = AppConfig {
            listen: ListenConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            ..AppConfig::default()
        };
        let server = ChatServer::new(config);

        let err = server.run().await.unwrap_err();
        assert!(matches!(err, NatterError::Io(_)));
    }
}
