//! Sockets for both directions of the bridge and their lifecycle.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::VmClient;
use crate::config::{BridgeConfig, Endpoint};
use crate::ds_server::DataSourceServer;
use crate::error::BridgeError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Connection {
    pub async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
            Endpoint::Unix(path) => Ok(Connection::Unix(UnixStream::connect(path).await?)),
        }
    }

    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        match self {
            Connection::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            Connection::Unix(stream) => {
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind `endpoint`. A leftover Unix socket file from an earlier run is
    /// replaced and the new one is made owner-only.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
            Endpoint::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
                }
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Connection::Unix(stream))
            }
        }
    }

    /// The endpoint peers should dial; resolves a TCP port of 0 to the one
    /// actually bound.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            Listener::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Owns the data-source listener and the VM client connection.
///
/// The listener comes up first so the VM can call back as soon as the first
/// request is sent; if the VM cannot be reached the listener is torn down
/// again and start-up fails.
pub struct TransportManager {
    client: Arc<VmClient>,
    data_endpoint: Endpoint,
    shutdown_tx: broadcast::Sender<()>,
    server_task: Option<JoinHandle<()>>,
}

impl TransportManager {
    pub async fn start(
        config: &BridgeConfig,
        server: DataSourceServer,
    ) -> Result<Self, BridgeError> {
        let listener =
            Listener::bind(&config.data_listen)
                .await
                .map_err(|source| BridgeError::Bind {
                    endpoint: config.data_listen.to_string(),
                    source,
                })?;
        let data_endpoint = listener
            .local_endpoint()
            .map_err(|source| BridgeError::Bind {
                endpoint: config.data_listen.to_string(),
                source,
            })?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let server_task = tokio::spawn(server.run(listener, shutdown_tx.subscribe()));
        info!(endpoint = %data_endpoint, "data-source server listening");

        let connect = VmClient::connect(&config.vm_address, config.max_frame_len);
        let failure = match timeout(config.connect_timeout, connect).await {
            Ok(Ok(client)) => {
                info!(endpoint = %config.vm_address, "connected to vm");
                return Ok(Self {
                    client: Arc::new(client),
                    data_endpoint,
                    shutdown_tx,
                    server_task: Some(server_task),
                });
            }
            Ok(Err(source)) => BridgeError::Connect {
                endpoint: config.vm_address.to_string(),
                source,
            },
            Err(_) => BridgeError::ConnectTimeout(config.vm_address.to_string()),
        };

        warn!(error = %failure, "vm unreachable; stopping data-source server");
        let _ = shutdown_tx.send(());
        let _ = server_task.await;
        Err(failure)
    }

    pub fn client(&self) -> Arc<VmClient> {
        self.client.clone()
    }

    pub fn data_endpoint(&self) -> &Endpoint {
        &self.data_endpoint
    }

    /// Close the VM connection and stop serving data-source calls.
    pub async fn shutdown(mut self) {
        self.client.close().await;
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
        info!("bridge transports stopped");
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        if let Some(task) = self.server_task.take() {
            let _ = self.shutdown_tx.send(());
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn unix_listener_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = Listener::bind(&Endpoint::unix(&path)).await.unwrap();
        assert_eq!(listener.local_endpoint().unwrap(), Endpoint::unix(&path));
        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn tcp_port_zero_resolves_to_bound_port() {
        let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0")).await.unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        assert!(matches!(&endpoint, Endpoint::Tcp(addr) if !addr.ends_with(":0")));

        let accept = tokio::spawn(async move {
            let conn = listener.accept().await.unwrap();
            let (mut r, _w) = conn.into_split();
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf).await.unwrap();
            buf
        });
        let (_r, mut w) = Connection::connect(&endpoint).await.unwrap().into_split();
        w.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");
    }
}
