//! Tokio TCP transport for Ember+ peers
//!
//! Both sides run the same split-socket layout: a reader task that feeds the
//! S101 decoder and a writer task draining an mpsc queue, so outbound frames
//! for one peer are serialized in queue order. Keep-alive requests are
//! answered inside the read loop and never surfaced to the tree layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::s101::{self, FrameDecoder, S101Frame};

pub const DEFAULT_PORT: u16 = 9000;

/// Client-side TCP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpClientConfig {
    pub host: String,
    pub port: u16,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Interval between keep-alive probes
    pub keepalive_interval: Duration,
    /// Read buffer size
    pub buffer_size: usize,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            buffer_size: 64 * 1024,
        }
    }
}

/// Server-side TCP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpServerConfig {
    pub bind_address: SocketAddr,
    /// Depth of each client's outbound frame queue
    pub outbound_queue_depth: usize,
    /// Read buffer size per client
    pub buffer_size: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            outbound_queue_depth: 64,
            buffer_size: 64 * 1024,
        }
    }
}

/// Object-safe seam for sending EmBER payloads to a peer
#[async_trait]
pub trait EmberTransport: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<()>;
}

/// A live client connection to a provider
pub struct EmberConnection {
    outbound: mpsc::Sender<Vec<u8>>,
    peer_addr: SocketAddr,
}

impl EmberConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait]
impl EmberTransport for EmberConnection {
    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.outbound
            .send(s101::encode_ember_frame(&payload))
            .await
            .map_err(|_| TransportError::channel_closed(format!("writer for {}", self.peer_addr)))
    }
}

/// Connect to a provider; returns the connection handle and the channel of
/// inbound EmBER payloads.
pub async fn connect(config: &TcpClientConfig) -> Result<(EmberConnection, mpsc::Receiver<Bytes>)> {
    let address = format!("{}:{}", config.host, config.port);
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| {
            TransportError::timeout(
                format!("connect to {address}"),
                config.connect_timeout.as_millis() as u64,
            )
        })?
        .map_err(|e| {
            TransportError::connection_with_source(format!("failed to connect to {address}"), None, e)
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!(peer = %address, error = %e, "failed to set TCP_NODELAY");
    }
    let peer_addr = stream
        .peer_addr()
        .map_err(|e| TransportError::network_with_source("failed to get peer address", e))?;

    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    tokio::spawn(writer_task(
        write_half,
        outbound_rx,
        Some(config.keepalive_interval),
        peer_addr,
    ));
    tokio::spawn(reader_task(
        read_half,
        outbound_tx.clone(),
        inbound_tx,
        config.buffer_size,
        peer_addr,
    ));

    info!(peer = %peer_addr, "connected to Ember+ provider");
    Ok((
        EmberConnection {
            outbound: outbound_tx,
            peer_addr,
        },
        inbound_rx,
    ))
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    keepalive_interval: Option<Duration>,
    peer_addr: SocketAddr,
) {
    let mut keepalive = keepalive_interval.map(tokio::time::interval);
    loop {
        let frame = match keepalive.as_mut() {
            Some(timer) => tokio::select! {
                frame = outbound.recv() => frame,
                _ = timer.tick() => Some(s101::keepalive_request_frame()),
            },
            None => outbound.recv().await,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(peer = %peer_addr, error = %e, "write failed, closing connection");
            break;
        }
    }
    let _ = write_half.shutdown().await;
    debug!(peer = %peer_addr, "writer task finished");
}

async fn reader_task(
    mut read_half: OwnedReadHalf,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Sender<Bytes>,
    buffer_size: usize,
    peer_addr: SocketAddr,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; buffer_size];
    'read: loop {
        // Stop reading as soon as the consumer of inbound payloads is gone,
        // which releases the outbound sender and lets the writer shut down.
        let result = tokio::select! {
            result = read_half.read(&mut buffer) => result,
            _ = inbound.closed() => break,
        };
        let count = match result {
            Ok(0) => break,
            Ok(count) => count,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "read failed");
                break;
            }
        };
        // The decoder resynchronizes on the next BOF after a bad frame
        let frames = match decoder.feed(&buffer[..count]) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "discarded corrupt frame");
                continue;
            }
        };
        for frame in frames {
            match frame {
                S101Frame::Ember(payload) => {
                    if inbound.send(payload).await.is_err() {
                        break 'read;
                    }
                }
                S101Frame::KeepaliveRequest => {
                    debug!(peer = %peer_addr, "answering keep-alive request");
                    if outbound.send(s101::keepalive_response_frame()).await.is_err() {
                        break 'read;
                    }
                }
                S101Frame::KeepaliveResponse => {
                    debug!(peer = %peer_addr, "keep-alive answered");
                }
            }
        }
    }
    info!(peer = %peer_addr, "peer disconnected");
}

/// Server-assigned connection identity
pub type ClientId = u64;

/// What the accept loop reports to the dispatcher
#[derive(Debug)]
pub enum ServerEvent {
    Connected { client: ClientId, peer_addr: SocketAddr },
    Frame { client: ClientId, payload: Bytes },
    Disconnected { client: ClientId },
}

/// Listening provider endpoint; owns the per-client outbound queues
pub struct TcpServer {
    clients: Arc<DashMap<ClientId, mpsc::Sender<Vec<u8>>>>,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Bind and start accepting; returns the server handle and the channel
    /// of connection/frame events.
    pub async fn bind(config: &TcpServerConfig) -> Result<(TcpServer, mpsc::Receiver<ServerEvent>)> {
        let listener = TcpListener::bind(config.bind_address).await.map_err(|e| {
            TransportError::network_with_source(
                format!("failed to bind {}", config.bind_address),
                e,
            )
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::network_with_source("failed to get local address", e))?;

        let clients: Arc<DashMap<ClientId, mpsc::Sender<Vec<u8>>>> = Arc::new(DashMap::new());
        let (event_tx, event_rx) = mpsc::channel(256);
        tokio::spawn(accept_loop(listener, clients.clone(), event_tx, config.clone()));

        info!(address = %local_addr, "Ember+ provider listening");
        Ok((
            TcpServer {
                clients,
                local_addr,
            },
            event_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    /// Frame and queue a payload for one client
    pub async fn send_to(&self, client: ClientId, payload: Vec<u8>) -> Result<()> {
        let sender = self
            .clients
            .get(&client)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::channel_closed(format!("client {client}")))?;
        sender
            .send(s101::encode_ember_frame(&payload))
            .await
            .map_err(|_| TransportError::channel_closed(format!("client {client}")))
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Arc<DashMap<ClientId, mpsc::Sender<Vec<u8>>>>,
    events: mpsc::Sender<ServerEvent>,
    config: TcpServerConfig,
) {
    let mut next_id: ClientId = 0;
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        next_id += 1;
        let client = next_id;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%client, error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_depth);
        let (payload_tx, mut payload_rx) = mpsc::channel(config.outbound_queue_depth);
        clients.insert(client, outbound_tx.clone());

        tokio::spawn(writer_task(write_half, outbound_rx, None, peer_addr));
        tokio::spawn(reader_task(
            read_half,
            outbound_tx,
            payload_tx,
            config.buffer_size,
            peer_addr,
        ));

        // Bridge payloads into the shared event stream; when the reader ends,
        // drop the client's queue so fan-out stops targeting it.
        let bridge_events = events.clone();
        let bridge_clients = clients.clone();
        tokio::spawn(async move {
            while let Some(payload) = payload_rx.recv().await {
                if bridge_events
                    .send(ServerEvent::Frame { client, payload })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            bridge_clients.remove(&client);
            let _ = bridge_events.send(ServerEvent::Disconnected { client }).await;
        });

        info!(%client, peer = %peer_addr, "client connected");
        if events
            .send(ServerEvent::Connected { client, peer_addr })
            .await
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_config() -> TcpServerConfig {
        TcpServerConfig {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    fn client_config(addr: SocketAddr) -> TcpClientConfig {
        TcpClientConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_client_server_payload_exchange() {
        let (server, mut events) = TcpServer::bind(&server_config()).await.unwrap();
        let (connection, mut inbound) = connect(&client_config(server.local_addr())).await.unwrap();

        let client = match events.recv().await.unwrap() {
            ServerEvent::Connected { client, .. } => client,
            other => panic!("expected Connected, got {other:?}"),
        };

        connection.send(vec![0x60, 0x01, 0x00]).await.unwrap();
        match events.recv().await.unwrap() {
            ServerEvent::Frame { payload, .. } => assert_eq!(payload, vec![0x60, 0x01, 0x00]),
            other => panic!("expected Frame, got {other:?}"),
        }

        server.send_to(client, vec![0x0A, 0x0B]).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), vec![0x0A, 0x0B]);
    }

    #[tokio::test]
    async fn test_server_answers_keepalive() {
        let (_server, _events) = TcpServer::bind(&server_config()).await.unwrap();
        let local = _server.local_addr();

        let mut raw = TcpStream::connect(local).await.unwrap();
        raw.write_all(&s101::keepalive_request_frame()).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 256];
        loop {
            let count = raw.read(&mut buffer).await.unwrap();
            assert!(count > 0, "socket closed before keep-alive response");
            let frames = decoder.feed(&buffer[..count]).unwrap();
            if !frames.is_empty() {
                assert_eq!(frames, vec![S101Frame::KeepaliveResponse]);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_disconnect_reported_and_queue_dropped() {
        let (server, mut events) = TcpServer::bind(&server_config()).await.unwrap();
        let (connection, inbound) = connect(&client_config(server.local_addr())).await.unwrap();

        let client = match events.recv().await.unwrap() {
            ServerEvent::Connected { client, .. } => client,
            other => panic!("expected Connected, got {other:?}"),
        };
        assert!(server.is_connected(client));

        drop(connection);
        drop(inbound);
        match events.recv().await.unwrap() {
            ServerEvent::Disconnected { client: gone } => assert_eq!(gone, client),
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(!server.is_connected(client));
        assert!(server.send_to(client, vec![0x00]).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_error_names_endpoint() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&client_config(addr)).await.err().unwrap();
        let message = err.to_string();
        assert!(message.contains(&addr.port().to_string()), "{message}");
        assert!(message.contains("127.0.0.1"), "{message}");
    }
}
