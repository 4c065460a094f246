//! TCP server exposing one broker to many local clients.
//!
//! Each accepted connection becomes one client endpoint. Outbound envelopes
//! are queued on a channel and written by a dedicated writer task; every
//! inbound frame is handed to the broker in its own task so a slow handler
//! never stalls the connection.

use crate::config::HostConfig;
use crate::error::Result;
use crate::framing::{read_text_frame, write_frame};
use ferry_core::{Broker, ChannelEndpoint, ClientEndpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Handle to a running host server. Dropping shuts down the server.
pub struct HostServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl HostServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the active ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for HostServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub struct HostServer;

impl HostServer {
    /// Bind `addr` (port 0 picks a free port) and serve `broker` in the background.
    pub async fn start(broker: Broker, addr: &str) -> Result<HostServerHandle> {
        Self::start_with_capacity(broker, addr, HostConfig::MAX_CONNECTIONS).await
    }

    /// Like [`HostServer::start`], admitting at most `capacity` clients at once.
    ///
    /// A connection over capacity is closed straight away, before discovery.
    pub async fn start_with_capacity(
        broker: Broker,
        addr: &str,
        capacity: usize,
    ) -> Result<HostServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("Ferry host listening on {} ({} client slots)", addr, capacity);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(capacity));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            broker,
            slots,
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(HostServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        broker: Broker,
        slots: Arc<Semaphore>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Ferry host shutting down");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            let Ok(slot) = slots.clone().try_acquire_owned() else {
                warn!("Refusing client {}: all client slots are taken", peer_addr);
                continue;
            };

            tokio::spawn(Self::serve_client(
                stream,
                peer_addr,
                broker.clone(),
                conn_shutdown_rx.clone(),
                slot,
            ));
        }
    }

    /// Run one client to completion, then give its slot back.
    async fn serve_client(
        stream: TcpStream,
        peer_addr: SocketAddr,
        broker: Broker,
        mut shutdown_rx: watch::Receiver<bool>,
        _slot: OwnedSemaphorePermit,
    ) {
        debug!("Client connected from {}", peer_addr);
        if let Err(e) = Self::handle_connection(stream, peer_addr, &broker, &mut shutdown_rx).await {
            debug!("Connection {} ended: {}", peer_addr, e);
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        broker: &Broker,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (endpoint, mut outgoing) = ChannelEndpoint::pair(peer_addr.to_string());
        let endpoint: ClientEndpoint = Arc::new(endpoint);

        tokio::spawn(async move {
            while let Some(text) = outgoing.recv().await {
                if let Err(e) = write_frame(&mut writer, text.as_bytes()).await {
                    debug!("Writer for {} stopped: {}", peer_addr, e);
                    break;
                }
            }
        });

        broker.announce(std::slice::from_ref(&endpoint));

        let mut in_flight = JoinSet::new();
        let result = Self::read_loop(&mut reader, broker, &endpoint, shutdown_rx, &mut in_flight).await;

        // Let in-flight requests settle so nothing re-attaches after detach.
        while in_flight.join_next().await.is_some() {}
        let removed = broker.detach(&endpoint);
        debug!("Client {} disconnected, {} listener(s) removed", peer_addr, removed);

        result
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        reader: &mut R,
        broker: &Broker,
        endpoint: &ClientEndpoint,
        shutdown_rx: &mut watch::Receiver<bool>,
        in_flight: &mut JoinSet<()>,
    ) -> Result<()> {
        loop {
            let text = tokio::select! {
                result = read_text_frame(reader) => {
                    match result? {
                        Some(text) => text,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            while in_flight.try_join_next().is_some() {}

            let broker = broker.clone();
            let endpoint = endpoint.clone();
            in_flight.spawn(async move {
                broker.on_message(&text, endpoint).await;
            });
        }
    }
}
