//! FTP front-end
//!
//! Accepts control connections, enforces connection limits and runs one
//! [`session::Session`] task per client. Every filesystem command a
//! session receives becomes a single [`FilesystemAdapter`] call.

pub mod command;
pub mod listing;
pub mod session;

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::adapter::FilesystemAdapter;
use crate::config::ServerConfig;
use crate::error::Result;

use session::Session;

/// Why a connection was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ServerFull,
    TooManyFromAddress,
}

/// Global and per-address connection accounting
pub struct ConnectionLimits {
    total: Arc<Semaphore>,
    per_ip: DashMap<IpAddr, usize>,
    max_per_ip: usize,
}

impl ConnectionLimits {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            total: Arc::new(Semaphore::new(max_total)),
            per_ip: DashMap::new(),
            max_per_ip,
        }
    }

    /// Admit a connection from `ip`. The returned permit must be held for
    /// the life of the session; [`ConnectionLimits::release`] undoes the
    /// per-address count.
    pub fn try_admit(&self, ip: IpAddr) -> std::result::Result<OwnedSemaphorePermit, Rejection> {
        let permit = self
            .total
            .clone()
            .try_acquire_owned()
            .map_err(|_| Rejection::ServerFull)?;

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return Err(Rejection::TooManyFromAddress);
        }
        *count += 1;
        Ok(permit)
    }

    pub fn release(&self, ip: IpAddr) {
        if let Entry::Occupied(mut entry) = self.per_ip.entry(ip) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    pub fn active_from(&self, ip: IpAddr) -> usize {
        self.per_ip.get(&ip).map(|count| *count).unwrap_or(0)
    }
}

/// Round-robin allocator over the configured passive port range
pub struct PassivePorts {
    range: RangeInclusive<u16>,
    cursor: AtomicU32,
}

impl PassivePorts {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            cursor: AtomicU32::new(0),
        }
    }

    /// Ports to try for the next passive listener, starting at the cursor
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        let start = u32::from(*self.range.start());
        let len = u32::from(*self.range.end()) - start + 1;
        let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(move |i| (start + (offset + i) % len) as u16)
    }
}

/// State shared by every session
pub struct ServerContext {
    pub adapter: Arc<FilesystemAdapter>,
    pub config: ServerConfig,
    pub passive_ports: Option<PassivePorts>,
}

/// Stops a running [`FtpServer`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// FTP server bound to its control port
pub struct FtpServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    limits: Arc<ConnectionLimits>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FtpServer {
    /// Bind the control listener
    pub async fn bind(config: ServerConfig, adapter: Arc<FilesystemAdapter>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        let limits = Arc::new(ConnectionLimits::new(
            config.max_connections,
            config.max_connections_per_ip,
        ));
        let passive_ports = config.passive_ports.clone().map(PassivePorts::new);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener,
            context: Arc::new(ServerContext {
                adapter,
                config,
                passive_ports,
            }),
            limits,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shut down
    pub async fn serve(self) -> Result<()> {
        let FtpServer {
            listener,
            context,
            limits,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;

        info!("FTP server listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_rx.changed() => break,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let permit = match limits.try_admit(peer.ip()) {
                Ok(permit) => permit,
                Err(reason) => {
                    warn!("Rejecting connection from {}: {:?}", peer, reason);
                    tokio::spawn(reject(stream, reason));
                    continue;
                }
            };

            let context = context.clone();
            let limits = limits.clone();
            let shutdown = shutdown_rx.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let _release = scopeguard::guard(peer.ip(), |ip| limits.release(ip));

                info!("Client connected: {}", peer);
                match Session::new(context, stream, peer, shutdown) {
                    Ok(session) => {
                        if let Err(e) = session.run().await {
                            error!("Session {} failed: {}", peer, e);
                        }
                    }
                    Err(e) => error!("Failed to start session for {}: {}", peer, e),
                }
                info!("Client disconnected: {}", peer);
            });
        }

        info!("FTP server stopped accepting connections");
        Ok(())
    }
}

async fn reject(mut stream: TcpStream, reason: Rejection) {
    let text = match reason {
        Rejection::ServerFull => "421 Too many users, try again later\r\n",
        Rejection::TooManyFromAddress => "421 Too many connections from your address\r\n",
    };
    if let Err(e) = stream.write_all(text.as_bytes()).await {
        debug!("Failed to send rejection: {}", e);
    }
    let _ = stream.shutdown().await;
}
