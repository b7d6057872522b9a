//! Transport manager
//!
//! Dials and listens on multiaddresses over QUIC, tracks every live listener
//! and raw channel, and hands each channel to an [`UpgradePipeline`]. Closing
//! the transport drains both registries before releasing its worker tasks.

pub mod builder;
mod registry;
pub mod worker;

pub use builder::TransportBuilder;
pub use worker::WorkerSet;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use quinn::VarInt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{ChannelId, Connection};
use crate::error::{Result, TransportError};
use crate::multiaddr::{Multiaddr, Resolver};
use crate::peer::PeerId;
use crate::quic::{BiStream, ConnectionObserver, QuicBinding, StreamHandler};
use crate::tls::SERVER_NAME;
use crate::upgrade::{ConnectionHandler, ConnectionUpgrader, UpgradePipeline};
use registry::{close_signal, ConnectionEntry, ListenerEntry, Registry};

struct Inner {
    binding: QuicBinding,
    resolver: Resolver,
    upgrader: Arc<dyn ConnectionUpgrader>,
    registry: Arc<Registry>,
    workers: Arc<WorkerSet>,
    listener_slots: Arc<Semaphore>,
}

// the last handle going away without close() still releases every socket;
// the worker set aborts its tasks when it drops right after this
impl Drop for Inner {
    fn drop(&mut self) {
        let (listeners, connections) = self.registry.snapshot();
        for (endpoint, _) in listeners {
            endpoint.close(VarInt::from_u32(0), b"transport dropped");
        }
        for (raw, _) in connections {
            raw.close(VarInt::from_u32(0), b"transport dropped");
        }
    }
}

/// QUIC transport; clones share the same registries
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.is_closed())
            .field("listeners", &self.active_listeners())
            .field("connections", &self.active_connections())
            .finish()
    }
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub(crate) fn from_parts(
        binding: QuicBinding,
        resolver: Resolver,
        upgrader: Arc<dyn ConnectionUpgrader>,
    ) -> Self {
        let max_listeners = binding.config().max_listeners;
        Self {
            inner: Arc::new(Inner {
                binding,
                resolver,
                upgrader,
                registry: Arc::new(Registry::default()),
                workers: Arc::new(WorkerSet::new()),
                listener_slots: Arc::new(Semaphore::new(max_listeners)),
            }),
        }
    }

    /// Identity this transport presents to remote peers
    pub fn local_peer_id(&self) -> &PeerId {
        self.inner.binding.tls().peer_id()
    }

    pub fn binding(&self) -> &QuicBinding {
        &self.inner.binding
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.is_closed()
    }

    /// Whether `addr` names a host this transport can reach
    pub fn handles(&self, addr: &Multiaddr) -> bool {
        Resolver::handles(addr)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::TransportClosed);
        }
        Ok(())
    }

    /// Dials `addr` and upgrades the resulting channel.
    ///
    /// The connect timeout covers the QUIC handshake only. A `/p2p` component
    /// in `addr` is the identity the remote must authenticate as.
    pub async fn dial(
        &self,
        addr: &Multiaddr,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Connection> {
        self.ensure_open()?;
        let target = self.inner.resolver.socket_addr_of(addr).await?;
        let expected_peer = addr.peer_id();

        let bind_addr: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let endpoint = quinn::Endpoint::client(bind_addr)?;
        let connecting =
            endpoint.connect_with(self.inner.binding.client_config()?, target, SERVER_NAME)?;

        let timeout = self.inner.binding.config().connect_timeout();
        let raw = match tokio::time::timeout(timeout, connecting).await {
            Ok(connected) => connected?,
            Err(_) => {
                endpoint.close(VarInt::from_u32(0), b"connect timeout");
                return Err(TransportError::ConnectTimeout(timeout));
            }
        };
        debug!(%addr, remote = %target, "QUIC handshake complete");

        let (send, recv) = raw.open_bi().await?;
        let local_addr = endpoint.local_addr()?;

        let id = track_connection(
            &self.inner.registry,
            &self.inner.workers,
            raw.clone(),
            Some(endpoint),
            None,
        )?;
        let connection = Connection::new(
            id,
            raw,
            true,
            local_addr,
            Some(BiStream::new(send, recv)),
        );
        UpgradePipeline::new(connection, self.inner.upgrader.clone())
            .expect_peer(expected_peer)
            .spawn(handler, &self.inner.workers)
            .await
    }

    /// Binds a listener on `addr`; returns once the socket is bound
    pub async fn listen(&self, addr: &Multiaddr, handler: Arc<dyn ConnectionHandler>) -> Result<()> {
        self.ensure_open()?;
        let bind_addr = self.inner.resolver.socket_addr_of(addr).await?;
        if self.inner.registry.has_listener(addr) {
            return Err(TransportError::AlreadyListening(addr.clone()));
        }
        let slot = self
            .inner
            .listener_slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| TransportError::ListenerLimitReached(self.inner.binding.config().max_listeners))?;

        let endpoint = quinn::Endpoint::server(self.inner.binding.server_config()?, bind_addr)?;
        let local_addr = endpoint.local_addr()?;

        let id = Uuid::new_v4();
        let (done, closed) = close_signal();
        self.inner.registry.insert_listener(
            addr.clone(),
            ListenerEntry {
                id,
                endpoint: endpoint.clone(),
                local_addr,
                closed,
                _slot: slot,
            },
        )?;
        info!(%addr, %local_addr, "👂 Listening");

        let acceptor = Acceptor {
            binding: self.inner.binding.clone(),
            upgrader: self.inner.upgrader.clone(),
            registry: Arc::downgrade(&self.inner.registry),
            workers: Arc::downgrade(&self.inner.workers),
            local_addr,
            handler,
        };
        let registry = acceptor.registry.clone();
        let addr = addr.clone();
        self.inner.workers.spawn(async move {
            acceptor.accept_loop(&endpoint).await;
            endpoint.wait_idle().await;
            unregister_listener(&registry, &addr, id);
            let _ = done.send(());
        });
        Ok(())
    }

    /// Closes the listener bound under `addr` and waits for it to unregister
    pub async fn unlisten(&self, addr: &Multiaddr) -> Result<()> {
        let (endpoint, closed) = self
            .inner
            .registry
            .listener(addr)
            .ok_or_else(|| TransportError::ListenerNotFound(addr.clone()))?;

        info!(%addr, "Unlistening");
        endpoint.close(VarInt::from_u32(0), b"unlisten");
        let _ = closed.await;
        Ok(())
    }

    /// Closes every listener and connection, then releases worker tasks.
    ///
    /// Calling it again is a no-op that waits on the already drained set.
    pub async fn close(&self) {
        if self.inner.registry.mark_closed() {
            info!("🛑 Closing transport");
        }

        let (listeners, connections) = self.inner.registry.snapshot();
        debug!(listeners = listeners.len(), connections = connections.len(), "Draining registries");

        let mut pending = Vec::with_capacity(listeners.len() + connections.len());
        for (endpoint, closed) in listeners {
            endpoint.close(VarInt::from_u32(0), b"transport closed");
            pending.push(closed);
        }
        for (raw, closed) in connections {
            raw.close(VarInt::from_u32(0), b"transport closed");
            pending.push(closed);
        }

        let failures = join_all(pending)
            .await
            .into_iter()
            .filter(|outcome| outcome.is_err())
            .count();
        if failures > 0 {
            warn!(failures, "Some channels did not report a clean close");
        }

        self.inner.workers.shutdown().await;
        info!("Transport closed");
    }

    /// One address per live listener, built from its bound socket
    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.inner
            .registry
            .listener_addrs()
            .into_iter()
            .map(Multiaddr::from_socket_addr)
            .collect()
    }

    pub fn active_listeners(&self) -> usize {
        self.inner.registry.listener_count()
    }

    pub fn active_connections(&self) -> usize {
        self.inner.registry.connection_count()
    }
}

/// Everything an acceptor task needs; holds no strong reference back into the
/// transport, so dropping the last `Transport` handle tears the tasks down
#[derive(Clone)]
struct Acceptor {
    binding: QuicBinding,
    upgrader: Arc<dyn ConnectionUpgrader>,
    registry: Weak<Registry>,
    workers: Weak<WorkerSet>,
    local_addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
}

impl Acceptor {
    async fn accept_loop(&self, endpoint: &quinn::Endpoint) {
        let local_addr = self.local_addr;
        while let Some(incoming) = endpoint.accept().await {
            let Some(connecting) = self.binding.admit(incoming) else {
                continue;
            };
            let Some(workers) = self.workers.upgrade() else {
                break;
            };

            let acceptor = self.clone();
            workers.spawn(async move {
                let raw = match connecting.await {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(%local_addr, "Inbound handshake failed: {}", e);
                        return;
                    }
                };
                acceptor.upgrade_inbound(raw).await;
            });
        }
        debug!(%local_addr, "Acceptor stopped");
    }

    async fn upgrade_inbound(&self, raw: quinn::Connection) {
        let observer = self.binding.observer().clone();
        observer.on_accept(&raw);

        let (Some(registry), Some(workers)) = (self.registry.upgrade(), self.workers.upgrade()) else {
            raw.close(VarInt::from_u32(0), b"transport dropped");
            return;
        };
        let Ok(id) = track_connection(&registry, &workers, raw.clone(), None, Some(observer)) else {
            return;
        };
        let connection = Connection::new(id, raw, false, self.local_addr, None);
        let upgrade = UpgradePipeline::new(connection, self.upgrader.clone())
            .spawn(self.handler.clone(), &workers);
        drop((registry, workers));

        if let (Ok(connection), Some(streams)) = (upgrade.await, self.binding.stream_handler()) {
            serve_streams(connection, streams.clone(), &self.workers).await;
        }
    }
}

/// Registers a raw channel and spawns its watcher, which unregisters it on close
fn track_connection(
    registry: &Arc<Registry>,
    workers: &WorkerSet,
    raw: quinn::Connection,
    endpoint: Option<quinn::Endpoint>,
    observer: Option<Arc<dyn ConnectionObserver>>,
) -> Result<ChannelId> {
    let id = Uuid::new_v4();
    let (done, closed) = close_signal();
    registry.insert_connection(
        id,
        ConnectionEntry {
            raw: raw.clone(),
            closed,
        },
    )?;
    debug!(%id, remote = %raw.remote_address(), "Tracking connection");

    let registry = Arc::downgrade(registry);
    workers.spawn(async move {
        let reason = raw.closed().await;
        if let Some(observer) = observer {
            observer.on_close(&raw, &reason);
        }
        // flush the close to the peer before releasing a dialer's socket
        if let Some(endpoint) = endpoint {
            endpoint.wait_idle().await;
        }
        if let Some(registry) = registry.upgrade() {
            registry.remove_connection(&id);
        }
        debug!(%id, "Connection unregistered: {}", reason);
        let _ = done.send(());
    });
    Ok(id)
}

fn unregister_listener(registry: &Weak<Registry>, addr: &Multiaddr, id: Uuid) {
    if let Some(registry) = registry.upgrade() {
        if registry.remove_listener(addr, id) {
            info!(%addr, "Listener closed");
        }
    }
}

/// Hands inbound streams of an upgraded connection to the stream handler
async fn serve_streams(connection: Connection, handler: Arc<dyn StreamHandler>, workers: &Weak<WorkerSet>) {
    loop {
        let stream = match connection.accept_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(id = %connection.id(), "Stream accept ended: {}", e);
                return;
            }
        };
        let Some(workers) = workers.upgrade() else {
            return;
        };
        let handler = handler.clone();
        workers.spawn(async move {
            if let Err(e) = handler.handle_stream(stream).await {
                debug!("Stream handler error: {}", e);
            }
        });
    }
}
