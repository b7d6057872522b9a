//! Listener and connection registries
//!
//! Entries are inserted by bind and accept completions and removed only by the
//! watcher task of the channel they describe, once that channel has closed.
//! Each entry carries a shared close signal which fires after removal.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use quinn::VarInt;
use tokio::sync::{oneshot, OwnedSemaphorePermit};
use uuid::Uuid;

use crate::connection::ChannelId;
use crate::error::{Result, TransportError};
use crate::multiaddr::Multiaddr;

/// Resolves once the owning entry has left its registry
pub(crate) type CloseSignal = Shared<oneshot::Receiver<()>>;

pub(crate) fn close_signal() -> (oneshot::Sender<()>, CloseSignal) {
    let (tx, rx) = oneshot::channel();
    (tx, rx.shared())
}

pub(crate) struct ListenerEntry {
    pub id: Uuid,
    pub endpoint: quinn::Endpoint,
    pub local_addr: SocketAddr,
    pub closed: CloseSignal,
    // returned to the listener limit when the entry is dropped
    pub _slot: OwnedSemaphorePermit,
}

pub(crate) struct ConnectionEntry {
    pub raw: quinn::Connection,
    pub closed: CloseSignal,
}

#[derive(Default)]
pub(crate) struct Registry {
    closed: AtomicBool,
    listeners: Mutex<HashMap<Multiaddr, ListenerEntry>>,
    connections: Mutex<HashMap<ChannelId, ConnectionEntry>>,
}

impl Registry {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true on the first call only
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn insert_listener(&self, addr: Multiaddr, entry: ListenerEntry) -> Result<()> {
        let mut listeners = self.listeners.lock();
        if self.is_closed() {
            entry.endpoint.close(VarInt::from_u32(0), b"transport closed");
            return Err(TransportError::TransportClosed);
        }
        if listeners.contains_key(&addr) {
            entry.endpoint.close(VarInt::from_u32(0), b"duplicate listener");
            return Err(TransportError::AlreadyListening(addr));
        }
        listeners.insert(addr, entry);
        Ok(())
    }

    /// Removes the listener under `addr` if it is still the one identified by `id`
    pub fn remove_listener(&self, addr: &Multiaddr, id: Uuid) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.get(addr) {
            Some(entry) if entry.id == id => listeners.remove(addr).is_some(),
            _ => false,
        }
    }

    pub fn has_listener(&self, addr: &Multiaddr) -> bool {
        self.listeners.lock().contains_key(addr)
    }

    pub fn listener(&self, addr: &Multiaddr) -> Option<(quinn::Endpoint, CloseSignal)> {
        self.listeners
            .lock()
            .get(addr)
            .map(|entry| (entry.endpoint.clone(), entry.closed.clone()))
    }

    /// A channel that arrives after close is closed on the spot
    pub fn insert_connection(&self, id: ChannelId, entry: ConnectionEntry) -> Result<()> {
        let mut connections = self.connections.lock();
        if self.is_closed() {
            entry.raw.close(VarInt::from_u32(0), b"transport closed");
            return Err(TransportError::TransportClosed);
        }
        connections.insert(id, entry);
        Ok(())
    }

    pub fn remove_connection(&self, id: &ChannelId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().values().map(|entry| entry.local_addr).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn snapshot(&self) -> (Vec<(quinn::Endpoint, CloseSignal)>, Vec<(quinn::Connection, CloseSignal)>) {
        let listeners = self
            .listeners
            .lock()
            .values()
            .map(|entry| (entry.endpoint.clone(), entry.closed.clone()))
            .collect();
        let connections = self
            .connections
            .lock()
            .values()
            .map(|entry| (entry.raw.clone(), entry.closed.clone()))
            .collect();
        (listeners, connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    fn entry(slots: &Arc<Semaphore>) -> ListenerEntry {
        let endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
        let local_addr = endpoint.local_addr().unwrap();
        ListenerEntry {
            id: Uuid::new_v4(),
            endpoint,
            local_addr,
            closed: close_signal().1,
            _slot: slots.clone().try_acquire_owned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_listener_removal_checks_identity() {
        let registry = Registry::default();
        let slots = Arc::new(Semaphore::new(4));
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001/quic-v1".parse().unwrap();

        let first = entry(&slots);
        let first_id = first.id;
        registry.insert_listener(addr.clone(), first).unwrap();
        assert_eq!(slots.available_permits(), 3);

        let err = registry.insert_listener(addr.clone(), entry(&slots)).unwrap_err();
        assert!(matches!(err, TransportError::AlreadyListening(_)));
        assert_eq!(slots.available_permits(), 3);

        assert!(!registry.remove_listener(&addr, Uuid::new_v4()));
        assert!(registry.remove_listener(&addr, first_id));
        assert_eq!(registry.listener_count(), 0);
        assert_eq!(slots.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_entries() {
        let registry = Registry::default();
        let slots = Arc::new(Semaphore::new(1));
        assert!(registry.mark_closed());
        assert!(!registry.mark_closed());

        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        let err = registry.insert_listener(addr, entry(&slots)).unwrap_err();
        assert!(matches!(err, TransportError::TransportClosed));
        assert_eq!(registry.listener_count(), 0);
    }
}
