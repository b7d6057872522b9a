// Multiaddress codec and resolution
pub mod multiaddr;

// Peer identities and the TLS context they are bound to
pub mod peer;
pub mod tls;

// Configuration and errors
pub mod config;
pub mod error;

// QUIC binding: transport parameters, server callbacks, streams
pub mod quic;

// Upgraded connections and the pipeline that builds them
pub mod connection;
pub mod upgrade;

// Dial/listen manager and its registries
pub mod transport;

// Re-export main types
pub use config::{QuicParams, TokenPolicy, TransportConfig};
pub use connection::{ChannelId, Connection, MuxerSession, QuicStreamMuxer, SecureSession, StreamMuxer};
pub use error::{ErrorKind, Result, TransportError};
pub use multiaddr::{Component, Multiaddr, Protocol, Resolver};
pub use peer::PeerId;
pub use quic::{BiStream, QuicBinding};
pub use tls::TlsContext;
pub use transport::{Transport, TransportBuilder};
pub use upgrade::{ConnectionHandler, ConnectionUpgrader, QuicUpgrader, UpgradeFuture, UpgradePipeline};

pub mod prelude {
    pub use crate::config::{QuicParams, TokenPolicy, TransportConfig};
    pub use crate::connection::{Connection, MuxerSession, SecureSession};
    pub use crate::error::{ErrorKind, Result, TransportError};
    pub use crate::multiaddr::{Multiaddr, Protocol};
    pub use crate::peer::PeerId;
    pub use crate::quic::{BiStream, LivenessProbeHandler, StreamHandler};
    pub use crate::tls::TlsContext;
    pub use crate::transport::Transport;
    pub use crate::upgrade::{ConnectionHandler, ConnectionUpgrader, QuicUpgrader};
}
