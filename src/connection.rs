//! Application-visible connections
//!
//! A [`Connection`] wraps one raw QUIC channel together with the sessions the
//! upgrade pipeline attaches to it. Handles are cheap to clone; the transport
//! itself only tracks the raw channel by [`ChannelId`].

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use quinn::VarInt;
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::peer::PeerId;
use crate::quic::BiStream;

/// Opaque registry key of a raw channel
pub type ChannelId = Uuid;

/// Outcome of the secure-session step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureSession {
    /// Authenticated identity of the remote end, if it presented one
    pub remote_peer: Option<PeerId>,
    /// Negotiated application protocol
    pub protocol: Option<Vec<u8>>,
}

/// Capability to open and accept logical streams over a secure session
#[async_trait]
pub trait StreamMuxer: Send + Sync {
    async fn open_stream(&self) -> Result<BiStream>;

    async fn accept_stream(&self) -> Result<BiStream>;

    fn close(&self, reason: &str);
}

/// Outcome of the muxer-session step
#[derive(Clone)]
pub struct MuxerSession {
    pub protocol: String,
    muxer: Arc<dyn StreamMuxer>,
}

impl std::fmt::Debug for MuxerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxerSession")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl MuxerSession {
    pub fn new(protocol: impl Into<String>, muxer: Arc<dyn StreamMuxer>) -> Self {
        Self {
            protocol: protocol.into(),
            muxer,
        }
    }

    pub fn muxer(&self) -> &Arc<dyn StreamMuxer> {
        &self.muxer
    }
}

/// QUIC's native stream multiplexing
#[derive(Debug, Clone)]
pub struct QuicStreamMuxer {
    connection: quinn::Connection,
}

impl QuicStreamMuxer {
    pub fn new(connection: quinn::Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl StreamMuxer for QuicStreamMuxer {
    async fn open_stream(&self) -> Result<BiStream> {
        let (send, recv) = self.connection.open_bi().await?;
        Ok(BiStream::new(send, recv))
    }

    async fn accept_stream(&self) -> Result<BiStream> {
        let (send, recv) = self.connection.accept_bi().await?;
        Ok(BiStream::new(send, recv))
    }

    fn close(&self, reason: &str) {
        self.connection.close(VarInt::from_u32(0), reason.as_bytes());
    }
}

struct Inner {
    id: ChannelId,
    raw: quinn::Connection,
    initiator: bool,
    local_addr: SocketAddr,
    secure: OnceLock<SecureSession>,
    muxer: OnceLock<MuxerSession>,
    initial_stream: Mutex<Option<BiStream>>,
}

/// Upgraded (or upgrading) logical connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("initiator", &self.inner.initiator)
            .field("remote_addr", &self.remote_addr())
            .field("remote_peer", &self.remote_peer())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        id: ChannelId,
        raw: quinn::Connection,
        initiator: bool,
        local_addr: SocketAddr,
        initial_stream: Option<BiStream>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                raw,
                initiator,
                local_addr,
                secure: OnceLock::new(),
                muxer: OnceLock::new(),
                initial_stream: Mutex::new(initial_stream),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Underlying raw QUIC channel
    pub fn raw(&self) -> &quinn::Connection {
        &self.inner.raw
    }

    /// True when this side dialed
    pub fn is_initiator(&self) -> bool {
        self.inner.initiator
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.raw.remote_address()
    }

    pub fn remote_peer(&self) -> Option<PeerId> {
        self.secure_session().and_then(|s| s.remote_peer.clone())
    }

    pub fn secure_session(&self) -> Option<&SecureSession> {
        self.inner.secure.get()
    }

    pub fn muxer_session(&self) -> Option<&MuxerSession> {
        self.inner.muxer.get()
    }

    pub(crate) fn set_secure_session(&self, session: SecureSession) -> Result<()> {
        self.inner
            .secure
            .set(session)
            .map_err(|_| TransportError::Handshake("secure session already established".to_string()))
    }

    pub(crate) fn set_muxer_session(&self, session: MuxerSession) -> Result<()> {
        self.inner
            .muxer
            .set(session)
            .map_err(|_| TransportError::MuxerNegotiation("muxer session already established".to_string()))
    }

    /// Stream the dialer opened right after the handshake; yields it once
    pub fn take_initial_stream(&self) -> Option<BiStream> {
        self.inner.initial_stream.lock().take()
    }

    /// Opens a logical stream.
    ///
    /// On the dialing side the first call hands out the stream opened after
    /// the handshake, unless it was already taken. The remote accepts streams
    /// in id order, so that stream must carry the first application data.
    pub async fn open_stream(&self) -> Result<BiStream> {
        let muxer = self.require_muxer()?;
        if let Some(stream) = self.take_initial_stream() {
            return Ok(stream);
        }
        muxer.muxer().open_stream().await
    }

    pub async fn accept_stream(&self) -> Result<BiStream> {
        self.require_muxer()?.muxer().accept_stream().await
    }

    pub fn close(&self, reason: &str) {
        if let Some(session) = self.muxer_session() {
            session.muxer().close(reason);
        }
        self.inner.raw.close(VarInt::from_u32(0), reason.as_bytes());
    }

    /// Waits until the raw channel is closed, for whatever reason
    pub async fn closed(&self) -> TransportError {
        self.inner.raw.closed().await.into()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.raw.close_reason().is_some()
    }

    fn require_muxer(&self) -> Result<&MuxerSession> {
        self.muxer_session()
            .ok_or_else(|| TransportError::Stream("connection has no muxer session".to_string()))
    }
}
