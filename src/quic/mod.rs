//! QUIC binding
//!
//! Builds the quinn client and server configurations from [`QuicParams`] and a
//! [`TlsContext`], and carries the server-side callbacks: the address
//! validation policy applied to every incoming connection, the connection
//! observer and the optional inbound stream handler.

pub mod handler;
pub mod stream;

pub use handler::{
    ConnectionObserver, LivenessProbeHandler, LoggingObserver, StreamHandler, MAX_FRAME_LEN,
    PROBE_REQUEST, PROBE_RESPONSE,
};
pub use stream::BiStream;

use std::sync::Arc;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{IdleTimeout, VarInt};
use tracing::{debug, warn};

use crate::config::{QuicParams, TokenPolicy, TransportConfig};
use crate::error::{Result, TransportError};
use crate::tls::TlsContext;

/// Client and server parameter sets for raw QUIC channels
#[derive(Clone)]
pub struct QuicBinding {
    config: TransportConfig,
    tls: TlsContext,
    observer: Arc<dyn ConnectionObserver>,
    stream_handler: Option<Arc<dyn StreamHandler>>,
}

impl std::fmt::Debug for QuicBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicBinding")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("stream_handler", &self.stream_handler.is_some())
            .finish()
    }
}

impl QuicBinding {
    pub fn new(config: TransportConfig, tls: TlsContext) -> Self {
        Self {
            config,
            tls,
            observer: Arc::new(LoggingObserver),
            stream_handler: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stream_handler(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.stream_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn tls(&self) -> &TlsContext {
        &self.tls
    }

    pub fn observer(&self) -> &Arc<dyn ConnectionObserver> {
        &self.observer
    }

    pub fn stream_handler(&self) -> Option<&Arc<dyn StreamHandler>> {
        self.stream_handler.as_ref()
    }

    /// Transport parameters, identical for both roles
    pub fn transport_params(&self) -> Result<quinn::TransportConfig> {
        transport_params(&self.config.quic)
    }

    pub fn client_config(&self) -> Result<quinn::ClientConfig> {
        let crypto = self.tls.client_crypto(self.config.alpn())?;
        let crypto = QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::InvalidTlsContext(format!("QUIC client crypto: {}", e)))?;

        let mut client = quinn::ClientConfig::new(Arc::new(crypto));
        client.transport_config(Arc::new(self.transport_params()?));
        Ok(client)
    }

    pub fn server_config(&self) -> Result<quinn::ServerConfig> {
        let crypto = self.tls.server_crypto(self.config.alpn())?;
        let crypto = QuicServerConfig::try_from(crypto)
            .map_err(|e| TransportError::InvalidTlsContext(format!("QUIC server crypto: {}", e)))?;

        let mut server = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server.transport_config(Arc::new(self.transport_params()?));
        Ok(server)
    }

    /// Applies the token policy to an incoming connection attempt.
    ///
    /// Returns `None` when the attempt was answered with a Retry or refused.
    /// A client that echoes the Retry token arrives again already validated.
    pub(crate) fn admit(&self, incoming: quinn::Incoming) -> Option<quinn::Connecting> {
        let remote = incoming.remote_address();
        if self.config.token_policy == TokenPolicy::Retry && !incoming.remote_address_validated() {
            if let Err(e) = incoming.retry() {
                warn!(%remote, "Retry refused: {}", e);
                e.into_incoming().ignore();
            } else {
                debug!(%remote, "Sent stateless retry");
            }
            return None;
        }

        match incoming.accept() {
            Ok(connecting) => Some(connecting),
            Err(e) => {
                warn!(%remote, "Failed to accept incoming connection: {}", e);
                None
            }
        }
    }
}

fn varint(name: &str, value: u64) -> Result<VarInt> {
    VarInt::from_u64(value)
        .map_err(|_| TransportError::Config(format!("{} does not fit a QUIC varint", name)))
}

fn transport_params(params: &QuicParams) -> Result<quinn::TransportConfig> {
    params.validate()?;

    let idle = IdleTimeout::try_from(params.idle_timeout())
        .map_err(|_| TransportError::Config("idle timeout does not fit a QUIC varint".to_string()))?;
    // quinn keeps a single per-stream window for both directions
    let stream_window = params
        .initial_max_stream_data_bidi_local
        .max(params.initial_max_stream_data_bidi_remote);

    let mut transport = quinn::TransportConfig::default();
    transport
        .max_idle_timeout(Some(idle))
        .receive_window(varint("initial_max_data", params.initial_max_data)?)
        .stream_receive_window(varint("initial_max_stream_data", stream_window)?)
        .max_concurrent_bidi_streams(varint(
            "initial_max_streams_bidi",
            params.initial_max_streams_bidi,
        )?)
        .max_concurrent_uni_streams(varint("initial_max_streams_uni", params.initial_max_streams_uni)?)
        .datagram_receive_buffer_size(Some(params.datagram_recv_buffer_size))
        .datagram_send_buffer_size(params.datagram_send_buffer_size);
    Ok(transport)
}
