//! Transport error types

use std::io;

use crate::multiaddr::Multiaddr;

/// Errors surfaced by the transport, its resolver and the upgrade pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    TransportClosed,

    #[error("Could not resolve {0} to an IP address")]
    AddressResolution(Multiaddr),

    #[error("Missing IP4/IP6 in multiaddress {0}")]
    MissingHost(Multiaddr),

    #[error("Missing UDP in multiaddress {0}")]
    MissingPort(Multiaddr),

    #[error("No listeners on address {0}")]
    ListenerNotFound(Multiaddr),

    #[error("Already listening on address {0}")]
    AlreadyListening(Multiaddr),

    #[error("Listener limit of {0} reached")]
    ListenerLimitReached(usize),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Muxer negotiation failed: {0}")]
    MuxerNegotiation(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid multiaddress: {0}")]
    InvalidMultiaddr(String),

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("Invalid TLS context: {0}")]
    InvalidTlsContext(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String), // String instead of std::io::Error for Clone
}

/// Error category, independent of the carried detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransportClosed,
    AddressResolutionFailure,
    MissingHost,
    MissingPort,
    ListenerNotFound,
    AlreadyListening,
    ListenerLimitReached,
    HandshakeFailure,
    MuxerNegotiationFailure,
    ConnectTimeout,
    ConnectionClosed,
    Stream,
    InvalidMultiaddr,
    InvalidPeerId,
    InvalidTlsContext,
    Config,
    IoFailure,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::TransportClosed => ErrorKind::TransportClosed,
            TransportError::AddressResolution(_) => ErrorKind::AddressResolutionFailure,
            TransportError::MissingHost(_) => ErrorKind::MissingHost,
            TransportError::MissingPort(_) => ErrorKind::MissingPort,
            TransportError::ListenerNotFound(_) => ErrorKind::ListenerNotFound,
            TransportError::AlreadyListening(_) => ErrorKind::AlreadyListening,
            TransportError::ListenerLimitReached(_) => ErrorKind::ListenerLimitReached,
            TransportError::Handshake(_) => ErrorKind::HandshakeFailure,
            TransportError::MuxerNegotiation(_) => ErrorKind::MuxerNegotiationFailure,
            TransportError::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            TransportError::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            TransportError::Stream(_) => ErrorKind::Stream,
            TransportError::InvalidMultiaddr(_) => ErrorKind::InvalidMultiaddr,
            TransportError::InvalidPeerId(_) => ErrorKind::InvalidPeerId,
            TransportError::InvalidTlsContext(_) => ErrorKind::InvalidTlsContext,
            TransportError::Config(_) => ErrorKind::Config,
            TransportError::Io(_) => ErrorKind::IoFailure,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<quinn::ConnectError> for TransportError {
    fn from(err: quinn::ConnectError) -> Self {
        match err {
            quinn::ConnectError::EndpointStopping => TransportError::TransportClosed,
            other => TransportError::Io(other.to_string()),
        }
    }
}

impl From<quinn::ConnectionError> for TransportError {
    fn from(err: quinn::ConnectionError) -> Self {
        match err {
            quinn::ConnectionError::TimedOut => Self::Handshake("handshake timed out".to_string()),
            quinn::ConnectionError::TransportError(e) => Self::Handshake(e.to_string()),
            quinn::ConnectionError::ConnectionClosed(close) => {
                Self::ConnectionClosed(close.to_string())
            }
            quinn::ConnectionError::ApplicationClosed(close) => {
                Self::ConnectionClosed(close.to_string())
            }
            quinn::ConnectionError::LocallyClosed => {
                Self::ConnectionClosed("closed locally".to_string())
            }
            quinn::ConnectionError::Reset => Self::ConnectionClosed("reset by peer".to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<rustls::Error> for TransportError {
    fn from(err: rustls::Error) -> Self {
        TransportError::InvalidTlsContext(err.to_string())
    }
}

impl From<quinn::WriteError> for TransportError {
    fn from(err: quinn::WriteError) -> Self {
        TransportError::Stream(err.to_string())
    }
}

impl From<quinn::ReadToEndError> for TransportError {
    fn from(err: quinn::ReadToEndError) -> Self {
        TransportError::Stream(err.to_string())
    }
}

impl From<quinn::ReadError> for TransportError {
    fn from(err: quinn::ReadError) -> Self {
        TransportError::Stream(err.to_string())
    }
}

impl From<quinn::ClosedStream> for TransportError {
    fn from(err: quinn::ClosedStream) -> Self {
        TransportError::Stream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_io_failure() {
        let err: TransportError = io::Error::new(io::ErrorKind::AddrInUse, "in use").into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_timed_out_connection_is_handshake_failure() {
        let err: TransportError = quinn::ConnectionError::TimedOut.into();
        assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    }
}
