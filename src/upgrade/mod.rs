//! Connection upgrade pipeline
//!
//! Turns one raw channel into one [`Connection`] by running the pluggable
//! secure-session step, then the muxer-session step, then the caller's
//! [`ConnectionHandler`]. Each channel gets its own coordination task which
//! reports the outcome exactly once through an [`UpgradeFuture`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::connection::{Connection, MuxerSession, QuicStreamMuxer, SecureSession};
use crate::error::{Result, TransportError};
use crate::peer::PeerId;
use crate::transport::WorkerSet;

/// Negotiation steps the pipeline drives, in order
#[async_trait]
pub trait ConnectionUpgrader: Send + Sync {
    async fn establish_secure_session(&self, connection: &Connection) -> Result<SecureSession>;

    async fn establish_muxer_session(&self, connection: &Connection) -> Result<MuxerSession>;
}

/// Receives every successfully upgraded connection, once
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle_connection(&self, connection: Connection);
}

#[async_trait]
impl<F> ConnectionHandler for F
where
    F: Fn(Connection) + Send + Sync,
{
    async fn handle_connection(&self, connection: Connection) {
        self(connection)
    }
}

/// Upgrader for QUIC channels, which are secured and multiplexed natively.
///
/// The secure step only records the identity authenticated by the TLS
/// handshake; the muxer step wraps QUIC streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuicUpgrader;

pub const QUIC_MUXER_PROTOCOL: &str = "quic-v1";

#[async_trait]
impl ConnectionUpgrader for QuicUpgrader {
    async fn establish_secure_session(&self, connection: &Connection) -> Result<SecureSession> {
        let raw = connection.raw();
        let remote_peer = raw
            .peer_identity()
            .and_then(|identity| identity.downcast::<Vec<CertificateDer<'static>>>().ok())
            .and_then(|chain| chain.first().map(|cert| PeerId::from_certificate(cert.as_ref())));
        let protocol = raw
            .handshake_data()
            .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
            .and_then(|data| data.protocol);

        Ok(SecureSession {
            remote_peer,
            protocol,
        })
    }

    async fn establish_muxer_session(&self, connection: &Connection) -> Result<MuxerSession> {
        let muxer = QuicStreamMuxer::new(connection.raw().clone());
        Ok(MuxerSession::new(QUIC_MUXER_PROTOCOL, Arc::new(muxer)))
    }
}

/// Single-fulfillment result of one channel's upgrade
#[must_use = "futures do nothing unless polled"]
pub struct UpgradeFuture {
    rx: oneshot::Receiver<Result<Connection>>,
}

impl UpgradeFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Connection>>) -> Self {
        Self { rx }
    }
}

impl Future for UpgradeFuture {
    type Output = Result<Connection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // a dropped sender means the task was aborted on close before the handler step
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(TransportError::ConnectionClosed("upgrade aborted".to_string()))
            })
        })
    }
}

/// Reports a successful upgrade once the handler step ends, however it ends
struct Completion {
    tx: Option<oneshot::Sender<Result<Connection>>>,
    connection: Connection,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(self.connection.clone()));
        }
    }
}

/// Upgrade of one raw channel
pub struct UpgradePipeline {
    connection: Connection,
    expected_peer: Option<PeerId>,
    upgrader: Arc<dyn ConnectionUpgrader>,
}

impl UpgradePipeline {
    pub fn new(connection: Connection, upgrader: Arc<dyn ConnectionUpgrader>) -> Self {
        Self {
            connection,
            expected_peer: None,
            upgrader,
        }
    }

    /// Identity the remote must authenticate as; ignored on the accepting side
    pub fn expect_peer(mut self, peer: Option<PeerId>) -> Self {
        self.expected_peer = peer;
        self
    }

    /// Runs the stages on a worker task and returns their outcome
    pub fn spawn(self, handler: Arc<dyn ConnectionHandler>, workers: &WorkerSet) -> UpgradeFuture {
        let (tx, rx) = oneshot::channel();
        workers.spawn(async move {
            match self.establish().await {
                Ok(connection) => {
                    // fulfilled on drop, so an abort inside the handler still reports success
                    let _completion = Completion {
                        tx: Some(tx),
                        connection: connection.clone(),
                    };
                    handler.handle_connection(connection).await;
                }
                Err(e) => {
                    // the caller may have stopped waiting
                    let _ = tx.send(Err(e));
                }
            }
        });
        UpgradeFuture::new(rx)
    }

    /// Secure session, muxer session, handler; in that order.
    ///
    /// On any failure the channel is closed and the handler is not called.
    pub async fn run(self, handler: Arc<dyn ConnectionHandler>) -> Result<Connection> {
        let connection = self.establish().await?;
        handler.handle_connection(connection.clone()).await;
        Ok(connection)
    }

    /// Both negotiation stages, raced against the channel closing
    async fn establish(self) -> Result<Connection> {
        let connection = self.connection.clone();
        let stages = tokio::select! {
            biased;
            result = self.upgrade() => result,
            reason = connection.closed() => Err(reason),
        };
        let stages = stages.and_then(|()| match connection.raw().close_reason() {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        });

        match stages {
            Ok(()) => {
                debug!(id = %connection.id(), peer = ?connection.remote_peer(), "Connection upgraded");
                Ok(connection)
            }
            Err(e) => {
                warn!(id = %connection.id(), remote = %connection.remote_addr(), "Upgrade failed: {}", e);
                connection.close(&e.to_string());
                Err(e)
            }
        }
    }

    async fn upgrade(&self) -> Result<()> {
        let connection = &self.connection;

        let secure = self.upgrader.establish_secure_session(connection).await?;
        if connection.is_initiator() {
            if let Some(expected) = &self.expected_peer {
                match &secure.remote_peer {
                    Some(actual) if actual == expected => {}
                    Some(actual) => {
                        return Err(TransportError::Handshake(format!(
                            "peer id mismatch: expected {}, got {}",
                            expected, actual
                        )))
                    }
                    None => {
                        return Err(TransportError::Handshake(format!(
                            "remote did not authenticate as {}",
                            expected
                        )))
                    }
                }
            }
        }
        connection.set_secure_session(secure)?;
        debug!(id = %connection.id(), "Secure session established");

        let muxer = self.upgrader.establish_muxer_session(connection).await?;
        connection.set_muxer_session(muxer)?;
        debug!(id = %connection.id(), "Muxer session established");
        Ok(())
    }
}
