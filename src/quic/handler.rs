use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, info};

use super::stream::BiStream;
use crate::error::{Result, TransportError};

/// Longest frame the liveness probe decodes, delimiter excluded
pub const MAX_FRAME_LEN: usize = 1024;

pub const PROBE_REQUEST: &str = "GET /";
pub const PROBE_RESPONSE: &[u8] = b"Hello World!\r\n";

/// Per-connection callback of a listening binding, invoked on the raw channel
/// before any upgrade runs
pub trait ConnectionObserver: Send + Sync {
    fn on_accept(&self, connection: &quinn::Connection);

    fn on_close(&self, connection: &quinn::Connection, reason: &quinn::ConnectionError);
}

/// Default observer: lifecycle logging with the final path statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_accept(&self, connection: &quinn::Connection) {
        info!(remote = %connection.remote_address(), "🔗 Accepted QUIC connection");
    }

    fn on_close(&self, connection: &quinn::Connection, reason: &quinn::ConnectionError) {
        let stats = connection.stats();
        info!(
            remote = %connection.remote_address(),
            %reason,
            rtt = ?stats.path.rtt,
            tx_bytes = stats.udp_tx.bytes,
            rx_bytes = stats.udp_rx.bytes,
            "QUIC connection closed"
        );
    }
}

/// Per-stream callback for inbound streams of an upgraded connection
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, stream: BiStream) -> Result<()>;
}

/// Line-delimited liveness probe: answers `GET /` and half-closes
#[derive(Debug, Default, Clone, Copy)]
pub struct LivenessProbeHandler;

#[async_trait]
impl StreamHandler for LivenessProbeHandler {
    async fn handle_stream(&self, stream: BiStream) -> Result<()> {
        let (mut send, recv) = stream.split();
        let mut reader = BufReader::new(recv);
        let mut frame = Vec::with_capacity(128);

        loop {
            frame.clear();
            // room for a CRLF delimiter after a full-length frame
            let limit = (MAX_FRAME_LEN + 2) as u64;
            let read = (&mut reader).take(limit).read_until(b'\n', &mut frame).await?;
            if read == 0 {
                return Ok(());
            }

            let Some(line) = frame.strip_suffix(b"\n") else {
                if frame.len() > MAX_FRAME_LEN {
                    return Err(TransportError::Stream(format!(
                        "frame exceeds {} bytes",
                        MAX_FRAME_LEN
                    )));
                }
                // peer finished mid-frame
                return Ok(());
            };
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.len() > MAX_FRAME_LEN {
                return Err(TransportError::Stream(format!(
                    "frame exceeds {} bytes",
                    MAX_FRAME_LEN
                )));
            }

            if String::from_utf8_lossy(line).trim() == PROBE_REQUEST {
                debug!("Answering liveness probe");
                send.write_all(PROBE_RESPONSE).await?;
                send.finish()?;
                return Ok(());
            }
            debug!(len = line.len(), "Ignoring frame");
        }
    }
}
