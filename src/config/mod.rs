//! Configuration for the transport and its QUIC bindings
//!
//! Values can be set in code through the builder methods, or loaded from an
//! optional file plus `MQUIC_`-prefixed environment variables (nested keys use
//! `__`, e.g. `MQUIC_QUIC__IDLE_TIMEOUT_MS=20000`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Largest value a QUIC variable-length integer can carry
const VARINT_MAX: u64 = (1 << 62) - 1;

/// QUIC transport parameters shared by client and server bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuicParams {
    /// Maximum idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection-level flow control window
    pub initial_max_data: u64,
    /// Stream window for locally initiated bidirectional streams
    pub initial_max_stream_data_bidi_local: u64,
    /// Stream window for remotely initiated bidirectional streams
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub datagram_send_buffer_size: usize,
    pub datagram_recv_buffer_size: usize,
}

impl Default for QuicParams {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 50_000,
            initial_max_data: 10_000_000,
            initial_max_stream_data_bidi_local: 1_000_000,
            initial_max_stream_data_bidi_remote: 1_000_000,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            datagram_send_buffer_size: 100_000,
            datagram_recv_buffer_size: 100_000,
        }
    }
}

impl QuicParams {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == 0 {
            return Err(TransportError::Config("idle_timeout_ms must be greater than 0".to_string()));
        }
        let windows = [
            ("initial_max_data", self.initial_max_data),
            ("initial_max_stream_data_bidi_local", self.initial_max_stream_data_bidi_local),
            ("initial_max_stream_data_bidi_remote", self.initial_max_stream_data_bidi_remote),
            ("initial_max_streams_bidi", self.initial_max_streams_bidi),
            ("initial_max_streams_uni", self.initial_max_streams_uni),
        ];
        for (name, value) in windows {
            if value == 0 || value > VARINT_MAX {
                return Err(TransportError::Config(format!(
                    "{} must be between 1 and 2^62-1, got {}",
                    name, value
                )));
            }
        }
        if self.idle_timeout_ms > VARINT_MAX {
            return Err(TransportError::Config("idle_timeout_ms does not fit a QUIC varint".to_string()));
        }
        if self.datagram_send_buffer_size == 0 || self.datagram_recv_buffer_size == 0 {
            return Err(TransportError::Config("datagram buffers must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// How a listener validates client addresses before accepting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPolicy {
    /// Stateless Retry with an address validation token before any state is kept
    #[default]
    Retry,
    /// Accept without address validation (testing and trusted networks only)
    Insecure,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connect and handshake timeout for dials, in milliseconds
    pub connect_timeout_ms: u64,
    pub quic: QuicParams,
    pub token_policy: TokenPolicy,
    /// Upper bound on concurrently live listeners (one acceptor task each)
    pub max_listeners: usize,
    pub alpn_protocols: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 150_000,
            quic: QuicParams::default(),
            token_policy: TokenPolicy::default(),
            max_listeners: 16,
            alpn_protocols: vec!["libp2p".to_string()],
        }
    }
}

impl TransportConfig {
    /// Load from an optional file, then `MQUIC_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix("MQUIC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TransportError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(TransportError::Config("connect_timeout_ms must be greater than 0".to_string()));
        }
        if self.max_listeners == 0 {
            return Err(TransportError::Config("max_listeners must be greater than 0".to_string()));
        }
        if self.alpn_protocols.is_empty() {
            return Err(TransportError::Config(
                "At least one ALPN protocol must be specified".to_string(),
            ));
        }
        self.quic.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn alpn(&self) -> Vec<Vec<u8>> {
        self.alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    /// Sub-millisecond remainders round up, so any non-zero timeout stays non-zero
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.connect_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn with_quic_params(mut self, params: QuicParams) -> Self {
        self.quic = params;
        self
    }

    pub fn with_token_policy(mut self, policy: TokenPolicy) -> Self {
        self.token_policy = policy;
        self
    }

    pub fn with_max_listeners(mut self, max: usize) -> Self {
        self.max_listeners = max;
        self
    }

    pub fn with_alpn(mut self, protocol: &str) -> Self {
        self.alpn_protocols.push(protocol.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(150));
        assert_eq!(config.quic.idle_timeout(), Duration::from_millis(50_000));
        assert_eq!(config.quic.initial_max_data, 10_000_000);
        assert_eq!(config.quic.initial_max_streams_uni, 100);
        assert_eq!(config.token_policy, TokenPolicy::Retry);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TransportConfig::default();
        config.quic.initial_max_streams_bidi = 0;
        assert!(config.validate().is_err());

        let config = TransportConfig::default().with_max_listeners(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = TransportConfig::default()
            .with_connect_timeout(Duration::from_secs(5))
            .with_token_policy(TokenPolicy::Insecure)
            .with_alpn("mquic-test");
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert_eq!(config.token_policy, TokenPolicy::Insecure);
        assert_eq!(config.alpn().len(), 2);
    }

    #[test]
    fn test_connect_timeout_rounds_up() {
        let config = TransportConfig::default().with_connect_timeout(Duration::from_micros(300));
        assert_eq!(config.connect_timeout_ms, 1);
        assert!(config.validate().is_ok());

        let config = TransportConfig::default().with_connect_timeout(Duration::from_micros(1_500));
        assert_eq!(config.connect_timeout(), Duration::from_millis(2));

        let config = TransportConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile_path("mquic-config-test.toml");
        writeln!(
            file.1,
            "connect_timeout_ms = 2000\ntoken_policy = \"insecure\"\n[quic]\nidle_timeout_ms = 1000"
        )
        .unwrap();
        drop(file.1);

        let config = TransportConfig::load(Some(&file.0)).unwrap();
        assert_eq!(config.connect_timeout_ms, 2000);
        assert_eq!(config.token_policy, TokenPolicy::Insecure);
        assert_eq!(config.quic.idle_timeout_ms, 1000);
        // untouched fields keep their defaults
        assert_eq!(config.quic.initial_max_data, 10_000_000);
        let _ = std::fs::remove_file(&file.0);
    }

    fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
