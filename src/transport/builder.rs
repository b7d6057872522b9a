use std::sync::Arc;

use super::Transport;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::multiaddr::{DnsResolver, Resolver};
use crate::quic::{ConnectionObserver, QuicBinding, StreamHandler};
use crate::tls::TlsContext;
use crate::upgrade::{ConnectionUpgrader, QuicUpgrader};

pub struct TransportBuilder {
    config: TransportConfig,
    tls: Option<TlsContext>,
    resolver: Resolver,
    upgrader: Arc<dyn ConnectionUpgrader>,
    observer: Option<Arc<dyn ConnectionObserver>>,
    stream_handler: Option<Arc<dyn StreamHandler>>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            tls: None,
            resolver: Resolver::default(),
            upgrader: Arc::new(QuicUpgrader),
            observer: None,
            stream_handler: None,
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Local identity; a fresh self-signed one is generated when unset
    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_dns_resolver(mut self, dns: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Resolver::new(dns);
        self
    }

    pub fn with_upgrader(mut self, upgrader: Arc<dyn ConnectionUpgrader>) -> Self {
        self.upgrader = upgrader;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_stream_handler(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.stream_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Transport> {
        self.config.validate()?;
        let tls = match self.tls {
            Some(tls) => tls,
            None => TlsContext::self_signed()?,
        };

        let mut binding = QuicBinding::new(self.config, tls);
        if let Some(observer) = self.observer {
            binding = binding.with_observer(observer);
        }
        if let Some(handler) = self.stream_handler {
            binding = binding.with_stream_handler(handler);
        }
        // surface TLS and parameter errors before the first dial or listen
        binding.client_config()?;
        binding.server_config()?;

        Ok(Transport::from_parts(binding, self.resolver, self.upgrader))
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
