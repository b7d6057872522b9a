//! TLS 1.3 context for QUIC bindings
//!
//! Every endpoint presents a single self-signed certificate, and its
//! [`PeerId`] is derived from that certificate. Chain-of-trust validation is
//! therefore replaced by identity binding: the verifiers below accept any
//! single certificate but still check the TLS 1.3 handshake signature, so the
//! remote end proves possession of the key behind the identity it claims.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::peer::PeerId;

/// Server name used on the wire; identity is carried by the certificate instead
pub(crate) const SERVER_NAME: &str = "libp2p";

/// Local certificate, key and the identity derived from them
pub struct TlsContext {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    peer_id: PeerId,
}

impl Clone for TlsContext {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
            peer_id: self.peer_id.clone(),
        }
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("peer_id", &self.peer_id)
            .field("chain_len", &self.cert_chain.len())
            .finish()
    }
}

impl TlsContext {
    /// Fresh self-signed identity
    pub fn self_signed() -> Result<Self> {
        let certified = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
            .map_err(|e| TransportError::InvalidTlsContext(format!("Failed to generate cert: {}", e)))?;

        let cert_der = CertificateDer::from(certified.cert.der().to_vec());
        let key_der = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        Self::from_der(vec![cert_der], PrivateKeyDer::Pkcs8(key_der))
    }

    /// Identity from a caller-supplied certificate chain and key
    pub fn from_der(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Result<Self> {
        let leaf = cert_chain
            .first()
            .ok_or_else(|| TransportError::InvalidTlsContext("empty certificate chain".to_string()))?;
        let peer_id = PeerId::from_certificate(leaf.as_ref());

        let context = Self {
            cert_chain,
            private_key,
            peer_id,
        };
        // surfaces unparsable keys and cert/key mismatches at construction time
        context.server_crypto(vec![SERVER_NAME.as_bytes().to_vec()])?;
        debug!(peer_id = %context.peer_id, "TLS context ready");
        Ok(context)
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert_chain[0]
    }

    pub(crate) fn server_crypto(&self, alpn: Vec<Vec<u8>>) -> Result<rustls::ServerConfig> {
        let provider = provider();
        let mut config = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_client_cert_verifier(Arc::new(PeerCertVerifier::new(&provider)))
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())?;
        config.alpn_protocols = alpn;
        Ok(config)
    }

    pub(crate) fn client_crypto(&self, alpn: Vec<Vec<u8>>) -> Result<rustls::ClientConfig> {
        let provider = provider();
        let mut config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PeerCertVerifier::new(&provider)))
            .with_client_auth_cert(self.cert_chain.clone(), self.private_key.clone_key())?;
        config.alpn_protocols = alpn;
        Ok(config)
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Accepts exactly one certificate and verifies handshake signatures against it
#[derive(Debug)]
struct PeerCertVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl PeerCertVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }

    fn check_chain(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> std::result::Result<(), rustls::Error> {
        if !intermediates.is_empty() {
            return Err(rustls::Error::General(
                "expected a single self-signed certificate".to_string(),
            ));
        }
        if end_entity.as_ref().is_empty() {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::BadEncoding,
            ));
        }
        Ok(())
    }

    fn verify_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }
}

impl ServerCertVerifier for PeerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Self::check_chain(end_entity, intermediates)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Err(rustls::Error::General("TLS 1.2 is not supported".to_string()))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.verify_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

impl ClientCertVerifier for PeerCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    // peers without a certificate connect anonymously
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Self::check_chain(end_entity, intermediates)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Err(rustls::Error::General("TLS 1.2 is not supported".to_string()))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.verify_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_self_signed_identity() {
        let a = TlsContext::self_signed().unwrap();
        let b = TlsContext::self_signed().unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
        assert_eq!(a.peer_id(), &PeerId::from_certificate(a.certificate().as_ref()));
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let key = TlsContext::self_signed().unwrap().private_key.clone_key();
        let err = TlsContext::from_der(Vec::new(), key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTlsContext);
    }

    #[test]
    fn test_garbage_key_is_rejected() {
        let context = TlsContext::self_signed().unwrap();
        let bad_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0u8; 16]));
        let err = TlsContext::from_der(vec![context.certificate().clone()], bad_key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTlsContext);
    }
}
