//! Peer identities
//!
//! A [`PeerId`] is a multihash carried in base58btc text form. Identities used
//! by this transport are bound to TLS certificates: the sha2-256 multihash of
//! the DER certificate an endpoint presents during the QUIC handshake.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{Result, TransportError};

const MIN_LEN: usize = 32;
const MAX_LEN: usize = 50;

/// Multihash code of sha2-256
const SHA2_256: u8 = 0x12;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Cryptographically verifiable identifier of a remote endpoint
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_LEN || bytes.len() > MAX_LEN {
            return Err(TransportError::InvalidPeerId(format!(
                "invalid peer id length: {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_base58(text: &str) -> Result<Self> {
        Self::from_bytes(decode_base58(text)?)
    }

    /// Identity bound to a DER-encoded certificate
    pub fn from_certificate(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = Vec::with_capacity(2 + digest.len());
        bytes.push(SHA2_256);
        bytes.push(digest.len() as u8);
        bytes.extend_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        encode_base58(&self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl FromStr for PeerId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base58(s)
    }
}

fn encode_base58(input: &[u8]) -> String {
    let zeros = input.iter().take_while(|&&b| b == 0).count();
    // little-endian base58 digits
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for &byte in &input[zeros..] {
        let mut carry = u32::from(byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    out
}

fn decode_base58(input: &str) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Err(TransportError::InvalidPeerId("empty peer id".to_string()));
    }
    let zeros = input.bytes().take_while(|&b| b == b'1').count();
    // little-endian base256 bytes
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for ch in input.bytes().skip(zeros) {
        let value = ALPHABET.iter().position(|&a| a == ch).ok_or_else(|| {
            TransportError::InvalidPeerId(format!("invalid base58 character '{}'", ch as char))
        })?;
        let mut carry = value as u32;
        for byte in bytes.iter_mut() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &str = "QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N";

    #[test]
    fn test_known_peer_id() {
        let peer = PeerId::from_base58(KNOWN).unwrap();
        assert_eq!(peer.as_bytes().len(), 34);
        assert_eq!(peer.as_bytes()[0], SHA2_256);
        assert_eq!(peer.to_base58(), KNOWN);
    }

    #[test]
    fn test_certificate_identity_is_stable() {
        let a = PeerId::from_certificate(b"certificate");
        let b = PeerId::from_certificate(b"certificate");
        let c = PeerId::from_certificate(b"other certificate");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(PeerId::from_base58(&a.to_base58()).unwrap(), a);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(PeerId::from_base58("").is_err());
        assert!(PeerId::from_base58("0OIl").is_err());
        assert!(PeerId::from_base58("abc").is_err()); // too short
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(encode_base58(&[0, 0, 1]), "112");
        assert_eq!(decode_base58("112").unwrap(), vec![0, 0, 1]);
    }
}
