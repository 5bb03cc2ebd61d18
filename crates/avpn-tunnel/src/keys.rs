//! Curve25519 keys as they appear in WireGuard configuration text
//!
//! All three key kinds are 32 bytes, written as standard padded base64.
//! Secrets never show up in `Debug` output, so configurations can be logged.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::rngs::OsRng;
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

const KEY_LEN: usize = 32;

fn decode(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = BASE64
        .decode(s.trim())
        .map_err(|_| KeyError::InvalidBase64)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}

fn encode(bytes: &[u8; KEY_LEN]) -> String {
    BASE64.encode(bytes)
}

/// Interface private key
#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    /// Fresh key from the OS random source
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Key from raw scalar bytes; clamping happens on use
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Parse the `PrivateKey` value of a configuration
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode(s).map(Self::from_bytes)
    }

    /// Key the peer must list for this interface
    pub fn public_key(&self) -> PublicKey {
        PublicKey(X25519Public::from(&self.secret).to_bytes())
    }

    /// Raw secret bytes
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.secret.to_bytes()
    }

    /// Form written back into configuration text
    pub fn to_base64(&self) -> String {
        encode(&self.to_bytes())
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PrivateKey {}

impl FromStr for PrivateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // identify by the public half only
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key().to_base64())
            .finish_non_exhaustive()
    }
}

/// Peer public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Key from its 32 raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode(s).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    /// Standard padded base64, as in `PublicKey =` lines
    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Symmetric preshared key mixed into the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode(s).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }
}

impl FromStr for PresharedKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("not valid base64")]
    InvalidBase64,

    #[error("decodes to {0} bytes, expected 32")]
    InvalidLength(usize),
}
