//! Shared contract types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Asymmetric algorithms known to the contract. Each backend supports a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Rsa, Algorithm::Ecdsa, Algorithm::Ed25519];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Rsa => "RSA",
            Algorithm::Ecdsa => "ECDSA",
            Algorithm::Ed25519 => "ED25519",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(Algorithm::Rsa),
            "ECDSA" | "EC" => Ok(Algorithm::Ecdsa),
            "ED25519" | "EDDSA" => Ok(Algorithm::Ed25519),
            other => Err(KeyError::MalformedInput(format!(
                "Unknown algorithm: {}",
                other
            ))),
        }
    }
}

/// Result of a successful key generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedKeyPair {
    /// Hex-encoded public key bytes
    pub public_key_hex: String,
    /// Generation-time identifier. Informational only, never used for lookup.
    pub key_id: String,
}

/// Adapter lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    #[default]
    Uninitialized,
    Initialized,
    Closed,
}

/// Random 16-byte identifier, hex encoded.
pub(crate) fn new_key_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
