//! Contract algorithm to PKCS#11 mechanism mapping

use std::borrow::Cow;

use sha2::{Digest, Sha256};

use super::module::{KeyGenMechanism, KeyPairTemplate, KeyType, SignMechanism};
use crate::types::Algorithm;

pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[Algorithm::Rsa, Algorithm::Ecdsa];

pub const RSA_MODULUS_BITS: u64 = 2048;
pub const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];
/// OID for secp256r1: 1.2.840.10045.3.1.7
pub const P256_EC_PARAMS: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

pub fn key_gen_mechanism(algorithm: Algorithm) -> Option<KeyGenMechanism> {
    match algorithm {
        Algorithm::Rsa => Some(KeyGenMechanism::Rsa {
            modulus_bits: RSA_MODULUS_BITS,
            public_exponent: RSA_PUBLIC_EXPONENT.to_vec(),
        }),
        Algorithm::Ecdsa => Some(KeyGenMechanism::Ec {
            params: P256_EC_PARAMS.to_vec(),
        }),
        Algorithm::Ed25519 => None,
    }
}

pub fn sign_mechanism(algorithm: Algorithm) -> Option<SignMechanism> {
    match algorithm {
        Algorithm::Rsa => Some(SignMechanism::Sha256RsaPkcs),
        Algorithm::Ecdsa => Some(SignMechanism::Ecdsa),
        Algorithm::Ed25519 => None,
    }
}

pub fn algorithm_for_key_type(key_type: KeyType) -> Algorithm {
    match key_type {
        KeyType::Rsa => Algorithm::Rsa,
        KeyType::Ec => Algorithm::Ecdsa,
    }
}

/// Template for a token-persistent pair whose private half never leaves the module.
pub fn key_pair_template(
    label: &str,
    id: &[u8],
    mechanism: KeyGenMechanism,
) -> KeyPairTemplate {
    KeyPairTemplate {
        mechanism,
        label: label.to_string(),
        id: id.to_vec(),
        token: true,
        sensitive: true,
        extractable: false,
    }
}

impl SignMechanism {
    /// Bytes handed to the module for this mechanism.
    ///
    /// Raw CKM_ECDSA signs a digest, so the payload is hashed here
    /// (SoftHSM2 has no CKM_ECDSA_SHA256).
    pub fn prepare<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            SignMechanism::Sha256RsaPkcs => Cow::Borrowed(payload),
            SignMechanism::Ecdsa => Cow::Owned(Sha256::digest(payload).to_vec()),
        }
    }
}

/// Strip the DER OCTET STRING wrapper PKCS#11 puts around CKA_EC_POINT.
pub fn unwrap_ec_point(ec_point: &[u8]) -> Vec<u8> {
    if ec_point.len() == 67 && ec_point[0] == 0x04 && ec_point[1] == 0x41 {
        ec_point[2..].to_vec()
    } else {
        ec_point.to_vec()
    }
}
