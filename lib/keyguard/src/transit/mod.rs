//! Vault transit (remote key management) backend

mod backend;
mod client;

pub use backend::{SUPPORTED_ALGORITHMS, TransitBackend, decode_public_key, transit_key_type};
pub use client::{
    HASH_ALGORITHM, KeyMetadata, RSA_SIGNATURE_ALGORITHM, TransitClient, TransitError,
};
