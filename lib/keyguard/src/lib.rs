//! keyguard - hardware-backed asymmetric key operations behind one contract
//!
//! Two backends implement [`KeyBackend`]:
//! - [`Pkcs11Backend`]: a PKCS#11 module (SoftHSM2, network HSMs) via cryptoki
//! - [`TransitBackend`]: a Vault transit secrets engine over HTTP
//!
//! Keys are identified by their label. Signatures are backend-native strings
//! and are never portable between backends.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod backend;
pub mod config;
pub mod error;
pub mod pkcs11;
pub mod selector;
pub mod transit;
pub mod types;

pub use backend::KeyBackend;
pub use config::{BackendConfig, Pkcs11Config, TransitConfig};
pub use error::{ErrorKind, KeyError};
pub use pkcs11::{CryptokiModule, ModuleError, ModuleSession, Pkcs11Backend, Pkcs11Module};
pub use selector::{BackendKind, connect};
pub use transit::{TransitBackend, TransitClient, TransitError};
pub use types::{Algorithm, AdapterState, GeneratedKeyPair};
