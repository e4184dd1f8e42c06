//! PKCS#11 (local cryptographic module) backend

mod backend;
mod cryptoki_module;
pub mod mechanism;
pub mod module;

pub use backend::{Pkcs11Backend, resolve_slot};
pub use cryptoki_module::{CryptokiModule, CryptokiSession};
pub use module::{
    KeyGenMechanism, KeyPairTemplate, KeyType, ModuleError, ModuleSession, ObjectClass,
    Pkcs11Module, PublicAttribute, SignMechanism, TokenSlot,
};
