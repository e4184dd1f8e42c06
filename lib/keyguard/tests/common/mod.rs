#![allow(dead_code)]
//! Shared fixtures: an in-memory PKCS#11 token and a fake Vault transit engine.

pub mod fake_vault;

use keyguard::{Pkcs11Backend, Pkcs11Config};

use memory_module::{MemoryModule, MemoryToken, USER_PIN};

pub fn pkcs11_config() -> Pkcs11Config {
    Pkcs11Config {
        library_path: "/usr/lib/softhsm/libsofthsm2.so".into(),
        token_label: None,
        slot_index: None,
        pin: USER_PIN.to_string(),
    }
}

/// Adapter over a fresh single-slot token, plus the token for inspection.
pub fn pkcs11_backend() -> (Pkcs11Backend<MemoryModule>, MemoryToken) {
    let token = MemoryToken::single();
    (Pkcs11Backend::new(token.module(), pkcs11_config()), token)
}
