//! Backend selection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::KeyBackend;
use crate::config::BackendConfig;
use crate::error::KeyError;
use crate::pkcs11::{CryptokiModule, Pkcs11Backend};
use crate::transit::TransitBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PKCS#11 cryptographic module
    Pkcs11,
    /// Vault transit secrets engine
    Transit,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Pkcs11 => f.write_str("pkcs11"),
            BackendKind::Transit => f.write_str("transit"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pkcs11" | "hsm" | "softhsm" => Ok(BackendKind::Pkcs11),
            "transit" | "vault" => Ok(BackendKind::Transit),
            other => Err(KeyError::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Build the adapter for `config`. Does not connect; call `initialize`.
pub fn connect(config: BackendConfig) -> Box<dyn KeyBackend> {
    match config {
        BackendConfig::Pkcs11(config) => {
            let module = CryptokiModule::new(&config.library_path);
            Box::new(Pkcs11Backend::new(module, config))
        }
        BackendConfig::Transit(config) => Box::new(TransitBackend::new(config)),
    }
}
