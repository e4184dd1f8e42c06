//! Backend configuration
//!
//! Read from the environment in the probe binary; the structs also
//! deserialize so callers can embed them in their own config files.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::KeyError;
use crate::selector::BackendKind;

pub const DEFAULT_PKCS11_LIBRARY: &str = "/usr/lib/softhsm/libsofthsm2.so";
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";
pub const DEFAULT_TRANSIT_MOUNT: &str = "transit";

#[derive(Clone, Deserialize)]
pub struct Pkcs11Config {
    /// Path to the PKCS#11 module (.so/.dylib/.dll)
    pub library_path: PathBuf,
    /// Select the slot whose token carries this label
    #[serde(default)]
    pub token_label: Option<String>,
    /// Select the n-th slot with a token present
    #[serde(default)]
    pub slot_index: Option<usize>,
    /// User PIN
    pub pin: String,
}

impl fmt::Debug for Pkcs11Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Config")
            .field("library_path", &self.library_path)
            .field("token_label", &self.token_label)
            .field("slot_index", &self.slot_index)
            .field("pin", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TransitConfig {
    /// Vault address, e.g. `https://vault.internal:8200`
    pub address: String,
    pub token: String,
    #[serde(default = "default_mount")]
    pub mount: String,
    /// Enterprise namespace, sent as `X-Vault-Namespace`
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_mount() -> String {
    DEFAULT_TRANSIT_MOUNT.to_string()
}

impl fmt::Debug for TransitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitConfig")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("mount", &self.mount)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Backend tag plus its connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Pkcs11(Pkcs11Config),
    Transit(TransitConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Pkcs11(_) => BackendKind::Pkcs11,
            BackendConfig::Transit(_) => BackendKind::Transit,
        }
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, KeyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KeyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind: BackendKind = lookup("KEYGUARD_BACKEND")
            .unwrap_or_else(|| "pkcs11".to_string())
            .parse()?;

        match kind {
            BackendKind::Pkcs11 => {
                let slot_index = lookup("PKCS11_SLOT")
                    .map(|s| {
                        s.parse::<usize>().map_err(|e| {
                            KeyError::Config(format!("PKCS11_SLOT must be a valid number: {}", e))
                        })
                    })
                    .transpose()?;
                let pin = lookup("PKCS11_PIN")
                    .ok_or_else(|| KeyError::Config("PKCS11_PIN is required".to_string()))?;

                Ok(BackendConfig::Pkcs11(Pkcs11Config {
                    library_path: lookup("PKCS11_LIBRARY")
                        .unwrap_or_else(|| DEFAULT_PKCS11_LIBRARY.to_string())
                        .into(),
                    token_label: lookup("PKCS11_TOKEN_LABEL").filter(|s| !s.is_empty()),
                    slot_index,
                    pin,
                }))
            }
            BackendKind::Transit => {
                let token = lookup("VAULT_TOKEN")
                    .ok_or_else(|| KeyError::Config("VAULT_TOKEN is required".to_string()))?;

                Ok(BackendConfig::Transit(TransitConfig {
                    address: lookup("VAULT_ADDR").unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string()),
                    token,
                    mount: lookup("VAULT_TRANSIT_MOUNT").unwrap_or_else(default_mount),
                    namespace: lookup("VAULT_NAMESPACE").filter(|s| !s.is_empty()),
                }))
            }
        }
    }
}
