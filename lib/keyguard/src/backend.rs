//! The key backend contract

use async_trait::async_trait;

use crate::error::KeyError;
use crate::selector::BackendKind;
use crate::types::{Algorithm, GeneratedKeyPair};

/// Hardware-backed key operations, identical across backends.
///
/// Methods take `&mut self`: an adapter holds unsynchronized session or
/// connection state and serves one caller at a time. Open one adapter per
/// task to work concurrently.
///
/// Every operation other than `close` initializes the adapter on first use.
/// Explicit calls to `initialize` are honored without reconnecting.
#[async_trait]
pub trait KeyBackend: Send {
    /// Which backend this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Algorithms this backend can generate and sign with.
    fn supported_algorithms(&self) -> &'static [Algorithm];

    /// Algorithm used when the caller omits one.
    fn default_algorithm(&self) -> Algorithm {
        Algorithm::Rsa
    }

    /// Establish connectivity. A no-op when already initialized.
    async fn initialize(&mut self) -> Result<(), KeyError>;

    fn is_initialized(&self) -> bool;

    /// Create a key pair under `label`, returning its hex public key.
    async fn generate_key_pair(
        &mut self,
        label: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<GeneratedKeyPair, KeyError>;

    /// Hex public key of an existing key pair.
    async fn public_key(&mut self, label: &str) -> Result<String, KeyError>;

    /// Sign the exact payload bytes. Fails with `NotFound` for an unknown label.
    async fn sign(
        &mut self,
        label: &str,
        payload: &[u8],
        algorithm: Option<Algorithm>,
    ) -> Result<String, KeyError>;

    /// Check a signature produced by this backend's `sign`.
    ///
    /// Returns `Ok(false)` for a malformed or mismatching signature. Only a
    /// missing key (or a failure to initialize) surfaces as an error.
    async fn verify(
        &mut self,
        label: &str,
        payload: &[u8],
        signature: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<bool, KeyError>;

    /// Remove both halves of the key pair.
    async fn delete_key_pair(&mut self, label: &str) -> Result<(), KeyError>;

    /// Release resources. Safe to call repeatedly or before `initialize`.
    async fn close(&mut self);

    /// Resolve an optional algorithm against this backend's subset.
    fn resolve_algorithm(&self, algorithm: Option<Algorithm>) -> Result<Algorithm, KeyError> {
        let algorithm = algorithm.unwrap_or_else(|| self.default_algorithm());
        if self.supported_algorithms().contains(&algorithm) {
            Ok(algorithm)
        } else {
            Err(KeyError::UnsupportedAlgorithm {
                algorithm,
                backend: self.kind(),
            })
        }
    }
}
