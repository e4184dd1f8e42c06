//! Contract error types

use thiserror::Error;

use crate::selector::BackendKind;
use crate::types::Algorithm;

/// Coarse taxonomy of [`KeyError`], stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    NotFound,
    UnsupportedAlgorithm,
    MalformedInput,
    Generation,
    Signing,
    Deletion,
    Config,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Algorithm {algorithm} is not supported by the {backend} backend")]
    UnsupportedAlgorithm {
        algorithm: Algorithm,
        backend: BackendKind,
    },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Key deletion failed: {0}")]
    Deletion(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::Connection(_) => ErrorKind::Connection,
            KeyError::NotFound(_) => ErrorKind::NotFound,
            KeyError::UnsupportedAlgorithm { .. } => ErrorKind::UnsupportedAlgorithm,
            KeyError::MalformedInput(_) => ErrorKind::MalformedInput,
            KeyError::Generation(_) => ErrorKind::Generation,
            KeyError::Signing(_) => ErrorKind::Signing,
            KeyError::Deletion(_) => ErrorKind::Deletion,
            KeyError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
