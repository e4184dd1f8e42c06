//! PKCS#11 module interface
//!
//! The adapter only needs a narrow slice of PKCS#11: slot enumeration,
//! session login, key pair generation, object lookup by label, public
//! attribute reads, and single-part sign/verify. [`Pkcs11Module`] and
//! [`ModuleSession`] describe that slice so the adapter can run against
//! cryptoki or an in-memory module in tests.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("PKCS#11 error: {0}")]
    Pkcs11(#[from] cryptoki::error::Error),
    #[error("Module not loaded")]
    NotLoaded,
    #[error("Device error: {0}")]
    Device(String),
}

/// A slot with a token present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSlot {
    /// Slot id as reported by the module
    pub id: u64,
    /// Position among slots with a token present
    pub index: usize,
    /// Token label, trailing padding removed
    pub token_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    PublicKey,
    PrivateKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa,
    Ec,
}

/// Key pair generation mechanism with its domain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyGenMechanism {
    Rsa {
        modulus_bits: u64,
        public_exponent: Vec<u8>,
    },
    Ec {
        /// DER-encoded curve OID
        params: Vec<u8>,
    },
}

impl KeyGenMechanism {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyGenMechanism::Rsa { .. } => KeyType::Rsa,
            KeyGenMechanism::Ec { .. } => KeyType::Ec,
        }
    }
}

/// Attributes applied to both halves of a generated key pair.
///
/// The public half is created with `CKA_VERIFY`; the private half with
/// `CKA_SIGN`, `CKA_PRIVATE`, and the `sensitive`/`extractable` flags below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairTemplate {
    pub mechanism: KeyGenMechanism,
    pub label: String,
    pub id: Vec<u8>,
    /// Persist on the token rather than the session
    pub token: bool,
    pub sensitive: bool,
    pub extractable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignMechanism {
    /// CKM_SHA256_RSA_PKCS, hashing inside the module
    Sha256RsaPkcs,
    /// CKM_ECDSA over a caller-supplied digest
    Ecdsa,
}

/// Public attributes the adapter reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicAttribute {
    Modulus,
    EcPoint,
}

/// A loaded PKCS#11 module.
pub trait Pkcs11Module: Send {
    type Session: ModuleSession;

    /// Load the module and call C_Initialize. Must tolerate repeat calls.
    fn initialize(&mut self) -> Result<(), ModuleError>;

    /// Call C_Finalize and unload. A no-op when not loaded.
    fn finalize(&mut self) -> Result<(), ModuleError>;

    fn slots_with_token(&self) -> Result<Vec<TokenSlot>, ModuleError>;

    /// Open an exclusive read/write session on `slot`.
    fn open_rw_session(&self, slot: &TokenSlot) -> Result<Self::Session, ModuleError>;
}

/// An open session on a token.
pub trait ModuleSession: Send {
    type Object: Copy + fmt::Debug + Send;

    fn login(&self, pin: &str) -> Result<(), ModuleError>;

    fn logout(&self) -> Result<(), ModuleError>;

    fn close(self) -> Result<(), ModuleError>;

    /// Returns `(public, private)` object handles.
    fn generate_key_pair(
        &self,
        template: &KeyPairTemplate,
    ) -> Result<(Self::Object, Self::Object), ModuleError>;

    /// Objects of `class` whose label equals `label`, in module order.
    fn find_objects(&self, class: ObjectClass, label: &str)
    -> Result<Vec<Self::Object>, ModuleError>;

    fn key_type(&self, object: Self::Object) -> Result<Option<KeyType>, ModuleError>;

    fn read_public_attribute(
        &self,
        object: Self::Object,
        attribute: PublicAttribute,
    ) -> Result<Vec<u8>, ModuleError>;

    fn destroy_object(&self, object: Self::Object) -> Result<(), ModuleError>;

    fn sign(
        &self,
        mechanism: SignMechanism,
        key: Self::Object,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError>;

    /// `Ok(())` only when the signature verifies.
    fn verify(
        &self,
        mechanism: SignMechanism,
        key: Self::Object,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), ModuleError>;
}
