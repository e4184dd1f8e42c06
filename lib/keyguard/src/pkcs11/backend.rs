//! PKCS#11 key backend
//!
//! Keys are identified by their `CKA_LABEL` and looked up on every call.
//! Key pairs live on the token, so they survive process restarts.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::mechanism::{
    SUPPORTED_ALGORITHMS, algorithm_for_key_type, key_gen_mechanism, key_pair_template,
    sign_mechanism, unwrap_ec_point,
};
use super::module::{
    KeyType, ModuleError, ModuleSession, ObjectClass, Pkcs11Module, PublicAttribute, TokenSlot,
};
use crate::backend::KeyBackend;
use crate::config::Pkcs11Config;
use crate::error::KeyError;
use crate::selector::BackendKind;
use crate::types::{AdapterState, Algorithm, GeneratedKeyPair};

/// Pick the slot to use from those with a token present.
///
/// Token label wins over slot index; with neither, the first slot is used.
pub fn resolve_slot(
    slots: &[TokenSlot],
    token_label: Option<&str>,
    slot_index: Option<usize>,
) -> Result<TokenSlot, KeyError> {
    if slots.is_empty() {
        return Err(KeyError::NotFound("No slot with a token present".to_string()));
    }

    if let Some(label) = token_label {
        return slots
            .iter()
            .find(|slot| slot.token_label == label)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(format!("No token labelled '{}'", label)));
    }

    if let Some(index) = slot_index {
        return slots.get(index).cloned().ok_or_else(|| {
            KeyError::NotFound(format!(
                "Slot {} not found. {} slot(s) available.",
                index,
                slots.len()
            ))
        });
    }

    Ok(slots[0].clone())
}

/// Key backend over a PKCS#11 module.
pub struct Pkcs11Backend<M: Pkcs11Module> {
    module: M,
    config: Pkcs11Config,
    session: Option<M::Session>,
    state: AdapterState,
}

impl<M: Pkcs11Module> std::fmt::Debug for Pkcs11Backend<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Backend")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<M: Pkcs11Module> Pkcs11Backend<M> {
    pub fn new(module: M, config: Pkcs11Config) -> Self {
        Self {
            module,
            config,
            session: None,
            state: AdapterState::Uninitialized,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Connect if needed. Session and login succeed together or not at all.
    fn ensure_initialized(&mut self) -> Result<(), KeyError> {
        if self.session.is_some() {
            return Ok(());
        }

        self.module
            .initialize()
            .map_err(|e| KeyError::Connection(format!("Failed to load PKCS#11 module: {}", e)))?;

        match self.open_session() {
            Ok((slot, session)) => {
                info!(
                    slot = slot.id,
                    token = %slot.token_label,
                    "PKCS#11 session ready"
                );
                self.session = Some(session);
                self.state = AdapterState::Initialized;
                Ok(())
            }
            Err(e) => {
                if let Err(fe) = self.module.finalize() {
                    warn!("Failed to finalize PKCS#11 module after init failure: {}", fe);
                }
                Err(e)
            }
        }
    }

    fn open_session(&self) -> Result<(TokenSlot, M::Session), KeyError> {
        let slots = self
            .module
            .slots_with_token()
            .map_err(|e| KeyError::Connection(format!("Failed to list slots: {}", e)))?;
        let slot = resolve_slot(
            &slots,
            self.config.token_label.as_deref(),
            self.config.slot_index,
        )?;

        let session = self
            .module
            .open_rw_session(&slot)
            .map_err(|e| KeyError::Connection(format!("Failed to open session: {}", e)))?;

        if let Err(e) = session.login(&self.config.pin) {
            if let Err(ce) = session.close() {
                warn!("Failed to close session after login failure: {}", ce);
            }
            return Err(KeyError::Connection(format!("Login failed: {}", e)));
        }

        Ok((slot, session))
    }

    fn session(&self) -> Result<&M::Session, KeyError> {
        self.session
            .as_ref()
            .ok_or_else(|| KeyError::Connection("PKCS#11 session not open".to_string()))
    }

    /// First object of `class` labelled `label`.
    ///
    /// Labels are unique for pairs created through this adapter, but other
    /// tools may have created duplicates; those resolve to the first match.
    fn find_key(
        session: &M::Session,
        label: &str,
        class: ObjectClass,
    ) -> Result<Option<<M::Session as ModuleSession>::Object>, ModuleError> {
        let objects = session.find_objects(class, label)?;
        if objects.len() > 1 {
            warn!(
                label,
                count = objects.len(),
                ?class,
                "Multiple objects share this label, using the first"
            );
        }
        Ok(objects.first().copied())
    }

    fn public_key_hex(
        session: &M::Session,
        object: <M::Session as ModuleSession>::Object,
        key_type: KeyType,
    ) -> Result<String, ModuleError> {
        let bytes = match key_type {
            KeyType::Rsa => session.read_public_attribute(object, PublicAttribute::Modulus)?,
            KeyType::Ec => {
                unwrap_ec_point(&session.read_public_attribute(object, PublicAttribute::EcPoint)?)
            }
        };
        Ok(hex::encode(bytes))
    }

    /// Algorithm to sign/verify with: the caller's choice, else the key's own type.
    fn signing_algorithm(
        &self,
        session: &M::Session,
        key: <M::Session as ModuleSession>::Object,
        requested: Option<Algorithm>,
    ) -> Result<Algorithm, KeyError> {
        if requested.is_some() {
            return self.resolve_algorithm(requested);
        }

        let key_type = session
            .key_type(key)
            .map_err(|e| KeyError::Signing(format!("Failed to read key type: {}", e)))?;
        Ok(key_type
            .map(algorithm_for_key_type)
            .unwrap_or_else(|| self.default_algorithm()))
    }
}

#[async_trait]
impl<M: Pkcs11Module> KeyBackend for Pkcs11Backend<M> {
    fn kind(&self) -> BackendKind {
        BackendKind::Pkcs11
    }

    fn supported_algorithms(&self) -> &'static [Algorithm] {
        SUPPORTED_ALGORITHMS
    }

    async fn initialize(&mut self) -> Result<(), KeyError> {
        self.ensure_initialized()
    }

    fn is_initialized(&self) -> bool {
        self.state == AdapterState::Initialized
    }

    async fn generate_key_pair(
        &mut self,
        label: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<GeneratedKeyPair, KeyError> {
        self.ensure_initialized()?;
        let algorithm = self.resolve_algorithm(algorithm)?;
        let mechanism = key_gen_mechanism(algorithm).ok_or(KeyError::UnsupportedAlgorithm {
            algorithm,
            backend: BackendKind::Pkcs11,
        })?;
        let session = self.session()?;

        let existing = session
            .find_objects(ObjectClass::PrivateKey, label)
            .map_err(|e| KeyError::Generation(format!("Failed to search for label: {}", e)))?;
        if !existing.is_empty() {
            return Err(KeyError::Generation(format!("Label '{}' already in use", label)));
        }

        let id: [u8; 16] = rand::random();
        let key_type = mechanism.key_type();
        let template = key_pair_template(label, &id, mechanism);

        let (public, private) = session
            .generate_key_pair(&template)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        let public_key_hex = match Self::public_key_hex(session, public, key_type) {
            Ok(public_key_hex) => public_key_hex,
            Err(e) => {
                // Keep the label free for a retry
                for object in [public, private] {
                    if let Err(de) = session.destroy_object(object) {
                        warn!(label, ?object, "Failed to remove incomplete key pair: {}", de);
                    }
                }
                return Err(KeyError::Generation(format!("Failed to read public key: {}", e)));
            }
        };

        info!(label, %algorithm, "Generated PKCS#11 key pair");

        Ok(GeneratedKeyPair {
            public_key_hex,
            key_id: hex::encode(id),
        })
    }

    async fn public_key(&mut self, label: &str) -> Result<String, KeyError> {
        self.ensure_initialized()?;
        let session = self.session()?;

        let public = Self::find_key(session, label, ObjectClass::PublicKey)
            .map_err(|e| KeyError::Connection(format!("Key lookup failed: {}", e)))?
            .ok_or_else(|| KeyError::NotFound(format!("Public key '{}'", label)))?;
        let key_type = session
            .key_type(public)
            .map_err(|e| KeyError::Connection(format!("Failed to read key type: {}", e)))?
            .ok_or_else(|| {
                KeyError::MalformedInput(format!("Key '{}' has an unsupported key type", label))
            })?;

        Self::public_key_hex(session, public, key_type)
            .map_err(|e| KeyError::Connection(format!("Failed to read public key: {}", e)))
    }

    async fn sign(
        &mut self,
        label: &str,
        payload: &[u8],
        algorithm: Option<Algorithm>,
    ) -> Result<String, KeyError> {
        self.ensure_initialized()?;
        let session = self.session()?;

        let private = Self::find_key(session, label, ObjectClass::PrivateKey)
            .map_err(|e| KeyError::Signing(format!("Key lookup failed: {}", e)))?
            .ok_or_else(|| KeyError::NotFound(format!("Private key '{}'", label)))?;

        let algorithm = self.signing_algorithm(session, private, algorithm)?;
        let mechanism = sign_mechanism(algorithm).ok_or(KeyError::UnsupportedAlgorithm {
            algorithm,
            backend: BackendKind::Pkcs11,
        })?;

        let signature = session
            .sign(mechanism, private, &mechanism.prepare(payload))
            .map_err(|e| KeyError::Signing(e.to_string()))?;

        debug!(label, %algorithm, "Signed payload");
        Ok(hex::encode(signature))
    }

    async fn verify(
        &mut self,
        label: &str,
        payload: &[u8],
        signature: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<bool, KeyError> {
        self.ensure_initialized()?;
        let session = self.session()?;

        let public = Self::find_key(session, label, ObjectClass::PublicKey)
            .map_err(|e| KeyError::Connection(format!("Key lookup failed: {}", e)))?
            .ok_or_else(|| KeyError::NotFound(format!("Public key '{}'", label)))?;

        let signature = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(label, "Signature is not valid hex: {}", e);
                return Ok(false);
            }
        };

        let Ok(algorithm) = self.signing_algorithm(session, public, algorithm) else {
            return Ok(false);
        };
        let Some(mechanism) = sign_mechanism(algorithm) else {
            return Ok(false);
        };

        match session.verify(mechanism, public, &mechanism.prepare(payload), &signature) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(label, "Signature did not verify: {}", e);
                Ok(false)
            }
        }
    }

    async fn delete_key_pair(&mut self, label: &str) -> Result<(), KeyError> {
        self.ensure_initialized()?;
        let session = self.session()?;

        let private = Self::find_key(session, label, ObjectClass::PrivateKey)
            .map_err(|e| KeyError::Deletion(format!("Key lookup failed: {}", e)))?;
        let public = Self::find_key(session, label, ObjectClass::PublicKey)
            .map_err(|e| KeyError::Deletion(format!("Key lookup failed: {}", e)))?;

        if private.is_none() && public.is_none() {
            return Err(KeyError::NotFound(format!("Key pair '{}'", label)));
        }

        for object in [private, public].into_iter().flatten() {
            session
                .destroy_object(object)
                .map_err(|e| KeyError::Deletion(e.to_string()))?;
        }

        info!(label, "Deleted PKCS#11 key pair");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!("PKCS#11 logout failed: {}", e);
            }
            if let Err(e) = session.close() {
                warn!("PKCS#11 session close failed: {}", e);
            }
            if let Err(e) = self.module.finalize() {
                warn!("PKCS#11 finalize failed: {}", e);
            }
            self.state = AdapterState::Closed;
            info!("PKCS#11 backend closed");
        }
    }
}
