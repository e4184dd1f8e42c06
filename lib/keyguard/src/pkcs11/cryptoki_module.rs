//! cryptoki-backed PKCS#11 module

use std::path::{Path, PathBuf};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{
    Attribute, AttributeType, KeyType as CkKeyType, ObjectClass as CkObjectClass, ObjectHandle,
};
use cryptoki::session::{Session, UserType};
use cryptoki::types::{AuthPin, Ulong};

use super::module::{
    KeyGenMechanism, KeyPairTemplate, KeyType, ModuleError, ModuleSession, ObjectClass,
    Pkcs11Module, PublicAttribute, SignMechanism, TokenSlot,
};

/// PKCS#11 module loaded from a shared library, e.g. SoftHSM2.
pub struct CryptokiModule {
    library_path: PathBuf,
    ctx: Option<Pkcs11>,
}

impl CryptokiModule {
    pub fn new(library_path: &Path) -> Self {
        Self {
            library_path: library_path.to_path_buf(),
            ctx: None,
        }
    }

    fn ctx(&self) -> Result<&Pkcs11, ModuleError> {
        self.ctx.as_ref().ok_or(ModuleError::NotLoaded)
    }
}

impl Pkcs11Module for CryptokiModule {
    type Session = CryptokiSession;

    fn initialize(&mut self) -> Result<(), ModuleError> {
        if self.ctx.is_some() {
            return Ok(());
        }

        let ctx = Pkcs11::new(&self.library_path)?;
        ctx.initialize(CInitializeArgs::OsThreads)?;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ModuleError> {
        // C_Finalize runs when the last context handle is dropped
        drop(self.ctx.take());
        Ok(())
    }

    fn slots_with_token(&self) -> Result<Vec<TokenSlot>, ModuleError> {
        let ctx = self.ctx()?;
        let slots = ctx.get_slots_with_token()?;

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let info = ctx.get_token_info(slot)?;
                Ok(TokenSlot {
                    id: slot.id(),
                    index,
                    token_label: info.label().trim().to_string(),
                })
            })
            .collect()
    }

    fn open_rw_session(&self, slot: &TokenSlot) -> Result<Self::Session, ModuleError> {
        let ctx = self.ctx()?;
        let ck_slot = ctx
            .get_slots_with_token()?
            .into_iter()
            .find(|s| s.id() == slot.id)
            .ok_or_else(|| ModuleError::Device(format!("Slot {} disappeared", slot.id)))?;

        let session = ctx.open_rw_session(ck_slot)?;
        Ok(CryptokiSession { session })
    }
}

pub struct CryptokiSession {
    session: Session,
}

fn mechanism_for_sign(mechanism: SignMechanism) -> Mechanism<'static> {
    match mechanism {
        SignMechanism::Sha256RsaPkcs => Mechanism::Sha256RsaPkcs,
        SignMechanism::Ecdsa => Mechanism::Ecdsa,
    }
}

impl ModuleSession for CryptokiSession {
    type Object = ObjectHandle;

    fn login(&self, pin: &str) -> Result<(), ModuleError> {
        self.session
            .login(UserType::User, Some(&AuthPin::new(pin.into())))
            .map_err(Into::into)
    }

    fn logout(&self) -> Result<(), ModuleError> {
        self.session.logout().map_err(Into::into)
    }

    fn close(self) -> Result<(), ModuleError> {
        // C_CloseSession runs on drop
        drop(self.session);
        Ok(())
    }

    fn generate_key_pair(
        &self,
        template: &KeyPairTemplate,
    ) -> Result<(ObjectHandle, ObjectHandle), ModuleError> {
        let label = template.label.as_bytes().to_vec();

        let mut pub_template = vec![
            Attribute::Class(CkObjectClass::PUBLIC_KEY),
            Attribute::Token(template.token),
            Attribute::Verify(true),
            Attribute::Label(label.clone()),
            Attribute::Id(template.id.clone()),
        ];
        let mut priv_template = vec![
            Attribute::Class(CkObjectClass::PRIVATE_KEY),
            Attribute::Token(template.token),
            Attribute::Private(true),
            Attribute::Sensitive(template.sensitive),
            Attribute::Extractable(template.extractable),
            Attribute::Sign(true),
            Attribute::Label(label),
            Attribute::Id(template.id.clone()),
        ];

        let mechanism = match &template.mechanism {
            KeyGenMechanism::Rsa {
                modulus_bits,
                public_exponent,
            } => {
                pub_template.push(Attribute::KeyType(CkKeyType::RSA));
                pub_template.push(Attribute::ModulusBits(Ulong::from(*modulus_bits)));
                pub_template.push(Attribute::PublicExponent(public_exponent.clone()));
                priv_template.push(Attribute::KeyType(CkKeyType::RSA));
                Mechanism::RsaPkcsKeyPairGen
            }
            KeyGenMechanism::Ec { params } => {
                pub_template.push(Attribute::KeyType(CkKeyType::EC));
                pub_template.push(Attribute::EcParams(params.clone()));
                priv_template.push(Attribute::KeyType(CkKeyType::EC));
                Mechanism::EccKeyPairGen
            }
        };

        self.session
            .generate_key_pair(&mechanism, &pub_template, &priv_template)
            .map_err(Into::into)
    }

    fn find_objects(
        &self,
        class: ObjectClass,
        label: &str,
    ) -> Result<Vec<ObjectHandle>, ModuleError> {
        let class = match class {
            ObjectClass::PublicKey => CkObjectClass::PUBLIC_KEY,
            ObjectClass::PrivateKey => CkObjectClass::PRIVATE_KEY,
        };
        let template = vec![
            Attribute::Class(class),
            Attribute::Label(label.as_bytes().to_vec()),
        ];

        self.session.find_objects(&template).map_err(Into::into)
    }

    fn key_type(&self, object: ObjectHandle) -> Result<Option<KeyType>, ModuleError> {
        let attrs = self
            .session
            .get_attributes(object, &[AttributeType::KeyType])?;

        Ok(attrs.iter().find_map(|attr| match attr {
            Attribute::KeyType(kt) if *kt == CkKeyType::RSA => Some(KeyType::Rsa),
            Attribute::KeyType(kt) if *kt == CkKeyType::EC => Some(KeyType::Ec),
            _ => None,
        }))
    }

    fn read_public_attribute(
        &self,
        object: ObjectHandle,
        attribute: PublicAttribute,
    ) -> Result<Vec<u8>, ModuleError> {
        let attr_type = match attribute {
            PublicAttribute::Modulus => AttributeType::Modulus,
            PublicAttribute::EcPoint => AttributeType::EcPoint,
        };
        let attrs = self.session.get_attributes(object, &[attr_type])?;

        attrs
            .into_iter()
            .find_map(|attr| match attr {
                Attribute::Modulus(bytes) | Attribute::EcPoint(bytes) => Some(bytes),
                _ => None,
            })
            .ok_or_else(|| ModuleError::Device(format!("Attribute {:?} not present", attribute)))
    }

    fn destroy_object(&self, object: ObjectHandle) -> Result<(), ModuleError> {
        self.session.destroy_object(object).map_err(Into::into)
    }

    fn sign(
        &self,
        mechanism: SignMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError> {
        self.session
            .sign(&mechanism_for_sign(mechanism), key, data)
            .map_err(Into::into)
    }

    fn verify(
        &self,
        mechanism: SignMechanism,
        key: ObjectHandle,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), ModuleError> {
        self.session
            .verify(&mechanism_for_sign(mechanism), key, data, signature)
            .map_err(Into::into)
    }
}
