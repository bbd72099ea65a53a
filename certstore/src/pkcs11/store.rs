//! Store and identity over a [`TokenModule`]

use std::fmt;

use der::asn1::UintRef;
use der::Encode;

use super::{TokenKey, TokenMechanism, TokenModule};
use crate::certificate::{Certificate, PublicKey};
use crate::encoding::{check_digest, digest_info, encode_ecdsa_signature};
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::identity::{Identity, Signer, Store};

#[cfg(feature = "pkcs11")]
use crate::config::Pkcs11Config;

/// DER INTEGER encoding of a serial, the form tokens store in `CKA_SERIAL_NUMBER`
fn encode_serial(serial: &[u8]) -> Result<Vec<u8>> {
    UintRef::new(serial)
        .and_then(|uint| uint.to_der())
        .map_err(|e| Error::Config(format!("bad certificate serial: {}", e)))
}

// ============================================================================
// Signer
// ============================================================================

/// Signs with a token key, producing the same encodings as the CNG path
pub struct TokenSigner {
    public_key: PublicKey,
    key: Box<dyn TokenKey>,
}

impl TokenSigner {
    pub fn new(public_key: PublicKey, key: Box<dyn TokenKey>) -> Self {
        Self { public_key, key }
    }
}

impl Signer for TokenSigner {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        check_digest(hash, digest)?;
        match &self.public_key {
            PublicKey::Rsa(_) => {
                log::debug!("Signing {} digest with token RSA key", hash);
                self.key
                    .sign(TokenMechanism::RsaPkcs, &digest_info(hash, digest)?)
            }
            PublicKey::Ec(_) => {
                log::debug!("Signing {} digest with token EC key", hash);
                let raw = self.key.sign(TokenMechanism::Ecdsa, digest)?;
                encode_ecdsa_signature(&raw)
            }
            PublicKey::Other { .. } => Err(Error::NotSupported("token key algorithm")),
        }
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("algorithm", &self.public_key.algorithm_name())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Identity
// ============================================================================

/// The configured token certificate and its key
#[derive(Debug)]
pub struct Pkcs11Identity {
    certificate: Certificate,
    signer: TokenSigner,
    closed: bool,
}

impl Pkcs11Identity {
    pub fn new(certificate: Certificate, signer: TokenSigner) -> Self {
        Self {
            certificate,
            signer,
            closed: false,
        }
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("identity closed"));
        }
        Ok(())
    }
}

impl Identity for Pkcs11Identity {
    fn certificate(&self) -> Result<Certificate> {
        self.check()?;
        Ok(self.certificate.clone())
    }

    fn signer(&mut self) -> Result<&dyn Signer> {
        self.check()?;
        Ok(&self.signer)
    }

    fn delete(&mut self) -> Result<()> {
        self.check()?;
        Err(Error::NotSupported("deleting token identities"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ============================================================================
// Store
// ============================================================================

/// Read-only view of one certificate on a hardware token
pub struct Pkcs11Store {
    module: Option<Box<dyn TokenModule>>,
    serial: Vec<u8>,
}

impl Pkcs11Store {
    /// Load the configured module and open a session on its slot
    #[cfg(feature = "pkcs11")]
    pub fn open(config: &Pkcs11Config) -> Result<Self> {
        let serial = config.serial_bytes()?;
        let module = super::CryptokiModule::open(config)?;
        Ok(Self::with_module(Box::new(module), serial))
    }

    /// Serve the certificate with serial number `serial` from `module`
    pub fn with_module(module: Box<dyn TokenModule>, serial: Vec<u8>) -> Self {
        Self {
            module: Some(module),
            serial,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.module.is_none()
    }
}

impl Store for Pkcs11Store {
    fn identities(&mut self) -> Result<Vec<Box<dyn Identity>>> {
        let module = self
            .module
            .as_mut()
            .ok_or(Error::InvalidState("store closed"))?;
        let serial_der = encode_serial(&self.serial)?;

        let der = module.find_certificate(&serial_der)?.ok_or_else(|| {
            Error::KeyNotFound(format!(
                "no token certificate with serial {}",
                hex::encode_upper(&self.serial)
            ))
        })?;
        let certificate = Certificate::from_der(&der)?;
        let public_key = certificate.public_key()?;
        let key_id = certificate.subject_key_id()?.ok_or_else(|| {
            Error::KeyNotFound("token certificate has no subject key identifier".to_string())
        })?;

        let key = module.find_key_pair(&key_id, &public_key)?.ok_or_else(|| {
            Error::KeyNotFound(format!("no token key with id {}", hex::encode(&key_id)))
        })?;
        log::debug!("Found token identity {}", certificate.subject());

        let identity = Pkcs11Identity::new(certificate, TokenSigner::new(public_key, key));
        Ok(vec![Box::new(identity)])
    }

    fn import(&mut self, _data: &[u8], _password: &str) -> Result<Vec<Box<dyn Identity>>> {
        Err(Error::NotSupported("importing into a PKCS#11 token"))
    }

    fn close(&mut self) -> Result<()> {
        let mut module = self
            .module
            .take()
            .ok_or(Error::InvalidState("store closed"))?;
        log::debug!("Closing PKCS#11 store");
        module.close()
    }
}

impl fmt::Debug for Pkcs11Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Store")
            .field("serial", &hex::encode_upper(&self.serial))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Pkcs11Store {
    fn drop(&mut self) {
        if let Some(mut module) = self.module.take() {
            if let Err(e) = module.close() {
                log::warn!("Failed to close PKCS#11 module: {}", e);
            }
        }
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
