//! Hardware-token store reached through a PKCS#11 module
//!
//! This backend can only enumerate one configured certificate and sign
//! with its key. Import and delete fail with
//! [`Error::NotSupported`](crate::Error::NotSupported).
//!
//! The store talks to the token through [`TokenModule`]. With the `pkcs11`
//! feature, [`CryptokiModule`] implements it over a real module.

use crate::certificate::PublicKey;
use crate::error::Result;

mod store;

#[cfg(feature = "pkcs11")]
mod module;

pub use store::{Pkcs11Identity, Pkcs11Store, TokenSigner};

#[cfg(feature = "pkcs11")]
pub use module::CryptokiModule;

/// Raw token signing mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMechanism {
    /// `CKM_RSA_PKCS`: PKCS#1 v1.5 padding over caller supplied `DigestInfo`
    RsaPkcs,
    /// `CKM_ECDSA`: raw `(r || s)` over a digest
    Ecdsa,
}

/// Private key object on a token
pub trait TokenKey {
    fn sign(&self, mechanism: TokenMechanism, data: &[u8]) -> Result<Vec<u8>>;
}

/// The handful of module operations the store needs
pub trait TokenModule {
    /// DER certificate whose `CKA_SERIAL_NUMBER` equals `serial_der`
    fn find_certificate(&mut self, serial_der: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Private key whose `CKA_ID` equals `key_id`
    fn find_key_pair(
        &mut self,
        key_id: &[u8],
        public_key: &PublicKey,
    ) -> Result<Option<Box<dyn TokenKey>>>;

    /// End the session. Keys found earlier stop working.
    fn close(&mut self) -> Result<()>;
}
