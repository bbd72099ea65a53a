//! # certstore
//!
//! Signing identities over OS certificate stores and PKCS#11 tokens.
//!
//! A [`Store`] yields [`Identity`] values. Each pairs a [`Certificate`]
//! with a [`Signer`] for the matching private key, wherever that key lives:
//!
//! - **CryptoAPI / CNG** ([`capi`]): certificates in a Windows system store,
//!   keys in a legacy provider or a key storage provider.
//! - **PKCS#11** ([`pkcs11`]): one configured certificate on a hardware
//!   token. Import and delete are not supported.
//!
//! Signers take a finished digest. RSA keys produce PKCS#1 v1.5 signatures
//! and EC keys produce DER `Ecdsa-Sig-Value` bytes on every backend.
//!
//! ## Usage
//!
//! ```no_run
//! use certstore::{open_store, HashAlgorithm, StoreConfig};
//!
//! # fn main() -> certstore::Result<()> {
//! let mut store = open_store(&StoreConfig::default())?;
//! for mut identity in store.identities()? {
//!     let cert = identity.certificate()?;
//!     let signature = identity.signer()?.sign(&[0u8; 32], HashAlgorithm::Sha256)?;
//!     println!("{}: {} bytes", cert.subject(), signature.len());
//!     identity.close()?;
//! }
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod capi;
pub mod certificate;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod identity;
pub mod pkcs11;

pub use certificate::{Certificate, EcCurve, EcPublicKey, PublicKey};
pub use config::{KeyPreference, Pkcs11Config, StoreConfig};
pub use error::{Error, ErrorCode, ErrorKind, NativeError, Result, ResultExt, SecurityStatus};
pub use hash::HashAlgorithm;
pub use identity::{Identity, Signer, Store};

/// Open the certificate store for this platform
///
/// On Windows this is the system store named by `config.store_name`. On
/// other platforms it is the PKCS#11 token from `config.pkcs11` when built
/// with the `pkcs11` feature, and `NotSupported` otherwise.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    platform_store(config)
}

#[cfg(windows)]
fn platform_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    let api: std::sync::Arc<dyn capi::CryptoApi> = std::sync::Arc::new(capi::WindowsCryptoApi);
    let store = capi::CertStore::open(api, &config.store_name, config.key_preference)?;
    Ok(Box::new(store))
}

#[cfg(all(not(windows), feature = "pkcs11"))]
fn platform_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    let store = pkcs11::Pkcs11Store::open(&config.pkcs11)?;
    Ok(Box::new(store))
}

#[cfg(all(not(windows), not(feature = "pkcs11")))]
fn platform_store(_config: &StoreConfig) -> Result<Box<dyn Store>> {
    Err(Error::NotSupported(
        "certificate stores on this platform (build with the pkcs11 feature)",
    ))
}

/// Open the platform store, collect every identity, and close the store
///
/// Token identities returned this way can no longer sign, since closing
/// the store ends the token session. Keep the store from [`open_store`]
/// open while signing.
pub fn list_identities(config: &StoreConfig) -> Result<Vec<Box<dyn Identity>>> {
    #[cfg(windows)]
    {
        capi::find_identities(std::sync::Arc::new(capi::WindowsCryptoApi), config)
    }
    #[cfg(not(windows))]
    {
        let mut store = open_store(config)?;
        let result = store.identities().context("list identities");
        if let Err(e) = store.close() {
            log::warn!("Failed to close certificate store: {}", e);
        }
        result
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
