//! CryptoAPI and CNG certificate store backend
//!
//! Certificates come from a Windows system store. Their private keys may
//! live in a legacy CryptoAPI provider or a CNG key storage provider; the
//! [`PrivateKey`] type hides which one behind the [`Signer`](crate::Signer)
//! trait.
//!
//! All native calls go through [`CryptoApi`]. On Windows,
//! [`WindowsCryptoApi`] binds it to the system libraries.

mod api;
mod handles;
mod identity;
mod private_key;
mod store;

#[cfg(windows)]
mod native;

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
#[cfg(test)]
pub(crate) mod fake;

pub use api::{
    AcquiredKey, CryptoApi, NativeResult, Pkcs1Padding, ProviderParam, RawCert, RawHash, RawKey,
    RawProvider, RawStore, CERT_NCRYPT_KEY_SPEC,
};
pub use handles::CertContext;
pub use identity::CapiIdentity;
pub use private_key::PrivateKey;
pub use store::{find_identities, CertStore};

#[cfg(windows)]
pub use native::WindowsCryptoApi;
