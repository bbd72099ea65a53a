//! Capability traits shared by every store backend
//!
//! A [`Store`] hands out [`Identity`] values. Each identity pairs a
//! certificate with a private key that is reachable through a [`Signer`].
//! Backends with fewer capabilities still implement every method and
//! return [`Error::NotSupported`](crate::Error::NotSupported), so callers
//! can branch on [`ErrorKind`](crate::ErrorKind) instead of on the backend.

use crate::certificate::{Certificate, PublicKey};
use crate::error::Result;
use crate::hash::HashAlgorithm;

/// Signs finished digests with a private key
pub trait Signer {
    /// Public half of the signing key
    fn public_key(&self) -> &PublicKey;

    /// Sign a digest produced by `hash`
    ///
    /// `digest` must be exactly `hash.size()` bytes. RSA keys return
    /// PKCS#1 v1.5 signature bytes, EC keys return a DER `Ecdsa-Sig-Value`.
    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>>;
}

/// A certificate and its private key
pub trait Identity {
    /// The identity's leaf certificate
    fn certificate(&self) -> Result<Certificate>;

    /// Certificate chain starting at the leaf
    fn certificate_chain(&self) -> Result<Vec<Certificate>> {
        Ok(vec![self.certificate()?])
    }

    /// Signer for the identity's private key
    ///
    /// The key is located on first use and cached for the identity's
    /// lifetime, so repeated calls return the same signer.
    fn signer(&mut self) -> Result<&dyn Signer>;

    /// Remove the certificate and its private key from the store
    fn delete(&mut self) -> Result<()>;

    /// Release the certificate reference and any acquired key
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A collection of identities
pub trait Store {
    /// Every identity currently in the store
    ///
    /// Either all identities are returned or none are: on failure the
    /// identities built so far are closed before the error is returned.
    fn identities(&mut self) -> Result<Vec<Box<dyn Identity>>>;

    /// Import a password protected PKCS#12 bundle
    fn import(&mut self, data: &[u8], password: &str) -> Result<Vec<Box<dyn Identity>>>;

    /// Release the store. Calls after the first fail with `InvalidState`.
    fn close(&mut self) -> Result<()>;
}

/// Close every identity, logging rather than returning failures
pub(crate) fn close_all(identities: &mut [Box<dyn Identity>]) {
    if identities.is_empty() {
        return;
    }
    let mut failed = 0usize;
    for identity in identities.iter_mut() {
        if let Err(e) = identity.close() {
            failed += 1;
            log::warn!("Failed to close identity during cleanup: {}", e);
        }
    }
    log::warn!(
        "Closed {} partially built identities ({} close failures)",
        identities.len(),
        failed
    );
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
