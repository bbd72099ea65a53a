//! Identities backed by a certificate context

use std::fmt;
use std::sync::Arc;

use super::api::CryptoApi;
use super::handles::CertContext;
use super::private_key::PrivateKey;
use crate::certificate::Certificate;
use crate::config::KeyPreference;
use crate::error::{Error, ErrorKind, Result};
use crate::identity::{Identity, Signer};

/// A certificate from a system store and its lazily acquired private key
pub struct CapiIdentity {
    api: Arc<dyn CryptoApi>,
    preference: KeyPreference,
    // key is released before the certificate it was acquired through
    key: Option<PrivateKey>,
    cert: Option<CertContext>,
    closed: bool,
}

impl CapiIdentity {
    /// Wrap an owned certificate reference
    pub(crate) fn new(
        api: Arc<dyn CryptoApi>,
        cert: CertContext,
        preference: KeyPreference,
    ) -> Self {
        Self {
            api,
            preference,
            key: None,
            cert: Some(cert),
            closed: false,
        }
    }

    fn check(&self) -> Result<&CertContext> {
        if self.closed {
            return Err(Error::InvalidState("identity closed"));
        }
        self.cert
            .as_ref()
            .ok_or(Error::InvalidState("nil certificate context"))
    }

    fn resolve_key(&self) -> Result<PrivateKey> {
        let cert = self.check()?;
        let public_key = Certificate::from_der(&cert.der())?.public_key()?;
        PrivateKey::resolve(Arc::clone(&self.api), cert, public_key, self.preference)
    }

    /// The private key, acquired on first use
    pub fn private_key(&mut self) -> Result<&mut PrivateKey> {
        self.check()?;
        if self.key.is_none() {
            let key = self.resolve_key()?;
            self.key = Some(key);
        }
        self.key.as_mut().ok_or(Error::NoBackend)
    }
}

impl Identity for CapiIdentity {
    fn certificate(&self) -> Result<Certificate> {
        let cert = self.check()?;
        Certificate::from_der(&cert.der())
    }

    fn signer(&mut self) -> Result<&dyn Signer> {
        let key: &PrivateKey = self.private_key()?;
        Ok(key)
    }

    fn delete(&mut self) -> Result<()> {
        // deleting consumes the reference, so hand it a duplicate
        let cert = self.check()?.try_clone();
        cert.delete().map_err(|e| Error::DeleteFailed {
            target: "certificate",
            source: Box::new(Error::native_call("delete certificate", e)),
        })?;

        let key_half = |e: Error| match e.kind() {
            ErrorKind::DeleteFailed => e,
            _ => Error::DeleteFailed {
                target: "private key",
                source: Box::new(e),
            },
        };

        let key = self.private_key().map_err(key_half)?;
        key.delete().map_err(key_half)?;
        log::debug!("Deleted identity certificate and private key");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(mut key) = self.key.take() {
            key.close();
        }
        self.cert = None;
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for CapiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapiIdentity")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for CapiIdentity {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
