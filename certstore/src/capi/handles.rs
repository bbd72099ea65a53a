//! Scoped native handles
//!
//! Each guard releases its handle exactly once when dropped. Guards that
//! hand their handle to a consuming native call give up ownership first.

use std::fmt;
use std::sync::Arc;

use super::api::{CryptoApi, NativeResult, RawCert, RawHash, RawProvider, RawStore};

/// An open certificate store
pub(crate) struct StoreHandle {
    api: Arc<dyn CryptoApi>,
    raw: Option<RawStore>,
}

impl StoreHandle {
    pub(crate) fn new(api: Arc<dyn CryptoApi>, raw: RawStore) -> Self {
        Self { api, raw: Some(raw) }
    }

    pub(crate) fn raw(&self) -> Option<RawStore> {
        self.raw
    }

    /// Close now and report the native result
    pub(crate) fn close(&mut self) -> NativeResult<()> {
        match self.raw.take() {
            Some(raw) => self.api.close_store(raw),
            None => Ok(()),
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close certificate store: {}", e);
        }
    }
}

/// An owned reference to a certificate context
pub struct CertContext {
    api: Arc<dyn CryptoApi>,
    raw: Option<RawCert>,
}

impl CertContext {
    pub(crate) fn new(api: Arc<dyn CryptoApi>, raw: RawCert) -> Self {
        Self { api, raw: Some(raw) }
    }

    pub(crate) fn raw(&self) -> RawCert {
        // raw is only taken by methods that consume self
        self.raw.unwrap_or(RawCert(0))
    }

    /// DER encoding of the certificate
    pub fn der(&self) -> Vec<u8> {
        self.api.certificate_der(self.raw())
    }

    /// An independent reference to the same certificate
    pub fn try_clone(&self) -> CertContext {
        let dup = self.api.duplicate_certificate(self.raw());
        CertContext::new(Arc::clone(&self.api), dup)
    }

    /// Delete the certificate from its store, consuming this reference
    pub(crate) fn delete(mut self) -> NativeResult<()> {
        let raw = self.raw();
        self.raw = None;
        self.api.delete_certificate(raw)
    }

    /// Give up ownership without freeing
    pub(crate) fn into_raw(mut self) -> RawCert {
        let raw = self.raw();
        self.raw = None;
        raw
    }
}

impl fmt::Debug for CertContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CertContext").field(&self.raw).finish()
    }
}

impl Drop for CertContext {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.api.free_certificate(raw);
        }
    }
}

/// A legacy hash object, destroyed on drop
pub(crate) struct HashObject<'a> {
    api: &'a dyn CryptoApi,
    raw: RawHash,
}

impl<'a> HashObject<'a> {
    pub(crate) fn create(
        api: &'a dyn CryptoApi,
        provider: RawProvider,
        alg_id: u32,
    ) -> NativeResult<Self> {
        let raw = api.create_hash(provider, alg_id)?;
        Ok(Self { api, raw })
    }

    pub(crate) fn raw(&self) -> RawHash {
        self.raw
    }
}

impl Drop for HashObject<'_> {
    fn drop(&mut self) {
        self.api.destroy_hash(self.raw);
    }
}
