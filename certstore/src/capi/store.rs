//! System certificate stores
//!
//! ## Iteration
//!
//! [`CertStore::next_entry`] walks the store with a native cursor. Every
//! entry it yields is an independent duplicate of the cursor, so it stays
//! valid after the cursor moves on or the store is closed. Iteration stops
//! at the first native failure; [`CertStore::last_error`] then tells the
//! benign end of the store (`CRYPT_E_NOT_FOUND`) apart from a real error.
//!
//! ## Cleanup
//!
//! Enumeration and import never return a partial result. When either fails
//! halfway, the identities built so far are closed before the error is
//! returned, and the transient store of an import is always closed.

use std::sync::Arc;

use super::api::{CryptoApi, RawStore};
use super::handles::{CertContext, StoreHandle};
use super::identity::CapiIdentity;
use crate::config::{KeyPreference, StoreConfig};
use crate::error::{Error, ErrorCode, NativeError, Result, ResultExt};
use crate::identity::{close_all, Identity, Store};

/// A certificate store opened through the native API
pub struct CertStore {
    api: Arc<dyn CryptoApi>,
    preference: KeyPreference,
    // released before the store itself
    cursor: Option<CertContext>,
    handle: StoreHandle,
    error: Option<NativeError>,
    closed: bool,
}

impl CertStore {
    /// Open a system store of the current user, e.g. `"MY"`
    pub fn open(api: Arc<dyn CryptoApi>, name: &str, preference: KeyPreference) -> Result<Self> {
        let raw = api.open_system_store(name).map_err(|source| Error::StoreOpen {
            name: name.to_string(),
            source,
        })?;
        log::debug!("Opened certificate store {}", name);
        Ok(Self::from_raw(api, raw, preference))
    }

    fn from_raw(api: Arc<dyn CryptoApi>, raw: RawStore, preference: KeyPreference) -> Self {
        Self {
            handle: StoreHandle::new(Arc::clone(&api), raw),
            api,
            preference,
            cursor: None,
            error: None,
            closed: false,
        }
    }

    fn raw(&self) -> Result<RawStore> {
        if self.closed {
            return Err(Error::InvalidState("store closed"));
        }
        self.handle
            .raw()
            .ok_or(Error::InvalidState("nil certificate store"))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Advance to the next certificate
    ///
    /// Returns `Ok(None)` once iteration has stopped, either at the end of
    /// the store or on a native failure recorded for [`last_error`](Self::last_error).
    pub fn next_entry(&mut self) -> Result<Option<CertContext>> {
        let store = self.raw()?;
        if self.error.is_some() {
            return Ok(None);
        }

        let prev = self.cursor.take().map(CertContext::into_raw);
        match self.api.find_next_certificate(store, prev) {
            Ok(raw) => {
                let cursor = CertContext::new(Arc::clone(&self.api), raw);
                let entry = cursor.try_clone();
                self.cursor = Some(cursor);
                Ok(Some(entry))
            }
            Err(e) => {
                self.error = Some(e);
                Ok(None)
            }
        }
    }

    /// Why iteration stopped; `Ok` for the benign end of the store
    pub fn last_error(&self) -> Result<()> {
        self.raw()?;
        match self.error {
            None | Some(NativeError::Code(ErrorCode::CRYPT_E_NOT_FOUND)) => Ok(()),
            Some(e) => Err(Error::native_call("enumerate certificates", e)),
        }
    }

    /// Restart iteration from the first certificate
    pub fn reset(&mut self) -> Result<()> {
        self.raw()?;
        self.cursor = None;
        self.error = None;
        Ok(())
    }

    /// Import a PKCS#12 bundle and copy its certificates into this store
    ///
    /// Keys are imported for the current user, into a CNG key storage
    /// provider when the store's preference asks for one.
    pub fn import_bundle(&mut self, data: &[u8], password: &str) -> Result<Vec<Box<dyn Identity>>> {
        self.raw()?;
        let raw = self
            .api
            .import_pfx(data, password, self.preference.pfx_import_flags())
            .map_err(|e| Error::native_call("import PFX cert store", e))?;

        let mut transient = CertStore::from_raw(Arc::clone(&self.api), raw, self.preference);
        let result = self.copy_from(&mut transient);
        if let Err(e) = transient.close() {
            log::warn!("Failed to close imported PFX store: {}", e);
        }

        if let Ok(identities) = &result {
            log::debug!("Imported {} certificates", identities.len());
        }
        result
    }

    fn copy_from(&mut self, source: &mut CertStore) -> Result<Vec<Box<dyn Identity>>> {
        let store = self.raw()?;
        let mut identities: Vec<Box<dyn Identity>> = Vec::new();

        while let Some(entry) = source.next_entry()? {
            match self.api.add_certificate(store, &entry.der()) {
                Ok(raw) => {
                    let added = CertContext::new(Arc::clone(&self.api), raw);
                    identities.push(Box::new(CapiIdentity::new(
                        Arc::clone(&self.api),
                        added,
                        self.preference,
                    )));
                }
                Err(e) => {
                    close_all(&mut identities);
                    return Err(Error::native_call("add imported certificate to store", e));
                }
            }
        }

        if let Err(e) = source.last_error() {
            close_all(&mut identities);
            return Err(e);
        }

        Ok(identities)
    }

    fn collect_identities(&mut self) -> Result<Vec<Box<dyn Identity>>> {
        self.reset()?;
        let mut identities: Vec<Box<dyn Identity>> = Vec::new();

        while let Some(entry) = self.next_entry()? {
            identities.push(Box::new(CapiIdentity::new(
                Arc::clone(&self.api),
                entry,
                self.preference,
            )));
        }

        if let Err(e) = self.last_error() {
            close_all(&mut identities);
            return Err(e);
        }

        log::debug!("Enumerated {} certificates", identities.len());
        Ok(identities)
    }

    /// Release the cursor and the store
    pub fn close(&mut self) -> Result<()> {
        self.raw()?;
        self.cursor = None;
        self.closed = true;
        self.handle
            .close()
            .map_err(|e| Error::native_call("close certificate store", e))
    }
}

impl Store for CertStore {
    fn identities(&mut self) -> Result<Vec<Box<dyn Identity>>> {
        self.collect_identities()
    }

    fn import(&mut self, data: &[u8], password: &str) -> Result<Vec<Box<dyn Identity>>> {
        self.import_bundle(data, password)
    }

    fn close(&mut self) -> Result<()> {
        CertStore::close(self)
    }
}

impl Drop for CertStore {
    fn drop(&mut self) {
        // cursor first; the store handle closes itself afterwards
        self.cursor = None;
    }
}

/// Every identity in the configured system store
///
/// The store is opened for the duration of the call only.
pub fn find_identities(
    api: Arc<dyn CryptoApi>,
    config: &StoreConfig,
) -> Result<Vec<Box<dyn Identity>>> {
    let mut store = CertStore::open(api, &config.store_name, config.key_preference)?;
    let result = store.collect_identities().context("list identities");
    if let Err(e) = store.close() {
        log::warn!("Failed to close certificate store {}: {}", config.store_name, e);
    }
    result
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
