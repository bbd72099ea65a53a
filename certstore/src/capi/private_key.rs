//! Private keys bound to a certificate
//!
//! A key is reached either through a legacy CryptoAPI provider or through a
//! CNG key storage provider. Which one is decided once, at acquisition,
//! from the key spec the system reports, and the two signing paths never
//! mix.

use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

use super::api::{
    CryptoApi, Pkcs1Padding, ProviderParam, RawKey, RawProvider, CERT_NCRYPT_KEY_SPEC,
};
use super::handles::{CertContext, HashObject};
use crate::certificate::PublicKey;
use crate::config::KeyPreference;
use crate::encoding::{check_digest, encode_ecdsa_signature, reverse_signature};
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::identity::Signer;

// CryptoAPI ALG_ID values
const CALG_SHA1: u32 = 0x8004;
const CALG_SHA_256: u32 = 0x800c;
const CALG_SHA_384: u32 = 0x800d;
const CALG_SHA_512: u32 = 0x800e;

/// The native handle behind a private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyBackend {
    /// CryptoAPI provider plus `AT_KEYEXCHANGE` or `AT_SIGNATURE`
    Legacy { provider: RawProvider, key_spec: u32 },
    /// CNG key handle
    Modern { key: RawKey },
}

/// A certificate's private key
pub struct PrivateKey {
    api: Arc<dyn CryptoApi>,
    public_key: PublicKey,
    backend: Option<KeyBackend>,
}

impl PrivateKey {
    /// Locate and acquire the private key for `cert`
    pub(crate) fn resolve(
        api: Arc<dyn CryptoApi>,
        cert: &CertContext,
        public_key: PublicKey,
        preference: KeyPreference,
    ) -> Result<Self> {
        if public_key.is_empty() {
            return Err(Error::MissingPublicKey);
        }

        api.find_key_provider_info(cert.raw())
            .map_err(|e| Error::KeyNotFound(e.to_string()))?;

        let acquired = api
            .acquire_private_key(cert.raw(), preference.acquire_flags())
            .map_err(Error::AcquireFailed)?;

        // A cached handle belongs to the system; never release it
        if !acquired.caller_must_free {
            return Err(Error::UnexpectedCaching);
        }

        let backend = if acquired.key_spec == CERT_NCRYPT_KEY_SPEC {
            log::debug!("Acquired CNG key for {}", public_key.algorithm_name());
            KeyBackend::Modern {
                key: RawKey(acquired.handle),
            }
        } else {
            log::debug!(
                "Acquired CryptoAPI key (key spec {}) for {}",
                acquired.key_spec,
                public_key.algorithm_name()
            );
            KeyBackend::Legacy {
                provider: RawProvider(acquired.handle),
                key_spec: acquired.key_spec,
            }
        };

        Ok(Self {
            api,
            public_key,
            backend: Some(backend),
        })
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> Option<KeyBackend> {
        self.backend
    }

    pub fn is_cng(&self) -> bool {
        matches!(self.backend, Some(KeyBackend::Modern { .. }))
    }

    fn sign_modern(&self, key: RawKey, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        let padding = match &self.public_key {
            PublicKey::Rsa(_) => {
                if !hash.is_signable() {
                    return Err(Error::UnsupportedHash(hash));
                }
                Some(Pkcs1Padding { hash })
            }
            _ => None,
        };

        let len = self
            .api
            .sign_hash(key, padding, digest, None)
            .map_err(|e| Error::native_call("get signature length", e))?;

        let mut signature = vec![0u8; len];
        let written = self
            .api
            .sign_hash(key, padding, digest, Some(&mut signature))
            .map_err(|e| Error::native_call("sign digest", e))?;
        signature.truncate(written);

        // CNG produces raw (r || s); verifiers want DER
        match &self.public_key {
            PublicKey::Ec(_) => encode_ecdsa_signature(&signature),
            _ => Ok(signature),
        }
    }

    fn sign_legacy(
        &self,
        provider: RawProvider,
        key_spec: u32,
        digest: &[u8],
        hash: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        let alg_id = match hash {
            HashAlgorithm::Sha1 => CALG_SHA1,
            HashAlgorithm::Sha256 => CALG_SHA_256,
            HashAlgorithm::Sha384 => CALG_SHA_384,
            HashAlgorithm::Sha512 => CALG_SHA_512,
            other => return Err(Error::UnsupportedHash(other)),
        };

        let api = self.api.as_ref();
        let hash_object = HashObject::create(api, provider, alg_id)
            .map_err(|e| Error::native_call("create hash", e))?;

        let size = api
            .hash_size(hash_object.raw())
            .map_err(|e| Error::native_call("get hash size", e))?;
        if size != hash.size() {
            return Err(Error::HashSizeMismatch {
                expected: hash.size(),
                actual: size,
            });
        }

        // The digest is final; the provider must not hash it again
        api.set_hash_value(hash_object.raw(), digest)
            .map_err(|e| Error::native_call("set hash digest", e))?;

        let len = api
            .legacy_sign_hash(hash_object.raw(), key_spec, None)
            .map_err(|e| Error::native_call("get signature length", e))?;

        let mut signature = vec![0u8; len];
        let written = api
            .legacy_sign_hash(hash_object.raw(), key_spec, Some(&mut signature))
            .map_err(|e| Error::native_call("sign digest", e))?;
        signature.truncate(written);

        Ok(reverse_signature(signature))
    }

    /// Remove the key from its provider
    pub fn delete(&mut self) -> Result<()> {
        match self.backend {
            Some(KeyBackend::Modern { key }) => {
                self.api.delete_key(key).map_err(|e| Error::DeleteFailed {
                    target: "private key",
                    source: Box::new(Error::native_call("delete CNG key", e)),
                })?;
                // deletion freed the handle
                self.backend = None;
                Ok(())
            }
            Some(KeyBackend::Legacy { provider, .. }) => {
                let container = self.provider_param(provider, ProviderParam::Container)?;
                let name = self.provider_param(provider, ProviderParam::Name)?;
                let provider_type = self.provider_param(provider, ProviderParam::ProviderType)?;

                let container = c_string(&container, ProviderParam::Container)?;
                let name = c_string(&name, ProviderParam::Name)?;
                let provider_type = dword(&provider_type)?;

                self.api
                    .delete_key_set(container, name, provider_type)
                    .map_err(|e| Error::DeleteFailed {
                        target: "private key",
                        source: Box::new(Error::native_call("delete key set", e)),
                    })
            }
            None => Err(Error::NoBackend),
        }
    }

    /// Read a provider parameter into an owned buffer
    fn provider_param(&self, provider: RawProvider, param: ProviderParam) -> Result<Vec<u8>> {
        let as_error = |source| Error::ProviderParam {
            param: param.name(),
            source,
        };

        let len = self
            .api
            .provider_param(provider, param, None)
            .map_err(as_error)?;
        let mut data = vec![0u8; len];
        let written = self
            .api
            .provider_param(provider, param, Some(&mut data))
            .map_err(as_error)?;
        data.truncate(written);
        Ok(data)
    }

    /// Release the backend handle. Safe to call more than once.
    pub fn close(&mut self) {
        match self.backend.take() {
            Some(KeyBackend::Modern { key }) => self.api.free_key(key),
            Some(KeyBackend::Legacy { provider, .. }) => self.api.release_provider(provider),
            None => {}
        }
    }
}

fn c_string(data: &[u8], param: ProviderParam) -> Result<&CStr> {
    CStr::from_bytes_until_nul(data).map_err(|_| {
        Error::Parse(format!("{} is not a NUL terminated string", param.name()))
    })
}

fn dword(data: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Parse(format!("PP_PROVTYPE has {} bytes", data.len())))?;
    Ok(u32::from_le_bytes(bytes))
}

impl Signer for PrivateKey {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        check_digest(hash, digest)?;

        match self.backend {
            Some(KeyBackend::Modern { key }) => self.sign_modern(key, digest, hash),
            Some(KeyBackend::Legacy { provider, key_spec }) => {
                self.sign_legacy(provider, key_spec, digest, hash)
            }
            None => Err(Error::NoBackend),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.public_key.algorithm_name())
            .field("backend", &self.backend)
            .finish()
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
