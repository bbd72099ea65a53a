//! [`CryptoApi`] bound to crypt32, advapi32 and ncrypt

use std::ffi::{c_void, CStr};

use windows::core::{PCSTR, PCWSTR};
use windows::Win32::Foundation::{GetLastError, BOOL};
use windows::Win32::Security::Cryptography::{
    CertAddEncodedCertificateToStore, CertCloseStore, CertDeleteCertificateFromStore,
    CertDuplicateCertificateContext, CertFindCertificateInStore, CertFreeCertificateContext,
    CertOpenStore, CryptAcquireCertificatePrivateKey, CryptAcquireContextA, CryptCreateHash,
    CryptDestroyHash, CryptFindCertificateKeyProvInfo, CryptGetHashParam, CryptGetProvParam,
    CryptReleaseContext, CryptSetHashParam, CryptSignHashW, NCryptDeleteKey, NCryptFreeObject,
    NCryptSignHash, PFXImportCertStore, ALG_ID, BCRYPT_PKCS1_PADDING_INFO,
    BCRYPT_SHA1_ALGORITHM, BCRYPT_SHA256_ALGORITHM, BCRYPT_SHA384_ALGORITHM,
    BCRYPT_SHA512_ALGORITHM, CERT_CONTEXT, CERT_FIND_ANY, CERT_KEY_SPEC, CERT_OPEN_STORE_FLAGS, CERT_QUERY_ENCODING_TYPE,
    CERT_STORE_ADD_REPLACE_EXISTING, CERT_STORE_PROV_SYSTEM_W, CERT_SYSTEM_STORE_CURRENT_USER,
    CRYPT_ACQUIRE_FLAGS, CRYPT_DELETEKEYSET, CRYPT_FIND_FLAGS, CRYPT_INTEGER_BLOB,
    CRYPT_KEY_FLAGS, HCERTSTORE, HCRYPTPROV_LEGACY, HCRYPTPROV_OR_NCRYPT_KEY_HANDLE, HP_HASHSIZE,
    HP_HASHVAL, NCRYPT_FLAGS, NCRYPT_HANDLE, NCRYPT_KEY_HANDLE, NCRYPT_PAD_PKCS1_FLAG,
    PKCS_7_ASN_ENCODING, X509_ASN_ENCODING,
};

use super::api::{
    AcquiredKey, CryptoApi, NativeResult, Pkcs1Padding, ProviderParam, RawCert, RawHash, RawKey,
    RawProvider, RawStore,
};
use crate::error::{ErrorCode, NativeError, SecurityStatus};
use crate::hash::HashAlgorithm;

// CRYPT_ACQUIRE_ALLOW_NCRYPT_KEY_FLAG, passed as a find flag
const FIND_ALLOW_NCRYPT_KEY: u32 = 0x0001_0000;

const NTE_NOT_SUPPORTED: i32 = 0x8009_0029_u32 as i32;

// ============================================================================
// Conversions
// ============================================================================

fn encoding() -> CERT_QUERY_ENCODING_TYPE {
    X509_ASN_ENCODING | PKCS_7_ASN_ENCODING
}

fn store_handle(store: RawStore) -> HCERTSTORE {
    HCERTSTORE(store.0 as *mut c_void)
}

fn cert_ptr(cert: RawCert) -> *const CERT_CONTEXT {
    cert.0 as *const CERT_CONTEXT
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// CryptoAPI failure from a call returning `windows::core::Result`
fn code(e: windows::core::Error) -> NativeError {
    NativeError::Code(ErrorCode(e.code().0 as u32))
}

/// Key storage provider failure, which reports a `SECURITY_STATUS`
fn status(e: windows::core::Error) -> NativeError {
    NativeError::Status(SecurityStatus(e.code().0))
}

fn last_error() -> NativeError {
    let err = unsafe { GetLastError() };
    NativeError::Code(ErrorCode(err.0))
}

fn bcrypt_algorithm(hash: HashAlgorithm) -> Option<PCWSTR> {
    match hash {
        HashAlgorithm::Sha1 => Some(BCRYPT_SHA1_ALGORITHM),
        HashAlgorithm::Sha256 => Some(BCRYPT_SHA256_ALGORITHM),
        HashAlgorithm::Sha384 => Some(BCRYPT_SHA384_ALGORITHM),
        HashAlgorithm::Sha512 => Some(BCRYPT_SHA512_ALGORITHM),
        HashAlgorithm::Md5 | HashAlgorithm::Sha224 => None,
    }
}

// ============================================================================
// WindowsCryptoApi
// ============================================================================

/// Native calls against the current user's certificate stores
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsCryptoApi;

impl WindowsCryptoApi {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoApi for WindowsCryptoApi {
    fn open_system_store(&self, name: &str) -> NativeResult<RawStore> {
        let name_wide = to_wide(name);
        let store = unsafe {
            CertOpenStore(
                CERT_STORE_PROV_SYSTEM_W,
                CERT_QUERY_ENCODING_TYPE(0),
                HCRYPTPROV_LEGACY(0),
                CERT_OPEN_STORE_FLAGS(CERT_SYSTEM_STORE_CURRENT_USER),
                Some(name_wide.as_ptr() as *const c_void),
            )
        }
        .map_err(code)?;
        Ok(RawStore(store.0 as usize))
    }

    fn close_store(&self, store: RawStore) -> NativeResult<()> {
        unsafe { CertCloseStore(store_handle(store), 0) }.map_err(code)
    }

    fn find_next_certificate(
        &self,
        store: RawStore,
        prev: Option<RawCert>,
    ) -> NativeResult<RawCert> {
        let ctx = unsafe {
            CertFindCertificateInStore(
                store_handle(store),
                encoding(),
                0,
                CERT_FIND_ANY,
                None,
                prev.map(cert_ptr),
            )
        };
        if ctx.is_null() {
            return Err(last_error());
        }
        Ok(RawCert(ctx as usize))
    }

    fn duplicate_certificate(&self, cert: RawCert) -> RawCert {
        let ctx = unsafe { CertDuplicateCertificateContext(Some(cert_ptr(cert))) };
        RawCert(ctx as usize)
    }

    fn free_certificate(&self, cert: RawCert) {
        unsafe {
            let _ = CertFreeCertificateContext(Some(cert_ptr(cert)));
        }
    }

    fn certificate_der(&self, cert: RawCert) -> Vec<u8> {
        unsafe {
            let ctx = &*cert_ptr(cert);
            if ctx.pbCertEncoded.is_null() {
                return Vec::new();
            }
            std::slice::from_raw_parts(ctx.pbCertEncoded, ctx.cbCertEncoded as usize).to_vec()
        }
    }

    fn delete_certificate(&self, cert: RawCert) -> NativeResult<()> {
        unsafe { CertDeleteCertificateFromStore(cert_ptr(cert)) }.map_err(code)
    }

    fn add_certificate(&self, store: RawStore, der: &[u8]) -> NativeResult<RawCert> {
        let mut added: *mut CERT_CONTEXT = std::ptr::null_mut();
        unsafe {
            CertAddEncodedCertificateToStore(
                store_handle(store),
                encoding(),
                der,
                CERT_STORE_ADD_REPLACE_EXISTING,
                Some(&mut added),
            )
        }
        .map_err(code)?;
        Ok(RawCert(added as usize))
    }

    fn import_pfx(&self, data: &[u8], password: &str, flags: u32) -> NativeResult<RawStore> {
        let blob = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };
        let password_wide = to_wide(password);
        let store = unsafe {
            PFXImportCertStore(
                &blob,
                PCWSTR(password_wide.as_ptr()),
                CRYPT_KEY_FLAGS(flags),
            )
        }
        .map_err(code)?;
        Ok(RawStore(store.0 as usize))
    }

    fn find_key_provider_info(&self, cert: RawCert) -> NativeResult<()> {
        unsafe {
            CryptFindCertificateKeyProvInfo(
                cert_ptr(cert),
                CRYPT_FIND_FLAGS(FIND_ALLOW_NCRYPT_KEY),
                None,
            )
        }
        .map_err(code)
    }

    fn acquire_private_key(&self, cert: RawCert, flags: u32) -> NativeResult<AcquiredKey> {
        let mut handle = HCRYPTPROV_OR_NCRYPT_KEY_HANDLE::default();
        let mut key_spec = CERT_KEY_SPEC::default();
        let mut must_free = BOOL::default();
        unsafe {
            CryptAcquireCertificatePrivateKey(
                cert_ptr(cert),
                CRYPT_ACQUIRE_FLAGS(flags),
                None,
                &mut handle,
                Some(&mut key_spec),
                Some(&mut must_free),
            )
        }
        .map_err(code)?;
        Ok(AcquiredKey {
            handle: handle.0,
            key_spec: key_spec.0,
            caller_must_free: must_free.as_bool(),
        })
    }

    fn release_provider(&self, provider: RawProvider) {
        unsafe {
            let _ = CryptReleaseContext(provider.0, 0);
        }
    }

    fn create_hash(&self, provider: RawProvider, alg_id: u32) -> NativeResult<RawHash> {
        let mut hash = 0usize;
        unsafe { CryptCreateHash(provider.0, ALG_ID(alg_id), 0, 0, &mut hash) }.map_err(code)?;
        Ok(RawHash(hash))
    }

    fn destroy_hash(&self, hash: RawHash) {
        unsafe {
            let _ = CryptDestroyHash(hash.0);
        }
    }

    fn hash_size(&self, hash: RawHash) -> NativeResult<usize> {
        let mut size: u32 = 0;
        let mut len = std::mem::size_of::<u32>() as u32;
        unsafe {
            CryptGetHashParam(
                hash.0,
                HP_HASHSIZE,
                Some(&mut size as *mut u32 as *mut u8),
                &mut len,
                0,
            )
        }
        .map_err(code)?;
        Ok(size as usize)
    }

    fn set_hash_value(&self, hash: RawHash, digest: &[u8]) -> NativeResult<()> {
        unsafe { CryptSetHashParam(hash.0, HP_HASHVAL, digest.as_ptr(), 0) }.map_err(code)
    }

    fn legacy_sign_hash(
        &self,
        hash: RawHash,
        key_spec: u32,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let mut len = out.as_ref().map_or(0, |buf| buf.len() as u32);
        let ptr = out.map(|buf| buf.as_mut_ptr());
        unsafe { CryptSignHashW(hash.0, key_spec, PCWSTR::null(), 0, ptr, &mut len) }
            .map_err(code)?;
        Ok(len as usize)
    }

    fn provider_param(
        &self,
        provider: RawProvider,
        param: ProviderParam,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let mut len = out.as_ref().map_or(0, |buf| buf.len() as u32);
        let ptr = out.map(|buf| buf.as_mut_ptr());
        unsafe { CryptGetProvParam(provider.0, param.id(), ptr, &mut len, 0) }.map_err(code)?;
        Ok(len as usize)
    }

    fn delete_key_set(
        &self,
        container: &CStr,
        provider_name: &CStr,
        provider_type: u32,
    ) -> NativeResult<()> {
        // the returned handle is meaningless once the key set is gone
        let mut provider = 0usize;
        unsafe {
            CryptAcquireContextA(
                &mut provider,
                PCSTR(container.as_ptr() as *const u8),
                PCSTR(provider_name.as_ptr() as *const u8),
                provider_type,
                CRYPT_DELETEKEYSET,
            )
        }
        .map_err(code)
    }

    fn sign_hash(
        &self,
        key: RawKey,
        padding: Option<Pkcs1Padding>,
        digest: &[u8],
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let info = match padding {
            Some(p) => {
                let algorithm = bcrypt_algorithm(p.hash)
                    .ok_or(NativeError::Status(SecurityStatus(NTE_NOT_SUPPORTED)))?;
                Some(BCRYPT_PKCS1_PADDING_INFO {
                    pszAlgId: algorithm,
                })
            }
            None => None,
        };
        let (padding_ptr, flags) = match &info {
            Some(info) => (
                Some(info as *const BCRYPT_PKCS1_PADDING_INFO as *const c_void),
                NCRYPT_PAD_PKCS1_FLAG,
            ),
            None => (None, NCRYPT_FLAGS(0)),
        };

        let mut len: u32 = 0;
        unsafe {
            NCryptSignHash(
                NCRYPT_KEY_HANDLE(key.0),
                padding_ptr,
                digest,
                out,
                &mut len,
                flags,
            )
        }
        .map_err(status)?;
        Ok(len as usize)
    }

    fn delete_key(&self, key: RawKey) -> NativeResult<()> {
        unsafe { NCryptDeleteKey(NCRYPT_KEY_HANDLE(key.0), 0) }.map_err(status)
    }

    fn free_key(&self, key: RawKey) {
        unsafe {
            let _ = NCryptFreeObject(NCRYPT_HANDLE(key.0));
        }
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcrypt_algorithm_covers_signable_hashes_only() {
        for hash in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(bcrypt_algorithm(hash).is_some(), hash.is_signable(), "{}", hash);
        }
    }
}
