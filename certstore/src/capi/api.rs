//! Native call surface of the CryptoAPI and CNG backend
//!
//! [`CryptoApi`] has one method per native function the store uses. The
//! store, identity and private key types only ever talk to this trait, and
//! own the lifecycle of every handle it returns.

use std::ffi::CStr;

use crate::error::NativeError;
use crate::hash::HashAlgorithm;

/// Result of a native call
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Certificate store handle (`HCERTSTORE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawStore(pub usize);

/// Certificate context pointer (`PCCERT_CONTEXT`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawCert(pub usize);

/// Legacy provider handle (`HCRYPTPROV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawProvider(pub usize);

/// Key storage provider key handle (`NCRYPT_KEY_HANDLE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawKey(pub usize);

/// Legacy hash object (`HCRYPTHASH`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHash(pub usize);

/// Key spec value marking a key storage provider handle
pub const CERT_NCRYPT_KEY_SPEC: u32 = 0xFFFF_FFFF;

/// Output of private key acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredKey {
    /// Provider or key handle, depending on `key_spec`
    pub handle: usize,
    /// `AT_KEYEXCHANGE`, `AT_SIGNATURE` or [`CERT_NCRYPT_KEY_SPEC`]
    pub key_spec: u32,
    /// False when the system cached the handle and still owns it
    pub caller_must_free: bool,
}

/// Legacy provider parameters read before deleting a key set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderParam {
    Container,
    Name,
    ProviderType,
}

impl ProviderParam {
    /// `PP_*` identifier
    pub fn id(&self) -> u32 {
        match self {
            ProviderParam::Name => 4,
            ProviderParam::Container => 6,
            ProviderParam::ProviderType => 16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderParam::Container => "PP_CONTAINER",
            ProviderParam::Name => "PP_NAME",
            ProviderParam::ProviderType => "PP_PROVTYPE",
        }
    }
}

/// PKCS#1 v1.5 padding for a key storage provider signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pkcs1Padding {
    pub hash: HashAlgorithm,
}

/// Native certificate store, legacy provider and key storage provider calls
///
/// Handles returned by one method are released through the matching
/// method: stores with [`close_store`](Self::close_store), certificates
/// with [`free_certificate`](Self::free_certificate), providers with
/// [`release_provider`](Self::release_provider), key handles with
/// [`free_key`](Self::free_key) and hash objects with
/// [`destroy_hash`](Self::destroy_hash). A few calls consume their argument
/// and are documented as such.
pub trait CryptoApi: Send + Sync {
    /// Open a system store in the current user's location
    fn open_system_store(&self, name: &str) -> NativeResult<RawStore>;

    fn close_store(&self, store: RawStore) -> NativeResult<()>;

    /// Return the certificate after `prev`, or the first when `prev` is None
    ///
    /// Consumes `prev` whether or not a next certificate exists. Fails with
    /// `CRYPT_E_NOT_FOUND` once the store is exhausted.
    fn find_next_certificate(&self, store: RawStore, prev: Option<RawCert>)
        -> NativeResult<RawCert>;

    fn duplicate_certificate(&self, cert: RawCert) -> RawCert;

    fn free_certificate(&self, cert: RawCert);

    /// DER encoding of the certificate
    fn certificate_der(&self, cert: RawCert) -> Vec<u8>;

    /// Remove the certificate from its store. Consumes `cert`, even on failure.
    fn delete_certificate(&self, cert: RawCert) -> NativeResult<()>;

    /// Add an encoded certificate, replacing any existing copy
    ///
    /// Returns a new reference to the stored certificate.
    fn add_certificate(&self, store: RawStore, der: &[u8]) -> NativeResult<RawCert>;

    /// Import a PKCS#12 bundle into a new in-memory store
    fn import_pfx(&self, data: &[u8], password: &str, flags: u32) -> NativeResult<RawStore>;

    /// Locate and record the private key provider for the certificate
    fn find_key_provider_info(&self, cert: RawCert) -> NativeResult<()>;

    fn acquire_private_key(&self, cert: RawCert, flags: u32) -> NativeResult<AcquiredKey>;

    fn release_provider(&self, provider: RawProvider);

    /// Create a hash object for the `CALG_*` algorithm
    fn create_hash(&self, provider: RawProvider, alg_id: u32) -> NativeResult<RawHash>;

    fn destroy_hash(&self, hash: RawHash);

    /// `HP_HASHSIZE` of the hash object
    fn hash_size(&self, hash: RawHash) -> NativeResult<usize>;

    /// Set `HP_HASHVAL` to a finished digest
    fn set_hash_value(&self, hash: RawHash, digest: &[u8]) -> NativeResult<()>;

    /// Sign the hash object with the provider key
    ///
    /// With `out` None, returns the required length. Otherwise writes the
    /// signature into `out` and returns the written length.
    fn legacy_sign_hash(
        &self,
        hash: RawHash,
        key_spec: u32,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize>;

    /// Read a provider parameter, length query first as for signing
    fn provider_param(
        &self,
        provider: RawProvider,
        param: ProviderParam,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize>;

    /// Delete a legacy key container
    fn delete_key_set(
        &self,
        container: &CStr,
        provider_name: &CStr,
        provider_type: u32,
    ) -> NativeResult<()>;

    /// Sign a digest with a key storage provider key, length query first
    fn sign_hash(
        &self,
        key: RawKey,
        padding: Option<Pkcs1Padding>,
        digest: &[u8],
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize>;

    /// Delete a key storage provider key. Frees `key` on success.
    fn delete_key(&self, key: RawKey) -> NativeResult<()>;

    fn free_key(&self, key: RawKey);
}
