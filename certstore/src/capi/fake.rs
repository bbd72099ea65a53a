//! In-memory stand-in for the native certificate and key APIs
//!
//! Models named stores, PFX bundles, legacy and CNG keys backed by the
//! fixture keys, and counts every live handle so tests can prove that each
//! acquisition was released. Individual calls can be made to fail.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};

use super::api::{
    AcquiredKey, CryptoApi, NativeResult, Pkcs1Padding, ProviderParam, RawCert, RawHash, RawKey,
    RawProvider, RawStore, CERT_NCRYPT_KEY_SPEC,
};
use crate::encoding::digest_info;
use crate::error::{ErrorCode, NativeError, SecurityStatus};
use crate::hash::HashAlgorithm;

pub(crate) const RSA_CERT: &[u8] = include_bytes!("../../testdata/rsa.der");
const RSA_KEY: &[u8] = include_bytes!("../../testdata/rsa.key.der");
pub(crate) const EC_CERT: &[u8] = include_bytes!("../../testdata/ec.der");
const EC_KEY: &[u8] = include_bytes!("../../testdata/ec.key.der");
pub(crate) const EC384_CERT: &[u8] = include_bytes!("../../testdata/ec384.der");

const E_ACCESS_DENIED: ErrorCode = ErrorCode(0x8007_0005);
const CRYPT_E_BAD_ENCODE: ErrorCode = ErrorCode(0x8009_2002);
const CRYPT_E_NO_KEY_PROPERTY: ErrorCode = ErrorCode(0x8009_200B);
const NTE_BAD_TYPE: ErrorCode = ErrorCode(0x8009_000A);
const NTE_INVALID_HANDLE: SecurityStatus = SecurityStatus(0x8009_0026_u32 as i32);
const NTE_INVALID_PARAMETER: SecurityStatus = SecurityStatus(0x8009_0027_u32 as i32);
const NTE_PERM: SecurityStatus = SecurityStatus(0x8009_0010_u32 as i32);

const AT_SIGNATURE: u32 = 2;
const PROV_RSA_AES: u32 = 24;

/// Certificates the fake can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fixture {
    Rsa,
    Ec,
    Ec384,
}

impl Fixture {
    pub(crate) fn der(&self) -> &'static [u8] {
        match self {
            Fixture::Rsa => RSA_CERT,
            Fixture::Ec => EC_CERT,
            Fixture::Ec384 => EC384_CERT,
        }
    }

    fn container(&self) -> &'static str {
        match self {
            Fixture::Rsa => "fake-container-rsa",
            Fixture::Ec => "fake-container-ec",
            Fixture::Ec384 => "fake-container-ec384",
        }
    }

    fn from_der(der: &[u8]) -> Option<Fixture> {
        [Fixture::Rsa, Fixture::Ec, Fixture::Ec384]
            .into_iter()
            .find(|f| f.der() == der)
    }
}

/// Where a certificate's private key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyKind {
    Legacy,
    Modern,
    /// Reachable through both providers
    Both,
    /// Acquisition hands back a system-owned handle
    Cached,
    Missing,
}

struct Entry {
    der: Vec<u8>,
}

enum LiveKey {
    Legacy(Fixture),
    Modern(Fixture),
}

struct LiveHash {
    algorithm: HashAlgorithm,
    value: Option<Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_handle: usize,
    collections: HashMap<String, Vec<usize>>,
    entries: HashMap<usize, Entry>,
    stores: HashMap<usize, String>,
    certs: HashMap<usize, usize>,
    keys: HashMap<usize, LiveKey>,
    hashes: HashMap<usize, LiveHash>,
    key_kinds: HashMap<Vec<u8>, KeyKind>,
    bundles: HashMap<Vec<u8>, (String, Vec<Fixture>)>,

    add_calls: usize,
    sign_calls: usize,
    deleted_key_sets: Vec<String>,
    providers_released: usize,

    fail_open: bool,
    fail_find_at: Option<usize>,
    fail_add_at: Option<usize>,
    fail_cert_delete: bool,
    fail_key_delete: bool,
    fail_key_set_delete: bool,
    fail_provider_param: Option<ProviderParam>,
    hash_size_override: Option<usize>,
}

impl State {
    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        // never hand out zero
        self.next_handle * 0x10
    }

    fn new_ref(&mut self, entry: usize) -> RawCert {
        let handle = self.handle();
        self.certs.insert(handle, entry);
        RawCert(handle)
    }

    fn new_entry(&mut self, collection: &str, der: &[u8]) -> usize {
        let id = self.handle();
        self.entries.insert(id, Entry { der: der.to_vec() });
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(id);
        id
    }

    fn entry_der(&self, cert: RawCert) -> Option<&[u8]> {
        let id = self.certs.get(&cert.0)?;
        self.entries.get(id).map(|e| e.der.as_slice())
    }
}

pub(crate) struct FakeCryptoApi {
    state: Mutex<State>,
    rsa: RsaPrivateKey,
    p256: p256::ecdsa::SigningKey,
}

impl FakeCryptoApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            rsa: RsaPrivateKey::from_pkcs8_der(RSA_KEY).expect("rsa fixture key"),
            p256: <p256::ecdsa::SigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(EC_KEY)
                .expect("p256 fixture key"),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake state poisoned")
    }

    /// Put a certificate in the "MY" store; returns an owned reference to it
    pub(crate) fn add_identity(&self, fixture: Fixture, kind: KeyKind) -> RawCert {
        let mut state = self.state();
        state.key_kinds.insert(fixture.der().to_vec(), kind);
        let id = state.new_entry("MY", fixture.der());
        state.new_ref(id)
    }

    /// Put a certificate in a store without handing out a reference
    pub(crate) fn seed(&self, store: &str, fixture: Fixture, kind: KeyKind) {
        let mut state = self.state();
        state.key_kinds.insert(fixture.der().to_vec(), kind);
        state.new_entry(store, fixture.der());
    }

    /// Register PFX bytes the fake will accept with `password`
    pub(crate) fn register_bundle(&self, data: &[u8], password: &str, fixtures: Vec<Fixture>) {
        self.state()
            .bundles
            .insert(data.to_vec(), (password.to_string(), fixtures));
    }

    pub(crate) fn store_len(&self, store: &str) -> usize {
        self.state().collections.get(store).map_or(0, Vec::len)
    }

    pub(crate) fn fail_open(&self) {
        self.state().fail_open = true;
    }

    /// Fail the enumeration step that would yield entry `index`
    pub(crate) fn fail_find_at(&self, index: usize) {
        self.state().fail_find_at = Some(index);
    }

    /// Fail the `n`th add (zero based)
    pub(crate) fn fail_add_at(&self, n: usize) {
        self.state().fail_add_at = Some(n);
    }

    pub(crate) fn fail_cert_delete(&self) {
        self.state().fail_cert_delete = true;
    }

    pub(crate) fn fail_key_delete(&self) {
        self.state().fail_key_delete = true;
    }

    pub(crate) fn fail_key_set_delete(&self) {
        self.state().fail_key_set_delete = true;
    }

    pub(crate) fn fail_provider_param(&self, param: ProviderParam) {
        self.state().fail_provider_param = Some(param);
    }

    pub(crate) fn fail_hash_size_with(&self, size: usize) {
        self.state().hash_size_override = Some(size);
    }

    pub(crate) fn live_certs(&self) -> usize {
        self.state().certs.len()
    }

    pub(crate) fn live_stores(&self) -> usize {
        self.state().stores.len()
    }

    pub(crate) fn live_keys(&self) -> usize {
        self.state().keys.len()
    }

    pub(crate) fn live_hash_objects(&self) -> usize {
        self.state().hashes.len()
    }

    pub(crate) fn sign_calls(&self) -> usize {
        self.state().sign_calls
    }

    pub(crate) fn providers_released(&self) -> usize {
        self.state().providers_released
    }

    pub(crate) fn deleted_key_sets(&self) -> Vec<String> {
        self.state().deleted_key_sets.clone()
    }

    fn rsa_sign(&self, hash: HashAlgorithm, digest: &[u8]) -> NativeResult<Vec<u8>> {
        let info = digest_info(hash, digest).map_err(|_| NTE_INVALID_PARAMETER)?;
        self.rsa
            .sign(Pkcs1v15Sign::new_unprefixed(), &info)
            .map_err(|_| NativeError::Status(NTE_INVALID_PARAMETER))
    }

    fn modern_signature(
        &self,
        fixture: Fixture,
        padding: Option<Pkcs1Padding>,
        digest: &[u8],
    ) -> NativeResult<Vec<u8>> {
        match (fixture, padding) {
            (Fixture::Rsa, Some(padding)) => self.rsa_sign(padding.hash, digest),
            (Fixture::Ec, None) => {
                let signature: p256::ecdsa::Signature = self
                    .p256
                    .sign_prehash(digest)
                    .map_err(|_| NativeError::Status(NTE_INVALID_PARAMETER))?;
                Ok(signature.to_bytes().to_vec())
            }
            (Fixture::Ec384, None) => {
                let mut raw = vec![0x11u8; 48];
                raw.extend_from_slice(&[0u8; 47]);
                raw.push(0x2a);
                Ok(raw)
            }
            _ => Err(NativeError::Status(NTE_INVALID_PARAMETER)),
        }
    }
}

fn copy_out(data: &[u8], out: Option<&mut [u8]>) -> NativeResult<usize> {
    if let Some(out) = out {
        let dst = out
            .get_mut(..data.len())
            .ok_or(NativeError::Code(ErrorCode(234)))?;
        dst.copy_from_slice(data);
    }
    Ok(data.len())
}

fn calg_hash(alg_id: u32) -> Option<HashAlgorithm> {
    match alg_id {
        0x8004 => Some(HashAlgorithm::Sha1),
        0x800c => Some(HashAlgorithm::Sha256),
        0x800d => Some(HashAlgorithm::Sha384),
        0x800e => Some(HashAlgorithm::Sha512),
        _ => None,
    }
}

impl CryptoApi for FakeCryptoApi {
    fn open_system_store(&self, name: &str) -> NativeResult<RawStore> {
        let mut state = self.state();
        if state.fail_open {
            return Err(E_ACCESS_DENIED.into());
        }
        state.collections.entry(name.to_string()).or_default();
        let handle = state.handle();
        state.stores.insert(handle, name.to_string());
        Ok(RawStore(handle))
    }

    fn close_store(&self, store: RawStore) -> NativeResult<()> {
        let mut state = self.state();
        match state.stores.remove(&store.0) {
            Some(name) => {
                if name.starts_with("pfx-") {
                    state.collections.remove(&name);
                }
                Ok(())
            }
            None => Err(ErrorCode(6).into()),
        }
    }

    fn find_next_certificate(
        &self,
        store: RawStore,
        prev: Option<RawCert>,
    ) -> NativeResult<RawCert> {
        let mut state = self.state();
        let name = state
            .stores
            .get(&store.0)
            .cloned()
            .ok_or(NativeError::Code(ErrorCode(6)))?;
        let ids = state.collections.get(&name).cloned().unwrap_or_default();

        let index = match prev {
            Some(prev) => {
                let entry = state.certs.remove(&prev.0);
                entry
                    .and_then(|id| ids.iter().position(|x| *x == id))
                    .map_or(ids.len(), |pos| pos + 1)
            }
            None => 0,
        };

        if state.fail_find_at == Some(index) {
            return Err(E_ACCESS_DENIED.into());
        }

        match ids.get(index) {
            Some(id) => Ok(state.new_ref(*id)),
            None => Err(ErrorCode::CRYPT_E_NOT_FOUND.into()),
        }
    }

    fn duplicate_certificate(&self, cert: RawCert) -> RawCert {
        let mut state = self.state();
        let entry = state.certs.get(&cert.0).copied().unwrap_or_default();
        state.new_ref(entry)
    }

    fn free_certificate(&self, cert: RawCert) {
        let removed = self.state().certs.remove(&cert.0);
        assert!(removed.is_some(), "double free of certificate {:?}", cert);
    }

    fn certificate_der(&self, cert: RawCert) -> Vec<u8> {
        self.state()
            .entry_der(cert)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    fn delete_certificate(&self, cert: RawCert) -> NativeResult<()> {
        let mut state = self.state();
        let entry = state.certs.remove(&cert.0);
        if state.fail_cert_delete {
            return Err(E_ACCESS_DENIED.into());
        }
        let entry = entry.ok_or(NativeError::Code(ErrorCode(6)))?;
        for ids in state.collections.values_mut() {
            ids.retain(|id| *id != entry);
        }
        Ok(())
    }

    fn add_certificate(&self, store: RawStore, der: &[u8]) -> NativeResult<RawCert> {
        let mut state = self.state();
        let n = state.add_calls;
        state.add_calls += 1;
        if state.fail_add_at == Some(n) {
            return Err(E_ACCESS_DENIED.into());
        }

        let name = state
            .stores
            .get(&store.0)
            .cloned()
            .ok_or(NativeError::Code(ErrorCode(6)))?;

        // replace existing
        let existing: Vec<usize> = state
            .collections
            .get(&name)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| state.entries.get(id).map_or(false, |e| e.der == der))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(ids) = state.collections.get_mut(&name) {
            ids.retain(|id| !existing.contains(id));
        }

        let id = state.new_entry(&name, der);
        Ok(state.new_ref(id))
    }

    fn import_pfx(&self, data: &[u8], password: &str, flags: u32) -> NativeResult<RawStore> {
        let mut state = self.state();
        let (expected, fixtures) = state
            .bundles
            .get(data)
            .cloned()
            .ok_or(NativeError::Code(CRYPT_E_BAD_ENCODE))?;
        if expected != password {
            return Err(ErrorCode::ERROR_INVALID_PASSWORD.into());
        }

        let kind = if flags & 0x300 != 0 {
            KeyKind::Modern
        } else {
            KeyKind::Legacy
        };

        let handle = state.handle();
        let name = format!("pfx-{}", handle);
        state.collections.insert(name.clone(), Vec::new());
        for fixture in fixtures {
            state.key_kinds.insert(fixture.der().to_vec(), kind);
            state.new_entry(&name, fixture.der());
        }
        state.stores.insert(handle, name);
        Ok(RawStore(handle))
    }

    fn find_key_provider_info(&self, cert: RawCert) -> NativeResult<()> {
        let state = self.state();
        let der = state.entry_der(cert).ok_or(NativeError::Code(ErrorCode(6)))?;
        match state.key_kinds.get(der) {
            None | Some(KeyKind::Missing) => Err(CRYPT_E_NO_KEY_PROPERTY.into()),
            Some(_) => Ok(()),
        }
    }

    fn acquire_private_key(&self, cert: RawCert, flags: u32) -> NativeResult<AcquiredKey> {
        let mut state = self.state();
        let der = state
            .entry_der(cert)
            .map(<[u8]>::to_vec)
            .ok_or(NativeError::Code(ErrorCode(6)))?;
        let fixture = Fixture::from_der(&der).ok_or(NativeError::Code(CRYPT_E_BAD_ENCODE))?;
        let kind = state
            .key_kinds
            .get(&der)
            .copied()
            .unwrap_or(KeyKind::Missing);

        let allow_cng = flags != 0;
        let prefer_cng = flags & 0x6_0000 != 0;
        let only_cng = flags & 0x4_0000 != 0;

        let modern = match kind {
            KeyKind::Missing => return Err(CRYPT_E_NO_KEY_PROPERTY.into()),
            KeyKind::Cached => {
                return Ok(AcquiredKey {
                    handle: 0xCAC4E,
                    key_spec: AT_SIGNATURE,
                    caller_must_free: false,
                })
            }
            KeyKind::Legacy if only_cng => return Err(ErrorCode::NTE_BAD_KEYSET.into()),
            KeyKind::Modern if !allow_cng => return Err(ErrorCode::NTE_BAD_KEYSET.into()),
            KeyKind::Legacy => false,
            KeyKind::Modern => true,
            KeyKind::Both => prefer_cng,
        };

        let handle = state.handle();
        if modern {
            state.keys.insert(handle, LiveKey::Modern(fixture));
            Ok(AcquiredKey {
                handle,
                key_spec: CERT_NCRYPT_KEY_SPEC,
                caller_must_free: true,
            })
        } else {
            state.keys.insert(handle, LiveKey::Legacy(fixture));
            Ok(AcquiredKey {
                handle,
                key_spec: AT_SIGNATURE,
                caller_must_free: true,
            })
        }
    }

    fn release_provider(&self, provider: RawProvider) {
        let removed = {
            let mut state = self.state();
            state.providers_released += 1;
            state.keys.remove(&provider.0)
        };
        assert!(
            matches!(removed, Some(LiveKey::Legacy(_))),
            "release of unknown provider {:?}",
            provider
        );
    }

    fn create_hash(&self, provider: RawProvider, alg_id: u32) -> NativeResult<RawHash> {
        let mut state = self.state();
        if !matches!(state.keys.get(&provider.0), Some(LiveKey::Legacy(_))) {
            return Err(ErrorCode(6).into());
        }
        let algorithm = calg_hash(alg_id).ok_or(NativeError::Code(ErrorCode(0x8009_0008)))?;
        let handle = state.handle();
        state.hashes.insert(
            handle,
            LiveHash {
                algorithm,
                value: None,
            },
        );
        Ok(RawHash(handle))
    }

    fn destroy_hash(&self, hash: RawHash) {
        let removed = self.state().hashes.remove(&hash.0);
        assert!(removed.is_some(), "double destroy of hash {:?}", hash);
    }

    fn hash_size(&self, hash: RawHash) -> NativeResult<usize> {
        let state = self.state();
        let live = state
            .hashes
            .get(&hash.0)
            .ok_or(NativeError::Code(ErrorCode(6)))?;
        Ok(state
            .hash_size_override
            .unwrap_or_else(|| live.algorithm.size()))
    }

    fn set_hash_value(&self, hash: RawHash, digest: &[u8]) -> NativeResult<()> {
        let mut state = self.state();
        let live = state
            .hashes
            .get_mut(&hash.0)
            .ok_or(NativeError::Code(ErrorCode(6)))?;
        if digest.len() != live.algorithm.size() {
            return Err(ErrorCode(0x8009_0002).into());
        }
        live.value = Some(digest.to_vec());
        Ok(())
    }

    fn legacy_sign_hash(
        &self,
        hash: RawHash,
        _key_spec: u32,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let (algorithm, value) = {
            let mut state = self.state();
            state.sign_calls += 1;
            let live = state
                .hashes
                .get(&hash.0)
                .ok_or(NativeError::Code(ErrorCode(6)))?;
            let value = live.value.clone().ok_or(NativeError::Code(ErrorCode(0x8009_0002)))?;
            (live.algorithm, value)
        };

        // CryptoAPI emits little-endian signatures
        let mut signature = self.rsa_sign(algorithm, &value)?;
        signature.reverse();
        copy_out(&signature, out)
    }

    fn provider_param(
        &self,
        provider: RawProvider,
        param: ProviderParam,
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let state = self.state();
        let fixture = match state.keys.get(&provider.0) {
            Some(LiveKey::Legacy(fixture)) => *fixture,
            _ => return Err(ErrorCode(6).into()),
        };
        if state.fail_provider_param == Some(param) {
            return Err(NTE_BAD_TYPE.into());
        }

        let data = match param {
            ProviderParam::Container => format!("{}\0", fixture.container()).into_bytes(),
            ProviderParam::Name => {
                b"Microsoft Enhanced RSA and AES Cryptographic Provider\0".to_vec()
            }
            ProviderParam::ProviderType => PROV_RSA_AES.to_le_bytes().to_vec(),
        };
        copy_out(&data, out)
    }

    fn delete_key_set(
        &self,
        container: &CStr,
        provider_name: &CStr,
        provider_type: u32,
    ) -> NativeResult<()> {
        let mut state = self.state();
        if state.fail_key_set_delete {
            return Err(E_ACCESS_DENIED.into());
        }
        if provider_type != PROV_RSA_AES || provider_name.to_bytes().is_empty() {
            return Err(NTE_BAD_TYPE.into());
        }
        state
            .deleted_key_sets
            .push(container.to_string_lossy().into_owned());
        Ok(())
    }

    fn sign_hash(
        &self,
        key: RawKey,
        padding: Option<Pkcs1Padding>,
        digest: &[u8],
        out: Option<&mut [u8]>,
    ) -> NativeResult<usize> {
        let fixture = {
            let mut state = self.state();
            state.sign_calls += 1;
            match state.keys.get(&key.0) {
                Some(LiveKey::Modern(fixture)) => *fixture,
                _ => return Err(NTE_INVALID_HANDLE.into()),
            }
        };

        let signature = self.modern_signature(fixture, padding, digest)?;
        copy_out(&signature, out)
    }

    fn delete_key(&self, key: RawKey) -> NativeResult<()> {
        let mut state = self.state();
        if state.fail_key_delete {
            return Err(NTE_PERM.into());
        }
        match state.keys.remove(&key.0) {
            Some(LiveKey::Modern(_)) => Ok(()),
            _ => Err(NTE_INVALID_HANDLE.into()),
        }
    }

    fn free_key(&self, key: RawKey) {
        let removed = self.state().keys.remove(&key.0);
        assert!(
            matches!(removed, Some(LiveKey::Modern(_))),
            "free of unknown key {:?}",
            key
        );
    }
}
