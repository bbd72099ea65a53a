//! Store configuration
//!
//! Configuration is an explicit value handed to the store when it is
//! opened. The key preference travels from the store into every identity
//! it creates and from there into private key acquisition.
//!
//! ```toml
//! store-name = "MY"
//! key-preference = "prefer-cng"
//!
//! [pkcs11]
//! module-path = "/usr/lib/softhsm/libsofthsm2.so"
//! slot = 0
//! pin = "1234"
//! certificate-serial = "04024FFB1E82B2A48FD1BA7B393DD897"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which key backend to acquire when a certificate's key is reachable by both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPreference {
    /// Legacy CryptoAPI providers only
    #[serde(rename = "cryptoapi-only")]
    CryptoApiOnly,
    /// Use CNG only when the key is not available through CryptoAPI
    #[default]
    #[serde(rename = "prefer-cryptoapi")]
    PreferCryptoApi,
    /// Use CNG whenever the key is available through it
    PreferCng,
    /// CNG key storage providers only
    CngOnly,
}

// CryptAcquireCertificatePrivateKey flags
const CRYPT_ACQUIRE_ALLOW_NCRYPT_KEY_FLAG: u32 = 0x0001_0000;
const CRYPT_ACQUIRE_PREFER_NCRYPT_KEY_FLAG: u32 = 0x0002_0000;
const CRYPT_ACQUIRE_ONLY_NCRYPT_KEY_FLAG: u32 = 0x0004_0000;

// PFXImportCertStore flags
const CRYPT_USER_KEYSET: u32 = 0x0000_1000;
const PKCS12_PREFER_CNG_KSP: u32 = 0x0000_0100;
const PKCS12_ALWAYS_CNG_KSP: u32 = 0x0000_0200;

impl KeyPreference {
    /// Flag value for private key acquisition
    pub fn acquire_flags(&self) -> u32 {
        match self {
            KeyPreference::CryptoApiOnly => 0,
            KeyPreference::PreferCryptoApi => CRYPT_ACQUIRE_ALLOW_NCRYPT_KEY_FLAG,
            KeyPreference::PreferCng => CRYPT_ACQUIRE_PREFER_NCRYPT_KEY_FLAG,
            KeyPreference::CngOnly => CRYPT_ACQUIRE_ONLY_NCRYPT_KEY_FLAG,
        }
    }

    /// Flag value for importing a PFX bundle into the current user's keys
    pub fn pfx_import_flags(&self) -> u32 {
        match self {
            KeyPreference::CryptoApiOnly | KeyPreference::PreferCryptoApi => CRYPT_USER_KEYSET,
            KeyPreference::PreferCng => CRYPT_USER_KEYSET | PKCS12_PREFER_CNG_KSP,
            KeyPreference::CngOnly => CRYPT_USER_KEYSET | PKCS12_ALWAYS_CNG_KSP,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPreference::CryptoApiOnly => "cryptoapi-only",
            KeyPreference::PreferCryptoApi => "prefer-cryptoapi",
            KeyPreference::PreferCng => "prefer-cng",
            KeyPreference::CngOnly => "cng-only",
        }
    }
}

impl fmt::Display for KeyPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cryptoapi-only" => Ok(KeyPreference::CryptoApiOnly),
            "prefer-cryptoapi" => Ok(KeyPreference::PreferCryptoApi),
            "prefer-cng" => Ok(KeyPreference::PreferCng),
            "cng-only" => Ok(KeyPreference::CngOnly),
            other => Err(format!(
                "Unknown key preference '{}'. Use: cryptoapi-only, prefer-cryptoapi, prefer-cng, cng-only",
                other
            )),
        }
    }
}

/// Hardware token settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Pkcs11Config {
    /// Path to the PKCS#11 module
    pub module_path: PathBuf,

    /// Slot holding the token
    pub slot: u64,

    /// User PIN; the session stays logged out when absent
    pub pin: Option<String>,

    /// Serial number of the certificate to expose, hex
    pub certificate_serial: String,
}

impl Default for Pkcs11Config {
    fn default() -> Self {
        Self {
            module_path: PathBuf::from("/usr/lib/x86_64-linux-gnu/pkcs11/opensc-pkcs11.so"),
            slot: 1,
            pin: None,
            certificate_serial: "04024FFB1E82B2A48FD1BA7B393DD897".to_string(),
        }
    }
}

impl Pkcs11Config {
    /// Configured serial number as big-endian bytes
    pub fn serial_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.certificate_serial.trim())
            .map_err(|e| Error::Config(format!("certificate-serial is not hex: {}", e)))
    }
}

/// Configuration for opening a certificate store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Name of the system certificate store
    pub store_name: String,

    pub key_preference: KeyPreference,

    pub pkcs11: Pkcs11Config,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_name: "MY".to_string(),
            key_preference: KeyPreference::default(),
            pkcs11: Pkcs11Config::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded store configuration from {}", path.display());
        Ok(config)
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
