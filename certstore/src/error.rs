//! Error types for certificate store and signing operations
//!
//! Every failure is returned as a value. Native failures keep the raw
//! platform code so callers can log it or branch on it, and render to the
//! system message text when the platform knows one.

use std::fmt;

use thiserror::Error;

use crate::hash::HashAlgorithm;

/// Result type for certificate store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by stores, identities and private keys
#[derive(Debug, Error)]
pub enum Error {
    /// The receiver is closed or was never opened
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A native call reported failure
    #[error("{context} failed: {source}")]
    Native {
        context: &'static str,
        #[source]
        source: NativeError,
    },

    /// The named certificate store could not be opened
    #[error("failed to open certificate store '{name}': {source}")]
    StoreOpen {
        name: String,
        #[source]
        source: NativeError,
    },

    /// Malformed certificate encoding
    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHash(HashAlgorithm),

    /// Digest length does not match the hash algorithm
    #[error("bad digest for hash: {algorithm} expects {expected} bytes, got {actual}")]
    DigestSizeMismatch {
        algorithm: HashAlgorithm,
        expected: usize,
        actual: usize,
    },

    /// Raw `(r || s)` output could not be split in two
    #[error("bad ecdsa signature from key storage provider: odd length {0}")]
    BadSignatureLength(usize),

    #[error("certificate has no public key")]
    MissingPublicKey,

    /// No private key is associated with the certificate
    #[error("no private key found for certificate: {0}")]
    KeyNotFound(String),

    #[error("failed to acquire private key: {0}")]
    AcquireFailed(#[source] NativeError),

    /// Key acquisition returned a handle the caller does not own
    #[error("private key acquisition returned a cached handle")]
    UnexpectedCaching,

    /// The native hash object reports a different size than the algorithm
    #[error("invalid native hash object: size {actual}, expected {expected}")]
    HashSizeMismatch { expected: usize, actual: usize },

    /// A legacy provider parameter could not be read
    #[error("failed to read provider parameter {param}: {source}")]
    ProviderParam {
        param: &'static str,
        #[source]
        source: NativeError,
    },

    /// One half of an identity deletion failed
    #[error("failed to delete {target}: {source}")]
    DeleteFailed {
        target: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Private key holds neither backend handle
    #[error("bad private key: no backend handle")]
    NoBackend,

    /// The store does not implement this operation
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Hardware token binding failure
    #[error("token error: {0}")]
    Token(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with the name of the operation that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Stable discriminant of an [`Error`], looking through context wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidState,
    NativeCallFailed,
    StoreOpen,
    Parse,
    UnsupportedHash,
    DigestSizeMismatch,
    BadSignatureLength,
    MissingPublicKey,
    KeyNotFound,
    AcquireFailed,
    UnexpectedCaching,
    HashSizeMismatch,
    ProviderParam,
    DeleteFailed,
    NoBackend,
    NotSupported,
    Token,
    Config,
    Io,
}

impl Error {
    /// Classify this error, ignoring any [`Error::Context`] layers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Native { .. } => ErrorKind::NativeCallFailed,
            Error::StoreOpen { .. } => ErrorKind::StoreOpen,
            Error::Parse(_) => ErrorKind::Parse,
            Error::UnsupportedHash(_) => ErrorKind::UnsupportedHash,
            Error::DigestSizeMismatch { .. } => ErrorKind::DigestSizeMismatch,
            Error::BadSignatureLength(_) => ErrorKind::BadSignatureLength,
            Error::MissingPublicKey => ErrorKind::MissingPublicKey,
            Error::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Error::AcquireFailed(_) => ErrorKind::AcquireFailed,
            Error::UnexpectedCaching => ErrorKind::UnexpectedCaching,
            Error::HashSizeMismatch { .. } => ErrorKind::HashSizeMismatch,
            Error::ProviderParam { .. } => ErrorKind::ProviderParam,
            Error::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Error::NoBackend => ErrorKind::NoBackend,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::Token(_) => ErrorKind::Token,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// The native code carried by this error, if any
    pub fn native(&self) -> Option<NativeError> {
        match self {
            Error::Native { source, .. }
            | Error::StoreOpen { source, .. }
            | Error::ProviderParam { source, .. }
            | Error::AcquireFailed(source) => Some(*source),
            Error::DeleteFailed { source, .. } | Error::Context { source, .. } => source.native(),
            _ => None,
        }
    }

    pub(crate) fn native_call(context: &'static str, source: impl Into<NativeError>) -> Self {
        Error::Native {
            context,
            source: source.into(),
        }
    }
}

/// Attach an operation name to the error of a [`Result`]
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|source| Error::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }
}

// ============================================================================
// Native error codes
// ============================================================================

/// A native failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NativeError {
    /// Thread last-error value or HRESULT
    #[error("{0}")]
    Code(ErrorCode),
    /// Key storage provider status
    #[error("{0}")]
    Status(SecurityStatus),
}

impl From<ErrorCode> for NativeError {
    fn from(code: ErrorCode) -> Self {
        NativeError::Code(code)
    }
}

impl From<SecurityStatus> for NativeError {
    fn from(status: SecurityStatus) -> Self {
        NativeError::Status(status)
    }
}

/// Last-error code reported by the certificate and CryptoAPI functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// Benign end of certificate enumeration
    pub const CRYPT_E_NOT_FOUND: ErrorCode = ErrorCode(0x8009_2004);
    pub const ERROR_INVALID_PASSWORD: ErrorCode = ErrorCode(86);
    pub const NTE_BAD_KEYSET: ErrorCode = ErrorCode(0x8009_0016);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match format_message(self.0) {
            Some(msg) => write!(f, "Error: {:X} {}", self.0, msg),
            None => write!(f, "Error {:X}", self.0),
        }
    }
}

/// Status code returned by the key storage provider functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecurityStatus(pub i32);

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SECURITY_STATUS {}", self.0)?;
        if let Some(msg) = format_message(self.0 as u32) {
            write!(f, " {}", msg)?;
        }
        Ok(())
    }
}

/// Look up the system message text for a native code
#[cfg(windows)]
fn format_message(code: u32) -> Option<String> {
    use windows::core::PWSTR;
    use windows::Win32::Foundation::{LocalFree, HLOCAL};
    use windows::Win32::System::Diagnostics::Debug::{
        FormatMessageW, FORMAT_MESSAGE_ALLOCATE_BUFFER, FORMAT_MESSAGE_FROM_SYSTEM,
        FORMAT_MESSAGE_IGNORE_INSERTS,
    };

    /// Releases the buffer FormatMessageW allocated
    struct LocalBuffer(PWSTR);

    impl Drop for LocalBuffer {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe {
                    let _ = LocalFree(HLOCAL(self.0 .0 as *mut _));
                }
            }
        }
    }

    let mut buffer = LocalBuffer(PWSTR::null());
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_ALLOCATE_BUFFER
                | FORMAT_MESSAGE_FROM_SYSTEM
                | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            code,
            0,
            PWSTR(&mut buffer.0 .0 as *mut *mut u16 as *mut u16),
            0,
            None,
        )
    };

    if len == 0 || buffer.0.is_null() {
        return None;
    }

    let wide = unsafe { std::slice::from_raw_parts(buffer.0 .0, len as usize) };
    let msg = String::from_utf16_lossy(wide);
    let msg = msg.trim_end();
    if msg.is_empty() {
        None
    } else {
        Some(msg.to_string())
    }
}

#[cfg(not(windows))]
fn format_message(_code: u32) -> Option<String> {
    None
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
