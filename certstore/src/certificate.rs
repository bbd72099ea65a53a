//! Parsed certificates and their public keys

use std::fmt;

use der::asn1::ObjectIdentifier;
use der::oid::AssociatedOid;
use der::Decode;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use x509_cert::ext::pkix::SubjectKeyIdentifier;

use crate::error::{Error, Result};

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

/// An X.509 certificate together with its original DER encoding
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    inner: x509_cert::Certificate,
}

impl Certificate {
    /// Parse a DER encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = x509_cert::Certificate::from_der(der)
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self {
            der: der.to_vec(),
            inner,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> String {
        self.inner.tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.inner.tbs_certificate.issuer.to_string()
    }

    /// Serial number magnitude, big-endian
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    /// Serial number as upper-case hex
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.serial_number())
    }

    /// Value of the subject key identifier extension, if present
    pub fn subject_key_id(&self) -> Result<Option<Vec<u8>>> {
        let extensions = match &self.inner.tbs_certificate.extensions {
            Some(extensions) => extensions,
            None => return Ok(None),
        };

        for ext in extensions {
            if ext.extn_id == SubjectKeyIdentifier::OID {
                let ski = SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())
                    .map_err(|e| Error::Parse(format!("subject key identifier: {}", e)))?;
                return Ok(Some(ski.0.as_bytes().to_vec()));
            }
        }

        Ok(None)
    }

    /// Decode the subject public key
    pub fn public_key(&self) -> Result<PublicKey> {
        let spki = &self.inner.tbs_certificate.subject_public_key_info;
        let key = spki.subject_public_key.raw_bytes();
        let algorithm = spki.algorithm.oid;

        if algorithm == RSA_ENCRYPTION {
            if key.is_empty() {
                return Err(Error::MissingPublicKey);
            }
            return RsaPublicKey::from_pkcs1_der(key)
                .map(PublicKey::Rsa)
                .map_err(|e| Error::Parse(format!("RSA public key: {}", e)));
        }

        if algorithm == EC_PUBLIC_KEY {
            let curve = match &spki.algorithm.parameters {
                Some(params) => params
                    .decode_as::<ObjectIdentifier>()
                    .map_err(|e| Error::Parse(format!("EC curve parameters: {}", e)))?,
                None => return Err(Error::Parse("EC key without curve parameters".into())),
            };
            return Ok(PublicKey::Ec(EcPublicKey {
                curve: EcCurve::from_oid(curve),
                point: key.to_vec(),
            }));
        }

        Ok(PublicKey::Other {
            algorithm,
            key: key.to_vec(),
        })
    }

    pub fn inner(&self) -> &x509_cert::Certificate {
        &self.inner
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject())
            .field("serial", &self.serial_hex())
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

/// Public key of an identity, used to pick the signing path
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ec(EcPublicKey),
    /// Any other algorithm; signatures pass through untouched
    Other {
        algorithm: ObjectIdentifier,
        key: Vec<u8>,
    },
}

impl PublicKey {
    pub fn is_empty(&self) -> bool {
        match self {
            PublicKey::Rsa(_) => false,
            PublicKey::Ec(ec) => ec.point.is_empty(),
            PublicKey::Other { key, .. } => key.is_empty(),
        }
    }

    pub fn algorithm_name(&self) -> String {
        match self {
            PublicKey::Rsa(_) => "RSA".to_string(),
            PublicKey::Ec(ec) => format!("EC {}", ec.curve),
            PublicKey::Other { algorithm, .. } => algorithm.to_string(),
        }
    }
}

/// Elliptic-curve public key as an uncompressed SEC1 point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    pub curve: EcCurve,
    pub point: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
    Other(ObjectIdentifier),
}

impl EcCurve {
    fn from_oid(oid: ObjectIdentifier) -> Self {
        if oid == SECP256R1 {
            EcCurve::P256
        } else if oid == SECP384R1 {
            EcCurve::P384
        } else if oid == SECP521R1 {
            EcCurve::P521
        } else {
            EcCurve::Other(oid)
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcCurve::P256 => write!(f, "P-256"),
            EcCurve::P384 => write!(f, "P-384"),
            EcCurve::P521 => write!(f, "P-521"),
            EcCurve::Other(oid) => write!(f, "{}", oid),
        }
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
