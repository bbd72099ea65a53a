//! Signature interchange encoding
//!
//! Native signers return signatures in their own layout. Verifiers expect
//! RSA signatures as big-endian PKCS#1 v1.5 bytes and ECDSA signatures as a
//! DER `Ecdsa-Sig-Value` (`SEQUENCE { r INTEGER, s INTEGER }`).

use der::asn1::{AnyRef, ObjectIdentifier, OctetStringRef, UintRef};
use der::{Encode, Sequence};
use x509_cert::spki::AlgorithmIdentifierRef;

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;

/// Re-encode a fixed-width `(r || s)` ECDSA signature as DER
///
/// Each half is read as an unsigned big-endian integer.
pub fn encode_ecdsa_signature(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(Error::BadSignatureLength(raw.len()));
    }

    let (r, s) = raw.split_at(raw.len() / 2);
    let pair = [uint(r)?, uint(s)?];
    pair.to_der()
        .map_err(|e| Error::Parse(format!("failed to encode ECDSA signature: {}", e)))
}

fn uint(bytes: &[u8]) -> Result<UintRef<'_>> {
    UintRef::new(bytes).map_err(|e| Error::Parse(format!("invalid ECDSA integer: {}", e)))
}

/// Reverse a little-endian legacy provider signature into big-endian order
pub fn reverse_signature(mut signature: Vec<u8>) -> Vec<u8> {
    signature.reverse();
    signature
}

// ============================================================================
// PKCS#1 v1.5 DigestInfo
// ============================================================================

const MD5: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.5");
const SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

/// `DigestInfo ::= SEQUENCE { digestAlgorithm AlgorithmIdentifier, digest OCTET STRING }`
#[derive(Sequence)]
struct DigestInfo<'a> {
    digest_algorithm: AlgorithmIdentifierRef<'a>,
    digest: OctetStringRef<'a>,
}

/// Digest algorithm OID for `hash`
pub fn digest_oid(hash: HashAlgorithm) -> ObjectIdentifier {
    match hash {
        HashAlgorithm::Md5 => MD5,
        HashAlgorithm::Sha1 => SHA1,
        HashAlgorithm::Sha224 => SHA224,
        HashAlgorithm::Sha256 => SHA256,
        HashAlgorithm::Sha384 => SHA384,
        HashAlgorithm::Sha512 => SHA512,
    }
}

/// Wrap a finished digest in a `DigestInfo`, ready for raw PKCS#1 v1.5 signing
///
/// The algorithm parameters are an explicit NULL, as PKCS#1 requires.
pub fn digest_info(hash: HashAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
    check_digest(hash, digest)?;
    let encode_err = |e: der::Error| Error::Parse(format!("failed to encode DigestInfo: {}", e));

    DigestInfo {
        digest_algorithm: AlgorithmIdentifierRef {
            oid: digest_oid(hash),
            parameters: Some(AnyRef::NULL),
        },
        digest: OctetStringRef::new(digest).map_err(encode_err)?,
    }
    .to_der()
    .map_err(encode_err)
}

/// Fail with `DigestSizeMismatch` unless `digest` is exactly `hash.size()` bytes
pub fn check_digest(hash: HashAlgorithm, digest: &[u8]) -> Result<()> {
    if digest.len() != hash.size() {
        return Err(Error::DigestSizeMismatch {
            algorithm: hash,
            expected: hash.size(),
            actual: digest.len(),
        });
    }
    Ok(())
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
    use crate::error::ErrorKind;
    use der::Decode;

    #[test]
    fn test_ecdsa_high_bit_and_leading_zeros() {
        let mut raw = vec![0u8; 64];
        raw[0] = 0x80; // r needs a sign byte
        raw[31] = 0x01;
        raw[63] = 0x7f; // s collapses to one byte

        let der = encode_ecdsa_signature(&raw).unwrap();
        let [r, s] = <[UintRef<'_>; 2]>::from_der(&der).unwrap();
        assert_eq!(r.as_bytes().len(), 32);
        assert_eq!(r.as_bytes()[0], 0x80);
        assert_eq!(s.as_bytes(), &[0x7f]);

        // INTEGER encoding of r carries the 0x00 sign byte
        assert_eq!(&der[2..5], &[0x02, 0x21, 0x00]);
    }

    #[test]
    fn test_ecdsa_odd_length_rejected() {
        let err = encode_ecdsa_signature(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignatureLength);
        let err = encode_ecdsa_signature(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignatureLength);
    }

    #[test]
    fn test_digest_info_layout() {
        // RFC 8017 section 9.2, note 1
        let sha256_prefix = [
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ];
        let digest = [0xabu8; 32];
        let info = digest_info(HashAlgorithm::Sha256, &digest).unwrap();
        assert_eq!(&info[..19], &sha256_prefix);
        assert_eq!(&info[19..], &digest);

        let sha1 = digest_info(HashAlgorithm::Sha1, &[0u8; 20]).unwrap();
        assert_eq!(&sha1[..4], &[0x30, 0x21, 0x30, 0x09]);

        for hash in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let info = digest_info(hash, &vec![1u8; hash.size()]).unwrap();
            assert_eq!(info[1] as usize, info.len() - 2);
            assert!(info.ends_with(&vec![1u8; hash.size()]));
        }

        let err = digest_info(HashAlgorithm::Sha256, &[0u8; 20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DigestSizeMismatch);
    }

    #[test]
    fn test_reverse_signature() {
        assert_eq!(reverse_signature(vec![1, 2, 3]), vec![3, 2, 1]);
    }
}
