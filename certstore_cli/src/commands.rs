//! Subcommand execution against an open store

use std::error::Error;
use std::path::Path;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Serialize;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use certstore::{open_store, Certificate, HashAlgorithm, Identity, Store, StoreConfig};

use crate::cli::{Command, SignInput};

type CommandResult<T> = Result<T, Box<dyn Error>>;

/// One identity as printed by `list` and `import`
#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub key_algorithm: String,
}

impl IdentitySummary {
    pub fn from_certificate(cert: &Certificate) -> certstore::Result<Self> {
        Ok(Self {
            subject: cert.subject(),
            issuer: cert.issuer(),
            serial: cert.serial_hex(),
            key_algorithm: cert.public_key()?.algorithm_name(),
        })
    }
}

/// Open the configured store, run `command`, and close the store
pub fn execute(command: &Command, config: &StoreConfig) -> CommandResult<()> {
    let mut store = open_store(config)?;
    let result = match command {
        Command::List { json } => list(store.as_mut(), *json),
        Command::Sign {
            serial,
            hash,
            input,
        } => sign(store.as_mut(), serial.as_deref(), *hash, input),
        Command::Import { path, password } => import(store.as_mut(), path, password),
        Command::Delete { serial } => delete(store.as_mut(), serial),
    };
    if let Err(e) = store.close() {
        log::warn!("Failed to close store: {}", e);
    }
    result
}

fn list(store: &mut dyn Store, json: bool) -> CommandResult<()> {
    let mut identities = store.identities()?;
    let summaries = summarize(&identities);
    close_identities(&mut identities);
    print_summaries(&summaries?, json)
}

fn sign(
    store: &mut dyn Store,
    serial: Option<&str>,
    hash: HashAlgorithm,
    input: &SignInput,
) -> CommandResult<()> {
    let digest = match input {
        SignInput::Digest(digest) => digest.clone(),
        SignInput::File(path) => hash_file(path, hash)?,
    };

    let mut identities = store.identities()?;
    let signature = select(&mut identities, serial).and_then(|identity| {
        let signer = identity.signer()?;
        signer.sign(&digest, hash)
    });
    close_identities(&mut identities);

    println!("{}", BASE64_STANDARD.encode(signature?));
    Ok(())
}

fn import(store: &mut dyn Store, path: &Path, password: &str) -> CommandResult<()> {
    let data = std::fs::read(path)?;
    let mut identities = store.import(&data, password)?;
    let summaries = summarize(&identities);
    close_identities(&mut identities);

    let summaries = summaries?;
    println!("Imported {} identities from {}", summaries.len(), path.display());
    print_summaries(&summaries, false)
}

fn delete(store: &mut dyn Store, serial: &str) -> CommandResult<()> {
    let mut identities = store.identities()?;
    let result = select(&mut identities, Some(serial)).and_then(|identity| identity.delete());
    close_identities(&mut identities);

    result?;
    println!("Deleted {}", serial);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Hash a file with one of the SHA-2 algorithms
pub fn hash_file(path: &Path, hash: HashAlgorithm) -> certstore::Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    let digest = match hash {
        HashAlgorithm::Sha224 => Sha224::digest(&data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(&data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(&data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(&data).to_vec(),
        other => return Err(certstore::Error::UnsupportedHash(other)),
    };
    log::debug!("Hashed {} with {}", path.display(), hash);
    Ok(digest)
}

/// Pick the identity with `serial`, or the only identity when no serial is given
pub fn select<'a>(
    identities: &'a mut [Box<dyn Identity>],
    serial: Option<&str>,
) -> certstore::Result<&'a mut Box<dyn Identity>> {
    let index = match serial {
        Some(serial) => {
            let mut found = None;
            for (index, identity) in identities.iter().enumerate() {
                if identity.certificate()?.serial_hex() == serial {
                    found = Some(index);
                    break;
                }
            }
            found.ok_or_else(|| {
                certstore::Error::KeyNotFound(format!("no certificate with serial {}", serial))
            })?
        }
        None => match identities.len() {
            1 => 0,
            0 => {
                return Err(certstore::Error::KeyNotFound(
                    "store holds no identities".to_string(),
                ))
            }
            n => {
                return Err(certstore::Error::KeyNotFound(format!(
                    "store holds {} identities, choose one with --serial",
                    n
                )))
            }
        },
    };
    identities
        .get_mut(index)
        .ok_or(certstore::Error::InvalidState("identity index out of range"))
}

fn summarize(identities: &[Box<dyn Identity>]) -> certstore::Result<Vec<IdentitySummary>> {
    identities
        .iter()
        .map(|identity| IdentitySummary::from_certificate(&identity.certificate()?))
        .collect()
}

fn print_summaries(summaries: &[IdentitySummary], json: bool) -> CommandResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {}  [{}]  issued by {}",
            summary.serial, summary.subject, summary.key_algorithm, summary.issuer
        );
    }
    Ok(())
}

fn close_identities(identities: &mut [Box<dyn Identity>]) {
    for identity in identities.iter_mut() {
        if let Err(e) = identity.close() {
            log::warn!("Failed to close identity: {}", e);
        }
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
