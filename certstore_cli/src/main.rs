//! # certstore
//!
//! Command-line front end for signing identities in the OS certificate
//! store (Windows) or on a PKCS#11 token.
//!
//! ## Usage
//!
//! ```bash
//! # List identities
//! certstore list --json
//!
//! # Sign a file's SHA-384 digest with a chosen certificate
//! certstore sign --serial 62D1AEFC36D9E1DF17124E399EF78D909C29FF50 --file report.pdf --hash sha384
//!
//! # Import a PKCS#12 bundle, keeping keys in a CNG provider
//! certstore --key-preference cng-only import identity.pfx --password secret
//! ```
//!
//! Signatures are printed base64 encoded.

mod cli;
mod commands;

use std::error::Error;

use certstore::StoreConfig;
use cli::{parse_args, print_help, CliConfig, CliResult};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program_name = args.first().map(|s| s.as_str()).unwrap_or("certstore");

    let exit_code = match parse_args(&args) {
        CliResult::Help => {
            print_help(program_name);
            0
        }
        CliResult::Error(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
        CliResult::Run(config) => {
            init_logging(config.verbose);
            match run(config) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    2
                }
            }
        }
    };

    std::process::exit(exit_code);
}

/// Initialize env_logger; RUST_LOG takes precedence over `-v`
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

/// Load configuration and run the command
///
/// Configuration errors propagate (exit 2); store and signing failures are
/// reported here and exit 1.
fn run(config: CliConfig) -> Result<i32, Box<dyn Error>> {
    let mut store_config = match &config.config_path {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(preference) = config.key_preference {
        store_config.key_preference = preference;
    }
    log::debug!(
        "Store '{}' with key preference {}",
        store_config.store_name,
        store_config.key_preference
    );

    if let Err(e) = commands::execute(&config.command, &store_config) {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        return Ok(1);
    }
    Ok(0)
}
