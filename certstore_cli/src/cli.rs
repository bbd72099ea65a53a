//! Command-line interface parsing
//!
//! Handles argument parsing, validation, and help text generation.

use std::path::PathBuf;

use certstore::{HashAlgorithm, KeyPreference};

/// What to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInput {
    /// A finished digest, already decoded from hex
    Digest(Vec<u8>),
    /// A file to hash first
    File(PathBuf),
}

/// Subcommand to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List {
        json: bool,
    },
    Sign {
        serial: Option<String>,
        hash: HashAlgorithm,
        input: SignInput,
    },
    Import {
        path: PathBuf,
        password: String,
    },
    Delete {
        serial: String,
    },
}

/// Parsed invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub key_preference: Option<KeyPreference>,
    pub verbose: bool,
}

/// CLI parsing result
pub enum CliResult {
    /// Run this command
    Run(CliConfig),
    /// Show help and exit
    Help,
    /// Error with message
    Error(String),
}

/// Parse command-line arguments
pub fn parse_args(args: &[String]) -> CliResult {
    let program_name = args.first().map(|s| s.as_str()).unwrap_or("certstore");

    let mut command_name: Option<&str> = None;
    let mut positional: Option<&str> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut key_preference: Option<KeyPreference> = None;
    let mut verbose = false;
    let mut json = false;
    let mut serial: Option<String> = None;
    let mut hash: Option<HashAlgorithm> = None;
    let mut digest: Option<Vec<u8>> = None;
    let mut file: Option<PathBuf> = None;
    let mut password: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args.get(i).map(|s| s.as_str()) {
            Some("--help" | "-h") => {
                return CliResult::Help;
            }
            Some("--verbose" | "-v") => {
                verbose = true;
            }
            Some("--json") => {
                json = true;
            }
            Some("--config" | "-c") => {
                i += 1;
                match args.get(i) {
                    Some(val) => config_path = Some(PathBuf::from(val)),
                    None => return CliResult::Error("--config requires a filename".to_string()),
                }
            }
            Some("--key-preference") => {
                i += 1;
                match args.get(i).map(|s| s.parse::<KeyPreference>()) {
                    Some(Ok(pref)) => key_preference = Some(pref),
                    Some(Err(msg)) => return CliResult::Error(msg),
                    None => {
                        return CliResult::Error("--key-preference requires a value".to_string())
                    }
                }
            }
            Some("--serial" | "-s") => {
                i += 1;
                match args.get(i) {
                    Some(val) => serial = Some(val.to_uppercase()),
                    None => return CliResult::Error("--serial requires a value".to_string()),
                }
            }
            Some("--hash") => {
                i += 1;
                match args.get(i).map(|s| s.parse::<HashAlgorithm>()) {
                    Some(Ok(alg)) => hash = Some(alg),
                    Some(Err(msg)) => return CliResult::Error(msg),
                    None => return CliResult::Error("--hash requires a value".to_string()),
                }
            }
            Some("--digest" | "-d") => {
                i += 1;
                match args.get(i).map(|s| hex::decode(s.trim())) {
                    Some(Ok(bytes)) => digest = Some(bytes),
                    Some(Err(e)) => {
                        return CliResult::Error(format!("--digest is not hex: {}", e));
                    }
                    None => return CliResult::Error("--digest requires a value".to_string()),
                }
            }
            Some("--file" | "-f") => {
                i += 1;
                match args.get(i) {
                    Some(val) => file = Some(PathBuf::from(val)),
                    None => return CliResult::Error("--file requires a filename".to_string()),
                }
            }
            Some("--password" | "-p") => {
                i += 1;
                match args.get(i) {
                    Some(val) => password = Some(val.clone()),
                    None => return CliResult::Error("--password requires a value".to_string()),
                }
            }
            Some(arg) if !arg.starts_with('-') => {
                if command_name.is_none() {
                    command_name = Some(arg);
                } else if positional.is_none() {
                    positional = Some(arg);
                } else {
                    return CliResult::Error(format!("Unexpected argument: {}", arg));
                }
            }
            Some(arg) => {
                return CliResult::Error(format!("Unknown option: {}", arg));
            }
            None => break,
        }
        i += 1;
    }

    let command = match command_name {
        Some("list") => Command::List { json },
        Some("sign") => {
            let input = match (digest, file) {
                (Some(d), None) => SignInput::Digest(d),
                (None, Some(f)) => SignInput::File(f),
                (Some(_), Some(_)) => {
                    return CliResult::Error("Use either --digest or --file, not both".to_string());
                }
                (None, None) => {
                    return CliResult::Error("sign requires --digest or --file".to_string());
                }
            };
            Command::Sign {
                serial,
                hash: hash.unwrap_or(HashAlgorithm::Sha256),
                input,
            }
        }
        Some("import") => {
            let path = match positional {
                Some(p) => PathBuf::from(p),
                None => return CliResult::Error("import requires a PFX file".to_string()),
            };
            Command::Import {
                path,
                password: password.unwrap_or_default(),
            }
        }
        Some("delete") => match serial {
            Some(serial) => Command::Delete { serial },
            None => return CliResult::Error("delete requires --serial".to_string()),
        },
        Some(other) => {
            return CliResult::Error(format!(
                "Unknown command '{}'. Use: list, sign, import, delete",
                other
            ));
        }
        None => {
            return CliResult::Error(format!(
                "Missing command\nUsage: {} [OPTIONS] <list|sign|import|delete>",
                program_name
            ));
        }
    };

    if positional.is_some() && !matches!(command, Command::Import { .. }) {
        return CliResult::Error(format!(
            "Unexpected argument: {}",
            positional.unwrap_or_default()
        ));
    }

    CliResult::Run(CliConfig {
        command,
        config_path,
        key_preference,
        verbose,
    })
}

/// Print full help text
pub fn print_help(program_name: &str) {
    println!("certstore v{}", env!("CARGO_PKG_VERSION"));
    println!("Sign with certificates from the OS certificate store or a PKCS#11 token\n");

    println!("USAGE:");
    println!(
        "    {} [OPTIONS] list [--json]                       List identities",
        program_name
    );
    println!(
        "    {} [OPTIONS] sign (--digest <hex>|--file <path>)  Sign a digest",
        program_name
    );
    println!(
        "    {} [OPTIONS] import <file.pfx> --password <pw>    Import a PKCS#12 bundle",
        program_name
    );
    println!(
        "    {} [OPTIONS] delete --serial <hex>                Delete an identity\n",
        program_name
    );

    println!("OPTIONS:");
    println!("    -h, --help                  Show this help message");
    println!("    -v, --verbose               Debug logging (RUST_LOG overrides)");
    println!("    -c, --config <file>         Store configuration (TOML)");
    println!("        --key-preference <p>    cryptoapi-only, prefer-cryptoapi (default), prefer-cng, cng-only");
    println!("    -s, --serial <hex>          Certificate serial number to use");
    println!("        --hash <alg>            sha1, sha256 (default), sha384, sha512");
    println!("    -d, --digest <hex>          Finished digest to sign");
    println!("    -f, --file <path>           File to hash and sign");
    println!("    -p, --password <pw>         PFX password");
    println!("        --json                  JSON output for list");
    println!();

    println!("EXIT CODES:");
    println!("    0    Success");
    println!("    1    Store or signing operation failed");
    println!("    2    Usage or configuration error");
    println!();

    println!("EXAMPLES:");
    println!("    {} list --json", program_name);
    println!(
        "    {} sign --serial 62D1AEFC --file report.pdf --hash sha384",
        program_name
    );
    println!(
        "    {} --key-preference cng-only import id.pfx --password secret",
        program_name
    );
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
