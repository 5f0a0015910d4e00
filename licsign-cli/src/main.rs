//! License signing command line tool
//!
//! Generates the signing key pair in a named key container, prints keys in a
//! form that can be pasted into C sources, and signs license text.
//!
//! Usage:
//!   licsign keygen --out-dir keys/
//!   licsign sign --private-key keys/private.key --license "LICENSE-OK-12345"

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use licsign_crypto::{LicenseSigner, SignerConfig, SoftwareProvider};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "licsign")]
#[command(about = "License key generation and signing")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Key container name (overrides the configuration file)
    #[arg(long, global = true)]
    container: Option<String>,

    /// Directory holding key containers (overrides the configuration file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// RSA key length in bits (overrides the configuration file)
    #[arg(long, global = true)]
    bits: Option<u32>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new key pair in the container and print both halves
    Keygen {
        /// Also write raw `public.key` and `private.key` blobs to this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print the key pair stored in the container
    Export {
        /// Print the private key instead of the public key
        #[arg(long)]
        private: bool,
    },
    /// Sign license text with a raw private key blob
    Sign(SignArgs),
}

#[derive(ClapArgs, Debug)]
struct SignArgs {
    /// File holding a raw private key blob, or its decimal text rendering
    #[arg(short, long)]
    private_key: PathBuf,

    /// License text to sign
    #[arg(short, long, conflicts_with = "license_file", required_unless_present = "license_file")]
    license: Option<String>,

    /// File containing the license text to sign
    #[arg(long)]
    license_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(&args)?;
    debug!(?config, "configuration loaded");
    let provider = SoftwareProvider::new(&config.provider_root);
    let signer = LicenseSigner::open(provider, &config).with_context(|| {
        format!("Failed to open key container {:?}", config.container_name)
    })?;

    match args.command {
        Command::Keygen { out_dir } => keygen(&signer, out_dir)?,
        Command::Export { private } => {
            signer
                .load_key_pair()
                .context("No key pair stored in the container; run `licsign keygen` first")?;
            let text = if private {
                signer.export_private_key()?
            } else {
                signer.export_public_key()?
            };
            println!("{text}");
        }
        Command::Sign(sign_args) => {
            let blob = read_private_key(&sign_args.private_key)?;
            let license = match (sign_args.license, sign_args.license_file) {
                (Some(text), _) => text,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read license file {path:?}"))?,
                (None, None) => bail!("either --license or --license-file is required"),
            };
            let signature = signer.sign(&blob, &license).context("Failed to sign license")?;
            println!("{signature}");
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<SignerConfig> {
    let mut config = match &args.config {
        Some(path) => SignerConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path:?}"))?,
        None => SignerConfig::default(),
    };
    if let Some(name) = &args.container {
        config.container_name = name.clone();
    }
    if let Some(root) = &args.root {
        config.provider_root = root.clone();
    }
    if let Some(bits) = args.bits {
        config.key_bits = bits;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn keygen(signer: &LicenseSigner<SoftwareProvider>, out_dir: Option<PathBuf>) -> Result<()> {
    info!(container = %signer.container_name(), bits = signer.key_bits(), "Generating key pair...");
    signer.generate_key_pair().context("Failed to generate key pair")?;

    println!("// public key");
    println!("{}", signer.export_public_key()?);
    println!();
    println!("// private key");
    println!("{}", signer.export_private_key()?);

    if let Some(dir) = out_dir {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {dir:?}"))?;
        fs::write(dir.join("public.key"), signer.export_public_key_blob()?)
            .context("Failed to write public key")?;
        fs::write(dir.join("private.key"), signer.export_private_key_blob()?.as_slice())
            .context("Failed to write private key")?;
        info!("Key blobs written to {:?}", dir);
    }
    Ok(())
}

/// Reads a private key blob, accepting either raw bytes or the decimal text rendering.
fn read_private_key(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read private key {path:?}"))?;
    match std::str::from_utf8(&bytes) {
        Ok(text) if text.trim_start().starts_with(|c: char| c.is_ascii_digit()) => {
            licsign_crypto::parse_byte_list(text).context("Failed to parse private key text")
        }
        _ => Ok(bytes),
    }
}
