//! Telio Bridge CLI
//!
//! Usage:
//!   telio-bridge contract               # Print contract version and checksums
//!   telio-bridge verify -l libtelio.so  # Check a built library against this contract
//!   telio-bridge keygen                 # Generate a secret key
//!   telio-bridge pubkey <secret>        # Derive the public key
//!   telio-bridge features               # Print the default feature config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use telio_bridge::config::BridgeConfig;
use telio_bridge::ffi::checksum::{self, CONTRACT_VERSION, NAMESPACE};
use telio_bridge::ffi::loader::LibraryLoader;
use telio_bridge::host::{verify_contract, ExpectedContract, LibraryProbe};
use telio_bridge::logging;
use telio_bridge::telio::{self, SecretKey};

#[derive(Parser)]
#[command(name = "telio-bridge")]
#[command(version)]
#[command(about = "Inspect and verify the telio call bridge", long_about = None)]
struct Cli {
    /// Config file (default: telio-bridge.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contract version and every checksum accessor
    Contract {
        /// Print the canonical signature hashed into each checksum
        #[arg(short, long)]
        verbose: bool,
    },

    /// Verify a scaffolding library against this crate's contract
    Verify {
        /// Library path or name (default: [library] path from config)
        #[arg(short, long)]
        library: Option<String>,

        /// Report checksum mismatches instead of failing
        #[arg(long)]
        lax: bool,
    },

    /// Generate a secret key
    Keygen {
        /// Print hex instead of base64
        #[arg(long)]
        hex: bool,
    },

    /// Derive the public key of a base64 secret key
    Pubkey {
        /// Secret key, base64
        secret: String,

        /// Print hex instead of base64
        #[arg(long)]
        hex: bool,
    },

    /// Print the default feature config as JSON
    Features,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => BridgeConfig::load_from_cwd()
            .context("loading configuration")?
            .with_env_overrides(),
    };
    logging::init(&config.logging.level);

    match cli.command {
        Commands::Contract { verbose } => cmd_contract(verbose),
        Commands::Verify { library, lax } => cmd_verify(&config, library, lax),
        Commands::Keygen { hex } => {
            let secret = telio::generate_secret_key();
            print_key(secret.as_bytes(), hex, || secret.to_string());
            Ok(())
        }
        Commands::Pubkey { secret, hex } => cmd_pubkey(&secret, hex),
        Commands::Features => {
            let json = serde_json::to_string_pretty(&telio::get_default_feature_config())?;
            println!("{json}");
            Ok(())
        }
    }
}

fn cmd_contract(verbose: bool) -> Result<()> {
    println!("namespace:        {NAMESPACE}");
    println!("contract version: {CONTRACT_VERSION}");
    println!();
    for symbol in checksum::INTERFACE {
        println!("{:5}  {}", symbol.checksum(), symbol.accessor());
        if verbose {
            println!("       {}", symbol.canonical());
        }
    }
    println!();
    println!("{} symbols", checksum::INTERFACE.len());
    Ok(())
}

fn cmd_verify(config: &BridgeConfig, library: Option<String>, lax: bool) -> Result<()> {
    let name = match library.or_else(|| {
        config
            .library
            .path
            .as_ref()
            .map(|p| p.display().to_string())
    }) {
        Some(name) => name,
        None => bail!("no library given; pass --library or set [library] path"),
    };

    let mut loader = LibraryLoader::new();
    for path in config.library.search_paths.iter().rev() {
        loader.add_search_path(path);
    }
    let library = loader
        .load(&name)
        .with_context(|| format!("opening {name}"))?;
    println!("library: {}", library.path().display());

    let expected = ExpectedContract::current().with_strict(config.bridge.strict_checksums && !lax);
    let report = verify_contract(&LibraryProbe::new(library), &expected)?;

    println!("contract version {} ok", report.contract_version);
    println!(
        "{} checksums checked, {} mismatched",
        report.checked,
        report.mismatches.len()
    );
    for symbol in &report.mismatches {
        println!("  mismatch: {symbol}");
    }
    Ok(())
}

fn cmd_pubkey(secret: &str, hex: bool) -> Result<()> {
    let secret: SecretKey = secret.parse().context("parsing secret key")?;
    let public = telio::generate_public_key(secret);
    print_key(public.as_bytes(), hex, || public.to_string());
    Ok(())
}

fn print_key(bytes: &[u8], hex: bool, base64: impl FnOnce() -> String) {
    if hex {
        println!("{}", hex::encode(bytes));
    } else {
        println!("{}", base64());
    }
}
