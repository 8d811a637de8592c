//! keytrie CLI - manage directory configuration and run simulations
//!
//! `simulate` builds an in-process directory, drives a workload through it
//! and checks every proof and checkpoint along the way.

use clap::{Parser, Subcommand};
use ed25519_dalek::{Signer, SigningKey};
use keytrie::model::{master_key_identifier, public_key_identifier, signed_payload};
use keytrie::validate::validate;
use keytrie::{Auditor, CheckpointProof, Claim, Config, Directory, FileStore, MemoryStore, Storage};
use rand::rngs::OsRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keytrie")]
#[command(about = "A key-transparency directory built on authenticated prefix tries")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.config/keytrie/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    ShowConfig,

    /// Run a workload against an in-process directory and audit it
    Simulate {
        /// Number of users to register
        #[arg(short, long, default_value = "8")]
        users: usize,
        /// Public keys each user appends per round
        #[arg(short, long, default_value = "2")]
        appends: usize,
        /// Verification periods to run
        #[arg(short, long, default_value = "3")]
        rounds: usize,
        /// Override the configured partition count
        #[arg(short, long)]
        partitions: Option<usize>,
        /// Keep a history forest instead of the two-epoch window
        #[arg(long)]
        aggregated: bool,
        /// Keep values in this store file instead of memory; an existing
        /// file is overwritten
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keytrie=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Wrote {}", config_path.display())
                }),
            )?;
        }

        Commands::ShowConfig => {
            let config = Config::load(&config_path)?;
            output(
                cli.format,
                &serde_json::json!({
                    "path": config_path.display().to_string(),
                    "config": config
                }),
            )?;
        }

        Commands::Simulate {
            users,
            appends,
            rounds,
            partitions,
            aggregated,
            store,
        } => {
            let mut config = Config::load(&config_path)?;
            if let Some(partitions) = partitions {
                config.partitions = partitions;
            }
            config.aggregated_history |= aggregated;

            let store: Arc<dyn Storage> = match &store {
                Some(path) => Arc::new(FileStore::create(path)?),
                None => Arc::new(MemoryStore::new()),
            };
            let report = simulate(&config, store, users, appends, rounds)?;
            output(cli.format, &report)?;
        }
    }

    Ok(())
}

/// Counters gathered while simulating
#[derive(Default)]
struct Tally {
    appends: u64,
    lookups: u64,
    checkpoints: u64,
}

fn simulate(
    config: &Config,
    store: Arc<dyn Storage>,
    users: usize,
    appends: usize,
    rounds: usize,
) -> anyhow::Result<serde_json::Value> {
    let directory = Directory::new(config, store)?;
    let mut auditor = Auditor::new();
    let mut tally = Tally::default();

    let owners: Vec<(Vec<u8>, SigningKey)> = (0..users)
        .map(|i| (format!("user{}", i).into_bytes(), SigningKey::generate(&mut OsRng)))
        .collect();
    for (username, owner) in &owners {
        let master_key = owner.verifying_key().to_bytes();
        directory.register(username, &master_key, &owner.sign(&master_key).to_bytes())?;
        tally.appends += 1;
    }
    directory.increment_update_epoch()?;
    audit(&directory, &mut auditor, &mut tally)?;

    for round in 0..rounds {
        for _ in 0..appends {
            for (username, owner) in &owners {
                let device = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();
                directory.append(username, &device, |position| {
                    owner.sign(&signed_payload(&device, position)).to_bytes().to_vec()
                })?;
                tally.appends += 1;
            }
            directory.increment_update_epoch()?;
            audit(&directory, &mut auditor, &mut tally)?;
        }

        for (username, owner) in &owners {
            check_lookup(&directory, username, owner, appends > 0, &mut tally)?;
        }

        directory.increment_verification_period()?;
        audit(&directory, &mut auditor, &mut tally)?;
        info!(round, "round complete");
    }

    let digests = (0..directory.partition_count())
        .map(|p| {
            let digest = directory.checkpoint(p)?;
            Ok(serde_json::json!({
                "partition": p,
                "verification_epoch": digest.verification_epoch,
                "update_epoch": digest.update_epoch,
                "base_size": digest.base_size,
                "chain": digest.chain.to_hex(),
                "history_size": digest.history.as_ref().map(|h| h.size),
            }))
        })
        .collect::<keytrie::Result<Vec<_>>>()?;

    Ok(serde_json::json!({
        "users": users,
        "rounds": rounds,
        "partitions": directory.partition_count(),
        "aggregated": config.aggregated_history,
        "appends": tally.appends,
        "lookups_validated": tally.lookups,
        "checkpoints_audited": tally.checkpoints,
        "digests": digests,
    }))
}

/// Look up the newest provable master and public keys and validate them
fn check_lookup(
    directory: &Directory,
    username: &[u8],
    owner: &SigningKey,
    has_public_keys: bool,
    tally: &mut Tally,
) -> anyhow::Result<()> {
    let found = directory.lookup_with_proof(&master_key_identifier(username))?;
    let claim = Claim::master_key(
        username,
        &found.record.value,
        found.record.signature,
        found.record.position,
    )?;
    validate(&found.digest, &found.proof, &claim)?;
    tally.lookups += 1;
    if !has_public_keys {
        return Ok(());
    }

    let identifier = public_key_identifier(username);
    let found = directory.lookup_with_proof(&identifier)?;
    let claim = Claim::public_key(
        identifier,
        found.record.value,
        found.record.signature,
        found.record.position,
        owner.verifying_key(),
    );
    validate(&found.digest, &found.proof, &claim)?;
    tally.lookups += 1;
    Ok(())
}

/// Hand every partition's checkpoint to the auditor
fn audit(directory: &Directory, auditor: &mut Auditor, tally: &mut Tally) -> anyhow::Result<()> {
    for partition in 0..directory.partition_count() {
        let (digest, proof) = match auditor.last(partition) {
            Some(previous) => directory.checkpoint_with_proof(partition, previous)?,
            None => (directory.checkpoint(partition)?, CheckpointProof::default()),
        };
        auditor.observe(partition, digest, &proof)?;
        tally.checkpoints += 1;
    }
    Ok(())
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
