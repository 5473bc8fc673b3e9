//! The `basalt` binary.

use anyhow::{bail, Context};
use basalt_crypto::{keystore, ValidatorKeys};
use basalt_execution::{AllowAllVerifier, ContractRegistry};
use basalt_network::HandshakeConfig;
use basalt_node::{Coordinator, NodeConfig, NodeService};
use basalt_storage::Database;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "basalt", about = "Basalt proof-of-stake node")]
struct Cli {
    /// Path to the node's TOML configuration.
    #[arg(long, default_value = "basalt.toml")]
    config: PathBuf,

    /// Overrides the configured listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Generates a fresh validator keystore at the configured path and
    /// exits.
    #[arg(long)]
    init_keys: bool,
}

/// The keystore passphrase comes from the environment so the binary stays
/// non-interactive under a supervisor.
const PASSPHRASE_ENV: &str = "BASALT_KEYSTORE_PASSPHRASE";

fn load_or_init_keys(config: &NodeConfig, init: bool) -> anyhow::Result<Option<Arc<ValidatorKeys>>> {
    let Some(path) = &config.keystore else {
        if init {
            bail!("--init-keys requires a keystore path in the config");
        }
        return Ok(None);
    };
    let passphrase = std::env::var(PASSPHRASE_ENV)
        .with_context(|| format!("{PASSPHRASE_ENV} must be set to unlock the keystore"))?;

    if init {
        let keys = ValidatorKeys::generate().context("key generation failed")?;
        let file = keys.to_keystore(&passphrase)?;
        keystore::save_to_file(&file, path)?;
        info!(address = %keys.address(), path = %path.display(), "validator keystore written");
        return Ok(Some(Arc::new(keys)));
    }

    let file = keystore::load_from_file(path)
        .with_context(|| format!("failed to read keystore {}", path.display()))?;
    let keys = ValidatorKeys::from_keystore(&file, &passphrase)
        .context("keystore decryption failed")?;
    info!(address = %keys.address(), "validator keystore unlocked");
    Ok(Some(Arc::new(keys)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let keys = load_or_init_keys(&config, cli.init_keys)?;
    if cli.init_keys {
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db = Database::open(&config.data_dir).context("opening database")?;

    let coordinator = Arc::new(Coordinator::bootstrap(
        &config.genesis,
        db,
        keys.clone(),
        ContractRegistry::new(),
        Arc::new(AllowAllVerifier),
    )?);
    info!(
        tip = coordinator.tip_number(),
        genesis = %coordinator.genesis_hash,
        "chain ready"
    );

    // Every node carries an identity for the transport handshake, even
    // when it does not validate.
    let identity = match keys {
        Some(keys) => keys,
        None => Arc::new(ValidatorKeys::generate().context("identity generation failed")?),
    };
    let service = NodeService::new(
        coordinator,
        HandshakeConfig {
            chain_id: config.genesis.params.chain_id,
            genesis_hash: service_genesis_hash(&config)?,
            keys: identity,
        },
    );

    let listen = cli.listen.unwrap_or(config.listen);
    service.start(listen).await?;
    for peer in &config.bootstrap_peers {
        service.connect(*peer);
    }

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    service.stop().await;
    Ok(())
}

fn service_genesis_hash(config: &NodeConfig) -> anyhow::Result<basalt_types::Hash256> {
    // The handshake binds to the genesis hash; recompute it from the
    // description so mismatched configs fail loudly at connect time.
    let built = basalt_node::build_genesis(
        &config.genesis,
        basalt_state::MemoryNodeStore::new(),
    )?;
    Ok(built.hash)
}
