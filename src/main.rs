//! chainkv - admin tool for a tamper-evident key-value store

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainkv::{ChainState, Config, Item, Store};

#[derive(Parser, Debug)]
#[command(name = "chainkv")]
#[command(about = "Tamper-evident key-value store with verifiable history", version)]
struct Args {
    /// Base directory for log and index files
    #[arg(long, env = "CHAINKV_DATA_DIR", default_value = "./chainkv-data")]
    data_dir: PathBuf,

    /// Disable fsync (testing only)
    #[arg(long, env = "CHAINKV_NO_FSYNC")]
    no_fsync: bool,

    /// Log level
    #[arg(long, env = "CHAINKV_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show head, watermark and health
    Status,

    /// Check that the current head extends an earlier state
    Verify {
        /// TxID of the earlier state
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Expected Alh at `from` (hex); defaults to the stored value
        #[arg(long)]
        alh: Option<String>,
    },

    /// Read the latest value of a key
    Get {
        key: String,

        /// Wait until this TxID is indexed (defaults to the current head)
        #[arg(long)]
        since: Option<u64>,
    },

    /// Write a key
    Set { key: String, value: String },

    /// List versions of a key
    History {
        key: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// 0 lists every version
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Oldest first
        #[arg(long)]
        reverse: bool,
    },

    /// List keys carrying a prefix
    Scan {
        #[arg(default_value = "")]
        prefix: String,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct ItemView {
    key: String,
    value: String,
    tx_id: u64,
}

impl From<Item> for ItemView {
    fn from(item: Item) -> Self {
        Self {
            key: String::from_utf8_lossy(&item.key).into_owned(),
            value: String::from_utf8_lossy(&item.value).into_owned(),
            tx_id: item.tx_id,
        }
    }
}

#[derive(Serialize)]
struct VerifyReport {
    verified: bool,
    from: ChainState,
    head: ChainState,
    transactions: usize,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging (stderr, so stdout stays machine-readable)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Starting chainkv v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    config.storage.data_dir = args.data_dir.clone();
    if args.no_fsync {
        config.storage.fsync_enabled = false;
    }

    let store = Store::open(config)
        .await
        .with_context(|| format!("failed to open store at {}", args.data_dir.display()))?;

    let result = run(&store, args.command).await;
    store.shutdown().await;
    result
}

async fn run(store: &Store, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            #[derive(Serialize)]
            struct Status {
                head: ChainState,
                health: chainkv::Health,
                recovery_lag: u64,
            }
            print_json(&Status {
                head: store.current_root(),
                health: store.health(),
                recovery_lag: store.recovery_report().lag(),
            })
        }

        Command::Verify { from, alh } => {
            // Opening the store already re-verified every record and the chain
            let proof = store.consistency(from)?;
            let from_state = match alh {
                Some(hex_alh) => {
                    let bytes = hex::decode(&hex_alh).context("--alh is not valid hex")?;
                    let alh = bytes
                        .try_into()
                        .map_err(|_| anyhow::anyhow!("--alh must be 32 bytes"))?;
                    ChainState { tx_id: from, alh }
                }
                None => proof.source(),
            };
            let head = store.current_root();
            let verified = proof.verify(&from_state.alh, &head.alh);
            print_json(&VerifyReport {
                verified,
                from: from_state,
                head,
                transactions: proof.metadata.len(),
            })?;
            anyhow::ensure!(verified, "head does not extend the state at tx {from}");
            Ok(())
        }

        Command::Get { key, since } => {
            let since = since.unwrap_or_else(|| store.tx_count());
            let item = store.get_since(key.as_bytes(), since).await?;
            print_json(&ItemView::from(item))
        }

        Command::Set { key, value } => {
            let result = store.set(key, value)?;
            print_json(&result)
        }

        Command::History {
            key,
            offset,
            limit,
            reverse,
        } => {
            store
                .wait_for_indexing(
                    store.tx_count(),
                    store.config().background.indexer.wait_timeout(),
                    &tokio_util::sync::CancellationToken::new(),
                )
                .await?;
            let items = store.history(key.as_bytes(), offset, limit, reverse)?;
            print_json(&items.into_iter().map(ItemView::from).collect::<Vec<_>>())
        }

        Command::Scan {
            prefix,
            desc,
            limit,
        } => {
            store
                .wait_for_indexing(
                    store.tx_count(),
                    store.config().background.indexer.wait_timeout(),
                    &tokio_util::sync::CancellationToken::new(),
                )
                .await?;
            let items = store.scan(prefix.as_bytes(), !desc, limit)?;
            print_json(&items.into_iter().map(ItemView::from).collect::<Vec<_>>())
        }
    }
}
