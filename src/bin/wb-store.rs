use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use wb_store::prelude::*;

/// Inspect and maintain a wb-store SQLite database.
#[derive(Debug, Clone, Parser)]
#[clap(about, version, author, name = "wb-store")]
struct Cli {
    /// Path of the SQLite database file.
    #[clap(long, env = "WBSTORE_DB", default_value = "wb-store.db")]
    db: PathBuf,

    /// Emulate a storage quota by capping the database size, in pages.
    #[clap(long, env = "WBSTORE_MAX_PAGES")]
    max_pages: Option<u32>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print every record.
    Dump,
    /// Print the value stored under a key.
    Get { key: String },
    /// Store a JSON value under a key.
    Put { key: String, json: String },
    /// Delete the database and start over.
    Reset,
    /// Move entries of a legacy JSON file into the database.
    Migrate {
        /// The legacy store file.
        #[clap(long, env = "WBSTORE_LEGACY")]
        legacy: PathBuf,

        /// Keys to migrate. May be repeated.
        #[clap(long = "key", required = true)]
        keys: Vec<String>,
    },
}

impl Cli {
    fn record_store(&self) -> Arc<SqliteRecordStore> {
        Arc::new(match self.max_pages {
            Some(pages) => SqliteRecordStore::with_max_page_count(&self.db, pages),
            None => SqliteRecordStore::new(&self.db),
        })
    }
}

fn setup_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    info!("Tracing initialized");
    Ok(())
}

fn report(status: &BootstrapStatus) {
    for warning in &status.warnings {
        eprintln!("warning: {warning}");
    }
}

async fn run(cli: Cli) -> Result<()> {
    let records = cli.record_store();

    match cli.command {
        Command::Dump => {
            records.open().await?;
            for record in records.get_all().await? {
                println!("{}\t{}", record.key, record.value);
            }
        }
        Command::Get { ref key } => {
            records.open().await?;
            match records.get(key).await? {
                Some(record) => {
                    let value = record.parse().with_context(|| format!("record '{key}' is corrupt"))?;
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                None => anyhow::bail!("no record for '{key}'"),
            }
        }
        Command::Put { ref key, ref json } => {
            let value: Value = serde_json::from_str(json).context("value must be valid JSON")?;
            let store = Store::new(StoreConfig::defaults()?, records, Arc::new(MemoryLegacyStore::new()));
            report(&store.initialize().await);
            let outcome = store.persist(key, &value).await?;
            report(&store.status());
            println!("{outcome:?}");
            store.close().await;
        }
        Command::Reset => {
            records.reset().await?;
            records.close().await?;
            println!("Reset {}", cli.db.display());
        }
        Command::Migrate { ref legacy, ref keys } => {
            let legacy = Arc::new(
                JsonFileLegacyStore::open(legacy)
                    .with_context(|| format!("cannot read legacy store {}", legacy.display()))?,
            );
            let config = StoreConfig::builder().keys(keys).try_build()?;
            let store = Store::new(config, records, legacy);
            let status = store.initialize().await;
            report(&status);
            store.close().await;
            println!("Migration done (recovered: {})", status.recovered);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing()?;
    run(cli).await
}
