//! Datastore CLI
//!
//! Runs the datastore node from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Store a JSON value in PostgreSQL (settings from DATASTORE_PG_* / .env)
//! datastore --backend postgresql --output status set user:1 '{"name": "a"}' --json
//!
//! # Read it back
//! datastore --backend postgresql get user:1
//!
//! # Run a batch file in one process (shares the memory backend)
//! datastore batch items.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use datastore::storage::{BackendKind, PostgresConfig, StorageFactory};
use datastore::{
    Batch, DatastoreNode, InputItem, ItemParams, Operation, OutputItem, OutputMode, ValueInput,
    APP_NAME, APP_VERSION, POSTGRES_ENV_PREFIX,
};

// =============================================================================
// CLI
// =============================================================================

/// Configurable key-value datastore
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Key-value datastore with in-memory and PostgreSQL storage")]
#[command(version)]
struct Cli {
    /// Storage backend (memory, postgresql)
    #[arg(short, long, default_value = "memory")]
    backend: String,

    /// Output shape for set/clear/clear-all
    #[arg(short, long, value_enum, default_value_t = OutputArg::PassThrough)]
    output: OutputArg,

    /// Report per-item failures as output instead of aborting
    #[arg(long)]
    continue_on_fail: bool,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value
    Set {
        /// Key to store under
        key: String,
        /// Value to store
        value: String,
        /// Parse the value as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read a value
    Get {
        /// Key to read
        key: String,
    },
    /// Remove a value
    Clear {
        /// Key to remove
        key: String,
    },
    /// Remove every value
    ClearAll,
    /// Run a batch file
    Batch {
        /// JSON file with operation, output and items
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputArg {
    PassThrough,
    Status,
    AffectedValue,
    AffectedValueOnly,
}

impl From<OutputArg> for OutputMode {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::PassThrough => Self::PassThrough,
            OutputArg::Status => Self::Status,
            OutputArg::AffectedValue => Self::AffectedValue,
            OutputArg::AffectedValueOnly => Self::AffectedValueOnly,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    tracing::info!("{} v{}", APP_NAME, APP_VERSION);

    let factory = Arc::new(StorageFactory::new());
    let result = run(&cli, Arc::clone(&factory)).await;

    // Release pools whether or not the run succeeded
    factory.close_all().await;

    for item in result? {
        println!("{}", serde_json::to_string(&item)?);
    }

    Ok(())
}

async fn run(cli: &Cli, factory: Arc<StorageFactory>) -> anyhow::Result<Vec<OutputItem>> {
    let (operation, key, value) = match &cli.command {
        Commands::Set { key, value, json } => {
            let value = if *json {
                ValueInput::Json(value.clone())
            } else {
                ValueInput::String(value.clone())
            };
            (Operation::Set, key.clone(), value)
        }
        Commands::Get { key } => (Operation::Get, key.clone(), ValueInput::default()),
        Commands::Clear { key } => (Operation::Clear, key.clone(), ValueInput::default()),
        Commands::ClearAll => (Operation::ClearAll, String::new(), ValueInput::default()),
        Commands::Batch { path } => return run_batch(path, factory).await,
    };

    let backend: BackendKind = cli.backend.parse()?;
    let postgres = match backend {
        BackendKind::Postgres => Some(PostgresConfig::from_env(POSTGRES_ENV_PREFIX)?),
        BackendKind::Memory => None,
    };

    let params = ItemParams {
        backend,
        postgres,
        key,
        value,
    };

    let node = DatastoreNode::new(factory, operation)
        .with_output(cli.output.into())
        .with_continue_on_fail(cli.continue_on_fail);

    Ok(node.execute(&[InputItem::new(params)]).await?)
}

async fn run_batch(path: &Path, factory: Arc<StorageFactory>) -> anyhow::Result<Vec<OutputItem>> {
    let batch = Batch::load(path).await?;
    tracing::info!(
        path = %path.display(),
        operation = batch.operation.as_str(),
        items = batch.items.len(),
        "running batch"
    );
    Ok(batch.run(factory).await?)
}
