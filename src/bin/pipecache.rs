//! pipecache command-line client
//!
//! # Examples
//!
//! ```bash
//! # Store and read back a value
//! pipecache --servers 127.0.0.1:11211 set greeting hello --ttl 60
//! pipecache --servers 127.0.0.1:11211 get greeting
//!
//! # Ten newest entries across three sorted collections
//! pipecache smget --keys feed:1,feed:2,feed:3 --from 1000 --to 0 --count 10
//!
//! # Same query, legacy paging
//! pipecache smget --keys feed:1,feed:2 --from 0 --to 1000 --offset 20 --count 10
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pipecache::smget::{BKey, BKeyRange, SMGetMode};
use pipecache::{CacheClient, ClientConfig, StringTranscoder};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Pipelined cache client
#[derive(Parser, Debug)]
#[command(name = "pipecache")]
#[command(version = pipecache::VERSION)]
#[command(about = "Pipelined binary-protocol cache client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client configuration file (TOML)
    #[arg(short, long, global = true, env = "PIPECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Comma separated host:port list, overrides the configuration
    #[arg(long, global = true, value_delimiter = ',')]
    servers: Vec<String>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "PIPECACHE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a value
    Get {
        key: String,
    },

    /// Store a value
    Set {
        key: String,
        value: String,
        /// Expiration in seconds, 0 for none
        #[arg(long, default_value = "0")]
        ttl: u32,
    },

    /// Remove a value
    Delete {
        key: String,
    },

    /// Show the server version of every node
    Version,

    /// Sorted multi-get across collections
    Smget(SmgetArgs),
}

#[derive(Args, Debug)]
struct SmgetArgs {
    /// Collection keys
    #[arg(long, value_delimiter = ',', required = true)]
    keys: Vec<String>,

    /// Range start; a decimal number or 0x-prefixed hex bytes
    #[arg(long)]
    from: String,

    /// Range end; descending when below `from`
    #[arg(long)]
    to: String,

    #[arg(long, default_value = "50")]
    count: usize,

    /// Skip this many merged elements (legacy paging)
    #[arg(long)]
    offset: Option<usize>,

    /// Keep one element per bkey
    #[arg(long)]
    unique: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;
    pipecache::metrics::init_metrics();

    let mut config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if !cli.servers.is_empty() {
        config.servers = cli.servers.clone();
        config.validate()?;
    }

    let client = CacheClient::connect(config)?;
    let outcome = run(&client, cli.command).await;
    client.shutdown().await;

    if cli.metrics {
        print!("{}", pipecache::metrics::export_metrics());
    }
    outcome
}

async fn run(client: &CacheClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Get { key } => {
            match client.get(&key, StringTranscoder).await?.get().await? {
                Some(value) => println!("{}", value),
                None => println!("(not found)"),
            }
            Ok(())
        }
        Commands::Set { key, value, ttl } => {
            let future = client.set(&key, ttl, &value, &StringTranscoder).await?;
            if future.get().await? {
                println!("STORED");
            } else {
                let status = future.status().map(|s| s.to_string()).unwrap_or_default();
                warn!(%key, %status, "Store rejected");
                println!("NOT STORED ({})", status);
            }
            Ok(())
        }
        Commands::Delete { key } => {
            let deleted = client.delete(&key).await?.get().await?;
            println!("{}", if deleted { "DELETED" } else { "NOT FOUND" });
            Ok(())
        }
        Commands::Version => {
            println!("pipecache {}", pipecache::VERSION);
            let mut versions: Vec<_> = client.versions().await?.into_iter().collect();
            versions.sort();
            for (node, version) in versions {
                println!("  {}  {}", node, version);
            }
            Ok(())
        }
        Commands::Smget(args) => smget_command(client, args).await,
    }
}

async fn smget_command(client: &CacheClient, args: SmgetArgs) -> anyhow::Result<()> {
    let range = BKeyRange::new(parse_bkey(&args.from)?, parse_bkey(&args.to)?);
    let mode = if args.unique {
        SMGetMode::Unique
    } else {
        SMGetMode::Duplicate
    };
    let future = match args.offset {
        Some(offset) => {
            client
                .smget_legacy(&args.keys, range, offset, args.count, mode, StringTranscoder)
                .await?
        }
        None => {
            client
                .smget(&args.keys, range, args.count, mode, StringTranscoder)
                .await?
        }
    };
    let response = future.get().await?;
    info!(
        elements = response.elements.len(),
        missed = response.missed.len(),
        "smget finished"
    );

    println!("status: {}", response.status.as_str());
    for element in &response.elements {
        println!("{}\t{}\t{}", element.bkey, element.key, element.value);
    }
    for (key, status) in &response.missed {
        println!("missed: {} ({})", key, status);
    }
    for trim in &response.trimmed {
        println!("trimmed: {} at {}", trim.key, trim.bkey);
    }
    Ok(())
}

fn parse_bkey(text: &str) -> anyhow::Result<BKey> {
    match text.strip_prefix("0x") {
        Some(hex) => {
            if hex.len() % 2 != 0 {
                anyhow::bail!("hex bkey {:?} has an odd number of digits", text);
            }
            let bytes = (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .with_context(|| format!("invalid hex bkey {:?}", text))?;
            Ok(BKey::Bytes(bytes))
        }
        None => Ok(BKey::Long(
            text.parse()
                .with_context(|| format!("invalid bkey {:?}", text))?,
        )),
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "pipecache.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}
