use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use refresh_it::bridge::{self, NativeHost};
use refresh_it::config::{WatchConfig, load_config_file};
use refresh_it::logging::init_logging;
use refresh_it::signal::{RemoteSource, SignalSource};
use refresh_it::storage::{FileStore, MemoryStore, SessionStore};

#[derive(Debug, Parser)]
#[command(name = "refresh_it", version, about = "Reload display pages when their watched signal changes")]
struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug events
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve a page over the browser's native messaging port (stdin/stdout)
    Watch(WatchArgs),
    /// Read a remote signal once and print it
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Poll this endpoint instead of reading the page
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    interval_ms: Option<u64>,

    /// Reload every interval regardless of the signal
    #[arg(long)]
    force_reload: bool,

    /// Keep stored values in this file instead of memory
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    url: String,

    /// Response field to try first
    #[arg(long)]
    field: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn base_config(path: Option<&PathBuf>) -> Result<WatchConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => load_config_file(path)?,
        None => WatchConfig::default(),
    })
}

async fn run_watch(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = base_config(args.config.as_ref())?;
    if let Some(url) = args.url {
        config.remote_url = Some(url);
    }
    if let Some(interval_ms) = args.interval_ms {
        config.interval_ms = interval_ms;
    }
    if args.force_reload {
        config.force_reload = true;
    }
    if let Some(path) = args.state_file {
        config.state_file = Some(path);
    }
    config.validate()?;

    let store: Arc<dyn SessionStore> = match &config.state_file {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::default()),
    };

    info!(
        event = "cli.watch_started",
        interval_ms = config.interval_ms,
        remote_url = ?config.remote_url,
        force_reload = config.force_reload
    );

    let (cmd_tx, cmd_rx) = bridge::create_command_channel();
    let (events_tx, events_rx) = bridge::create_bridge_channel();
    let host = Arc::new(NativeHost::new(cmd_tx));

    bridge::spawn_reader(tokio::io::stdin(), host.clone(), events_tx);
    let writer = bridge::spawn_writer(tokio::io::stdout(), cmd_rx);

    bridge::serve(config, host, events_rx, store).await?;

    // host was the last command sender; let queued commands drain
    writer.await?;
    info!(event = "cli.watch_completed");
    Ok(())
}

async fn run_check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = base_config(args.config.as_ref())?;
    config.remote_url = Some(args.url.clone());
    if args.field.is_some() {
        config.response_field = args.field;
    }
    config.validate()?;

    let source = RemoteSource::new(
        &args.url,
        config.response_format,
        config.response_field.clone(),
        &config.selector,
        config.fetch_timeout(),
    )?;
    let raw = source.read().await?;
    let value = raw.as_deref().and_then(|raw| (config.parser.parser())(raw));

    let report = serde_json::json!({
        "url": source.url(),
        "raw": raw,
        "value": value.map(|v| v.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
        Commands::Check(args) => run_check(args).await,
    }
}
