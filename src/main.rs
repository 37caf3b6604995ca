use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use tokio::sync::mpsc;

use sc_downloader::download::{DownloadConfig, SessionHandle};
use sc_downloader::engine::DownloaderEngine;
use sc_downloader::engine::models::{DownloadMethod, FileSelection};
use sc_downloader::networking::NetworkClient;
use sc_downloader::protocol::prober::{DEFAULT_MAX_STEPS, VersionProber};
use sc_downloader::protocol::{DEFAULT_ENDPOINT, ProtocolClient};
use sc_downloader::storage::{Settings, SettingsStore};
use sc_downloader::ui::ProgressReporter;

#[derive(Parser, Debug)]
#[command(
    name = "sc-downloader",
    author,
    version,
    about = "Download game asset patches straight from the Supercell asset servers"
)]
struct Cli {
    /// Settings file to use instead of the one in the application directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Game server to handshake with.
    #[arg(long, global = true, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Seconds to wait for the game server.
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    /// Do not draw a progress bar.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the latest patch, a masterhash, or a local fingerprint file.
    Download(DownloadArgs),
    /// Show the asset host and the live patch without downloading.
    Info,
    /// Search for the live client version and save it.
    Probe {
        /// Give up after this many handshakes.
        #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
        max_steps: usize,
    },
    /// Show or change the saved settings.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Download the patch published under this masterhash.
    #[arg(long, conflicts_with = "fingerprint")]
    masterhash: Option<String>,

    /// Download the files listed in a local fingerprint.json.
    #[arg(long)]
    fingerprint: Option<PathBuf>,

    /// Only fetch files ending with this extension (repeatable), e.g. `--ext .csv`.
    #[arg(long = "ext", value_name = "EXT")]
    extensions: Vec<String>,

    /// Output directory (defaults to the saved one).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of parallel downloads, 1 to 10.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Unpack compressed .csv and .sc files.
    #[arg(long)]
    decompress: bool,

    /// Download files that already exist locally.
    #[arg(long)]
    overwrite: bool,

    /// Give up the version search after this many handshakes.
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_probe_steps: usize,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    major: Option<u32>,
    #[arg(long)]
    build: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let store = match &cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default(),
    };
    let mut settings = store.load().await?;
    let client =
        ProtocolClient::new(cli.endpoint.clone()).with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Command::Download(args) => {
            download(client, &store, &mut settings, args, cli.quiet).await
        }
        Command::Info => show_info(client, &store, &mut settings).await,
        Command::Probe { max_steps } => probe(client, &store, &mut settings, max_steps).await,
        Command::Config(args) => configure(&store, settings, args).await,
    }
}

async fn download(
    client: ProtocolClient,
    store: &SettingsStore,
    settings: &mut Settings,
    args: DownloadArgs,
    quiet: bool,
) -> Result<(), String> {
    let method = match (args.masterhash, args.fingerprint) {
        (Some(masterhash), _) => DownloadMethod::Masterhash(masterhash),
        (None, Some(path)) => DownloadMethod::FingerprintFile(path),
        (None, None) => DownloadMethod::LatestPatch,
    };
    let selection = if args.extensions.is_empty() {
        FileSelection::All
    } else {
        FileSelection::Extensions(args.extensions.iter().map(|ext| normalize_ext(ext)).collect())
    };
    let config = DownloadConfig {
        output_root: args.output.unwrap_or_else(|| settings.output_path.clone()),
        workers: args.workers.unwrap_or(settings.workers_count),
        decompress: args.decompress,
        overwrite: args.overwrite,
    };

    let engine = DownloaderEngine::new(client, Arc::new(NetworkClient::new()))
        .with_max_probe_steps(args.max_probe_steps);
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = if quiet {
        ProgressReporter::hidden()
    } else {
        ProgressReporter::new()
    };
    let reporter = reporter.spawn(rx);

    let result = engine
        .download(
            settings.version(),
            &method,
            &selection,
            &config,
            &tx,
            stop_on_interrupt,
        )
        .await;
    drop(tx);
    let reporter = reporter
        .await
        .map_err(|e| format!("progress reporter failed: {e}"))?;

    let (connection, summary) = result?;
    if connection.version_changed {
        settings.set_version(connection.version);
        store.save(settings).await?;
    }
    for file in reporter.failed_files() {
        warn!("not downloaded: {file}");
    }
    info!(
        "{} (output: {})",
        summary.describe(),
        config.output_root.display()
    );
    Ok(())
}

fn stop_on_interrupt(handle: SessionHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt: finishing in-flight files, then stopping");
            handle.stop();
        }
    });
}

async fn show_info(
    client: ProtocolClient,
    store: &SettingsStore,
    settings: &mut Settings,
) -> Result<(), String> {
    let engine = DownloaderEngine::new(client, Arc::new(NetworkClient::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter::hidden().spawn(rx);

    let connection = engine.connect(settings.version(), &tx).await;
    drop(tx);
    let _ = reporter.await;
    let connection = connection?;
    if connection.version_changed {
        settings.set_version(connection.version);
        store.save(settings).await?;
    }

    println!(
        "client version: {}.{}",
        connection.version.major, connection.version.build
    );
    println!("asset host:     {}", connection.info.asset_host);
    match engine
        .fingerprint(&DownloadMethod::LatestPatch, &connection.info)
        .await
    {
        Ok(fingerprint) => {
            println!("patch version:  {}", fingerprint.version);
            println!("masterhash:     {}", fingerprint.masterhash()?);
            println!("files:          {}", fingerprint.files.len());
            println!("extensions:     {}", fingerprint.extensions().join(" "));
        }
        Err(err) => warn!("info: {err}"),
    }
    Ok(())
}

async fn probe(
    client: ProtocolClient,
    store: &SettingsStore,
    settings: &mut Settings,
    max_steps: usize,
) -> Result<(), String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter::hidden().spawn(rx);
    let outcome = VersionProber::new(&client, &tx)
        .with_max_steps(max_steps)
        .probe(settings.version())
        .await;
    drop(tx);
    let _ = reporter.await;

    let outcome = outcome.map_err(|e| format!("version probe failed: {e}"))?;
    settings.set_version(outcome.version);
    store.save(settings).await?;
    println!(
        "client version: {}.{}",
        outcome.version.major, outcome.version.build
    );
    Ok(())
}

async fn configure(
    store: &SettingsStore,
    mut settings: Settings,
    args: ConfigArgs,
) -> Result<(), String> {
    let changed = args.output.is_some()
        || args.workers.is_some()
        || args.major.is_some()
        || args.build.is_some();
    if let Some(output) = args.output {
        settings.output_path = output;
    }
    if let Some(workers) = args.workers {
        settings.workers_count = workers;
    }
    if let Some(major) = args.major {
        settings.major = major;
    }
    if let Some(build) = args.build {
        settings.build = build;
    }
    let settings = settings.normalized();
    if changed {
        store.save(&settings).await?;
    }

    let text = serde_json::to_string_pretty(&settings)
        .map_err(|e| format!("unable to serialize settings: {e}"))?;
    println!("{}", store.path().display());
    println!("{text}");
    Ok(())
}

/// Accept `csv` as well as `.csv`.
fn normalize_ext(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_owned()
    } else {
        format!(".{ext}")
    }
}
