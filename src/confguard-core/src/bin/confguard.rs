//! confguard - operator CLI for the configuration engine.
//!
//! ## Usage
//!
//! ```bash
//! # Show the locally available configuration (no network; seeds the cache on a first run)
//! confguard --bundle /usr/share/app/config --data-dir ~/.local/share/app status
//!
//! # Bootstrap and run the periodic check; --force ignores the interval
//! confguard --bundle /usr/share/app/config --data-dir ~/.local/share/app update --force
//!
//! # Verify a triple on disk (bundle or cache directory)
//! confguard verify ~/.local/share/app/config
//!
//! # Build-time: download the current central triple as a bundle
//! confguard fetch-default --url https://conf.example/v1 --out assets/config
//! ```
//!
//! Exit codes: 0 success, 1 error, 2 update check unavailable (document
//! still published), 3 bundled default broken.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use confguard_core::bundled::DEFAULT_DOCUMENT_FILE;
use confguard_core::config::DEFAULT_UPDATE_INTERVAL_DAYS;
use confguard_core::document::parse_meta;
use confguard_core::{
    fetch_triple, write_bundle, ArtifactTriple, BundledProperties, BundledSource,
    CentralRepository, ConfigError, ConfigurationDocument, ConfigurationLoader, DocumentMeta,
    DocumentSummary, HttpsCentralClient, LoaderConfig, LocalCacheStore, ProxySettings,
    SignatureVerifier, UpdateOutcome,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_ERROR: u8 = 1;
const EXIT_UPDATE_UNAVAILABLE: u8 = 2;
const EXIT_FATAL: u8 = 3;

/// Trusted configuration distribution and caching engine.
#[derive(Parser)]
#[command(name = "confguard")]
#[command(version = VERSION)]
#[command(about = "Inspect, update and package signed configuration")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Bundled default directory
    #[arg(long, global = true, default_value = "bundle")]
    bundle: PathBuf,

    /// Application data directory (cache and metadata)
    #[arg(long, global = true, default_value = "confguard-data")]
    data_dir: PathBuf,

    /// Bound on the whole central check, in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Override the bundled update interval, in days
    #[arg(long, global = true)]
    interval: Option<u32>,

    /// HTTP proxy as host:port; "none" disables environment proxies
    #[arg(long, global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap from local sources and print the result, without network access
    ///
    /// This is the same bootstrap `update` performs: on a first run it seeds
    /// the cache from the bundled default and writes the initial metadata.
    Status,

    /// Bootstrap and run the central check if due
    Update {
        /// Check now regardless of the update interval
        #[arg(long)]
        force: bool,
    },

    /// Verify an artifact triple in a bundle or cache directory
    Verify {
        /// Directory holding default-config.* or active-config.* files
        dir: PathBuf,
    },

    /// Download and verify the central triple and write it as a bundle
    FetchDefault {
        /// Central configuration service base URL
        #[arg(long)]
        url: String,

        /// Output bundle directory
        #[arg(short, long)]
        out: PathBuf,

        /// Update interval recorded in the bundle properties, in days
        #[arg(long, default_value_t = DEFAULT_UPDATE_INTERVAL_DAYS)]
        update_interval: u32,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    document: DocumentSummary<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update: Option<&'a UpdateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            let fatal = e
                .downcast_ref::<ConfigError>()
                .is_some_and(ConfigError::is_fatal);
            eprintln!("Error: {:#}", e);
            ExitCode::from(if fatal { EXIT_FATAL } else { EXIT_ERROR })
        },
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Status => {
            let loader = build_loader(cli)?;
            let document = loader.load_local()?;
            print_document(cli.format, &document, None, None)?;
            Ok(ExitCode::SUCCESS)
        },

        Commands::Update { force } => {
            let loader = build_loader(cli)?;
            let result = if *force {
                loader.load_local()?;
                loader.check_for_update().await
            } else {
                loader.init_configuration().await.map(|report| report.update)
            };

            match result {
                Ok(outcome) => {
                    let document = loader.current()?;
                    print_document(cli.format, &document, Some(&outcome), None)?;
                    Ok(ExitCode::SUCCESS)
                },
                Err(e) if e.is_update_unavailable() => {
                    warn!(error = %e, "Update check unavailable, keeping current configuration");
                    let document = loader.current()?;
                    print_document(cli.format, &document, None, Some(e.to_string()))?;
                    Ok(ExitCode::from(EXIT_UPDATE_UNAVAILABLE))
                },
                Err(e) => Err(e.into()),
            }
        },

        Commands::Verify { dir } => {
            let triple = read_triple_dir(dir)?;
            let source = triple.source;
            let verified = SignatureVerifier::new().verify(triple)?;
            let meta = parse_meta(verified.document())?;
            info!(dir = ?dir, serial = meta.serial, "Verified");
            print_meta(cli.format, &meta, &format!("signature valid ({})", source))?;
            Ok(ExitCode::SUCCESS)
        },

        Commands::FetchDefault {
            url,
            out,
            update_interval,
        } => {
            let client = HttpsCentralClient::new(url, Duration::from_secs(cli.timeout))?;
            if let Some(proxy) = parse_proxy(cli.proxy.as_deref())? {
                client.configure_proxy(&proxy)?;
            }

            let triple = fetch_triple(&client)
                .await
                .with_context(|| format!("fetching from {}", url))?;
            let verified = SignatureVerifier::new().verify(triple)?;
            let meta = parse_meta(verified.document())?;

            let properties = BundledProperties {
                central_service_url: url.clone(),
                update_interval_days: *update_interval,
                version_serial: Some(meta.serial),
                download_date: Some(Utc::now()),
            };
            write_bundle(out, &verified, &properties)
                .with_context(|| format!("writing bundle to {}", out.display()))?;
            print_meta(cli.format, &meta, &format!("bundle written to {}", out.display()))?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

fn build_loader(cli: &Cli) -> anyhow::Result<ConfigurationLoader> {
    let bundled = BundledSource::directory(&cli.bundle);
    let properties = bundled
        .properties()
        .with_context(|| format!("reading bundle properties from {}", cli.bundle.display()))?;

    let mut config = LoaderConfig::in_dir(&cli.data_dir);
    config.fetch_timeout = Duration::from_secs(cli.timeout);
    config.update_interval_days = cli.interval;

    let client = HttpsCentralClient::new(&properties.central_service_url, config.fetch_timeout)?;
    if let Some(proxy) = parse_proxy(cli.proxy.as_deref())? {
        client.configure_proxy(&proxy)?;
    }
    let central: Arc<dyn CentralRepository> = Arc::new(client);

    Ok(ConfigurationLoader::new(config, bundled, central))
}

fn parse_proxy(arg: Option<&str>) -> anyhow::Result<Option<ProxySettings>> {
    let Some(arg) = arg else {
        return Ok(None);
    };
    if arg.eq_ignore_ascii_case("none") {
        return Ok(Some(ProxySettings::NoProxy));
    }
    let (host, port) = arg
        .rsplit_once(':')
        .with_context(|| format!("proxy {:?} is not host:port", arg))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("proxy port {:?}", port))?;
    Ok(Some(ProxySettings::Manual {
        host: host.to_string(),
        port,
        username: std::env::var("CONFGUARD_PROXY_USER").ok(),
        password: std::env::var("CONFGUARD_PROXY_PASSWORD").ok(),
    }))
}

fn read_triple_dir(dir: &Path) -> anyhow::Result<ArtifactTriple> {
    if dir.join(DEFAULT_DOCUMENT_FILE).exists() {
        BundledSource::directory(dir)
            .read()
            .with_context(|| format!("reading bundle {}", dir.display()))
    } else {
        LocalCacheStore::new(dir)
            .read()
            .with_context(|| format!("reading cache {}", dir.display()))
    }
}

fn print_document(
    format: OutputFormat,
    document: &ConfigurationDocument,
    update: Option<&UpdateOutcome>,
    warning: Option<String>,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let report = Report {
                document: DocumentSummary::from(document),
                update,
                warning,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        OutputFormat::Text => {
            let meta = document.meta();
            println!("serial:          {}", meta.serial);
            println!("issued at:       {}", meta.issued_at);
            println!("version:         {}", meta.version);
            println!("source:          {}", document.source());
            println!("last checked at: {}", document.last_checked_at());
            println!("last updated at: {}", document.last_updated_at());
            if let Some(update) = update {
                println!("update:          {}", update);
            }
            if let Some(warning) = warning {
                println!("warning:         {}", warning);
            }
        },
    }
    Ok(())
}

fn print_meta(format: OutputFormat, meta: &DocumentMeta, status: &str) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct MetaReport<'a> {
                #[serde(flatten)]
                meta: &'a DocumentMeta,
                status: &'a str,
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&MetaReport { meta, status })?
            );
        },
        OutputFormat::Text => {
            println!("serial:    {}", meta.serial);
            println!("issued at: {}", meta.issued_at);
            println!("version:   {}", meta.version);
            println!("status:    {}", status);
        },
    }
    Ok(())
}
