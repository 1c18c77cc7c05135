//! Mock Elasticsearch - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_es::config::{ClusterSettings, FaultRates, TlsSettings};
use mock_es::{run_server, AppState, MetricsRegistry, MockEsConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-es",
    about = "Mock Elasticsearch bulk endpoint with configurable fault injection",
    version
)]
struct Args {
    /// Path to a YAML configuration file (replaces the flags below)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:9200")]
    addr: SocketAddr,

    /// Percent chance 409 Conflict is returned for a create action
    #[arg(long, default_value_t = 0)]
    dup: u32,

    /// Percent chance 429 Too Many Requests is returned for a create action
    #[arg(long, default_value_t = 0)]
    toomany: u32,

    /// Percent chance 406 Not Acceptable is returned for a create action
    #[arg(long, default_value_t = 0)]
    nonindex: u32,

    /// Percent chance 413 Entity Too Large is returned for a whole _bulk request
    #[arg(long, default_value_t = 0)]
    toolarge: u32,

    /// Cluster UUID of the Elasticsearch being mocked
    #[arg(long, default_value = "")]
    clusteruuid: String,

    /// PEM certificate file; serves HTTPS together with --keyfile
    #[arg(long, requires = "keyfile")]
    certfile: Option<PathBuf>,

    /// PEM private key file; serves HTTPS together with --certfile
    #[arg(long, requires = "certfile")]
    keyfile: Option<PathBuf>,

    /// Milliseconds to wait before handling each request (0 = no delay)
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Seconds between metrics snapshots on stdout (0 = no metrics)
    #[arg(long, default_value_t = 0)]
    metrics_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn to_config(&self) -> MockEsConfig {
        MockEsConfig {
            listen: self.addr,
            faults: FaultRates {
                duplicate_percent: self.dup,
                too_many_percent: self.toomany,
                non_index_percent: self.nonindex,
                too_large_percent: self.toolarge,
            },
            cluster: ClusterSettings {
                uuid: self.clusteruuid.clone(),
                ..ClusterSettings::default()
            },
            tls: TlsSettings {
                cert_file: self.certfile.clone(),
                key_file: self.keyfile.clone(),
            },
            delay_ms: self.delay_ms,
            metrics_interval_secs: self.metrics_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = match &args.config {
        Some(path) if path.exists() => {
            info!(path = ?path, "Loading configuration");
            MockEsConfig::from_file(path)?
        }
        Some(path) => anyhow::bail!("Configuration file not found: {:?}", path),
        None => {
            let config = args.to_config();
            config.validate()?;
            config
        }
    };

    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    if args.validate {
        println!(
            "Configuration is valid (duplicate: {}%, too_many: {}%, non_index: {}%, too_large: {}%)",
            config.faults.duplicate_percent,
            config.faults.too_many_percent,
            config.faults.non_index_percent,
            config.faults.too_large_percent,
        );
        return Ok(());
    }

    let registry = Arc::new(MetricsRegistry::new());
    if let Some(interval) = config.metrics_interval() {
        info!(interval_secs = interval.as_secs(), "Printing metrics to stdout");
        registry.clone().spawn_reporter(interval);
    }

    let state = AppState::from_config(&config, registry)?;
    info!(
        duplicate = config.faults.duplicate_percent,
        too_many = config.faults.too_many_percent,
        non_index = config.faults.non_index_percent,
        too_large = config.faults.too_large_percent,
        delay_ms = config.delay_ms,
        license_uid = %state.info.license_uid(),
        "Fault injection configured"
    );

    run_server(config.listen, &config.tls, state).await
}
