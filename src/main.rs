use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clipshare_server::ServerConfig;
use clipshare_telemetry::TelemetryConfig;

/// Share text and files between devices through four-digit session codes.
#[derive(Debug, Parser)]
#[command(name = "clipshare", version)]
struct Cli {
    /// TOML config file. `CLIPSHARE_*` env vars and flags override it.
    #[arg(short, long, env = "CLIPSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 picks a free one).
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds of inactivity before a session is deleted.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Largest accepted upload in bytes.
    #[arg(long)]
    max_upload_bytes: Option<u64>,

    /// Log level (error, warn, info, debug, trace). `RUST_LOG` wins.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_upload_bytes {
            config.max_upload_bytes = bytes;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.json_logs |= self.json_logs;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let config = cli.apply(loaded);
    config.validate().context("validating configuration")?;

    let log_level = config
        .log_level
        .parse()
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;
    clipshare_telemetry::init_telemetry(&TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        json: config.json_logs,
    })
    .context("initializing logging")?;

    let handle = clipshare_server::start(config.clone())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    tracing::info!(addr = %handle.addr, "clipshare ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    handle.shutdown(Some(Duration::from_secs(10))).await;
    Ok(())
}
