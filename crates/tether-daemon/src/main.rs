//! tether-daemon: keeps one worker process alive and bridges prompts from
//! stdin onto its streaming-JSON stdio protocol.
//!
//! Each line read from the daemon's own stdin is sent as one request; the
//! resolved reply text is printed to stdout. Ctrl-C shuts the worker down
//! gracefully.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use tether_core::config::{load_config, load_config_file, Config};
use tether_core::tracing_init::init_tracing;
use tether_daemon::bridge::{Bridge, BridgeError, BridgeOptions};

#[derive(Debug, Parser)]
#[command(name = "tether-daemon", version, about = "Supervised worker bridge")]
struct Args {
    /// Path to a settings file, instead of the global one.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker binary to spawn.
    #[arg(long, env = "TETHER_WORKER_BIN")]
    worker_bin: Option<PathBuf>,

    /// Working directory for the worker.
    #[arg(long, env = "TETHER_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Model selector forwarded to the worker.
    #[arg(long, env = "TETHER_MODEL")]
    model: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "TETHER_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Grace period in seconds before the worker is killed on shutdown.
    #[arg(long, env = "TETHER_TERMINATE_TIMEOUT")]
    terminate_timeout: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "TETHER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "TETHER_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Overlay CLI/env values on the file-resolved configuration.
    fn apply(self, config: &mut Config) {
        if let Some(worker_bin) = self.worker_bin {
            config.worker.worker_bin = worker_bin;
        }
        if let Some(workdir) = self.workdir {
            config.worker.working_directory = Some(workdir);
        }
        if let Some(model) = self.model {
            config.worker.model = Some(model);
        }
        if let Some(secs) = self.request_timeout {
            config.bridge.request_timeout_secs = secs;
        }
        if let Some(secs) = self.terminate_timeout {
            config.bridge.terminate_timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config_file(path).context("failed to load settings file")?,
        None => load_config().context("failed to load configuration")?,
    };
    args.apply(&mut config);

    let level = config.log.level.clone();
    let filter = format!("tether_daemon={level},tether_core={level}");
    init_tracing(&filter, config.log.json);

    info!(
        worker_bin = %config.worker.worker_bin.display(),
        request_timeout_secs = config.bridge.request_timeout_secs,
        "starting tether daemon"
    );

    let bridge = Bridge::start(BridgeOptions::from_config(&config));
    if !bridge.wait_attached(Duration::from_secs(10)).await {
        warn!("worker not attached yet, requests will fail until it comes up");
    }

    run_repl(&bridge).await;

    info!("shutting down");
    bridge.shutdown().await;
    Ok(())
}

/// Read prompts line by line from stdin until EOF or Ctrl-C.
async fn run_repl(bridge: &Bridge) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                return;
            }
        };
        let prompt = match line {
            Ok(Some(line)) if !line.trim().is_empty() => line,
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                return;
            }
        };

        match bridge.send(&prompt).await {
            Ok(reply) => {
                if reply.is_error {
                    warn!("worker reported an error reply");
                }
                #[allow(clippy::print_stdout)]
                {
                    println!("{}", reply.text);
                }
            }
            Err(e @ BridgeError::NotReady) => {
                error!(error = %e, "worker unavailable, try again once it restarts");
            }
            Err(e) => {
                error!(error = %e, "request failed");
            }
        }
    }
}
