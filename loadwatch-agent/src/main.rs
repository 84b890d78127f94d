//! Loadwatch Agent - host load sampler and collector
//!
//! One binary, three roles that can run together:
//! - Monitor: sample this host every interval and send the message to peers
//! - Listen: accept messages from configured peers and log them per peer
//! - Replay: print every message stored in a log file

mod config;
mod metrics;
mod report;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use config::AgentConfig;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};

use metrics::ProcfsSource;
use transport::{Receiver, Sender};

#[derive(Parser, Debug)]
#[command(name = "loadwatch-agent")]
#[command(about = "Samples host load and exchanges it with peers over UDP")]
#[command(version)]
struct Cli {
    /// Replay a log file and exit
    #[arg(short, long)]
    read: Option<PathBuf>,

    /// Accept load messages from peers
    #[arg(short, long)]
    listen: bool,

    /// UDP port to listen on, and default peer port
    #[arg(short, long)]
    port: Option<u16>,

    /// Comma-separated peers as host[:port]
    #[arg(short = 'P', long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Don't sample this host
    #[arg(short = 'M', long)]
    no_monitor: bool,

    /// Append every message to per-host log files
    #[arg(short, long)]
    write_logs: bool,

    /// Directory for log files
    #[arg(short = 'd', long)]
    log_dir: Option<PathBuf>,

    /// Sampling interval in seconds
    #[arg(short, long)]
    interval: Option<u16>,

    /// Verbosity level: -v summaries, -vv hex dumps and debug logging, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,

    /// Config file (default: OS config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Flags given on the command line win over the config file
    fn apply(&self, config: &mut AgentConfig) {
        if self.listen {
            config.listen = true;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.peers.is_empty() {
            config.peers = self
                .peers
                .iter()
                .map(|peer| peer.trim().to_string())
                .filter(|peer| !peer.is_empty())
                .collect();
        }
        if self.no_monitor {
            config.monitor = false;
        }
        if self.write_logs {
            config.write_logs = true;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if self.quiet {
            config.verbose = 0;
        } else if self.verbose > 0 {
            config.verbose = self.verbose;
        }
    }
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_max_level(log_level(config.verbose))
        .init();

    if let Some(path) = &cli.read {
        report::replay_log(path, config.verbose)?;
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    let peers = config.resolve_peers().await?;

    info!("Loadwatch agent starting...");

    let receiver = if config.listen {
        let receiver = Receiver::bind(&config, &peers).await?;
        Some(tokio::spawn(receiver.run()))
    } else {
        None
    };

    if config.monitor {
        let log = if config.write_logs {
            let name = transport::local_log_name();
            let log = transport::open_log(&config, &name)
                .with_context(|| format!("Failed to open local log for {}", name))?;
            info!("Logging local samples to {}", log.path().display());
            Some(log)
        } else {
            None
        };

        let sender = Sender::new(&config, &peers, ProcfsSource::new(), log).await?;
        if let Err(e) = sender.run().await {
            error!("Sender stopped: {:#}", e);
            return Err(e);
        }
    } else if let Some(receiver) = receiver {
        receiver.await.context("Receiver task panicked")??;
    } else {
        warn!("Neither monitoring nor listening, nothing to do");
    }

    Ok(())
}
