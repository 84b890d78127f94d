//! UDP transport loops
//!
//! The sender and the receiver share nothing: the sender owns the prober,
//! the local log and one connected socket per peer; the receiver owns the
//! listening socket and one log per peer. Delivery is fire-and-forget.

use anyhow::{Context, Result};
use chrono::Utc;
use loadwatch_core::logfile::fixed_path;
use loadwatch_core::{timestamp, CounterSource, LoadMessage, LogFile, OpenMode, Prober};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::report;

/// Receive buffer; datagrams are expected to stay under 1500 bytes
pub const RECV_BUFFER_LEN: usize = 2000;

/// Open the log for `basename` according to the rotation setting
pub fn open_log(config: &AgentConfig, basename: &str) -> loadwatch_core::Result<LogFile> {
    if config.rotate {
        LogFile::open_rotating(&config.log_dir, basename, Utc::now(), OpenMode::Append)
    } else {
        LogFile::open(fixed_path(&config.log_dir, basename), OpenMode::Append)
    }
}

/// Basename of this host's own log
pub fn local_log_name() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    if hostname.is_empty() {
        "localhost".to_string()
    } else {
        hostname
    }
}

struct PeerLink {
    addr: SocketAddr,
    socket: UdpSocket,
}

impl PeerLink {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)
            .await
            .with_context(|| format!("Failed to bind socket for peer {}", addr))?;
        socket
            .connect(addr)
            .await
            .with_context(|| format!("Failed to connect to udp: {}", addr))?;
        Ok(Self { addr, socket })
    }
}

/// Periodic sample → encode → report → persist → send loop
pub struct Sender<S> {
    prober: Prober<S>,
    log: Option<LogFile>,
    peers: Vec<PeerLink>,
    config: AgentConfig,
}

impl<S: CounterSource> Sender<S> {
    pub async fn new(config: &AgentConfig, peers: &[SocketAddr], source: S, log: Option<LogFile>) -> Result<Self> {
        let mut links = Vec::with_capacity(peers.len());
        for &addr in peers {
            links.push(PeerLink::connect(addr).await?);
        }

        Ok(Self {
            prober: Prober::new(source, config.interval_secs),
            log,
            peers: links,
            config: config.clone(),
        })
    }

    /// Runs until a fatal encoding defect; probe and send failures only skip
    /// the affected cycle or peer.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Sender started: every {}s to {} peer(s)",
            self.prober.interval(),
            self.peers.len()
        );
        if let Err(e) = self.prober.init() {
            error!("Initial probe failed, retrying next interval: {}", e);
        }

        let period = self.period();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.cycle().await?;
        }
    }

    /// Time between cycles, the interval stamped into every message
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.prober.interval()))
    }

    /// One sampling cycle. Returns the encoded message when one was produced.
    pub async fn cycle(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.prober.is_primed() {
            if let Err(e) = self.prober.init() {
                error!("Probe init failed, skipping cycle: {}", e);
            }
            return Ok(None);
        }

        let message = match self.prober.sample(timestamp::now()) {
            Ok(message) => message,
            Err(e) => {
                error!("Probe failed, skipping cycle: {}", e);
                return Ok(None);
            }
        };

        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) if e.is_fatal() => {
                return Err(anyhow::Error::new(e).context("Encoding local load message"));
            }
            Err(e) => {
                error!("Encoding failed, skipping cycle: {}", e);
                return Ok(None);
            }
        };

        report::print_message("Local LoadMessage", &message, &bytes, self.config.verbose);

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.write_message(&bytes) {
                warn!("Failed to write local log {}: {}", log.path().display(), e);
            }
        }

        for peer in &self.peers {
            match peer.socket.send(&bytes).await {
                Ok(n) => debug!("Sent {} bytes to {}", n, peer.addr),
                Err(e) => warn!("Send to {} failed: {}", peer.addr, e),
            }
        }

        Ok(Some(bytes))
    }
}

/// Accepts load messages from configured peers only
pub struct Receiver {
    socket: UdpSocket,
    logs: HashMap<IpAddr, Option<LogFile>>,
    verbose: u8,
}

impl Receiver {
    pub async fn bind(config: &AgentConfig, peers: &[SocketAddr]) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
            .await
            .with_context(|| format!("Failed to listen on UDP port {}", config.port))?;

        let mut logs = HashMap::new();
        for addr in peers {
            let ip = addr.ip();
            let log = if config.write_logs {
                let log = open_log(config, &ip.to_string())
                    .with_context(|| format!("Failed to open log for peer {}", ip))?;
                info!("Logging peer {} to {}", ip, log.path().display());
                Some(log)
            } else {
                None
            };
            logs.insert(ip, log);
        }

        Ok(Self {
            socket,
            logs,
            verbose: config.verbose,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Receiver listening on {}", self.local_addr()?);
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            self.receive_one(&mut buf).await;
        }
    }

    /// Wait for one datagram and handle it; returns the decoded message
    pub async fn receive_one(&mut self, buf: &mut [u8]) -> Option<LoadMessage> {
        let (n, from) = match self.socket.recv_from(buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("UDP receive failed: {}", e);
                return None;
            }
        };
        if n == buf.len() {
            warn!("Received very long packet from {}, possibly truncated", from);
        }
        self.handle(&buf[..n], from)
    }

    fn handle(&mut self, datagram: &[u8], from: SocketAddr) -> Option<LoadMessage> {
        let Some(log) = self.logs.get_mut(&from.ip()) else {
            debug!("Ignoring {} bytes from unknown sender {}", datagram.len(), from);
            return None;
        };

        let message = match LoadMessage::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                warn!("Error decoding packet from {}: {}", from, e);
                return None;
            }
        };

        report::print_message(&format!("LoadMessage from {}", from), &message, datagram, self.verbose);

        if let Some(log) = log.as_mut() {
            if let Err(e) = log.write_message(datagram) {
                warn!("Failed to write log {}: {}", log.path().display(), e);
            }
        }
        Some(message)
    }
}
