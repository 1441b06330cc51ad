//! One replica process (spec.md §6 CLI surface). The socket transport
//! itself is out of scope (spec.md §1 Non-goals); this binary wires a
//! replica to `txnkv::net::transport::InProcessTransport` and drives it
//! off a tick loop, which is enough to exercise every state machine and
//! honor `--stats_file`/exit-code semantics the way a networked
//! deployment would.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use txnkv::info;
use txnkv::net::transport::InProcessTransport;
use txnkv::replica::{ProtocolKind, Replica, ReplicaConfig};

use txnkv_server::config::ServerConfig;
use txnkv_server::trace;

#[derive(Debug, Parser)]
#[command(version, author, about = "txnkv replica process", rename_all = "snake_case")]
struct Args {
    #[clap(long)]
    config_path: Option<String>,

    #[clap(long)]
    replica_idx: Option<u32>,

    #[clap(long)]
    group_idx: Option<u32>,

    #[clap(long)]
    num_groups: Option<u32>,

    #[clap(long)]
    num_shards: Option<u32>,

    /// One of {occ-linearizable, 2pc-ss, dep-graph, branch, weak}.
    #[clap(long)]
    protocol: Option<String>,

    /// `2pc-ss`'s concurrency mode: {lock, occ}.
    #[clap(long)]
    concurrency_mode: Option<String>,

    /// One of {tcp, udp}.
    #[clap(long)]
    transport: Option<String>,

    /// One of {default, warehouse}.
    #[clap(long)]
    partitioner: Option<String>,

    #[clap(long)]
    keys_path: Option<PathBuf>,

    #[clap(long)]
    data_file_path: Option<PathBuf>,

    #[clap(long)]
    num_keys: Option<u64>,

    /// Milliseconds.
    #[clap(long)]
    clock_skew: Option<u64>,

    /// Milliseconds.
    #[clap(long)]
    clock_error: Option<u64>,

    #[clap(long)]
    stats_file: Option<PathBuf>,

    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// CLI flags override whatever the config file set, field by field.
    fn apply_to(self, cfg: &mut ServerConfig) {
        if let Some(v) = self.replica_idx {
            cfg.replica_idx = v;
        }
        if let Some(v) = self.group_idx {
            cfg.group_idx = v;
        }
        if let Some(v) = self.num_groups {
            cfg.num_groups = v;
        }
        if let Some(v) = self.num_shards {
            cfg.num_shards = v;
        }
        if let Some(v) = self.protocol {
            cfg.protocol = v;
        }
        if self.concurrency_mode.is_some() {
            cfg.concurrency_mode = self.concurrency_mode;
        }
        if let Some(v) = self.transport {
            cfg.transport = v;
        }
        if let Some(v) = self.partitioner {
            cfg.partitioner = v;
        }
        if self.keys_path.is_some() {
            cfg.keys_path = self.keys_path;
        }
        if self.data_file_path.is_some() {
            cfg.data_file_path = self.data_file_path;
        }
        if self.num_keys.is_some() {
            cfg.num_keys = self.num_keys;
        }
        if let Some(v) = self.clock_skew {
            cfg.clock_skew_ms = v;
        }
        if let Some(v) = self.clock_error {
            cfg.clock_error_ms = v;
        }
        if self.stats_file.is_some() {
            cfg.stats_file = self.stats_file;
        }
        cfg.log_level = self.log_level;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match ServerConfig::load(args.config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    args.apply_to(&mut cfg);
    if let Err(err) = cfg.validate() {
        eprintln!("configuration error: {err}");
        std::process::exit(1);
    }

    let log_dir = format!("{}/.txnkv-server", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &cfg.log_level)?;
    info!("txnkv-server starting with config: {:?}", cfg);

    let protocol = ProtocolKind::parse(&cfg.protocol, cfg.concurrency_mode.as_deref())
        .with_context(|| "invalid --protocol/--concurrency_mode")?;

    let address = ((cfg.group_idx as u64) << 32) | cfg.replica_idx as u64;
    let transport = Arc::new(InProcessTransport::new());
    let _self_rx = transport.register(address);

    let replica_config = ReplicaConfig {
        address,
        protocol,
        clock_skew: Duration::from_millis(cfg.clock_skew_ms),
        clock_error: Duration::from_millis(cfg.clock_error_ms),
    };
    let mut replica = Replica::new(replica_config, transport);
    replica.load()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone()).context("failed to install SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone()).context("failed to install SIGINT handler")?;

    info!("replica {} ready (protocol {})", replica.address(), cfg.protocol);
    while !shutdown.load(Ordering::SeqCst) {
        replica.tick()?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("{}", info::get_info(&replica).join(", "));
    dump_stats(&replica, cfg.stats_file.as_deref())?;
    info!("replica {} shut down cleanly", replica.address());
    Ok(())
}

fn dump_stats(replica: &Replica, stats_file: Option<&std::path::Path>) -> Result<()> {
    let Some(path) = stats_file else { return Ok(()) };
    let json = serde_json::to_string_pretty(&replica.stats())?;
    std::fs::write(path, json).with_context(|| format!("writing stats file {}", path.display()))?;
    Ok(())
}
