#![forbid(unsafe_code)]

use crate::lifecycle::LifecycleConfig;
use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mip_agent")]
#[command(version, about = "MIP-003 job agent", long_about = None)]
pub struct Config {
    /// Address to listen on. Defaults to 0.0.0.0 on $PORT, or 10000.
    #[arg(long, env = "MIP003_LISTEN")]
    pub listen: Option<SocketAddr>,

    #[arg(long, env = "PORT", hide = true)]
    pub port: Option<u16>,

    /// Job store backend
    #[arg(long, env = "MIP003_STORE", value_enum, default_value = "memory")]
    pub store: StoreKind,

    /// Directory for the SQLite database and the generated signing key
    #[arg(long, env = "MIP003_STORAGE_DIR", default_value = ".mip_agent")]
    pub storage_dir: PathBuf,

    /// Retained jobs; the oldest finished job is evicted when full
    #[arg(long, env = "MIP003_MAX_JOBS", default_value_t = mip_storage::DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Registry identifier echoed in start_job responses
    #[arg(long, env = "AGENT_IDENTIFIER")]
    pub agent_identifier: Option<String>,

    /// Seller verification key echoed in start_job responses
    #[arg(long, env = "SELLER_VKEY")]
    pub seller_vkey: Option<String>,

    /// 32-byte Ed25519 secret; generated when missing. Defaults to <storage-dir>/signing.key
    #[arg(long, env = "MIP003_SIGNING_KEY")]
    pub signing_key: Option<PathBuf>,

    /// Program run once per job; without it the agent reports itself unavailable
    #[arg(long, env = "MIP003_COMPUTE_COMMAND")]
    pub compute_command: Option<PathBuf>,

    /// Argument passed to the compute command (repeatable)
    #[arg(
        long = "compute-arg",
        env = "MIP003_COMPUTE_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub compute_args: Vec<String>,

    #[arg(long, env = "MIP003_COMPUTE_TIMEOUT_SECS", default_value_t = 600)]
    pub compute_timeout_secs: u64,

    /// Worker threads running computations
    #[arg(long, env = "MIP003_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Start computing as soon as payment is confirmed
    #[arg(long, env = "MIP003_NO_ADDITIONAL_INPUT")]
    pub no_additional_input: bool,

    /// Bearer token enabling POST /payment_confirmed
    #[arg(long, env = "MIP003_PAYMENT_HOOK_TOKEN", hide_env_values = true)]
    pub payment_hook_token: Option<String>,

    /// Seconds between sweeps for jobs past their deadlines; 0 disables the sweep
    #[arg(long, env = "MIP003_REAP_INTERVAL_SECS", default_value_t = 60)]
    pub reap_interval_secs: u64,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive)
    #[arg(long, env = "MIP003_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen.unwrap_or_else(|| {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port.unwrap_or(DEFAULT_PORT)))
        })
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.signing_key
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("signing.key"))
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_secs(self.compute_timeout_secs.max(1))
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        (self.reap_interval_secs > 0).then(|| Duration::from_secs(self.reap_interval_secs))
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            agent_identifier: non_empty(self.agent_identifier.as_deref()),
            seller_vkey: non_empty(self.seller_vkey.as_deref()),
            require_additional_input: !self.no_additional_input,
            ..LifecycleConfig::default()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
