use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,

    /// Directory holding one JSON file per pool. Pools are kept in memory
    /// only when unset.
    pub state_dir: Option<PathBuf>,

    /// How often every pool's clock is advanced in the background.
    pub balance_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("QS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid QS_LISTEN_ADDR")?;

        let log_level = std::env::var("QS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let state_dir = std::env::var("QS_STATE_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let balance_interval_secs: u64 = std::env::var("QS_BALANCE_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("invalid QS_BALANCE_INTERVAL_SECS")?;
        if balance_interval_secs == 0 {
            anyhow::bail!("QS_BALANCE_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            listen_addr,
            log_level,
            state_dir,
            balance_interval: Duration::from_secs(balance_interval_secs),
        })
    }
}
