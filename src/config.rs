use std::{env, path::PathBuf};

use alloy_primitives::Address;
use alloy_transport_http::reqwest::Url;
use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// The L1 RPC URL.
    pub l1_rpc: Url,

    /// The address of the rollup contract.
    pub rollup_address: Address,

    /// The address of the tier provider. Without it the tracker never verifies blocks
    /// itself and only follows `BlockVerified` events.
    pub tier_provider_address: Option<Address>,

    /// Resync from contract storage when a fatal error stops the sync loop.
    pub auto_resync: bool,

    /// The port to expose metrics on.
    pub metrics_port: u16,

    pub sync: SyncConfig,
}

/// Settings of the sync loop itself.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Seconds between polls of the L1 head.
    pub fetch_interval: u64,

    /// Maximum L1 block range per `eth_getLogs` request.
    pub log_batch_size: u64,

    /// Overrides `maxBlocksToVerify` from the contract config.
    pub max_blocks_to_verify: Option<u64>,

    /// L1 blocks for which applied log ids are remembered to drop re-deliveries.
    pub dedup_window_blocks: u64,

    pub checkpoint_path: Option<PathBuf>,

    /// Accounts whose bond balances are read from the contract on resync.
    pub tracked_accounts: Vec<Address>,

    /// Follow new logs through a log filter once caught up, instead of polling `getLogs`.
    pub use_log_subscription: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_interval: 12,
            log_batch_size: 1000,
            max_blocks_to_verify: None,
            dedup_window_blocks: 64,
            checkpoint_path: None,
            tracked_accounts: Vec::new(),
            use_log_subscription: true,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            l1_rpc: env::var("L1_RPC").context("L1_RPC must be set")?.parse()?,
            rollup_address: env::var("ROLLUP_ADDRESS")
                .context("ROLLUP_ADDRESS must be set")?
                .parse()?,
            tier_provider_address: optional("TIER_PROVIDER_ADDRESS")?,
            auto_resync: optional("AUTO_RESYNC")?.unwrap_or(true),
            metrics_port: optional("METRICS_PORT")?.unwrap_or(9000),
            sync: SyncConfig::from_env()?,
        })
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let tracked_accounts = match env::var("TRACKED_ACCOUNTS") {
            Ok(accounts) => accounts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().with_context(|| format!("invalid tracked account {s}")))
                .collect::<Result<Vec<Address>>>()?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            fetch_interval: optional("FETCH_INTERVAL")?.unwrap_or(defaults.fetch_interval),
            log_batch_size: optional("LOG_BATCH_SIZE")?.unwrap_or(defaults.log_batch_size).max(1),
            max_blocks_to_verify: optional("MAX_BLOCKS_TO_VERIFY")?,
            dedup_window_blocks: optional("DEDUP_WINDOW_BLOCKS")?
                .unwrap_or(defaults.dedup_window_blocks),
            checkpoint_path: env::var("CHECKPOINT_PATH").ok().map(PathBuf::from),
            tracked_accounts,
            use_log_subscription: optional("USE_LOG_SUBSCRIPTION")?
                .unwrap_or(defaults.use_log_subscription),
        })
    }
}

/// Parses `key` if it is set.
fn optional<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => {
            Ok(Some(value.trim().parse().with_context(|| format!("invalid value for {key}"))?))
        }
        Err(_) => Ok(None),
    }
}
