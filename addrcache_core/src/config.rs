//! Reject cache configuration, with defaults and environment overrides.

use crate::constants::*;
use crate::errors::Error;
use log::warn;
use std::env;
use std::time::Duration;

/// Tunables for [`RejectCache`](crate::reject::RejectCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectConfig {
    /// Seconds an entry survives after its last offence. 0 disables the cache.
    pub reject_ban_time: u64,

    /// Offences before `check` turns a client away. 0 disables the cache.
    pub reject_after_count: u32,

    /// Period of the expiry sweep.
    pub sweep_interval: Duration,

    /// Period of the deferred-disconnect flush.
    pub flush_interval: Duration,

    /// Node cap per address family, `None` for unbounded.
    pub capacity: Option<usize>,
}

impl Default for RejectConfig {
    fn default() -> Self {
        Self {
            reject_ban_time: DEFAULT_REJECT_BAN_TIME,
            reject_after_count: DEFAULT_REJECT_AFTER_COUNT,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            capacity: None,
        }
    }
}

impl RejectConfig {
    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ADDRCACHE_REJECT_BAN_TIME`: seconds (default: 300)
    /// - `ADDRCACHE_REJECT_AFTER_COUNT`: offences (default: 1)
    /// - `ADDRCACHE_SWEEP_INTERVAL`: seconds (default: 60)
    /// - `ADDRCACHE_FLUSH_INTERVAL`: seconds (default: 5)
    /// - `ADDRCACHE_CAPACITY`: nodes per family (default: unbounded)
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            reject_ban_time: env_parse(ENV_REJECT_BAN_TIME).unwrap_or(d.reject_ban_time),
            reject_after_count: env_parse(ENV_REJECT_AFTER_COUNT)
                .unwrap_or(d.reject_after_count),
            sweep_interval: env_parse(ENV_SWEEP_INTERVAL)
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            flush_interval: env_parse(ENV_FLUSH_INTERVAL)
                .map(Duration::from_secs)
                .unwrap_or(d.flush_interval),
            capacity: env_parse(ENV_CAPACITY).or(d.capacity),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig("sweep_interval must be non-zero".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidConfig("flush_interval must be non-zero".into()));
        }
        if self.capacity == Some(0) {
            return Err(Error::ZeroCapacity);
        }
        Ok(())
    }

    /// The cache only records and matches when both knobs are non-zero.
    pub fn enabled(&self) -> bool {
        self.reject_ban_time > 0 && self.reject_after_count > 0
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[CONFIG] Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
