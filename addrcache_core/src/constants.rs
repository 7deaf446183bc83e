//! Constants and default configuration for the address cache

pub const V4_BITS: u8 = 32;
pub const V6_BITS: u8 = 128;

/// Seconds an address stays in the reject cache after its last offence.
pub const DEFAULT_REJECT_BAN_TIME: u64 = 300;
/// Offences needed before `check` starts turning a client away.
pub const DEFAULT_REJECT_AFTER_COUNT: u32 = 1;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

pub const SWEEP_TASK_NAME: &str = "reject_expires";
pub const FLUSH_TASK_NAME: &str = "reject_exit";

pub const REJECT_EXIT_REASON: &str = "*** Banned (cache)";

pub const ENV_REJECT_BAN_TIME: &str = "ADDRCACHE_REJECT_BAN_TIME";
pub const ENV_REJECT_AFTER_COUNT: &str = "ADDRCACHE_REJECT_AFTER_COUNT";
pub const ENV_SWEEP_INTERVAL: &str = "ADDRCACHE_SWEEP_INTERVAL";
pub const ENV_FLUSH_INTERVAL: &str = "ADDRCACHE_FLUSH_INTERVAL";
pub const ENV_CAPACITY: &str = "ADDRCACHE_CAPACITY";
