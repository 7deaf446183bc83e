//! Reject cache for network servers.
//!
//! Addresses of recently rejected clients are kept in a PATRICIA trie per
//! address family ([`Trie`]), each stamped with the time of the last offence.
//! [`RejectCache`] answers "should this new connection be dropped right
//! away?", expires old entries on a periodic sweep and closes matched
//! connections on a later tick through the host's [`Disconnect`] port.
//!
//! The trie is usable on its own: exact and longest-prefix lookups over
//! IPv4/IPv6 prefixes with arbitrary payloads, nodes held in an index-linked
//! [`NodePool`] with an optional hard capacity.
//!
//! A C ABI (`addrcache_*`) over opaque handles is exported from
//! [`public_api`]; `include/addrcache.h` is generated at build time.

pub mod config;
pub mod constants;
pub mod errors;
pub mod handle_registry;
pub mod helpers;
pub mod pool;
pub mod ports;
pub mod prefix;
pub mod public_api;
pub mod reject;
pub mod telemetry;
pub mod trie;
pub mod types;

pub use config::RejectConfig;
pub use errors::{Error, ErrorCode};
pub use pool::NodePool;
pub use ports::{Clock, Disconnect, ManualClock, Scheduler, SystemClock, Task};
pub use prefix::{Family, Prefix};
pub use public_api::*;
pub use reject::{register, RejectCache, RejectEntry};
pub use trie::{Iter, Trie};
pub use types::{Node, NodeId};
