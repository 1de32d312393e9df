//! Resource pools for egress proxies and client identities
//!
//! Both pools share one implementation but are always separate instances:
//! egress resources are excluded on rate limits and bans, identities on
//! bans and challenge pages, and their cooldowns differ.
//!
//! # Components
//!
//! - `ResourcePool`: lease/release/exclude with automatic expiry of exclusions
//! - `LeasedResource`: exclusive handle returned by a successful lease
//! - `ResourceStatus`: which of available/leased/excluded a resource is in

mod resource_pool;

pub use resource_pool::{LeasedResource, PoolCounts, ResourcePool, ResourceStatus};

use std::fmt;

/// Egress id meaning "connect without a proxy"
pub const DIRECT_EGRESS: &str = "direct";

/// The kind of resource a pool manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Client fingerprint, sent as the User-Agent
    Identity,

    /// Egress route (proxy URL or `direct`)
    Egress,
}

impl ResourceKind {
    /// Converts the kind to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Egress => "egress",
        }
    }

    /// Parses a kind from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "identity" => Some(Self::Identity),
            "egress" => Some(Self::Egress),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
