use crate::pool::ResourceKind;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Exclusive handle on a pooled resource
///
/// A lease is consumed by `ResourcePool::release`; excluding a leased
/// resource goes through its id instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedResource {
    /// Resource identifier (proxy URL or identity string)
    pub id: String,

    /// Which pool the resource came from
    pub kind: ResourceKind,

    /// When the lease was granted
    pub leased_at: Instant,
}

/// Where a resource currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Available,
    Leased,
    Excluded { expires_at: Instant },
}

/// Set sizes of a pool at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub available: usize,
    pub leased: usize,
    pub excluded: usize,
}

impl PoolCounts {
    /// Total number of resources across all sets
    pub fn total(&self) -> usize {
        self.available + self.leased + self.excluded
    }
}

#[derive(Debug, Default)]
struct PoolState {
    available: Vec<String>,
    leased: HashSet<String>,
    excluded: HashMap<String, Instant>,
}

impl PoolState {
    /// Moves every exclusion that expired at or before `now` back to available
    fn restore_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .excluded
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.excluded.remove(id);
            self.available.push(id.clone());
        }

        expired.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.leased.contains(id)
            || self.excluded.contains_key(id)
            || self.available.iter().any(|a| a == id)
    }
}

/// A pool of interchangeable resources with temporary exclusion
///
/// Every resource is in exactly one of the available, leased or excluded
/// sets. `lease` never blocks: when nothing is available it returns `None`
/// and the caller decides what to do with its task.
#[derive(Debug)]
pub struct ResourcePool {
    kind: ResourceKind,
    state: Mutex<PoolState>,
    exclusion_events: AtomicU64,
}

impl ResourcePool {
    /// Creates a pool with every resource available
    ///
    /// Duplicate ids are collapsed into a single resource.
    pub fn new<I, S>(kind: ResourceKind, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let available = ids
            .into_iter()
            .map(Into::<String>::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            kind,
            state: Mutex::new(PoolState {
                available,
                ..PoolState::default()
            }),
            exclusion_events: AtomicU64::new(0),
        }
    }

    /// Returns the kind of resource this pool manages
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Leases a random available resource
    pub fn lease(&self) -> Option<LeasedResource> {
        self.lease_at(Instant::now())
    }

    /// Leases a random available resource as of `now`
    ///
    /// Expired exclusions are swept back into rotation first. Selection is
    /// uniform over the available set so no resource becomes a hot spot.
    pub fn lease_at(&self, now: Instant) -> Option<LeasedResource> {
        let mut state = self.state.lock();

        let restored = state.restore_expired(now);
        if restored > 0 {
            tracing::debug!("{} pool: {} resource(s) back from exclusion", self.kind, restored);
        }

        if state.available.is_empty() {
            tracing::trace!(
                "{} pool exhausted ({} leased, {} excluded)",
                self.kind,
                state.leased.len(),
                state.excluded.len()
            );
            return None;
        }

        let index = rand::thread_rng().gen_range(0..state.available.len());
        let id = state.available.swap_remove(index);
        state.leased.insert(id.clone());

        Some(LeasedResource {
            id,
            kind: self.kind,
            leased_at: now,
        })
    }

    /// Returns a leased resource to the available set
    ///
    /// A lease whose resource was excluded in the meantime stays excluded.
    pub fn release(&self, lease: LeasedResource) {
        let mut state = self.state.lock();

        if state.leased.remove(&lease.id) {
            state.available.push(lease.id);
        } else {
            tracing::debug!(
                "{} pool: release of {} ignored, resource is not leased",
                self.kind,
                lease.id
            );
        }
    }

    /// Takes a resource out of rotation for `ttl`
    pub fn exclude(&self, id: &str, ttl: Duration) {
        self.exclude_at(id, ttl, Instant::now());
    }

    /// Takes a resource out of rotation until `now + ttl`
    ///
    /// The resource is removed from whichever set holds it. Excluding an
    /// already excluded resource keeps the later of the two expiries.
    pub fn exclude_at(&self, id: &str, ttl: Duration, now: Instant) {
        let mut state = self.state.lock();

        if !state.contains(id) {
            tracing::warn!("{} pool: cannot exclude unknown resource {}", self.kind, id);
            return;
        }

        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));

        state.leased.remove(id);
        state.available.retain(|a| a != id);
        let entry = state.excluded.entry(id.to_string()).or_insert(expires_at);
        if *entry < expires_at {
            *entry = expires_at;
        }

        self.exclusion_events.fetch_add(1, Ordering::Relaxed);
        tracing::info!("{} pool: excluded {} for {:?}", self.kind, id, ttl);
    }

    /// Returns where a resource currently sits, or None for unknown ids
    ///
    /// Exclusions are reported as they are stored; expiry only takes effect
    /// on the next lease.
    pub fn status(&self, id: &str) -> Option<ResourceStatus> {
        let state = self.state.lock();

        if state.leased.contains(id) {
            Some(ResourceStatus::Leased)
        } else if let Some(expires_at) = state.excluded.get(id) {
            Some(ResourceStatus::Excluded {
                expires_at: *expires_at,
            })
        } else if state.available.iter().any(|a| a == id) {
            Some(ResourceStatus::Available)
        } else {
            None
        }
    }

    /// Returns the current set sizes
    pub fn counts(&self) -> PoolCounts {
        let state = self.state.lock();
        PoolCounts {
            available: state.available.len(),
            leased: state.leased.len(),
            excluded: state.excluded.len(),
        }
    }

    /// Returns the total number of resources in the pool
    pub fn len(&self) -> usize {
        self.counts().total()
    }

    /// Returns whether the pool has no resources at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of exclusions applied since the pool was created
    pub fn exclusion_events(&self) -> u64 {
        self.exclusion_events.load(Ordering::Relaxed)
    }

    /// Lists active exclusions with their remaining time as of `now`
    pub fn exclusions_snapshot(&self, now: Instant) -> Vec<(String, Duration)> {
        let state = self.state.lock();
        state
            .excluded
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(id, expires_at)| (id.clone(), expires_at.duration_since(now)))
            .collect()
    }

    /// Re-applies exclusions saved by `exclusions_snapshot`
    ///
    /// Restored exclusions do not count as new exclusion events.
    pub fn restore_exclusions(&self, exclusions: &[(String, Duration)], now: Instant) {
        let mut state = self.state.lock();

        for (id, remaining) in exclusions {
            if !state.available.iter().any(|a| a == id) {
                tracing::debug!("{} pool: skipping saved exclusion for {}", self.kind, id);
                continue;
            }
            state.available.retain(|a| a != id);
            state.excluded.insert(id.clone(), now + *remaining);
        }
    }
}
