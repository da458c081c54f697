//! Decision cache.
//!
//! Decisions are memoized under `(fingerprint, generation)`. The fingerprint
//! is a BLAKE3 hash of the postcard encoding of the attributes a condition
//! can observe: time is reduced to hour, weekday and business-hours flag,
//! session age to whole minutes. The generation is the policy store's
//! counter at evaluation time, so a store mutation makes every older entry
//! unreachable without a sweep. Unreachable entries age out through SIEVE
//! eviction.
//!
//! # SIEVE
//!
//! - On hit: set the slot's `visited` bit.
//! - On insert when full: walk the hand forward, clearing `visited` bits,
//!   and evict the first slot found unvisited.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc, Weekday};
use palisade_types::{Action, RequestSource, ThreatLevel};
use serde::Serialize;
use tracing::{error, warn};

use crate::attributes::{AttributeBundle, ResourceAttributes, SubjectAttributes};
use crate::evaluator::AccessDecision;

// ============================================================================
// SIEVE map
// ============================================================================

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    visited: bool,
}

/// Bounded map with SIEVE eviction. Slots form a ring scanned by `hand`.
#[derive(Debug)]
pub(crate) struct SieveMap<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    index: HashMap<K, usize>,
    hand: usize,
}

impl<K, V> SieveMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A zero capacity is rounded up to one.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            hand: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        let slot = self.slots[idx].as_mut()?;
        slot.visited = true;
        Some(&slot.value)
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
                slot.visited = true;
                return;
            }
        }

        let idx = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => self.evict(),
        };
        self.index.insert(key.clone(), idx);
        self.slots[idx] = Some(Slot {
            key,
            value,
            visited: false,
        });
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.hand = 0;
    }

    /// Frees one slot and returns its index. Terminates within two laps:
    /// the first clears every `visited` bit it passes.
    fn evict(&mut self) -> usize {
        let capacity = self.capacity();
        loop {
            let idx = self.hand;
            self.hand = (self.hand + 1) % capacity;
            match self.slots[idx].as_mut() {
                Some(slot) if slot.visited => slot.visited = false,
                Some(slot) => {
                    self.index.remove(&slot.key);
                    self.slots[idx] = None;
                    return idx;
                }
                None => return idx,
            }
        }
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// BLAKE3 digest identifying a decision-relevant attribute view.
pub type Fingerprint = [u8; 32];

/// The environment at the granularity conditions observe.
#[derive(Serialize)]
struct EnvironmentView<'a> {
    hour: u32,
    day_of_week: Weekday,
    is_business_hours: bool,
    trusted_network: bool,
    threat_level: ThreatLevel,
    session_age_minutes: Option<u64>,
    ip_address: Option<IpAddr>,
    request_source: RequestSource,
    additional: &'a BTreeMap<String, String>,
}

/// Actions and resource types serialize by name only, so the view also
/// records which of them are `Custom`. A hand-built `Action::Custom("view")`
/// does not match `ActionIn([View])` and must not share its key.
#[derive(Serialize)]
struct FingerprintView<'a> {
    subject: &'a SubjectAttributes,
    resource: &'a ResourceAttributes,
    custom_resource_type: bool,
    action: &'a Action,
    custom_action: bool,
    environment: EnvironmentView<'a>,
}

/// Fingerprints a bundle. `None` if the view cannot be encoded, in which
/// case the request bypasses the cache.
pub fn fingerprint(bundle: &AttributeBundle) -> Option<Fingerprint> {
    let env = &bundle.environment;
    let view = FingerprintView {
        subject: &bundle.subject,
        resource: &bundle.resource,
        custom_resource_type: bundle.resource.resource_type.is_custom(),
        action: &bundle.action,
        custom_action: bundle.action.is_custom(),
        environment: EnvironmentView {
            hour: env.hour,
            day_of_week: env.day_of_week,
            is_business_hours: env.is_business_hours,
            trusted_network: env.trusted_network,
            threat_level: env.threat_level,
            session_age_minutes: env.session_age_minutes(),
            ip_address: env.ip_address,
            request_source: env.request_source,
            additional: &env.additional,
        },
    };

    match postcard::to_allocvec(&view) {
        Ok(bytes) => Some(*blake3::hash(&bytes).as_bytes()),
        Err(error) => {
            warn!(user_id = %bundle.subject.user_id, %error, "cannot fingerprint request; bypassing cache");
            None
        }
    }
}

// ============================================================================
// Decision cache
// ============================================================================

/// Counters reported by [`DecisionCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, `0.0` before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type CacheKey = (Fingerprint, u64);

/// Thread-safe memo of decisions.
#[derive(Debug)]
pub struct DecisionCache {
    map: Mutex<SieveMap<CacheKey, AccessDecision>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: Mutex::new(SieveMap::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SieveMap<CacheKey, AccessDecision>> {
        self.map.lock().unwrap_or_else(|poisoned| {
            error!("decision cache lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Looks up a decision made under `generation`.
    ///
    /// A hit is returned as a copy flagged `cache_hit`, stamped with `now`
    /// and carrying the lookup time as its evaluation time.
    pub fn get(
        &self,
        fingerprint: &Fingerprint,
        generation: u64,
        now: DateTime<Utc>,
    ) -> Option<AccessDecision> {
        let started = Instant::now();
        let cached = self.lock().get(&(*fingerprint, generation)).cloned();

        match cached {
            Some(mut decision) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                decision.cache_hit = true;
                decision.timestamp = now;
                decision.evaluation_time = started.elapsed();
                Some(decision)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, fingerprint: Fingerprint, generation: u64, decision: &AccessDecision) {
        self.lock().insert((fingerprint, generation), decision.clone());
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: map.len(),
            capacity: map.capacity(),
        }
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::EnvironmentAttributes;
    use crate::evaluator::evaluate_bundle;
    use crate::policy::{Condition, Policy};
    use chrono::TimeZone;
    use palisade_types::{ClearanceLevel, ResourceType};
    use std::time::Duration;

    #[test]
    fn test_sieve_insert_and_get() {
        let mut map = SieveMap::new(3);
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);

        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.get(&"c"), Some(&3));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_sieve_evicts_unvisited_first() {
        let mut map = SieveMap::new(3);
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);
        map.get(&"a");
        map.get(&"c");

        map.insert("d", 4);

        assert_eq!(map.get(&"b"), None);
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.get(&"d"), Some(&4));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_sieve_all_visited_still_evicts() {
        let mut map = SieveMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        map.get(&"a");
        map.get(&"b");

        map.insert("c", 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"c"), Some(&3));
    }

    #[test]
    fn test_sieve_zero_capacity_rounds_up() {
        let mut map = SieveMap::new(0);
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.capacity(), 1);
        assert_eq!(map.get(&"a"), None);
        assert_eq!(map.get(&"b"), Some(&2));
    }

    #[test]
    fn test_sieve_update_and_clear() {
        let mut map = SieveMap::new(2);
        map.insert("a", 1);
        map.insert("a", 10);
        assert_eq!(map.get(&"a"), Some(&10));
        assert_eq!(map.len(), 1);

        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(&"a"), None);
    }

    fn bundle_at(minute: u32, second: u32) -> AttributeBundle {
        let ts = Utc.with_ymd_and_hms(2025, 1, 8, 10, minute, second).unwrap();
        AttributeBundle {
            subject: SubjectAttributes::new("u-1", "Staff", 1),
            resource: ResourceAttributes::new(ResourceType::Inventory, ClearanceLevel::Public),
            action: Action::View,
            environment: EnvironmentAttributes::from_timestamp(ts),
        }
    }

    #[test]
    fn test_fingerprint_ignores_sub_hour_time() {
        assert_eq!(fingerprint(&bundle_at(0, 0)), fingerprint(&bundle_at(59, 59)));
    }

    #[test]
    fn test_fingerprint_tracks_session_minutes() {
        let mut a = bundle_at(0, 0);
        let mut b = bundle_at(0, 0);
        a.environment.session_age = Some(Duration::from_secs(60));
        b.environment.session_age = Some(Duration::from_secs(119));
        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.environment.session_age = Some(Duration::from_secs(120));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_tracks_action() {
        let mut other = bundle_at(0, 0);
        other.action = Action::Delete;
        assert_ne!(fingerprint(&bundle_at(0, 0)), fingerprint(&other));
    }

    #[test]
    fn test_fingerprint_separates_custom_variant_from_builtin_name() {
        let policies = [Policy::permit("view-reports")
            .when(Condition::ResourceTypeIn(vec![ResourceType::Report]))
            .when(Condition::ActionIn(vec![Action::View]))];

        let mut builtin = bundle_at(0, 0);
        builtin.resource.resource_type = ResourceType::Report;
        let mut custom_action = builtin.clone();
        custom_action.action = Action::Custom("view".to_string());
        let mut custom_type = builtin.clone();
        custom_type.resource.resource_type = ResourceType::Custom("report".to_string());

        assert_ne!(fingerprint(&builtin), fingerprint(&custom_action));
        assert_ne!(fingerprint(&builtin), fingerprint(&custom_type));

        // A hit for the built-in must not answer the custom lookalike.
        let cache = DecisionCache::new(8);
        let key = fingerprint(&builtin).unwrap();
        let permitted = evaluate_bundle(&builtin, &policies);
        assert!(permitted.is_allowed());
        cache.insert(key, 1, &permitted);

        let now = builtin.environment.current_time;
        for lookalike in [&custom_action, &custom_type] {
            let lookalike_key = fingerprint(lookalike).unwrap();
            assert!(cache.get(&lookalike_key, 1, now).is_none());
            assert!(!evaluate_bundle(lookalike, &policies).is_allowed());
        }
    }

    #[test]
    fn test_cache_hit_and_generation_miss() {
        let cache = DecisionCache::new(8);
        let bundle = bundle_at(0, 0);
        let key = fingerprint(&bundle).unwrap();
        let decision = evaluate_bundle(&bundle, &[Policy::permit("all")]);

        assert!(cache.get(&key, 1, Utc::now()).is_none());
        cache.insert(key, 1, &decision);

        let later = Utc.with_ymd_and_hms(2025, 1, 8, 10, 30, 0).unwrap();
        let hit = cache.get(&key, 1, later).expect("cached decision");
        assert!(hit.cache_hit);
        assert_eq!(hit.timestamp, later);
        assert_eq!(hit.effect, decision.effect);
        assert_eq!(hit.reason, decision.reason);

        assert!(cache.get(&key, 2, later).is_none(), "stale generation");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_cache_clear() {
        let cache = DecisionCache::new(4);
        let bundle = bundle_at(0, 0);
        let key = fingerprint(&bundle).unwrap();
        cache.insert(key, 1, &evaluate_bundle(&bundle, &[]));
        cache.clear();
        assert!(cache.get(&key, 1, Utc::now()).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
