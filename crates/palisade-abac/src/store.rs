//! Policy store.
//!
//! The working set lives in an immutable [`PolicySnapshot`] behind
//! `RwLock<Arc<_>>`. Readers clone the `Arc` and never block each other.
//! Writers are serialized by the write lock and publish the new policy set
//! and the bumped generation in the same swap, so no reader can pair a
//! policy set with the wrong generation.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{error, info, warn};

use crate::error::ConfigurationError;
use crate::policy::Policy;

/// An immutable view of the store at one generation.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    generation: u64,
    policies: Arc<[Policy]>,
}

impl PolicySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

/// Outcome of [`PolicyStore::load_json`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// `(policy id or "#<index>", why it was rejected)`.
    pub skipped: Vec<(String, ConfigurationError)>,
    pub generation: u64,
}

/// Shared, versioned policy working set.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// An empty store at generation 0.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(PolicySnapshot {
                generation: 0,
                policies: Arc::from(Vec::new()),
            })),
        }
    }

    /// A store holding `policies` at generation 1.
    pub fn with_policies(
        policies: impl IntoIterator<Item = Policy>,
    ) -> Result<Self, ConfigurationError> {
        let store = Self::new();
        store.replace_all(policies)?;
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<PolicySnapshot>> {
        self.current.read().unwrap_or_else(|poisoned| {
            error!("policy store lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<PolicySnapshot>> {
        self.current.write().unwrap_or_else(|poisoned| {
            error!("policy store lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Swaps in `policies` as the next generation. Caller holds the write lock.
    fn publish(current: &mut Arc<PolicySnapshot>, policies: Vec<Policy>) -> u64 {
        let generation = current.generation + 1;
        *current = Arc::new(PolicySnapshot {
            generation,
            policies: Arc::from(policies),
        });
        generation
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.read())
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn len(&self) -> usize {
        self.read().policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().policies.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Policy> {
        self.read().policies.iter().find(|p| p.id == id).cloned()
    }

    /// Adds a new policy. Fails if the id is taken or the policy is malformed.
    pub fn add(&self, policy: Policy) -> Result<u64, ConfigurationError> {
        policy.validate()?;
        let mut current = self.write();
        if current.policies.iter().any(|p| p.id == policy.id) {
            return Err(ConfigurationError::DuplicatePolicy(policy.id));
        }

        let id = policy.id.clone();
        let mut next = current.policies.to_vec();
        next.push(policy);
        let generation = Self::publish(&mut current, next);
        info!(policy_id = %id, generation, "policy added");
        Ok(generation)
    }

    /// Inserts or replaces a policy by id, returning the previous version.
    pub fn replace(&self, policy: Policy) -> Result<Option<Policy>, ConfigurationError> {
        policy.validate()?;
        let mut current = self.write();
        let mut next = current.policies.to_vec();
        let id = policy.id.clone();

        let previous = match next.iter().position(|p| p.id == policy.id) {
            Some(idx) => Some(std::mem::replace(&mut next[idx], policy)),
            None => {
                next.push(policy);
                None
            }
        };
        let generation = Self::publish(&mut current, next);
        info!(policy_id = %id, generation, replaced = previous.is_some(), "policy replaced");
        Ok(previous)
    }

    /// Removes a policy. The generation only moves if something was removed.
    pub fn remove(&self, id: &str) -> Option<Policy> {
        let mut current = self.write();
        let idx = current.policies.iter().position(|p| p.id == id)?;
        let mut next = current.policies.to_vec();
        let removed = next.remove(idx);
        let generation = Self::publish(&mut current, next);
        info!(policy_id = %id, generation, "policy removed");
        Some(removed)
    }

    /// Replaces the whole working set in one generation step. Rejects the
    /// batch, leaving the store untouched, if any policy is malformed or
    /// two share an id.
    pub fn replace_all(
        &self,
        policies: impl IntoIterator<Item = Policy>,
    ) -> Result<u64, ConfigurationError> {
        let policies: Vec<Policy> = policies.into_iter().collect();
        let mut ids = std::collections::HashSet::new();
        for policy in &policies {
            policy.validate()?;
            if !ids.insert(policy.id.as_str()) {
                return Err(ConfigurationError::DuplicatePolicy(policy.id.clone()));
            }
        }

        let count = policies.len();
        let mut current = self.write();
        let generation = Self::publish(&mut current, policies);
        info!(count, generation, "policy set replaced");
        Ok(generation)
    }

    /// Loads a JSON array of policies, replacing the working set.
    ///
    /// Entries that fail to parse or validate, and later duplicates of an
    /// id, are skipped and reported; the remainder is published as one
    /// generation. A document that is not a JSON array yields a single
    /// skipped entry and leaves the store untouched.
    pub fn load_json(&self, json: &str) -> LoadReport {
        let mut report = LoadReport::default();

        let raw: Vec<serde_json::Value> = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "policy document is not a JSON array");
                report.skipped.push((
                    "#document".to_string(),
                    ConfigurationError::Parse {
                        index: 0,
                        message: e.to_string(),
                    },
                ));
                report.generation = self.generation();
                return report;
            }
        };

        let mut accepted: Vec<Policy> = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            let label = value
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| format!("#{index}"), str::to_string);

            let verdict = serde_json::from_value::<Policy>(value)
                .map_err(|e| ConfigurationError::Parse {
                    index,
                    message: e.to_string(),
                })
                .and_then(|policy| policy.validate().map(|_| policy))
                .and_then(|policy| {
                    if accepted.iter().any(|p| p.id == policy.id) {
                        Err(ConfigurationError::DuplicatePolicy(policy.id))
                    } else {
                        Ok(policy)
                    }
                });

            match verdict {
                Ok(policy) => {
                    report.loaded.push(policy.id.clone());
                    accepted.push(policy);
                }
                Err(error) => {
                    warn!(policy_id = %label, %error, "skipping policy");
                    report.skipped.push((label, error));
                }
            }
        }

        let mut current = self.write();
        report.generation = Self::publish(&mut current, accepted);
        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            generation = report.generation,
            "policy document loaded"
        );
        report
    }
}
