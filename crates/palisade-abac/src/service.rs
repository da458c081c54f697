//! Permission façade.
//!
//! [`PermissionService`] is the single entry point protected operations
//! call. It resolves attributes, consults the decision cache, evaluates the
//! current policy snapshot on a miss, and records every decision in the
//! audit log. No check returns an error: failures become denies.
//!
//! Services are constructed explicitly and passed to callers; there is no
//! process-wide instance.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use palisade_config::{BulkConfig, ConfigError, PalisadeConfig};
use palisade_types::{Action, ResourceType, ThreatLevel};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::attributes::AttributeBundle;
use crate::audit::{AuditEntry, AuditLog, AuditQuery};
use crate::cache::{CacheStats, DecisionCache, fingerprint};
use crate::error::ServiceError;
use crate::evaluator::{AccessDecision, evaluate_bundle};
use crate::request::{
    ActionPermission, BulkPermissionRequest, BulkPermissionResult, EffectivePermission,
    PermissionCheckRequest, PermissionProbe, PermissionResult,
};
use crate::resolver::{AttributeResolver, Clock, Directory, InMemoryDirectory};
use crate::store::{PolicySnapshot, PolicyStore};

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag for bulk checks. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`PermissionService`].
#[derive(Default)]
pub struct PermissionServiceBuilder {
    directory: Option<Arc<dyn Directory>>,
    store: Option<Arc<PolicyStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: PalisadeConfig,
}

impl PermissionServiceBuilder {
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Shares an existing store, e.g. one fed by an administration surface.
    pub fn policy_store(mut self, store: Arc<PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: PalisadeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<PermissionService, ConfigError> {
        let config = self.config;
        config.validate()?;

        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(InMemoryDirectory::new()));
        let mut resolver = AttributeResolver::from_config(directory, &config)?;
        if let Some(clock) = self.clock {
            resolver = resolver.with_clock(clock);
        }

        Ok(PermissionService {
            resolver,
            store: self.store.unwrap_or_default(),
            cache: config
                .cache
                .enabled
                .then(|| DecisionCache::new(config.cache.capacity)),
            audit: config
                .audit
                .enabled
                .then(|| AuditLog::new(config.audit.max_entries)),
            bulk: config.bulk,
        })
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug)]
pub struct PermissionService {
    resolver: AttributeResolver,
    store: Arc<PolicyStore>,
    cache: Option<DecisionCache>,
    audit: Option<AuditLog>,
    bulk: BulkConfig,
}

impl PermissionService {
    pub fn builder() -> PermissionServiceBuilder {
        PermissionServiceBuilder::default()
    }

    pub fn from_config(
        directory: Arc<dyn Directory>,
        config: &PalisadeConfig,
    ) -> Result<Self, ConfigError> {
        Self::builder()
            .directory(directory)
            .config(config.clone())
            .build()
    }

    pub fn policy_store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn resolver(&self) -> &AttributeResolver {
        &self.resolver
    }

    /// `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Threat level is part of every fingerprint, so no cache flush is needed.
    pub fn set_threat_level(&self, level: ThreatLevel) {
        info!(%level, "threat level changed");
        self.resolver.set_threat_level(level);
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    pub fn check_permission(&self, request: &PermissionCheckRequest) -> PermissionResult {
        let snapshot = self.store.snapshot();
        self.check_with_snapshot(request, &snapshot)
    }

    /// One check against a caller-held snapshot, so a batch sees one
    /// consistent policy set.
    pub(crate) fn check_with_snapshot(
        &self,
        request: &PermissionCheckRequest,
        snapshot: &PolicySnapshot,
    ) -> PermissionResult {
        let started = Instant::now();

        let decision = match self.resolver.resolve(request) {
            Ok(bundle) => self.decide(&bundle, snapshot),
            Err(error) => {
                warn!(user_id = %request.user_id, %error, "attribute resolution failed");
                AccessDecision::unresolved(&error, self.resolver.now(), snapshot.policies())
            }
        };

        if decision.is_allowed() {
            info!(
                user_id = %request.user_id,
                resource_type = %request.resource_type,
                action = %request.action,
                generation = snapshot.generation(),
                cache_hit = decision.cache_hit,
                "Access granted"
            );
        } else {
            warn!(
                user_id = %request.user_id,
                resource_type = %request.resource_type,
                action = %request.action,
                generation = snapshot.generation(),
                reason = %decision.reason,
                "Access denied"
            );
        }

        if let Some(audit) = &self.audit {
            audit.append(AuditEntry::new(
                &request.user_id,
                request.resource_type.clone(),
                request.resource_id.clone(),
                request.action.clone(),
                decision.clone(),
            ));
        }

        PermissionResult {
            allowed: decision.is_allowed(),
            reason: decision.reason.clone(),
            decision,
            execution_time: started.elapsed(),
        }
    }

    fn decide(&self, bundle: &AttributeBundle, snapshot: &PolicySnapshot) -> AccessDecision {
        let Some(cache) = &self.cache else {
            return evaluate_bundle(bundle, snapshot.policies());
        };
        let Some(key) = fingerprint(bundle) else {
            return evaluate_bundle(bundle, snapshot.policies());
        };

        let generation = snapshot.generation();
        if let Some(hit) = cache.get(&key, generation, bundle.environment.current_time) {
            return hit;
        }
        let decision = evaluate_bundle(bundle, snapshot.policies());
        cache.insert(key, generation, &decision);
        decision
    }

    pub fn check_bulk_permissions(&self, request: &BulkPermissionRequest) -> BulkPermissionResult {
        self.check_bulk_permissions_with_cancel(request, &CancellationToken::new())
    }

    /// Bulk check with early termination.
    ///
    /// Work is split into `bulk.chunk_size` chunks, evaluated in parallel
    /// when `bulk.parallel` is set, all against the snapshot taken on entry.
    /// Cancellation is observed before each chunk starts. Chunks that already
    /// ran keep their results in place; skipped chunks leave `None` slots.
    pub fn check_bulk_permissions_with_cancel(
        &self,
        request: &BulkPermissionRequest,
        cancel: &CancellationToken,
    ) -> BulkPermissionResult {
        let started = Instant::now();
        let snapshot = self.store.snapshot();
        let chunk_size = self.bulk.chunk_size.max(1);

        let run_chunk = |chunk: &[PermissionProbe]| -> Vec<Option<PermissionResult>> {
            if cancel.is_cancelled() {
                return vec![None; chunk.len()];
            }
            chunk
                .iter()
                .map(|check| Some(self.check_with_snapshot(&request.request_for(check), &snapshot)))
                .collect()
        };

        let results: Vec<Option<PermissionResult>> = if self.bulk.parallel {
            request
                .checks
                .par_chunks(chunk_size)
                .flat_map_iter(&run_chunk)
                .collect()
        } else {
            request.checks.chunks(chunk_size).flat_map(run_chunk).collect()
        };

        let finished = results.iter().filter(|r| r.is_some()).count();
        let completed = finished == request.checks.len();
        if !completed {
            warn!(
                user_id = %request.user_id,
                finished,
                requested = request.checks.len(),
                "bulk check cancelled"
            );
        }

        BulkPermissionResult {
            results,
            execution_time: started.elapsed(),
            completed,
            cancelled: !completed,
        }
    }

    // ------------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------------

    /// Allow/deny for every catalog action of `resource_type`. Types missing
    /// from the catalog are checked against every built-in action.
    pub fn get_user_resource_permissions(
        &self,
        user_id: &str,
        resource_type: &ResourceType,
        resource_id: Option<&str>,
    ) -> Vec<ActionPermission> {
        let actions: Vec<Action> = self
            .resolver
            .catalog()
            .iter()
            .find(|e| e.resource_type == *resource_type)
            .map_or_else(|| Action::BUILT_IN.to_vec(), |e| e.actions.clone());

        let checks: Vec<PermissionProbe> = actions
            .iter()
            .map(|action| PermissionProbe {
                resource_type: resource_type.clone(),
                action: action.clone(),
                resource_id: resource_id.map(str::to_string),
            })
            .collect();

        let bulk = self.check_bulk_permissions(&BulkPermissionRequest::new(user_id, checks));
        actions
            .into_iter()
            .zip(bulk.results)
            .filter_map(|(action, result)| {
                result.map(|result| ActionPermission {
                    action,
                    allowed: result.allowed,
                    reason: result.reason,
                })
            })
            .collect()
    }

    /// Catalog resource types on which `action` is permitted.
    pub fn get_user_action_resources(&self, user_id: &str, action: &Action) -> Vec<ResourceType> {
        self.resolver
            .catalog()
            .iter()
            .map(|e| e.resource_type.clone())
            .filter(|resource_type| {
                let request =
                    PermissionCheckRequest::new(user_id, resource_type.clone(), action.clone());
                self.check_permission(&request).allowed
            })
            .collect()
    }

    /// True at the first permitted check.
    pub fn has_any_permission(&self, user_id: &str, checks: &[PermissionProbe]) -> bool {
        checks
            .iter()
            .any(|check| self.check_one(user_id, check).allowed)
    }

    /// False at the first denied check. An empty list is vacuously true.
    pub fn has_all_permissions(&self, user_id: &str, checks: &[PermissionProbe]) -> bool {
        checks
            .iter()
            .all(|check| self.check_one(user_id, check).allowed)
    }

    fn check_one(&self, user_id: &str, check: &PermissionProbe) -> PermissionResult {
        let mut request =
            PermissionCheckRequest::new(user_id, check.resource_type.clone(), check.action.clone());
        request.resource_id.clone_from(&check.resource_id);
        self.check_permission(&request)
    }

    /// Every permitted `(resource type, action)` pair over the catalog's
    /// types and all known actions.
    ///
    /// Costs one check per matrix cell; meant for administrative views.
    pub fn get_effective_permissions(&self, user_id: &str) -> Vec<EffectivePermission> {
        let catalog = self.resolver.catalog();
        let actions: BTreeSet<Action> = Action::BUILT_IN
            .iter()
            .cloned()
            .chain(catalog.iter().flat_map(|e| e.actions.iter().cloned()))
            .collect();

        let matrix: Vec<PermissionProbe> = catalog
            .iter()
            .flat_map(|entry| {
                actions
                    .iter()
                    .map(|action| PermissionProbe::new(entry.resource_type.clone(), action.clone()))
            })
            .collect();

        let bulk = self.check_bulk_permissions(&BulkPermissionRequest::new(user_id, matrix.clone()));
        matrix
            .into_iter()
            .zip(bulk.results)
            .filter(|(_, result)| result.as_ref().is_some_and(|r| r.allowed))
            .map(|(cell, _)| EffectivePermission {
                resource_type: cell.resource_type,
                action: cell.action,
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------------

    /// Up to `limit` entries, newest first. Empty when auditing is disabled.
    pub fn get_audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit
            .as_ref()
            .map(|audit| audit.recent(limit))
            .unwrap_or_default()
    }

    pub fn query_audit_log(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        self.audit
            .as_ref()
            .map(|audit| audit.query(query))
            .unwrap_or_default()
    }

    /// Clears the audit log on behalf of `actor`, who must be permitted to
    /// delete `audit-log`. The check itself is recorded before the log is
    /// cleared. Returns the number of entries removed.
    pub fn clear_audit_log(&self, actor: &str) -> Result<usize, ServiceError> {
        let request = PermissionCheckRequest::new(actor, ResourceType::AuditLog, Action::Delete);
        let result = self.check_permission(&request);
        if !result.allowed {
            return Err(ServiceError::AccessDenied {
                reason: result.reason,
            });
        }

        let removed = self.audit.as_ref().map_or(0, AuditLog::clear);
        info!(actor, removed, "audit log cleared");
        Ok(removed)
    }
}
