//! Append-only decision log.
//!
//! Every decision the service produces is recorded here. Entries are never
//! edited. The log is bounded: once `max_entries` is reached the oldest entry
//! is dropped for each new one. Clearing is crate-private and reachable only
//! through [`crate::PermissionService::clear_audit_log`], which checks the
//! caller's permission first.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use palisade_types::{Action, Effect, ResourceType};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::error::AuditError;
use crate::evaluator::AccessDecision;

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Equal to the decision timestamp.
    pub recorded_at: DateTime<Utc>,
    pub user_id: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub action: Action,
    pub decision: AccessDecision,
}

impl AuditEntry {
    pub fn new(
        user_id: &str,
        resource_type: ResourceType,
        resource_id: Option<String>,
        action: Action,
        decision: AccessDecision,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: decision.timestamp,
            user_id: user_id.to_string(),
            resource_type,
            resource_id,
            action,
            decision,
        }
    }
}

/// Filter for [`AuditLog::query`]. Set fields combine with AND.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub action: Option<Action>,
    pub effect: Option<Effect>,
    /// Inclusive lower bound on `recorded_at`.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == entry.user_id)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|t| *t == entry.resource_type)
            && self.action.as_ref().is_none_or(|a| *a == entry.action)
            && self.effect.is_none_or(|e| e == entry.decision.effect)
            && self.since.is_none_or(|s| entry.recorded_at >= s)
    }
}

/// Bounded, thread-safe decision log.
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl AuditLog {
    /// A zero bound is rounded up to one.
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(1024))),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            error!("audit log lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub fn append(&self, entry: AuditEntry) {
        let mut entries = self.lock();
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Matching entries, newest first.
    pub fn query(&self, filter: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.lock();
        let matching = entries.iter().rev().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Matching entries as a pretty-printed JSON array.
    pub fn export_json(&self, filter: &AuditQuery) -> Result<String, AuditError> {
        Ok(serde_json::to_string_pretty(&self.query(filter))?)
    }

    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeBundle, EnvironmentAttributes, ResourceAttributes, SubjectAttributes};
    use crate::evaluator::evaluate_bundle;
    use crate::policy::{Condition, Policy};
    use chrono::TimeZone;
    use palisade_types::ClearanceLevel;

    fn entry(user: &str, action: Action, hour: u32) -> AuditEntry {
        let ts = Utc.with_ymd_and_hms(2025, 1, 8, hour, 0, 0).unwrap();
        let bundle = AttributeBundle {
            subject: SubjectAttributes::new(user, "Staff", 1),
            resource: ResourceAttributes::new(ResourceType::Inventory, ClearanceLevel::Public),
            action: action.clone(),
            environment: EnvironmentAttributes::from_timestamp(ts),
        };
        let policies = vec![Policy::permit("view").when(Condition::ActionIn(vec![Action::View]))];
        let decision = evaluate_bundle(&bundle, &policies);
        AuditEntry::new(user, ResourceType::Inventory, None, action, decision)
    }

    #[test]
    fn test_append_and_recent_newest_first() {
        let log = AuditLog::new(10);
        log.append(entry("alice", Action::View, 9));
        log.append(entry("bob", Action::Delete, 10));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_id, "bob");
        assert_eq!(log.recent(1).len(), 1);
    }

    #[test]
    fn test_bounded_drops_oldest() {
        let log = AuditLog::new(2);
        log.append(entry("a", Action::View, 9));
        log.append(entry("b", Action::View, 10));
        log.append(entry("c", Action::View, 11));

        let users: Vec<_> = log.recent(10).into_iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec!["c", "b"]);
    }

    #[test]
    fn test_query_combined_filters() {
        let log = AuditLog::new(10);
        log.append(entry("alice", Action::View, 9));
        log.append(entry("alice", Action::Delete, 10));
        log.append(entry("bob", Action::View, 11));

        let denied = log.query(&AuditQuery::default().with_effect(Effect::Deny));
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].action, Action::Delete);

        let alice_views = log.query(
            &AuditQuery::default()
                .with_user("alice")
                .with_action(Action::View),
        );
        assert_eq!(alice_views.len(), 1);

        let since = Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap();
        assert_eq!(log.query(&AuditQuery::default().since(since)).len(), 2);
        assert_eq!(log.query(&AuditQuery::default().with_limit(1)).len(), 1);
    }

    #[test]
    fn test_export_json_and_clear() {
        let log = AuditLog::new(10);
        log.append(entry("alice", Action::View, 9));

        let json = log.export_json(&AuditQuery::default()).expect("export");
        let parsed: Vec<AuditEntry> = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].user_id, "alice");

        assert_eq!(log.clear(), 1);
        assert!(log.is_empty());
    }
}
