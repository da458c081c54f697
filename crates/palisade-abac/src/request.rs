//! Request and response shapes of the permission façade.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use palisade_types::{Action, RequestSource, ResourceType};
use serde::{Deserialize, Serialize};

use crate::evaluator::AccessDecision;

/// Caller-supplied context for one check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// Department the user is acting for; must be one of theirs.
    pub department: Option<String>,
    /// Location the user is acting at; must be one of theirs.
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
    /// Overrides inference from `user_agent`.
    pub source: Option<RequestSource>,
    pub additional_attributes: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn with_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.to_string());
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_session_started_at(mut self, started: DateTime<Utc>) -> Self {
        self.session_started_at = Some(started);
        self
    }

    pub fn with_source(mut self, source: RequestSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.additional_attributes
            .insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheckRequest {
    pub user_id: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub action: Action,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

impl PermissionCheckRequest {
    pub fn new(user_id: &str, resource_type: ResourceType, action: Action) -> Self {
        Self {
            user_id: user_id.to_string(),
            resource_type,
            resource_id: None,
            action,
            context: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: String,
    pub decision: AccessDecision,
    /// Wall time of the whole check, resolution included.
    pub execution_time: Duration,
}

/// One `(resource type, action, resource id?)` question asked of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionProbe {
    pub resource_type: ResourceType,
    pub action: Action,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl PermissionProbe {
    pub fn new(resource_type: ResourceType, action: Action) -> Self {
        Self {
            resource_type,
            action,
            resource_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }
}

/// Several checks for one user, sharing one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPermissionRequest {
    pub user_id: String,
    pub checks: Vec<PermissionProbe>,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

impl BulkPermissionRequest {
    pub fn new(user_id: &str, checks: Vec<PermissionProbe>) -> Self {
        Self {
            user_id: user_id.to_string(),
            checks,
            context: None,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn request_for(&self, check: &PermissionProbe) -> PermissionCheckRequest {
        PermissionCheckRequest {
            user_id: self.user_id.clone(),
            resource_type: check.resource_type.clone(),
            resource_id: check.resource_id.clone(),
            action: check.action.clone(),
            context: self.context.clone(),
        }
    }
}

/// `results[i]` answers `checks[i]`, and `results` always has one slot per
/// check. A slot is `None` only when the bulk check was cancelled before
/// that check ran; every check that did run keeps its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPermissionResult {
    pub results: Vec<Option<PermissionResult>>,
    pub execution_time: Duration,
    pub completed: bool,
    pub cancelled: bool,
}

impl BulkPermissionResult {
    /// Number of checks that ran.
    pub fn finished(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }

    /// `true` only when check `index` ran and was permitted.
    pub fn is_allowed(&self, index: usize) -> bool {
        matches!(self.results.get(index), Some(Some(result)) if result.allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPermission {
    pub action: Action,
    pub allowed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub resource_type: ResourceType,
    pub action: Action,
}
