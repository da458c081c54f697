//! Attribute bundles for ABAC evaluation.
//!
//! Four attribute dimensions drive access decisions:
//! - **Subject**: identity, role hierarchy, departments, locations, clearance
//! - **Resource**: type, id, classification, ownership, audit flag
//! - **Action**: what the subject wants to do
//! - **Environment**: wall-clock time, network trust, threat level, session
//!
//! Bundles are built fresh for every request and are never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc, Weekday};
use palisade_config::EngineConfig;
use palisade_types::{Action, ClearanceLevel, RequestSource, ResourceType, ThreatLevel};
use serde::{Deserialize, Serialize};

// ============================================================================
// Subject Attributes
// ============================================================================

/// Employment facts copied from the identity directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmploymentAttributes {
    /// e.g. "full-time", "part-time", "contractor".
    pub employment_type: String,
    pub job_title: Option<String>,
    pub hired_on: Option<NaiveDate>,
}

/// Attributes describing the user making the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttributes {
    pub user_id: String,
    /// Primary role name (e.g. "Department Manager").
    pub role: String,
    /// Position of the primary role in the hierarchy; higher is more senior.
    pub role_level: u8,
    /// Every role the user holds, including the primary role.
    pub roles: BTreeSet<String>,
    pub departments: BTreeSet<String>,
    /// Department the request is made on behalf of, if the caller named one.
    pub active_department: Option<String>,
    pub locations: BTreeSet<String>,
    pub active_location: Option<String>,
    pub clearance: ClearanceLevel,
    pub employment: EmploymentAttributes,
    pub on_duty: bool,
    /// Authorities delegated to this user by others (e.g. "approve:purchase-request").
    pub delegated_authorities: BTreeSet<String>,
    /// Largest amount, in minor currency units, the user may approve.
    pub approval_limit: Option<u64>,
}

impl SubjectAttributes {
    /// Creates a subject holding a single role, public clearance and no
    /// departments or locations.
    pub fn new(user_id: &str, role: &str, role_level: u8) -> Self {
        let mut roles = BTreeSet::new();
        roles.insert(role.to_string());
        Self {
            user_id: user_id.to_string(),
            role: role.to_string(),
            role_level,
            roles,
            departments: BTreeSet::new(),
            active_department: None,
            locations: BTreeSet::new(),
            active_location: None,
            clearance: ClearanceLevel::Public,
            employment: EmploymentAttributes::default(),
            on_duty: false,
            delegated_authorities: BTreeSet::new(),
            approval_limit: None,
        }
    }

    /// Adds an additional (non-primary) role.
    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_string());
        self
    }

    pub fn with_department(mut self, department: &str) -> Self {
        self.departments.insert(department.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.locations.insert(location.to_string());
        self
    }

    pub fn with_clearance(mut self, clearance: ClearanceLevel) -> Self {
        self.clearance = clearance;
        self
    }

    pub fn with_employment_type(mut self, employment_type: &str) -> Self {
        self.employment.employment_type = employment_type.to_string();
        self
    }

    pub fn on_duty(mut self, on_duty: bool) -> Self {
        self.on_duty = on_duty;
        self
    }

    pub fn with_delegated_authority(mut self, authority: &str) -> Self {
        self.delegated_authorities.insert(authority.to_string());
        self
    }

    pub fn with_approval_limit(mut self, limit: u64) -> Self {
        self.approval_limit = Some(limit);
        self
    }

    /// Departments that count for "same department" checks: the active one
    /// when the caller named it, otherwise every assigned department.
    pub(crate) fn effective_departments(&self) -> impl Iterator<Item = &String> {
        let active = self.active_department.iter();
        let all = self
            .departments
            .iter()
            .filter(move |_| self.active_department.is_none());
        active.chain(all)
    }

    pub(crate) fn effective_locations(&self) -> impl Iterator<Item = &String> {
        let active = self.active_location.iter();
        let all = self
            .locations
            .iter()
            .filter(move |_| self.active_location.is_none());
        active.chain(all)
    }
}

// ============================================================================
// Resource Attributes
// ============================================================================

/// Attributes describing the object being acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub resource_type: ResourceType,
    /// `None` for collection-level actions such as `create`.
    pub resource_id: Option<String>,
    pub classification: ClearanceLevel,
    pub owner_id: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    /// Monetary value in minor units, for approval-limit checks.
    pub amount: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub audit_required: bool,
}

impl ResourceAttributes {
    /// Creates resource attributes with no ownership, amount or timestamps.
    pub fn new(resource_type: ResourceType, classification: ClearanceLevel) -> Self {
        Self {
            resource_type,
            resource_id: None,
            classification,
            owner_id: None,
            department: None,
            location: None,
            amount: None,
            created_at: None,
            updated_at: None,
            audit_required: false,
        }
    }

    pub fn with_id(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }

    pub fn with_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_audit_required(mut self, audit_required: bool) -> Self {
        self.audit_required = audit_required;
        self
    }
}

// ============================================================================
// Environment Attributes
// ============================================================================

/// The wall-clock window considered business hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    /// First business hour (inclusive).
    pub start: u32,
    /// Last business hour (exclusive).
    pub end: u32,
    /// Offset of the wall clock from UTC.
    pub offset: FixedOffset,
}

impl Default for BusinessHours {
    /// `[08:00, 18:00)` UTC.
    fn default() -> Self {
        Self {
            start: 8,
            end: 18,
            offset: Utc.fix(),
        }
    }
}

impl BusinessHours {
    /// Builds the window from engine configuration.
    ///
    /// An out-of-range offset falls back to UTC; configuration validation
    /// rejects such values before they reach here.
    pub fn from_config(config: &EngineConfig) -> Self {
        let offset =
            FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self {
            start: config.business_hours_start,
            end: config.business_hours_end,
            offset,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start..self.end).contains(&hour)
    }
}

/// Attributes describing the context of the request.
///
/// Computed from system state at request time rather than supplied by the
/// subject, so they are harder to forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    pub current_time: DateTime<Utc>,
    /// Hour of day on the configured wall clock.
    pub hour: u32,
    pub day_of_week: Weekday,
    pub is_business_hours: bool,
    pub trusted_network: bool,
    pub threat_level: ThreatLevel,
    pub session_age: Option<Duration>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub request_source: RequestSource,
    /// Free-form attributes supplied by the caller.
    pub additional: BTreeMap<String, String>,
}

impl EnvironmentAttributes {
    /// Creates environment attributes from a timestamp using the default
    /// business-hours window (`[08:00, 18:00)` UTC).
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self::at(ts, &BusinessHours::default())
    }

    /// Creates environment attributes from a timestamp, deriving hour, day
    /// of week and the business-hours flag from `hours`.
    pub fn at(ts: DateTime<Utc>, hours: &BusinessHours) -> Self {
        let local = ts.with_timezone(&hours.offset);
        let hour = local.hour();
        Self {
            current_time: ts,
            hour,
            day_of_week: local.weekday(),
            is_business_hours: hours.contains(hour),
            trusted_network: false,
            threat_level: ThreatLevel::Low,
            session_age: None,
            ip_address: None,
            user_agent: None,
            request_source: RequestSource::Unknown,
            additional: BTreeMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    pub fn with_trusted_network(mut self, trusted: bool) -> Self {
        self.trusted_network = trusted;
        self
    }

    pub fn with_threat_level(mut self, level: ThreatLevel) -> Self {
        self.threat_level = level;
        self
    }

    pub fn with_session_age(mut self, age: Duration) -> Self {
        self.session_age = Some(age);
        self
    }

    pub fn with_source(mut self, source: RequestSource) -> Self {
        self.request_source = source;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.additional.insert(key.to_string(), value.to_string());
        self
    }

    /// Session age truncated to whole minutes, the granularity policies
    /// observe.
    pub fn session_age_minutes(&self) -> Option<u64> {
        self.session_age.map(|age| age.as_secs() / 60)
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Everything the engine needs to decide one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBundle {
    pub subject: SubjectAttributes,
    pub resource: ResourceAttributes,
    pub action: Action,
    pub environment: EnvironmentAttributes,
}

// ============================================================================
// Tests
// ============================================================================
