//! Attribute resolution.
//!
//! Turns a [`PermissionCheckRequest`] into an [`AttributeBundle`] using the
//! identity directory, the resource catalog, a clock and the resolver's own
//! environment settings. Anything that cannot be resolved is a
//! [`ResolutionError`], which the service turns into a deny.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use palisade_config::{CatalogEntry, ConfigError, PalisadeConfig};
use palisade_types::{ClearanceLevel, NetworkRange, RequestSource, ResourceType, ThreatLevel};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::attributes::{
    AttributeBundle, BusinessHours, EmploymentAttributes, EnvironmentAttributes,
    ResourceAttributes, SubjectAttributes,
};
use crate::error::ResolutionError;
use crate::request::PermissionCheckRequest;

// ============================================================================
// Directory
// ============================================================================

fn active_by_default() -> bool {
    true
}

/// A user as the identity directory knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    pub role: String,
    pub role_level: u8,
    #[serde(default)]
    pub additional_roles: Vec<String>,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub clearance: ClearanceLevel,
    #[serde(default)]
    pub employment: EmploymentAttributes,
    #[serde(default)]
    pub on_duty: bool,
    #[serde(default)]
    pub delegated_authorities: Vec<String>,
    #[serde(default)]
    pub approval_limit: Option<u64>,
}

impl UserRecord {
    pub fn new(user_id: &str, role: &str, role_level: u8) -> Self {
        Self {
            user_id: user_id.to_string(),
            active: true,
            role: role.to_string(),
            role_level,
            additional_roles: Vec::new(),
            departments: Vec::new(),
            locations: Vec::new(),
            clearance: ClearanceLevel::Public,
            employment: EmploymentAttributes::default(),
            on_duty: false,
            delegated_authorities: Vec::new(),
            approval_limit: None,
        }
    }

    pub fn with_department(mut self, department: &str) -> Self {
        self.departments.push(department.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.locations.push(location.to_string());
        self
    }

    pub fn with_clearance(mut self, clearance: ClearanceLevel) -> Self {
        self.clearance = clearance;
        self
    }

    pub fn with_approval_limit(mut self, limit: u64) -> Self {
        self.approval_limit = Some(limit);
        self
    }

    pub fn on_duty(mut self, on_duty: bool) -> Self {
        self.on_duty = on_duty;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A stored resource. Unset fields fall back to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(default)]
    pub classification: Option<ClearanceLevel>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit_required: Option<bool>,
}

impl ResourceRecord {
    pub fn new(resource_type: ResourceType, resource_id: &str) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.to_string(),
            classification: None,
            owner_id: None,
            department: None,
            location: None,
            amount: None,
            created_at: None,
            updated_at: None,
            audit_required: None,
        }
    }

    pub fn with_classification(mut self, classification: ClearanceLevel) -> Self {
        self.classification = Some(classification);
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

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// The external identity collaborator. Read-only from the engine's side.
pub trait Directory: Send + Sync {
    fn user(&self, user_id: &str) -> Result<UserRecord, ResolutionError>;

    /// `Ok(None)` when the directory holds no record for the resource.
    fn resource(
        &self,
        _resource_type: &ResourceType,
        _resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResolutionError> {
        Ok(None)
    }
}

/// JSON shape accepted by [`InMemoryDirectory::from_json`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryDocument {
    pub users: Vec<UserRecord>,
    pub resources: Vec<ResourceRecord>,
}

type ResourceKey = (ResourceType, String);

/// Directory held in memory, for tests, the CLI, and embedding.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    resources: RwLock<HashMap<ResourceKey, ResourceRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: DirectoryDocument) -> Self {
        let directory = Self::new();
        for user in document.users {
            directory.insert_user(user);
        }
        for resource in document.resources {
            directory.insert_resource(resource);
        }
        directory
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_document(serde_json::from_str(json)?))
    }

    pub fn insert_user(&self, user: UserRecord) {
        let mut users = self
            .users
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        users.insert(user.user_id.clone(), user);
    }

    pub fn insert_resource(&self, resource: ResourceRecord) {
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        resources.insert(
            (resource.resource_type.clone(), resource.resource_id.clone()),
            resource,
        );
    }

    pub fn remove_user(&self, user_id: &str) -> Option<UserRecord> {
        self.users
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(user_id)
    }
}

impl Directory for InMemoryDirectory {
    fn user(&self, user_id: &str) -> Result<UserRecord, ResolutionError> {
        let users = self
            .users
            .read()
            .map_err(|_| ResolutionError::Directory("user table lock poisoned".to_string()))?;
        users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownSubject(user_id.to_string()))
    }

    fn resource(
        &self,
        resource_type: &ResourceType,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResolutionError> {
        let resources = self
            .resources
            .read()
            .map_err(|_| ResolutionError::Directory("resource table lock poisoned".to_string()))?;
        Ok(resources
            .get(&(resource_type.clone(), resource_id.to_string()))
            .cloned())
    }
}

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Builds attribute bundles for requests.
pub struct AttributeResolver {
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    hours: BusinessHours,
    trusted_networks: Vec<NetworkRange>,
    catalog: Vec<CatalogEntry>,
    threat_level: RwLock<ThreatLevel>,
}

impl std::fmt::Debug for AttributeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeResolver")
            .field("hours", &self.hours)
            .field("trusted_networks", &self.trusted_networks)
            .field("catalog_len", &self.catalog.len())
            .field("threat_level", &self.threat_level())
            .finish_non_exhaustive()
    }
}

impl AttributeResolver {
    /// A resolver with the system clock, default business hours, no trusted
    /// networks and the default catalog.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            clock: Arc::new(SystemClock),
            hours: BusinessHours::default(),
            trusted_networks: Vec::new(),
            catalog: palisade_config::CatalogConfig::default().resources,
            threat_level: RwLock::new(ThreatLevel::Low),
        }
    }

    pub fn from_config(
        directory: Arc<dyn Directory>,
        config: &PalisadeConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(directory)
            .with_business_hours(BusinessHours::from_config(&config.engine))
            .with_trusted_networks(config.network.ranges()?)
            .with_catalog(config.catalog.resources.clone()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_business_hours(mut self, hours: BusinessHours) -> Self {
        self.hours = hours;
        self
    }

    pub fn with_trusted_networks(mut self, networks: Vec<NetworkRange>) -> Self {
        self.trusted_networks = networks;
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<CatalogEntry>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn threat_level(&self) -> ThreatLevel {
        *self
            .threat_level
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_threat_level(&self, level: ThreatLevel) {
        let mut current = self.threat_level.write().unwrap_or_else(|poisoned| {
            error!("threat level lock poisoned; recovering");
            poisoned.into_inner()
        });
        *current = level;
    }

    pub fn resolve(
        &self,
        request: &PermissionCheckRequest,
    ) -> Result<AttributeBundle, ResolutionError> {
        let subject = self.resolve_subject(request)?;
        let resource = self.resolve_resource(request)?;
        let environment = self.resolve_environment(request)?;
        debug!(
            user_id = %request.user_id,
            resource_type = %request.resource_type,
            action = %request.action,
            "attributes resolved"
        );
        Ok(AttributeBundle {
            subject,
            resource,
            action: request.action.clone(),
            environment,
        })
    }

    fn resolve_subject(
        &self,
        request: &PermissionCheckRequest,
    ) -> Result<SubjectAttributes, ResolutionError> {
        let user = self.directory.user(&request.user_id)?;
        if !user.active {
            return Err(ResolutionError::InactiveSubject(user.user_id));
        }

        let mut subject = SubjectAttributes::new(&user.user_id, &user.role, user.role_level)
            .with_clearance(user.clearance)
            .on_duty(user.on_duty);
        subject.roles.extend(user.additional_roles);
        subject.departments.extend(user.departments);
        subject.locations.extend(user.locations);
        subject.employment = user.employment;
        subject
            .delegated_authorities
            .extend(user.delegated_authorities);
        subject.approval_limit = user.approval_limit;

        if let Some(context) = &request.context {
            if let Some(department) = &context.department {
                if !subject.departments.contains(department) {
                    return Err(ResolutionError::DepartmentNotAssigned {
                        user_id: subject.user_id,
                        department: department.clone(),
                    });
                }
                subject.active_department = Some(department.clone());
            }
            if let Some(location) = &context.location {
                if !subject.locations.contains(location) {
                    return Err(ResolutionError::LocationNotAssigned {
                        user_id: subject.user_id,
                        location: location.clone(),
                    });
                }
                subject.active_location = Some(location.clone());
            }
        }
        Ok(subject)
    }

    /// Catalog defaults, overlaid with the directory record when one exists.
    /// Types missing from the catalog are treated as restricted and audited.
    fn resolve_resource(
        &self,
        request: &PermissionCheckRequest,
    ) -> Result<ResourceAttributes, ResolutionError> {
        let (classification, catalog_audit) = self
            .catalog
            .iter()
            .find(|e| e.resource_type == request.resource_type)
            .map_or((ClearanceLevel::Restricted, true), |e| {
                (e.classification, e.audit_required)
            });

        let mut resource = ResourceAttributes::new(request.resource_type.clone(), classification)
            .with_audit_required(catalog_audit);

        let Some(resource_id) = &request.resource_id else {
            return Ok(resource);
        };
        resource.resource_id = Some(resource_id.clone());

        if let Some(record) = self
            .directory
            .resource(&request.resource_type, resource_id)?
        {
            resource.classification = record.classification.unwrap_or(classification);
            resource.owner_id = record.owner_id;
            resource.department = record.department;
            resource.location = record.location;
            resource.amount = record.amount;
            resource.created_at = record.created_at;
            resource.updated_at = record.updated_at;
            resource.audit_required = catalog_audit || record.audit_required.unwrap_or(false);
        }
        Ok(resource)
    }

    fn resolve_environment(
        &self,
        request: &PermissionCheckRequest,
    ) -> Result<EnvironmentAttributes, ResolutionError> {
        let now = self.clock.now();
        let mut env =
            EnvironmentAttributes::at(now, &self.hours).with_threat_level(self.threat_level());

        let Some(context) = &request.context else {
            return Ok(env);
        };

        if let Some(raw) = &context.ip_address {
            let ip: IpAddr = raw
                .trim()
                .parse()
                .map_err(|_| ResolutionError::InvalidIpAddress(raw.clone()))?;
            env.ip_address = Some(ip);
            env.trusted_network = self.trusted_networks.iter().any(|r| r.contains(ip));
        }

        if let Some(started) = context.session_started_at {
            // A start in the future counts as a brand-new session.
            env.session_age = Some((now - started).to_std().unwrap_or(Duration::ZERO));
        }

        env.request_source = context
            .source
            .unwrap_or_else(|| RequestSource::from_user_agent(context.user_agent.as_deref()));
        env.user_agent.clone_from(&context.user_agent);
        env.additional.clone_from(&context.additional_attributes);
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestContext;
    use chrono::TimeZone;
    use palisade_types::Action;

    fn ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap()
    }

    fn resolver() -> AttributeResolver {
        let directory = InMemoryDirectory::new();
        directory.insert_user(
            UserRecord::new("alice", "Department Manager", 3)
                .with_department("kitchen")
                .with_department("bar")
                .with_location("downtown")
                .with_clearance(ClearanceLevel::Confidential)
                .with_approval_limit(50_000),
        );
        directory.insert_user(UserRecord::new("gone", "Staff", 1).inactive());
        directory.insert_resource(
            ResourceRecord::new(ResourceType::PurchaseRequest, "pr-1")
                .with_department("kitchen")
                .with_amount(12_000)
                .with_classification(ClearanceLevel::Restricted),
        );

        let config = PalisadeConfig::default();
        AttributeResolver::from_config(Arc::new(directory), &config)
            .unwrap()
            .with_clock(Arc::new(FixedClock(ten_am())))
    }

    #[test]
    fn test_resolves_subject_and_catalog_defaults() {
        let request =
            PermissionCheckRequest::new("alice", ResourceType::Inventory, Action::View);
        let bundle = resolver().resolve(&request).unwrap();

        assert_eq!(bundle.subject.role_level, 3);
        assert_eq!(bundle.subject.departments.len(), 2);
        assert_eq!(bundle.resource.classification, ClearanceLevel::Internal);
        assert!(!bundle.resource.audit_required);
        assert!(bundle.environment.is_business_hours);
        assert_eq!(bundle.environment.request_source, RequestSource::Unknown);
    }

    #[test]
    fn test_resource_record_overrides_catalog() {
        let request =
            PermissionCheckRequest::new("alice", ResourceType::PurchaseRequest, Action::Approve)
                .with_resource_id("pr-1");
        let bundle = resolver().resolve(&request).unwrap();

        assert_eq!(bundle.resource.classification, ClearanceLevel::Restricted);
        assert_eq!(bundle.resource.amount, Some(12_000));
        assert_eq!(bundle.resource.department.as_deref(), Some("kitchen"));
        assert!(bundle.resource.audit_required, "catalog flag is kept");
    }

    #[test]
    fn test_uncataloged_type_is_restricted() {
        let request =
            PermissionCheckRequest::new("alice", ResourceType::custom("menu-item"), Action::View);
        let bundle = resolver().resolve(&request).unwrap();
        assert_eq!(bundle.resource.classification, ClearanceLevel::Restricted);
        assert!(bundle.resource.audit_required);
    }

    #[test]
    fn test_unknown_and_inactive_subjects_fail() {
        let resolver = resolver();
        let unknown = PermissionCheckRequest::new("nobody", ResourceType::Report, Action::View);
        assert_eq!(
            resolver.resolve(&unknown).unwrap_err(),
            ResolutionError::UnknownSubject("nobody".to_string())
        );

        let inactive = PermissionCheckRequest::new("gone", ResourceType::Report, Action::View);
        assert_eq!(
            resolver.resolve(&inactive).unwrap_err(),
            ResolutionError::InactiveSubject("gone".to_string())
        );
    }

    #[test]
    fn test_context_department_must_be_assigned() {
        let resolver = resolver();
        let ok = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(RequestContext::default().with_department("bar"));
        let bundle = resolver.resolve(&ok).unwrap();
        assert_eq!(bundle.subject.active_department.as_deref(), Some("bar"));

        let foreign = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(RequestContext::default().with_department("laundry"));
        assert!(matches!(
            resolver.resolve(&foreign),
            Err(ResolutionError::DepartmentNotAssigned { .. })
        ));

        let elsewhere = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(RequestContext::default().with_location("airport"));
        assert!(matches!(
            resolver.resolve(&elsewhere),
            Err(ResolutionError::LocationNotAssigned { .. })
        ));
    }

    #[test]
    fn test_environment_from_context() {
        let context = RequestContext::default()
            .with_ip("192.168.1.20")
            .with_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")
            .with_session_started_at(ten_am() - chrono::Duration::minutes(45))
            .with_attribute("shift", "night");
        let request = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(context);
        let env = resolver().resolve(&request).unwrap().environment;

        assert!(env.trusted_network);
        assert_eq!(env.request_source, RequestSource::Mobile);
        assert_eq!(env.session_age_minutes(), Some(45));
        assert_eq!(env.additional.get("shift").map(String::as_str), Some("night"));
    }

    #[test]
    fn test_untrusted_and_invalid_ip() {
        let resolver = resolver();
        let public = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(RequestContext::default().with_ip("203.0.113.9"));
        assert!(!resolver.resolve(&public).unwrap().environment.trusted_network);

        let garbage = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View)
            .with_context(RequestContext::default().with_ip("not-an-ip"));
        assert_eq!(
            resolver.resolve(&garbage).unwrap_err(),
            ResolutionError::InvalidIpAddress("not-an-ip".to_string())
        );
    }

    #[test]
    fn test_threat_level_is_applied() {
        let resolver = resolver();
        resolver.set_threat_level(ThreatLevel::High);
        let request = PermissionCheckRequest::new("alice", ResourceType::Report, Action::View);
        assert_eq!(
            resolver.resolve(&request).unwrap().environment.threat_level,
            ThreatLevel::High
        );
    }

    #[test]
    fn test_directory_from_json() {
        let directory = InMemoryDirectory::from_json(
            r#"{
                "users": [
                    {"user_id": "bob", "role": "Staff", "role_level": 1, "departments": ["kitchen"]}
                ],
                "resources": [
                    {"resource_type": "inventory", "resource_id": "inv-9", "owner_id": "bob"}
                ]
            }"#,
        )
        .unwrap();

        let bob = directory.user("bob").unwrap();
        assert!(bob.active);
        assert_eq!(bob.clearance, ClearanceLevel::Public);
        let record = directory
            .resource(&ResourceType::Inventory, "inv-9")
            .unwrap()
            .unwrap();
        assert_eq!(record.owner_id.as_deref(), Some("bob"));
    }
}
