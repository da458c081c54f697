//! # palisade-abac: Attribute-Based Access Control
//!
//! The decision engine every protected operation consults before acting.
//! Subject, resource, action and environment attributes are combined against
//! a versioned policy set into one auditable permit/deny decision.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  PermissionService                           │
//! │  (single check, bulk, any/all, enumeration)  │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  AttributeResolver                           │
//! │  Directory + catalog + clock → bundles       │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  DecisionCache  (fingerprint, generation)    │
//! └─────────────────┬───────────────────────────┘
//!                   │ miss
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  evaluate_access (deny-overrides)            │
//! │  against a PolicyStore snapshot              │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  AuditLog                                    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every path ends in an [`AccessDecision`]. Anything that cannot be
//! established with certainty (unknown user, malformed policy, missing
//! attribute) ends in a deny with a non-empty reason.
//!
//! ## Examples
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use palisade_abac::{
//!     FixedClock, InMemoryDirectory, PermissionCheckRequest, PermissionService, UserRecord,
//!     standard_policies,
//! };
//! use palisade_types::{Action, ClearanceLevel, ResourceType};
//!
//! let directory = InMemoryDirectory::new();
//! directory.insert_user(
//!     UserRecord::new("fm-1", "Financial Manager", 4).with_clearance(ClearanceLevel::Restricted),
//! );
//!
//! let nine_am = Utc.with_ymd_and_hms(2025, 1, 8, 9, 0, 0).unwrap();
//! let service = PermissionService::builder()
//!     .directory(Arc::new(directory))
//!     .clock(Arc::new(FixedClock(nine_am)))
//!     .build()
//!     .unwrap();
//! service.policy_store().replace_all(standard_policies()).unwrap();
//!
//! let request = PermissionCheckRequest::new("fm-1", ResourceType::PurchaseRequest, Action::Approve);
//! assert!(service.check_permission(&request).allowed);
//! ```

pub mod attributes;
pub mod audit;
pub mod cache;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod request;
pub mod resolver;
pub mod service;
pub mod store;

pub use attributes::{
    AttributeBundle, BusinessHours, EmploymentAttributes, EnvironmentAttributes,
    ResourceAttributes, SubjectAttributes,
};
pub use audit::{AuditEntry, AuditLog, AuditQuery};
pub use cache::{CacheStats, DecisionCache};
pub use error::{AuditError, ConfigurationError, EvaluationError, ResolutionError, ServiceError};
pub use evaluator::{AccessDecision, NO_APPLICABLE_POLICY, evaluate_access, evaluate_bundle};
pub use policy::{Advice, Condition, Obligation, Policy, standard_policies};
pub use request::{
    ActionPermission, BulkPermissionRequest, BulkPermissionResult, EffectivePermission,
    PermissionCheckRequest, PermissionProbe, PermissionResult, RequestContext,
};
pub use resolver::{
    AttributeResolver, Clock, Directory, DirectoryDocument, FixedClock, InMemoryDirectory,
    ResourceRecord, SystemClock, UserRecord,
};
pub use service::{CancellationToken, PermissionService, PermissionServiceBuilder};
pub use store::{LoadReport, PolicySnapshot, PolicyStore};
