//! ABAC policy definitions.
//!
//! A policy is a target (a list of conditions that must all hold), an
//! effect, a priority, and the obligations and advice it contributes when it
//! wins. Policies are immutable once stored: the store replaces them
//! wholesale and never patches one in place.

use std::collections::BTreeMap;

use chrono::Weekday;
use palisade_types::{Action, ClearanceLevel, Effect, RequestSource, ResourceType, ThreatLevel};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Obligation id that forces `audit_required` on a decision.
pub const AUDIT_OBLIGATION: &str = "audit-log";

// ============================================================================
// Condition
// ============================================================================

/// A predicate over the four attribute bundles.
///
/// Conditions combine with `And`, `Or` and `Not` to express arbitrary
/// targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Condition {
    // -- Subject conditions --
    /// Primary role equals the value.
    RoleEquals(String),
    /// Primary role is one of the values.
    RoleIn(Vec<String>),
    /// Any held role (primary or additional) equals the value.
    HasRole(String),
    /// Primary role's hierarchy level is at least the value.
    RoleLevelAtLeast(u8),
    /// Any effective department is in the list.
    DepartmentIn(Vec<String>),
    /// Any effective location is in the list.
    LocationIn(Vec<String>),
    ClearanceAtLeast(ClearanceLevel),
    /// Subject clearance is at or above the resource classification.
    ClearanceCoversClassification,
    EmploymentTypeIn(Vec<String>),
    OnDuty,
    HasDelegatedAuthority(String),
    /// Resource amount does not exceed the subject's approval limit.
    /// A resource without an amount always passes; a subject without a
    /// limit fails whenever an amount is present.
    WithinApprovalLimit,
    /// Resource owner is the subject.
    IsOwner,
    /// Resource department is one of the subject's effective departments.
    SameDepartment,
    /// Resource location is one of the subject's effective locations.
    SameLocation,

    // -- Resource conditions --
    ResourceTypeIn(Vec<ResourceType>),
    ResourceIdEquals(String),
    ClassificationAtMost(ClearanceLevel),
    AuditRequired,

    // -- Action conditions --
    ActionIn(Vec<Action>),

    // -- Environment conditions --
    BusinessHoursOnly,
    /// Wall-clock hour in `[start, end)`; wraps past midnight when
    /// `start > end`.
    HourBetween { start: u32, end: u32 },
    DayOfWeekIn(Vec<Weekday>),
    TrustedNetwork,
    ThreatLevelAtMost(ThreatLevel),
    SessionAgeAtMostMinutes(u64),
    RequestSourceIn(Vec<RequestSource>),
    /// Request ip lies in the CIDR block.
    IpInRange(String),
    /// Caller-supplied attribute equals the value.
    AttributeEquals { key: String, value: String },

    // -- Logical combinators --
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Convenience constructor for `Not`.
    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    fn validate(&self, policy_id: &str) -> Result<(), ConfigurationError> {
        match self {
            Condition::And(sub) | Condition::Or(sub) => {
                if sub.is_empty() {
                    return Err(ConfigurationError::EmptyCombinator {
                        policy_id: policy_id.to_string(),
                        combinator: if matches!(self, Condition::And(_)) {
                            "and"
                        } else {
                            "or"
                        },
                    });
                }
                sub.iter().try_for_each(|c| c.validate(policy_id))
            }
            Condition::Not(sub) => sub.validate(policy_id),
            Condition::HourBetween { start, end } => {
                if *start > 23 || *end > 24 || start == end {
                    Err(ConfigurationError::InvalidHourWindow {
                        policy_id: policy_id.to_string(),
                        start: *start,
                        end: *end,
                    })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Obligations and Advice
// ============================================================================

/// A side effect the enforcement point must carry out when acting on a
/// decision with the matching effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub fulfill_on: Effect,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Obligation {
    pub fn new(id: &str, fulfill_on: Effect) -> Self {
        Self {
            id: id.to_string(),
            fulfill_on,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }
}

/// Non-binding guidance attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub id: String,
    pub message: String,
}

impl Advice {
    pub fn new(id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

fn enabled_by_default() -> bool {
    true
}

/// An access control policy.
///
/// `effect` is optional only so that incomplete documents deserialize and
/// can be reported; [`Policy::validate`] rejects a policy without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub effect: Option<Effect>,
    /// Higher values are evaluated (and reported) first.
    #[serde(default)]
    pub priority: u32,
    /// All conditions must hold for the policy to apply.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default)]
    pub advice: Vec<Advice>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Policy {
    /// Creates an enabled policy with no conditions (applies to everything).
    pub fn new(id: &str, effect: Effect) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            effect: Some(effect),
            priority: 0,
            conditions: Vec::new(),
            obligations: Vec::new(),
            advice: Vec::new(),
            enabled: true,
        }
    }

    pub fn permit(id: &str) -> Self {
        Self::new(id, Effect::Permit)
    }

    pub fn deny(id: &str) -> Self {
        Self::new(id, Effect::Deny)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a condition to the target (builder pattern).
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_obligation(mut self, obligation: Obligation) -> Self {
        self.obligations.push(obligation);
        self
    }

    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice.push(advice);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks the policy is well-formed.
    pub fn validate(&self) -> Result<Effect, ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::EmptyPolicyId);
        }
        let effect = self
            .effect
            .ok_or_else(|| ConfigurationError::MissingEffect(self.id.clone()))?;
        self.conditions
            .iter()
            .try_for_each(|c| c.validate(&self.id))?;
        Ok(effect)
    }
}

// ============================================================================
// Standard Policies
// ============================================================================

/// Role names used by the standard policy set.
pub mod roles {
    pub const STAFF: &str = "Staff";
    pub const SUPERVISOR: &str = "Supervisor";
    pub const DEPARTMENT_MANAGER: &str = "Department Manager";
    pub const FINANCIAL_MANAGER: &str = "Financial Manager";
    pub const SYSTEM_ADMINISTRATOR: &str = "System Administrator";
}

/// Baseline policies for the host application's role model.
///
/// Permits:
/// 1. System administrators may do anything (audited)
/// 2. Financial managers review and approve purchase requests
/// 3. Department managers approve within their department and limit
/// 4. Department managers run their department's day-to-day records
/// 5. On-duty staff view and create operational records
/// 6. Supervisors and above view reports
///
/// Denies (override every permit):
/// 1. Subject clearance below resource classification
/// 2. Any non-administrator action at critical threat level
/// 3. Approvals outside business hours
/// 4. Exports from untrusted networks
pub fn standard_policies() -> Vec<Policy> {
    use roles::{DEPARTMENT_MANAGER, FINANCIAL_MANAGER, SYSTEM_ADMINISTRATOR, STAFF};

    vec![
        Policy::permit("system-admin-full-access")
            .named("System administrators have full access")
            .with_priority(100)
            .when(Condition::HasRole(SYSTEM_ADMINISTRATOR.to_string()))
            .with_obligation(Obligation::new(AUDIT_OBLIGATION, Effect::Permit)),
        Policy::permit("financial-manager-purchase-approval")
            .named("Financial managers approve purchase requests")
            .with_priority(60)
            .when(Condition::RoleEquals(FINANCIAL_MANAGER.to_string()))
            .when(Condition::ResourceTypeIn(vec![ResourceType::PurchaseRequest]))
            .when(Condition::ActionIn(vec![
                Action::View,
                Action::Approve,
                Action::Reject,
                Action::Export,
            ]))
            .with_obligation(Obligation::new(AUDIT_OBLIGATION, Effect::Permit)),
        Policy::permit("department-manager-approval")
            .named("Department managers approve within department and limit")
            .with_priority(50)
            .when(Condition::RoleEquals(DEPARTMENT_MANAGER.to_string()))
            .when(Condition::ResourceTypeIn(vec![
                ResourceType::PurchaseRequest,
                ResourceType::WastageReport,
            ]))
            .when(Condition::ActionIn(vec![Action::Approve, Action::Reject]))
            .when(Condition::SameDepartment)
            .when(Condition::WithinApprovalLimit)
            .with_obligation(Obligation::new(AUDIT_OBLIGATION, Effect::Permit))
            .with_advice(Advice::new(
                "escalate-over-limit",
                "Requests above the approval limit must be escalated to a Financial Manager",
            )),
        Policy::permit("department-manager-operations")
            .named("Department managers run departmental records")
            .with_priority(40)
            .when(Condition::RoleEquals(DEPARTMENT_MANAGER.to_string()))
            .when(Condition::ResourceTypeIn(vec![
                ResourceType::PurchaseRequest,
                ResourceType::Inventory,
                ResourceType::WastageReport,
                ResourceType::Report,
            ]))
            .when(Condition::ActionIn(vec![
                Action::View,
                Action::Create,
                Action::Update,
                Action::Export,
            ])),
        Policy::permit("staff-operational-records")
            .named("On-duty staff view and create operational records")
            .with_priority(20)
            .when(Condition::HasRole(STAFF.to_string()))
            .when(Condition::OnDuty)
            .when(Condition::ResourceTypeIn(vec![
                ResourceType::PurchaseRequest,
                ResourceType::Inventory,
                ResourceType::WastageReport,
            ]))
            .when(Condition::ActionIn(vec![Action::View, Action::Create])),
        Policy::permit("supervisor-report-view")
            .named("Supervisors and above view reports")
            .with_priority(20)
            .when(Condition::RoleLevelAtLeast(2))
            .when(Condition::ResourceTypeIn(vec![ResourceType::Report]))
            .when(Condition::ActionIn(vec![Action::View])),
        Policy::deny("clearance-below-classification")
            .named("Deny when clearance does not cover classification")
            .with_priority(200)
            .when(Condition::not(Condition::ClearanceCoversClassification))
            .with_obligation(Obligation::new(AUDIT_OBLIGATION, Effect::Deny)),
        Policy::deny("critical-threat-lockdown")
            .named("Lock out non-administrators at critical threat level")
            .with_priority(190)
            .when(Condition::not(Condition::ThreatLevelAtMost(ThreatLevel::High)))
            .when(Condition::not(Condition::HasRole(
                SYSTEM_ADMINISTRATOR.to_string(),
            ))),
        Policy::deny("after-hours-approval")
            .named("No approvals outside business hours")
            .with_priority(150)
            .when(Condition::ActionIn(vec![Action::Approve, Action::Reject]))
            .when(Condition::not(Condition::BusinessHoursOnly))
            .with_advice(Advice::new(
                "retry-in-business-hours",
                "Approvals are accepted between 08:00 and 18:00",
            )),
        Policy::deny("untrusted-network-export")
            .named("No exports from untrusted networks")
            .with_priority(150)
            .when(Condition::ActionIn(vec![Action::Export]))
            .when(Condition::not(Condition::TrustedNetwork)),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let policy = Policy::permit("p1")
            .named("Example")
            .with_priority(7)
            .when(Condition::OnDuty)
            .with_advice(Advice::new("a", "note"));

        assert_eq!(policy.effect, Some(Effect::Permit));
        assert_eq!(policy.priority, 7);
        assert_eq!(policy.conditions, vec![Condition::OnDuty]);
        assert!(policy.enabled);
        assert_eq!(policy.validate(), Ok(Effect::Permit));
    }

    #[test]
    fn test_validate_missing_effect() {
        let mut policy = Policy::permit("broken");
        policy.effect = None;
        assert_eq!(
            policy.validate(),
            Err(ConfigurationError::MissingEffect("broken".to_string()))
        );
    }

    #[test]
    fn test_validate_empty_id() {
        assert_eq!(
            Policy::deny("  ").validate(),
            Err(ConfigurationError::EmptyPolicyId)
        );
    }

    #[test]
    fn test_validate_nested_empty_combinator() {
        let policy = Policy::permit("p").when(Condition::not(Condition::Or(vec![])));
        assert!(matches!(
            policy.validate(),
            Err(ConfigurationError::EmptyCombinator {
                combinator: "or",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_hour_window() {
        let bad = Policy::permit("p").when(Condition::HourBetween { start: 9, end: 9 });
        assert!(bad.validate().is_err());

        let overnight = Policy::permit("p").when(Condition::HourBetween { start: 22, end: 6 });
        assert!(overnight.validate().is_ok());
    }

    #[test]
    fn test_standard_policies_are_valid_and_unique() {
        let policies = standard_policies();
        let mut ids: Vec<_> = policies.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), policies.len());
        assert!(policies.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let json = r#"{
            "id": "staff-view",
            "effect": "permit",
            "conditions": [
                {"type": "has_role", "value": "Staff"},
                {"type": "action_in", "value": ["view"]},
                {"type": "not", "value": {"type": "business_hours_only"}}
            ]
        }"#;
        let policy: Policy = serde_json::from_str(json).expect("deserialize policy");

        assert_eq!(policy.effect, Some(Effect::Permit));
        assert_eq!(policy.priority, 0);
        assert!(policy.enabled);
        assert_eq!(policy.conditions.len(), 3);
        assert_eq!(
            policy.conditions[1],
            Condition::ActionIn(vec![Action::View])
        );
    }

    #[test]
    fn test_policy_without_effect_deserializes_as_none() {
        let policy: Policy =
            serde_json::from_str(r#"{"id": "half-written"}"#).expect("deserialize policy");
        assert_eq!(policy.effect, None);
        assert!(policy.validate().is_err());
    }
}
