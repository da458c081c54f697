//! ABAC decision engine.
//!
//! Policies are scored in priority order (highest first, ties broken by id).
//! Every policy whose conditions all hold is *applicable*; the applicable set
//! is then combined with deny-overrides:
//!
//! - no applicable policy: deny, `"no applicable policy"`
//! - any applicable deny: deny, named after the highest-priority deny
//! - otherwise: permit, named after the highest-priority permit
//!
//! Obligations and advice are unioned over the applicable policies that share
//! the final effect. Malformed policies and policies whose conditions fault
//! are skipped and logged; neither can abort the decision.
//!
//! The engine reads no clock and keeps no state. The decision timestamp is
//! the environment's `current_time`.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use palisade_types::{Action, Effect, NetworkRange};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attributes::{
    AttributeBundle, EnvironmentAttributes, ResourceAttributes, SubjectAttributes,
};
use crate::error::{EvaluationError, ResolutionError};
use crate::policy::{AUDIT_OBLIGATION, Advice, Condition, Obligation, Policy};

/// Reason attached to every decision where nothing applied.
pub const NO_APPLICABLE_POLICY: &str = "no applicable policy";

// ============================================================================
// Decision
// ============================================================================

/// The outcome of one evaluation. Constructed once and never mutated; the
/// cache hands out copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub effect: Effect,
    /// Never empty.
    pub reason: String,
    pub obligations: Vec<Obligation>,
    pub advice: Vec<Advice>,
    /// Every policy id considered, in evaluation order.
    pub evaluated_policies: Vec<String>,
    /// Ids of the applicable policies, in evaluation order.
    pub matched_policies: Vec<String>,
    /// Ids of policies skipped as malformed or faulting.
    pub skipped_policies: Vec<String>,
    pub evaluation_time: Duration,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
    pub audit_required: bool,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Permit
    }

    /// Deny produced when the request could not be turned into attributes.
    ///
    /// No condition is scored, but `evaluated_policies` still lists the
    /// policy set in evaluation order so the audit trail shows what the
    /// request was held against.
    pub fn unresolved(
        error: &ResolutionError,
        timestamp: DateTime<Utc>,
        policies: &[Policy],
    ) -> Self {
        Self {
            effect: Effect::Deny,
            reason: format!("subject resolution failed: {error}"),
            obligations: Vec::new(),
            advice: Vec::new(),
            evaluated_policies: evaluation_order(policies)
                .into_iter()
                .map(|p| p.id.clone())
                .collect(),
            matched_policies: Vec::new(),
            skipped_policies: Vec::new(),
            evaluation_time: Duration::ZERO,
            cache_hit: false,
            timestamp,
            audit_required: false,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Priority descending, then id.
fn evaluation_order(policies: &[Policy]) -> Vec<&Policy> {
    let mut ordered: Vec<&Policy> = policies.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    ordered
}

/// Decides whether `subject` may perform `action` on `resource` in `env`.
///
/// # Postcondition
///
/// Always returns a decision with a non-empty reason; never panics.
pub fn evaluate_access(
    subject: &SubjectAttributes,
    resource: &ResourceAttributes,
    action: &Action,
    env: &EnvironmentAttributes,
    policies: &[Policy],
) -> AccessDecision {
    let started = Instant::now();
    let target = Target {
        subject,
        resource,
        action,
        env,
    };

    let ordered = evaluation_order(policies);

    let mut evaluated = Vec::with_capacity(ordered.len());
    let mut skipped = Vec::new();
    let mut applicable: Vec<(&Policy, Effect)> = Vec::new();

    for policy in ordered {
        evaluated.push(policy.id.clone());

        if !policy.enabled {
            continue;
        }

        let effect = match policy.validate() {
            Ok(effect) => effect,
            Err(error) => {
                warn!(policy_id = %policy.id, %error, "skipping malformed policy");
                skipped.push(policy.id.clone());
                continue;
            }
        };

        match target.matches_all(&policy.conditions) {
            Ok(true) => {
                debug!(policy_id = %policy.id, %effect, "policy applies");
                applicable.push((policy, effect));
            }
            Ok(false) => {}
            Err(error) => {
                warn!(policy_id = %policy.id, %error, "policy evaluation failed; skipping");
                skipped.push(policy.id.clone());
            }
        }
    }

    let effect = if !applicable.is_empty() && applicable.iter().all(|(_, e)| *e == Effect::Permit)
    {
        Effect::Permit
    } else {
        Effect::Deny
    };

    // Policies that contribute the reason, obligations and advice.
    let winners: Vec<&Policy> = applicable
        .iter()
        .filter(|(_, e)| *e == effect)
        .map(|(p, _)| *p)
        .collect();

    let reason = match (winners.first(), effect) {
        (None, _) => NO_APPLICABLE_POLICY.to_string(),
        (Some(p), Effect::Deny) => format!("denied by policy '{}'", p.id),
        (Some(p), Effect::Permit) => format!("permitted by policy '{}'", p.id),
    };

    let obligations = merge_obligations(&winners, effect);
    let advice = merge_advice(&winners);
    let audit_required =
        resource.audit_required || obligations.iter().any(|o| o.id == AUDIT_OBLIGATION);

    AccessDecision {
        effect,
        reason,
        obligations,
        advice,
        evaluated_policies: evaluated,
        matched_policies: applicable.iter().map(|(p, _)| p.id.clone()).collect(),
        skipped_policies: skipped,
        evaluation_time: started.elapsed(),
        cache_hit: false,
        timestamp: env.current_time,
        audit_required,
    }
}

/// [`evaluate_access`] over a resolved bundle.
pub fn evaluate_bundle(bundle: &AttributeBundle, policies: &[Policy]) -> AccessDecision {
    evaluate_access(
        &bundle.subject,
        &bundle.resource,
        &bundle.action,
        &bundle.environment,
        policies,
    )
}

fn merge_obligations(winners: &[&Policy], effect: Effect) -> Vec<Obligation> {
    let mut seen = BTreeSet::new();
    winners
        .iter()
        .flat_map(|p| p.obligations.iter())
        .filter(|o| o.fulfill_on == effect)
        .filter(|o| seen.insert(o.id.clone()))
        .cloned()
        .collect()
}

fn merge_advice(winners: &[&Policy]) -> Vec<Advice> {
    let mut seen = BTreeSet::new();
    winners
        .iter()
        .flat_map(|p| p.advice.iter())
        .filter(|a| seen.insert(a.id.clone()))
        .cloned()
        .collect()
}

// ============================================================================
// Condition Evaluation
// ============================================================================

struct Target<'a> {
    subject: &'a SubjectAttributes,
    resource: &'a ResourceAttributes,
    action: &'a Action,
    env: &'a EnvironmentAttributes,
}

impl Target<'_> {
    /// Conjunction with left-to-right short-circuit.
    fn matches_all(&self, conditions: &[Condition]) -> Result<bool, EvaluationError> {
        for condition in conditions {
            if !self.matches(condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches(&self, condition: &Condition) -> Result<bool, EvaluationError> {
        let Target {
            subject,
            resource,
            action,
            env,
        } = *self;

        let result = match condition {
            // -- Subject conditions --
            Condition::RoleEquals(role) => subject.role == *role,
            Condition::RoleIn(roles) => roles.contains(&subject.role),
            Condition::HasRole(role) => subject.role == *role || subject.roles.contains(role),
            Condition::RoleLevelAtLeast(level) => subject.role_level >= *level,
            Condition::DepartmentIn(departments) => subject
                .effective_departments()
                .any(|d| departments.contains(d)),
            Condition::LocationIn(locations) => {
                subject.effective_locations().any(|l| locations.contains(l))
            }
            Condition::ClearanceAtLeast(level) => subject.clearance >= *level,
            Condition::ClearanceCoversClassification => {
                subject.clearance.covers(resource.classification)
            }
            Condition::EmploymentTypeIn(types) => {
                types.contains(&subject.employment.employment_type)
            }
            Condition::OnDuty => subject.on_duty,
            Condition::HasDelegatedAuthority(authority) => {
                subject.delegated_authorities.contains(authority)
            }
            Condition::WithinApprovalLimit => match (resource.amount, subject.approval_limit) {
                (None, _) => true,
                (Some(amount), Some(limit)) => amount <= limit,
                (Some(_), None) => false,
            },
            Condition::IsOwner => resource.owner_id.as_deref() == Some(subject.user_id.as_str()),
            Condition::SameDepartment => resource
                .department
                .as_ref()
                .is_some_and(|d| subject.effective_departments().any(|s| s == d)),
            Condition::SameLocation => resource
                .location
                .as_ref()
                .is_some_and(|l| subject.effective_locations().any(|s| s == l)),

            // -- Resource conditions --
            Condition::ResourceTypeIn(types) => types.contains(&resource.resource_type),
            Condition::ResourceIdEquals(id) => resource.resource_id.as_deref() == Some(id.as_str()),
            Condition::ClassificationAtMost(level) => resource.classification <= *level,
            Condition::AuditRequired => resource.audit_required,

            // -- Action conditions --
            Condition::ActionIn(actions) => actions.contains(action),

            // -- Environment conditions --
            Condition::BusinessHoursOnly => env.is_business_hours,
            Condition::HourBetween { start, end } => {
                if start < end {
                    (*start..*end).contains(&env.hour)
                } else {
                    env.hour >= *start || env.hour < *end
                }
            }
            Condition::DayOfWeekIn(days) => days.contains(&env.day_of_week),
            Condition::TrustedNetwork => env.trusted_network,
            Condition::ThreatLevelAtMost(level) => env.threat_level <= *level,
            Condition::SessionAgeAtMostMinutes(max) => {
                let minutes = env
                    .session_age_minutes()
                    .ok_or_else(|| EvaluationError::MissingAttribute("session_age".to_string()))?;
                minutes <= *max
            }
            Condition::RequestSourceIn(sources) => sources.contains(&env.request_source),
            Condition::IpInRange(cidr) => {
                let range: NetworkRange = cidr
                    .parse()
                    .map_err(|_| EvaluationError::InvalidNetworkRange(cidr.clone()))?;
                let ip = env.ip_address.ok_or(EvaluationError::MissingIpAddress)?;
                range.contains(ip)
            }
            Condition::AttributeEquals { key, value } => {
                let actual = env
                    .additional
                    .get(key)
                    .ok_or_else(|| EvaluationError::MissingAttribute(key.clone()))?;
                actual == value
            }

            // -- Logical combinators --
            Condition::And(sub) => self.matches_all(sub)?,
            Condition::Or(sub) => {
                let mut any = false;
                for c in sub {
                    if self.matches(c)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            Condition::Not(sub) => !self.matches(sub)?,
        };

        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================
