//! Property-based tests for the decision engine and façade.
//!
//! Covers the invariants every decision must satisfy: default deny,
//! deny-overrides, determinism, cache correctness, bulk ordering and
//! fail-closed resolution.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use palisade_abac::{
    AttributeBundle, BulkPermissionRequest, Condition, DecisionCache, EnvironmentAttributes,
    FixedClock, InMemoryDirectory, NO_APPLICABLE_POLICY, PermissionCheckRequest,
    PermissionProbe, PermissionService, Policy, ResourceAttributes, SubjectAttributes,
    UserRecord, evaluate_access, evaluate_bundle, standard_policies,
};
use palisade_config::PalisadeConfig;
use palisade_types::{Action, ClearanceLevel, Effect, ResourceType, ThreatLevel};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::BUILT_IN.to_vec())
}

fn resource_type() -> impl Strategy<Value = ResourceType> {
    prop::sample::select(ResourceType::BUILT_IN.to_vec())
}

fn clearance() -> impl Strategy<Value = ClearanceLevel> {
    prop::sample::select(ClearanceLevel::ALL.to_vec())
}

fn threat() -> impl Strategy<Value = ThreatLevel> {
    prop::sample::select(vec![
        ThreatLevel::Low,
        ThreatLevel::Elevated,
        ThreatLevel::High,
        ThreatLevel::Critical,
    ])
}

fn role() -> impl Strategy<Value = (String, u8)> {
    prop::sample::select(vec![
        ("Staff".to_string(), 1u8),
        ("Supervisor".to_string(), 2),
        ("Department Manager".to_string(), 3),
        ("Financial Manager".to_string(), 4),
        ("System Administrator".to_string(), 5),
    ])
}

prop_compose! {
    fn bundle()(
        (role, level) in role(),
        subject_clearance in clearance(),
        on_duty in any::<bool>(),
        limit in prop::option::of(0u64..100_000),
        resource_type in resource_type(),
        classification in clearance(),
        amount in prop::option::of(0u64..100_000),
        same_department in any::<bool>(),
        action in action(),
        (hour, minute) in (0u32..24, 0u32..60),
        trusted in any::<bool>(),
        threat in threat(),
    ) -> AttributeBundle {
        let mut subject = SubjectAttributes::new("u-prop", &role, level)
            .with_department("kitchen")
            .with_clearance(subject_clearance)
            .on_duty(on_duty);
        subject.approval_limit = limit;

        let mut resource = ResourceAttributes::new(resource_type, classification)
            .with_department(if same_department { "kitchen" } else { "bar" });
        resource.amount = amount;

        let ts = Utc.with_ymd_and_hms(2025, 1, 8, hour, minute, 0).unwrap();
        let environment = EnvironmentAttributes::from_timestamp(ts)
            .with_trusted_network(trusted)
            .with_threat_level(threat);

        AttributeBundle { subject, resource, action, environment }
    }
}

/// Policies that apply to every request, with arbitrary priorities.
fn universal(prefix: &str, effect: Effect, priorities: &[u32]) -> Vec<Policy> {
    priorities
        .iter()
        .enumerate()
        .map(|(i, p)| Policy::new(&format!("{prefix}-{i}"), effect).with_priority(*p))
        .collect()
}

fn service() -> PermissionService {
    let directory = InMemoryDirectory::new();
    directory.insert_user(
        UserRecord::new("sup-1", "Supervisor", 2)
            .with_department("kitchen")
            .with_clearance(ClearanceLevel::Restricted),
    );
    let mut config = PalisadeConfig::default();
    config.bulk.chunk_size = 3;

    let service = PermissionService::builder()
        .directory(Arc::new(directory))
        .clock(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap(),
        )))
        .config(config)
        .build()
        .unwrap();

    // One permit per cell so that every reason names its cell.
    let mut policies = Vec::new();
    for resource_type in ResourceType::BUILT_IN {
        for action in [Action::View, Action::Export] {
            policies.push(
                Policy::permit(&format!("permit-{resource_type}-{action}"))
                    .when(Condition::ResourceTypeIn(vec![resource_type.clone()]))
                    .when(Condition::ActionIn(vec![action])),
            );
        }
    }
    service.policy_store().replace_all(policies).unwrap();
    service
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_no_match_denies(
        bundle in bundle(),
        effects in prop::collection::vec(any::<bool>(), 0..8),
    ) {
        let policies: Vec<Policy> = effects
            .iter()
            .enumerate()
            .map(|(i, permit)| {
                let effect = if *permit { Effect::Permit } else { Effect::Deny };
                Policy::new(&format!("never-{i}"), effect)
                    .when(Condition::RoleEquals("nobody".to_string()))
            })
            .collect();

        let decision = evaluate_bundle(&bundle, &policies);
        prop_assert_eq!(decision.effect, Effect::Deny);
        prop_assert_eq!(decision.reason.as_str(), NO_APPLICABLE_POLICY);
        prop_assert_eq!(decision.evaluated_policies.len(), policies.len());
    }

    #[test]
    fn prop_any_deny_overrides_permits(
        bundle in bundle(),
        permit_priorities in prop::collection::vec(0u32..1000, 0..10),
        deny_priorities in prop::collection::vec(0u32..1000, 1..4),
    ) {
        let mut policies = universal("permit", Effect::Permit, &permit_priorities);
        policies.extend(universal("deny", Effect::Deny, &deny_priorities));

        let decision = evaluate_bundle(&bundle, &policies);
        prop_assert!(!decision.is_allowed());
        prop_assert!(decision.reason.starts_with("denied by policy 'deny-"));
    }

    #[test]
    fn prop_evaluation_is_deterministic_and_order_independent(
        bundle in bundle(),
        rotate in 0usize..10,
    ) {
        let policies = standard_policies();
        let mut rotated = policies.clone();
        rotated.rotate_left(rotate % policies.len());

        let first = evaluate_bundle(&bundle, &policies);
        let second = evaluate_bundle(&bundle, &policies);
        let reordered = evaluate_bundle(&bundle, &rotated);

        prop_assert_eq!(first.effect, second.effect);
        prop_assert_eq!(&first.reason, &second.reason);
        prop_assert_eq!(first.effect, reordered.effect);
        prop_assert_eq!(&first.reason, &reordered.reason);
        prop_assert_eq!(&first.evaluated_policies, &reordered.evaluated_policies);
        prop_assert!(!first.reason.is_empty());
    }

    #[test]
    fn prop_cache_hit_equals_fresh_evaluation(
        bundle in bundle(),
        minute in 0u32..60,
    ) {
        let policies = standard_policies();
        let cache = DecisionCache::new(16);
        let key = palisade_abac::cache::fingerprint(&bundle).unwrap();
        cache.insert(key, 7, &evaluate_bundle(&bundle, &policies));

        // Same hour, different minute: same fingerprint.
        let mut later = bundle.clone();
        let ts = Utc
            .with_ymd_and_hms(2025, 1, 8, bundle.environment.hour, minute, 0)
            .unwrap();
        later.environment.current_time = ts;
        let later_key = palisade_abac::cache::fingerprint(&later).unwrap();
        prop_assert_eq!(key, later_key);

        let hit = cache.get(&later_key, 7, ts).unwrap();
        let fresh = evaluate_bundle(&later, &policies);
        prop_assert!(hit.cache_hit);
        prop_assert_eq!(hit.effect, fresh.effect);
        prop_assert_eq!(&hit.reason, &fresh.reason);
        prop_assert_eq!(&hit.obligations, &fresh.obligations);
        prop_assert_eq!(&hit.advice, &fresh.advice);
        prop_assert_eq!(&hit.matched_policies, &fresh.matched_policies);
        prop_assert_eq!(hit.audit_required, fresh.audit_required);
        prop_assert_eq!(hit.timestamp, fresh.timestamp);
    }

    #[test]
    fn prop_bulk_results_follow_request_order(
        cells in prop::collection::vec(
            (resource_type(), prop::sample::select(vec![Action::View, Action::Export, Action::Delete])),
            0..20,
        ),
    ) {
        let service = service();
        let checks: Vec<PermissionProbe> = cells
            .iter()
            .map(|(t, a)| PermissionProbe::new(t.clone(), a.clone()))
            .collect();

        let bulk = service.check_bulk_permissions(&BulkPermissionRequest::new("sup-1", checks));
        prop_assert!(bulk.completed);
        prop_assert_eq!(bulk.results.len(), cells.len());

        prop_assert_eq!(bulk.finished(), cells.len());

        for ((resource_type, action), result) in cells.iter().zip(&bulk.results) {
            let result = result.as_ref().unwrap();
            if *action == Action::Delete {
                prop_assert!(!result.allowed);
            } else {
                prop_assert!(result.allowed);
                let expected = format!("permitted by policy 'permit-{resource_type}-{action}'");
                prop_assert_eq!(&result.reason, &expected);
            }
        }
    }

    #[test]
    fn prop_unresolvable_subject_is_denied(
        user_id in "[a-z]{1,12}",
        resource_type in resource_type(),
        action in action(),
    ) {
        let service = service();
        service.policy_store().replace_all([Policy::permit("everything")]).unwrap();

        let result = service.check_permission(&PermissionCheckRequest::new(&user_id, resource_type, action));
        prop_assert!(!result.allowed);
        prop_assert!(result.reason.starts_with("subject resolution failed"));
    }
}

#[test]
fn test_universal_permit_with_no_deny_allows() {
    let ts = Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap();
    let decision = evaluate_access(
        &SubjectAttributes::new("u", "Staff", 1),
        &ResourceAttributes::new(ResourceType::Inventory, ClearanceLevel::Public),
        &Action::View,
        &EnvironmentAttributes::from_timestamp(ts),
        &universal("permit", Effect::Permit, &[5, 1, 9]),
    );
    assert!(decision.is_allowed());
    assert_eq!(decision.reason, "permitted by policy 'permit-2'");
    assert_eq!(decision.matched_policies, vec!["permit-2", "permit-0", "permit-1"]);
}
