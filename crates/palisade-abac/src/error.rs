//! Error taxonomy for the decision engine.
//!
//! None of these errors escape a permission check: each one is folded into a
//! deny decision (resolution), a skipped policy (evaluation, configuration),
//! or reported to the administrator that loaded the policy set.

use thiserror::Error;

/// The subject, resource, or request context could not be turned into
/// attributes. Always produces a deny.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("unknown subject '{0}'")]
    UnknownSubject(String),

    #[error("subject '{0}' is inactive")]
    InactiveSubject(String),

    #[error("subject '{user_id}' is not assigned to department '{department}'")]
    DepartmentNotAssigned { user_id: String, department: String },

    #[error("subject '{user_id}' is not assigned to location '{location}'")]
    LocationNotAssigned { user_id: String, location: String },

    #[error("invalid ip address '{0}'")]
    InvalidIpAddress(String),

    /// The directory collaborator itself failed (e.g. it is unavailable).
    #[error("directory error: {0}")]
    Directory(String),
}

/// A fault while scoring one policy. The policy is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),

    #[error("request carries no ip address")]
    MissingIpAddress,

    #[error("invalid network range '{0}'")]
    InvalidNetworkRange(String),
}

/// A malformed policy. The policy is skipped (or rejected by the store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("policy id must not be empty")]
    EmptyPolicyId,

    #[error("policy '{0}' has no effect")]
    MissingEffect(String),

    #[error("policy '{policy_id}' contains an empty {combinator} combinator")]
    EmptyCombinator {
        policy_id: String,
        combinator: &'static str,
    },

    #[error("policy '{policy_id}' has invalid hour window [{start}, {end})")]
    InvalidHourWindow {
        policy_id: String,
        start: u32,
        end: u32,
    },

    #[error("policy '{0}' already exists")]
    DuplicatePolicy(String),

    #[error("policy document entry {index} could not be parsed: {message}")]
    Parse { index: usize, message: String },
}

/// Errors returned by the few façade operations that can refuse to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },
}

/// Failures exporting the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize audit entries: {0}")]
    Serialization(#[from] serde_json::Error),
}
