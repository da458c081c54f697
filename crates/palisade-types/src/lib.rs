//! # palisade-types: attribute catalogs
//!
//! Closed vocabularies shared by the configuration layer and the decision
//! engine. Resource types and actions are closed enumerations with an explicit
//! `Custom` extension variant, so matching on them is exhaustive and a
//! deployment-specific catalog entry never silently collapses into a default.
//!
//! ```
//! use palisade_types::{Action, ClearanceLevel, ResourceType};
//!
//! let rt: ResourceType = "purchase-request".parse().unwrap();
//! assert_eq!(rt, ResourceType::PurchaseRequest);
//!
//! let custom: Action = "reconcile".parse().unwrap();
//! assert_eq!(custom, Action::Custom("reconcile".to_string()));
//!
//! assert!(ClearanceLevel::Restricted > ClearanceLevel::Internal);
//! ```

use std::fmt::{self, Display};
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Effect
// ============================================================================

/// Terminal outcome of a policy match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Grant access.
    Permit,
    /// Refuse access.
    Deny,
}

impl Default for Effect {
    /// Defaults to `Deny`: nothing is allowed unless a policy says so.
    fn default() -> Self {
        Self::Deny
    }
}

impl Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => write!(f, "permit"),
            Effect::Deny => write!(f, "deny"),
        }
    }
}

// ============================================================================
// Clearance Level
// ============================================================================

/// Ordinal sensitivity scale used for both subject clearance and resource
/// classification.
///
/// Ordering: `Public < Internal < Confidential < Restricted < TopSecret`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceLevel {
    /// Publicly shareable information.
    #[default]
    Public,
    /// Internal operational data.
    Internal,
    /// Business-confidential data (budgets, supplier pricing).
    Confidential,
    /// Restricted data (payroll, personal records).
    Restricted,
    /// Highest sensitivity.
    TopSecret,
}

impl ClearanceLevel {
    /// All levels, least sensitive first.
    pub const ALL: [ClearanceLevel; 5] = [
        ClearanceLevel::Public,
        ClearanceLevel::Internal,
        ClearanceLevel::Confidential,
        ClearanceLevel::Restricted,
        ClearanceLevel::TopSecret,
    ];

    /// Numeric rank on the ordinal scale (0 = public).
    pub fn rank(self) -> u8 {
        match self {
            ClearanceLevel::Public => 0,
            ClearanceLevel::Internal => 1,
            ClearanceLevel::Confidential => 2,
            ClearanceLevel::Restricted => 3,
            ClearanceLevel::TopSecret => 4,
        }
    }

    /// Returns `true` when a subject holding `self` may see data classified
    /// as `classification`.
    pub fn covers(self, classification: ClearanceLevel) -> bool {
        self >= classification
    }
}

impl Display for ClearanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClearanceLevel::Public => "public",
            ClearanceLevel::Internal => "internal",
            ClearanceLevel::Confidential => "confidential",
            ClearanceLevel::Restricted => "restricted",
            ClearanceLevel::TopSecret => "top_secret",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing a closed (non-extensible) catalog value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for ClearanceLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "public" => Ok(ClearanceLevel::Public),
            "internal" => Ok(ClearanceLevel::Internal),
            "confidential" => Ok(ClearanceLevel::Confidential),
            "restricted" => Ok(ClearanceLevel::Restricted),
            "top_secret" | "topsecret" => Ok(ClearanceLevel::TopSecret),
            _ => Err(UnknownVariant {
                kind: "clearance level",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Resource Type
// ============================================================================

/// The kind of object an action targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    PurchaseRequest,
    Inventory,
    Department,
    Location,
    WastageReport,
    Report,
    User,
    Role,
    Policy,
    AuditLog,
    /// Deployment-specific resource type.
    Custom(String),
}

impl ResourceType {
    /// Every built-in resource type (custom types come from configuration).
    pub const BUILT_IN: [ResourceType; 10] = [
        ResourceType::PurchaseRequest,
        ResourceType::Inventory,
        ResourceType::Department,
        ResourceType::Location,
        ResourceType::WastageReport,
        ResourceType::Report,
        ResourceType::User,
        ResourceType::Role,
        ResourceType::Policy,
        ResourceType::AuditLog,
    ];

    /// Parses `name`, so a built-in name yields the built-in variant and
    /// never a `Custom` holding it.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ResourceType::Custom(_))
    }

    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::PurchaseRequest => "purchase-request",
            ResourceType::Inventory => "inventory",
            ResourceType::Department => "department",
            ResourceType::Location => "location",
            ResourceType::WastageReport => "wastage-report",
            ResourceType::Report => "report",
            ResourceType::User => "user",
            ResourceType::Role => "role",
            ResourceType::Policy => "policy",
            ResourceType::AuditLog => "audit-log",
            ResourceType::Custom(name) => name,
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let parsed = match normalized.as_str() {
            "purchase-request" => ResourceType::PurchaseRequest,
            "inventory" => ResourceType::Inventory,
            "department" => ResourceType::Department,
            "location" => ResourceType::Location,
            "wastage-report" => ResourceType::WastageReport,
            "report" => ResourceType::Report,
            "user" => ResourceType::User,
            "role" => ResourceType::Role,
            "policy" => ResourceType::Policy,
            "audit-log" => ResourceType::AuditLog,
            _ => ResourceType::Custom(normalized),
        };
        Ok(parsed)
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// Action
// ============================================================================

/// The operation a subject wants to perform on a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Export,
    Import,
    Manage,
    /// Deployment-specific action.
    Custom(String),
}

impl Action {
    /// Every built-in action.
    pub const BUILT_IN: [Action; 9] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Approve,
        Action::Reject,
        Action::Export,
        Action::Import,
        Action::Manage,
    ];

    /// Parses `name`; built-in names and aliases yield built-in variants.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Action::Custom(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Export => "export",
            Action::Import => "import",
            Action::Manage => "manage",
            Action::Custom(name) => name,
        }
    }

    /// Returns `true` for actions that change state.
    pub fn is_mutating(&self) -> bool {
        match self {
            Action::View | Action::Export => false,
            Action::Create
            | Action::Update
            | Action::Delete
            | Action::Approve
            | Action::Reject
            | Action::Import
            | Action::Manage
            | Action::Custom(_) => true,
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let parsed = match normalized.as_str() {
            "view" | "read" => Action::View,
            "create" => Action::Create,
            "update" | "edit" => Action::Update,
            "delete" => Action::Delete,
            "approve" => Action::Approve,
            "reject" => Action::Reject,
            "export" => Action::Export,
            "import" => Action::Import,
            "manage" => Action::Manage,
            _ => Action::Custom(normalized),
        };
        Ok(parsed)
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// Environment vocabularies
// ============================================================================

/// Current security posture reported by the host application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    #[default]
    Low,
    Elevated,
    High,
    Critical,
}

impl Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Elevated => "elevated",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for ThreatLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ThreatLevel::Low),
            "elevated" => Ok(ThreatLevel::Elevated),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            _ => Err(UnknownVariant {
                kind: "threat level",
                value: s.to_string(),
            }),
        }
    }
}

/// Where a request entered the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSource {
    Web,
    Mobile,
    Api,
    Internal,
    #[default]
    Unknown,
}

impl RequestSource {
    /// Best-effort classification from a `User-Agent` header.
    ///
    /// A missing header is treated as a programmatic API client.
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        match user_agent {
            None => RequestSource::Api,
            Some(ua) if ua.trim().is_empty() => RequestSource::Api,
            Some(ua) => {
                let lower = ua.to_ascii_lowercase();
                if lower.contains("mobi") || lower.contains("android") || lower.contains("iphone")
                {
                    RequestSource::Mobile
                } else if lower.contains("mozilla") {
                    RequestSource::Web
                } else {
                    RequestSource::Api
                }
            }
        }
    }
}

impl Display for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestSource::Web => "web",
            RequestSource::Mobile => "mobile",
            RequestSource::Api => "api",
            RequestSource::Internal => "internal",
            RequestSource::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Network Range
// ============================================================================

/// An IPv4 or IPv6 CIDR block such as `10.0.0.0/8`.
///
/// A bare address parses as a single-host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkRange {
    network: IpAddr,
    prefix_len: u8,
}

/// Error returned when a CIDR string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidNetworkRange(pub String);

impl Display for InvalidNetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid network range '{}'", self.0)
    }
}

impl std::error::Error for InvalidNetworkRange {}

impl NetworkRange {
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns `true` if `addr` lies inside this range.
    ///
    /// Addresses of the other family never match.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn prefix_mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

impl FromStr for NetworkRange {
    type Err = InvalidNetworkRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidNetworkRange(s.to_string());
        let trimmed = s.trim();
        let (addr_part, prefix_part) = match trimmed.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (trimmed, None),
        };

        let network: IpAddr = addr_part.parse().map_err(|_| invalid())?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix_part {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return Err(invalid());
        }

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clearance_ordering() {
        assert!(ClearanceLevel::Public < ClearanceLevel::Internal);
        assert!(ClearanceLevel::Internal < ClearanceLevel::Confidential);
        assert!(ClearanceLevel::Confidential < ClearanceLevel::Restricted);
        assert!(ClearanceLevel::Restricted < ClearanceLevel::TopSecret);
        assert!(ClearanceLevel::Restricted.covers(ClearanceLevel::Confidential));
        assert!(!ClearanceLevel::Internal.covers(ClearanceLevel::Restricted));
    }

    #[test]
    fn test_clearance_serde_names() {
        let json = serde_json::to_string(&ClearanceLevel::TopSecret).unwrap();
        assert_eq!(json, "\"top_secret\"");
        assert_eq!(
            "Top-Secret".parse::<ClearanceLevel>().unwrap(),
            ClearanceLevel::TopSecret
        );
        assert!("classified".parse::<ClearanceLevel>().is_err());
    }

    #[test]
    fn test_resource_type_parsing() {
        assert_eq!(
            "purchase_request".parse::<ResourceType>().unwrap(),
            ResourceType::PurchaseRequest
        );
        assert_eq!(
            ResourceType::from("menu-item"),
            ResourceType::Custom("menu-item".to_string())
        );
    }

    #[test]
    fn test_resource_type_serializes_as_name() {
        let json = serde_json::to_string(&ResourceType::WastageReport).unwrap();
        assert_eq!(json, "\"wastage-report\"");

        let custom: ResourceType = serde_json::from_str("\"menu-item\"").unwrap();
        assert_eq!(custom, ResourceType::custom("menu-item"));
    }

    #[test]
    fn test_custom_constructor_yields_builtins_for_known_names() {
        assert_eq!(Action::custom("view"), Action::View);
        assert_eq!(Action::custom(" READ "), Action::View);
        assert!(!Action::custom("view").is_custom());
        assert_eq!(ResourceType::custom("report"), ResourceType::Report);
        assert_eq!(ResourceType::custom("Audit_Log"), ResourceType::AuditLog);
        assert!(ResourceType::custom("menu-item").is_custom());
    }

    #[test]
    fn test_custom_names_are_case_folded() {
        assert_eq!(ResourceType::from("Menu-Item"), ResourceType::custom("menu-item"));
        assert_eq!(ResourceType::from("menu_item").as_str(), "menu-item");
        assert_eq!(Action::from("Reconcile"), Action::custom("reconcile"));
        assert_eq!(Action::from("  RECONCILE").as_str(), "reconcile");
    }

    #[test]
    fn test_action_aliases() {
        assert_eq!(Action::from("read"), Action::View);
        assert_eq!(Action::from("Edit"), Action::Update);
        assert!(Action::Approve.is_mutating());
        assert!(!Action::Export.is_mutating());
    }

    #[test]
    fn test_request_source_from_user_agent() {
        assert_eq!(RequestSource::from_user_agent(None), RequestSource::Api);
        assert_eq!(
            RequestSource::from_user_agent(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")),
            RequestSource::Mobile
        );
        assert_eq!(
            RequestSource::from_user_agent(Some("Mozilla/5.0 (X11; Linux x86_64)")),
            RequestSource::Web
        );
        assert_eq!(
            RequestSource::from_user_agent(Some("curl/8.4.0")),
            RequestSource::Api
        );
    }

    #[test]
    fn test_network_range_contains() {
        let range: NetworkRange = "192.168.0.0/16".parse().unwrap();
        assert!(range.contains("192.168.4.20".parse().unwrap()));
        assert!(!range.contains("10.0.0.1".parse().unwrap()));
        assert!(!range.contains("::1".parse().unwrap()));

        let host: NetworkRange = "10.1.2.3".parse().unwrap();
        assert_eq!(host.prefix_len(), 32);
        assert!(host.contains("10.1.2.3".parse().unwrap()));
        assert!(!host.contains("10.1.2.4".parse().unwrap()));

        let v6: NetworkRange = "fd00::/8".parse().unwrap();
        assert!(v6.contains("fd12:3456::1".parse().unwrap()));

        let any: NetworkRange = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_network_range_rejects_garbage() {
        assert!("10.0.0.0/33".parse::<NetworkRange>().is_err());
        assert!("not-an-ip/8".parse::<NetworkRange>().is_err());
        assert!("10.0.0.0/x".parse::<NetworkRange>().is_err());
    }

    #[test]
    fn test_default_effect_is_deny() {
        assert_eq!(Effect::default(), Effect::Deny);
    }

    proptest! {
        /// Property: built-in names always parse back to the same variant
        #[test]
        fn prop_builtin_names_are_stable(idx in 0usize..ResourceType::BUILT_IN.len()) {
            let rt = ResourceType::BUILT_IN[idx].clone();
            prop_assert_eq!(ResourceType::from(rt.to_string()), rt);
        }

        /// Property: names outside the catalog become `Custom`, never a built-in
        #[test]
        fn prop_unknown_actions_are_custom(name in "x-[a-z]{3,12}") {
            prop_assert_eq!(Action::from(name.clone()), Action::Custom(name));
        }
    }
}
