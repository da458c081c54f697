//! CLI command implementations.

pub mod check;
pub mod config;
pub mod effective;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use palisade_abac::{FixedClock, InMemoryDirectory, PermissionService};
use palisade_config::PalisadeConfig;
use tracing::warn;

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

/// Builds a service from the project configuration, a directory document
/// and a policy document.
///
/// Falls back to `policies.file` from the configuration when no policy path
/// is given. Rejected policies are logged and left out of the store.
pub fn open_service(
    project: &str,
    policies: Option<&str>,
    directory: &str,
    at: Option<DateTime<Utc>>,
) -> Result<PermissionService> {
    let project_path = Path::new(project);
    let mut config =
        PalisadeConfig::load_from_dir(project_path).context("Failed to load configuration")?;
    config.resolve_paths(project_path);

    let policy_path = match policies {
        Some(path) => PathBuf::from(path),
        None => config
            .policies
            .file
            .clone()
            .context("No policy document: pass --policies or set policies.file")?,
    };

    let directory_json = fs::read_to_string(directory)
        .with_context(|| format!("Failed to read directory document {directory}"))?;
    let directory = InMemoryDirectory::from_json(&directory_json)
        .with_context(|| format!("Invalid directory document {directory}"))?;

    let mut builder = PermissionService::builder()
        .directory(Arc::new(directory))
        .config(config);
    if let Some(ts) = at {
        builder = builder.clock(Arc::new(FixedClock(ts)));
    }
    let service = builder.build().context("Invalid configuration")?;

    let policy_json = fs::read_to_string(&policy_path)
        .with_context(|| format!("Failed to read policy document {}", policy_path.display()))?;
    let report = service.policy_store().load_json(&policy_json);
    for (id, error) in &report.skipped {
        warn!(policy_id = %id, %error, "policy skipped");
    }

    Ok(service)
}
