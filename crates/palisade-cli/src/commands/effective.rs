//! Effective permission matrix for one user.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use super::{open_service, parse_timestamp};

#[derive(Debug, Args)]
pub struct EffectiveArgs {
    /// Policy document (JSON array of policies); defaults to policies.file
    #[arg(short, long)]
    pub policies: Option<String>,

    /// Directory document (JSON with `users` and `resources`)
    #[arg(short, long)]
    pub directory: String,

    /// User to enumerate
    #[arg(short, long)]
    pub user: String,

    /// Evaluate as of this instant (RFC 3339) instead of now
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct PermissionMatrix {
    user_id: String,
    /// Resource type to the actions granted on it.
    permissions: BTreeMap<String, Vec<String>>,
}

pub fn run(project: &str, args: &EffectiveArgs) -> Result<()> {
    let service = open_service(project, args.policies.as_deref(), &args.directory, args.at)?;

    let mut permissions: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for granted in service.get_effective_permissions(&args.user) {
        permissions
            .entry(granted.resource_type.to_string())
            .or_default()
            .push(granted.action.to_string());
    }

    let matrix = PermissionMatrix {
        user_id: args.user.clone(),
        permissions,
    };
    println!("{}", serde_json::to_string_pretty(&matrix)?);
    Ok(())
}
