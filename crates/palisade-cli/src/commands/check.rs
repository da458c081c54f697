//! Single permission check.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use palisade_abac::{PermissionCheckRequest, RequestContext};
use palisade_types::{Action, ResourceType};

use super::{open_service, parse_timestamp};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Policy document (JSON array of policies); defaults to policies.file
    #[arg(short, long)]
    pub policies: Option<String>,

    /// Directory document (JSON with `users` and `resources`)
    #[arg(short, long)]
    pub directory: String,

    /// User to check
    #[arg(short, long)]
    pub user: String,

    /// Resource type (e.g. purchase-request, inventory)
    #[arg(short, long)]
    pub resource_type: ResourceType,

    /// Action (e.g. view, approve)
    #[arg(short, long)]
    pub action: Action,

    /// Specific resource instance
    #[arg(long)]
    pub resource_id: Option<String>,

    /// Department the request is made in
    #[arg(long)]
    pub department: Option<String>,

    /// Location the request is made from
    #[arg(long)]
    pub location: Option<String>,

    /// Client IP address
    #[arg(long)]
    pub ip: Option<String>,

    /// Evaluate as of this instant (RFC 3339) instead of now
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<DateTime<Utc>>,
}

impl CheckArgs {
    fn request(&self) -> PermissionCheckRequest {
        let mut request = PermissionCheckRequest::new(
            &self.user,
            self.resource_type.clone(),
            self.action.clone(),
        );
        if let Some(resource_id) = &self.resource_id {
            request = request.with_resource_id(resource_id);
        }

        if self.department.is_some() || self.location.is_some() || self.ip.is_some() {
            let mut context = RequestContext::default();
            if let Some(department) = &self.department {
                context = context.with_department(department);
            }
            if let Some(location) = &self.location {
                context = context.with_location(location);
            }
            if let Some(ip) = &self.ip {
                context = context.with_ip(ip);
            }
            request = request.with_context(context);
        }
        request
    }
}

/// Prints the decision. A deny is a valid answer, not a failure.
pub fn run(project: &str, args: &CheckArgs) -> Result<()> {
    let service = open_service(project, args.policies.as_deref(), &args.directory, args.at)?;
    let result = service.check_permission(&args.request());

    println!("{}", serde_json::to_string_pretty(&result.decision)?);
    Ok(())
}
