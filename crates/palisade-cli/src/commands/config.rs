//! Configuration management commands.

use anyhow::{Context, Result};
use palisade_config::PalisadeConfig;
use std::path::Path;

/// Show current configuration.
pub fn show(project: &str, format: &str) -> Result<()> {
    let project_path = Path::new(project);

    let mut config =
        PalisadeConfig::load_from_dir(project_path).context("Failed to load configuration")?;
    config.resolve_paths(project_path);

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        "toml" => {
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{toml_str}");
        }
        _ => {
            println!("Palisade Configuration");
            println!("======================\n");

            println!("Engine:");
            println!(
                "  Business hours: {:02}:00-{:02}:00",
                config.engine.business_hours_start, config.engine.business_hours_end
            );
            println!("  UTC offset (minutes): {}", config.engine.utc_offset_minutes);
            println!();

            println!("Cache:");
            println!("  Enabled: {}", config.cache.enabled);
            println!("  Capacity: {}", config.cache.capacity);
            println!();

            println!("Audit:");
            println!("  Enabled: {}", config.audit.enabled);
            println!("  Max entries: {}", config.audit.max_entries);
            println!();

            println!("Bulk:");
            println!("  Parallel: {}", config.bulk.parallel);
            println!("  Chunk size: {}", config.bulk.chunk_size);
            println!();

            println!("Network:");
            println!(
                "  Trusted networks: {}",
                config.network.trusted_networks.join(", ")
            );
            println!();

            println!("Policies:");
            println!(
                "  File: {}",
                config
                    .policies
                    .file
                    .as_ref()
                    .map_or("None".to_string(), |f| f.display().to_string())
            );
            println!();

            println!("Catalog:");
            for entry in &config.catalog.resources {
                let actions: Vec<String> = entry.actions.iter().map(ToString::to_string).collect();
                println!(
                    "  {} [{}{}]: {}",
                    entry.resource_type,
                    entry.classification,
                    if entry.audit_required { ", audited" } else { "" },
                    actions.join(", ")
                );
            }
        }
    }

    Ok(())
}
