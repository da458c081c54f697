//! Policy document validation.

use std::fs;

use anyhow::{Context, Result};
use palisade_abac::PolicyStore;

/// Loads the document into a scratch store and reports what was accepted.
pub fn run(policies: &str) -> Result<()> {
    let json = fs::read_to_string(policies)
        .with_context(|| format!("Failed to read policy document {policies}"))?;

    let store = PolicyStore::new();
    let report = store.load_json(&json);

    println!("Validating {policies}...");
    println!();
    println!("Loaded {} policies:", report.loaded.len());
    for id in &report.loaded {
        println!("  ok    {id}");
    }

    if report.skipped.is_empty() {
        println!();
        println!("Policy document is valid");
        return Ok(());
    }

    println!();
    println!("Skipped {} policies:", report.skipped.len());
    for (id, error) in &report.skipped {
        println!("  error {id}: {error}");
    }

    anyhow::bail!("{} of the policies in {policies} were rejected", report.skipped.len())
}
