use anyhow::{Context, Result};
use ferry::archive;
use std::path::Path;

/// Decode an archive file and print what an import would see
pub fn run_inspect(input: &Path, verbose: bool) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let archive = archive::decode(&bytes)?;
    let manifest = &archive.manifest;

    println!();
    println!("================================================================================");
    println!("Archive: {:?} ({} bytes)", input, bytes.len());
    println!("================================================================================");
    println!();
    println!("Manifest");
    println!("--------------------------------------------------------------------------------");
    println!("  Format:        {} v{}", manifest.format, manifest.version);
    println!("  Project key:   {}", manifest.project_key);
    println!("  Project name:  {}", archive.project.name);
    println!("  Exported at:   {}", manifest.exported_at);
    if let Some(ref by) = manifest.exported_by {
        println!("  Exported by:   {}", by);
    }
    println!("  Datasets:      {}", archive.datasets.len());
    println!("  Models:        {}", archive.models.len());
    println!("  Suites:        {}", archive.suites.len());
    println!();
    println!("Roster (users to map on import)");
    println!("--------------------------------------------------------------------------------");
    for user in &manifest.roster {
        println!("  {}", user);
    }

    if !archive.skipped_entries.is_empty() {
        println!();
        println!("  ⚠ {} unrecognized entries will be ignored:", archive.skipped_entries.len());
        for entry in &archive.skipped_entries {
            println!("    {}", entry);
        }
    }

    if verbose {
        println!();
        println!("Contents");
        println!("--------------------------------------------------------------------------------");
        for (id, entry) in &archive.datasets {
            println!(
                "  dataset {:<24} {:<24} owner={} {} bytes",
                id, entry.record.name, entry.record.owner, entry.digest.size
            );
        }
        for (id, entry) in &archive.models {
            println!(
                "  model   {:<24} {:<24} owner={} {} bytes",
                id, entry.record.name, entry.record.owner, entry.digest.size
            );
        }
        for (id, suite) in &archive.suites {
            println!("  suite   {:<24} {:<24} {} tests", id, suite.name, suite.tests.len());
        }
    }

    println!();
    Ok(())
}
