use anyhow::{Context, Result};
use ferry::transfer::ExportAssembler;
use std::path::Path;

use super::open_store;

/// Export one project from the local store into an archive file
pub async fn run_export(config_path: &Path, project_id: i64, output: &Path) -> Result<()> {
    let (_, store) = open_store(config_path)?;
    let assembler = ExportAssembler::new(store);

    let bytes = assembler.export(project_id, None).await?;
    std::fs::write(output, &bytes).with_context(|| format!("Failed to write {:?}", output))?;

    println!("Exported project {} to {:?} ({} bytes)", project_id, output, bytes.len());
    Ok(())
}
