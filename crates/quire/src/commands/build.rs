//! Production mode: write hashed, minified output to disk.

use anyhow::Result;
use quire_pipeline::ProductionPipeline;

pub async fn run(pipeline: ProductionPipeline, json: bool) -> Result<()> {
    tracing::info!("Building into {}", pipeline.config().paths.output.display());

    let report = tokio::task::spawn_blocking(move || pipeline.build()).await??;

    for section in &report.sections {
        tracing::info!("{} -> {}", section.section, section.html);
    }
    tracing::info!(
        "Built {} section(s), {} file(s) in {}ms",
        report.sections.len(),
        report.files,
        report.duration_ms
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
