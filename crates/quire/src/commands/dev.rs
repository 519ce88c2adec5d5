//! Development mode: compile in memory and serve with live reload.

use anyhow::Result;
use quire_pipeline::DevelopmentPipeline;
use quire_server::DevServer;

pub async fn run(pipeline: DevelopmentPipeline) -> Result<()> {
    if pipeline.registry().is_empty() {
        tracing::warn!("No sections declared; the dev server will only list that fact");
    }

    DevServer::new(pipeline).start().await?;
    Ok(())
}
