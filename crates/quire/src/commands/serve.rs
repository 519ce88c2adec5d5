//! Preview server for production output.
//!
//! Serves the written files as they are. The site root redirects to the
//! default section's page, matching what the dev server shows at `/`.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;

/// What to preview and how.
#[derive(Debug, Clone)]
pub struct Preview<'a> {
    pub dir: &'a Path,
    pub port: u16,
    /// Section whose page is shown at `/`.
    pub default_section: Option<&'a str>,
    /// Open a browser once the listener is bound.
    pub open: bool,
}

pub fn preview_router(dir: &Path, default_section: Option<&str>) -> Result<Router> {
    if !dir.is_dir() {
        anyhow::bail!(
            "Directory not found: {}. Run 'quire --mode production' first.",
            dir.display()
        );
    }

    let files = ServeDir::new(dir);
    let router = match default_section {
        Some(section) => {
            let page = format!("/{section}.html");
            Router::new()
                .route("/", get(move || std::future::ready(Redirect::temporary(&page))))
                .fallback_service(files)
        }
        None => Router::new().fallback_service(files),
    };
    Ok(router)
}

pub async fn run(preview: Preview<'_>) -> Result<()> {
    let app = preview_router(preview.dir, preview.default_section)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], preview.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let url = format!("http://{addr}");
    tracing::info!("Previewing {} at {}", preview.dir.display(), url);

    if preview.open {
        if let Err(e) = open::that(&url) {
            tracing::debug!("Could not open a browser: {}", e);
        }
    }

    axum::serve(listener, app).await?;
    Ok(())
}
