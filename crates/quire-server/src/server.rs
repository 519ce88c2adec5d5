//! Development server.
//!
//! Every section is compiled once at startup and kept in memory. Requests are
//! answered from the cache; file changes rebuild only the sections that read
//! the changed files and notify the browsers showing them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use minijinja::{context, Environment};
use quire_pipeline::{BuildError, DevServerSettings, DevelopmentPipeline, SectionChunk};
use tokio::sync::{broadcast, watch};

use crate::cache::{Commit, SectionCache, Ticket};
use crate::watcher::FileWatcher;
use crate::websocket::{hmr_client_script, HmrHub, HmrMessage};

/// Socket endpoint for live-reload clients.
pub const WS_PATH: &str = "/__quire/ws";
/// URL of the live-reload client added to every page.
pub const CLIENT_PATH: &str = "/__quire/client.js";

const NOT_FOUND_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Not found</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 40rem; margin: 2rem auto; }
  </style>
</head>
<body>
  <h1>{{ path }} was not found</h1>
  {% if sections %}
  <p>Sections served by this project:</p>
  <ul>
    {% for section in sections %}<li><a href="{{ base }}{{ section }}.html">{{ section }}</a></li>
    {% endfor %}
  </ul>
  {% else %}
  <p>No sections are declared in quire.toml.</p>
  {% endif %}
</body>
</html>
"#;

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Initial build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Server task failed: {0}")]
    Task(String),
}

/// Lifecycle of a development session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// A build is running; compiled sections stay servable.
    Compiling,
    Serving,
    Stopped,
}

/// Everything request handlers and the rebuild loop share.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<DevelopmentPipeline>,
    cache: Arc<SectionCache>,
    hmr: HmrHub,
    session: Arc<watch::Sender<SessionState>>,
    /// Rebuild batches in flight.
    rebuilding: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(pipeline: DevelopmentPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline.with_client_script(CLIENT_PATH)),
            cache: Arc::new(SectionCache::new()),
            hmr: HmrHub::new(),
            session: Arc::new(watch::channel(SessionState::Idle).0),
            rebuilding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn session(&self) -> SessionState {
        *self.session.borrow()
    }

    pub fn hmr(&self) -> &HmrHub {
        &self.hmr
    }

    pub fn cache(&self) -> &SectionCache {
        &self.cache
    }

    /// Compile every section. Any failure aborts startup.
    pub async fn compile_all(&self) -> Result<(), ServerError> {
        self.session.send_replace(SessionState::Compiling);

        let mut tickets = Vec::new();
        for section in self.pipeline.registry().iter() {
            tickets.push(self.cache.ticket(section).await);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let chunks = tokio::task::spawn_blocking(move || pipeline.compile_all())
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?;
        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(e) => {
                self.session.send_replace(SessionState::Stopped);
                return Err(e.into());
            }
        };

        for (ticket, chunk) in tickets.into_iter().zip(chunks) {
            self.cache.commit(ticket, chunk).await;
        }

        tracing::info!("Compiled {} section(s)", self.pipeline.registry().len());
        self.session.send_replace(SessionState::Serving);
        Ok(())
    }

    /// Claim rebuild tickets for the sections affected by `paths`.
    ///
    /// Tickets are taken in arrival order, so when batches overlap the
    /// later batch's results win.
    pub async fn plan(&self, paths: &[PathBuf]) -> Vec<Ticket> {
        let affected = self.cache.affected(self.pipeline.registry(), paths).await;
        let mut tickets = Vec::with_capacity(affected.len());
        for section in &affected {
            tickets.push(self.cache.ticket(section).await);
        }
        tickets
    }

    /// Rebuild the planned sections and notify clients.
    ///
    /// When every changed path is a style source, clients get the new CSS of
    /// each changed style block instead of a reload.
    pub async fn rebuild(&self, tickets: Vec<Ticket>, paths: &[PathBuf]) {
        let styles_only =
            !paths.is_empty() && paths.iter().all(|p| self.pipeline.is_style_source(p));

        if self.rebuilding.fetch_add(1, Ordering::SeqCst) == 0 {
            self.session.send_replace(SessionState::Compiling);
        }
        self.rebuild_sections(tickets, styles_only).await;
        if self.rebuilding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.session.send_replace(SessionState::Serving);
        }
    }

    async fn rebuild_sections(&self, tickets: Vec<Ticket>, styles_only: bool) {
        for ticket in tickets {
            let section = ticket.section().clone();
            let pipeline = Arc::clone(&self.pipeline);
            let name = section.clone();
            let result =
                tokio::task::spawn_blocking(move || pipeline.compile(name.as_str())).await;

            match result {
                Ok(Ok(chunk)) => match self.cache.commit(ticket, chunk).await {
                    Commit::Applied { previous, current } => {
                        tracing::info!("Rebuilt {}", section);
                        self.announce(previous.as_deref(), &current, styles_only);
                    }
                    Commit::Superseded => {
                        tracing::debug!("Discarding stale rebuild of {}", section);
                    }
                },
                Ok(Err(e)) => {
                    if self.cache.fail(ticket).await {
                        tracing::error!("Rebuild of {} failed: {}", section, e);
                        self.hmr.send(HmrMessage::Error {
                            section: section.to_string(),
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) => tracing::error!("Rebuild task for {} failed: {}", section, e),
            }
        }
    }

    pub async fn apply_changes(&self, paths: Vec<PathBuf>) {
        let tickets = self.plan(&paths).await;
        if tickets.is_empty() {
            tracing::debug!("No section reads the changed files");
            return;
        }
        self.rebuild(tickets, &paths).await;
    }

    fn announce(
        &self,
        previous: Option<&SectionChunk>,
        current: &SectionChunk,
        styles_only: bool,
    ) {
        let section = current.section.to_string();

        let updates = match previous {
            Some(previous) if styles_only && same_style_ids(previous, current) => current
                .styles
                .iter()
                .filter(|style| !previous.styles.contains(style))
                .map(|style| HmrMessage::UpdateStyle {
                    section: section.clone(),
                    id: style.id.clone(),
                    css: style.css.clone(),
                })
                .collect(),
            _ => vec![HmrMessage::Reload { section }],
        };

        for msg in updates {
            self.hmr.send(msg);
        }
    }
}

fn same_style_ids(a: &SectionChunk, b: &SectionChunk) -> bool {
    a.styles.len() == b.styles.len() && a.styles.iter().zip(&b.styles).all(|(x, y)| x.id == y.id)
}

/// Development server.
pub struct DevServer {
    state: AppState,
    settings: DevServerSettings,
}

impl DevServer {
    pub fn new(pipeline: DevelopmentPipeline) -> Self {
        let settings = pipeline.dev_server();
        Self {
            state: AppState::new(pipeline),
            settings,
        }
    }

    /// Compile, watch and serve until interrupted.
    pub async fn start(self) -> Result<(), ServerError> {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(address.clone()))?;

        self.state.compile_all().await?;

        let paths = &self.state.pipeline.config().paths;
        let (watcher, mut rx) = FileWatcher::new(
            std::slice::from_ref(&paths.root),
            vec![paths.output.clone(), paths.root.join(".git")],
        )
        .map_err(|e| ServerError::Watch(e.to_string()))?;

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let tickets = state.plan(&batch).await;
                if tickets.is_empty() {
                    continue;
                }
                let state = state.clone();
                tokio::spawn(async move { state.rebuild(tickets, &batch).await });
            }
            drop(watcher);
        });

        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e.to_string()))?;

        let url = format!("http://{}", addr);
        tracing::info!("Serving at {}", url);
        if self.settings.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Could not open a browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Bind(addr, e.to_string()))?;

        self.state.session.send_replace(SessionState::Stopped);
        tracing::info!("Dev server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Build the dev server's routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route(CLIENT_PATH, get(client_handler))
        .fallback(output_handler)
        .with_state(state)
}

/// Request path relative to the site root, with the public path removed.
fn site_path<'a>(public_path: &str, request: &'a str) -> &'a str {
    let path = request.trim_start_matches('/');
    let public = public_path.trim_matches('/');
    if public.is_empty() {
        return path;
    }
    match path.strip_prefix(public) {
        Some("") => "",
        Some(rest) => rest.strip_prefix('/').unwrap_or(path),
        None => path,
    }
}

/// The site root serves the default section, `<Section>.html` serves that
/// section, and anything else is looked up among the emitted files.
async fn output_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let path = site_path(&state.pipeline.config().public_path, uri.path());

    let section = if path.is_empty() {
        state.pipeline.default_section().map(|s| s.as_str())
    } else {
        path.strip_suffix(".html")
    };
    if let Some(name) = section {
        if let Some(chunk) = state.cache.get(name).await {
            return Html(chunk.html.clone()).into_response();
        }
    }

    match state.cache.file(path).await {
        Some(file) => {
            ([(header::CONTENT_TYPE, content_type(path))], file.contents).into_response()
        }
        None => not_found(&state, uri.path()),
    }
}

fn not_found(state: &AppState, path: &str) -> Response {
    let sections: Vec<&str> = state.pipeline.registry().iter().map(|s| s.as_str()).collect();
    let base = match state.pipeline.config().public_path.trim_matches('/') {
        "" => "/".to_string(),
        public => format!("/{public}/"),
    };

    let mut env = Environment::new();
    let page = env
        .add_template("404.html", NOT_FOUND_TEMPLATE)
        .and_then(|()| env.get_template("404.html"))
        .and_then(|tmpl| tmpl.render(context! { path, sections, base }));

    match page {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(e) => {
            tracing::warn!("Failed to render not-found page: {}", e);
            (StatusCode::NOT_FOUND, format!("{path} was not found")).into_response()
        }
    }
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.hmr.subscribe();
    tracing::debug!("Live-reload client connected ({} open)", state.hmr.subscriber_count());

    if send(&mut socket, &HmrMessage::Connected).await.is_err() {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(msg) => {
                if send(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Live-reload client skipped {} message(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &HmrMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

async fn client_handler(State(state): State<AppState>) -> impl IntoResponse {
    let default_section = state.pipeline.default_section().map(|s| s.as_str());
    let public_path = &state.pipeline.config().public_path;
    let script = hmr_client_script(WS_PATH, default_section, public_path);
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], script)
}
