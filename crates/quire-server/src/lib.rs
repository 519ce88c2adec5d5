//! Development server for quire sites.
//!
//! Serves every section from memory, watches the project tree and pushes
//! reload or style-update messages to the pages affected by a change.

pub mod cache;
pub mod server;
pub mod watcher;
pub mod websocket;

pub use cache::{Commit, SectionCache, Ticket};
pub use server::{router, AppState, DevServer, ServerError, SessionState, CLIENT_PATH, WS_PATH};
pub use watcher::FileWatcher;
pub use websocket::{HmrHub, HmrMessage};
