//! Multi-entry build pipeline for quire sites.
//!
//! Every registered section is compiled as an independent unit: one source
//! script, one HTML template, one generated page that loads only that
//! section's scripts and styles. The development pipeline keeps its output in
//! memory for the dev server; the production pipeline writes content-hashed,
//! minified output to disk.

pub mod compiler;
pub mod config;
pub mod development;
pub mod entry;
pub mod error;
pub mod hash;
pub mod html;
pub mod pipeline;
pub mod production;
pub mod project;
pub mod rules;
pub mod section;
pub mod transform;

pub use compiler::{EmittedFile, FileKind, InjectedStyle, SectionChunk, SectionCompiler};
pub use config::{merge, DevServerSettings, Mode, PipelineConfig};
pub use development::DevelopmentPipeline;
pub use entry::{build_entry_map, EntryMap};
pub use error::{BuildError, ConfigError, Result};
pub use html::{html_bindings, HtmlBinding, HtmlBindings};
pub use pipeline::Pipeline;
pub use production::{BuildReport, ProductionPipeline, SectionReport};
pub use project::{Project, PROJECT_FILE};
pub use section::{SectionId, SectionRegistry};
