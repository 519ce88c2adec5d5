//! Development pipeline: compiles sections in memory for the dev server.

use std::path::Path;
use std::sync::Arc;

use crate::compiler::{SectionChunk, SectionCompiler};
use crate::config::{DevServerSettings, Mode, PipelineConfig};
use crate::entry::{build_entry_map, EntryMap};
use crate::error::{ConfigError, Result};
use crate::html::{html_bindings, HtmlBindings};
use crate::project::Project;
use crate::rules::{Resolution, Step};
use crate::section::{SectionId, SectionRegistry};

/// In-memory pipeline. Nothing it produces touches the output directory.
#[derive(Debug)]
pub struct DevelopmentPipeline {
    registry: Arc<SectionRegistry>,
    config: PipelineConfig,
    entries: EntryMap,
    bindings: HtmlBindings,
    client_scripts: Vec<String>,
}

impl DevelopmentPipeline {
    /// Resolve every section's source and template up front; the first one
    /// missing fails the pipeline before anything is compiled.
    pub fn new(project: &Project) -> Result<Self> {
        let config = project.pipeline_config(Mode::Development)?;
        let entries = build_entry_map(
            &project.registry,
            &config.paths.sources,
            &config.paths.script_extension,
        )?;
        let bindings = html_bindings(&project.registry, &config.paths.templates)?;

        Ok(Self {
            registry: Arc::clone(&project.registry),
            config,
            entries,
            bindings,
            client_scripts: Vec::new(),
        })
    }

    /// Add a script URL to every generated page, e.g. the live-reload client.
    pub fn with_client_script(mut self, src: impl Into<String>) -> Self {
        self.client_scripts.push(src.into());
        self
    }

    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dev_server(&self) -> DevServerSettings {
        self.config.dev_server.clone().unwrap_or_default()
    }

    /// The section served at `/`.
    pub fn default_section(&self) -> Option<&SectionId> {
        self.registry.default_section()
    }

    pub fn compile(&self, section: &str) -> Result<SectionChunk> {
        let (Some(binding), Some(entry)) = (self.bindings.get(section), self.entries.get(section))
        else {
            return Err(ConfigError::InvalidSection(section.to_string()).into());
        };

        SectionCompiler::new(&self.config, &self.registry)
            .with_client_scripts(&self.client_scripts)
            .compile(binding, entry)
    }

    /// Compile every section in registry order, failing on the first error.
    pub fn compile_all(&self) -> Result<Vec<SectionChunk>> {
        self.registry.iter().map(|s| self.compile(s.as_str())).collect()
    }

    /// Whether a changed file only feeds injected styles, so clients can
    /// swap CSS instead of reloading.
    pub fn is_style_source(&self, path: &Path) -> bool {
        let rel = path
            .strip_prefix(&self.config.paths.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        match self.config.rules.resolve(&rel) {
            Resolution::Chain(steps) => steps.last() == Some(&Step::InjectStyle),
            _ => false,
        }
    }
}
