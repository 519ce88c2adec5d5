//! Project file (`quire.toml`) loading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::config::{
    merge, DevServerSettings, Mode, ModeSettings, Paths, PipelineConfig, SharedConfig,
};
use crate::error::ConfigError;
use crate::rules::shared_rules;
use crate::section::SectionRegistry;
use crate::transform::ScriptOptions;

/// Default project file name.
pub const PROJECT_FILE: &str = "quire.toml";

/// Project file structure.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    #[serde(default)]
    sections: Vec<String>,
    default_section: Option<String>,
    #[serde(default)]
    paths: PathsFile,
    #[serde(default)]
    script: ScriptFile,
    #[serde(default)]
    externals: BTreeMap<String, String>,
    #[serde(default)]
    dev: DevServerSettings,
    #[serde(default)]
    build: BuildFile,
}

#[derive(Debug, Deserialize)]
struct PathsFile {
    #[serde(default = "default_sources")]
    sources: String,
    #[serde(default = "default_templates")]
    templates: String,
    #[serde(default = "default_output")]
    output: String,
    #[serde(default = "default_script_extension")]
    script_extension: String,
}

impl Default for PathsFile {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            templates: default_templates(),
            output: default_output(),
            script_extension: default_script_extension(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ScriptFile {
    target: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BuildFile {
    #[serde(default)]
    public_path: String,
}

fn default_sources() -> String {
    "src/js".to_string()
}
fn default_templates() -> String {
    "src".to_string()
}
fn default_output() -> String {
    "dist".to_string()
}
fn default_script_extension() -> String {
    "js".to_string()
}

/// A loaded project: the section registry plus everything needed to derive
/// a pipeline configuration for either mode.
#[derive(Debug, Clone)]
pub struct Project {
    pub registry: Arc<SectionRegistry>,
    pub paths: Paths,
    pub script: ScriptOptions,
    pub externals: BTreeMap<String, String>,
    pub dev: DevServerSettings,
    pub public_path: String,
}

impl Project {
    /// Load a project file. A missing file yields the defaults with an empty
    /// registry, rooted at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        // Watcher events carry absolute paths; inputs must compare equal.
        let root = root.canonicalize().unwrap_or(root);

        if !path.exists() {
            tracing::warn!("{} not found, using defaults", path.display());
            return Self::from_toml_str(&root, "");
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ProjectFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let project = Self::from_toml_str(&root, &content).map_err(|e| match e {
            ConfigError::ProjectFile { message, .. } => ConfigError::ProjectFile {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        tracing::info!("Loaded {} sections from {}", project.registry.len(), path.display());
        Ok(project)
    }

    /// Parse project file content; relative paths resolve against `root`.
    pub fn from_toml_str(root: &Path, content: &str) -> Result<Self, ConfigError> {
        let file: ProjectFile = toml::from_str(content).map_err(|e| ConfigError::ProjectFile {
            path: root.join(PROJECT_FILE),
            message: e.to_string(),
        })?;

        let registry = SectionRegistry::new(&file.sections, file.default_section.as_deref())?;

        let paths = Paths {
            root: root.to_path_buf(),
            sources: root.join(&file.paths.sources),
            templates: root.join(&file.paths.templates),
            output: root.join(&file.paths.output),
            script_extension: file.paths.script_extension,
        };

        let mut script = ScriptOptions::default();
        if let Some(target) = file.script.target {
            script.target = target;
        }

        Ok(Self {
            registry: Arc::new(registry),
            paths,
            script,
            externals: file.externals,
            dev: file.dev,
            public_path: file.build.public_path,
        })
    }

    /// The settings shared by both modes.
    pub fn shared_config(&self) -> Result<SharedConfig, ConfigError> {
        Ok(SharedConfig {
            paths: self.paths.clone(),
            rules: shared_rules(&self.script)?,
            externals: self.externals.clone(),
            public_path: self.public_path.clone(),
        })
    }

    /// Merge the shared settings with the given mode's settings.
    pub fn pipeline_config(&self, mode: Mode) -> Result<PipelineConfig, ConfigError> {
        let settings = match mode {
            Mode::Development => ModeSettings::development(self.dev.clone())?,
            Mode::Production => ModeSettings::production()?,
        };
        Ok(merge(self.shared_config()?, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_sections_and_defaults() {
        let project = Project::from_toml_str(
            Path::new("/site"),
            r#"sections = ["Intro", "Forms"]"#,
        )
        .unwrap();

        assert_eq!(project.registry.len(), 2);
        assert_eq!(project.registry.default_section().unwrap().as_str(), "Forms");
        assert_eq!(project.paths.sources, PathBuf::from("/site/src/js"));
        assert_eq!(project.paths.templates, PathBuf::from("/site/src"));
        assert_eq!(project.paths.output, PathBuf::from("/site/dist"));
        assert_eq!(project.paths.script_extension, "js");
        assert_eq!(project.dev.port, 8080);
    }

    #[test]
    fn reads_every_table() {
        let project = Project::from_toml_str(
            Path::new("/site"),
            r#"
sections = ["A", "B"]
default_section = "A"

[paths]
sources = "pages"
output = "public"

[script]
target = "es2020"

[externals]
react = "https://esm.sh/react@16.13.1"

[dev]
port = 9000

[build]
public_path = "/docs/"
"#,
        )
        .unwrap();

        assert_eq!(project.registry.default_section().unwrap().as_str(), "A");
        assert_eq!(project.paths.sources, PathBuf::from("/site/pages"));
        assert_eq!(project.paths.templates, PathBuf::from("/site/src"));
        assert_eq!(project.paths.output, PathBuf::from("/site/public"));
        assert_eq!(project.script.target, "es2020");
        assert_eq!(project.externals["react"], "https://esm.sh/react@16.13.1");
        assert_eq!(project.dev.port, 9000);
        assert_eq!(project.dev.host, "127.0.0.1");
        assert_eq!(project.public_path, "/docs/");
    }

    #[test]
    fn missing_file_gives_empty_registry() {
        let temp = tempdir().unwrap();
        let project = Project::load(&temp.path().join(PROJECT_FILE)).unwrap();

        assert!(project.registry.is_empty());
        assert_eq!(project.paths.root, temp.path());
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(PROJECT_FILE);
        fs::write(&path, "sections = [").unwrap();

        let result = Project::load(&path);
        assert!(matches!(result, Err(ConfigError::ProjectFile { path: p, .. }) if p == path));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Project::from_toml_str(Path::new("/"), "sectons = [\"A\"]");
        assert!(matches!(result, Err(ConfigError::ProjectFile { .. })));
    }

    #[test]
    fn mode_configs_differ_only_where_expected() {
        let project = Project::from_toml_str(Path::new("/site"), r#"sections = ["A"]"#).unwrap();

        let dev = project.pipeline_config(Mode::Development).unwrap();
        let prod = project.pipeline_config(Mode::Production).unwrap();

        assert_eq!(dev.paths, prod.paths);
        assert!(!dev.optimization.minify_scripts);
        assert!(prod.optimization.minify_scripts);
        assert!(prod.optimization.html.is_some());
        assert!(prod.clean && !dev.clean);
    }
}
