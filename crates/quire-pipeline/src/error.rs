//! Error types shared by both pipelines.

use std::path::{Path, PathBuf};

/// A build-fatal error. Every variant aborts the current invocation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Optimizer error in section '{section}' ({step}): {}: {message}", path.display())]
    Optimizer {
        section: String,
        path: PathBuf,
        step: &'static str,
        message: String,
    },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn optimizer(
        section: &str,
        path: &Path,
        step: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Optimizer {
            section: section.to_string(),
            path: path.to_path_buf(),
            step,
            message: message.into(),
        }
    }
}

/// Configuration mistakes. These point at a missing rule, file or declaration,
/// never at a runtime fault, and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Section '{section}' has no source script at {}", path.display())]
    MissingSource { section: String, path: PathBuf },

    #[error("Section '{section}' has no template at {}", path.display())]
    MissingTemplate { section: String, path: PathBuf },

    #[error("Section '{section}': no transform rule matches {}", path.display())]
    UnmatchedAsset { section: String, path: PathBuf },

    #[error(
        "Section '{section}': cannot resolve '{specifier}' imported from {}",
        importer.display()
    )]
    UnresolvedImport {
        section: String,
        importer: PathBuf,
        specifier: String,
    },

    #[error("Section '{section}': circular import through {}", path.display())]
    CircularImport { section: String, path: PathBuf },

    #[error("Section '{section}': {} only provides a default export", path.display())]
    NamedImportFromResource { section: String, path: PathBuf },

    #[error("Invalid section identifier '{0}'")]
    InvalidSection(String),

    #[error("Default section '{0}' is not registered")]
    UnknownDefaultSection(String),

    #[error("Unknown mode '{0}' (expected 'development' or 'production')")]
    UnknownMode(String),

    #[error("No mode selected (pass --mode or set QUIRE_MODE)")]
    MissingMode,

    #[error("Invalid filename template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Invalid rule pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid transform chain for {}: {reason}", path.display())]
    InvalidChain { path: PathBuf, reason: String },

    #[error("Failed to parse {}: {message}", path.display())]
    ProjectFile { path: PathBuf, message: String },

    #[error("Refusing to clean {}: it contains project sources", path.display())]
    UnsafeOutputDir { path: PathBuf },
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_section_and_path() {
        let err = BuildError::from(ConfigError::MissingSource {
            section: "Intro".to_string(),
            path: PathBuf::from("src/js/Intro.js"),
        });

        let msg = err.to_string();
        assert!(msg.contains("Intro"));
        assert!(msg.contains("src/js/Intro.js"));
    }

    #[test]
    fn optimizer_errors_name_the_step() {
        let err =
            BuildError::optimizer("Forms", Path::new("src/js/Forms.js"), "minify-script", "boom");

        let msg = err.to_string();
        assert!(msg.contains("Forms"));
        assert!(msg.contains("minify-script"));
        assert!(msg.contains("boom"));
    }
}
