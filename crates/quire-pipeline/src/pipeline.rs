//! Mode selection.

use crate::config::Mode;
use crate::development::DevelopmentPipeline;
use crate::error::{ConfigError, Result};
use crate::production::ProductionPipeline;
use crate::project::Project;

/// The pipeline chosen for one invocation.
#[derive(Debug)]
pub enum Pipeline {
    Development(DevelopmentPipeline),
    Production(ProductionPipeline),
}

impl Pipeline {
    /// Pick the pipeline from the external mode selector. A missing (or
    /// blank) selector and an unrecognized one are both configuration errors.
    pub fn select(mode: Option<&str>, project: &Project) -> Result<Self> {
        let mode: Mode = mode
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(ConfigError::MissingMode)?
            .parse()?;

        tracing::info!("Mode: {}", mode);
        Ok(match mode {
            Mode::Development => Self::Development(DevelopmentPipeline::new(project)?),
            Mode::Production => Self::Production(ProductionPipeline::new(project)?),
        })
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Development(_) => Mode::Development,
            Self::Production(_) => Mode::Production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::path::Path;

    fn empty_project() -> Project {
        Project::from_toml_str(Path::new("/nonexistent"), "").unwrap()
    }

    #[test]
    fn selects_by_mode() {
        let project = empty_project();

        let dev = Pipeline::select(Some("development"), &project).unwrap();
        assert_eq!(dev.mode(), Mode::Development);

        let prod = Pipeline::select(Some("production"), &project).unwrap();
        assert_eq!(prod.mode(), Mode::Production);
    }

    #[test]
    fn missing_mode_is_fatal() {
        for mode in [None, Some(""), Some("  ")] {
            let err = Pipeline::select(mode, &empty_project()).unwrap_err();
            assert!(matches!(err, BuildError::Config(ConfigError::MissingMode)), "{mode:?}");
        }
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let err = Pipeline::select(Some("staging"), &empty_project()).unwrap_err();
        assert!(matches!(err, BuildError::Config(ConfigError::UnknownMode(m)) if m == "staging"));
    }
}
