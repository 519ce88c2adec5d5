//! Entry map: section to source script.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::ConfigError;
use crate::section::{SectionId, SectionRegistry};

/// Section to entry script, in registry order. Keys exactly match the
/// registry it was built from.
pub type EntryMap = IndexMap<SectionId, PathBuf>;

/// Fold the registry into `section -> <sources>/<section>.<extension>`.
///
/// There is no fallback: the first section without a source file fails the
/// whole map.
pub fn build_entry_map(
    registry: &SectionRegistry,
    sources: &Path,
    extension: &str,
) -> Result<EntryMap, ConfigError> {
    registry.iter().try_fold(EntryMap::new(), |mut map, section| {
        let path = sources.join(format!("{}.{}", section, extension));
        if !path.is_file() {
            return Err(ConfigError::MissingSource {
                section: section.to_string(),
                path,
            });
        }
        map.insert(section.clone(), path);
        Ok(map)
    })
}
