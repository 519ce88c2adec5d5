//! Section registry: the ordered list of documentation pages.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::ConfigError;

/// Identifier of one documentation page.
///
/// Doubles as a file stem (`<section>.js`, `<section>.html`), so it may not
/// contain path separators or be a relative path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SectionId(Arc<str>);

impl SectionId {
    /// Validate and wrap an identifier.
    pub fn new(id: &str) -> Result<Self, ConfigError> {
        let trimmed = id.trim();
        if trimmed.is_empty()
            || trimmed != id
            || id == "."
            || id == ".."
            || id.contains(['/', '\\', '\0'])
        {
            return Err(ConfigError::InvalidSection(id.to_string()));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Ordered, de-duplicated sequence of sections plus the default-document policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRegistry {
    sections: Vec<SectionId>,
    default_section: Option<SectionId>,
}

impl SectionRegistry {
    /// Build a registry from a declaration list.
    ///
    /// Duplicates are dropped (first occurrence wins). When `default_section`
    /// is `None` the last entry is the default document.
    pub fn new<I, S>(ids: I, default_section: Option<&str>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sections: Vec<SectionId> = Vec::new();
        for id in ids {
            let id = SectionId::new(id.as_ref())?;
            if sections.contains(&id) {
                tracing::warn!("Section '{}' is declared more than once, ignoring repeat", id);
                continue;
            }
            sections.push(id);
        }

        let default_section = match default_section {
            Some(name) => {
                let found = sections.iter().find(|s| s.as_str() == name).cloned();
                Some(found.ok_or_else(|| ConfigError::UnknownDefaultSection(name.to_string()))?)
            }
            None => None,
        };

        Ok(Self {
            sections,
            default_section,
        })
    }

    /// An empty registry. Both pipelines build nothing from it.
    pub fn empty() -> Self {
        Self {
            sections: Vec::new(),
            default_section: None,
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &SectionId> {
        self.sections.iter()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SectionId> {
        self.sections.iter().find(|s| s.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The section served as the default document: the explicit
    /// `default_section` if configured, else the last registered entry.
    pub fn default_section(&self) -> Option<&SectionId> {
        self.default_section.as_ref().or_else(|| self.sections.last())
    }
}

impl<'a> IntoIterator for &'a SectionRegistry {
    type Item = &'a SectionId;
    type IntoIter = std::slice::Iter<'a, SectionId>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_declaration_order() {
        let registry = SectionRegistry::new(["B", "A", "C"], None).unwrap();

        let ids: Vec<&str> = registry.iter().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn drops_duplicates_keeping_first() {
        let registry = SectionRegistry::new(["A", "B", "A"], None).unwrap();

        let ids: Vec<&str> = registry.iter().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn last_entry_is_default() {
        let registry = SectionRegistry::new(["Intro", "Forms"], None).unwrap();
        assert_eq!(registry.default_section().unwrap().as_str(), "Forms");

        let reordered = SectionRegistry::new(["Forms", "Intro"], None).unwrap();
        assert_eq!(reordered.default_section().unwrap().as_str(), "Intro");
    }

    #[test]
    fn explicit_default_overrides_position() {
        let registry = SectionRegistry::new(["Intro", "Forms"], Some("Intro")).unwrap();
        assert_eq!(registry.default_section().unwrap().as_str(), "Intro");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let result = SectionRegistry::new(["Intro"], Some("Missing"));
        assert!(matches!(result, Err(ConfigError::UnknownDefaultSection(s)) if s == "Missing"));
    }

    #[test]
    fn rejects_identifiers_that_are_not_file_stems() {
        for bad in ["", " A", "a/b", "..", "a\\b"] {
            assert!(
                matches!(SectionId::new(bad), Err(ConfigError::InvalidSection(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = SectionRegistry::new(Vec::<String>::new(), None).unwrap();

        assert!(registry.is_empty());
        assert!(registry.default_section().is_none());
    }

    #[test]
    fn serializes_as_a_plain_string() {
        let id = SectionId::new("Intro").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""Intro""#);
    }
}
