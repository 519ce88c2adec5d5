//! In-memory store of compiled sections.
//!
//! Each rebuild request takes a ticket. A result is committed only if its
//! ticket is still the newest requested for that section, so a slow rebuild
//! that finishes after a newer one can never overwrite it. The lock is held
//! for lookups and commits only, never across a compilation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use quire_pipeline::{EmittedFile, SectionChunk, SectionId, SectionRegistry};
use tokio::sync::RwLock;

/// A claim on the right to commit a rebuild of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    section: SectionId,
    number: u64,
}

impl Ticket {
    pub fn section(&self) -> &SectionId {
        &self.section
    }
}

/// Outcome of a commit attempt.
#[derive(Debug)]
pub enum Commit {
    Applied {
        previous: Option<Arc<SectionChunk>>,
        current: Arc<SectionChunk>,
    },
    /// A newer rebuild of the section was requested meanwhile.
    Superseded,
}

#[derive(Debug, Default)]
struct Slot {
    chunk: Option<Arc<SectionChunk>>,
    requested: u64,
    /// The newest rebuild failed; the previous chunk keeps being served.
    failed: bool,
}

#[derive(Debug, Default)]
pub struct SectionCache {
    slots: RwLock<HashMap<SectionId, Slot>>,
}

impl SectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ticket(&self, section: &SectionId) -> Ticket {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(section.clone()).or_default();
        slot.requested += 1;
        Ticket {
            section: section.clone(),
            number: slot.requested,
        }
    }

    pub async fn commit(&self, ticket: Ticket, chunk: SectionChunk) -> Commit {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(ticket.section).or_default();
        if ticket.number != slot.requested {
            return Commit::Superseded;
        }

        let current = Arc::new(chunk);
        let previous = slot.chunk.replace(Arc::clone(&current));
        slot.failed = false;
        Commit::Applied { previous, current }
    }

    /// Record a failed rebuild. Returns `false` when the ticket is stale.
    pub async fn fail(&self, ticket: Ticket) -> bool {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(ticket.section).or_default();
        if ticket.number != slot.requested {
            return false;
        }
        slot.failed = true;
        true
    }

    pub async fn get(&self, section: &str) -> Option<Arc<SectionChunk>> {
        let slots = self.slots.read().await;
        slots.get(section).and_then(|slot| slot.chunk.clone())
    }

    /// Find an emitted file by its output path across all sections.
    pub async fn file(&self, path: &str) -> Option<EmittedFile> {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter_map(|slot| slot.chunk.as_ref())
            .find_map(|chunk| chunk.file(path).cloned())
    }

    /// Sections, in registry order, that read any of `paths` during their
    /// last build, plus every section whose last rebuild failed.
    pub async fn affected(&self, registry: &SectionRegistry, paths: &[PathBuf]) -> Vec<SectionId> {
        let slots = self.slots.read().await;
        registry
            .iter()
            .filter(|section| match slots.get(section.as_str()) {
                Some(slot) if slot.failed => true,
                Some(Slot {
                    chunk: Some(chunk), ..
                }) => paths.iter().any(|p| chunk.depends_on(p)),
                _ => false,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_pipeline::{FileKind, SectionChunk};
    use std::collections::BTreeSet;

    fn chunk(section: &str, marker: &str, input: &str) -> SectionChunk {
        SectionChunk {
            section: SectionId::new(section).unwrap(),
            html_file: format!("{section}.html"),
            html: marker.to_string(),
            entry: format!("js/{section}.js"),
            stylesheet: None,
            files: vec![EmittedFile {
                path: format!("js/{section}.js"),
                contents: marker.as_bytes().to_vec(),
                kind: FileKind::Script,
            }],
            styles: Vec::new(),
            inputs: BTreeSet::from([PathBuf::from(input)]),
        }
    }

    #[tokio::test]
    async fn newest_ticket_wins() {
        let cache = SectionCache::new();
        let intro = SectionId::new("Intro").unwrap();

        let older = cache.ticket(&intro).await;
        let newer = cache.ticket(&intro).await;

        let applied = cache.commit(newer, chunk("Intro", "new", "/a.js")).await;
        assert!(matches!(applied, Commit::Applied { .. }));
        let stale = cache.commit(older, chunk("Intro", "old", "/a.js")).await;
        assert!(matches!(stale, Commit::Superseded));
        assert_eq!(cache.get("Intro").await.unwrap().html, "new");
    }

    #[tokio::test]
    async fn failures_keep_previous_output() {
        let cache = SectionCache::new();
        let intro = SectionId::new("Intro").unwrap();

        let first = cache.ticket(&intro).await;
        cache.commit(first, chunk("Intro", "good", "/a.js")).await;
        let second = cache.ticket(&intro).await;
        assert!(cache.fail(second).await);

        assert_eq!(cache.get("Intro").await.unwrap().html, "good");
    }

    #[tokio::test]
    async fn finds_files_and_affected_sections() {
        let cache = SectionCache::new();
        let registry = SectionRegistry::new(["Intro", "Forms"], None).unwrap();
        for (section, input) in [("Intro", "/src/js/Intro.js"), ("Forms", "/src/js/Forms.js")] {
            let id = SectionId::new(section).unwrap();
            let ticket = cache.ticket(&id).await;
            cache.commit(ticket, chunk(section, section, input)).await;
        }

        assert_eq!(cache.file("js/Forms.js").await.unwrap().contents, b"Forms");
        assert!(cache.file("js/Missing.js").await.is_none());

        let affected = cache
            .affected(&registry, &[PathBuf::from("/src/js/Forms.js")])
            .await;
        assert_eq!(affected, vec![SectionId::new("Forms").unwrap()]);

        let intro = SectionId::new("Intro").unwrap();
        let ticket = cache.ticket(&intro).await;
        cache.fail(ticket).await;
        let affected = cache
            .affected(&registry, &[PathBuf::from("/elsewhere.txt")])
            .await;
        assert_eq!(affected, vec![intro]);
    }
}
