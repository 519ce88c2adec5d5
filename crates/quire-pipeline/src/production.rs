//! Production pipeline: clean, compile every section, write hashed output.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::compiler::{normalize, SectionChunk, SectionCompiler};
use crate::config::{Mode, PipelineConfig};
use crate::entry::{build_entry_map, EntryMap};
use crate::error::{BuildError, ConfigError, Result};
use crate::html::{html_bindings, HtmlBindings};
use crate::project::Project;
use crate::section::{SectionId, SectionRegistry};

/// What was written for one section.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub section: SectionId,
    pub html: String,
    pub scripts: Vec<String>,
    pub stylesheet: Option<String>,
}

/// Result of a production build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub sections: Vec<SectionReport>,
    /// Files written, pages included.
    pub files: usize,
    pub duration_ms: u64,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
pub struct ProductionPipeline {
    registry: Arc<SectionRegistry>,
    config: PipelineConfig,
    entries: EntryMap,
    bindings: HtmlBindings,
}

impl ProductionPipeline {
    /// Resolve every section's source and template up front; the first one
    /// missing fails the pipeline before the output directory is touched.
    pub fn new(project: &Project) -> Result<Self> {
        let config = project.pipeline_config(Mode::Production)?;
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
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Clean the output directory, compile all sections in parallel and
    /// write the results. A failed write removes the partial output.
    pub fn build(&self) -> Result<BuildReport> {
        let start = Instant::now();
        let output = &self.config.paths.output;

        self.check_output_dir()?;
        if self.config.clean {
            clean(output)?;
        } else {
            fs::create_dir_all(output).map_err(|e| BuildError::fs(output, e))?;
        }

        let compiler = SectionCompiler::new(&self.config, &self.registry);
        let jobs: Vec<_> = self.bindings.values().zip(self.entries.values()).collect();
        let chunks: Vec<SectionChunk> = jobs
            .par_iter()
            .map(|(binding, entry)| compiler.compile(binding, entry))
            .collect::<Result<_>>()?;

        let files = match write_chunks(output, &chunks) {
            Ok(files) => files,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(output) {
                    tracing::warn!(
                        "Failed to remove partial output {}: {}",
                        output.display(),
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        let sections = chunks
            .iter()
            .map(|chunk| {
                tracing::info!("Built {}", chunk.html_file);
                SectionReport {
                    section: chunk.section.clone(),
                    html: chunk.html_file.clone(),
                    scripts: std::iter::once(chunk.entry.as_str())
                        .chain(chunk.scripts().filter(|p| *p != chunk.entry))
                        .map(str::to_string)
                        .collect(),
                    stylesheet: chunk.stylesheet.clone(),
                }
            })
            .collect();

        Ok(BuildReport {
            sections,
            files,
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: output.clone(),
        })
    }

    /// Cleaning must never delete the project itself.
    fn check_output_dir(&self) -> Result<()> {
        let paths = &self.config.paths;
        let output = normalize(&paths.output);
        let inside = |p: &Path| normalize(p).starts_with(&output);

        if output.parent().is_none()
            || normalize(&paths.root) == output
            || inside(&paths.sources)
            || inside(&paths.templates)
        {
            return Err(ConfigError::UnsafeOutputDir { path: paths.output.clone() }.into());
        }
        Ok(())
    }
}

fn clean(output: &Path) -> Result<()> {
    if output.exists() {
        fs::remove_dir_all(output).map_err(|e| BuildError::fs(output, e))?;
    }
    fs::create_dir_all(output).map_err(|e| BuildError::fs(output, e))
}

/// Write pages and emitted files; a file two sections share is written once.
fn write_chunks(output: &Path, chunks: &[SectionChunk]) -> Result<usize> {
    let mut written: HashSet<&str> = HashSet::new();

    for chunk in chunks {
        write_file(&output.join(&chunk.html_file), chunk.html.as_bytes())?;
        written.insert(&chunk.html_file);

        for file in &chunk.files {
            if written.insert(&file.path) {
                write_file(&output.join(&file.path), &file.contents)?;
            }
        }
    }

    Ok(written.len())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::fs(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| BuildError::fs(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};
    use walkdir::WalkDir;

    const TEMPLATE: &str = concat!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <title>{{ section }}</title>\n  </head>\n",
        "  <body>\n    <div id=\"root\"></div>\n  </body>\n</html>\n",
    );

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Three sections: Intro imports a stylesheet and a shared helper, Forms
    /// imports the same helper, Lists imports nothing.
    fn fixture() -> TempDir {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "quire.toml", "sections = [\"Intro\", \"Forms\", \"Lists\"]\n");
        write(
            root,
            "src/js/Intro.js",
            concat!(
                "import '../scss/intro.scss';\n",
                "import { label } from './shared';\n",
                "console.log(label('intro'));\n",
            ),
        );
        write(
            root,
            "src/js/Forms.js",
            "import { label } from './shared';\nconsole.log(label('forms'));\n",
        );
        write(root, "src/js/Lists.js", "console.log('lists');\n");
        write(root, "src/js/shared.js", "export const label = (s) => `[${s}]`;\n");
        write(root, "src/scss/intro.scss", ".intro { p { margin: 0 } }\n");
        for s in ["Intro", "Forms", "Lists"] {
            write(root, &format!("src/{s}.html"), TEMPLATE);
        }
        temp
    }

    fn pipeline(temp: &TempDir) -> ProductionPipeline {
        let project = Project::load(&temp.path().join("quire.toml")).unwrap();
        ProductionPipeline::new(&project).unwrap()
    }

    /// Output directory as relative path -> contents.
    fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    fn names_for(snapshot: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<String> {
        snapshot.keys().filter(|k| k.starts_with(prefix)).cloned().collect()
    }

    #[test]
    fn every_section_gets_page_script_and_stylesheet_when_imported() {
        let temp = fixture();
        let report = pipeline(&temp).build().unwrap();
        let out = snapshot(&temp.path().join("dist"));

        for section in ["Intro", "Forms", "Lists"] {
            assert!(out.contains_key(&format!("{section}.html")), "{section}.html");
            assert!(!names_for(&out, &format!("js/{section}-")).is_empty(), "{section} script");
        }
        assert_eq!(names_for(&out, "css/Intro-").len(), 1);
        assert!(names_for(&out, "css/Forms-").is_empty());
        assert!(names_for(&out, "css/Lists-").is_empty());

        assert_eq!(report.sections.len(), 3);
        assert_eq!(report.files, out.len());
        assert!(report.sections[0].stylesheet.is_some());
    }

    #[test]
    fn pages_reference_only_their_own_bundles() {
        let temp = fixture();
        let report = pipeline(&temp).build().unwrap();
        let dist = temp.path().join("dist");

        for a in &report.sections {
            let html = fs::read_to_string(dist.join(&a.html)).unwrap();
            assert!(html.contains(a.scripts[0].as_str()), "{} should load its entry", a.section);

            for b in report.sections.iter().filter(|b| b.section != a.section) {
                for script in &b.scripts {
                    assert!(!html.contains(script.as_str()), "{} loads {script}", a.section);
                }
                if let Some(css) = &b.stylesheet {
                    assert!(!html.contains(css.as_str()));
                }
            }
        }
    }

    #[test]
    fn shared_modules_are_compiled_per_section() {
        let temp = fixture();
        pipeline(&temp).build().unwrap();
        let out = snapshot(&temp.path().join("dist"));

        assert_eq!(names_for(&out, "js/Intro-shared-").len(), 1);
        assert_eq!(names_for(&out, "js/Forms-shared-").len(), 1);
    }

    #[test]
    fn hashes_are_deterministic_and_local_to_the_changed_section() {
        let temp = fixture();
        pipeline(&temp).build().unwrap();
        let first = snapshot(&temp.path().join("dist"));

        pipeline(&temp).build().unwrap();
        let second = snapshot(&temp.path().join("dist"));
        assert_eq!(first, second);

        write(temp.path(), "src/js/Lists.js", "console.log('lists!');\n");
        pipeline(&temp).build().unwrap();
        let third = snapshot(&temp.path().join("dist"));

        assert_ne!(names_for(&first, "js/Lists-"), names_for(&third, "js/Lists-"));
        for prefix in ["js/Intro-", "js/Forms-", "css/Intro-"] {
            assert_eq!(names_for(&first, prefix), names_for(&third, prefix), "{prefix}");
        }
    }

    #[test]
    fn stale_files_do_not_survive_a_build() {
        let temp = fixture();
        let dist = temp.path().join("dist");
        pipeline(&temp).build().unwrap();
        let clean_run = snapshot(&dist);

        write(&dist, "foo.bak", "stale");
        write(&dist, "js/old-0000.js", "stale");
        pipeline(&temp).build().unwrap();

        assert_eq!(snapshot(&dist), clean_run);
    }

    #[test]
    fn pages_are_minified_and_reference_hashed_names() {
        let temp = fixture();
        let report = pipeline(&temp).build().unwrap();
        let intro = &report.sections[0];
        let html = fs::read_to_string(temp.path().join("dist/Intro.html")).unwrap();

        assert!(html.starts_with("<!doctype html><html><head><title>Intro</title>"), "{html}");
        assert!(!html.contains('\n'));
        let css = intro.stylesheet.as_deref().unwrap();
        assert!(html.contains(&format!("<link href=\"{css}\" rel=\"stylesheet\">")));
        let script = format!("<script type=\"module\" src=\"{}\"></script>", intro.scripts[0]);
        assert!(html.contains(&script));
    }

    #[test]
    fn missing_source_fails_before_touching_output() {
        let temp = fixture();
        write(temp.path(), "dist/keep.txt", "untouched");
        fs::remove_file(temp.path().join("src/js/Forms.js")).unwrap();

        let project = Project::load(&temp.path().join("quire.toml")).unwrap();
        let err = ProductionPipeline::new(&project).unwrap_err();

        assert!(matches!(
            err,
            BuildError::Config(ConfigError::MissingSource { section, .. }) if section == "Forms"
        ));
        assert!(temp.path().join("dist/keep.txt").exists());
    }

    #[test]
    fn empty_registry_builds_nothing() {
        let temp = tempdir().unwrap();
        write(temp.path(), "quire.toml", "sections = []\n");

        let report = pipeline(&temp).build().unwrap();

        assert!(report.sections.is_empty());
        assert_eq!(report.files, 0);
    }

    #[test]
    fn refuses_to_clean_the_project() {
        let temp = fixture();
        write(
            temp.path(),
            "quire.toml",
            "sections = [\"Intro\"]\n[paths]\noutput = \"src\"\n",
        );

        let err = pipeline(&temp).build().unwrap_err();

        assert!(matches!(err, BuildError::Config(ConfigError::UnsafeOutputDir { .. })));
        assert!(temp.path().join("src/js/Intro.js").exists());
    }

    #[test]
    fn optimizer_failures_abort_the_build() {
        let temp = fixture();
        write(temp.path(), "src/scss/intro.scss", ".intro { color: $nope; }\n");

        let err = pipeline(&temp).build().unwrap_err();
        assert!(matches!(err, BuildError::Optimizer { step: "sass", .. }));
    }
}
