//! Compiles one section into its page, scripts, stylesheet and assets.
//!
//! The entry script and every local module it reaches are emitted as separate
//! files. Modules are processed dependency-first so an importer's specifiers
//! can be rewritten to the final (hashed) names of what it imports before its
//! own content is hashed. Nothing is shared between sections: a module both
//! sections import is compiled once for each.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{FilenameTemplate, PipelineConfig};
use crate::error::{BuildError, ConfigError, Result};
use crate::hash::content_hash;
use crate::html::{inject_assets, minify_html, public_url, render_template, HtmlBinding};
use crate::rules::{NativeKind, Resolution, Step};
use crate::section::{SectionId, SectionRegistry};
use crate::transform::{
    check_css, compile_sass, minify_script, optimize_css, rewrite_references, scan_imports,
    transpile, ImportRecord, ScriptOptions,
};

/// What an emitted file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Script,
    Style,
    Asset,
}

/// A file produced for a section, addressed relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    /// `/`-separated, e.g. `js/Intro-3f2a....js`.
    pub path: String,
    pub contents: Vec<u8>,
    pub kind: FileKind,
}

/// A stylesheet applied at runtime through a `<style>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedStyle {
    /// Project-relative source path; also the element's `data-quire-style`.
    pub id: String,
    pub css: String,
}

/// Everything compiled for one section.
#[derive(Debug, Clone)]
pub struct SectionChunk {
    pub section: SectionId,
    /// `<section>.html`
    pub html_file: String,
    pub html: String,
    /// Path of the entry script.
    pub entry: String,
    /// Path of the extracted stylesheet, when the section imports any style.
    pub stylesheet: Option<String>,
    pub files: Vec<EmittedFile>,
    /// Styles the section injects at runtime, in import order.
    pub styles: Vec<InjectedStyle>,
    /// Every source file read while compiling, template included.
    pub inputs: BTreeSet<PathBuf>,
}

impl SectionChunk {
    pub fn file(&self, path: &str) -> Option<&EmittedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|f| f.kind == FileKind::Script)
            .map(|f| f.path.as_str())
    }

    pub fn depends_on(&self, path: &Path) -> bool {
        self.inputs.contains(path)
    }
}

/// Compiles sections against one pipeline configuration.
pub struct SectionCompiler<'a> {
    config: &'a PipelineConfig,
    registry: &'a SectionRegistry,
    client_scripts: &'a [String],
}

impl<'a> SectionCompiler<'a> {
    pub fn new(config: &'a PipelineConfig, registry: &'a SectionRegistry) -> Self {
        Self {
            config,
            registry,
            client_scripts: &[],
        }
    }

    /// Extra script URLs added to every page after the section's own entry.
    pub fn with_client_scripts(mut self, scripts: &'a [String]) -> Self {
        self.client_scripts = scripts;
        self
    }

    pub fn compile(&self, binding: &HtmlBinding, entry: &Path) -> Result<SectionChunk> {
        tracing::debug!("Compiling section {}", binding.section);

        let mut build = SectionBuild::new(self.config, &binding.section, &binding.chunk);
        let entry_path = build.entry(entry)?;
        let stylesheet = build.extracted_stylesheet()?;
        let html = self.page(binding, &mut build, &entry_path, stylesheet.as_deref())?;

        Ok(SectionChunk {
            section: binding.section.clone(),
            html_file: binding.filename.clone(),
            html,
            entry: entry_path,
            stylesheet,
            files: build.files,
            styles: build.injected,
            inputs: build.inputs,
        })
    }

    fn page(
        &self,
        binding: &HtmlBinding,
        build: &mut SectionBuild<'_>,
        entry: &str,
        stylesheet: Option<&str>,
    ) -> Result<String> {
        let source = fs::read_to_string(&binding.template)
            .map_err(|e| BuildError::fs(&binding.template, e))?;
        build.inputs.insert(binding.template.clone());

        let rendered = render_template(&source, &binding.section, self.registry, self.config.mode)
            .map_err(|e| {
                BuildError::optimizer(binding.section.as_str(), &binding.template, "template", e)
            })?;

        let public_path = &self.config.public_path;
        let styles: Vec<String> =
            stylesheet.map(|s| public_url(public_path, s)).into_iter().collect();
        let mut scripts = vec![public_url(public_path, entry)];
        scripts.extend(self.client_scripts.iter().cloned());

        let html = inject_assets(&rendered, &styles, &scripts);
        Ok(match &self.config.optimization.html {
            Some(options) => minify_html(&html, options),
            None => html,
        })
    }
}

/// How an import was satisfied, memoized per module path.
#[derive(Debug, Clone)]
enum Linked {
    /// An emitted script; importers reference its output path.
    Script(String),
    /// An emitted file; importers receive its public URL.
    Asset(String),
    /// A JavaScript expression bound to the default import.
    Value(String),
    /// CSS moved into the section stylesheet.
    Extracted,
    /// CSS applied at runtime by the importer.
    Injected(InjectedStyle),
}

/// Where a resource module is in its step chain.
enum Stage {
    Source,
    Css(String),
    Done(Linked),
}

impl Stage {
    fn describe(&self) -> &'static str {
        match self {
            Stage::Source => "the source file",
            Stage::Css(_) => "CSS",
            Stage::Done(_) => "a finished module",
        }
    }
}

enum Target<'r> {
    Script(Option<&'r ScriptOptions>),
    Json,
    Resource(&'r [Step]),
    Unmatched,
}

struct SectionBuild<'a> {
    config: &'a PipelineConfig,
    section: &'a SectionId,
    /// Base name of the entry script; module chunks are prefixed with it.
    chunk: &'a str,
    modules: HashMap<PathBuf, Linked>,
    stack: Vec<PathBuf>,
    names: HashMap<String, PathBuf>,
    files: Vec<EmittedFile>,
    extracted: Vec<(PathBuf, String)>,
    injected: Vec<InjectedStyle>,
    inputs: BTreeSet<PathBuf>,
}

impl<'a> SectionBuild<'a> {
    fn new(config: &'a PipelineConfig, section: &'a SectionId, chunk: &'a str) -> Self {
        Self {
            config,
            section,
            chunk,
            modules: HashMap::new(),
            stack: Vec::new(),
            names: HashMap::new(),
            files: Vec::new(),
            extracted: Vec::new(),
            injected: Vec::new(),
            inputs: BTreeSet::new(),
        }
    }

    fn section_name(&self) -> &str {
        self.section.as_str()
    }

    /// Project-relative, `/`-separated path used for rule matching and ids.
    fn relative(&self, path: &Path) -> String {
        let root = normalize(&self.config.paths.root);
        let path = normalize(path);
        let rel = path.strip_prefix(&root).unwrap_or(&path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn classify(&self, path: &Path) -> Target<'a> {
        let config = self.config;
        match config.rules.resolve(&self.relative(path)) {
            Resolution::Chain([Step::Transpile(options)]) => Target::Script(Some(options)),
            Resolution::Chain(steps) => Target::Resource(steps),
            Resolution::Native(NativeKind::Script) => Target::Script(None),
            Resolution::Native(NativeKind::Json) => Target::Json,
            Resolution::Unmatched => Target::Unmatched,
        }
    }

    fn entry(&mut self, entry: &Path) -> Result<String> {
        let path = normalize(entry);
        match self.classify(&path) {
            Target::Script(options) => {
                let config = self.config;
                let name = self.chunk;
                self.script(&path, name, &config.output.script, options)
            }
            _ => Err(ConfigError::InvalidChain {
                path,
                reason: "a section entry must be handled as a script".to_string(),
            }
            .into()),
        }
    }

    fn load(&mut self, path: &Path) -> Result<Linked> {
        if let Some(linked) = self.modules.get(path) {
            return Ok(linked.clone());
        }
        if self.stack.iter().any(|p| p == path) {
            return Err(ConfigError::CircularImport {
                section: self.section_name().to_string(),
                path: path.to_path_buf(),
            }
            .into());
        }

        let linked = match self.classify(path) {
            Target::Script(options) => {
                let config = self.config;
                let name = self.chunk_name(path);
                Linked::Script(self.script(path, &name, &config.output.chunk, options)?)
            }
            Target::Json => self.json(path)?,
            Target::Resource(steps) => self.resource(path, steps)?,
            Target::Unmatched => {
                return Err(ConfigError::UnmatchedAsset {
                    section: self.section_name().to_string(),
                    path: path.to_path_buf(),
                }
                .into())
            }
        };

        self.modules.insert(path.to_path_buf(), linked.clone());
        Ok(linked)
    }

    /// `<chunk>-<stem>`, suffixed when two modules share a stem.
    fn chunk_name(&mut self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let base = format!("{}-{}", self.chunk, stem);

        let mut name = base.clone();
        let mut n = 2;
        while self.names.get(&name).is_some_and(|p| p != path) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        self.names.insert(name.clone(), path.to_path_buf());
        name
    }

    fn read(&mut self, path: &Path) -> Result<String> {
        let text = fs::read_to_string(path).map_err(|e| BuildError::fs(path, e))?;
        self.inputs.insert(path.to_path_buf());
        Ok(text)
    }

    fn optimizer_error(&self, path: &Path, step: &'static str, message: String) -> BuildError {
        BuildError::optimizer(self.section_name(), path, step, message)
    }

    fn script(
        &mut self,
        path: &Path,
        name: &str,
        template: &FilenameTemplate,
        options: Option<&ScriptOptions>,
    ) -> Result<String> {
        self.stack.push(path.to_path_buf());

        let source = self.read(path)?;
        let code = match options {
            Some(options) => transpile(&source, path, options)
                .map_err(|e| self.optimizer_error(path, "transpile", e))?,
            None => source,
        };

        let dir = template_dir(template, name, "js");
        let mut code = self.link(path, &dir, &code)?;

        if self.config.optimization.minify_scripts {
            code = minify_script(&code)
                .map_err(|e| self.optimizer_error(path, "minify-script", e))?;
        }

        let hash = content_hash(code.as_bytes());
        let out = template.render(name, "js", &hash);
        self.emit(out.clone(), code.into_bytes(), FileKind::Script);

        self.stack.pop();
        Ok(out)
    }

    /// Resolve and rewrite every import of one module.
    fn link(&mut self, importer: &Path, importer_dir: &str, code: &str) -> Result<String> {
        let records =
            scan_imports(code).map_err(|e| self.optimizer_error(importer, "parse", e))?;

        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for record in &records {
            if !is_relative(&record.specifier) {
                if let Some(url) = self.config.externals.get(&record.specifier) {
                    let (start, end) = record.specifier_span;
                    edits.push((start, end, js_string(url)));
                }
                continue;
            }

            let target = resolve_module(importer, &record.specifier).ok_or_else(|| {
                ConfigError::UnresolvedImport {
                    section: self.section_name().to_string(),
                    importer: importer.to_path_buf(),
                    specifier: record.specifier.clone(),
                }
            })?;

            let (start, end) = record.statement_span;
            match self.load(&target)? {
                Linked::Script(out) => {
                    let (start, end) = record.specifier_span;
                    edits.push((start, end, js_string(&relative_url(importer_dir, &out))));
                }
                Linked::Asset(url) => {
                    edits.push((start, end, self.bind(record, &target, &js_string(&url))?))
                }
                Linked::Value(expr) => edits.push((start, end, self.bind(record, &target, &expr)?)),
                Linked::Extracted => edits.push((start, end, self.bind(record, &target, "{}")?)),
                Linked::Injected(style) => {
                    let mut replacement = inject_snippet(&style);
                    replacement.push_str(&self.bind(record, &target, "{}")?);
                    edits.push((start, end, replacement));
                }
            }
        }

        let mut out = code.to_string();
        for (start, end, replacement) in edits.into_iter().rev() {
            out.replace_range(start..end, &replacement);
        }
        Ok(out)
    }

    /// Declarations standing in for an import of a default-only module.
    fn bind(&self, record: &ImportRecord, target: &Path, expr: &str) -> Result<String> {
        if record.reexport || record.bindings.named {
            return Err(ConfigError::NamedImportFromResource {
                section: self.section_name().to_string(),
                path: target.to_path_buf(),
            }
            .into());
        }

        let mut out = String::new();
        if let Some(local) = &record.bindings.default {
            out.push_str(&format!("const {} = {};", local, expr));
        }
        if let Some(ns) = &record.bindings.namespace {
            out.push_str(&format!("const {} = Object.freeze({{ default: {} }});", ns, expr));
        }
        Ok(out)
    }

    fn json(&mut self, path: &Path) -> Result<Linked> {
        let text = self.read(path)?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| self.optimizer_error(path, "json", e.to_string()))?;
        Ok(Linked::Value(value.to_string()))
    }

    /// Run a resource module through its step chain.
    fn resource(&mut self, path: &Path, steps: &[Step]) -> Result<Linked> {
        let invalid = |reason: String| -> BuildError {
            ConfigError::InvalidChain {
                path: path.to_path_buf(),
                reason,
            }
            .into()
        };

        let mut stage = Stage::Source;
        for step in steps {
            stage = match (stage, step) {
                (Stage::Source, Step::EmitFile) => Stage::Done(self.emit_file(path)?),
                (Stage::Source, Step::HtmlFragment(options)) => {
                    let html = self.read(path)?;
                    let rewritten = rewrite_references(&html, options, |specifier| {
                        self.fragment_reference(path, specifier)
                    })?;
                    Stage::Done(Linked::Value(js_string(&rewritten)))
                }
                (Stage::Source, Step::Sass) => {
                    let out =
                        compile_sass(path).map_err(|e| self.optimizer_error(path, "sass", e))?;
                    self.inputs.insert(path.to_path_buf());
                    self.inputs.extend(out.loaded.iter().map(|p| normalize(p)));
                    Stage::Css(out.css)
                }
                (Stage::Source, Step::Css) => {
                    let css = self.read(path)?;
                    self.check(path, &css)?;
                    Stage::Css(css)
                }
                (Stage::Css(css), Step::Css) => {
                    self.check(path, &css)?;
                    Stage::Css(css)
                }
                (Stage::Css(css), Step::InjectStyle) => {
                    let css = if self.config.optimization.minify_styles {
                        optimize_css(&css, &self.relative(path))
                            .map_err(|e| self.optimizer_error(path, "minify-style", e))?
                    } else {
                        css
                    };
                    let style = InjectedStyle {
                        id: self.relative(path),
                        css,
                    };
                    self.injected.push(style.clone());
                    Stage::Done(Linked::Injected(style))
                }
                (Stage::Css(css), Step::ExtractStyle) => {
                    self.extracted.push((path.to_path_buf(), css));
                    Stage::Done(Linked::Extracted)
                }
                (stage, step) => {
                    return Err(invalid(format!(
                        "step '{}' cannot follow {}",
                        step.name(),
                        stage.describe()
                    )))
                }
            };
        }

        match stage {
            Stage::Done(linked) => Ok(linked),
            other => Err(invalid(format!("chain ends with {}", other.describe()))),
        }
    }

    fn check(&self, path: &Path, css: &str) -> Result<()> {
        check_css(css, &self.relative(path)).map_err(|e| self.optimizer_error(path, "css", e))
    }

    fn emit_file(&mut self, path: &Path) -> Result<Linked> {
        let bytes = fs::read(path).map_err(|e| BuildError::fs(path, e))?;
        self.inputs.insert(path.to_path_buf());

        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let ext = path.extension().map(|s| s.to_string_lossy()).unwrap_or_default();
        let out = self
            .config
            .output
            .asset
            .render(&stem, &ext, &content_hash(&bytes));

        self.emit(out.clone(), bytes, FileKind::Asset);
        Ok(Linked::Asset(public_url(&self.config.public_path, &out)))
    }

    /// URL for a resource referenced from an HTML fragment.
    fn fragment_reference(&mut self, fragment: &Path, specifier: &str) -> Result<String> {
        let target = fragment
            .parent()
            .map(|dir| normalize(&dir.join(specifier)))
            .filter(|p| p.is_file())
            .ok_or_else(|| ConfigError::UnresolvedImport {
                section: self.section_name().to_string(),
                importer: fragment.to_path_buf(),
                specifier: specifier.to_string(),
            })?;

        match self.load(&target)? {
            Linked::Asset(url) => Ok(url),
            _ => Err(ConfigError::InvalidChain {
                path: target,
                reason: "resources referenced from HTML must be emitted as files".to_string(),
            }
            .into()),
        }
    }

    fn emit(&mut self, path: String, contents: Vec<u8>, kind: FileKind) {
        if self.files.iter().any(|f| f.path == path) {
            return;
        }
        self.files.push(EmittedFile {
            path,
            contents,
            kind,
        });
    }

    /// Concatenate extracted CSS, in import order, into the section stylesheet.
    fn extracted_stylesheet(&mut self) -> Result<Option<String>> {
        let Some((first, _)) = self.extracted.first() else {
            return Ok(None);
        };
        let first = first.clone();

        let css = self
            .extracted
            .iter()
            .map(|(_, css)| css.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let css = if self.config.optimization.minify_styles {
            optimize_css(&css, &format!("{}.css", self.section))
                .map_err(|e| self.optimizer_error(&first, "minify-style", e))?
        } else {
            css
        };

        let out = self
            .config
            .output
            .style
            .render(self.section_name(), "css", &content_hash(css.as_bytes()));
        self.emit(out.clone(), css.into_bytes(), FileKind::Style);
        Ok(Some(out))
    }
}

/// `./` and `../` specifiers are resolved on disk; everything else is left
/// to the browser (after the externals rewrite).
fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

const RESOLVE_EXTENSIONS: &[&str] = &["js", "mjs", "json"];

/// Resolve a relative specifier: the exact file, then with each known
/// extension appended, then the directory's `index.js`.
pub fn resolve_module(importer: &Path, specifier: &str) -> Option<PathBuf> {
    let base = normalize(&importer.parent()?.join(specifier));
    if base.is_file() {
        return Some(base);
    }
    for ext in RESOLVE_EXTENSIONS {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let index = base.join("index.js");
    index.is_file().then_some(index)
}

/// Lexically remove `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn template_dir(template: &FilenameTemplate, name: &str, ext: &str) -> String {
    let rendered = template.render(name, ext, "");
    rendered
        .rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

/// Relative import URL from a module in `from_dir` to the file at `to`.
fn relative_url(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count()
        .min(to.len().saturating_sub(1));

    let ups = from.len() - common;
    let mut url = if ups == 0 {
        "./".to_string()
    } else {
        "../".repeat(ups)
    };
    url.push_str(&to[common..].join("/"));
    url
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Statement that finds or creates the `<style>` element for `style` and
/// replaces its content.
fn inject_snippet(style: &InjectedStyle) -> String {
    format!(
        concat!(
            "((id, css) => {{ ",
            "let el = Array.from(document.querySelectorAll(\"style[data-quire-style]\"))",
            ".find((s) => s.dataset.quireStyle === id); ",
            "if (!el) {{ el = document.createElement(\"style\"); el.dataset.quireStyle = id; ",
            "document.head.appendChild(el); }} ",
            "el.textContent = css; }})({}, {});",
        ),
        js_string(&style.id),
        js_string(&style.css)
    )
}
