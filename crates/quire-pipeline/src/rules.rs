//! Transform rules: which chain of steps handles a given asset path.
//!
//! Rules are evaluated in declared order against the project-relative,
//! `/`-separated path of each asset. The first rule whose `test` matches and
//! whose `exclude` does not match supplies the chain. Steps run in the order
//! they are listed.

use std::fmt;

use regex::Regex;

use crate::config::Mode;
use crate::error::ConfigError;
use crate::transform::{HtmlFragmentOptions, ScriptOptions};

/// One transformation applied to an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Transpile a script module (environment target, JSX, class fields).
    Transpile(ScriptOptions),
    /// Emit the file unchanged under a content-hashed name; importers get its URL.
    EmitFile,
    /// Load an HTML fragment as a string, rewriting local resource references.
    HtmlFragment(HtmlFragmentOptions),
    /// Compile Sass/SCSS to CSS.
    Sass,
    /// Parse and validate CSS.
    Css,
    /// Inject CSS at runtime through a `<style>` element.
    InjectStyle,
    /// Collect CSS into the section's standalone stylesheet.
    ExtractStyle,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Transpile(_) => "transpile",
            Step::EmitFile => "emit-file",
            Step::HtmlFragment(_) => "html-fragment",
            Step::Sass => "sass",
            Step::Css => "css",
            Step::InjectStyle => "inject-style",
            Step::ExtractStyle => "extract-style",
        }
    }
}

/// A compiled path pattern that remembers its source text.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A single rule: test pattern, optional exclusion and the step chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub test: PathPattern,
    pub exclude: Option<PathPattern>,
    pub steps: Vec<Step>,
}

impl Rule {
    pub fn new(test: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            test: PathPattern::new(test)?,
            exclude: None,
            steps: Vec::new(),
        })
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.exclude = Some(PathPattern::new(pattern)?);
        Ok(self)
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|e| e.is_match(path))
    }
}

/// Asset kinds the pipeline understands without any rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// An ECMAScript module, passed through untranspiled.
    Script,
    /// JSON, exposed as the default export.
    Json,
}

/// Outcome of matching a path against the rules.
#[derive(Debug, PartialEq)]
pub enum Resolution<'a> {
    Chain(&'a [Step]),
    Native(NativeKind),
    Unmatched,
}

/// Ordered list of rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Append `other` after the rules already present.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    /// Find the chain for a project-relative, `/`-separated path.
    pub fn resolve(&self, path: &str) -> Resolution<'_> {
        if let Some(rule) = self.rules.iter().find(|r| r.matches(path)) {
            return Resolution::Chain(&rule.steps);
        }

        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "mjs" => Resolution::Native(NativeKind::Script),
            "json" => Resolution::Native(NativeKind::Json),
            _ => Resolution::Unmatched,
        }
    }
}

/// Dependency directories never handed to the transpiler.
pub const DEPENDENCY_DIRS: &str = r"(node_modules|bower_components)";

/// Rules shared by both modes: scripts, raster images and HTML fragments.
pub fn shared_rules(script: &ScriptOptions) -> Result<RuleSet, ConfigError> {
    Ok(RuleSet::new(vec![
        Rule::new(r"\.m?js$")?
            .exclude(DEPENDENCY_DIRS)?
            .step(Step::Transpile(script.clone())),
        Rule::new(r"(?i)\.(png|jpe?g|gif)$")?.step(Step::EmitFile),
        Rule::new(r"\.html$")?.step(Step::HtmlFragment(HtmlFragmentOptions::default())),
    ]))
}

/// The stylesheet rule, the one rule that differs between modes.
pub fn style_rules(mode: Mode) -> Result<RuleSet, ConfigError> {
    let finish = match mode {
        Mode::Development => Step::InjectStyle,
        Mode::Production => Step::ExtractStyle,
    };

    Ok(RuleSet::new(vec![Rule::new(r"(?i)\.s[ac]ss$")?
        .step(Step::Sass)
        .step(Step::Css)
        .step(finish)]))
}
