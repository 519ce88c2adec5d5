//! Pipeline configuration and the shared/mode-specific merge.
//!
//! A [`PipelineConfig`] is always produced by [`merge`]: scalar settings from
//! the mode-specific half override the shared half, and list-valued settings
//! (the transform rules) are concatenated with the shared entries first.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::html::HtmlMinifyOptions;
use crate::rules::RuleSet;

/// Which pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Mode::Development),
            "production" => Ok(Mode::Production),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default digest length, matching common bundler output.
pub const DEFAULT_HASH_LENGTH: usize = 20;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([A-Za-z]+)(?::(\d+))?\]").expect("Invalid filename token regex")
});

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Name,
    Ext,
    Hash(usize),
}

/// Output filename template such as `js/[name]-[contenthash].js`.
///
/// Tokens: `[name]`, `[ext]` (without the dot), `[contenthash]` or
/// `[contentHash]`, optionally with a length: `[contenthash:8]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameTemplate {
    raw: String,
    parts: Vec<Part>,
}

impl FilenameTemplate {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTemplate {
            template: raw.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut last = 0;
        for cap in TOKEN_RE.captures_iter(raw) {
            let Some(whole) = cap.get(0) else { continue };
            if whole.start() > last {
                parts.push(Part::Literal(raw[last..whole.start()].to_string()));
            }
            let length = cap.get(2).map(|m| m.as_str().parse::<usize>());
            let part = match (&cap[1], length) {
                ("name", None) => Part::Name,
                ("ext", None) => Part::Ext,
                ("contenthash" | "contentHash", None) => Part::Hash(DEFAULT_HASH_LENGTH),
                ("contenthash" | "contentHash", Some(Ok(n))) if (1..=64).contains(&n) => {
                    Part::Hash(n)
                }
                (token, _) => return Err(invalid(format!("unsupported token [{}]", token))),
            };
            parts.push(part);
            last = whole.end();
        }
        if last < raw.len() {
            parts.push(Part::Literal(raw[last..].to_string()));
        }

        if !parts.contains(&Part::Name) {
            return Err(invalid("missing [name]".to_string()));
        }
        if raw.starts_with('/') || raw.split('/').any(|c| c == "..") {
            return Err(invalid("must be a relative path inside the output".to_string()));
        }
        // Importers compute relative URLs from the directory before hashing.
        let dir = raw.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if dir.contains("[contenthash") || dir.contains("[contentHash") {
            return Err(invalid("[contenthash] may only appear in the file name".to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// Whether the rendered name depends on file content.
    pub fn uses_hash(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Hash(_)))
    }

    /// Render with a hex digest; the digest is truncated per token.
    pub fn render(&self, name: &str, ext: &str, hash: &str) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Name => out.push_str(name),
                Part::Ext => out.push_str(ext),
                Part::Hash(n) => out.push_str(&hash[..(*n).min(hash.len())]),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Output naming for every kind of emitted file.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Section entry scripts; `[name]` is the section.
    pub script: FilenameTemplate,
    /// Local modules a section imports; `[name]` is `<section>-<module stem>`.
    pub chunk: FilenameTemplate,
    /// Extracted section stylesheets.
    pub style: FilenameTemplate,
    /// Files emitted by the file step; `[name]` is the source stem.
    pub asset: FilenameTemplate,
}

impl OutputSettings {
    pub fn development() -> Result<Self, ConfigError> {
        Ok(Self {
            script: FilenameTemplate::parse("js/[name].js")?,
            chunk: FilenameTemplate::parse("js/[name]-[contenthash:8].js")?,
            style: FilenameTemplate::parse("css/[name].css")?,
            asset: FilenameTemplate::parse("img/[name]-[contenthash:8].[ext]")?,
        })
    }

    pub fn production() -> Result<Self, ConfigError> {
        Ok(Self {
            script: FilenameTemplate::parse("js/[name]-[contentHash].js")?,
            chunk: FilenameTemplate::parse("js/[name]-[contentHash].js")?,
            style: FilenameTemplate::parse("css/[name]-[contentHash].css")?,
            asset: FilenameTemplate::parse("img/[name]-[contentHash].[ext]")?,
        })
    }
}

/// Which optimizers run over emitted files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Optimization {
    pub minify_scripts: bool,
    pub minify_styles: bool,
    pub html: Option<HtmlMinifyOptions>,
}

/// Serving settings for the development pipeline.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct DevServerSettings {
    pub host: String,
    pub port: u16,
    pub open: bool,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            open: false,
        }
    }
}

/// Resolved project directories.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    /// Project root; relative asset paths are reported against it.
    pub root: PathBuf,
    pub sources: PathBuf,
    pub templates: PathBuf,
    pub output: PathBuf,
    pub script_extension: String,
}

/// Settings common to both modes.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    pub paths: Paths,
    pub rules: RuleSet,
    pub externals: BTreeMap<String, String>,
    pub public_path: String,
}

/// Settings owned by one mode.
#[derive(Debug, Clone)]
pub struct ModeSettings {
    pub mode: Mode,
    pub rules: RuleSet,
    pub output: OutputSettings,
    pub optimization: Optimization,
    pub clean: bool,
    /// Overrides the shared public path when set.
    pub public_path: Option<String>,
    pub dev_server: Option<DevServerSettings>,
}

impl ModeSettings {
    pub fn development(server: DevServerSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: Mode::Development,
            rules: crate::rules::style_rules(Mode::Development)?,
            output: OutputSettings::development()?,
            optimization: Optimization::default(),
            clean: false,
            public_path: None,
            dev_server: Some(server),
        })
    }

    pub fn production() -> Result<Self, ConfigError> {
        Ok(Self {
            mode: Mode::Production,
            rules: crate::rules::style_rules(Mode::Production)?,
            output: OutputSettings::production()?,
            optimization: Optimization {
                minify_scripts: true,
                minify_styles: true,
                html: Some(HtmlMinifyOptions::production()),
            },
            clean: true,
            public_path: None,
            dev_server: None,
        })
    }
}

/// Fully merged configuration for one invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub paths: Paths,
    pub rules: RuleSet,
    pub output: OutputSettings,
    pub optimization: Optimization,
    pub clean: bool,
    pub public_path: String,
    pub externals: BTreeMap<String, String>,
    pub dev_server: Option<DevServerSettings>,
}

/// Merge shared and mode-specific settings.
///
/// Mode-specific scalars win over shared ones; rules are concatenated with
/// the shared rules first, so a shared rule takes precedence on overlap.
pub fn merge(shared: SharedConfig, mode: ModeSettings) -> PipelineConfig {
    let mut rules = shared.rules;
    rules.extend(mode.rules);

    PipelineConfig {
        mode: mode.mode,
        paths: shared.paths,
        rules,
        output: mode.output,
        optimization: mode.optimization,
        clean: mode.clean,
        public_path: mode.public_path.unwrap_or(shared.public_path),
        externals: shared.externals,
        dev_server: mode.dev_server,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{shared_rules, Resolution};
    use crate::transform::ScriptOptions;

    fn shared() -> SharedConfig {
        SharedConfig {
            paths: Paths {
                root: PathBuf::from("/p"),
                sources: PathBuf::from("/p/src/js"),
                templates: PathBuf::from("/p/src"),
                output: PathBuf::from("/p/dist"),
                script_extension: "js".to_string(),
            },
            rules: shared_rules(&ScriptOptions::default()).unwrap(),
            externals: BTreeMap::new(),
            public_path: "/shared/".to_string(),
        }
    }

    #[test]
    fn parses_modes_strictly() {
        assert_eq!("development".parse::<Mode>().unwrap(), Mode::Development);
        assert_eq!("production".parse::<Mode>().unwrap(), Mode::Production);
        assert!(matches!("prod".parse::<Mode>(), Err(ConfigError::UnknownMode(m)) if m == "prod"));
        assert!("Production".parse::<Mode>().is_err());
    }

    #[test]
    fn renders_filename_templates() {
        let tpl = FilenameTemplate::parse("js/[name]-[contenthash:8].js").unwrap();
        assert_eq!(tpl.render("Intro", "js", "0123456789abcdef"), "js/Intro-01234567.js");
        assert!(tpl.uses_hash());

        let plain = FilenameTemplate::parse("img/[name].[ext]").unwrap();
        assert_eq!(plain.render("logo", "png", "ffff"), "img/logo.png");
        assert!(!plain.uses_hash());
    }

    #[test]
    fn accepts_both_hash_spellings() {
        let a = FilenameTemplate::parse("[name]-[contenthash].js").unwrap();
        let b = FilenameTemplate::parse("[name]-[contentHash].js").unwrap();
        let hash = "a".repeat(64);

        assert_eq!(a.render("x", "", &hash), b.render("x", "", &hash));
        assert_eq!(a.render("x", "", &hash).len(), "x-".len() + DEFAULT_HASH_LENGTH + ".js".len());
    }

    #[test]
    fn rejects_bad_templates() {
        for bad in [
            "js/[hash].js",
            "js/static.js",
            "../[name].js",
            "[name]-[contenthash:0].js",
            "[contenthash]/[name].js",
        ] {
            assert!(
                matches!(FilenameTemplate::parse(bad), Err(ConfigError::InvalidTemplate { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn mode_scalars_override_shared() {
        let mut prod = ModeSettings::production().unwrap();
        prod.public_path = Some("/cdn/".to_string());

        let config = merge(shared(), prod);
        assert_eq!(config.public_path, "/cdn/");
        assert!(config.clean);

        let dev = merge(shared(), ModeSettings::development(DevServerSettings::default()).unwrap());
        assert_eq!(dev.public_path, "/shared/");
        assert!(!dev.clean);
        assert!(dev.dev_server.is_some());
    }

    #[test]
    fn rules_are_concatenated_shared_first() {
        let shared_len = shared().rules.rules().len();
        let config = merge(shared(), ModeSettings::production().unwrap());

        assert_eq!(config.rules.rules().len(), shared_len + 1);
        assert_eq!(config.rules.rules()[0], shared().rules.rules()[0]);
        assert!(matches!(config.rules.resolve("a.scss"), Resolution::Chain(_)));
    }
}
