//! Scaffold a new project.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quire_pipeline::SectionId;

/// Write a project file, one section script and its template next to
/// `config`. Existing files are kept unless `overwrite` is set.
pub fn run(config: &Path, section: &str, overwrite: bool) -> Result<()> {
    let section = SectionId::new(section)?;
    let root = config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let files = [
        (config.to_path_buf(), DEFAULT_CONFIG.replace("{section}", section.as_str())),
        (
            root.join(format!("src/js/{section}.js")),
            DEFAULT_SCRIPT.replace("{section}", section.as_str()),
        ),
        (root.join(format!("src/{section}.html")), DEFAULT_TEMPLATE.to_string()),
        (root.join("src/scss/main.scss"), DEFAULT_STYLE.to_string()),
    ];

    for (path, contents) in files {
        if path.exists() && !overwrite {
            tracing::warn!(
                "{} already exists, keeping it (use --yes to overwrite)",
                path.display()
            );
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Created {}", path.display());
    }

    tracing::info!("Run 'quire --mode development' to start the dev server.");
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Quire project

# Each section is built as its own page from src/js/<Section>.js and
# src/<Section>.html. The last one is served at / by the dev server.
sections = ["{section}"]

[paths]
sources = "src/js"
templates = "src"
output = "dist"

[dev]
port = 8080
open = true

[build]
public_path = ""

# Bare imports listed here are loaded from the URL instead of bundled.
[externals]
react = "https://esm.sh/react@16.13.1"
react-dom = "https://esm.sh/react-dom@16.13.1"
"#;

const DEFAULT_SCRIPT: &str = r#"import '../scss/main.scss';

document.querySelector('#app').textContent = 'Hello from {section}';
"#;

const DEFAULT_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ section }}</title>
</head>
<body>
  <nav>
    {% for s in sections %}<a href="{{ s }}.html">{{ s }}</a>
    {% endfor %}
  </nav>
  <main id="app"></main>
</body>
</html>
"#;

const DEFAULT_STYLE: &str = r#"$accent: #3b6ea5;

body {
  font-family: system-ui, sans-serif;
  margin: 2rem;
}

nav a {
  color: $accent;
  margin-right: 1rem;
}
"#;
