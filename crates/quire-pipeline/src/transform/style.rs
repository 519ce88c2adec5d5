//! Stylesheet transforms: Sass compilation via grass, CSS via lightningcss.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};

/// Compiled Sass plus every file the compiler read to produce it.
#[derive(Debug, Clone)]
pub struct SassOutput {
    pub css: String,
    pub loaded: Vec<PathBuf>,
}

/// Filesystem handed to grass that records each file it reads, so partials
/// show up among a section's inputs.
#[derive(Debug, Default)]
struct RecordingFs {
    read: RefCell<Vec<PathBuf>>,
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let bytes = fs::read(path)?;
        let mut read = self.read.borrow_mut();
        if !read.iter().any(|p| p == path) {
            read.push(path.to_path_buf());
        }
        Ok(bytes)
    }
}

/// Compile a `.scss` or `.sass` file. Relative `@use`/`@import` paths resolve
/// against the file's directory.
pub fn compile_sass(path: &Path) -> Result<SassOutput, String> {
    let recorder = RecordingFs::default();
    let mut options = grass::Options::default().fs(&recorder);
    if let Some(dir) = path.parent() {
        options = options.load_path(dir);
    }

    let css = grass::from_path(path, &options).map_err(|e| e.to_string())?;
    Ok(SassOutput {
        css,
        loaded: recorder.read.into_inner(),
    })
}

/// Parse CSS and report the first error, leaving the text unchanged.
pub fn check_css(css: &str, filename: &str) -> Result<(), String> {
    StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map(|_| ())
    .map_err(|e| e.to_string())
}

/// Minify CSS: merge rules, drop redundant declarations, strip whitespace.
pub fn optimize_css(css: &str, filename: &str) -> Result<String, String> {
    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions::default())
        .map_err(|e| e.to_string())?;

    let out = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    Ok(out.code)
}
