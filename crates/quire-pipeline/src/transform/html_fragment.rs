//! HTML fragments imported by scripts.
//!
//! A fragment becomes a string value. Local resource references in the
//! rewritten attributes are replaced with the URLs of the emitted files;
//! preserved attributes (lazy-load hooks such as `data-src`) are left alone.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z][^>]*>").expect("Invalid regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s)([A-Za-z_:][-A-Za-z0-9_:.]*)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("Invalid regex")
});

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("Invalid regex"));

/// Which attributes are rewritten and which are kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlFragmentOptions {
    pub rewrite: Vec<String>,
    pub preserve: Vec<String>,
}

impl Default for HtmlFragmentOptions {
    fn default() -> Self {
        Self {
            rewrite: vec!["src".to_string()],
            preserve: vec!["data-src".to_string()],
        }
    }
}

impl HtmlFragmentOptions {
    fn rewrites(&self, attr: &str) -> bool {
        let is = |list: &[String]| list.iter().any(|a| a.eq_ignore_ascii_case(attr));
        is(&self.rewrite) && !is(&self.preserve)
    }
}

/// Whether a reference points at a file next to the fragment rather than an
/// absolute URL, data URI or in-page anchor.
pub fn is_local_reference(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && !value.starts_with('#')
        && !value.starts_with('/')
        && !value.contains("{{")
        && !SCHEME_RE.is_match(value)
}

/// Rewrite local references in `html`, asking `resolve` for each one's
/// emitted URL. The first resolver error aborts the rewrite.
pub fn rewrite_references<E>(
    html: &str,
    options: &HtmlFragmentOptions,
    mut resolve: impl FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let mut error = None;

    let out = TAG_RE.replace_all(html, |tag: &Captures| {
        ATTR_RE
            .replace_all(&tag[0], |attr: &Captures| {
                let whole = attr[0].to_string();
                if error.is_some() || !options.rewrites(&attr[2]) {
                    return whole;
                }
                let (value, quote) = match (attr.get(4), attr.get(5)) {
                    (Some(v), _) => (v.as_str(), '"'),
                    (None, Some(v)) => (v.as_str(), '\''),
                    (None, None) => return whole,
                };
                if !is_local_reference(value) {
                    return whole;
                }
                match resolve(value.trim()) {
                    Ok(url) => format!("{}{}{}{quote}{url}{quote}", &attr[1], &attr[2], &attr[3]),
                    Err(e) => {
                        error = Some(e);
                        whole
                    }
                }
            })
            .into_owned()
    });

    match error {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}
