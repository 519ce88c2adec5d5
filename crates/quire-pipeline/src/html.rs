//! HTML bindings: one generated page per section.
//!
//! Each section's template is rendered with minijinja, then receives the tags
//! for exactly its own stylesheet and scripts. Production output is minified.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use minijinja::{context, Environment};
use regex::{Captures, Regex};

use crate::config::Mode;
use crate::error::ConfigError;
use crate::section::{SectionId, SectionRegistry};

/// The page generated for one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlBinding {
    pub section: SectionId,
    /// Output file name, `<section>.html`.
    pub filename: String,
    /// Template path, `<templates>/<section>.html`.
    pub template: PathBuf,
    /// Name of the only chunk the page references.
    pub chunk: String,
}

/// Bindings keyed by section, in registry order.
pub type HtmlBindings = IndexMap<SectionId, HtmlBinding>;

/// Fold the registry into bindings. A missing template is a configuration
/// error naming the section and the path.
pub fn html_bindings(
    registry: &SectionRegistry,
    templates: &Path,
) -> Result<HtmlBindings, ConfigError> {
    registry.iter().try_fold(IndexMap::new(), |mut map, section| {
        let template = templates.join(format!("{}.html", section));
        if !template.is_file() {
            return Err(ConfigError::MissingTemplate {
                section: section.to_string(),
                path: template,
            });
        }
        map.insert(
            section.clone(),
            HtmlBinding {
                section: section.clone(),
                filename: format!("{}.html", section),
                template,
                chunk: section.to_string(),
            },
        );
        Ok(map)
    })
}

/// URL under which an emitted file is referenced from a page.
pub fn public_url(public_path: &str, relative: &str) -> String {
    if public_path.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", public_path.trim_end_matches('/'), relative)
    }
}

/// Render a section template. Templates see `section`, `sections` and `mode`.
pub fn render_template(
    source: &str,
    section: &SectionId,
    registry: &SectionRegistry,
    mode: Mode,
) -> Result<String, String> {
    let env = Environment::new();
    let sections: Vec<&str> = registry.iter().map(|s| s.as_str()).collect();

    env.render_str(
        source,
        context! {
            section => section.as_str(),
            sections => sections,
            mode => mode.as_str(),
        },
    )
    .map_err(|e| e.to_string())
}

/// Insert stylesheet links before `</head>` and module scripts before
/// `</body>`. Missing closing tags mean the tags are appended.
pub fn inject_assets(html: &str, stylesheets: &[String], scripts: &[String]) -> String {
    let links: String = stylesheets
        .iter()
        .map(|href| format!("<link href=\"{}\" rel=\"stylesheet\">", href))
        .collect();
    let tags: String = scripts
        .iter()
        .map(|src| format!("<script type=\"module\" src=\"{}\"></script>", src))
        .collect();

    let with_links = insert_before_close(html, "</head>", &links);
    insert_before_close(&with_links, "</body>", &tags)
}

fn insert_before_close(html: &str, close: &str, insert: &str) -> String {
    if insert.is_empty() {
        return html.to_string();
    }
    match html.to_ascii_lowercase().rfind(close) {
        Some(pos) => format!("{}{}{}", &html[..pos], insert, &html[pos..]),
        None => format!("{}{}", html, insert),
    }
}

/// HTML minifier switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HtmlMinifyOptions {
    pub collapse_whitespace: bool,
    /// Conditional comments (`<!--[if ...]>`) are always kept.
    pub remove_comments: bool,
    /// `type="text"` on inputs, `method="get"` on forms, `language` on scripts.
    pub remove_redundant_attributes: bool,
    pub remove_script_type_attributes: bool,
    pub remove_style_link_type_attributes: bool,
    pub use_short_doctype: bool,
}

impl HtmlMinifyOptions {
    pub fn production() -> Self {
        Self {
            collapse_whitespace: true,
            remove_comments: true,
            remove_redundant_attributes: true,
            remove_script_type_attributes: true,
            remove_style_link_type_attributes: true,
            use_short_doctype: true,
        }
    }
}

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+)))?"#)
        .expect("Invalid regex")
});

const RAW_TEXT: &[&str] = &["pre", "textarea", "script", "style"];

const BLOCK: &[&str] = &[
    "html", "head", "body", "title", "meta", "link", "base", "script", "style", "noscript",
    "template", "div", "p", "section", "article", "header", "footer", "nav", "main", "aside",
    "ul", "ol", "li", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "table", "thead",
    "tbody", "tfoot", "tr", "td", "th", "form", "fieldset", "pre", "hr", "br", "figure",
    "blockquote", "option", "select",
];

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Tag(&'a str),
    Comment(&'a str),
    Declaration(&'a str),
    Raw {
        open: &'a str,
        rest: &'a str,
    },
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];
        let next_is_tag = bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'/');

        if rest.starts_with("<!--") {
            let end = rest[4..].find("-->").map(|p| i + 4 + p + 3).unwrap_or(html.len());
            tokens.push(Token::Comment(&html[i..end]));
            i = end;
        } else if rest.starts_with("<!") {
            let end = rest.find('>').map(|p| i + p + 1).unwrap_or(html.len());
            tokens.push(Token::Declaration(&html[i..end]));
            i = end;
        } else if rest.starts_with('<') && next_is_tag {
            let end = rest.find('>').map(|p| i + p + 1).unwrap_or(html.len());
            let tag = &html[i..end];
            let name = tag_name(tag);
            if !tag.starts_with("</") && RAW_TEXT.contains(&name.as_str()) {
                let close = format!("</{}", name);
                let close_end = lower[end..]
                    .find(&close)
                    .and_then(|p| lower[end + p..].find('>').map(|q| end + p + q + 1))
                    .unwrap_or(html.len());
                tokens.push(Token::Raw {
                    open: tag,
                    rest: &html[end..close_end],
                });
                i = close_end;
            } else {
                tokens.push(Token::Tag(tag));
                i = end;
            }
        } else {
            let skip = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            let end = rest[skip..].find('<').map(|p| i + skip + p).unwrap_or(html.len());
            tokens.push(Token::Text(&html[i..end]));
            i = end;
        }
    }

    tokens
}

fn minify_tag(tag: &str, options: &HtmlMinifyOptions) -> String {
    if tag.starts_with("</") {
        return tag.to_string();
    }
    let name = tag_name(tag);

    ATTR_RE
        .replace_all(tag, |cap: &Captures| {
            let attr = cap[1].to_ascii_lowercase();
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| m.as_str().trim().to_ascii_lowercase())
                .unwrap_or_default();

            let drop = match (name.as_str(), attr.as_str()) {
                ("script", "type") => {
                    options.remove_script_type_attributes
                        && matches!(value.as_str(), "text/javascript" | "application/javascript")
                }
                ("script", "language") => options.remove_redundant_attributes,
                ("style" | "link", "type") => {
                    options.remove_style_link_type_attributes && value == "text/css"
                }
                ("input", "type") => options.remove_redundant_attributes && value == "text",
                ("form", "method") => options.remove_redundant_attributes && value == "get",
                _ => false,
            };

            if drop {
                String::new()
            } else if options.collapse_whitespace {
                format!(" {}", cap[0].trim_start())
            } else {
                cap[0].to_string()
            }
        })
        .into_owned()
}

fn is_block(token: Option<&Token<'_>>) -> bool {
    match token {
        None => true,
        Some(Token::Tag(tag)) | Some(Token::Raw { open: tag, .. }) => {
            BLOCK.contains(&tag_name(tag).as_str())
        }
        Some(Token::Comment(_)) | Some(Token::Declaration(_)) => true,
        Some(Token::Text(_)) => false,
    }
}

fn collapse(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Minify a generated page. `pre`, `textarea`, `script` and `style` bodies
/// are kept byte for byte.
pub fn minify_html(html: &str, options: &HtmlMinifyOptions) -> String {
    let tokens = tokenize(html);
    let mut out = String::with_capacity(html.len());

    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::Comment(comment) => {
                if !options.remove_comments || comment.starts_with("<!--[if") {
                    out.push_str(comment);
                }
            }
            Token::Declaration(decl) => {
                if options.use_short_doctype && decl.to_ascii_lowercase().starts_with("<!doctype") {
                    out.push_str("<!doctype html>");
                } else {
                    out.push_str(decl);
                }
            }
            Token::Tag(tag) => out.push_str(&minify_tag(tag, options)),
            Token::Raw { open, rest } => {
                out.push_str(&minify_tag(open, options));
                out.push_str(rest);
            }
            Token::Text(text) => {
                if !options.collapse_whitespace {
                    out.push_str(text);
                    continue;
                }
                let mut collapsed = collapse(text);
                let prev = idx.checked_sub(1).and_then(|p| tokens.get(p));
                if is_block(prev) {
                    collapsed = collapsed.trim_start().to_string();
                }
                if is_block(tokens.get(idx + 1)) {
                    collapsed = collapsed.trim_end().to_string();
                }
                out.push_str(&collapsed);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> SectionRegistry {
        SectionRegistry::new(["Intro", "Forms"], None).unwrap()
    }

    #[test]
    fn binds_each_section_to_its_template() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("Intro.html"), "<html></html>").unwrap();
        std::fs::write(temp.path().join("Forms.html"), "<html></html>").unwrap();

        let bindings = html_bindings(&registry(), temp.path()).unwrap();

        let keys: Vec<&str> = bindings.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Intro", "Forms"]);
        let forms = &bindings["Forms"];
        assert_eq!(forms.filename, "Forms.html");
        assert_eq!(forms.chunk, "Forms");
        assert_eq!(forms.template, temp.path().join("Forms.html"));
    }

    #[test]
    fn missing_template_names_section_and_path() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("Intro.html"), "<html></html>").unwrap();

        let err = html_bindings(&registry(), temp.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingTemplate { section, path }
                if section == "Forms" && path == temp.path().join("Forms.html")
        ));
    }

    #[test]
    fn renders_template_context() {
        let out = render_template(
            "<title>{{ section }} ({{ mode }})</title>{% for s in sections %}[{{ s }}]{% endfor %}",
            &SectionId::new("Intro").unwrap(),
            &registry(),
            Mode::Production,
        )
        .unwrap();

        assert_eq!(out, "<title>Intro (production)</title>[Intro][Forms]");
    }

    #[test]
    fn template_syntax_errors_are_reported() {
        let section = SectionId::new("A").unwrap();
        let result = render_template("{% if %}", &section, &registry(), Mode::Development);
        assert!(result.is_err());
    }

    #[test]
    fn injects_only_given_assets() {
        let html = "<html><head><title>x</title></head><body><div id=\"root\"></div></body></html>";
        let out = inject_assets(
            html,
            &["css/Intro-abc.css".to_string()],
            &["js/Intro-def.js".to_string()],
        );

        assert_eq!(
            out,
            concat!(
                "<html><head><title>x</title>",
                "<link href=\"css/Intro-abc.css\" rel=\"stylesheet\"></head>",
                "<body><div id=\"root\"></div>",
                "<script type=\"module\" src=\"js/Intro-def.js\"></script></body></html>",
            )
        );
    }

    #[test]
    fn appends_when_closing_tags_are_missing() {
        let out = inject_assets("<div></div>", &[], &["js/A.js".to_string()]);
        assert_eq!(out, "<div></div><script type=\"module\" src=\"js/A.js\"></script>");
    }

    #[test]
    fn builds_public_urls() {
        assert_eq!(public_url("", "js/a.js"), "js/a.js");
        assert_eq!(public_url("/docs/", "js/a.js"), "/docs/js/a.js");
        assert_eq!(
            public_url("https://cdn.example.com", "js/a.js"),
            "https://cdn.example.com/js/a.js"
        );
    }

    #[test]
    fn production_minifier_applies_every_option() {
        let html = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN">
<html>
  <head>
    <!-- page head -->
    <!--[if IE]><p>old browser</p><![endif]-->
    <link rel="stylesheet" type="text/css" href="a.css">
    <style type="text/css">
      .a  {  color: red  }
    </style>
  </head>
  <body>
    <form method="get"><input type="text" name="q"></form>
    <p>Hello   <b>big</b>   world</p>
    <pre>  keep
   this  </pre>
    <script type="text/javascript" language="javascript">var  a  =  1;</script>
    <script type="module" src="js/a.js"></script>
  </body>
</html>
"#;

        let out = minify_html(html, &HtmlMinifyOptions::production());

        assert!(out.starts_with("<!doctype html><html><head>"), "{out}");
        assert!(!out.contains("page head"));
        assert!(out.contains("<!--[if IE]>"));
        assert!(out.contains(r#"<link rel="stylesheet" href="a.css">"#));
        assert!(out.contains("<style>\n      .a  {  color: red  }\n    </style>"));
        assert!(out.contains(r#"<form><input name="q"></form>"#));
        assert!(out.contains("<p>Hello <b>big</b> world</p>"));
        assert!(out.contains("<pre>  keep\n   this  </pre>"));
        assert!(out.contains("<script>var  a  =  1;</script>"));
        assert!(out.contains(r#"<script type="module" src="js/a.js"></script>"#));
        assert!(out.ends_with("</body></html>"));
    }

    #[test]
    fn default_options_leave_html_untouched() {
        let html = "<!DOCTYPE html>\n<!-- c -->\n<p>  a  </p>\n";
        assert_eq!(minify_html(html, &HtmlMinifyOptions::default()), html);
    }
}
