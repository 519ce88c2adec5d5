//! Wrappers around the external tools each transform step delegates to.
//!
//! Every function returns its tool's diagnostic as a `String`; callers attach
//! the section, file and step before surfacing it.

pub mod html_fragment;
pub mod script;
pub mod style;

pub use html_fragment::{rewrite_references, HtmlFragmentOptions};
pub use script::{
    minify_script, scan_imports, transpile, ImportBindings, ImportRecord, JsxRuntimeKind,
    ScriptOptions,
};
pub use style::{check_css, compile_sass, optimize_css};
