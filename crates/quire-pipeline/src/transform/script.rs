//! Script transforms backed by oxc: import scanning, transpilation, minification.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{ImportDeclarationSpecifier, Statement};
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{Minifier, MinifierOptions};
use oxc_parser::{Parser, ParserReturn};
use oxc_semantic::SemanticBuilder;
use oxc_span::{SourceType, Span};
use oxc_transformer::{JsxRuntime, TransformOptions, Transformer};

/// How JSX elements compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsxRuntimeKind {
    /// `React.createElement(...)`; the module imports React itself.
    #[default]
    Classic,
    /// `jsx(...)` calls imported from `react/jsx-runtime`.
    Automatic,
}

/// Options for the transpile step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOptions {
    /// Lowest ECMAScript version to emit, e.g. `es2015` or `es2022`.
    pub target: String,
    pub jsx_runtime: JsxRuntimeKind,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        // es2022 keeps class fields native, so no helper runtime import is
        // emitted for them.
        Self {
            target: "es2022".to_string(),
            jsx_runtime: JsxRuntimeKind::Classic,
        }
    }
}

/// Local names an import binds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBindings {
    pub default: Option<String>,
    pub namespace: Option<String>,
    /// Whether any `{ named }` specifier is present.
    pub named: bool,
}

/// A static import or re-export found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub specifier: String,
    /// Byte range of the specifier literal, quotes included.
    pub specifier_span: (usize, usize),
    /// Byte range of the whole statement.
    pub statement_span: (usize, usize),
    pub bindings: ImportBindings,
    /// `export ... from` rather than `import`.
    pub reexport: bool,
}

fn source_type() -> SourceType {
    SourceType::mjs().with_jsx(true)
}

fn span_range(span: Span) -> (usize, usize) {
    (span.start as usize, span.end as usize)
}

fn parse<'a>(allocator: &'a Allocator, source: &'a str) -> Result<ParserReturn<'a>, String> {
    let ret = Parser::new(allocator, source, source_type()).parse();
    if ret.panicked || !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        return Err(if messages.is_empty() {
            "parser aborted".to_string()
        } else {
            messages.join("; ")
        });
    }
    Ok(ret)
}

/// Collect the module's static imports and `export ... from` declarations.
pub fn scan_imports(source: &str) -> Result<Vec<ImportRecord>, String> {
    let allocator = Allocator::default();
    let ret = parse(&allocator, source)?;

    let mut records = Vec::new();
    for stmt in &ret.program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                let mut bindings = ImportBindings::default();
                for item in decl.specifiers.iter().flatten() {
                    match item {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            bindings.default = Some(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            bindings.namespace = Some(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(_) => bindings.named = true,
                    }
                }
                records.push(ImportRecord {
                    specifier: decl.source.value.to_string(),
                    specifier_span: span_range(decl.source.span),
                    statement_span: span_range(decl.span),
                    bindings,
                    reexport: false,
                });
            }
            Statement::ExportAllDeclaration(decl) => records.push(ImportRecord {
                specifier: decl.source.value.to_string(),
                specifier_span: span_range(decl.source.span),
                statement_span: span_range(decl.span),
                bindings: ImportBindings::default(),
                reexport: true,
            }),
            Statement::ExportNamedDeclaration(decl) => {
                if let Some(src) = &decl.source {
                    records.push(ImportRecord {
                        specifier: src.value.to_string(),
                        specifier_span: span_range(src.span),
                        statement_span: span_range(decl.span),
                        bindings: ImportBindings::default(),
                        reexport: true,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(records)
}

/// Transpile one module: environment target lowering, JSX and class fields.
pub fn transpile(source: &str, path: &Path, options: &ScriptOptions) -> Result<String, String> {
    let allocator = Allocator::default();
    let ret = parse(&allocator, source)?;
    let mut program = ret.program;

    let mut transform_options = TransformOptions::from_target(&options.target)?;
    transform_options.jsx.runtime = match options.jsx_runtime {
        JsxRuntimeKind::Classic => JsxRuntime::Classic,
        JsxRuntimeKind::Automatic => JsxRuntime::Automatic,
    };

    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
    let ret = Transformer::new(&allocator, path, &transform_options)
        .build_with_scoping(scoping, &mut program);
    if !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }

    Ok(Codegen::new().build(&program).code)
}

/// Compress, mangle and print a module in minified form.
pub fn minify_script(source: &str) -> Result<String, String> {
    let allocator = Allocator::default();
    let ret = parse(&allocator, source)?;
    let mut program = ret.program;

    let ret = Minifier::new(MinifierOptions::default()).build(&allocator, &mut program);

    let code = Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(ret.scoping)
        .build(&program)
        .code;

    Ok(code)
}
