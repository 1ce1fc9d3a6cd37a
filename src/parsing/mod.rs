//! Parser Registry. Dispatches by file extension to one
//! of three profiles: Python (indent-driven), brace-driven (Java, Kotlin,
//! TypeScript, JavaScript, C, C++, Go, Rust), and a generic regex fallback.
//!
//! One trait, one registration point; the backends are deliberately
//! line-wise scanners (sanitize + brace balance, indent tracking) rather
//! than grammar-driven parsers, trading fidelity on exotic syntax for
//! graceful degradation on code that does not parse.

mod brace;
mod common;
mod generic;
mod python;

use crate::model::{Relation, Symbol};

pub use common::sanitize_line;

/// Output of one parser invocation (: "returns `(symbols[],
/// relations[])`").
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub symbols: Vec<Symbol>,
    pub relations: Vec<Relation>,
}

pub trait LanguageParser: Send + Sync {
    fn parse(&self, file_key: &crate::model::FileKey, root_id: crate::model::RootId, content: &str) -> ParseOutput;
}

/// Looks up a parser by lowercase extension (without the leading dot).
/// Returns `None` for extensions with no dedicated profile, in which case
/// callers should fall back to `generic::GenericParser` with a
/// best-effort, empty-table configuration, or skip parsing entirely.
pub fn parser_for_extension(ext: &str) -> Option<Box<dyn LanguageParser>> {
    match ext.to_lowercase().as_str() {
        "py" => Some(Box::new(python::PythonParser)),
        "java" => Some(Box::new(brace::BraceParser::java())),
        "kt" | "kts" => Some(Box::new(brace::BraceParser::kotlin())),
        "ts" | "tsx" => Some(Box::new(brace::BraceParser::typescript())),
        "js" | "jsx" | "mjs" | "cjs" => Some(Box::new(brace::BraceParser::javascript())),
        "c" | "h" => Some(Box::new(brace::BraceParser::c())),
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => Some(Box::new(brace::BraceParser::cpp())),
        "go" => Some(Box::new(brace::BraceParser::go())),
        "rs" => Some(Box::new(brace::BraceParser::rust())),
        _ => None,
    }
}

/// Parses with the registry, and when no dedicated profile exists, applies
/// the generic fallback rather than skipping the file entirely.
pub fn parse_file(
    file_key: &crate::model::FileKey,
    root_id: crate::model::RootId,
    ext: &str,
    content: &str,
) -> ParseOutput {
    match parser_for_extension(ext) {
        Some(p) => p.parse(file_key, root_id, content),
        None => generic::GenericParser::default_profile().parse(file_key, root_id, content),
    }
}
