//! Python profile: indent-driven. A lightweight structural
//! scan substitutes for a full AST walk — tracking indentation of `class`
//! and `def`/`async def` headers is sufficient to recover nesting, and it
//! degrades gracefully on syntax this scanner doesn't understand rather
//! than failing closed, which a real parser would have to do.
//!
//! Relations come from the same scan: the base list of a `class Name(...)`
//! header becomes `extends` edges, and bare `ident(` call sites inside a
//! `def` body become `calls` edges from the innermost enclosing function.

use super::{LanguageParser, ParseOutput};
use crate::model::{FileKey, Relation, RelationKind, RootId, Symbol, SymbolId, SymbolKind, SymbolMetadata};

use regex::Regex;
use std::sync::OnceLock;

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?").unwrap())
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

fn decorator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*@([A-Za-z_][A-Za-z0-9_.]*)\s*(\((.*)\))?").unwrap())
}

fn route_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["']([^"']+)["']"#).unwrap())
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

/// Words that precede `(` in non-call positions. `print` and friends are
/// real callables and stay out of this list.
const PY_NON_CALL_WORDS: &[&str] = &[
    "if", "elif", "while", "for", "with", "def", "class", "return", "yield", "lambda", "assert",
    "raise", "except", "del", "not", "and", "or", "in", "is", "await", "async", "import", "from",
];

struct Open {
    indent: usize,
    name: String,
    start_line: u32,
    kind: SymbolKind,
    parent: Option<String>,
    docstring: Option<String>,
    metadata: SymbolMetadata,
    /// Base-class names from the `class Name(Base, ...)` header; empty for
    /// functions.
    bases: Vec<String>,
}

pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn parse(&self, file_key: &FileKey, root_id: RootId, content: &str) -> ParseOutput {
        let mut out = ParseOutput::default();
        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len() as u32;

        let mut stack: Vec<Open> = Vec::new();
        let mut pending_decorators: Vec<String> = Vec::new();
        let mut pending_annotations: Vec<String> = Vec::new();
        let mut pending_http_path: Option<String> = None;
        let mut in_triple: Option<&'static str> = None;

        let mut idx = 0usize;
        while idx < lines.len() {
            let line = lines[idx];
            let line_no = idx as u32 + 1;

            // Lines inside a triple-quoted string are string content, not
            // code: no declarations, no call sites.
            if let Some(marker) = in_triple {
                if line.matches(marker).count() % 2 == 1 {
                    in_triple = None;
                }
                idx += 1;
                continue;
            }
            if let Some(marker) = ["\"\"\"", "'''"].iter().copied().find(|m| line.matches(*m).count() % 2 == 1) {
                in_triple = Some(marker);
                idx += 1;
                continue;
            }

            if indent_of(line) == 0 && line.trim().is_empty() {
                idx += 1;
                continue;
            }

            if let Some(caps) = decorator_re().captures(line) {
                let name = caps[1].to_string();
                pending_annotations.push(name.to_uppercase());
                let full = if let Some(args) = caps.get(2) {
                    format!("@{}{}", &caps[1], args.as_str())
                } else {
                    format!("@{}", &caps[1])
                };
                pending_decorators.push(full);
                if name.to_lowercase().contains("route") || name.to_lowercase().contains("get")
                    || name.to_lowercase().contains("post") || name.to_lowercase().contains("put")
                    || name.to_lowercase().contains("delete") || name.to_lowercase().contains("patch")
                {
                    if let Some(arg_caps) = caps.get(3) {
                        if let Some(m) = route_arg_re().captures(arg_caps.as_str()) {
                            pending_http_path = Some(m[1].to_string());
                        }
                    }
                }
                idx += 1;
                continue;
            }

            let current_indent = indent_of(line);
            pop_closed(&mut stack, current_indent, line_no, file_key, root_id, &mut out);

            if let Some(caps) = class_re().captures(line) {
                let indent = caps[1].len();
                let name = caps[2].to_string();
                let parent = stack.last().map(|o| o.name.clone());
                let docstring = find_docstring(&lines, idx);
                let bases = caps.get(3).map(|b| parse_bases(b.as_str())).unwrap_or_default();
                stack.push(Open {
                    indent,
                    name,
                    start_line: line_no,
                    kind: SymbolKind::Class,
                    parent,
                    docstring,
                    metadata: take_metadata(&mut pending_annotations, &mut pending_decorators, &mut pending_http_path),
                    bases,
                });
            } else if let Some(caps) = def_re().captures(line) {
                let indent = caps[1].len();
                let name = caps[2].to_string();
                let parent_type = stack
                    .iter()
                    .rev()
                    .find(|o| o.indent < indent && o.kind == SymbolKind::Class)
                    .map(|o| o.name.clone());
                let kind = if parent_type.is_some() { SymbolKind::Method } else { SymbolKind::Function };
                let docstring = find_docstring(&lines, idx);
                stack.push(Open {
                    indent,
                    name,
                    start_line: line_no,
                    kind,
                    parent: parent_type,
                    docstring,
                    metadata: take_metadata(&mut pending_annotations, &mut pending_decorators, &mut pending_http_path),
                    bases: Vec::new(),
                });
            } else {
                if !line.trim().is_empty() {
                    pending_annotations.clear();
                    pending_decorators.clear();
                    pending_http_path = None;
                }
                if let Some(caller) = stack
                    .iter()
                    .rev()
                    .find(|o| matches!(o.kind, SymbolKind::Function | SymbolKind::Method))
                {
                    emit_calls(&py_sanitize(line), caller, file_key, root_id, line_no, &mut out);
                }
            }

            idx += 1;
        }

        while let Some(o) = stack.pop() {
            push_symbol(o, total_lines, file_key, root_id, &mut out);
        }

        out
    }
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

/// Blank string bodies and strip a trailing `#` comment, so quoted text
/// never yields call sites.
fn py_sanitize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_string {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    in_string = None;
                    out.push(q);
                }
            }
            None => {
                if c == '#' {
                    break;
                }
                if c == '"' || c == '\'' {
                    in_string = Some(c);
                    out.push(c);
                    out.push(c);
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Base names from a `class Name(...)` header: keyword arguments
/// (`metaclass=...`), starred forms and the implicit `object` root are
/// skipped.
fn parse_bases(arglist: &str) -> Vec<String> {
    arglist
        .split(',')
        .filter_map(|b| {
            let b = b.trim();
            if b.is_empty() || b.contains('=') || b.starts_with('*') || b == "object" {
                return None;
            }
            let b = b.split('[').next().unwrap_or(b).trim();
            let first = b.chars().next()?;
            if first.is_alphabetic() || first == '_' {
                Some(b.to_string())
            } else {
                None
            }
        })
        .collect()
}

fn emit_calls(
    sanitized: &str,
    caller: &Open,
    file_key: &FileKey,
    root_id: RootId,
    line_no: u32,
    out: &mut ParseOutput,
) {
    for caps in call_re().captures_iter(sanitized) {
        let name = &caps[1];
        if PY_NON_CALL_WORDS.contains(&name) || name == caller.name {
            continue;
        }
        let from_symbol_id = SymbolId::compute(file_key, caller.kind, &caller.name, caller.start_line);
        out.relations.push(Relation {
            from_file: file_key.clone(),
            from_root_id: root_id,
            from_symbol: caller.name.clone(),
            from_symbol_id,
            to_file: None,
            to_root_id: None,
            to_symbol: name.to_string(),
            to_symbol_id: None,
            kind: RelationKind::Calls,
            line: line_no,
        });
    }
}

fn pop_closed(
    stack: &mut Vec<Open>,
    current_indent: usize,
    line_no: u32,
    file_key: &FileKey,
    root_id: RootId,
    out: &mut ParseOutput,
) {
    // Only non-blank, non-decorator lines close scopes; callers only invoke
    // this for such lines.
    while let Some(top) = stack.last() {
        if current_indent <= top.indent {
            let o = stack.pop().unwrap();
            push_symbol(o, line_no.saturating_sub(1).max(1), file_key, root_id, out);
        } else {
            break;
        }
    }
}

fn push_symbol(o: Open, end_line: u32, file_key: &FileKey, root_id: RootId, out: &mut ParseOutput) {
    let id = SymbolId::compute(file_key, o.kind, &o.name, o.start_line);
    for base in &o.bases {
        out.relations.push(Relation {
            from_file: file_key.clone(),
            from_root_id: root_id,
            from_symbol: o.name.clone(),
            from_symbol_id: id,
            to_file: None,
            to_root_id: None,
            to_symbol: base.clone(),
            to_symbol_id: None,
            kind: RelationKind::Extends,
            line: o.start_line,
        });
    }
    out.symbols.push(Symbol {
        id,
        file: file_key.clone(),
        root_id,
        name: o.name,
        kind: o.kind,
        start_line: o.start_line,
        end_line: end_line.max(o.start_line),
        content: String::new(),
        parent: o.parent,
        docstring: o.docstring,
        metadata: o.metadata,
    });
}

fn take_metadata(
    annotations: &mut Vec<String>,
    decorators: &mut Vec<String>,
    http_path: &mut Option<String>,
) -> SymbolMetadata {
    SymbolMetadata {
        annotations: std::mem::take(annotations),
        decorators: std::mem::take(decorators),
        http_path: http_path.take(),
        http_methods: Vec::new(),
    }
}

/// First string-literal expression of the suite, or failing that, a
/// `/** ... */` block immediately preceding the declaration.
fn find_docstring(lines: &[&str], decl_idx: usize) -> Option<String> {
    if let Some(next) = lines.get(decl_idx + 1) {
        let t = next.trim();
        for quote in ["\"\"\"", "'''"] {
            if let Some(rest) = t.strip_prefix(quote) {
                if let Some(end) = rest.find(quote) {
                    return Some(rest[..end].trim().to_string());
                }
                // multi-line docstring
                let mut buf = vec![rest.to_string()];
                let mut i = decl_idx + 2;
                while i < lines.len() {
                    let l = lines[i];
                    if let Some(end) = l.find(quote) {
                        buf.push(l[..end].to_string());
                        return Some(buf.join("\n").trim().to_string());
                    }
                    buf.push(l.to_string());
                    i += 1;
                }
                return Some(buf.join("\n").trim().to_string());
            }
        }
    }
    if decl_idx > 0 {
        let prev = lines[decl_idx - 1].trim();
        if prev.ends_with("*/") {
            let mut buf = Vec::new();
            let mut i = decl_idx as isize - 1;
            while i >= 0 {
                buf.push(lines[i as usize].to_string());
                if lines[i as usize].trim_start().starts_with("/**") {
                    break;
                }
                i -= 1;
            }
            buf.reverse();
            return Some(super::common::clean_doc_block(&buf));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk() -> FileKey {
        FileKey::new(RootId::from_normalized_path("/w"), "a.py")
    }

    fn parse(src: &str) -> ParseOutput {
        PythonParser.parse(&fk(), RootId::from_normalized_path("/w"), src)
    }

    #[test]
    fn class_and_method_nesting() {
        let src = "class Foo:\n    def bar(self):\n        pass\n\nclass Baz:\n    pass\n";
        let out = parse(src);
        let bar = out.symbols.iter().find(|s| s.name == "bar").unwrap();
        assert_eq!(bar.kind, SymbolKind::Method);
        assert_eq!(bar.parent.as_deref(), Some("Foo"));
    }

    #[test]
    fn top_level_def_is_a_function() {
        let src = "def standalone():\n    pass\n";
        let out = parse(src);
        let f = out.symbols.iter().find(|s| s.name == "standalone").unwrap();
        assert_eq!(f.kind, SymbolKind::Function);
    }

    #[test]
    fn decorator_becomes_annotation_and_route_extracts_path() {
        let src = "@app.route(\"/api/users\")\ndef list_users():\n    pass\n";
        let out = parse(src);
        let f = out.symbols.iter().find(|s| s.name == "list_users").unwrap();
        assert_eq!(f.metadata.http_path.as_deref(), Some("/api/users"));
        assert!(f.metadata.decorators.iter().any(|d| d.starts_with("@app.route")));
    }

    #[test]
    fn docstring_is_first_string_expression() {
        let src = "def f():\n    \"\"\"Does a thing.\"\"\"\n    pass\n";
        let out = parse(src);
        let f = out.symbols.iter().find(|s| s.name == "f").unwrap();
        assert_eq!(f.docstring.as_deref(), Some("Does a thing."));
    }

    #[test]
    fn class_bases_emit_extends_relations() {
        let src = "class Admin(User, PermissionsMixin, metaclass=Meta):\n    pass\n";
        let out = parse(src);
        let rels: Vec<_> = out
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Extends)
            .map(|r| (r.from_symbol.clone(), r.to_symbol.clone()))
            .collect();
        assert!(rels.contains(&("Admin".to_string(), "User".to_string())));
        assert!(rels.contains(&("Admin".to_string(), "PermissionsMixin".to_string())));
        assert!(!rels.iter().any(|(_, to)| to == "Meta"));
    }

    #[test]
    fn calls_inside_def_bodies_are_emitted() {
        let src = "def alpha():\n    beta()\n    gamma(1, delta())\n\ndef beta():\n    pass\n";
        let out = parse(src);
        let calls: Vec<_> = out
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls && r.from_symbol == "alpha")
            .map(|r| r.to_symbol.clone())
            .collect();
        assert!(calls.contains(&"beta".to_string()));
        assert!(calls.contains(&"gamma".to_string()));
        assert!(calls.contains(&"delta".to_string()));
    }

    #[test]
    fn method_calls_come_from_the_innermost_def() {
        let src = "class Repo:\n    def save(self):\n        self.validate()\n";
        let out = parse(src);
        let call = out
            .relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls && r.to_symbol == "validate")
            .unwrap();
        assert_eq!(call.from_symbol, "save");
    }

    #[test]
    fn control_flow_strings_and_docstrings_yield_no_calls() {
        let src = "def f():\n    \"\"\"Calls nothing(); honest.\n    see also other()\n    \"\"\"\n    if (x):\n        s = \"quoted(call)\"  # trailing(comment)\n";
        let out = parse(src);
        assert!(out.relations.iter().all(|r| r.kind != RelationKind::Calls));
    }
}
