//! Brace-driven parser profile for Java, Kotlin, TypeScript,
//! JavaScript, C, C++, Go and Rust. One engine, parameterized per language
//! by a small keyword table, since the scanning algorithm itself — sanitize,
//! track brace balance, close on balance drop, maintain a pending type
//! declaration for inherited bases — does not vary across these languages.

use super::common::{brace_delta, clean_doc_block, is_control_flow_keyword, sanitize_line};
use crate::model::{FileKey, RelationKind, Relation, RootId, Symbol, SymbolKind, SymbolMetadata};
use super::{LanguageParser, ParseOutput};

use regex::Regex;
use std::sync::OnceLock;

struct LangProfile {
    /// Keywords that introduce a type declaration, mapped to the raw kind
    /// word seen in source (normalized afterwards, e.g. `record`→`class`).
    kind_keywords: &'static [&'static str],
    method_keywords: &'static [&'static str],
    visibility_keywords: &'static [&'static str],
    inherits_keywords: &'static [&'static str],
    /// Go/Rust lack `extends`/`implements`; inheritance is expressed via
    /// `:` (C++) or not scanned at all when empty.
    inherits_colon: bool,
}

fn normalize_kind(raw: &str) -> SymbolKind {
    match raw {
        "interface" | "trait" | "protocol" => SymbolKind::Interface,
        "enum" => SymbolKind::Enum,
        "record" | "struct" | "data" => SymbolKind::Record,
        _ => SymbolKind::Class,
    }
}

pub struct BraceParser {
    profile: LangProfile,
}

impl BraceParser {
    pub fn java() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["class", "interface", "enum", "record"],
                method_keywords: &[],
                visibility_keywords: &["public", "private", "protected", "static", "final", "abstract", "synchronized"],
                inherits_keywords: &["extends", "implements"],
                inherits_colon: false,
            },
        }
    }

    pub fn kotlin() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["class", "interface", "object", "enum", "data class"],
                method_keywords: &["fun"],
                visibility_keywords: &["public", "private", "protected", "internal", "open", "abstract", "suspend"],
                inherits_keywords: &[],
                inherits_colon: true,
            },
        }
    }

    pub fn typescript() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["class", "interface", "enum"],
                method_keywords: &["function"],
                visibility_keywords: &["public", "private", "protected", "static", "async", "export", "abstract", "readonly"],
                inherits_keywords: &["extends", "implements"],
                inherits_colon: false,
            },
        }
    }

    pub fn javascript() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["class"],
                method_keywords: &["function"],
                visibility_keywords: &["static", "async", "export"],
                inherits_keywords: &["extends"],
                inherits_colon: false,
            },
        }
    }

    pub fn c() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["struct", "enum", "union"],
                method_keywords: &[],
                visibility_keywords: &["static", "inline", "extern"],
                inherits_keywords: &[],
                inherits_colon: false,
            },
        }
    }

    pub fn cpp() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["class", "struct", "enum"],
                method_keywords: &[],
                visibility_keywords: &["public", "private", "protected", "static", "virtual", "inline", "const"],
                inherits_keywords: &[],
                inherits_colon: true,
            },
        }
    }

    pub fn go() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["type", "struct", "interface"],
                method_keywords: &["func"],
                visibility_keywords: &[],
                inherits_keywords: &[],
                inherits_colon: false,
            },
        }
    }

    pub fn rust() -> Self {
        Self {
            profile: LangProfile {
                kind_keywords: &["struct", "enum", "trait", "impl"],
                method_keywords: &["fn"],
                visibility_keywords: &["pub", "async", "unsafe", "const", "extern"],
                inherits_keywords: &[],
                inherits_colon: false,
            },
        }
    }
}

fn kind_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(class|interface|enum|record|struct|trait|object|union|type|impl)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

fn method_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_<>\[\],: ]*?)\s+([A-Za-z_~][A-Za-z0-9_]*)\s*\(").unwrap()
    })
}

fn bare_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

fn fn_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:fn|func|function|fun)\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

struct OpenType {
    balance_at_open: i32,
    name: String,
    start_line: u32,
    kind: SymbolKind,
    /// Each base carries the relation kind its clause dictates (`extends`
    /// vs `implements`), collected until the opening brace arrives.
    pending_bases: Vec<(String, RelationKind)>,
    /// False while the declaration is still awaiting its `{`; an unopened
    /// block must not be closed by the balance check.
    opened: bool,
}

struct OpenMethod {
    balance_at_open: i32,
    name: String,
    start_line: u32,
    parent: Option<String>,
    opened: bool,
}

impl LanguageParser for BraceParser {
    fn parse(&self, file_key: &FileKey, root_id: RootId, content: &str) -> ParseOutput {
        let mut out = ParseOutput::default();
        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len() as u32;

        let mut balance: i32 = 0;
        let mut type_stack: Vec<OpenType> = Vec::new();
        let mut method_stack: Vec<OpenMethod> = Vec::new();
        let mut doc_buffer: Vec<String> = Vec::new();
        let mut in_doc_block = false;

        for (idx, raw_line) in lines.iter().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw_line.trim();

            // Doc-comment buffer is line-level: track open/close explicitly
            // so a multi-line `/** ... */` block survives across iterations.
            if in_doc_block {
                doc_buffer.push(raw_line.to_string());
                if trimmed.ends_with("*/") {
                    in_doc_block = false;
                }
                continue;
            }
            if trimmed.starts_with("/**") {
                doc_buffer.clear();
                doc_buffer.push(raw_line.to_string());
                if !trimmed.ends_with("*/") || trimmed.len() < 5 {
                    in_doc_block = true;
                }
                continue;
            }

            let sanitized = sanitize_line(raw_line);
            let has_brace = sanitized.contains('{');
            let statement_end = sanitized.trim_end().ends_with(';');

            // Pending type declaration: an extends/implements clause may
            // continue across lines up to the opening brace; a `;` instead
            // ends a brace-less declaration (`struct Foo;`).
            let mut end_unopened_type = false;
            if let Some(top) = type_stack.last_mut() {
                if !top.opened {
                    collect_bases(&self.profile, &sanitized, &mut top.pending_bases);
                    if has_brace {
                        top.opened = true;
                    } else if statement_end {
                        end_unopened_type = true;
                    }
                }
            }
            if end_unopened_type {
                let t = type_stack.pop().unwrap();
                push_type_symbol(t, line_no, file_key, root_id, "", &mut out);
            }

            let mut end_unopened_method = false;
            if let Some(top) = method_stack.last_mut() {
                if !top.opened {
                    if has_brace {
                        top.opened = true;
                    } else if statement_end {
                        // Abstract/interface method: declaration only.
                        end_unopened_method = true;
                    }
                }
            }
            if end_unopened_method {
                let m = method_stack.pop().unwrap();
                push_method_symbol(m, line_no, file_key, root_id, "", &mut out);
            }

            if let Some(caps) = kind_decl_re().captures(&sanitized) {
                let raw_kind = &caps[1];
                if self.profile.kind_keywords.contains(&raw_kind) {
                    let name = caps[2].to_string();
                    let kind = normalize_kind(raw_kind);
                    let mut bases = Vec::new();
                    collect_bases(&self.profile, clause_after_name(&sanitized, caps.get(2).unwrap().end()), &mut bases);
                    let open = OpenType {
                        balance_at_open: balance,
                        name,
                        start_line: line_no,
                        kind,
                        pending_bases: bases,
                        opened: has_brace,
                    };
                    if !has_brace && statement_end {
                        push_type_symbol(open, line_no, file_key, root_id, &clean_doc_block(&doc_buffer), &mut out);
                    } else {
                        type_stack.push(open);
                    }
                }
            } else if is_method_declaration(&self.profile, &sanitized) {
                if let Some(name) = extract_method_name(&sanitized) {
                    let parent = type_stack.last().map(|t| t.name.clone());
                    let open = OpenMethod {
                        balance_at_open: balance,
                        name,
                        start_line: line_no,
                        parent,
                        opened: has_brace,
                    };
                    if !has_brace && statement_end {
                        push_method_symbol(open, line_no, file_key, root_id, &clean_doc_block(&doc_buffer), &mut out);
                    } else {
                        method_stack.push(open);
                    }
                }
            }

            if !method_stack.is_empty() {
                emit_calls(&sanitized, method_stack.last().unwrap(), file_key, root_id, line_no, &mut out);
            }

            balance += brace_delta(&sanitized);

            close_methods(&mut method_stack, balance, line_no, file_key, root_id, &doc_buffer, &mut out);
            close_types(&mut type_stack, balance, line_no, file_key, root_id, &doc_buffer, &mut out);

            if !doc_buffer.is_empty() && !sanitized.trim().is_empty() {
                doc_buffer.clear();
            }
        }

        // Unclosed blocks close at EOF.
        while let Some(m) = method_stack.pop() {
            push_method_symbol(m, total_lines, file_key, root_id, "", &mut out);
        }
        while let Some(t) = type_stack.pop() {
            push_type_symbol(t, total_lines, file_key, root_id, "", &mut out);
        }

        out
    }
}

/// The inheritance clause starts after the type name; a Kotlin-style
/// primary constructor in between is skipped so its `name: Type` parameter
/// annotations are not mistaken for supertypes.
fn clause_after_name(sanitized: &str, name_end: usize) -> &str {
    let after = &sanitized[name_end..];
    if after.trim_start().starts_with('(') {
        if let Some(close) = after.find(')') {
            return &after[close + 1..];
        }
    }
    after
}

fn collect_bases(profile: &LangProfile, clause_src: &str, pending: &mut Vec<(String, RelationKind)>) {
    for kw in profile.inherits_keywords {
        let kind = if *kw == "implements" { RelationKind::Implements } else { RelationKind::Extends };
        if let Some(pos) = find_keyword(clause_src, kw) {
            let rest = &clause_src[pos + kw.len()..];
            let mut clause = rest.split('{').next().unwrap_or(rest);
            // One clause runs until the next inheritance keyword.
            for other in profile.inherits_keywords {
                if other != kw {
                    if let Some(end) = find_keyword(clause, other) {
                        clause = &clause[..end];
                    }
                }
            }
            push_clause_bases(clause, kind, pending);
        }
    }
    if profile.inherits_colon {
        if let Some(pos) = clause_src.find(':') {
            let rest = &clause_src[pos + 1..];
            let clause = rest.split('{').next().unwrap_or(rest);
            push_clause_bases(clause, RelationKind::Extends, pending);
        }
    }
}

fn push_clause_bases(clause: &str, kind: RelationKind, pending: &mut Vec<(String, RelationKind)>) {
    for base in clause.split(',') {
        let base = base
            .replace("public", "")
            .replace("private", "")
            .replace("protected", "")
            .trim()
            .split('<')
            .next()
            .unwrap_or("")
            .trim()
            .trim_end_matches("()")
            .to_string();
        if is_base_identifier(&base) {
            pending.push((base, kind));
        }
    }
}

fn is_base_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// `find` with identifier-boundary checks, so `extends` never matches
/// inside a longer word.
fn find_keyword(s: &str, kw: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = s[from..].find(kw) {
        let pos = from + rel;
        let before_ok = s[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        let after_ok = s[pos + kw.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        if before_ok && after_ok {
            return Some(pos);
        }
        from = pos + kw.len();
    }
    None
}

fn is_method_declaration(profile: &LangProfile, sanitized: &str) -> bool {
    if !sanitized.contains('(') {
        return false;
    }
    let words: Vec<&str> = sanitized.split_whitespace().collect();
    if words.is_empty() {
        return false;
    }
    let has_kw = profile
        .method_keywords
        .iter()
        .any(|k| words.contains(k));
    let has_vis = profile
        .visibility_keywords
        .iter()
        .any(|k| words.contains(k));
    if has_kw {
        return true;
    }
    // identifier-followed-by-`(` after a plausible type prefix, gated by
    // visibility keyword presence or a type-returning prefix, and excluded
    // when the callee is a control-flow keyword.
    if let Some(caps) = method_decl_re().captures(sanitized) {
        let name = &caps[2];
        if is_control_flow_keyword(name) {
            return false;
        }
        // `return foo(x)` / `new Foo(x)`: a control-flow word is not a
        // plausible type prefix.
        if caps[1].split_whitespace().any(is_control_flow_keyword) {
            return false;
        }
        return has_vis || caps[1].split_whitespace().count() >= 1;
    }
    false
}

fn extract_method_name(sanitized: &str) -> Option<String> {
    if let Some(caps) = fn_like_re().captures(sanitized) {
        return Some(caps[1].to_string());
    }
    method_decl_re().captures(sanitized).map(|c| c[2].to_string())
}

fn emit_calls(
    sanitized: &str,
    method: &OpenMethod,
    file_key: &FileKey,
    root_id: RootId,
    line_no: u32,
    out: &mut ParseOutput,
) {
    for caps in bare_call_re().captures_iter(sanitized) {
        let name = &caps[1];
        if is_control_flow_keyword(name) || name == method.name {
            continue;
        }
        let from_symbol_id = crate::model::SymbolId::compute(
            file_key,
            SymbolKind::Method,
            &method.name,
            method.start_line,
        );
        out.relations.push(Relation {
            from_file: file_key.clone(),
            from_root_id: root_id,
            from_symbol: method.name.clone(),
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

fn close_methods(
    stack: &mut Vec<OpenMethod>,
    balance: i32,
    line_no: u32,
    file_key: &FileKey,
    root_id: RootId,
    doc_buffer: &[String],
    out: &mut ParseOutput,
) {
    while let Some(top) = stack.last() {
        if top.opened && balance <= top.balance_at_open {
            let m = stack.pop().unwrap();
            push_method_symbol(m, line_no, file_key, root_id, &clean_doc_block(doc_buffer), out);
        } else {
            break;
        }
    }
}

fn close_types(
    stack: &mut Vec<OpenType>,
    balance: i32,
    line_no: u32,
    file_key: &FileKey,
    root_id: RootId,
    doc_buffer: &[String],
    out: &mut ParseOutput,
) {
    while let Some(top) = stack.last() {
        if top.opened && balance <= top.balance_at_open {
            let t = stack.pop().unwrap();
            push_type_symbol(t, line_no, file_key, root_id, &clean_doc_block(doc_buffer), out);
        } else {
            break;
        }
    }
}

fn push_method_symbol(
    m: OpenMethod,
    end_line: u32,
    file_key: &FileKey,
    root_id: RootId,
    docstring: &str,
    out: &mut ParseOutput,
) {
    let kind = if m.parent.is_some() {
        SymbolKind::Method
    } else {
        SymbolKind::Function
    };
    let id = crate::model::SymbolId::compute(file_key, kind, &m.name, m.start_line);
    out.symbols.push(Symbol {
        id,
        file: file_key.clone(),
        root_id,
        name: m.name,
        kind,
        start_line: m.start_line,
        end_line: end_line.max(m.start_line),
        content: String::new(),
        parent: m.parent,
        docstring: if docstring.is_empty() { None } else { Some(docstring.to_string()) },
        metadata: SymbolMetadata::default(),
    });
}

fn push_type_symbol(
    t: OpenType,
    end_line: u32,
    file_key: &FileKey,
    root_id: RootId,
    docstring: &str,
    out: &mut ParseOutput,
) {
    let id = crate::model::SymbolId::compute(file_key, t.kind, &t.name, t.start_line);
    for (base, kind) in &t.pending_bases {
        out.relations.push(Relation {
            from_file: file_key.clone(),
            from_root_id: root_id,
            from_symbol: t.name.clone(),
            from_symbol_id: id,
            to_file: None,
            to_root_id: None,
            to_symbol: base.clone(),
            to_symbol_id: None,
            kind: *kind,
            line: t.start_line,
        });
    }
    out.symbols.push(Symbol {
        id,
        file: file_key.clone(),
        root_id,
        name: t.name,
        kind: t.kind,
        start_line: t.start_line,
        end_line: end_line.max(t.start_line),
        content: String::new(),
        parent: None,
        docstring: if docstring.is_empty() { None } else { Some(docstring.to_string()) },
        metadata: SymbolMetadata::default(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk() -> FileKey {
        FileKey::new(RootId::from_normalized_path("/w"), "a.java")
    }

    #[test]
    fn detects_class_and_method() {
        let src = "public class Foo {\n    public void bar() {\n        baz();\n    }\n}\n";
        let out = BraceParser::java().parse(&fk(), RootId::from_normalized_path("/w"), src);
        assert!(out.symbols.iter().any(|s| s.name == "Foo" && s.kind == SymbolKind::Class));
        assert!(out.symbols.iter().any(|s| s.name == "bar" && s.kind == SymbolKind::Method));
    }

    fn relation_kinds(out: &ParseOutput) -> Vec<(String, RelationKind)> {
        out.relations.iter().map(|r| (r.to_symbol.clone(), r.kind)).collect()
    }

    #[test]
    fn extends_implements_across_lines() {
        let src = "class Foo\n    extends Base\n    implements IThing, IOther {\n}\n";
        let out = BraceParser::java().parse(&fk(), RootId::from_normalized_path("/w"), src);
        let rels = relation_kinds(&out);
        assert!(rels.contains(&("Base".to_string(), RelationKind::Extends)));
        assert!(rels.contains(&("IThing".to_string(), RelationKind::Implements)));
        assert!(rels.contains(&("IOther".to_string(), RelationKind::Implements)));
    }

    #[test]
    fn same_line_clauses_keep_their_relation_kind() {
        let src = "class Foo extends Base implements Runnable {\n}\n";
        let out = BraceParser::java().parse(&fk(), RootId::from_normalized_path("/w"), src);
        let rels = relation_kinds(&out);
        assert_eq!(rels.len(), 2);
        assert!(rels.contains(&("Base".to_string(), RelationKind::Extends)));
        assert!(rels.contains(&("Runnable".to_string(), RelationKind::Implements)));
    }

    #[test]
    fn kotlin_constructor_params_are_not_supertypes() {
        let src = "class Account(val id: Int) : Base(), Auditable {\n}\n";
        let out = BraceParser::kotlin().parse(&fk(), RootId::from_normalized_path("/w"), src);
        let rels = relation_kinds(&out);
        assert!(rels.contains(&("Base".to_string(), RelationKind::Extends)));
        assert!(rels.contains(&("Auditable".to_string(), RelationKind::Extends)));
        assert!(!rels.iter().any(|(to, _)| to == "Int"));
    }

    #[test]
    fn unclosed_block_closes_at_eof() {
        let src = "class Foo {\n    void bar() {\n";
        let out = BraceParser::java().parse(&fk(), RootId::from_normalized_path("/w"), src);
        let foo = out.symbols.iter().find(|s| s.name == "Foo").unwrap();
        assert_eq!(foo.end_line, 2);
    }

    #[test]
    fn if_statement_is_not_mistaken_for_a_method() {
        let src = "void bar() {\n    if (x > 0) {\n        baz();\n    }\n}\n";
        let out = BraceParser::javascript().parse(&fk(), RootId::from_normalized_path("/w"), src);
        assert!(!out.symbols.iter().any(|s| s.name == "if"));
    }
}
