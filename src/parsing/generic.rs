//! Generic fallback parser: a data-driven instance parameterized by two
//! compiled regexes and a kind-normalization table. One regex detects type
//! declarations, the other function/method declarations, and the table
//! maps the captured keyword to a `SymbolKind`.

use super::{LanguageParser, ParseOutput};
use crate::model::{FileKey, RootId, Symbol, SymbolId, SymbolKind, SymbolMetadata};

use regex::Regex;

pub struct GenericParser {
    type_re: Regex,
    func_re: Regex,
    kind_table: Vec<(&'static str, SymbolKind)>,
}

impl GenericParser {
    /// Used when no per-extension profile exists: a loose "declaration
    /// keyword followed by an identifier" scan that still yields something
    /// useful for unfamiliar languages instead of silence.
    pub fn default_profile() -> Self {
        Self {
            type_re: Regex::new(
                r"\b(class|interface|struct|enum|trait|module|namespace)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )
            .unwrap(),
            func_re: Regex::new(
                r"\b(?:function|func|fn|def|sub|proc|procedure)\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
            )
            .unwrap(),
            kind_table: vec![
                ("class", SymbolKind::Class),
                ("interface", SymbolKind::Interface),
                ("struct", SymbolKind::Record),
                ("enum", SymbolKind::Enum),
                ("trait", SymbolKind::Interface),
                ("module", SymbolKind::Class),
                ("namespace", SymbolKind::Class),
            ],
        }
    }

    fn normalize(&self, raw: &str) -> SymbolKind {
        self.kind_table
            .iter()
            .find(|(k, _)| *k == raw)
            .map(|(_, v)| *v)
            .unwrap_or(SymbolKind::Class)
    }
}

impl LanguageParser for GenericParser {
    fn parse(&self, file_key: &FileKey, root_id: RootId, content: &str) -> ParseOutput {
        let mut out = ParseOutput::default();
        let lines: Vec<&str> = content.lines().collect();

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx as u32 + 1;

            if let Some(caps) = self.type_re.captures(line) {
                let kind = self.normalize(&caps[1]);
                let name = caps[2].to_string();
                let id = SymbolId::compute(file_key, kind, &name, line_no);
                out.symbols.push(Symbol {
                    id,
                    file: file_key.clone(),
                    root_id,
                    name,
                    kind,
                    start_line: line_no,
                    end_line: line_no,
                    content: line.trim().to_string(),
                    parent: None,
                    docstring: None,
                    metadata: SymbolMetadata::default(),
                });
            }

            if let Some(caps) = self.func_re.captures(line) {
                let name = caps[1].to_string();
                let id = SymbolId::compute(file_key, SymbolKind::Function, &name, line_no);
                out.symbols.push(Symbol {
                    id,
                    file: file_key.clone(),
                    root_id,
                    name,
                    kind: SymbolKind::Function,
                    start_line: line_no,
                    end_line: line_no,
                    content: line.trim().to_string(),
                    parent: None,
                    docstring: None,
                    metadata: SymbolMetadata::default(),
                });
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_declarations_in_an_unfamiliar_language() {
        let fk = FileKey::new(RootId::from_normalized_path("/w"), "a.rb");
        let src = "class Widget\n  def render\n  end\nend\n";
        let out = GenericParser::default_profile().parse(&fk, RootId::from_normalized_path("/w"), src);
        assert!(out.symbols.iter().any(|s| s.name == "Widget" && s.kind == SymbolKind::Class));
        assert!(out.symbols.iter().any(|s| s.name == "render" && s.kind == SymbolKind::Function));
    }
}
