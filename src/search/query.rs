//! Query parsing and normalization.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub terms: Vec<String>,
    pub normalized: String,
    /// True when FTS tokenization is unreliable for this query (CJK code
    /// points, or length < 3) and the caller should go straight to LIKE.
    pub bypass_fts: bool,
}

/// NFKC + case-fold + whitespace-collapse, then split into quoted phrases
/// and bare tokens.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let normalized = normalize(raw);
    let (phrases, terms) = split_phrases_and_terms(&normalized);
    let bypass_fts = has_cjk(&normalized) || normalized.chars().filter(|c| !c.is_whitespace()).count() < 3;

    ParsedQuery {
        phrases,
        terms,
        normalized,
        bypass_fts,
    }
}

fn normalize(raw: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let nfkc: String = raw.nfkc().collect();
    let folded = nfkc.to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_phrases_and_terms(normalized: &str) -> (Vec<String>, Vec<String>) {
    let mut phrases = Vec::new();
    let mut terms = Vec::new();
    let mut chars = normalized.chars().peekable();
    let mut buf = String::new();

    while let Some(c) = chars.next() {
        if c == '"' {
            let mut phrase = String::new();
            for pc in chars.by_ref() {
                if pc == '"' {
                    break;
                }
                phrase.push(pc);
            }
            if !phrase.is_empty() {
                phrases.push(phrase);
            }
        } else if c.is_whitespace() {
            if !buf.is_empty() {
                terms.push(std::mem::take(&mut buf));
            }
        } else {
            buf.push(c);
        }
    }
    if !buf.is_empty() {
        terms.push(buf);
    }
    (phrases, terms)
}

fn has_cjk(s: &str) -> bool {
    s.chars().any(|c| {
        let cp = c as u32;
        (0x4E00..=0x9FFF).contains(&cp)
            || (0x3400..=0x4DBF).contains(&cp)
            || (0x3040..=0x30FF).contains(&cp)
            || (0xAC00..=0xD7A3).contains(&cp)
    })
}

/// Escapes `%`/`_` for a LIKE pattern (with `^` as the escape char) and
/// wraps it in wildcards.
pub fn like_pattern(term: &str) -> String {
    let escaped = term.replace('^', "^^").replace('%', "^%").replace('_', "^_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_query_bypasses_fts() {
        let q = parse_query("ab");
        assert!(q.bypass_fts);
    }

    #[test]
    fn cjk_query_bypasses_fts() {
        let q = parse_query("検索機能");
        assert!(q.bypass_fts);
    }

    #[test]
    fn splits_quoted_phrase_and_bare_terms() {
        let q = parse_query(r#""exact phrase" token"#);
        assert_eq!(q.phrases, vec!["exact phrase".to_string()]);
        assert_eq!(q.terms, vec!["token".to_string()]);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("100%_done"), "%100^%^_done%");
    }
}
