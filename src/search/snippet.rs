//! Snippet generation:
//! at most `snippet_lines` lines (hard cap 20), ≤120 characters per line,
//! matched terms highlighted, lines numbered `L<N>:`.

const HARD_LINE_CAP: usize = 20;
const MAX_LINE_CHARS: usize = 120;
const HIGHLIGHT_OPEN: &str = "\u{2039}";
const HIGHLIGHT_CLOSE: &str = "\u{203a}";

pub struct Snippet {
    pub lines: Vec<String>,
    /// 1-based line number of the first matched line (1 when nothing
    /// matched, so callers always have a valid anchor).
    pub first_line: u32,
}

/// Finds the first line containing any of `terms` (case-insensitively),
/// then takes up to `snippet_lines` lines centered on it.
pub fn generate(content: &str, terms: &[String], snippet_lines: usize) -> Snippet {
    let cap = snippet_lines.min(HARD_LINE_CAP).max(1);
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Snippet { lines: Vec::new(), first_line: 1 };
    }

    let terms_lc: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    let hit_idx = lines
        .iter()
        .position(|l| {
            let lc = l.to_lowercase();
            terms_lc.iter().any(|t| !t.is_empty() && lc.contains(t.as_str()))
        })
        .unwrap_or(0);

    let half = cap / 2;
    let start = hit_idx.saturating_sub(half);
    let end = (start + cap).min(lines.len());
    let start = end.saturating_sub(cap).min(start);

    let mut out = Vec::new();
    for (offset, line) in lines[start..end].iter().enumerate() {
        let line_no = start + offset + 1;
        let truncated = truncate_line(line, MAX_LINE_CHARS);
        let highlighted = highlight(&truncated, &terms_lc);
        out.push(format!("L{line_no}:{highlighted}"));
    }

    Snippet { lines: out, first_line: hit_idx as u32 + 1 }
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    line.chars().take(max_chars).collect()
}

fn highlight(line: &str, terms_lc: &[String]) -> String {
    let mut result = line.to_string();
    for term in terms_lc {
        if term.is_empty() {
            continue;
        }
        if let Some(pos) = result.to_lowercase().find(term.as_str()) {
            let end = pos + term.len();
            if result.is_char_boundary(pos) && result.is_char_boundary(end) {
                let matched = &result[pos..end];
                result = format!(
                    "{}{}{}{}{}",
                    &result[..pos],
                    HIGHLIGHT_OPEN,
                    matched,
                    HIGHLIGHT_CLOSE,
                    &result[end..]
                );
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_hard_line_limit() {
        let content = (1..=100).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let snip = generate(&content, &["line".to_string()], 50);
        assert_eq!(snip.lines.len(), HARD_LINE_CAP);
    }

    #[test]
    fn long_line_is_truncated_to_120_chars() {
        let content = "A".repeat(5000);
        let snip = generate(&content, &["A".to_string()], 5);
        let body = snip.lines[0].splitn(2, ':').nth(1).unwrap();
        let stripped: String = body.chars().filter(|c| *c != '\u{2039}' && *c != '\u{203a}').collect();
        assert!(stripped.chars().count() <= MAX_LINE_CHARS);
        assert!(stripped.contains('A'));
    }

    #[test]
    fn lines_are_numbered() {
        let snip = generate("alpha\nbeta\ngamma", &["beta".to_string()], 3);
        assert!(snip.lines.iter().any(|l| l.starts_with("L2:")));
    }
}
