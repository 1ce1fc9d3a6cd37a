//! Deterministic ranking. Weights are fixed here and documented in
//! DESIGN.md rather than tuned per-query: the total ordering must be
//! identical given the same database snapshot and query.

const BASENAME_EXACT_MATCH: f64 = 50.0;
const PATH_SUBSTRING_MATCH: f64 = 10.0;
const SYMBOL_DEFINITION_BOOST: f64 = 30.0;
const REPO_PRIORITY_WEIGHT: f64 = 2.0;
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
const RECENCY_MAX_BOOST: f64 = 15.0;

const PENALIZED_COMPONENTS: &[&str] = &["test", "mock", "node_modules", ".git", "build", "dist"];
const PENALTY_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct RankInputs {
    pub basename_exact: bool,
    pub path_substring: bool,
    pub is_symbol_definition: bool,
    pub age_days: f64,
    pub repo_priority: i64,
    pub path: String,
}

/// Additive score from the documented inputs, then directory penalties
/// applied multiplicatively.
pub fn score(inputs: &RankInputs) -> f64 {
    let mut score = 1.0;
    if inputs.basename_exact {
        score += BASENAME_EXACT_MATCH;
    }
    if inputs.path_substring {
        score += PATH_SUBSTRING_MATCH;
    }
    if inputs.is_symbol_definition {
        score += SYMBOL_DEFINITION_BOOST;
    }
    score += recency_boost(inputs.age_days);
    score += (inputs.repo_priority as f64) * REPO_PRIORITY_WEIGHT;

    for component in inputs.path.split('/') {
        if PENALIZED_COMPONENTS.contains(&component) {
            score *= PENALTY_FACTOR;
        }
    }

    score
}

fn recency_boost(age_days: f64) -> f64 {
    if age_days <= 0.0 {
        return RECENCY_MAX_BOOST;
    }
    RECENCY_MAX_BOOST / (1.0 + (age_days / RECENCY_HALF_LIFE_DAYS).ln_1p())
}

/// Stable tie-break: `(-score, -mtime, path)`.
pub fn cmp_hits(a_score: f64, a_mtime: i64, a_path: &str, b_score: f64, b_mtime: i64, b_path: &str) -> std::cmp::Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b_mtime.cmp(&a_mtime))
        .then_with(|| a_path.cmp(b_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_definition_outranks_plain_reference() {
        let definition = RankInputs {
            is_symbol_definition: true,
            path: "models.py".into(),
            ..Default::default()
        };
        let reference = RankInputs {
            path: "main.py".into(),
            ..Default::default()
        };
        assert!(score(&definition) > score(&reference));
    }

    #[test]
    fn test_directory_is_penalized() {
        let normal = RankInputs { path: "src/lib.rs".into(), ..Default::default() };
        let in_test_dir = RankInputs { path: "test/lib.rs".into(), ..Default::default() };
        assert!(score(&in_test_dir) < score(&normal));
    }

    #[test]
    fn tie_break_prefers_newer_then_lexical_path() {
        use std::cmp::Ordering;
        assert_eq!(cmp_hits(1.0, 100, "b.py", 1.0, 50, "a.py"), Ordering::Less);
        assert_eq!(cmp_hits(1.0, 100, "b.py", 1.0, 100, "a.py"), Ordering::Greater);
    }
}
