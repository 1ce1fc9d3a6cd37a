//! Path/Workspace Resolver.

use crate::error::{CoreError, CoreResult};
use crate::model::RootId;
use std::path::{Path, PathBuf};

/// Expand `~`, optionally follow symlinks, lowercase on case-insensitive
/// hosts, strip a trailing separator.
pub fn normalize(path: &Path, follow_symlinks: bool) -> CoreResult<PathBuf> {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|e| CoreError::Io {
                path: expanded.clone(),
                source: e,
            })?
            .join(expanded)
    };

    let mut normalized = normalize_components(&absolute);
    if follow_symlinks {
        if let Ok(real) = std::fs::canonicalize(&normalized) {
            normalized = real;
        }
    }

    let mut s = normalized.to_string_lossy().to_string();
    if case_insensitive_host() {
        s = s.to_lowercase();
    }
    while s.len() > 1 && (s.ends_with('/') || s.ends_with('\\')) {
        s.pop();
    }
    Ok(PathBuf::from(s))
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Collapse `.`/`..` components lexically, without touching the filesystem
/// (canonicalization is reserved for the `follow_symlinks` branch above,
/// since the path may not exist yet).
fn normalize_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            ParentDir => {
                out.pop();
            }
            CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(windows)]
fn case_insensitive_host() -> bool {
    true
}

#[cfg(not(windows))]
fn case_insensitive_host() -> bool {
    false
}

/// Stable 8-byte root identifier for an already-normalized path.
pub fn root_id(normalized_path: &Path) -> RootId {
    RootId::from_normalized_path(&normalized_path.to_string_lossy())
}

/// Three ways to declare roots via environment, as 
/// enumerates: `WORKSPACE_ROOT`, `ROOTS_JSON`, `ROOT_<N>`.
pub fn roots_from_env() -> Vec<PathBuf> {
    let mut out = Vec::new();

    if let Ok(v) = std::env::var("WORKSPACE_ROOT") {
        if !v.trim().is_empty() {
            out.push(PathBuf::from(v));
        }
    }

    if let Ok(v) = std::env::var("ROOTS_JSON") {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(&v) {
            out.extend(list.into_iter().map(PathBuf::from));
        }
    }

    // Numbered roots may start at 0 or 1; stop at the first gap past 1.
    let mut n = 0;
    loop {
        let key = format!("ROOT_{n}");
        match std::env::var(&key) {
            Ok(v) if !v.trim().is_empty() => out.push(PathBuf::from(v)),
            _ if n == 0 => {}
            _ => break,
        }
        n += 1;
    }

    out
}

/// Merge candidate roots from explicit arguments, environment, and config.
/// First-seen wins; nested roots are dropped unless `keep_nested` is set.
pub fn resolve_workspace_roots(
    candidates: impl IntoIterator<Item = PathBuf>,
    follow_symlinks: bool,
    keep_nested: bool,
) -> CoreResult<Vec<(RootId, PathBuf)>> {
    let mut accepted: Vec<(RootId, PathBuf)> = Vec::new();

    'outer: for candidate in candidates {
        let normalized = normalize(&candidate, follow_symlinks)?;
        if accepted.iter().any(|(_, p)| p == &normalized) {
            continue;
        }
        if !keep_nested {
            for (_, existing) in &accepted {
                if is_under(&normalized, existing) {
                    continue 'outer;
                }
            }
        }
        let id = root_id(&normalized);
        accepted.push((id, normalized));
    }

    Ok(accepted)
}

fn is_under(path: &Path, root: &Path) -> bool {
    path == root || path.starts_with(root)
}

/// `is_path_allowed` — : true only if `path` is equal to or
/// under one of `roots`.
pub fn is_path_allowed(path: &Path, roots: &[(RootId, PathBuf)]) -> bool {
    roots.iter().any(|(_, root)| is_under(path, root))
}

pub fn require_in_scope(path: &Path, roots: &[(RootId, PathBuf)]) -> CoreResult<RootId> {
    roots
        .iter()
        .find(|(_, root)| is_under(path, root))
        .map(|(id, _)| *id)
        .ok_or_else(|| CoreError::RootOutOfScope {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_separator() {
        let p = normalize(Path::new("/tmp/foo/"), false).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/foo"));
    }

    #[test]
    fn normalize_collapses_parent_dir_components() {
        let p = normalize(Path::new("/tmp/foo/../bar"), false).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/bar"));
    }

    #[test]
    fn resolve_workspace_roots_drops_nested_by_default() {
        let roots = resolve_workspace_roots(
            vec![PathBuf::from("/tmp/ws"), PathBuf::from("/tmp/ws/nested")],
            false,
            false,
        )
        .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].1, PathBuf::from("/tmp/ws"));
    }

    #[test]
    fn resolve_workspace_roots_keeps_nested_when_flag_set() {
        let roots = resolve_workspace_roots(
            vec![PathBuf::from("/tmp/ws"), PathBuf::from("/tmp/ws/nested")],
            false,
            true,
        )
        .unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn resolve_workspace_roots_dedupes_first_seen_wins() {
        let roots = resolve_workspace_roots(
            vec![PathBuf::from("/tmp/ws"), PathBuf::from("/tmp/ws")],
            false,
            false,
        )
        .unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn is_path_allowed_checks_containment() {
        let roots = vec![(RootId::from_normalized_path("/tmp/ws"), PathBuf::from("/tmp/ws"))];
        assert!(is_path_allowed(Path::new("/tmp/ws/src/main.rs"), &roots));
        assert!(!is_path_allowed(Path::new("/etc/passwd"), &roots));
    }
}
