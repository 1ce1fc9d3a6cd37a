//! Repo-metadata ingestion from package manifests.

use crate::model::RepoMeta;

pub fn manifest_repo_meta(file_name: &str, repo: &str, content: &str) -> Option<RepoMeta> {
    match file_name {
        "package.json" => from_package_json(repo, content),
        "pyproject.toml" => from_pyproject_toml(repo, content),
        "Cargo.toml" => from_cargo_toml(repo, content),
        _ => None,
    }
}

fn from_package_json(repo: &str, content: &str) -> Option<RepoMeta> {
    let v: serde_json::Value = serde_json::from_str(content).ok()?;
    let description = v.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
    let tags = v
        .get("keywords")
        .and_then(|k| k.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str()).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    Some(RepoMeta {
        repo_name: repo.to_string(),
        tags,
        domain: "node".to_string(),
        description,
        priority: 0,
    })
}

fn from_pyproject_toml(repo: &str, content: &str) -> Option<RepoMeta> {
    let v: toml::Value = toml::from_str(content).ok()?;
    let project = v.get("project").or_else(|| v.get("tool").and_then(|t| t.get("poetry")))?;
    let description = project.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
    let tags = project
        .get("keywords")
        .and_then(|k| k.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str()).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    Some(RepoMeta {
        repo_name: repo.to_string(),
        tags,
        domain: "python".to_string(),
        description,
        priority: 0,
    })
}

fn from_cargo_toml(repo: &str, content: &str) -> Option<RepoMeta> {
    let v: toml::Value = toml::from_str(content).ok()?;
    let package = v.get("package")?;
    let description = package.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
    let tags = package
        .get("keywords")
        .and_then(|k| k.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str()).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    Some(RepoMeta {
        repo_name: repo.to_string(),
        tags,
        domain: "rust".to_string(),
        description,
        priority: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_json_keywords_into_tags() {
        let json = r#"{"description": "a web app", "keywords": ["web", "api"]}"#;
        let meta = manifest_repo_meta("package.json", "myrepo", json).unwrap();
        assert_eq!(meta.tags, "web,api");
        assert_eq!(meta.domain, "node");
    }

    #[test]
    fn parses_cargo_toml_package_section() {
        let toml_str = "[package]\nname = \"x\"\ndescription = \"a crate\"\nkeywords = [\"cli\"]\n";
        let meta = manifest_repo_meta("Cargo.toml", "myrepo", toml_str).unwrap();
        assert_eq!(meta.description, "a crate");
        assert_eq!(meta.domain, "rust");
    }

    #[test]
    fn non_manifest_file_returns_none() {
        assert!(manifest_repo_meta("main.rs", "myrepo", "fn main() {}").is_none());
    }
}
