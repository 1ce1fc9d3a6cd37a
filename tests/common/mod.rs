//! Shared fixtures: a `Settings` wired to one temp workspace and one temp
//! database, with the external engine off so the SQL paths are what gets
//! exercised.

use std::path::Path;

use codewatch::config::Settings;

pub fn test_settings(workspace: &Path, data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.workspace.roots = vec![workspace.to_path_buf()];
    settings.storage.db_path = data_dir.join("index.db");
    settings.engine.enabled = false;
    settings.scanner.include_extensions.push("md".to_string());
    settings
}
