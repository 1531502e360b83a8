use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::TestDefinition;
use crate::notify::Notifications;

/// Project scoped settings shared by all of its tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Values for `{{name}}` placeholders
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub notifications: Option<Notifications>,
}

impl ProjectSettings {
    /// Variables as plain strings, non-string values rendered as JSON
    pub fn variable_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

/// Parse a test definition file (YAML or JSON)
pub fn parse_test_file(path: &Path) -> Result<TestDefinition> {
    let mut test: TestDefinition = parse_file(path)?;
    if test.id.is_empty() {
        test.id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }
    Ok(test)
}

pub fn parse_project_file(path: &Path) -> Result<ProjectSettings> {
    parse_file(path)
}

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    parse_content(&content, path)
}

/// Parse content by the file extension, anything but `.json` is read as YAML
pub fn parse_content<T: DeserializeOwned>(content: &str, source_path: &Path) -> Result<T> {
    let is_json = source_path
        .extension()
        .map_or(false, |ext| ext == "json");

    if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("Invalid JSON in {}", source_path.display()))
    } else {
        serde_yaml::from_str(content)
            .with_context(|| format!("Invalid YAML in {}", source_path.display()))
    }
}

/// Collect test files from a file or a directory tree
pub fn collect_test_files(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map_or(false, |ext| ext == "yaml" || ext == "yml" || ext == "json")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}
