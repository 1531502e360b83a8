use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::LogSink;
use crate::notify::LogHistory;
use crate::parser::types::TestDefinition;
use crate::runner::state::Log;

const TEST_FILE: &str = "test.json";

/// Stores logs as JSON files, one directory per test:
/// `<dir>/<test id>/<log file>.json` plus the test itself in `test.json`.
pub struct JsonLogStore {
    dir: PathBuf,
}

impl JsonLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn test_dir(&self, test_id: &str) -> PathBuf {
        let safe: String = test_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(safe)
    }

    /// The stored copy of a test, as of its last recorded run
    pub async fn load_test(&self, test_id: &str) -> Result<Option<TestDefinition>> {
        let path = self.test_dir(test_id).join(TEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let test = serde_json::from_str(&content)
            .with_context(|| format!("Invalid test record {}", path.display()))?;
        Ok(Some(test))
    }

    /// Up to `limit` logs, newest first. Only those files are read.
    async fn newest(&self, test_id: &str, limit: usize) -> Result<Vec<Log>> {
        let mut logs = Vec::new();
        for entry in self.index(test_id).await? {
            if logs.len() >= limit {
                break;
            }
            let content = tokio::fs::read_to_string(&entry.path)
                .await
                .with_context(|| format!("Failed to read {}", entry.path.display()))?;
            match serde_json::from_str::<Log>(&content) {
                Ok(log) => logs.push(log),
                Err(e) => log::warn!("Skipping unreadable log {}: {}", entry.path.display(), e),
            }
        }
        Ok(logs)
    }

    /// Log files of a test from their names alone, newest first.
    /// Expired logs are removed on the way.
    async fn index(&self, test_id: &str) -> Result<Vec<LogFile>> {
        let dir = self.test_dir(test_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file) = LogFile::parse(path) else {
                continue;
            };
            if file.expires_at.map_or(false, |at| at <= now) {
                log::debug!("Removing expired log {}", file.path.display());
                if let Err(e) = tokio::fs::remove_file(&file.path).await {
                    log::warn!("Failed to remove {}: {}", file.path.display(), e);
                }
                continue;
            }
            files.push(file);
        }

        files.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Ok(files)
    }
}

/// A stored log known by its file name:
/// `<created_at>-<started_at>-<expires_at|never>-<log id>.json`,
/// timestamps zero padded so names sort by age.
#[derive(Debug, Clone, PartialEq)]
struct LogFile {
    path: PathBuf,
    created_at: i64,
    started_at: i64,
    expires_at: Option<i64>,
    id: String,
}

impl LogFile {
    fn file_name(log: &Log) -> String {
        let expires = log
            .expires_at
            .map(|at| at.max(0).to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "{:012}-{:012}-{}-{}.json",
            log.created_at.max(0),
            log.started_at.max(0),
            expires,
            log.id
        )
    }

    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name == TEST_FILE {
            return None;
        }
        let stem = name.strip_suffix(".json")?;
        let mut parts = stem.splitn(4, '-');
        let created_at = parts.next()?.parse().ok()?;
        let started_at = parts.next()?.parse().ok()?;
        let expires_at = match parts.next()? {
            "never" => None,
            at => Some(at.parse().ok()?),
        };
        let id = parts.next()?.to_string();
        Some(Self {
            path,
            created_at,
            started_at,
            expires_at,
            id,
        })
    }

    fn sort_key(&self) -> (i64, i64, &str) {
        (self.created_at, self.started_at, &self.id)
    }
}

#[async_trait]
impl LogSink for JsonLogStore {
    async fn store(&self, log: &Log) -> Result<()> {
        let dir = self.test_dir(&log.test_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let name = LogFile::file_name(log);
        // A log stored again replaces its earlier file
        for stale in self.index(&log.test_id).await? {
            if stale.id == log.id && stale.path.file_name().map_or(false, |n| n != name.as_str()) {
                tokio::fs::remove_file(&stale.path).await.ok();
            }
        }

        let path = dir.join(name);
        let json = serde_json::to_string_pretty(log)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Log saved to: {}", path.display());
        Ok(())
    }

    async fn update_test(&self, test: &TestDefinition) -> Result<()> {
        let dir = self.test_dir(&test.id);
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_string_pretty(test)?;
        tokio::fs::write(dir.join(TEST_FILE), json)
            .await
            .with_context(|| format!("Failed to save test {}", test.id))?;
        Ok(())
    }
}

#[async_trait]
impl LogHistory for JsonLogStore {
    async fn recent(&self, test_id: &str, limit: usize) -> Result<Vec<Log>> {
        self.newest(test_id, limit).await
    }
}

/// Print a log as pretty JSON, or save it to `output`
pub async fn generate(log: &Log, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(log)?;

    if let Some(path) = output {
        tokio::fs::write(path, json).await?;
        println!("JSON log saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}
