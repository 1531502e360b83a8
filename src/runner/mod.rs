pub mod comparators;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod expect;
pub mod lock;
pub mod matchers;
pub mod state;

#[cfg(test)]
pub mod testing;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use events::*;
pub use executor::TestRunner;
pub use lock::RunLocks;
pub use state::*;

use crate::notify::{self, NotificationPlan};
use crate::parser::types::{TestDefinition, TestType, Trigger};
use crate::parser::vars::replace_vars;
use crate::parser::yaml::{parse_test_file, ProjectSettings};
use crate::report::{JsonLogStore, LogSink};

/// Per-invocation overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Force the execution context instead of the test's own type
    pub kind: Option<TestType>,
    /// Recorded on the log instead of the test's trigger
    pub trigger: Option<Trigger>,
    /// Work out who would be notified about each run
    pub notify: bool,
}

/// Outcome of one pipeline pass
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// The test after substitution and bookkeeping
    pub test: TestDefinition,
    pub log: Log,
    pub notification: Option<NotificationPlan>,
}

/// Substitute, run, store, count and decide notifications for tests of one project
#[derive(Clone)]
pub struct RunSession {
    runner: Arc<TestRunner>,
    store: Arc<JsonLogStore>,
    locks: RunLocks,
    project: Arc<ProjectSettings>,
    options: RunOptions,
}

impl RunSession {
    pub fn new(
        runner: TestRunner,
        store: JsonLogStore,
        project: ProjectSettings,
        options: RunOptions,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            store: Arc::new(store),
            locks: RunLocks::new(),
            project: Arc::new(project),
            options,
        }
    }

    pub async fn run_file(&self, path: &Path) -> Result<RunRecord> {
        let test = parse_test_file(path)?;
        self.run_test(test)
            .await
            .with_context(|| format!("Run of {} failed", path.display()))
    }

    pub async fn run_test(&self, test: TestDefinition) -> Result<RunRecord> {
        let mut test: TestDefinition = replace_vars(&test, &self.project.variable_map())?;
        if let Some(kind) = self.options.kind {
            test.kind = kind;
        }
        if test.project_id.is_none() && !self.project.id.is_empty() {
            test.project_id = Some(self.project.id.clone());
        }
        let trigger = self.options.trigger.unwrap_or(test.trigger);

        let _guard = self.locks.acquire(&test.id).await;

        if let Some(stored) = self.store.load_test(&test.id).await? {
            test.runs_count = stored.runs_count;
        }

        let log = Log::create(&test.id, trigger);
        log::debug!("Running {} as log {}", test.id, log.id);
        let log = self.runner.run(test.clone(), log).await;

        self.store.store(&log).await?;
        test.record_run(&log);
        self.store.update_test(&test).await?;

        let notification = if self.options.notify {
            notify::plan(
                &log,
                test.notifications.as_ref(),
                self.project.notifications.as_ref(),
                self.store.as_ref(),
            )
            .await
        } else {
            None
        };

        Ok(RunRecord {
            test,
            log,
            notification,
        })
    }

    /// Run every file, concurrently when `parallel`. Results keep the file order.
    pub async fn run_all(
        &self,
        files: Vec<PathBuf>,
        parallel: bool,
    ) -> Vec<(PathBuf, Result<RunRecord>)> {
        if !parallel {
            let mut results = Vec::new();
            for file in files {
                let result = self.run_file(&file).await;
                results.push((file, result));
            }
            return results;
        }

        let handles: Vec<_> = files
            .into_iter()
            .map(|file| {
                let session = self.clone();
                let path = file.clone();
                (
                    file,
                    tokio::spawn(async move { session.run_file(&path).await }),
                )
            })
            .collect();

        let mut results = Vec::new();
        for (file, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("Run task failed: {}", e)),
            };
            results.push((file, result));
        }
        results
    }
}
