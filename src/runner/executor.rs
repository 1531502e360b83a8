use futures_util::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use super::context::ExecutionContext;
use super::error::StepError;
use super::events::{EventEmitter, RunEvent};
use super::state::{Log, LogStatus, StepStatus};
use crate::driver::traits::BrowserLauncher;
use crate::parser::types::{Step, TestDefinition};
use crate::utils::config::RunnerConfig;

/// Drives the steps of a test through an execution context.
///
/// Failures never escape as errors: the returned log always carries a
/// terminal status, the executed steps and the reason of a failure.
pub struct TestRunner {
    config: RunnerConfig,
    launcher: Arc<dyn BrowserLauncher>,
    emitter: EventEmitter,
}

impl TestRunner {
    pub fn new(config: RunnerConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            launcher,
            emitter: EventEmitter::default(),
        }
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.emitter.subscribe()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `test`, completing `log`
    pub async fn run(&self, test: TestDefinition, mut log: Log) -> Log {
        let run_started = Instant::now();
        log.started_at = chrono::Utc::now().timestamp();
        log.status = LogStatus::Running;
        log.steps.clear();
        log.message = None;

        self.emitter.emit(RunEvent::RunStarted {
            test_id: log.test_id.clone(),
            test_name: test.name.clone(),
            step_count: test.steps.len(),
        });

        let mut ctx =
            match ExecutionContext::acquire(test.kind, &self.config, self.launcher.as_ref()).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    let message = format!("Browser failed: {:#}", e);
                    log::error!("Test {}: {}", log.test_id, message);
                    log.message = Some(message.clone());
                    return self.finish(log, run_started, Some(message));
                }
            };

        let mut pending: VecDeque<Step> = test.steps.into();
        let mut index = 0;
        while let Some(mut step) = pending.pop_front() {
            self.emitter.emit(RunEvent::StepStarted {
                test_id: log.test_id.clone(),
                index,
                action: step.action.clone(),
            });

            let started = Instant::now();
            let result = match AssertUnwindSafe(ctx.perform(&step)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(StepError::crashed(&step.action, payload)),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    step.status = Some(StepStatus::Pass);
                    log.steps.push(step);
                    self.emitter.emit(RunEvent::StepPassed {
                        test_id: log.test_id.clone(),
                        index,
                        duration_ms,
                    });
                }
                Err(e) => {
                    log::info!("Test {} failed at step {}: {}", log.test_id, index, e);
                    step.status = Some(StepStatus::Fail);
                    log.message = Some(format!("Step {} ({}) failed: {}", index, step.action, e));
                    log.steps.push(step);
                    self.emitter.emit(RunEvent::StepFailed {
                        test_id: log.test_id.clone(),
                        index,
                        error: e.to_string(),
                        duration_ms,
                    });
                    break;
                }
            }
            index += 1;
        }

        ctx.close().await;

        if log.steps.is_empty() {
            log.message = Some("Test has no steps".to_string());
        }
        self.finish(log, run_started, None)
    }

    fn finish(&self, mut log: Log, run_started: Instant, reason: Option<String>) -> Log {
        log.duration = run_started.elapsed().as_millis() as u64;
        log.status = log.derive_status();

        self.emitter.emit(RunEvent::RunFinished {
            test_id: log.test_id.clone(),
            status: log.status,
            duration_ms: log.duration,
            message: reason,
        });
        log
    }
}
