pub mod json;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;

use crate::parser::types::TestDefinition;
use crate::runner::state::{Log, LogStatus};

pub use json::JsonLogStore;

/// Receives finished logs and the updated test bookkeeping
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn store(&self, log: &Log) -> Result<()>;

    async fn update_test(&self, test: &TestDefinition) -> Result<()>;
}

/// Print one line per run and the totals
pub fn print_summary(logs: &[Log]) {
    let passed = logs.iter().filter(|l| l.status == LogStatus::Pass).count();
    let failed = logs.len() - passed;

    println!("\n{} Run summary", "■".blue().bold());
    for log in logs {
        let status = match log.status {
            LogStatus::Pass => "PASS".green().bold(),
            LogStatus::Fail => "FAIL".red().bold(),
            LogStatus::Running => "RUNNING".yellow().bold(),
        };
        println!(
            "  [{}] {} ({} steps, {}ms)",
            status,
            log.test_id,
            log.steps.len(),
            log.duration
        );
        if let Some(line) = failure_line(log) {
            println!("      {}", line.dimmed());
        }
    }
    println!(
        "  {} passed, {} failed",
        passed.to_string().green(),
        failed.to_string().red()
    );
}

/// What went wrong in a failed run: the failing action and the reason
fn failure_line(log: &Log) -> Option<String> {
    if log.status != LogStatus::Fail {
        return None;
    }
    let reason = log.message.as_deref().unwrap_or("no reason recorded");
    Some(match log.failed_step() {
        Some(step) => format!("{} → {}", step.action, reason),
        None => reason.to_string(),
    })
}

/// Print stored logs, newest first
pub fn print_history(test_id: &str, logs: &[Log]) {
    if logs.is_empty() {
        println!("No runs recorded for {}", test_id.cyan());
        return;
    }

    println!("{} {} runs of {}", "■".blue().bold(), logs.len(), test_id.cyan());
    for log in logs {
        let when = chrono::DateTime::from_timestamp(log.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| log.created_at.to_string());
        let status = match log.status {
            LogStatus::Pass => "PASS".green(),
            LogStatus::Fail => "FAIL".red(),
            LogStatus::Running => "RUNNING".yellow(),
        };
        println!(
            "  {}  {:<7}  {:>6}ms  {:?}  {}",
            when,
            status,
            log.duration,
            log.trigger,
            log.id.dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{Step, Trigger};
    use crate::runner::state::StepStatus;

    #[test]
    fn test_failure_line_names_failing_action() {
        let mut log = Log::create("t-1", Trigger::Manual);
        let mut step = Step::new("click");
        step.status = Some(StepStatus::Fail);
        log.steps.push(step);
        log.status = LogStatus::Fail;
        log.message = Some("Step 0 (click) failed: boom".into());

        assert_eq!(
            failure_line(&log).unwrap(),
            "click → Step 0 (click) failed: boom"
        );

        // Launch failures have no step to point at
        log.steps.clear();
        log.message = Some("Browser failed: missing".into());
        assert_eq!(failure_line(&log).unwrap(), "Browser failed: missing");

        log.status = LogStatus::Pass;
        assert!(failure_line(&log).is_none());
    }
}
