use super::state::LogStatus;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Run progress events for real-time updates
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        test_id: String,
        test_name: String,
        step_count: usize,
    },
    RunFinished {
        test_id: String,
        status: LogStatus,
        duration_ms: u64,
        /// Why the run could not start, step errors come with `StepFailed`
        message: Option<String>,
    },

    StepStarted {
        test_id: String,
        index: usize,
        action: String,
    },
    StepPassed {
        test_id: String,
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        test_id: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },
}

/// Event emitter for broadcasting run events
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Hidden target when piped, to avoid terminal escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        // One spinner per running test, runs may interleave
        let mut spinners: HashMap<String, (ProgressBar, String)> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Console listener skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::RunStarted {
                    test_id,
                    test_name,
                    step_count,
                } => {
                    multi
                        .println(format!(
                            "\n{} {} ({}, {} steps)",
                            "▶".green().bold(),
                            test_name.white().bold(),
                            test_id.cyan(),
                            step_count
                        ))
                        .ok();
                }

                RunEvent::StepStarted {
                    test_id,
                    index,
                    action,
                } => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    let body = format!("[{}] {}... ", index, action.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinners.insert(test_id, (pb, body));
                }

                RunEvent::StepPassed {
                    test_id,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&test_id) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {}({}ms)", "✓".green(), body, duration_ms))
                            .ok();
                    }
                }

                RunEvent::StepFailed {
                    test_id,
                    error,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&test_id) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {}({}ms)", "✗".red(), body, duration_ms))
                            .ok();
                    }
                    multi.println(format!("      {}", error.red())).ok();
                }

                RunEvent::RunFinished {
                    test_id,
                    status,
                    duration_ms,
                    message,
                } => {
                    if let Some((pb, _)) = spinners.remove(&test_id) {
                        pb.finish_and_clear();
                    }
                    let status_str = match status {
                        LogStatus::Pass => "PASS".green().bold(),
                        LogStatus::Fail => "FAIL".red().bold(),
                        LogStatus::Running => "RUNNING".yellow().bold(),
                    };
                    multi
                        .println(format!(
                            "{} {} [{}] {}ms",
                            "■".blue().bold(),
                            test_id,
                            status_str,
                            duration_ms
                        ))
                        .ok();
                    if let Some(message) = message {
                        multi.println(format!("  {}", message.dimmed())).ok();
                    }
                }
            }
        }
    }
}
