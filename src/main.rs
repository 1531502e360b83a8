use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumi_monitor::driver::web::PlaywrightLauncher;
use lumi_monitor::notify::LogHistory;
use lumi_monitor::parser::types::{TestDefinition, TestType, Trigger};
use lumi_monitor::parser::vars::replace_vars;
use lumi_monitor::parser::yaml::{
    collect_test_files, parse_project_file, parse_test_file, ProjectSettings,
};
use lumi_monitor::report::{self, JsonLogStore};
use lumi_monitor::runner::{
    ConsoleEventListener, EventEmitter, RunOptions, RunSession, TestRunner,
};
use lumi_monitor::utils::config::RunnerConfig;

#[derive(Parser)]
#[command(name = "lumi-monitor")]
#[command(version = "0.1.0")]
#[command(about = "Step-sequence test runner for HTTP endpoints and headless browser checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Basic,
    Browser,
}

impl From<TypeArg> for TestType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Basic => TestType::Basic,
            TypeArg::Browser => TestType::Browser,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerArg {
    Manual,
    Scheduled,
    Api,
}

impl From<TriggerArg> for Trigger {
    fn from(value: TriggerArg) -> Self {
        match value {
            TriggerArg::Manual => Trigger::Manual,
            TriggerArg::Scheduled => Trigger::Scheduled,
            TriggerArg::Api => Trigger::Api,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test file or every test in a directory
    Run {
        /// Path to test file or directory
        path: PathBuf,

        /// Project settings file (variables, notifications)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Run as this test type instead of the one in the file
        #[arg(long = "type", value_enum)]
        kind: Option<TypeArg>,

        /// Trigger recorded on the logs
        #[arg(long, value_enum)]
        trigger: Option<TriggerArg>,

        /// Directory for stored logs
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Run the tests of a directory concurrently
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Print who would be notified about each run
        #[arg(long, default_value = "false")]
        notify: bool,
    },

    /// Print a test with its variables substituted
    Render {
        /// Path to test file
        path: PathBuf,

        /// Project settings file (variables, notifications)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Show stored runs of a test, newest first
    History {
        /// Test id
        test_id: String,

        /// Directory for stored logs
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Print the newest log as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

fn load_project(path: Option<&Path>) -> anyhow::Result<ProjectSettings> {
    match path {
        Some(path) => parse_project_file(path),
        None => Ok(ProjectSettings::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            path,
            project,
            kind,
            trigger,
            output,
            parallel,
            notify,
        } => {
            let project = load_project(project.as_deref())?;
            let files = collect_test_files(&path);
            if files.is_empty() {
                anyhow::bail!("No test files found in {}", path.display());
            }

            println!(
                "{} Running {} test(s) from: {}",
                "▶".green().bold(),
                files.len(),
                path.display()
            );
            println!("  Output: {}", output.display().to_string().cyan());
            if parallel {
                println!("  Parallel: {}", "Enabled".yellow());
            }

            let config = RunnerConfig::from_env();
            let (emitter, receiver) = EventEmitter::new();
            let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

            let runner = TestRunner::new(config, Arc::new(PlaywrightLauncher)).with_emitter(emitter);
            let options = RunOptions {
                kind: kind.map(Into::into),
                trigger: trigger.map(Into::into),
                notify,
            };
            let session = RunSession::new(runner, JsonLogStore::new(&output), project, options);

            let results = session.run_all(files, parallel).await;
            // Dropping the last emitter ends the listener
            drop(session);
            listener.await.ok();

            let mut logs = Vec::new();
            let mut errors = 0;
            for (file, result) in results {
                match result {
                    Ok(record) => {
                        if let Some(plan) = &record.notification {
                            print_notification(&record.test, plan);
                        }
                        logs.push(record.log);
                    }
                    Err(e) => {
                        errors += 1;
                        eprintln!("{} {}: {:#}", "✗".red(), file.display(), e);
                    }
                }
            }

            report::print_summary(&logs);
            let failed = logs.iter().filter(|l| !l.passed()).count();
            if failed > 0 || errors > 0 {
                anyhow::bail!("{} run(s) failed, {} could not run", failed, errors);
            }
        }

        Commands::Render { path, project } => {
            let project = load_project(project.as_deref())?;
            let test = parse_test_file(&path)?;
            let rendered: TestDefinition = replace_vars(&test, &project.variable_map())?;
            println!("{}", serde_yaml::to_string(&rendered)?);
        }

        Commands::History {
            test_id,
            output,
            limit,
            json,
        } => {
            let store = JsonLogStore::new(&output);
            let logs = store.recent(&test_id, limit).await?;

            if json {
                match logs.first() {
                    Some(log) => report::json::generate(log, None).await?,
                    None => anyhow::bail!("No runs recorded for {}", test_id),
                }
            } else {
                report::print_history(&test_id, &logs);
            }
        }
    }

    Ok(())
}

fn print_notification(test: &TestDefinition, plan: &lumi_monitor::notify::NotificationPlan) {
    if plan.is_empty() {
        println!("{} {}: nobody to notify", "ℹ".blue(), test.id);
        return;
    }
    println!(
        "{} {}: notify {} recipient(s), {} webhook(s){}",
        "✉".blue(),
        test.id,
        plan.recipients.len(),
        plan.webhooks.len(),
        plan.subject
            .as_ref()
            .map(|s| format!(" with subject \"{}\"", s))
            .unwrap_or_default()
    );
    for recipient in &plan.recipients {
        println!("    {}", recipient.cyan());
    }
    for hook in &plan.webhooks {
        println!("    {}", hook.url.cyan());
    }
}
