pub mod driver;
pub mod notify;
pub mod parser;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use parser::types::{Step, TestDefinition};
pub use runner::{Log, LogStatus, RunSession, TestRunner};
