pub mod types;
pub mod vars;
pub mod yaml;
