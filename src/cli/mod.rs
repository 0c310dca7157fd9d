//! CLI command implementations

pub mod error;
pub mod harvest;
pub mod validate;

pub use error::CliError;
pub use harvest::{Cli, Commands, OutputFormat, WorkArgs};
pub use validate::ValidateCommand;
