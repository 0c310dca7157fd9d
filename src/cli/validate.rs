//! Validation subcommand

use super::{CliError, OutputFormat};
use crate::config::HarvestConfig;
use clap::Parser;
use std::path::Path;

/// Check that a configuration file parses and is consistent
#[derive(Parser, Debug, Clone, Default)]
pub struct ValidateCommand {}

impl ValidateCommand {
    /// Execute the validation command
    pub fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<(), CliError> {
        let config = match HarvestConfig::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                if format == OutputFormat::Json {
                    println!(
                        "{}",
                        serde_json::json!({ "valid": false, "error": e.to_string() })
                    );
                } else {
                    eprintln!("Invalid configuration {}: {}", config_path.display(), e);
                }
                return Err(e.into());
            }
        };

        match format {
            OutputFormat::Json => {
                let credentials: Vec<String> = config.youtube.iter().map(|c| c.label()).collect();
                let value = serde_json::json!({
                    "valid": true,
                    "credentials": credentials,
                    "storage_root": config.storage.root,
                    "dataset": config.storage.dataset,
                    "table": config.catalog.table,
                    "source_table": config.catalog.source_table,
                    "work_queue": config.queue.work_queue,
                    "credentials_queue": config.queue.credentials_queue,
                    "visibility_timeout_secs": config.queue.visibility_timeout_secs,
                    "api_base_url": config.api.base_url,
                });
                println!("{value}");
            }
            OutputFormat::Human => {
                println!("Valid configuration: {}", config_path.display());
                println!("  Credentials: {}", config.youtube.len());
                for credential in &config.youtube {
                    println!("    - {}", credential.label());
                }
                println!("  Storage: {} ({})", config.storage.root.display(), config.storage.dataset);
                println!(
                    "  Catalog: {} <- {}",
                    config.catalog.table, config.catalog.source_table
                );
                println!("  Work queue: {}", config.queue.work_queue);
                if let Some(queue) = &config.queue.credentials_queue {
                    println!("  Credentials queue: {queue}");
                }
                println!("  API: {}", config.api.base_url);
            }
        }

        Ok(())
    }
}
