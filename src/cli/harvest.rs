//! Produce / work / run subcommands

use super::{CliError, ValidateCommand};
use crate::api::{ApiSession, YoutubeClientFactory};
use crate::catalog::{LocalCatalog, TableDefinition};
use crate::config::HarvestConfig;
use crate::credentials::CredentialPool;
use crate::error::HarvestError;
use crate::producer::{ProduceReport, TaskProducer};
use crate::queue::{FileQueue, WorkQueue};
use crate::storage::LocalObjectStore;
use crate::worker::{receive_credentials, WorkReport, Worker};
use crate::DayPartition;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Channel statistics harvester CLI
#[derive(Parser, Debug)]
#[command(name = "channel-stats-harvester")]
#[command(about = "Harvest daily YouTube channel statistics through a shared work queue", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (JSON)
    #[arg(long, short = 'c', global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// Serve Prometheus metrics on this address (e.g. 0.0.0.0:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recreate the output table and enqueue today's missing channels
    Produce,

    /// Drain the work queue
    Work(WorkArgs),

    /// Produce, then work through the queue in this process
    Run(WorkArgs),

    /// Check a configuration file
    Validate(ValidateCommand),
}

/// Worker arguments
#[derive(Parser, Debug, Clone, Default)]
pub struct WorkArgs {
    /// Stop after this many batches
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_batches: Option<u64>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

/// Components built from a configuration
struct Components {
    store: Arc<LocalObjectStore>,
    catalog: Arc<LocalCatalog>,
    work_queue: Arc<FileQueue>,
    credentials_queue: Option<Arc<FileQueue>>,
}

impl Components {
    async fn build(config: &HarvestConfig) -> Result<Self, CliError> {
        let store = Arc::new(LocalObjectStore::new(&config.storage.root));
        let catalog = Arc::new(LocalCatalog::new(
            &config.catalog.metastore_dir,
            &config.catalog.source_ids_csv,
            store.clone(),
        ));
        let work_queue = Arc::new(
            FileQueue::open(
                &config.queue.root,
                &config.queue.work_queue,
                config.visibility_timeout(),
            )
            .await?,
        );
        let credentials_queue = match &config.queue.credentials_queue {
            Some(name) => Some(Arc::new(
                FileQueue::open(&config.queue.root, name, config.visibility_timeout()).await?,
            )),
            None => None,
        };

        Ok(Self {
            store,
            catalog,
            work_queue,
            credentials_queue,
        })
    }
}

impl Cli {
    /// Execute the selected command
    pub async fn execute(&self) -> Result<(), CliError> {
        match &self.command {
            Commands::Validate(cmd) => cmd.execute(&self.config, self.output_format),
            Commands::Produce => {
                let config = HarvestConfig::load(&self.config)?;
                let components = Components::build(&config).await?;
                let report = produce(&config, &components).await?;
                print_produce_report(&report, self.output_format);
                Ok(())
            }
            Commands::Work(args) => {
                let config = HarvestConfig::load(&self.config)?;
                let components = Components::build(&config).await?;
                let report = work(&config, &components, args).await?;
                print_work_report(&report, self.output_format);
                Ok(())
            }
            Commands::Run(args) => {
                let config = HarvestConfig::load(&self.config)?;
                let components = Components::build(&config).await?;
                let produced = produce(&config, &components).await?;
                print_produce_report(&produced, self.output_format);
                let worked = work(&config, &components, args).await?;
                print_work_report(&worked, self.output_format);
                Ok(())
            }
        }
    }
}

async fn produce(config: &HarvestConfig, components: &Components) -> Result<ProduceReport, CliError> {
    let table = TableDefinition::new(&config.catalog.table, &config.storage.dataset);
    let mut producer = TaskProducer::new(
        components.catalog.clone(),
        components.work_queue.clone(),
        table,
        &config.catalog.source_table,
        &config.tmp_dir,
    );
    if let Some(queue) = &components.credentials_queue {
        if config.youtube.is_empty() {
            info!(queue = %queue.name(), "No credentials configured, leaving credentials queue untouched");
        } else {
            producer = producer.with_credentials(queue.clone(), config.youtube.clone());
        }
    }
    Ok(producer.produce(DayPartition::today()).await?)
}

async fn work(
    config: &HarvestConfig,
    components: &Components,
    args: &WorkArgs,
) -> Result<WorkReport, CliError> {
    let credentials = match (&components.credentials_queue, config.youtube.is_empty()) {
        (Some(queue), true) => receive_credentials(&**queue).await?,
        _ => config.youtube.clone(),
    };

    let pool = CredentialPool::shuffled(credentials).map_err(HarvestError::from)?;
    let factory = Arc::new(YoutubeClientFactory::new(&config.api.base_url));
    let session = ApiSession::new(pool, factory).map_err(HarvestError::from)?;

    let mut worker = Worker::new(
        components.work_queue.clone(),
        components.store.clone(),
        session,
        &config.storage.dataset,
    );
    let max_batches = args
        .max_batches
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
    Ok(worker.run(max_batches).await?)
}

fn print_produce_report(report: &ProduceReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "command": "produce",
                "day": report.day.to_string(),
                "table_existed": report.table_existed,
                "candidates": report.candidates,
                "reported_count": report.reported_count,
                "batches": report.batches,
                "purged": report.purged,
                "credentials_published": report.credentials_published,
            });
            println!("{value}");
        }
        OutputFormat::Human => {
            println!("Produced work for {}", report.day);
            println!("  Table existed: {}", report.table_existed);
            println!("  Channels: {}", report.candidates);
            println!("  Batches: {}", report.batches);
            if report.credentials_published {
                println!("  Credentials published");
            }
        }
    }
}

fn print_work_report(report: &WorkReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "command": "work",
                "batches": report.batches,
                "channels": report.channels,
                "records": report.records,
                "objects": report.objects,
            });
            println!("{value}");
        }
        OutputFormat::Human => {
            println!("Worker finished");
            println!("  Batches: {}", report.batches);
            println!("  Channels: {}", report.channels);
            println!("  Records: {}", report.records);
            println!("  Objects: {}", report.objects);
        }
    }
}
