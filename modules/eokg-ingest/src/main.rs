use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eokg_common::{AppConfig, FileConfig};
use eokg_graph::migrate::migrate;
use eokg_graph::{GdsAnalytics, GraphAnalytics, GraphClient, GraphStore, MemoryStore, Neo4jStore};
use eokg_ingest::orchestrator::execution_order;
use eokg_ingest::{
    pipeline, CmrCatalog, Collaborators, LexiconClassifier, Orchestrator, StageContext, StageId,
};

#[derive(Parser)]
#[command(name = "eokg-ingest", about = "Earth-observation knowledge graph ingest")]
struct Cli {
    /// TOML run configuration. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingest pipeline.
    Run {
        /// Run only these stages (comma-separated stage names).
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Write to an in-memory store instead of Neo4j. Analytics stages are left out.
        #[arg(long)]
        dry_run: bool,
    },
    /// Declare uniqueness constraints and lookup indexes.
    Migrate,
    /// Print the stages in execution order.
    Stages,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("eokg=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => Ok(FileConfig::load(path)?),
        None => {
            info!("No --config given, using defaults");
            Ok(FileConfig::default())
        }
    }
}

async fn connect(config: &AppConfig) -> Result<GraphClient> {
    let client = GraphClient::from_config(config).await?;
    info!(uri = config.neo4j_uri.as_str(), pool = config.neo4j_max_connections, "Connected to Neo4j");
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let file = load_file_config(cli.config.as_deref())?;

    match cli.command {
        Command::Migrate => {
            let config = AppConfig::from_env()?;
            config.log_redacted();
            let store = Neo4jStore::new(connect(&config).await?);
            migrate(&store).await?;
            info!("Migration complete");
        }
        Command::Stages => {
            for (i, id) in execution_order(&StageId::ALL)?.into_iter().enumerate() {
                let deps: Vec<&str> = id.deps().iter().map(StageId::name).collect();
                let enabled = if file.stages.is_enabled(id.name()) { "" } else { "  (disabled)" };
                println!("{:>2}. {:<26} <- [{}]{enabled}", i + 1, id.name(), deps.join(", "));
            }
        }
        Command::Run { only, dry_run } => {
            let mut selected = Vec::with_capacity(only.len());
            for name in &only {
                match StageId::from_name(name.trim()) {
                    Some(id) => selected.push(id),
                    None => bail!("Unknown stage '{name}'. Run `eokg-ingest stages` for the list."),
                }
            }

            let config = if dry_run {
                AppConfig::dry_run_from_env()
            } else {
                AppConfig::from_env()?
            };
            config.log_redacted();

            let (store, analytics): (Arc<dyn GraphStore>, Option<Arc<dyn GraphAnalytics>>) = if dry_run {
                warn!("Dry run: writing to an in-memory store; page_rank and fast_rp are left out");
                (Arc::new(MemoryStore::new()), None)
            } else {
                let client = connect(&config).await?;
                let store = Neo4jStore::new(client.clone());
                migrate(&store).await?;
                (Arc::new(store), Some(Arc::new(GdsAnalytics::new(client))))
            };

            let collaborators = Collaborators {
                catalog: Arc::new(CmrCatalog::new(
                    config.cmr_base_url.clone(),
                    file.paths.source_dois.clone(),
                    file.ingest.catalog_page_size,
                )),
                classifier: Arc::new(LexiconClassifier),
                analytics,
            };

            let mut orchestrator = Orchestrator::new(pipeline(collaborators), file.stages.clone())?;
            if !selected.is_empty() {
                orchestrator = orchestrator.only(selected);
            }

            info!(stages = orchestrator.plan().len(), batch_size = file.ingest.batch_size, "Pipeline starting");
            let ctx = StageContext::new(store, file.ingest.clone(), file.paths.clone());
            let summary = orchestrator.run(ctx).await;

            println!("{summary}");
            info!(clean = summary.is_clean(), created = summary.total_created(), "Pipeline finished");
        }
    }

    Ok(())
}
