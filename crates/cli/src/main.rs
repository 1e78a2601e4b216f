use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use clinical_core::api::AnalyzeResponse;
use clinical_core::config::{self, AppConfig};
use clinical_core::indexer::sample_cases;
use clinical_core::models::NewCase;
use clinical_core::pipeline::{self, PipelineOrchestrator};
use clinical_core::search::{CaseSearchStatus, SimilarCaseRetriever};
use clinical_core::vectorstore::CaseStore;
use cli::{report, request};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            text,
            image,
            modality,
            request,
            json,
        } => run_analyze(cfg, text, image, modality, request, json).await,
        Commands::Ingest { file, json } => run_ingest(cfg, file, json).await,
        Commands::Seed { json } => run_seed(cfg, json).await,
        Commands::Cases { json } => run_cases(cfg, json).await,
        Commands::Search { query, topk, json } => run_search(cfg, query, topk, json).await,
        Commands::Reset { yes, json } => run_reset(cfg, yes, json).await,
    }
}

#[derive(Parser)]
#[command(name = "clinical")]
#[command(about = "Clinical query analysis with image findings and similar cases", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a clinical query, optionally with one image
    Analyze {
        /// Free-text clinical query
        text: Option<String>,
        /// Image file to attach
        #[arg(long)]
        image: Option<PathBuf>,
        /// Modality hint for the image (e.g. mri, x-ray)
        #[arg(long, requires = "image")]
        modality: Option<String>,
        /// JSON request file in the boundary shape; replaces text and image
        #[arg(long, conflicts_with_all = ["text", "image"])]
        request: Option<PathBuf>,
        /// Print the JSON response
        #[arg(long)]
        json: bool,
    },
    /// Ingest cases from a JSON file (one object or an array)
    Ingest {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Ingest the built-in sample cases
    Seed {
        #[arg(long)]
        json: bool,
    },
    /// List stored cases, newest first
    Cases {
        #[arg(long)]
        json: bool,
    },
    /// Find cases similar to a query
    Search {
        query: String,
        /// Number of results
        #[arg(long, default_value_t = 5)]
        topk: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete every stored case, e.g. after changing the embedding model
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        json: bool,
    },
}

async fn run_analyze(
    cfg: AppConfig,
    text: Option<String>,
    image: Option<PathBuf>,
    modality: Option<String>,
    request_file: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let req = match request_file {
        Some(path) => request::load_request(&path)?,
        None => request::build_request(text, image.as_deref(), modality)?,
    };
    let orchestrator = PipelineOrchestrator::from_config(&cfg).await?;
    let response = orchestrator.handle(req).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    match response {
        AnalyzeResponse::Ok(result) => {
            print!("{}", report::render_result(&result));
            Ok(())
        }
        AnalyzeResponse::Error(body) => bail!("{}: {}", body.kind, body.message),
    }
}

async fn ingest(cfg: &AppConfig, cases: &[NewCase]) -> Result<Vec<i64>> {
    let registry = pipeline::build_registry(cfg);
    let store = pipeline::build_case_store(cfg).await?;
    let indexer = pipeline::build_indexer(cfg, registry, store);
    Ok(indexer.ingest_batch(cases).await?)
}

fn print_ids(ids: &[i64], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "ids": ids }))?);
    } else {
        println!("ingested {} cases", ids.len());
    }
    Ok(())
}

async fn run_ingest(cfg: AppConfig, file: PathBuf, json: bool) -> Result<()> {
    let cases = request::load_cases(&file)?;
    let ids = ingest(&cfg, &cases).await?;
    info!(count = ids.len(), file = %file.display(), "ingest complete");
    print_ids(&ids, json)
}

async fn run_seed(cfg: AppConfig, json: bool) -> Result<()> {
    let cases = sample_cases()?;
    let ids = ingest(&cfg, &cases).await?;
    info!(count = ids.len(), "seeded sample cases");
    print_ids(&ids, json)
}

async fn run_cases(cfg: AppConfig, json: bool) -> Result<()> {
    let store = pipeline::build_case_store(&cfg).await?;
    let cases = store.list_all().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&cases)?);
    } else {
        print!("{}", report::render_cases(&cases));
    }
    Ok(())
}

async fn run_search(cfg: AppConfig, query: String, topk: usize, json: bool) -> Result<()> {
    let registry = pipeline::build_registry(&cfg);
    let store = pipeline::build_case_store(&cfg).await?;
    let retriever = SimilarCaseRetriever::new(registry, store as Arc<dyn CaseStore>)
        .with_timeouts(cfg.embeddings.timeout(), cfg.retrieval.store_timeout());
    let outcome = retriever.search(&query, topk).await;
    if let CaseSearchStatus::Failed(failure) = &outcome.status {
        bail!("case search failed: {failure}");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    } else {
        print!("{}", report::render_matches(&outcome.results));
    }
    Ok(())
}

async fn run_reset(cfg: AppConfig, yes: bool, json: bool) -> Result<()> {
    if !yes {
        bail!("reset deletes every stored case; pass --yes to confirm");
    }
    let store = pipeline::build_case_store(&cfg).await?;
    let removed = store.clear().await?;
    info!(removed, db = %cfg.database.path, "case store reset");
    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "removed": removed }))?);
    } else {
        println!("removed {removed} cases");
    }
    Ok(())
}
