//! `toolrag` command-line interface.
//!
//! Answers natural-language queries by retrieving candidate tools, letting the
//! decision model pick one, and executing it on the configured backend.
//! Results go to stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use toolrag::config::{RetrievalMode, RuntimeConfig};
use toolrag::index::ToolRetriever;
use toolrag::kernel::{CandidateTrace, QueryOutcome, QueryReport};
use toolrag::primitives::ToolCatalog;
use toolrag::telemetry::{LogFormat, init_tracing};
use toolrag::{Runtime, build_executor, open_index};
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "toolrag", version, about = "Retrieval-augmented tool selection")]
struct Cli {
    /// Configuration file; built-in defaults when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
    /// Log format: compact, pretty or json. Overrides the config file.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the embedding index, or rebuild it with `--force`.
    Index {
        /// Discard persisted embeddings first.
        #[arg(long)]
        force: bool,
    },
    /// Answer one or more queries; several run concurrently.
    Query {
        /// Query text; each argument is a separate query.
        #[arg(required = true)]
        queries: Vec<String>,
        /// Print full reports as JSON lines.
        #[arg(long)]
        json: bool,
        /// Offer every catalog tool to the decision model without ranking.
        #[arg(long)]
        no_retrieval: bool,
    },
    /// Interactive session; `exit` or `quit` leaves.
    Chat {
        /// Offer every catalog tool to the decision model without ranking.
        #[arg(long)]
        no_retrieval: bool,
    },
    /// Rank catalog tools against a query without executing anything.
    Retrieve {
        /// Query text.
        #[arg(required = true)]
        query: Vec<String>,
        /// Candidates to show; defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum score; defaults to `retrieval.score_threshold`.
        #[arg(long)]
        threshold: Option<f32>,
        /// Print candidates as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Ask every backend for its tools and list them.
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = toolrag::config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let format = cli.log_format.unwrap_or(config.logging.format);
    init_tracing(format, &config.logging.directive).context("failed to initialise logging")?;
    debug!(?cli.command, "starting");

    match cli.command {
        Command::Index { force } => index(&config, force).await,
        Command::Query {
            queries,
            json,
            no_retrieval,
        } => {
            bypass_retrieval(&mut config, no_retrieval);
            query(config, queries, json).await
        }
        Command::Chat { no_retrieval } => {
            bypass_retrieval(&mut config, no_retrieval);
            chat(config).await
        }
        Command::Retrieve {
            query,
            top_k,
            threshold,
            json,
        } => {
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let threshold = threshold.unwrap_or(config.retrieval.score_threshold);
            retrieve(&config, &query.join(" "), top_k, threshold, json).await
        }
        Command::Tools => tools(&config).await,
    }
}

fn bypass_retrieval(config: &mut RuntimeConfig, enabled: bool) {
    if enabled {
        config.retrieval.mode = RetrievalMode::AllTools;
    }
}

fn load_catalog(config: &RuntimeConfig) -> Result<Arc<ToolCatalog>> {
    let catalog = ToolCatalog::from_path(&config.catalog.path)
        .with_context(|| format!("failed to load catalog {}", config.catalog.path.display()))?;
    Ok(Arc::new(catalog))
}

async fn index(config: &RuntimeConfig, force: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let index = open_index(&config.index, catalog, force)
        .await
        .context("failed to build embedding index")?;
    println!(
        "indexed {} tools into {}",
        index.len(),
        config.index.path.display()
    );
    index.shutdown().await;
    Ok(())
}

async fn query(config: RuntimeConfig, queries: Vec<String>, json: bool) -> Result<()> {
    let runtime = Runtime::from_config(config).await.context("failed to start runtime")?;
    let mut failed = false;
    for result in runtime.query_all(queries).await {
        match result {
            Ok(report) => {
                failed |= matches!(report.outcome, QueryOutcome::Failed { .. });
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    print_report(&report);
                }
            }
            Err(err) => {
                failed = true;
                eprintln!("error: {err}");
            }
        }
    }
    runtime.shutdown().await;
    if failed {
        anyhow::bail!("one or more queries failed");
    }
    Ok(())
}

async fn chat(config: RuntimeConfig) -> Result<()> {
    let runtime = Runtime::from_config(config).await.context("failed to start runtime")?;
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Ask about your tools. Type `exit` or `quit` to leave.");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        match runtime.query(line).await {
            Ok(report) => print_report(&report),
            Err(err) => warn!(error = %err, "query rejected"),
        }
    }

    runtime.shutdown().await;
    Ok(())
}

async fn retrieve(config: &RuntimeConfig, query: &str, top_k: usize, threshold: f32, json: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let index = Arc::new(
        open_index(&config.index, catalog, false)
            .await
            .context("failed to build embedding index")?,
    );
    let retriever = ToolRetriever::new(index.clone());
    let candidates = retriever
        .retrieve_with(query, top_k, threshold)
        .await
        .context("retrieval failed")?;
    drop(retriever);

    if candidates.is_empty() && !json {
        println!("no tools scored at or above {threshold:.3}");
    }
    for candidate in &candidates {
        if json {
            println!("{}", serde_json::to_string(&CandidateTrace::from(candidate))?);
        } else {
            println!(
                "{:>2}. {:<24} {:.3}  {}",
                candidate.rank(),
                candidate.tool_name(),
                candidate.score(),
                candidate.descriptor().description()
            );
        }
    }

    if let Ok(index) = Arc::try_unwrap(index) {
        index.shutdown().await;
    }
    Ok(())
}

async fn tools(config: &RuntimeConfig) -> Result<()> {
    let catalog = load_catalog(config)?;
    let executor = build_executor(config, catalog.clone()).context("failed to configure backends")?;
    let discovered = executor.discover().await;
    for tool in &discovered {
        let descriptor = tool.descriptor();
        let marker = if catalog.contains(descriptor.name()) { ' ' } else { '*' };
        println!(
            "{marker} {:<24} {:<12} {}",
            descriptor.name(),
            tool.backend(),
            descriptor.description()
        );
    }
    for missing in catalog
        .iter()
        .filter(|descriptor| !discovered.iter().any(|tool| tool.descriptor().name() == descriptor.name()))
    {
        println!(
            "! {:<24} {:<12} not served by any backend",
            missing.name(),
            missing.owning_server().unwrap_or("-")
        );
    }
    executor.close().await;
    Ok(())
}

fn print_report(report: &QueryReport) {
    if !report.candidates.is_empty() {
        let ranked: Vec<String> = report
            .candidates
            .iter()
            .map(|candidate| match candidate.score {
                Some(score) => format!("{} ({score:.3})", candidate.tool_name),
                None => candidate.tool_name.clone(),
            })
            .collect();
        println!("candidates: {}", ranked.join(", "));
    }
    if let Some(call) = &report.call {
        println!("tool: {}", call.tool_name());
    }
    match &report.outcome {
        QueryOutcome::Failed { cause, message } => println!("failed ({cause:?}): {message}"),
        outcome => println!("{}", outcome.text()),
    }
}
