use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use tracing::{info, warn};

use vekta_rag::config::State;
use vekta_rag::crawler::{CrawlConfig, Crawler};
use vekta_rag::embedder::{self, Embedder};
use vekta_rag::generator::{self, OllamaGenerator};
use vekta_rag::{logging, DocumentStore, RagError, Retriever, Snapshot};

#[derive(Parser)]
#[command(name = "vekta-rag")]
#[command(version = "0.1")]
#[command(about = "Retrieve the closest passage from a crawled collection and answer with a local LLM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured site into the documents directory
    Crawl {
        /// Crawl even if the documents directory already has pages
        #[arg(long)]
        force: bool,
    },
    /// Chunk, embed and index the documents directory
    Index,
    /// Print the top matches for a query (read from stdin when omitted)
    Search {
        query: Option<String>,
        /// Number of results; defaults to the configured top_k
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Retrieve the best passage and ask the generator (query read from stdin when omitted)
    Ask { query: Option<String> },
    /// List indexed documents
    List,
    Config,
}

fn crawl_command(state: &State, force: bool) -> Result<()> {
    let config = CrawlConfig {
        force,
        ..CrawlConfig::from_state(state)
    };
    let crawler = Crawler::new(config).context("Failed to set up crawler")?;
    let report = crawler.crawl().context("Crawl aborted")?;
    if report.skipped {
        println!(
            "Skipping crawl: {} already has pages. Re-run with --force to crawl again.",
            state.docs_dir.display()
        );
        return Ok(());
    }
    for (url, err) in &report.failures {
        warn!("{}: {}", url, err);
    }
    println!(
        "Visited {} pages ({} failed).",
        report.saved.len(),
        report.failures.len()
    );
    Ok(())
}

fn index_command(state: &State, embedder: Box<dyn Embedder>) -> Result<()> {
    let report = DocumentStore::build_from_files(&state.docs_dir, state.chunk_size)
        .with_context(|| format!("Failed to read documents from '{}'", state.docs_dir.display()))?;
    for failure in &report.failures {
        warn!("{}", failure);
    }
    if report.store.is_empty() {
        return Err(RagError::EmptyInput(format!(
            "no text documents in '{}'",
            state.docs_dir.display()
        ))
        .into());
    }
    info!(
        "read {} files into {} chunks",
        report.files_read,
        report.store.count()
    );

    let retriever = Retriever::build_with(
        report.store,
        embedder,
        state.metric,
        state.search_method,
        state.ann_num_projections,
    )?;
    Snapshot::capture(&retriever)
        .save(&state.index_path)
        .context("Failed to save index")?;
    println!(
        "Indexed {} chunks from {} files into {} ({} failed).",
        retriever.len(),
        report.files_read,
        state.index_path.display(),
        report.failures.len()
    );
    Ok(())
}

fn load_retriever(state: &State, embedder: Box<dyn Embedder>) -> Result<Retriever<Box<dyn Embedder>>> {
    let snapshot = Snapshot::load(&state.index_path).with_context(|| {
        format!(
            "No usable index at '{}'; run `vekta-rag index` first",
            state.index_path.display()
        )
    })?;
    Ok(snapshot.into_retriever(embedder, state.search_method, state.ann_num_projections)?)
}

fn read_query(query: Option<String>) -> Result<String> {
    match query {
        Some(query) => Ok(query),
        None => {
            let mut input = String::new();
            io::stdin().lock().read_line(&mut input)?;
            Ok(input.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

fn search_command(state: &State, embedder: Box<dyn Embedder>, query: Option<String>, k: Option<usize>) -> Result<()> {
    let query = read_query(query)?;
    let k = k.unwrap_or(state.top_k);
    let retriever = load_retriever(state, embedder)?;
    let hits = retriever.retrieve_top_k(&query, k)?;

    let output = serde_json::json!({
        "query": query,
        "database_record_count": retriever.len(),
        "results": hits.iter().map(|hit| {
            serde_json::json!({
                "id": hit.document.id,
                "score": hit.score,
                "source_url": hit.document.source_url,
                "text": hit.document.text,
            })
        }).collect::<Vec<_>>(),
        "actual_results_count": hits.len(),
        "requested_results_count": k
    });

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn ask_command(state: &State, embedder: Box<dyn Embedder>, query: Option<String>) -> Result<()> {
    let query = read_query(query)?;
    let retriever = load_retriever(state, embedder)?;
    let llm = OllamaGenerator::from_state(state)?;
    let answer = generator::answer(&retriever, &llm, &query)?;

    println!("--- Retrieved Context ---");
    if let Some(url) = &answer.context.source_url {
        println!("Source: {}", url);
    }
    println!("{}\n", answer.context.text.trim());
    println!("--- Answer ---\n{}", answer.answer.trim());
    Ok(())
}

fn list_command(state: &State, embedder: Box<dyn Embedder>) -> Result<()> {
    let retriever = load_retriever(state, embedder)?;
    for doc in retriever.store().documents() {
        println!(
            "{}\t{}\t{}",
            doc.id,
            doc.source_url.as_deref().unwrap_or("-"),
            doc.preview(60)
        );
    }
    Ok(())
}

fn config_command(state: &State) -> Result<()> {
    state.print_config();
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let state = State::new()?;
    logging::init(state.log_dir.as_deref());

    match args.command {
        Commands::Crawl { force } => crawl_command(&state, force)?,
        Commands::Index => index_command(&state, embedder::from_state(&state)?)?,
        Commands::Search { query, k } => {
            search_command(&state, embedder::from_state(&state)?, query, k)?
        }
        Commands::Ask { query } => ask_command(&state, embedder::from_state(&state)?, query)?,
        Commands::List => list_command(&state, embedder::from_state(&state)?)?,
        Commands::Config => config_command(&state)?,
    }
    Ok(())
}
