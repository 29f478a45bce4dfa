//! kg-rag CLI
//!
//! Imports GraphML into Neo4j and queries it through an LLM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kg_rag::config::{load_dotenv, LlmConfig, RetrievalOptions, RetryPolicy, StoreConfig};
use kg_rag::driver::neo4j::Neo4jDriver;
use kg_rag::driver::GraphDriver;
use kg_rag::llm_client::openai::OpenAiClient;
use kg_rag::pipeline::{EpisodeRetriever, ImportRequest, Importer, QaPipeline, RetrievalRequest};
use kg_rag::search::{EpisodeHit, LlmEpisodeScorer};
use kg_rag::utils::truncate_with_ellipsis;

const RULE: &str = "============================================================";
/// Nodes listed by `inspect` when there are no Episodic nodes.
const FALLBACK_SAMPLE: usize = 10;

const THIN_RULE: &str = "------------------------------------------------------------";

#[derive(Parser)]
#[command(name = "kg-rag")]
#[command(about = "Knowledge-graph RAG over Neo4j: GraphML import, QA, episode retrieval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a GraphML file into the graph store
    Import {
        /// File path as the store sees it (relative to its import directory)
        #[arg(long = "file_path", alias = "file-path")]
        file_path: String,

        /// Local copy of the file, when its path differs from the store's view
        #[arg(long = "local_path", alias = "local-path")]
        local_path: Option<PathBuf>,

        /// Clear the database before importing
        #[arg(long = "clear_db", alias = "clear-db")]
        clear_db: bool,
    },

    /// Delete every node and relationship
    Clear,

    /// Export the whole graph as GraphML into the store's import directory
    Export {
        #[arg(long = "file_path", alias = "file-path")]
        file_path: String,
    },

    /// Answer a question from the graph
    Qa {
        #[arg(long)]
        query: String,

        /// Maximum rows of graph context passed to the model
        #[arg(long = "top_k", alias = "top-k", default_value_t = 10)]
        top_k: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find the time ranges most relevant to a query
    #[command(alias = "episode-retrieve")]
    Episodes {
        #[arg(long)]
        query: String,

        /// GraphML file to import before searching
        #[arg(long = "graph_file", alias = "graph-file")]
        graph_file: Option<String>,

        /// Local copy of the graph file, when its path differs from the store's view
        #[arg(long = "local_path", alias = "local-path", requires = "graph_file")]
        local_path: Option<PathBuf>,

        /// Clear the database before importing the graph file
        #[arg(long = "clear_db", alias = "clear-db", requires = "graph_file")]
        clear_db: bool,

        /// Maximum number of episodes to return
        #[arg(long = "top_k", alias = "top-k", default_value_t = 10)]
        top_k: usize,

        /// Relevance threshold (0.0-1.0)
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,

        /// Duration of each episode in seconds
        #[arg(long = "episode_duration", alias = "episode-duration", default_value_t = 10.0)]
        episode_duration: f64,

        /// Print the schema, parameters and scoring reasons
        #[arg(long)]
        verbose: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print node counts and a sample of Episodic nodes
    Inspect {
        #[arg(long, default_value_t = 5)]
        sample: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli.command).await {
        error!(error = %e, "command failed");
        return Err(e);
    }
    Ok(())
}

/// Logs go to stderr; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kg_rag=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

async fn connect() -> anyhow::Result<(Arc<Neo4jDriver>, RetrievalOptions)> {
    let store = StoreConfig::from_env()?;
    let retry = RetryPolicy::from_env()?;
    let options = RetrievalOptions::from_env()?;

    info!(uri = %store.uri, "connecting to Neo4j");
    let driver = Neo4jDriver::connect(&store, retry)
        .await
        .with_context(|| format!("could not connect to {}", store.uri))?;
    Ok((Arc::new(driver), options))
}

fn llm_client() -> anyhow::Result<OpenAiClient> {
    let config = LlmConfig::from_env()?;
    let client = OpenAiClient::new(&config, RetryPolicy::from_env()?);
    info!(model = client.model(), "LLM client ready");
    Ok(client)
}

async fn run(command: Command) -> anyhow::Result<()> {
    // Fail on a missing API key before touching the store.
    let llm = match &command {
        Command::Qa { .. } | Command::Episodes { .. } => Some(llm_client()?),
        _ => None,
    };
    let (driver, options) = connect().await?;

    let result = dispatch(command, Arc::clone(&driver), options, llm).await;
    if let Err(e) = driver.close().await {
        warn!(error = %e, "failed to close store connection");
    }
    result
}

async fn dispatch(
    command: Command,
    driver: Arc<Neo4jDriver>,
    options: RetrievalOptions,
    llm: Option<OpenAiClient>,
) -> anyhow::Result<()> {
    match command {
        Command::Import {
            file_path,
            local_path,
            clear_db,
        } => {
            let importer = Importer::new(driver, options.call_timeout);
            let report = importer
                .import(&ImportRequest {
                    file_path,
                    local_path,
                    clear_db,
                })
                .await?;

            if let Some(deleted) = report.cleared {
                println!("Cleared {deleted} nodes");
            }
            let s = &report.summary;
            println!(
                "Imported {} nodes, {} relationships, {} properties from {}",
                s.nodes, s.relationships, s.properties, s.file
            );
        }

        Command::Clear => {
            let deleted = Importer::new(driver, options.call_timeout).clear().await?;
            println!("Cleared {deleted} nodes");
        }

        Command::Export { file_path } => {
            let s = Importer::new(driver, options.call_timeout)
                .export(&file_path)
                .await?;
            println!(
                "Exported {} nodes, {} relationships, {} properties to {}",
                s.nodes, s.relationships, s.properties, s.file
            );
        }

        Command::Qa { query, top_k, json } => {
            let llm = llm.context("LLM client not configured")?;
            let qa = QaPipeline::new(driver, llm, options.call_timeout);
            let answer = qa.ask(&query, top_k).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{RULE}\nRESULT:\n{RULE}");
                println!("Query: {}", answer.query);
                println!("Cypher: {}", answer.cypher);
                println!("\nAnswer: {}", answer.answer);
            }
        }

        Command::Episodes {
            query,
            graph_file,
            local_path,
            clear_db,
            top_k,
            threshold,
            episode_duration,
            verbose,
            json,
        } => {
            let llm = llm.context("LLM client not configured")?;
            let request = RetrievalRequest {
                query,
                top_k,
                threshold,
                episode_duration,
            };
            let import = graph_file.map(|file_path| ImportRequest {
                file_path,
                local_path,
                clear_db,
            });

            let retriever = EpisodeRetriever::new(driver, LlmEpisodeScorer::new(llm), options);
            if let Some(report) = retriever.prepare(&request, import.as_ref()).await? {
                if !json {
                    let s = &report.summary;
                    println!(
                        "Imported {} nodes, {} relationships from {}",
                        s.nodes, s.relationships, s.file
                    );
                }
            }

            if verbose && !json {
                let schema = retriever.schema().await?;
                println!("Graph Schema:\n{schema}");
                println!("Query: {}", request.query);
                println!("Max results: {}", request.top_k);
                println!("Relevance threshold: {}", request.threshold);
                println!("Episode duration: {}s", request.episode_duration);
                println!("{THIN_RULE}");
            }

            let hits = retriever.retrieve(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits_json(&hits))?);
            } else {
                print_hits(&hits, verbose);
            }
        }

        Command::Inspect { sample } => inspect(driver.as_ref(), sample).await?,
    }
    Ok(())
}

fn hits_json(hits: &[EpisodeHit]) -> serde_json::Value {
    let items: Vec<_> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            json!({
                "rank": i + 1,
                "start": hit.episode.start,
                "end": hit.episode.end,
                "time_range": hit.time_range(),
                "score": hit.score,
                "reason": hit.reason,
                "sources": hit.sources,
            })
        })
        .collect();
    json!(items)
}

fn print_hits(hits: &[EpisodeHit], verbose: bool) {
    println!("{RULE}\nSearch Results: Related Episodes\n{RULE}");
    if hits.is_empty() {
        println!("No matching episodes found.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        if hit.sources.is_empty() {
            println!("\n[{}] {}", i + 1, hit.time_range());
        } else {
            println!("\n[{}] {} ({})", i + 1, hit.time_range(), hit.sources.join(", "));
        }
        println!("    Relevance Score: {:.3}", hit.score);
        if verbose {
            if let Some(reason) = &hit.reason {
                println!("    Reason: {reason}");
            }
        }
    }

    println!("\n{THIN_RULE}\nRelated Time Ranges:");
    for hit in hits {
        println!("  - {}", hit.time_range());
    }
}

async fn inspect<D: GraphDriver>(driver: &D, sample: usize) -> anyhow::Result<()> {
    let stats = driver.stats().await?;
    println!("\n=== Node Counts by Label ===");
    for (labels, count) in &stats.label_counts {
        println!("  {labels}: {count}");
    }
    println!("\n=== Relationship Count: {} ===", stats.relationship_count);

    let episodes = driver.episodic_nodes().await?;
    println!("\n=== Episodic Node Count: {} ===", episodes.len());
    if episodes.is_empty() {
        println!("\nNo Episodic nodes found. Checking what nodes exist...");
        println!("\n=== Sample Nodes ===");
        for node in driver.sample_nodes(FALLBACK_SAMPLE).await? {
            println!(
                "  [{}] {}",
                node.label.as_deref().unwrap_or("(no label)"),
                node.name.as_deref().unwrap_or("(no name)")
            );
        }
        return Ok(());
    }

    println!("\n=== Sample Episodic Nodes ===");
    for (i, node) in episodes.iter().take(sample).enumerate() {
        println!("\n[{}] Name: {}", i + 1, node.name);
        println!("    Source: {}", node.source.as_deref().unwrap_or("(none)"));
        if let Some((start, end)) = node.explicit_span() {
            println!("    Time: {start:.1}s - {end:.1}s");
        }
        if node.content.is_empty() {
            println!("    Content: (empty)");
        } else {
            println!("    Content: {}", truncate_with_ellipsis(&node.content, 200));
        }
    }
    Ok(())
}
