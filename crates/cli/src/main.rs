use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ibtikar_core::{build_corpus, ChunkConfig, TextChunker};
use ibtikar_index::{read_source_records, ChunkStore, FlatL2Index, VectorIndex};
use ibtikar_rag::{
    no_context_reply, EmbeddingClient, GroundedPrompt, PromptOptions, RetrievalConfig, Retriever,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "ibtikar", version = VERSION, about = "Ibtikar retrieval toolkit")]
struct Cli {
    /// TOML config with a [retrieval] table; env vars override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and index ingestion records.
    Build {
        #[arg(long)]
        records: PathBuf,
        #[arg(long = "index-out")]
        index_out: Option<PathBuf>,
        #[arg(long = "docs-out")]
        docs_out: Option<PathBuf>,
        #[arg(long = "chunk-size", default_value_t = 1200)]
        chunk_size: usize,
        #[arg(long, default_value_t = 150)]
        overlap: usize,
    },
    /// Print the ranked chunks for a question.
    Retrieve {
        question: String,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        trace: bool,
    },
    /// Print the grounded prompt the chat layer would send.
    Context {
        question: String,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
    },
    /// Check configured paths and store/index alignment.
    Doctor,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = RetrievalConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            records,
            index_out,
            docs_out,
            chunk_size,
            overlap,
        } => {
            let index_path = index_out.unwrap_or_else(|| config.index_path.clone());
            let docs_path = docs_out.unwrap_or_else(|| config.docs_path.clone());
            run_build(&config, &records, &index_path, &docs_path, chunk_size, overlap)
        }
        Commands::Retrieve {
            question,
            top_k,
            json,
            trace,
        } => {
            let retriever = Retriever::open(&config)?;
            let retrieval =
                retriever.retrieve_with_trace(&question, top_k.unwrap_or(config.top_k))?;
            if json {
                let payload = if trace {
                    serde_json::to_value(&retrieval)?
                } else {
                    serde_json::to_value(&retrieval.chunks)?
                };
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }
            for (rank, chunk) in retrieval.chunks.iter().enumerate() {
                println!("#{} [{}]\n{}\n", rank + 1, chunk.source, chunk.text.trim());
            }
            if retrieval.chunks.is_empty() {
                println!("(no matching chunks)");
            }
            if trace {
                eprintln!("{}", serde_json::to_string_pretty(&retrieval.trace)?);
            }
            Ok(())
        }
        Commands::Context { question, top_k } => {
            let retriever = Retriever::open(&config)?;
            let chunks = retriever.retrieve(&question, top_k.unwrap_or(config.top_k))?;
            let options = PromptOptions::from_env();
            match GroundedPrompt::compose(&question, &chunks, &options) {
                Some(prompt) => {
                    println!("=== SYSTEM ===\n{}\n=== USER ===\n{}", prompt.system, prompt.user);
                    if !prompt.sources.is_empty() {
                        println!("=== SOURCES ===");
                        for source in &prompt.sources {
                            println!("- {source}");
                        }
                    }
                }
                None => println!(
                    "{}",
                    no_context_reply(ibtikar_rag::detect_language(&question))
                ),
            }
            Ok(())
        }
        Commands::Doctor => run_doctor(&config),
    }
}

fn run_build(
    config: &RetrievalConfig,
    records_path: &Path,
    index_path: &Path,
    docs_path: &Path,
    chunk_size: usize,
    overlap: usize,
) -> Result<()> {
    let records = read_source_records(records_path)?;
    info!(records = records.len(), path = %records_path.display(), "loaded records");
    let embedder = EmbeddingClient::from_config(&config.embedding)?;
    let chunker = TextChunker::new(ChunkConfig {
        max_chars: chunk_size,
        overlap_chars: overlap,
    });
    let corpus = build_corpus(&records, &embedder, &chunker, config.embedding.batch_size)?;
    corpus.write(index_path, docs_path)?;
    println!(
        "{}",
        json!({
            "records": records.len(),
            "chunks": corpus.store.len(),
            "dimensions": corpus.index.dimensions(),
            "index": index_path.display().to_string(),
            "docs": docs_path.display().to_string(),
        })
    );
    Ok(())
}

fn run_doctor(config: &RetrievalConfig) -> Result<()> {
    println!("embedding provider = {}", config.embedding.provider.as_str());
    println!("embedding model    = {}", config.embedding.model);
    println!(
        "reranker           = {}",
        config.rerank.url.as_deref().unwrap_or("(disabled)")
    );
    println!("recall_k / top_k   = {} / {}", config.recall_k, config.top_k);
    let allowlist = config.allowlist();
    let mut domains: Vec<&str> = allowlist.domains().collect();
    domains.sort_unstable();
    println!("allowed domains    = {}", domains.join(", "));
    println!(
        "sentinel prefix    = {}",
        if allowlist.sentinel().is_empty() {
            "(none)"
        } else {
            allowlist.sentinel()
        }
    );
    for (label, path) in [("index", &config.index_path), ("docs", &config.docs_path)] {
        let status = if path.exists() { "[OK]" } else { "[missing]" };
        println!("{label:<18} = {}   {status}", path.display());
    }
    let store = ChunkStore::load(&config.docs_path).context("chunk store")?;
    let index = FlatL2Index::load(&config.index_path).context("vector index")?;
    if store.len() != index.len() {
        return Err(anyhow!(
            "chunk store has {} chunks but index has {} rows",
            store.len(),
            index.len()
        ));
    }
    println!(
        "corpus             = {} chunks x {} dims [aligned]",
        store.len(),
        index.dimensions()
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn every_subcommand_has_help_text() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        for sub in cmd.get_subcommands() {
            assert!(sub.get_about().is_some(), "{} lacks help", sub.get_name());
        }
    }

    #[test]
    fn retrieve_parses_flags() {
        let cli = Cli::try_parse_from(["ibtikar", "retrieve", "ما هو ابتكار؟", "--top-k", "3", "--json"])
            .unwrap();
        match cli.command {
            Commands::Retrieve {
                question,
                top_k,
                json,
                trace,
            } => {
                assert_eq!(question, "ما هو ابتكار؟");
                assert_eq!(top_k, Some(3));
                assert!(json);
                assert!(!trace);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
