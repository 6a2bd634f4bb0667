//! Warms the embedding store for the whole corpus.
//!
//! Exits non-zero when the corpus is empty, when the provider returns fewer
//! vectors than documents, or when the store cannot be written.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use semantic_retrieval::knowledge::{JsonKnowledgeSource, TextDirKnowledgeSource};
use semantic_retrieval::{
    BulkPrecompute, KnowledgeSource, RagConfig, init_tracing, provider_from_config,
    store_from_config,
};

#[derive(Parser, Debug)]
#[command(name = "rag-precompute", version, about = "Generate embeddings for every document")]
struct Args {
    /// JSON corpus file (array of {id, title, body})
    #[arg(long, env = "RAG_KB_FILE")]
    kb: Option<PathBuf>,

    /// Directory of .txt documents, used instead of --kb
    #[arg(long, conflicts_with = "kb")]
    docs: Option<PathBuf>,

    /// Embedding store file
    #[arg(long, env = "RAG_EMBEDDINGS_FILE")]
    store: Option<PathBuf>,

    /// Documents per provider request
    #[arg(long, env = "RAG_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Re-embed only these document ids
    #[arg(long = "only", value_name = "ID")]
    only: Vec<String>,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RagConfig::from_env()?;
    if let Some(kb) = args.kb {
        config.knowledge_file = kb;
    }
    if let Some(store) = args.store {
        config.embeddings_file = store;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    let source: Arc<dyn KnowledgeSource> = match &args.docs {
        Some(dir) => Arc::new(TextDirKnowledgeSource::new(dir)),
        None => Arc::new(JsonKnowledgeSource::new(&config.knowledge_file)),
    };

    let tool = BulkPrecompute::new(
        source,
        Arc::new(store_from_config(&config)),
        Arc::new(provider_from_config(&config)?),
    )
    .with_batch_size(config.batch_size);

    if !args.only.is_empty() {
        let refreshed = tool.refresh(&args.only).await?;
        println!("Re-embedded {} document(s)", refreshed);
        return Ok(());
    }

    println!("Generating embeddings with {}...", config.model);
    let report = tool
        .run(|progress| println!("  embedded {}/{} documents", progress.embedded, progress.total))
        .await?;

    println!(
        "Saved {} embeddings ({} dimensions, {} batches) to {}",
        report.documents,
        report.dimensions,
        report.batches,
        config.embeddings_file.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
