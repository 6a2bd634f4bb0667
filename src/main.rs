use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rustc_hash::FxHashMap;
use semantic_retrieval::knowledge::{JsonKnowledgeSource, TextDirKnowledgeSource};
use semantic_retrieval::telemetry::{JsonlTelemetry, TracingTelemetry};
use semantic_retrieval::{
    KnowledgeSource, QueryResult, RagConfig, RagError, SimilarityRetriever, TelemetrySink, init_tracing,
    provider_from_config, store_from_config,
};

/// Ask questions against the knowledge base and print the closest documents.
#[derive(Parser, Debug)]
#[command(name = "rag-query", version)]
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

    /// Number of documents to return
    #[arg(short = 'k', long, default_value_t = 3)]
    top_k: usize,

    /// Run a single query and exit
    #[arg(short, long)]
    query: Option<String>,
}

fn print_results(results: &[QueryResult], titles: &FxHashMap<String, String>) {
    if results.is_empty() {
        println!("No matching documents.");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        let title = titles.get(&result.document_id).map(String::as_str).unwrap_or("");
        println!(
            "{:>2}. [{:.4}] {} {}",
            rank + 1,
            result.score,
            result.document_id,
            title
        );
    }
}

/// Marks failures worth retrying so the user knows to ask again.
fn error_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<RagError>() {
        Some(err) if err.is_transient() => format!("{} (temporary, try again)", err),
        _ => e.to_string(),
    }
}

async fn answer(
    retriever: &SimilarityRetriever,
    source: &dyn KnowledgeSource,
    query: &str,
    top_k: usize,
) -> Result<()> {
    let results = retriever.retrieve(query, top_k).await?;
    let titles: FxHashMap<String, String> = source
        .all()?
        .into_iter()
        .map(|doc| (doc.id, doc.title))
        .collect();
    print_results(&results, &titles);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn");

    let args = Args::parse();
    let mut config = RagConfig::from_env()?;
    if let Some(kb) = args.kb {
        config.knowledge_file = kb;
    }
    if let Some(store) = args.store {
        config.embeddings_file = store;
    }

    let source: Arc<dyn KnowledgeSource> = match &args.docs {
        Some(dir) => Arc::new(TextDirKnowledgeSource::new(dir)),
        None => Arc::new(JsonKnowledgeSource::new(&config.knowledge_file)),
    };
    let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry_file {
        Some(path) => Arc::new(JsonlTelemetry::new(path)),
        None => Arc::new(TracingTelemetry),
    };

    let retriever = SimilarityRetriever::new(
        source.clone(),
        Arc::new(store_from_config(&config)),
        Arc::new(provider_from_config(&config)?),
    )
    .with_telemetry(telemetry);

    if let Some(query) = args.query {
        return answer(&retriever, source.as_ref(), &query, args.top_k).await;
    }

    println!("Semantic retrieval ready. Enter your questions (Ctrl+D to exit)");

    // Interactive query loop
    loop {
        let mut query = String::new();
        print!("> ");
        std::io::stdout().flush()?;

        if std::io::stdin().read_line(&mut query)? == 0 {
            break; // EOF (Ctrl+D)
        }

        let query = query.trim();
        if query.is_empty() {
            continue;
        }

        if let Err(e) = answer(&retriever, source.as_ref(), query, args.top_k).await {
            eprintln!("Error: {}\n", error_message(&e));
        }
    }

    Ok(())
}
