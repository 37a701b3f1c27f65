use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ragline_core::chain::{Chain, Destination, LlmChain, RouterChain};
use ragline_core::config::Config;
use ragline_core::context::{RunContext, TracingObserver};
use ragline_core::eval::{EvalSummary, Evaluator, Example, QaGenerator};
use ragline_core::prompt::PromptTemplate;
use ragline_core::retrieval::RetrievalQa;
use ragline_core::vault::EnvVaultProvider;
use ragline_llm::LlmProvider;
use ragline_llm::openai::OpenAiProvider;
use ragline_memory::{Document, IngestionPipeline, SplitterConfig, TextSplitter, loader_for_path};

#[derive(Debug, Parser)]
#[command(name = "ragline", version, about)]
struct Cli {
    /// Path to the TOML config (default: $RAGLINE_CONFIG or config/default.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer from a scripted offline model instead of the configured API.
    #[cfg(feature = "mock")]
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer a question from the given documents.
    Ask {
        /// CSV, text or markdown files to index. May be repeated.
        #[arg(long = "data", required = true)]
        data: Vec<PathBuf>,
        #[arg(long)]
        question: String,
        /// Number of chunks to retrieve (overrides `retrieval.k`).
        #[arg(short)]
        k: Option<usize>,
        /// Print the chunks the answer was grounded on.
        #[arg(long)]
        sources: bool,
    },
    /// Answer every example question and grade the answers with the model.
    Grade {
        #[arg(long = "data", required = true)]
        data: Vec<PathBuf>,
        /// JSON array of `{"query", "answer"}` objects. Generated from the data when omitted.
        #[arg(long)]
        examples: Option<PathBuf>,
        /// Print each graded example as a JSON line.
        #[arg(long)]
        verbose: bool,
    },
    /// Route an input to one of the destinations in `[router]` and print the result.
    Route { input: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let mut config = Config::load(&config_path)?;
    config.validate()?;

    let ctx = RunContext::new()
        .with_observer(Arc::new(TracingObserver))
        .with_timeout(Duration::from_secs(config.llm.timeout_secs));
    let cancel = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        cancel.cancel();
    });

    #[cfg(feature = "mock")]
    if cli.mock {
        let provider =
            Arc::new(ragline_llm::mock::MockProvider::default().with_hashed_embeddings(256));
        return run(cli.command, &config, provider, &ctx).await;
    }

    config.resolve_secrets(&EnvVaultProvider).await?;
    let api_key = config
        .secrets
        .openai_api_key
        .as_ref()
        .context("no API key: set RAGLINE_OPENAI_API_KEY or OPENAI_API_KEY")?;
    let provider = OpenAiProvider::new(
        api_key.expose().to_owned(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
        Some(config.llm.embedding_model.clone()),
    )
    .with_client(ragline_llm::http::client_with_timeout(Duration::from_secs(
        config.llm.timeout_secs,
    )))
    .with_max_retries(config.llm.max_retries);
    tracing::info!(model = provider.model(), "using OpenAI-compatible provider");

    run(cli.command, &config, Arc::new(provider), &ctx).await
}

async fn run<P: LlmProvider + 'static>(
    command: Command,
    config: &Config,
    provider: Arc<P>,
    ctx: &RunContext,
) -> anyhow::Result<()> {
    match command {
        Command::Ask {
            data,
            question,
            k,
            sources,
        } => {
            let qa = build_qa(config, &data, provider, k).await?;
            let answer = qa.answer_with_sources(&question, ctx).await?;
            println!("{}", answer.answer);
            if sources {
                for s in &answer.sources {
                    println!("  [{:.3}] {}", s.score, s.chunk.position());
                }
            }
        }
        Command::Grade {
            data,
            examples,
            verbose,
        } => {
            let examples = match examples {
                Some(path) => read_examples(&path)?,
                None => {
                    let documents = load_documents(&data).await?;
                    QaGenerator::new(Arc::clone(&provider))
                        .generate(&documents, ctx)
                        .await?
                }
            };
            if examples.is_empty() {
                bail!("no examples to grade");
            }

            let qa = build_qa(config, &data, Arc::clone(&provider), None).await?;
            let mut predictions = Vec::with_capacity(examples.len());
            for example in &examples {
                predictions.push(qa.answer(&example.query, ctx).await?);
            }

            let graded = Evaluator::new(provider)
                .evaluate(&examples, &predictions, ctx)
                .await?;
            if verbose {
                for g in &graded {
                    println!("{}", serde_json::to_string(g)?);
                }
            }
            let summary = EvalSummary::from_graded(&graded);
            println!(
                "{}/{} correct ({:.1}%)",
                summary.correct,
                summary.total(),
                summary.accuracy() * 100.0
            );
        }
        Command::Route { input } => {
            let router = build_router(config, provider)?;
            println!("{}", router.run(&input, ctx).await?);
        }
    }
    Ok(())
}

async fn build_qa<P: LlmProvider>(
    config: &Config,
    data: &[PathBuf],
    provider: Arc<P>,
    k: Option<usize>,
) -> anyhow::Result<RetrievalQa<P>> {
    let pipeline = IngestionPipeline::new(TextSplitter::new(SplitterConfig {
        chunk_size: config.retrieval.chunk_size,
        chunk_overlap: config.retrieval.chunk_overlap,
        sentence_aware: config.retrieval.sentence_aware,
    }));
    let index = pipeline
        .build_index(data, Arc::clone(&provider))
        .await
        .context("failed to build vector index")?;
    let k = k.unwrap_or(config.retrieval.k);
    if k == 0 {
        bail!("-k must be at least 1");
    }
    Ok(RetrievalQa::new(Arc::new(index), provider, k).with_temperature(config.llm.temperature))
}

fn build_router<P: LlmProvider + 'static>(
    config: &Config,
    provider: Arc<P>,
) -> anyhow::Result<RouterChain<P>> {
    if config.router.destinations.is_empty() {
        bail!("no [[router.destinations]] configured");
    }
    let destinations = config
        .router
        .destinations
        .iter()
        .map(|d| {
            Destination::from_template(Arc::clone(&provider), &d.name, &d.description, &d.template)
                .with_context(|| format!("invalid template for destination {:?}", d.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let default: Box<dyn Chain> = Box::new(
        LlmChain::new(
            Arc::clone(&provider),
            PromptTemplate::new(&config.router.default_prompt)
                .context("invalid router.default_prompt")?,
        )
        .with_name("default")
        .with_temperature(config.llm.temperature),
    );
    Ok(RouterChain::new(provider, destinations, default)?)
}

async fn load_documents(paths: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in paths {
        let loader = loader_for_path(path)?;
        let docs = loader
            .load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        documents.extend(docs);
    }
    Ok(documents)
}

fn read_examples(path: &Path) -> anyhow::Result<Vec<Example>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read examples file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse examples file {}", path.display()))
}

fn resolve_config_path(arg: Option<&Path>) -> PathBuf {
    if let Some(path) = arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("RAGLINE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
