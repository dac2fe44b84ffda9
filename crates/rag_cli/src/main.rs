use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rag_core::{
    bootstrap, load_seeds_csv, parse_seeds_csv, seeded_training_set, source_for_path, Answer,
    BootOutcome, BootSource, ChatLog, DocumentCorpus, HashEmbeddingProvider, KeywordOverride,
    LabeledExample, LinearProbe, QueryPipeline, RagConfig, Retriever, Route, Router, Sentence,
    VectorIndex,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_SEEDS: &str = include_str!("../data/seeds.csv");
const DIRECT_REPLY: &str = "Answerable without the document; no retrieval performed.";

type RagRouter = Router<LinearProbe<HashEmbeddingProvider>, KeywordOverride>;
type RagPipeline = QueryPipeline<RagRouter, Retriever<HashEmbeddingProvider>>;

#[derive(Debug, Parser)]
#[command(name = "rag")]
#[command(about = "Routed retrieval over a single document")]
struct Cli {
    /// TOML config file. A missing file means built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hash embedding dimension, overrides `embedding.dim`.
    #[arg(long, global = true)]
    dim: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct RouterArgs {
    /// Router model directory, overrides `paths.model_dir`.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Seed CSV (`text,label`) used when the router has to be trained.
    #[arg(long)]
    seeds: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    router: RouterArgs,

    /// Index file written by `build-index`, overrides `paths.index`.
    #[arg(long)]
    index: Option<PathBuf>,

    /// Similarity threshold, overrides `retrieval.threshold`.
    #[arg(long)]
    threshold: Option<f32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the persisted router, or train and persist it.
    Train {
        #[command(flatten)]
        router: RouterArgs,

        /// Retrain even when a complete model is persisted.
        #[arg(long)]
        force: bool,
    },
    /// Print augmented variants of one text.
    Augment {
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = 3)]
        count: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Split a document into sentences and write the vector index.
    BuildIndex {
        /// `.docx` file, or a text file with one paragraph per line.
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Answer one question.
    Ask {
        #[arg(long)]
        question: String,
        #[command(flatten)]
        serve: ServeArgs,
        #[arg(long)]
        json: bool,
    },
    /// Answer questions read line by line from stdin.
    Chat {
        #[command(flatten)]
        serve: ServeArgs,

        /// Write the conversation as JSON on exit.
        #[arg(long)]
        history_out: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct AskOutput<'a> {
    route: Route,
    score: Option<f32>,
    passage: Option<&'a Sentence>,
    text: &'a str,
}

fn load_config(cli: &Cli) -> Result<RagConfig> {
    let mut config = RagConfig::load(cli.config.as_deref()).context("load config")?;
    if let Some(dim) = cli.dim {
        config.embedding.dim = dim;
    }
    config.validate().context("validate config")?;
    Ok(config)
}

fn embedder(config: &RagConfig) -> HashEmbeddingProvider {
    HashEmbeddingProvider::new(config.embedding.dim)
}

fn training_set(config: &RagConfig, seeds: Option<&Path>) -> rag_core::Result<Vec<LabeledExample>> {
    let seeds = match seeds {
        Some(path) => load_seeds_csv(path)?,
        None => parse_seeds_csv(DEFAULT_SEEDS.as_bytes())?,
    };
    let augmenter = config.augmenter()?;
    Ok(seeded_training_set(
        &seeds,
        &augmenter,
        config.augment.times,
        config.augment.seed,
    ))
}

fn boot_router(config: &RagConfig, args: &RouterArgs, force: bool) -> Result<(RagRouter, BootOutcome)> {
    let model_dir = args
        .model_dir
        .clone()
        .unwrap_or_else(|| config.paths.model_dir.clone());
    let probe = LinearProbe::new(embedder(config), config.train_params());
    let mut router = Router::new(probe, KeywordOverride::fixed()?);

    let outcome = bootstrap(&mut router, &model_dir, config.split(), force, || {
        training_set(config, args.seeds.as_deref())
    })
    .with_context(|| format!("initialise router in {}", model_dir.display()))?;

    Ok((router, outcome))
}

fn open_pipeline(config: &RagConfig, args: &ServeArgs) -> Result<RagPipeline> {
    let threshold = args.threshold.unwrap_or(config.retrieval.threshold);
    if !(-1.0..=1.0).contains(&threshold) {
        bail!("threshold must be in [-1, 1], got {threshold}");
    }

    let (router, _) = boot_router(config, &args.router, false)?;
    let retriever = Retriever::new(embedder(config))
        .with_threshold(threshold)
        .with_top_k(config.retrieval.top_k);

    let index_path = args.index.clone().unwrap_or_else(|| config.paths.index.clone());
    if index_path.exists() {
        let index = VectorIndex::load_jsonl(&index_path)
            .with_context(|| format!("load index {}", index_path.display()))?;
        retriever.publish(index).context("publish index")?;
    } else {
        tracing::warn!(path = %index_path.display(), "no index file, retrieval is unavailable");
    }

    Ok(QueryPipeline::new(router, retriever))
}

fn reply_text(answer: &Answer) -> &str {
    answer.display_text().unwrap_or(DIRECT_REPLY)
}

fn chat_session(pipeline: &RagPipeline, log: &mut ChatLog) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in io::stdin().lock().lines() {
        let line = line.context("read stdin")?;
        let question = line.trim();
        match question {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                log.clear();
                writeln!(out, "history cleared")?;
                continue;
            }
            "/history" => {
                for turn in log.turns() {
                    let at = turn.timestamp.with_timezone(&chrono::Local);
                    writeln!(out, "[{}] {:?}: {}", at.format("%Y-%m-%d %H:%M:%S"), turn.role, turn.content)?;
                }
                continue;
            }
            _ => {}
        }

        let answer = pipeline.answer(question).context("answer question")?;
        let reply = reply_text(&answer);
        writeln!(out, "{reply}")?;
        log.push_exchange(question, reply);
    }

    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Train { router, force } => {
            let (_, outcome) = boot_router(&config, router, *force)?;
            let source = match &outcome.source {
                BootSource::Loaded => "loaded",
                BootSource::Retrained { .. } => "retrained",
            };
            let accuracy = outcome
                .report
                .validation_accuracy
                .map(|a| format!("{a:.4}"))
                .unwrap_or_else(|| "n/a".to_string());

            println!(
                "source={} train={} validation={} accuracy={} trained_at={}",
                source,
                outcome.report.train_size,
                outcome.report.validation_size,
                accuracy,
                outcome.report.trained_at.to_rfc3339()
            );
        }
        Commands::Augment {
            text,
            count,
            seed,
            json,
        } => {
            let augmenter = config.augmenter()?;
            let mut rng = StdRng::seed_from_u64(seed.unwrap_or(config.augment.seed));
            let variants = augmenter.generate(text, *count, &mut rng);

            if *json {
                println!("{}", serde_json::to_string(&variants).context("serialize variants")?);
            } else {
                for variant in &variants {
                    println!("{variant}");
                }
            }
        }
        Commands::BuildIndex { document, output } => {
            let output = output.clone().unwrap_or_else(|| config.paths.index.clone());
            let source = source_for_path(document);
            let corpus = DocumentCorpus::from_source(source.as_ref())
                .with_context(|| format!("read document {}", document.display()))?;

            let embedder = embedder(&config);
            let index = VectorIndex::build(&corpus, &embedder).context("build index")?;
            index
                .save_jsonl(&output)
                .with_context(|| format!("write index {}", output.display()))?;

            println!(
                "model={} paragraphs={} sentences={} output={}",
                index.model_id(),
                corpus.paragraphs().len(),
                index.len(),
                output.display()
            );
        }
        Commands::Ask {
            question,
            serve,
            json,
        } => {
            let pipeline = open_pipeline(&config, serve)?;
            let answer = pipeline.answer(question).context("answer question")?;

            if *json {
                let out = AskOutput {
                    route: answer.route,
                    score: answer.score,
                    passage: answer.passage.as_ref(),
                    text: reply_text(&answer),
                };
                println!("{}", serde_json::to_string(&out).context("serialize answer")?);
            } else {
                let score = answer
                    .score
                    .map(|s| format!("{s:.4}"))
                    .unwrap_or_else(|| "null".to_string());
                println!("route={} score={}", answer.route, score);
                println!("answer={}", reply_text(&answer));
            }
        }
        Commands::Chat { serve, history_out } => {
            let pipeline = open_pipeline(&config, serve)?;
            let mut log = ChatLog::new();
            let session = chat_session(&pipeline, &mut log);

            // The conversation so far is kept even when the session fails.
            if let Some(path) = history_out {
                log.write_json(path)
                    .with_context(|| format!("write history {}", path.display()))?;
            }
            session?;
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
