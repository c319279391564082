#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cluster_strata::gateway::NoGenerator;
use cluster_strata::{
    classify_file_name, ArtifactKind, ArtifactStore, DepthEpoch, GeneratorConfig, Pipeline,
    RunConfig, StageStatus, TextGenerator,
};

#[derive(Parser)]
#[command(name = "strata", version, about = "Layered LLM reports over clustered transactions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline stages in order
    Run {
        /// JSON run config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long)]
        preview_rows: Option<usize>,
        #[arg(long)]
        max_prompt_tokens: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Only partition these pairs, as DEPTH:EPOCH (repeatable)
        #[arg(long = "depth-epoch", value_parser = parse_depth_epoch)]
        depth_epochs: Vec<DepthEpoch>,
        #[arg(long)]
        skip_partition: bool,
        #[arg(long)]
        skip_summarize: bool,
        #[arg(long)]
        skip_cluster_comparison: bool,
        #[arg(long)]
        skip_epoch_comparison: bool,
        #[arg(long)]
        skip_depth_comparison: bool,
    },
    /// List the artifacts present in a work directory
    Keys {
        #[arg(long, default_value = "strata_work")]
        work_dir: PathBuf,
    },
    /// Print the typed key of an artifact file name
    ParseKey { name: String },
}

fn parse_depth_epoch(raw: &str) -> Result<DepthEpoch, String> {
    let (depth, epoch) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected DEPTH:EPOCH, got {raw:?}"))?;
    let depth = depth.trim().parse().map_err(|_| format!("bad depth in {raw:?}"))?;
    let epoch = epoch.trim().parse().map_err(|_| format!("bad epoch in {raw:?}"))?;
    Ok(DepthEpoch::new(depth, epoch))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            work_dir,
            preview_rows,
            max_prompt_tokens,
            concurrency,
            depth_epochs,
            skip_partition,
            skip_summarize,
            skip_cluster_comparison,
            skip_epoch_comparison,
            skip_depth_comparison,
        } => {
            let mut run = match config {
                Some(path) => RunConfig::load(path)?,
                None => RunConfig::default(),
            };
            if let Some(input) = input {
                run.input = input;
            }
            if let Some(work_dir) = work_dir {
                run.work_dir = work_dir;
            }
            if let Some(rows) = preview_rows {
                run.preview_rows = rows;
            }
            if let Some(tokens) = max_prompt_tokens {
                run.max_prompt_tokens = tokens;
            }
            if let Some(n) = concurrency {
                run.concurrency = n;
            }
            if !depth_epochs.is_empty() {
                run.depth_epochs = Some(depth_epochs);
            }
            run.stages.partition &= !skip_partition;
            run.stages.summarize &= !skip_summarize;
            run.stages.cluster_comparison &= !skip_cluster_comparison;
            run.stages.epoch_comparison &= !skip_epoch_comparison;
            run.stages.depth_comparison &= !skip_depth_comparison;

            // Resolve the backend before any stage touches the work dir.
            let generator: Arc<dyn TextGenerator> = if run.stages.needs_generator() {
                GeneratorConfig::from_env()?.build()?
            } else {
                Arc::new(NoGenerator)
            };
            let pipeline = Pipeline::new(run, generator)?;
            let manifest = pipeline.run().await?;

            for report in &manifest.stages {
                println!(
                    "{:<20} {:<16} produced={} failed={}",
                    report.stage.as_str(),
                    format!("{:?}", report.status),
                    report.produced.len(),
                    report.failures.len()
                );
            }
            for (stage, failure) in manifest.failures() {
                println!("  {stage} {}: {:?}: {}", failure.key, failure.class, failure.error);
            }
            if let Some(findings) = &manifest.findings {
                println!("findings: {}", findings.display());
            }
            println!("manifest: {}", pipeline.manifest_path().display());

            if let Some(report) = manifest
                .stages
                .iter()
                .find(|r| r.status == StageStatus::Failed)
            {
                return Err(format!("stage {} failed", report.stage).into());
            }
        }
        Commands::Keys { work_dir } => {
            let store = ArtifactStore::new(work_dir);
            for kind in ArtifactKind::ALL {
                let keys = store.list(kind)?;
                println!("{kind} ({})", keys.len());
                for key in keys {
                    println!("  {}", kind.file_name(&key));
                }
            }
        }
        Commands::ParseKey { name } => match classify_file_name(&name) {
            Some((kind, key)) => {
                println!("kind: {kind}");
                println!("key: {key}");
                println!("json: {}", serde_json::to_string(&key)?);
            }
            None => return Err(format!("{name:?} is not an artifact file name").into()),
        },
    }

    Ok(())
}
