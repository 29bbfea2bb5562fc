use clap::{Parser, Subcommand};
use mesoscaler::config::{load_config_or_default, Config, ConfigFormat, StageKind};
use mesoscaler::logging::{clear_correlation_id, init_logging, new_correlation_id};
use mesoscaler::pipeline::RunSummary;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "mesoscaler")]
#[command(about = "Landmark-based atlas alignment for mesoscale brain imaging")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the artifact stores
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Worker threads for per-image work
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Recompute artifacts that already exist
    #[arg(long, global = true)]
    overwrite: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect source images into working copies
    Collect {
        /// Directory holding the source images
        input: PathBuf,
    },

    /// Predict landmarks on collected images
    Predict,

    /// Fit the reference atlas to predicted landmarks
    Align,

    /// Project atlas regions at native resolution
    Rois,

    /// Bundle every image's artifacts into one package
    Package,

    /// Run every stage in sequence
    Process {
        /// Directory holding the source images
        input: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination file
        path: PathBuf,

        /// Write JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref());
    match cli.verbose {
        0 => {}
        1 => config.logging.global_level = "debug".to_string(),
        _ => {
            config.logging.global_level = "trace".to_string();
            config.logging.algorithm_level = "trace".to_string();
            config.logging.pipeline_level = "trace".to_string();
            config.logging.predictor_level = "trace".to_string();
        }
    }
    if let Some(output) = cli.output {
        config.pipeline.output_dir = output;
    }
    if let Some(workers) = cli.workers {
        config.pipeline.workers = workers;
    }
    config.pipeline.overwrite |= cli.overwrite;

    let _log_guard = init_logging(&config.logging)?;

    let stages: Vec<StageKind> = match cli.command {
        Commands::Collect { input } => {
            config.pipeline.input_dir = Some(input);
            vec![StageKind::Collect]
        }
        Commands::Predict => vec![StageKind::Predict],
        Commands::Align => vec![StageKind::Align],
        Commands::Rois => vec![StageKind::Rois],
        Commands::Package => vec![StageKind::Package],
        Commands::Process { input } => {
            config.pipeline.input_dir = Some(input);
            StageKind::ALL.to_vec()
        }
        Commands::InitConfig { path, json } => {
            let format = if json { ConfigFormat::Json } else { ConfigFormat::Toml };
            Config::default().save_to_file(&path, format)?;
            println!("Default configuration written to {}", path.display());
            return Ok(());
        }
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("  - {}", error);
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    let correlation_id = new_correlation_id();
    info!(correlation_id = %correlation_id, stages = ?stages, "Starting run");
    let pipeline = config.build_pipeline(&stages)?;
    let result = pipeline.run();
    clear_correlation_id();

    let summary = result?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun {} ({})", summary.pipeline, summary.correlation_id);
    println!("{:<12} {:>9} {:>8} {:>7} {:>10}", "stage", "written", "skipped", "failed", "time (ms)");
    println!("{}", "-".repeat(50));
    for stage in &summary.stages {
        println!(
            "{:<12} {:>9} {:>8} {:>7} {:>10.1}",
            stage.stage,
            stage.succeeded.len(),
            stage.skipped.len(),
            stage.failed.len(),
            stage.duration_ms
        );
    }

    let failed = summary.failed_images();
    if !failed.is_empty() {
        println!("\nFailed images:");
        for image in failed {
            println!("  {:<30} {:<24} {}", image.key, image.kind, image.message);
        }
    }
}
