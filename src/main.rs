use anyhow::Context;
use clap::{Parser, Subcommand};
use sparrow_laserchron::config::Config;
use sparrow_laserchron::{logging, metrics};
use sparrow_laserchron::pipeline::storage::{SqliteStorage, Storage};
use sparrow_laserchron::pipeline::{FileOutcome, Pipeline, PipelineResult, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sparrow-laserchron")]
#[command(about = "Import LaserChron U-Pb data tables into a Sparrow store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (defaults to $LASERCHRON_CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Debug-level logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print run results as JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track workbooks under a directory and store their data tables
    Extract {
        root: PathBuf,
        /// Re-extract files whose content is already tracked
        #[arg(long)]
        redo: bool,
    },
    /// Import data tables into sessions, analyses and data
    Import {
        /// Track and import workbooks under this directory first
        #[arg(long, conflicts_with = "basenames")]
        root: Option<PathBuf>,
        /// Only import tracked files with these basenames (always re-imported)
        basenames: Vec<String>,
        /// Re-import files that were already imported
        #[arg(long)]
        redo: bool,
        /// Abort on the first failing file
        #[arg(long)]
        stop_on_error: bool,
    },
    /// List the samples found in every tracked data table
    ListSamples {
        /// Also print each sample's analysis labels
        #[arg(long)]
        labels: bool,
    },
    /// Print the stored data table of a tracked file as CSV
    Datasheet { basename: String },
}

fn report(title: &str, result: &PipelineResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print_summary(title, result);
    }
    Ok(())
}

fn print_summary(title: &str, result: &PipelineResult) {
    println!("\n📊 {}:", title);
    println!("   Files: {}", result.files.len());
    println!("   Imported: {} ({} samples)", result.imported, result.samples);
    println!("   Already imported: {}", result.skipped);
    if result.tracked > 0 {
        println!("   Tracked: {}", result.tracked);
    }
    println!("   Failed: {}", result.failed);

    if result.failed > 0 {
        println!("\n⚠️  Errors encountered:");
        for status in &result.files {
            if let FileOutcome::Failed { state, error } = &status.outcome {
                println!("   - {} [{}]: {}", status.file_path, state, error);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    metrics::init_metrics(&config.metrics)?;

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&config.database.path)
            .with_context(|| format!("opening {}", config.database.path.display()))?,
    );
    let pipeline = Pipeline::new(storage, &config);

    match cli.command {
        Commands::Extract { root, redo } => {
            info!("Extracting data tables under {}", root.display());
            let options = RunOptions {
                redo,
                stop_on_error: false,
            };
            let result = pipeline.extract_directory(&root, options).await?;
            report("Extraction results", &result, cli.json)?;
        }
        Commands::Import {
            root,
            basenames,
            redo,
            stop_on_error,
        } => {
            let options = RunOptions { redo, stop_on_error };
            let result = match root {
                Some(root) => pipeline.run_directory(&root, options).await,
                None => pipeline.import_tracked(&basenames, options).await,
            };
            match result {
                Ok(result) => report("Import results", &result, cli.json)?,
                Err(e) => {
                    error!("Import stopped: {}", e);
                    println!("❌ Import stopped: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::ListSamples { labels } => {
            for file in pipeline.importer().list_samples().await? {
                println!("{} ({})", file.basename, file.file_path);
                if let Some(error) = &file.error {
                    println!("   ⚠️  {}", error);
                    continue;
                }
                for sample in &file.samples {
                    let name = sample.name.as_deref().unwrap_or("<spots only>");
                    println!("   {}: {} analyses", name, sample.labels.len());
                    if labels {
                        for label in &sample.labels {
                            println!("      {}", label);
                        }
                    }
                }
            }
        }
        Commands::Datasheet { basename } => match pipeline.datatable_csv(&basename).await? {
            Some(csv) => print!("{}", csv),
            None => anyhow::bail!("no data table stored for {}", basename),
        },
    }
    Ok(())
}
