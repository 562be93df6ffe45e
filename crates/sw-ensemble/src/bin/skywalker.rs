//! Skywalker command-line tool: inspect ensemble configurations and expand
//! them into input tables.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sw_ensemble::{EnsembleLoad, EnsembleLoader, LoaderConfig, OutputFormat, WriterConfig};

#[derive(Parser)]
#[command(name = "skywalker")]
#[command(about = "Generate and inspect Skywalker parameter ensembles", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when SKYWALKER_LOG is unset (e.g. info, debug)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ensemble type, size, settings and parameter names
    Inspect {
        #[command(flatten)]
        source: Source,
    },

    /// Write the generated inputs (and settings) to a Python module or JSON file
    Expand {
        #[command(flatten)]
        source: Source,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (python, json); defaults to the output file extension
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Significant digits for real numbers
        #[arg(long, env = "SKYWALKER_REAL_PRECISION")]
        precision: Option<usize>,
    },
}

#[derive(Args)]
struct Source {
    /// YAML configuration file
    file: PathBuf,

    /// Name of the settings block to read
    #[arg(short, long)]
    settings: Option<String>,

    /// Name of the block describing the ensemble
    #[arg(long, default_value = "input")]
    ensemble_block: String,
}

impl Source {
    fn load(&self) -> anyhow::Result<EnsembleLoad> {
        let mut config = LoaderConfig::new().with_ensemble_block(&self.ensemble_block);
        if let Some(block) = &self.settings {
            config = config.with_settings_block(block);
        }
        EnsembleLoader::new(config)
            .load(&self.file)
            .with_context(|| format!("failed to load {}", self.file.display()))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("SKYWALKER_LOG")
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Inspect { source } => {
            let load = source.load()?;
            println!("{}", sw_ensemble::banner());
            println!("file:       {}", source.file.display());
            println!("type:       {}", load.kind);
            println!("size:       {}", load.ensemble.size());
            println!("parameters: {}", load.ensemble.parameter_names().join(", "));
            if load.settings.is_empty() {
                println!("settings:   (none)");
            } else {
                println!("settings:");
                for (name, value) in load.settings.iter() {
                    println!("  {name} = {value}");
                }
            }
        }
        Commands::Expand {
            source,
            output,
            format,
            precision,
        } => {
            let load = source.load()?;
            let mut config = WriterConfig::new()
                .with_format(format.unwrap_or_else(|| OutputFormat::from_path(&output)));
            if let Some(precision) = precision.filter(|p| *p > 0) {
                config = config.with_precision(precision);
            }
            load.ensemble
                .write_with(&output, &config)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(
                "Expanded {} members from {} into {}",
                load.ensemble.size(),
                source.file.display(),
                output.display()
            );
        }
    }
    Ok(())
}
