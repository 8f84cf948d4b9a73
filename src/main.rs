use clap::{Parser, Subcommand};
use element_analysis::{analysis, validate_input, Config, ElementAnalyzer};
use log::LevelFilter;
use std::path::PathBuf;

/// Element Analysis
#[derive(Parser)]
#[command(name = "element-analysis")]
#[command(about = "Fingerprint, classify and visualize audio and MIDI sample elements")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every sample and write element_analysis.json and visualization_data.json
    Analyze {
        /// Samples directory (MIDI files live in its midi/ subdirectory)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory for JSON documents and images
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip waveform/spectrogram rendering
        #[arg(long)]
        no_images: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Render per-type visualizations and visualization_metadata.json
    Visualize {
        /// Samples directory
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Analyze a single file and print its record
    Inspect {
        /// Audio or MIDI file
        file: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    if verbose && quiet {
        anyhow::bail!("Cannot specify both --verbose and --quiet");
    }
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
    Ok(())
}

fn load_config(
    path: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = path {
        element_analysis::config::load_config(config_path)?
    } else {
        Config::default()
    };
    if let Some(input) = input {
        config.paths.input_dir = input;
    }
    if let Some(output) = output {
        config.paths.output_dir = output;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            config,
            no_images,
            verbose,
            quiet,
        } => {
            init_logging(verbose, quiet)?;

            let mut config = load_config(config, input, output)?;
            if no_images {
                config.visualization.generate_images = false;
            }
            validate_input(&config)?;

            let analyzer = ElementAnalyzer::new(config);
            match analyzer.run()? {
                Some(summary) => {
                    if !quiet {
                        println!("Analysis complete! Results saved to:");
                        println!("- Full analysis: {}", summary.analysis_path.display());
                        println!(
                            "- Visualization data: {}",
                            summary.visualization_path.display()
                        );
                        if let Some(dir) = &summary.image_dir {
                            println!("- Images: {}/", dir.display());
                        }
                        if summary.failures > 0 {
                            println!(
                                "{} of {} elements failed; see their error entries",
                                summary.failures, summary.element_count
                            );
                        }
                    }
                }
                None => {
                    if !quiet {
                        println!("No MIDI or audio files found in samples directory");
                    }
                }
            }
        }
        Commands::Visualize {
            input,
            output,
            config,
            verbose,
            quiet,
        } => {
            init_logging(verbose, quiet)?;

            let config = load_config(config, input, output)?;
            validate_input(&config)?;

            let analyzer = ElementAnalyzer::new(config);
            let records = analyzer.run_visualization_pass()?;
            let out_dir = analyzer.config().paths.visualization_dir();

            if !quiet {
                println!(
                    "Visualization generation complete! {} elements, results saved to {}",
                    records.len(),
                    out_dir.display()
                );
            }
        }
        Commands::Inspect { file, config } => {
            init_logging(false, true)?;

            let mut config = load_config(config, None, None)?;
            config.visualization.generate_images = false;

            let analyzer = ElementAnalyzer::new(config);
            let record = analyzer.analyze_element(&file);
            println!("{}", analysis::to_json_string(&record)?);
        }
        Commands::ValidateConfig { config } => {
            let config = element_analysis::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
