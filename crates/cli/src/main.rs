//! Dairy AI CLI
//!
//! A command-line tool for requesting milk yield and mastitis predictions,
//! running batches, and checking model health on a dairy AI server.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::{batch, criteria, health, load_input, predict};

/// Dairy AI CLI
#[derive(Parser)]
#[command(name = "dairy")]
#[command(author, version, about = "CLI for the Dairy AI prediction service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via DAIRY_AI_URL env var or the config file)
    #[arg(long, env = "DAIRY_AI_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table]
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request a single prediction
    #[command(subcommand)]
    Predict(PredictCommands),

    /// Submit a batch of prediction requests
    Batch {
        /// Which model the batch targets
        #[arg(value_enum)]
        kind: batch::BatchKind,

        /// JSON file, or inline JSON: an array of requests or {"predictions": [...]}
        #[arg(long, short)]
        input: String,

        /// Optional batch name echoed in the result
        #[arg(long)]
        name: Option<String>,
    },

    /// Show model health
    Health {
        /// Model to check
        #[arg(long, short, value_enum, default_value = "yield")]
        model: health::HealthModel,
    },

    /// Show the somatic cell count classification criteria
    Criteria,

    /// Run the built-in sample milk yield prediction
    Sample,

    /// Manage the local CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum PredictCommands {
    /// Predict daily milk yield
    Yield {
        /// JSON file or inline JSON request
        #[arg(long, short)]
        input: String,
    },

    /// Predict mastitis risk from milk measurements
    Mastitis {
        /// JSON file or inline JSON request
        #[arg(long, short)]
        input: String,
    },

    /// Classify a somatic cell count (cells/ml)
    Scc {
        /// Somatic cell count
        value: f64,

        /// Cow identifier echoed in the result
        #[arg(long)]
        cow_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Store the API URL and output format defaults
    Set {
        /// API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format (table or json)
        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

fn configure(
    command: ConfigCommands,
    mut file_config: config::Config,
    api_url: &str,
    format: output::OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = config::Config::config_path()?;
            output::print_info(&format!("config file: {}", path.display()));
            output::print_info(&format!("api url: {}", api_url));
            output::print_info(&format!("format: {:?}", format));
        }
        ConfigCommands::Set {
            api_url,
            default_format,
        } => {
            if let Some(url) = api_url {
                url::Url::parse(&url).context("Invalid API URL")?;
                file_config.api_url = Some(url);
            }
            if let Some(value) = default_format.and_then(|f| f.to_possible_value()) {
                file_config.default_format = Some(value.get_name().to_string());
            }
            let path = file_config.save()?;
            output::print_success(&format!("Saved {}", path.display()));
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = config::Config::load()?;
    let format = file_config.format(cli.format)?;
    let api_url = file_config.api_url(cli.api_url.as_deref());

    // Config commands never touch the network
    let command = match cli.command {
        Commands::Config(config_cmd) => return configure(config_cmd, file_config, &api_url, format),
        command => command,
    };

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match command {
        Commands::Predict(predict_cmd) => match predict_cmd {
            PredictCommands::Yield { input } => {
                predict::predict_yield(&client, load_input(&input)?, format).await?;
            }
            PredictCommands::Mastitis { input } => {
                predict::predict_mastitis(&client, load_input(&input)?, format).await?;
            }
            PredictCommands::Scc { value, cow_id } => {
                predict::predict_scc(&client, value, cow_id, format).await?;
            }
        },
        Commands::Batch { kind, input, name } => {
            batch::run_batch(&client, kind, load_input(&input)?, name, format).await?;
        }
        Commands::Health { model } => {
            health::show_health(&client, model, format).await?;
        }
        Commands::Criteria => {
            criteria::show_criteria(&client, format).await?;
        }
        Commands::Sample => {
            health::run_sample(&client, format).await?;
        }
        // Handled above
        Commands::Config(_) => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<client::ApiFailure>() {
            Some(failure) => {
                output::print_error(&failure.to_string());
                if let Some(field) = &failure.field {
                    output::print_error(&format!("field: {}", field));
                }
            }
            None => output::print_error(&format!("{:#}", e)),
        }
        std::process::exit(1);
    }
}
