use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logwarden::config::AppConfig;
use logwarden::report::AnalysisOutcome;

#[derive(Parser)]
#[command(
    name = "logwarden",
    about = "Access-log anomaly triage with threat-intel enrichment",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the upload/analysis HTTP service
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Analyze a single .log or .txt access log
    Analyze {
        /// Log file to analyze
        file: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Skip geolocation and narrative services, use fallbacks
        #[arg(long)]
        offline: bool,
    },
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            tracing::info!(%bind, "Starting logwarden service");
            logwarden::serve(&config, &bind).await?;
        }
        Commands::Analyze {
            file,
            json,
            offline,
        } => {
            let name = file.to_string_lossy();
            if !logwarden::api::is_supported_upload(&name) {
                anyhow::bail!("unsupported file type: {} (expected .log or .txt)", name);
            }
            let size = std::fs::metadata(&file)
                .with_context(|| format!("cannot stat {}", file.display()))?
                .len();

            let analyzer = logwarden::pipeline::Analyzer::from_config(&config, offline)?;
            let outcome = analyzer.analyze_file(&file, size).await?;

            if json {
                let body = logwarden::api::outcome_body(&outcome);
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_table(&outcome);
            }
        }
    }

    Ok(())
}

fn print_table(outcome: &AnalysisOutcome) {
    let report = match outcome {
        AnalysisOutcome::NoData => {
            println!("File parsed but found no valid logs.");
            return;
        }
        AnalysisOutcome::Report(r) => r,
    };

    println!("\n=== logwarden Report ===");
    println!("{}", report.summary());
    if let Some(e) = &report.enrichment {
        println!("Top offender: {} ({})", e.source_address, e.origin_location);
        println!("Analysis:     {}", e.narrative);
        println!("Technique:    {}", e.mitre_technique_id);
        println!("Action:       {}", e.suggested_action);
    }
    println!();
    println!("{:<16} | {:<8} | {:<6} | {:<8} | Request", "Source", "Level", "Status", "Size");
    println!("{:-<16}-|-{:-<8}-|-{:-<6}-|-{:-<8}-|-{:-<40}", "", "", "", "", "");
    for rec in &report.records {
        println!(
            "{:<16} | {:<8} | {:<6} | {:<8} | {}",
            rec.source_address,
            rec.threat_level.as_str(),
            rec.status_code,
            rec.response_size,
            rec.request_line
        );
    }
    println!();
}
