//! Lagoon - TCP deception service
//!
//! Serves fake TCP banners, captures attacker input, and answers with
//! LLM-generated replies when a service is configured for it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use lagoon::{
    config::LagoonConfig,
    honeypot::HoneypotBuilder,
    trace::{TraceOutput, Tracer},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lagoon")]
#[command(version)]
#[command(about = "TCP deception service with LLM-backed replies")]
struct Cli {
    /// Configuration file path (TOML, or YAML for .yaml/.yml)
    #[arg(short, long, env = "LAGOON_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured TCP service
    Serve,

    /// Validate the configuration and list services
    Check,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lagoon={}", log_level).into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => LagoonConfig::load(path)?,
        None => LagoonConfig::default(),
    };

    match cli.command {
        Commands::Serve => run_serve(config).await?,
        Commands::Check => run_check(&config),
        Commands::Config { default } => show_config(if default { None } else { Some(&config) })?,
    }

    Ok(())
}

async fn run_serve(config: LagoonConfig) -> Result<()> {
    if config.tcp_services().next().is_none() {
        anyhow::bail!("No TCP services configured");
    }

    let (tracer, _writer) = Tracer::start(TraceOutput::from_config(&config.trace.output)).await?;

    let honeypot = HoneypotBuilder::new()
        .config(config)
        .sink(Arc::new(tracer))
        .build()?;

    let handles = honeypot.start().await?;

    tracing::info!("Lagoon is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal; in-flight connections are abandoned
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    for handle in &handles {
        handle.abort();
    }

    Ok(())
}

fn run_check(config: &LagoonConfig) {
    println!("Configuration OK");
    println!();
    for service in &config.services {
        let status = if !service.is_tcp() {
            "skipped (unsupported protocol)".to_string()
        } else if let Some(plugin) = service.generator() {
            format!("tcp + {} ({})", plugin.llm_provider, plugin.llm_model)
        } else {
            "tcp".to_string()
        };
        println!("  {:<24} {}", service.address, status);
    }
}

fn show_config(config: Option<&LagoonConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
