use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use medmcp_core::{load_config, McpConfig, Orchestrator};
use medmcp_provider::{create_provider, LlmProvider};
use medmcp_schema::{PatientContext, ProviderTag};
use medmcp_server::state::AppState;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "medmcp", version, about = "Clinical AI-assistance session service")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Config root directory (contains config/main.yaml)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, help = "Bind address, overrides server.bind")]
        bind: Option<String>,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "Show AI provider status")]
    Status,
    #[command(about = "Run a consultation for a patient file and print the session")]
    Consult {
        #[arg(long, help = "Patient context file (YAML or JSON)")]
        patient: PathBuf,
        #[arg(long = "symptom", help = "Reported symptom, repeatable")]
        symptoms: Vec<String>,
        #[arg(long, help = "Working diagnosis")]
        diagnosis: Option<String>,
        #[arg(long, help = "Generate a prescription (requires --diagnosis)")]
        prescribe: bool,
        #[arg(long, value_parser = parse_provider, help = "AI provider tag (gemini, claude)")]
        provider: Option<ProviderTag>,
    },
}

fn parse_provider(raw: &str) -> Result<ProviderTag, String> {
    match raw.trim().to_lowercase().as_str() {
        "gemini" => Ok(ProviderTag::Gemini),
        "claude" => Ok(ProviderTag::Claude),
        other => Err(format!("unknown provider: {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "medmcp.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.config_root.join("config"))?;
            println!(
                "Config valid. provider {} ({}), max {} sessions, AI timeout {} ms.",
                config.provider.id,
                config.provider.model,
                config.sessions.max_sessions,
                config.orchestrator.ai_timeout_ms
            );
        }
        Commands::Serve { bind } => {
            let config = load_or_default(&cli.config_root)?;
            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            let orchestrator = Arc::new(Orchestrator::from_config(&config));
            medmcp_server::serve(AppState::new(orchestrator), &addr).await?;
        }
        Commands::Status => {
            let config = load_or_default(&cli.config_root)?;
            print_status(&config).await;
        }
        Commands::Consult {
            patient,
            symptoms,
            diagnosis,
            prescribe,
            provider,
        } => {
            let config = load_or_default(&cli.config_root)?;
            let patient = load_patient(&patient)?;
            run_consultation(&config, patient, symptoms, diagnosis, prescribe, provider).await?;
        }
    }

    Ok(())
}

/// Falls back to built-in defaults (with `GEMINI_API_KEY`) when the config
/// root has no `config/main.yaml`.
fn load_or_default(root: &Path) -> Result<McpConfig> {
    let config_dir = root.join("config");
    if config_dir.join("main.yaml").is_file() {
        return load_config(&config_dir);
    }
    tracing::warn!(
        "no config found under {}, using defaults",
        config_dir.display()
    );
    Ok(McpConfig::from_env())
}

fn load_patient(path: &Path) -> Result<PatientContext> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read patient file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse patient file: {}", path.display()))
}

async fn print_status(config: &McpConfig) {
    println!("provider: {} ({})", config.provider.id, config.provider.model);
    match create_provider(&config.provider) {
        Err(e) => println!("status:   disconnected ({e})"),
        Ok(provider) => match provider.health().await {
            Ok(()) => println!("status:   connected"),
            Err(e) => println!("status:   unreachable ({e})"),
        },
    }
}

async fn run_consultation(
    config: &McpConfig,
    patient: PatientContext,
    symptoms: Vec<String>,
    diagnosis: Option<String>,
    prescribe: bool,
    provider: Option<ProviderTag>,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config);
    let provider = provider.unwrap_or_else(|| orchestrator.default_provider());
    let id = orchestrator.create_session(patient, provider).await?;
    println!("session {id} opened");

    if !symptoms.is_empty() {
        let outcome = orchestrator.add_symptoms(id, symptoms).await?;
        print_step("symptom analysis", outcome.success, outcome.recommendation.confidence);
    }
    if let Some(diagnosis) = diagnosis {
        let outcome = orchestrator.set_diagnosis(id, diagnosis).await?;
        print_step("diagnosis validation", outcome.success, outcome.recommendation.confidence);
    }
    if prescribe {
        let outcome = orchestrator.generate_prescription(id).await?;
        print_step("prescription", outcome.success, outcome.recommendation.confidence);
        for warning in &outcome.recommendation.warnings {
            println!("  ! {warning}");
        }
    }

    let summary = orchestrator.close_session(id).await?;
    println!(
        "session closed after {}s, {} recommendations, confidence {:.2}",
        summary.duration_seconds, summary.recommendation_count, summary.confidence
    );

    if let Some(session) = orchestrator.get_session(id).await {
        println!("{}", serde_json::to_string_pretty(&session)?);
    }
    Ok(())
}

fn print_step(label: &str, success: bool, confidence: f64) {
    let marker = if success { "ok" } else { "degraded" };
    println!("{label}: {marker} (confidence {confidence:.2})");
}
