//! Quarry CLI: run a deep research question from the terminal.
//!
//! Progress goes to stderr, the final report to stdout or `--output`.

mod progress;

use anyhow::Context;
use clap::Parser;
use quarry_core::config::{QuarryConfig, load_config};
use quarry_core::providers::{ModelInfo, create_provider};
use quarry_core::providers::models::{filter_chat_models, find_model};
use quarry_core::research::{ResearchEngine, ResearchOutcome};
use quarry_core::types::CostEstimate;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Quarry: plan, search in parallel, fill gaps, synthesize, fact-check.
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// Question to research
    #[arg(required_unless_present_any = ["list_models", "list_sessions"])]
    question: Option<String>,

    /// Workspace directory (for `.quarry/config.toml` and saved sessions)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Model used for every stage without its own override
    #[arg(short, long)]
    model: Option<String>,

    /// Search rounds per sub-agent
    #[arg(long)]
    rounds: Option<usize>,

    /// Maximum sub-topic recursion depth
    #[arg(long)]
    depth: Option<usize>,

    /// Sub-agents running at once (default: all steps of a batch)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Gap-filling follow-up rounds (0 disables)
    #[arg(long)]
    followup_rounds: Option<usize>,

    /// Skip reading selected pages in full
    #[arg(long)]
    no_expand: bool,

    /// Skip fact checking the report
    #[arg(long)]
    no_verify: bool,

    /// Stream planner reasoning and the report as they are generated
    #[arg(long)]
    stream: bool,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save the full outcome as JSON under the workspace
    #[arg(long)]
    save_session: bool,

    /// List available models with pricing and exit
    #[arg(long)]
    list_models: bool,

    /// List saved sessions and exit
    #[arg(long)]
    list_sessions: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply_overrides(&self, config: &mut QuarryConfig) {
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        let research = &mut config.research;
        if self.rounds.is_some() {
            research.max_search_rounds = self.rounds;
        }
        if self.depth.is_some() {
            research.max_recursion_depth = self.depth;
        }
        if self.concurrency.is_some() {
            research.concurrency = self.concurrency;
        }
        if self.followup_rounds.is_some() {
            research.max_followup_rounds = self.followup_rounds;
        }
        if self.no_expand {
            research.expand_sources = Some(false);
        }
        if self.no_verify {
            research.verify_claims = Some(false);
        }
        if self.stream {
            config.llm.stream_reasoning = true;
            config.llm.use_streaming = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "quarry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if cli.list_sessions {
        list_sessions(&workspace);
        return Ok(());
    }

    let mut config = load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);

    if cli.list_models {
        return list_models(&config).await;
    }

    let question = cli
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .context("A research question is required")?;

    let engine = ResearchEngine::from_config(&config)?;
    let reporter = progress::StderrProgress::new(cli.stream && cli.output.is_none());
    let outcome = engine.run(question, &reporter).await?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, &outcome.report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => {
            // Anything not already streamed, e.g. the fact-check block.
            let rest = outcome
                .report
                .get(reporter.streamed_bytes()..)
                .unwrap_or(&outcome.report);
            print!("{rest}");
            println!();
        }
    }

    if cli.save_session {
        let path = outcome
            .save(&workspace.join(".quarry"))
            .context("Failed to save session")?;
        eprintln!("Session saved to {}", path.display());
    }

    print_summary(&outcome, &config).await;
    Ok(())
}

async fn list_models(config: &QuarryConfig) -> anyhow::Result<()> {
    let provider = create_provider(&config.llm, &config.retry)?;
    let mut models = filter_chat_models(provider.list_models().await?);
    models.sort_by(|a, b| a.id.cmp(&b.id));
    for model in &models {
        println!("{}", format_model_line(model));
    }
    eprintln!("{} models", models.len());
    Ok(())
}

fn format_model_line(model: &ModelInfo) -> String {
    let context = model
        .context_length
        .map(|c| format!("{}k", c / 1000))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{:<48} {:>6}  ${:.2}/M in  ${:.2}/M out",
        model.id,
        context,
        model.pricing.prompt * 1_000_000.0,
        model.pricing.completion * 1_000_000.0
    )
}

fn list_sessions(workspace: &Path) {
    let sessions = ResearchOutcome::list_sessions(&workspace.join(".quarry"));
    if sessions.is_empty() {
        eprintln!("No saved sessions");
        return;
    }
    for s in sessions {
        println!(
            "{}  {}  {} steps, {} sources  {}",
            s.id,
            s.finished_at.format("%Y-%m-%d %H:%M"),
            s.steps,
            s.sources,
            s.question
        );
    }
}

/// Token totals, and a cost estimate when the model's pricing can be looked up.
async fn print_summary(outcome: &ResearchOutcome, config: &QuarryConfig) {
    let failed = outcome.failed_steps();
    eprintln!(
        "\n{} steps ({} failed), {} sources, {} input + {} output tokens, {}s",
        outcome.plan.steps.len(),
        failed,
        outcome.sources.len(),
        outcome.usage.input_tokens,
        outcome.usage.output_tokens,
        (outcome.finished_at - outcome.started_at).num_seconds()
    );

    let Ok(provider) = create_provider(&config.llm, &config.retry) else {
        return;
    };
    match provider.list_models().await {
        Ok(models) => {
            if let Some(model) = find_model(&models, &config.llm.model) {
                let cost = CostEstimate::from_usage(
                    &outcome.usage,
                    model.pricing.prompt,
                    model.pricing.completion,
                );
                eprintln!("Estimated cost: ${:.4}", cost.total());
            }
        }
        Err(e) => tracing::debug!(error = %e, "Could not fetch pricing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_core::providers::ModelPricing;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "quarry",
            "What is io_uring?",
            "--rounds",
            "3",
            "--followup-rounds",
            "0",
            "--no-verify",
            "--stream",
            "-m",
            "openai/gpt-4o",
        ]);
        let mut config = QuarryConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.llm.model, "openai/gpt-4o");
        assert_eq!(config.research.max_search_rounds, Some(3));
        assert_eq!(config.research.max_followup_rounds, Some(0));
        assert_eq!(config.research.verify_claims, Some(false));
        assert!(config.research.expand_sources.is_none());
        assert!(config.llm.use_streaming);
    }

    #[test]
    fn test_question_required_unless_listing() {
        assert!(Cli::try_parse_from(["quarry"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "--list-models"]).is_ok());
    }

    #[test]
    fn test_model_line_pricing_per_million() {
        let model = ModelInfo {
            id: "openai/gpt-4o-mini".into(),
            name: "GPT-4o mini".into(),
            context_length: Some(128_000),
            pricing: ModelPricing {
                prompt: 0.000_000_15,
                completion: 0.000_000_6,
            },
            supported_parameters: None,
        };
        let line = format_model_line(&model);
        assert!(line.contains("128k"));
        assert!(line.contains("$0.15/M in"));
        assert!(line.contains("$0.60/M out"));
    }
}
