//! CLI entry point for the tiered analysis pipeline.
//!
//! `tiered-analysis-pipeline [status|tier1|tier2|tier3|all|schedule]`
//!
//! Exit codes: `0` success, `1` partial failure (any job failed validation
//! or persistence), `2` usage error (bad arguments, configuration failure).
//!
//! This binary wires the library's components together with an in-process
//! [`InMemoryStateStore`] and a JSONL-backed [`FileEventSink`]; it is the
//! thin, rewriteable operator surface spec'd in §6, not the analysis core.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tiered_analysis_pipeline::{
    active_tier, new_tier1_analyzer, new_tier2_analyzer, new_tier3_analyzer, AggregateRunStats,
    CancellationToken, DetectionSink, EventSink, FileEventSink, InMemoryStateStore, LlmClient,
    ModelCatalog, NoopDetectionSink, PipelineConfig, PromptRegistry, Scheduler, StateStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tiered-analysis-pipeline", about = "Sequential three-tier LLM analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print pending-job counts per tier and the currently active window.
    Status,
    /// Run tier 1 to exhaustion of its pending queue.
    Tier1,
    /// Run tier 2 to exhaustion of its pending queue.
    Tier2,
    /// Run tier 3 to exhaustion of its pending queue.
    Tier3,
    /// Run tier 1 through tier 3 in order, each to exhaustion.
    All,
    /// Run forever, waking on the configured poll interval to drive whichever
    /// tier's time window is currently open.
    Schedule,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

fn build_scheduler(config: &PipelineConfig) -> anyhow::Result<Scheduler> {
    std::fs::create_dir_all(&config.storage_dir)?;

    let catalog = ModelCatalog::default_gemini_catalog();
    let client = Arc::new(LlmClient::new(
        config.gemini.clone(),
        catalog.clone(),
        &config.storage_dir,
        config.daily_token_limit,
        config.fallback_model_id.clone(),
    )?);

    let registry = Arc::new(PromptRegistry::new());
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());

    let incidents: Arc<dyn EventSink> = Arc::new(FileEventSink::new(
        &config.storage_dir,
        "security_incidents.jsonl",
        Box::new(NoopDetectionSink) as Box<dyn DetectionSink>,
    ));

    let tier1 = new_tier1_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
    let tier2 = new_tier2_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
    let tier3 = new_tier3_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());

    Ok(Scheduler::new(
        tier1,
        tier2,
        tier3,
        client,
        catalog,
        config.time_windows,
        config.scheduler_poll_interval,
        config.daily_token_limit,
    ))
}

fn report(tier_name: &str, stats: &AggregateRunStats) {
    println!(
        "{tier_name}: total={} successful={} failed={} batches={} cancelled={}",
        stats.total_jobs, stats.successful, stats.failed, stats.batches_run, stats.cancelled
    );
}

fn exit_for(stats: &[&AggregateRunStats]) -> ExitCode {
    if stats.iter().any(|s| s.failed > 0 || s.cancelled) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let scheduler = match build_scheduler(&config) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            eprintln!("failed to start pipeline: {err}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();

    match cli.command {
        Command::Status => {
            let now = chrono::Local::now().time();
            match active_tier(now, scheduler.windows()) {
                Some(tier) => println!("active_tier: {:?}", tier),
                None => println!("active_tier: none"),
            }
            ExitCode::SUCCESS
        }
        Command::Tier1 => match scheduler.run_tier_batch(tiered_analysis_pipeline::Tier::Tier1, 500, &cancel).await {
            Ok(stats) => {
                report("tier1", &stats);
                exit_for(&[&stats])
            }
            Err(err) => {
                eprintln!("tier1 run failed: {err}");
                ExitCode::from(1)
            }
        },
        Command::Tier2 => match scheduler.run_tier_batch(tiered_analysis_pipeline::Tier::Tier2, 500, &cancel).await {
            Ok(stats) => {
                report("tier2", &stats);
                exit_for(&[&stats])
            }
            Err(err) => {
                eprintln!("tier2 run failed: {err}");
                ExitCode::from(1)
            }
        },
        Command::Tier3 => match scheduler.run_tier_batch(tiered_analysis_pipeline::Tier::Tier3, 500, &cancel).await {
            Ok(stats) => {
                report("tier3", &stats);
                exit_for(&[&stats])
            }
            Err(err) => {
                eprintln!("tier3 run failed: {err}");
                ExitCode::from(1)
            }
        },
        Command::All => match scheduler.run_full_sequential_batch(&cancel).await {
            Ok([t1, t2, t3]) => {
                report("tier1", &t1);
                report("tier2", &t2);
                report("tier3", &t3);
                exit_for(&[&t1, &t2, &t3])
            }
            Err(err) => {
                eprintln!("sequential batch failed: {err}");
                ExitCode::from(1)
            }
        },
        Command::Schedule => {
            scheduler.run_continuous_scheduler(&cancel).await;
            ExitCode::SUCCESS
        }
    }
}
