use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use reportflow_common::{PipelineConfig, ReportType, format_duration_millis};
use reportflow_core::{AgentState, Message, MessageType, ReportRequest, ReportSystem};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line arguments for the reportflow CLI
#[derive(Parser)]
#[command(
    name = "reportflow",
    about = "Run a research report through the research, analysis, writing and review pipeline"
)]
pub struct Args {
    /// Report type: company, industry or macro
    #[clap(short = 't', long = "type", default_value = "company")]
    report_type: String,

    /// Company ticker, industry or macro topic the report covers
    #[clap(long)]
    target: String,

    /// Period the research covers
    #[clap(long, default_value = "1d")]
    timeframe: String,

    /// Path to the pipeline configuration file
    #[clap(short, long, default_value = "reportflow.toml")]
    config: PathBuf,

    /// Override the number of review rejections tolerated
    #[clap(long)]
    max_retries: Option<u32>,

    /// Seconds to wait for the job outcome
    #[clap(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Enable debug mode
    #[clap(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool, log_level: &str) -> Result<()> {
    if !debug && std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let level = if debug {
            tracing::Level::DEBUG
        } else {
            log_level.parse().unwrap_or(tracing::Level::INFO)
        };
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn print_body(body: &Value) {
    match body {
        Value::String(text) => println!("{}", text),
        Value::Array(items) => {
            for item in items {
                let line = item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string());
                println!("  - {}", line);
            }
        }
        other => println!("{}", other),
    }
}

fn print_report(content: &Value) {
    let report = &content["report"];

    println!();
    println!(
        "{} {}",
        "📄".bright_cyan(),
        report["title"].as_str().unwrap_or("Report").bright_green().bold()
    );

    match report["sections"].as_array() {
        Some(sections) => {
            for section in sections {
                println!();
                println!(
                    "{}",
                    section["heading"].as_str().unwrap_or_default().bright_yellow().bold()
                );
                print_body(&section["body"]);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(report).unwrap_or_default()),
    }

    println!();
    println!(
        "{} {}",
        "Feedback retries:".bright_yellow(),
        content["feedback_retries"]
    );
}

fn print_failure(content: &Value) {
    let status = content["status"].as_str().unwrap_or("ERROR");

    println!();
    println!("{}", format!("❌ Job {}", status).red().bold());
    if let Some(stage) = content["stage"].as_str() {
        println!("{} {}", "Stage:".bright_yellow(), stage);
    }
    if let Some(condition) = content["condition"].as_str() {
        println!("{} {}", "Condition:".bright_yellow(), condition);
    }
    if !content["retries"].is_null() {
        println!("{} {}", "Retries:".bright_yellow(), content["retries"]);
    }
    let reason = content["reason"]
        .as_str()
        .or_else(|| content["error"].as_str())
        .unwrap_or("unknown failure");
    println!("{} {}", "Reason:".bright_yellow(), reason.red());
}

fn is_done(message: &Message) -> bool {
    message.message_type() == MessageType::Response && message.content()["status"] == "DONE"
}

fn print_monitor(system: &ReportSystem) {
    println!();
    println!("{}", "🔎 Agent states".bright_cyan().bold());
    for (agent, status) in system.monitor().snapshot() {
        let state = match status.state {
            AgentState::Completed => status.state.as_str().green(),
            AgentState::Error => status.state.as_str().red(),
            AgentState::Running => status.state.as_str().bright_blue(),
            AgentState::Waiting => status.state.as_str().yellow(),
            AgentState::Idle => status.state.as_str().white(),
        };
        println!(
            "  {:<14} {:<10} {}",
            agent.bright_white(),
            state,
            status.updated_at.format("%H:%M:%S%.3f").to_string().dimmed()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.config)?;
    init_tracing(args.debug, &config.base.log_level)?;

    if let Some(max_retries) = args.max_retries {
        config.retry.max_feedback_retries = max_retries;
    }

    let report_type: ReportType = args
        .report_type
        .parse()
        .with_context(|| format!("Invalid report type: {}", args.report_type))?;
    let request = ReportRequest::new(report_type, args.target.trim()).with_timeframe(args.timeframe.trim());

    let system = ReportSystem::builder(config)
        .with_builtin_stages()
        .launch()
        .await
        .context("Failed to start report pipeline")?;

    println!(
        "{} {} report on {} ({})",
        "🚀 Generating".bright_cyan().bold(),
        request.report_type.to_string().bright_green(),
        request.target.bright_green().bold(),
        request.timeframe
    );

    let started = Instant::now();
    let job_id = system.submit(&request).await?;
    let outcome = system
        .wait_for(&job_id, Duration::from_secs(args.timeout_secs))
        .await;

    let succeeded = match outcome {
        Ok(message) if is_done(&message) => {
            info!("Job {} finished", job_id);
            print_report(&message.into_content());
            true
        }
        Ok(message) => {
            print_failure(&message.into_content());
            false
        }
        Err(e) => {
            error!("Job {} did not finish: {}", job_id, e);
            println!("{}", format!("❌ Job {} did not finish: {}", job_id, e).red());
            false
        }
    };

    println!(
        "{} {}",
        "Elapsed:".bright_yellow(),
        format_duration_millis(started.elapsed().as_millis())
    );
    print_monitor(&system);
    system.shutdown().await;

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
