use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use colored::Colorize;
use rubricwerk::{
    load_scenarios, plugins::register_weather_tools, CancellationToken, ChainedCredentialProvider,
    EnvCredential, EvalConfig, EvaluationHarness, Report, ReportFormatter, RubricKind,
    StaticCredential, ToolRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rubric-eval")]
#[command(about = "Score agent transcripts against judge rubrics")]
struct Args {
    /// Path to a scenario file or directory (YAML/JSON)
    #[arg(short, long, default_value = "scenarios")]
    scenarios: PathBuf,

    /// Settings file; without it AZURE_AI_* environment variables are used
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rubric to run (repeatable); all rubrics when omitted
    #[arg(long = "rubric")]
    rubrics: Vec<RubricKind>,

    /// Output path for JSONL results, one report entry per line
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print the summary as JSON instead of the text report
    #[arg(long)]
    json: bool,

    /// Environment variable holding a bearer token, tried before the access key
    #[arg(long, default_value = "AZURE_AI_TOKEN")]
    token_env: String,
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_jsonl(path: &Path, report: &Report) -> Result<(), Box<dyn std::error::Error>> {
    ensure_parent_dir(path)?;
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for entry in &report.entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn colorize(line: &str) -> String {
    if line.starts_with("[PASS]") {
        line.green().to_string()
    } else if line.starts_with("[FAIL]") {
        line.red().to_string()
    } else if line.starts_with("[ERROR]") {
        line.yellow().to_string()
    } else if line.starts_with("[CANCELLED]") {
        line.dimmed().to_string()
    } else {
        line.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rubricwerk=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EvalConfig::from_path(path)?,
        None => EvalConfig::from_env()?,
    };

    let scenarios = load_scenarios(&args.scenarios)?;
    if scenarios.is_empty() {
        eprintln!("No scenarios found in {}.", args.scenarios.display());
        std::process::exit(2);
    }

    let mut registry = ToolRegistry::new();
    register_weather_tools(&mut registry)?;

    let credentials = ChainedCredentialProvider::new()
        .with_provider(Arc::new(EnvCredential::new(args.token_env.clone())))
        .with_provider(Arc::new(StaticCredential::api_key(config.access_key.clone())));

    let harness = EvaluationHarness::azure(config, &credentials, Arc::new(registry))?;

    let mut rubrics = harness.standard_rubrics()?;
    if !args.rubrics.is_empty() {
        rubrics.retain(|rubric| args.rubrics.contains(&rubric.kind()));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, collecting finished verdicts...");
            on_interrupt.cancel();
        }
    });

    let report = harness
        .run_with_cancellation(&scenarios, &rubrics, cancel)
        .await;

    if args.json {
        let summary = ReportFormatter::summarize(&report);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in ReportFormatter::render(&report).lines() {
            println!("{}", colorize(line));
        }
    }

    if let Some(path) = &args.out {
        write_jsonl(path, &report)?;
        println!("Results written to {}", path.display());
    }

    if report.all_passed() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
