use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use stageloop::audit::{AuditSink, JsonlAuditSink, NullAuditSink};
use stageloop::catalog::CriteriaCatalog;
use stageloop::runner::{CancelToken, CommandExecutor, LoopController, LoopRun, RunOptions};
use stageloop::validation::{Severity, StageValidationReport, ValidationContext, ValidationDispatcher};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stageloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("stageloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    // RUST_LOG wins over the config file
    if std::env::var_os("RUST_LOG").is_none() {
        if let Some(level) = &config.log_level {
            builder.parse_filters(level);
        }
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Catalog { path } => handle_catalog_command(path.as_ref(), config),
        Commands::Validate {
            catalog,
            stage,
            output,
            iteration,
            max_iterations,
            facts,
        } => handle_validate_command(
            catalog.as_ref(),
            stage,
            output,
            *iteration,
            *max_iterations,
            facts,
            config,
        ),
        Commands::Run {
            catalog,
            stage,
            exec,
            input,
            max_iterations,
            facts,
        } => {
            handle_run_command(
                catalog.as_ref(),
                stage,
                exec,
                input.as_ref(),
                *max_iterations,
                facts,
                cli.is_verbose(),
                config,
            )
            .await
        }
    }
}

fn load_catalog(path: Option<&PathBuf>, config: &Config) -> Result<CriteriaCatalog> {
    let path = path
        .or(config.catalog.path.as_ref())
        .ok_or_else(|| eyre::eyre!("No catalog given and catalog.path is not configured"))?;
    CriteriaCatalog::load(path).context(format!("Failed to load catalog from {}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context(format!("Failed to parse {} as JSON", path.display()))
}

/// Parse `key=value` facts; values that are not valid JSON are kept as strings.
fn parse_facts(facts: &[String]) -> Result<Map<String, Value>> {
    let mut parsed = Map::new();
    for fact in facts {
        let (key, raw) = fact
            .split_once('=')
            .ok_or_else(|| eyre::eyre!("Fact '{}' must look like key=value", fact))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

fn handle_catalog_command(path: Option<&PathBuf>, config: &Config) -> Result<()> {
    let catalog = load_catalog(path, config)?;
    println!(
        "{} {} stage(s), default max iterations {}",
        "Catalog:".green(),
        catalog.len(),
        catalog.default_max_iterations()
    );
    for stage in catalog.stages() {
        let critical = stage.gates.iter().filter(|g| g.critical).count();
        println!(
            "  {} - {} required output(s), {} gate(s) ({} critical)",
            stage.name.cyan(),
            stage.required_outputs.len(),
            stage.gates.len(),
            critical
        );
        if !stage.evaluators.is_empty() {
            println!("      deferred evaluators: {}", stage.evaluators.join(", "));
        }
    }
    Ok(())
}

fn handle_validate_command(
    catalog: Option<&PathBuf>,
    stage: &str,
    output: &Path,
    iteration: u32,
    max_iterations: Option<u32>,
    facts: &[String],
    config: &Config,
) -> Result<()> {
    let catalog = Arc::new(load_catalog(catalog, config)?);
    let output = read_json(output)?;
    let max_iterations = max_iterations
        .or(config.loop_.max_iterations)
        .unwrap_or_else(|| catalog.default_max_iterations());
    let ctx = ValidationContext::new(iteration, max_iterations).with_facts(parse_facts(facts)?);

    let dispatcher = ValidationDispatcher::new(catalog);
    let report = dispatcher.validate(stage, &output, &ctx)?;
    print_report(&report);

    if !report.passed() {
        eyre::bail!("{} critical check(s) failed", report.critical_failures().len());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_run_command(
    catalog: Option<&PathBuf>,
    stage: &str,
    exec: &str,
    input: Option<&PathBuf>,
    max_iterations: Option<u32>,
    facts: &[String],
    verbose: bool,
    config: &Config,
) -> Result<()> {
    let catalog = load_catalog(catalog, config)?;
    let input = match input {
        Some(path) => read_json(path)?,
        None => Value::Object(Map::new()),
    };

    let sink: Arc<dyn AuditSink> = if config.audit.enabled {
        Arc::new(JsonlAuditSink::new(&config.audit.jsonl_path).context("Failed to open audit log")?)
    } else {
        Arc::new(NullAuditSink)
    };
    let controller = LoopController::with_config(&catalog, stage, config.controller_config())?.with_sink(sink);

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut options = RunOptions::new().cancel(cancel);
    options.max_iterations = max_iterations;
    options.facts = parse_facts(facts)?;

    println!("{} {} via '{}'", "Running:".green(), stage.cyan(), exec);
    let executor = CommandExecutor::simple(exec);
    let run = controller.run_with_options(&executor, input, options).await;
    print_run(&run, verbose)?;

    if !run.success {
        eyre::bail!(
            "Stage '{}' ended with {}: {}",
            stage,
            run.state.status(),
            run.state.error_message().unwrap_or("no output passed validation")
        );
    }
    Ok(())
}

fn print_report(report: &StageValidationReport) {
    println!(
        "{} stage {} iteration {}",
        "Report:".green(),
        report.stage_name().cyan(),
        report.iteration()
    );
    for result in report.results() {
        let mark = if result.passed {
            "PASS".green()
        } else {
            match result.severity {
                Severity::Critical => "FAIL".red(),
                Severity::Warning => "WARN".yellow(),
                Severity::Info => "INFO".blue(),
            }
        };
        println!("  [{}] {} ({}): {}", mark, result.check_name, result.severity, result.message);
    }
    println!(
        "  {} passed, {} failed, {} critical",
        report.passed_count(),
        report.failed_count(),
        report.critical_failures().len()
    );
}

fn print_run(run: &LoopRun, verbose: bool) -> Result<()> {
    if verbose {
        for report in run.state.validation_history() {
            print_report(report);
        }
    }
    let status = run.state.status().to_string();
    let status = if run.success { status.green() } else { status.red() };
    println!(
        "{} {} after {} iteration(s) in {:.2}s (loop {})",
        "Outcome:".green(),
        status,
        run.state.current_iteration(),
        run.state.duration_seconds(),
        run.state.loop_id()
    );
    if !run.state.pending_evaluators().is_empty() {
        println!("  deferred evaluators: {}", run.state.pending_evaluators().join(", "));
    }
    if let Some(output) = &run.final_output {
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging before anything runs
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_facts() {
        let facts = parse_facts(&[
            "saved=true".to_string(),
            "count=3".to_string(),
            "owner=alice".to_string(),
        ])
        .unwrap();
        assert_eq!(facts["saved"], json!(true));
        assert_eq!(facts["count"], json!(3));
        assert_eq!(facts["owner"], json!("alice"));
    }

    #[test]
    fn test_parse_facts_rejects_missing_equals() {
        assert!(parse_facts(&["saved".to_string()]).is_err());
    }

    #[test]
    fn test_load_catalog_requires_path() {
        assert!(load_catalog(None, &Config::default()).is_err());
    }
}
