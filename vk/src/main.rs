//! vk - rate-limited VK API client
//!
//! CLI entry point for single calls, paginated fetches and call files.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info};

use vkapi::cli::{
    CallArgs, Cli, Command, OutputFormat, config_path_from_args, generate_after_help, get_log_path, parse_call_file,
};
use vkapi::config::Config;
use vkapi::{ApiError, EnqueueOptions, FetchOptions, HttpTransport, Scheduler};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Build command with dynamic after_help that shows credential status
    let early = Config::peek(config_path_from_args(std::env::args()).as_ref()).unwrap_or_default();
    let cmd = Cli::command().after_help(generate_after_help(&early.api));

    // Parse CLI arguments using the modified command
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(
        base_url = %config.api.base_url,
        version = %config.api.version,
        threads = config.scheduler.threads,
        "vk loaded config"
    );

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Call { args }) => cmd_call(&config, &args).await,
        Some(Command::Fetch {
            args,
            limit,
            parallel,
            strict,
        }) => cmd_fetch(&config, &args, limit, parallel, strict).await,
        Some(Command::Run { file, format }) => cmd_run(&config, &file, format).await,
        Some(Command::Config) => cmd_config(&config),
        None => print_help_with_status(&config),
    }
}

/// Print help with credential status
fn print_help_with_status(config: &Config) -> Result<()> {
    let mut cmd = Cli::command();
    cmd.print_help()?;
    println!();
    println!();
    print!("{}", generate_after_help(&config.api));
    Ok(())
}

/// Validate the config and start a scheduler over HTTP
fn start_scheduler(config: &Config) -> Result<Scheduler> {
    config.validate()?;
    let transport = HttpTransport::from_config(&config.api).context("Failed to create HTTP client")?;
    Ok(Scheduler::new(
        config.scheduler.clone(),
        config.credentials(),
        Arc::new(transport),
    ))
}

/// Make a single call and print its result
async fn cmd_call(config: &Config, args: &CallArgs) -> Result<()> {
    debug!(method = %args.method, "cmd_call: called");
    let params = args.parse_params().map_err(|e| eyre::eyre!(e))?;
    let scheduler = start_scheduler(config)?;

    let options = EnqueueOptions {
        priority: args.priority,
        force_private: args.private,
    };
    let result = scheduler.enqueue(&args.method, params, options).await;
    scheduler.shutdown().await;

    let value = result.with_context(|| format!("{} failed", args.method))?;
    println!("{}", args.format.render(&value)?);
    Ok(())
}

/// Load every page of a list method and print the items
async fn cmd_fetch(
    config: &Config,
    args: &CallArgs,
    limit: Option<usize>,
    parallel: bool,
    strict: bool,
) -> Result<()> {
    debug!(method = %args.method, ?limit, parallel, strict, "cmd_fetch: called");
    let params = args.parse_params().map_err(|e| eyre::eyre!(e))?;
    let scheduler = start_scheduler(config)?;

    let options = FetchOptions {
        priority: args.priority,
        limit,
        silent: !strict,
        parallel,
        force_private: args.private,
    };
    let result = scheduler.fetch(&args.method, params, options).await;
    let stats = scheduler.stats();
    scheduler.shutdown().await;

    let items = result.with_context(|| format!("fetching {} failed", args.method))?;
    info!(items = items.len(), requests = stats.service.completed + stats.private.completed, "cmd_fetch: done");
    println!("{}", args.format.render(&Value::Array(items))?);
    Ok(())
}

/// Run every call in `file` concurrently and print one entry per call
async fn cmd_run(config: &Config, file: &Path, format: OutputFormat) -> Result<()> {
    debug!(?file, "cmd_run: called");
    let content = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let calls = parse_call_file(&content).map_err(|e| eyre::eyre!("{}: {}", file.display(), e))?;
    info!(calls = calls.len(), "cmd_run: parsed call file");

    let scheduler = start_scheduler(config)?;
    let results = join_all(calls.iter().map(|call| {
        scheduler.enqueue(&call.method, call.params.clone(), EnqueueOptions::default())
    }))
    .await;

    let stats = scheduler.stats();
    info!(?stats, "cmd_run: final stats");
    scheduler.shutdown().await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    let entries: Vec<Value> = calls
        .iter()
        .zip(results)
        .map(|(call, result)| match result {
            Ok(value) => json!({ "method": call.method, "result": value }),
            Err(e) => json!({ "method": call.method, "error": error_json(&e) }),
        })
        .collect();

    println!("{}", format.render(&Value::Array(entries))?);
    if failed > 0 {
        eprintln!("{} {} of {} calls failed", "Error:".red(), failed, calls.len());
    } else {
        eprintln!(
            "{} {} calls, {} batches, {} escalations",
            "Done:".green(),
            calls.len(),
            stats.batches_dispatched,
            stats.escalations
        );
    }
    Ok(())
}

fn error_json(error: &ApiError) -> Value {
    match error.code() {
        Some(code) => json!({ "code": code, "message": error.to_string() }),
        None => json!({ "message": error.to_string() }),
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    println!("# log file: {}", get_log_path().display());
    Ok(())
}
