//! hubspoke - Entry Point
//!
//! Inspects deployment state kept by the orchestration engine: instance
//! phases, resumable steps, checkpoints and service ordering.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use colored::Colorize;
use tracing::error;

use hubspoke_engine::deploy::checkpoint::CheckpointStore;
use hubspoke_engine::deploy::deps::{DependencyResolver, ALL_SERVICES};
use hubspoke_engine::deploy::fsm::Phase;
use hubspoke_engine::deploy::state::StateMachine;
use hubspoke_engine::errors::EngineError;
use hubspoke_engine::logs::{init_logging, LogOptions};
use hubspoke_engine::storage::layout::StorageLayout;
use hubspoke_engine::storage::settings::Settings;
use hubspoke_engine::utils::version_info;

const USAGE: &str = "\
Usage:
  hubspoke --version
  hubspoke --status --instance=<code>
  hubspoke --order [--service=<name>|all]
  hubspoke --rollback-target --instance=<code>";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    let layout = StorageLayout::default();
    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = if cli_args.contains_key("status") {
        match cli_args.get("instance") {
            Some(instance) => print_status(&layout, instance).await,
            None => Err(missing("instance")),
        }
    } else if cli_args.contains_key("rollback-target") {
        match cli_args.get("instance") {
            Some(instance) => print_rollback_target(&layout, instance).await,
            None => Err(missing("instance")),
        }
    } else if cli_args.contains_key("order") {
        let service = cli_args
            .get("service")
            .map(String::as_str)
            .unwrap_or(ALL_SERVICES);
        print_order(service)
    } else {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn missing(flag: &str) -> EngineError {
    EngineError::ConfigError(format!("--{} is required", flag))
}

fn paint_phase(phase: Phase) -> colored::ColoredString {
    match phase {
        Phase::Complete => phase.as_str().green().bold(),
        Phase::Failed => phase.as_str().red().bold(),
        Phase::Unknown => phase.as_str().dimmed(),
        _ => phase.as_str().yellow(),
    }
}

async fn print_status(layout: &StorageLayout, instance: &str) -> Result<(), EngineError> {
    let states = StateMachine::new(layout.clone());
    let checkpoints = CheckpointStore::new(layout.clone());

    println!("{} {}", "Instance:".bold(), instance.to_uppercase());

    match states.snapshot(instance).await {
        Ok(Some(record)) => {
            let resumable = if record.phase.is_terminal() { "no" } else { "yes" };
            println!("  phase:     {} (resumable: {})", paint_phase(record.phase), resumable);
            println!("  updated:   {}", record.updated_at.to_rfc3339());
            println!("  integrity: {}", "ok".green());
            println!("  steps:     {}", record.completed_steps.len());
            for step in &record.completed_steps {
                println!("    - {}", step);
            }
        }
        Ok(None) => println!("  phase:     {}", paint_phase(Phase::Unknown)),
        Err(EngineError::CorruptState(reason)) => {
            println!("  integrity: {} ({})", "corrupt".red(), reason);
            println!("  restart the instance clean; its state cannot be resumed");
        }
        Err(e) => return Err(e),
    }

    let list = checkpoints.list(instance).await?;
    println!("  checkpoints: {}", list.len());
    for checkpoint in list {
        println!(
            "    - {} [{}] {}",
            checkpoint.id,
            checkpoint.level.to_string().cyan(),
            checkpoint.description
        );
    }

    Ok(())
}

async fn print_rollback_target(layout: &StorageLayout, instance: &str) -> Result<(), EngineError> {
    let checkpoints = CheckpointStore::new(layout.clone());
    let id = checkpoints.find_latest(instance).await?;
    let checkpoint = checkpoints.load(instance, &id).await?;
    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    Ok(())
}

fn print_order(service: &str) -> Result<(), EngineError> {
    let resolver = DependencyResolver::new()?;
    for (i, name) in resolver.resolve(service)?.iter().enumerate() {
        let class = resolver.class_of(name)?;
        println!("{:>3}. {} ({})", i + 1, name.bold(), class);
    }
    Ok(())
}
