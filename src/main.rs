//! Redfire IVR command line

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use redfire_ivr::{
    config::IvrConfig,
    core::{CallbackRegistry, IvrEvent},
    interfaces::{CallControl, ChannelIo},
    services::IvrService,
    testing::{ChannelOp, RecordingCallControl, ScriptedChannel},
    utils::setup_logging,
    Result,
};

#[derive(Parser)]
#[command(name = "redfire-ivr")]
#[command(about = "DTMF menu engine")]
#[command(version = redfire_ivr::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "REDFIRE_IVR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one call against the configured menus
    Run {
        /// Menu to start in (defaults to the configured main menu)
        #[arg(short, long)]
        entry: Option<String>,
        /// Digits the caller presses, in order
        #[arg(short, long, default_value = "")]
        digits: String,
    },
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        return generate_default_config(output.clone());
    }

    let mut config = load_configuration(&cli)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    let _log_guard = setup_logging(&config.logging)?;

    info!("Starting {} v{}", redfire_ivr::NAME, redfire_ivr::VERSION);

    match &cli.command {
        Commands::Run { entry, digits } => run_simulation(config, entry.as_deref(), digits).await,
        Commands::ValidateConfig => validate_configuration(config),
        Commands::GenerateConfig { .. } => Ok(()),
    }
}

fn load_configuration(cli: &Cli) -> Result<IvrConfig> {
    let config = if let Some(config_path) = &cli.config {
        IvrConfig::load_from_file(config_path)?
    } else {
        match IvrConfig::load_from_env() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("No usable environment configuration ({}), using defaults", e);
                IvrConfig::default_config()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

async fn run_simulation(config: IvrConfig, entry: Option<&str>, digits: &str) -> Result<()> {
    let mut service = IvrService::new(config, CallbackRegistry::new())?;
    let mut event_rx = service
        .take_event_receiver()
        .ok_or_else(|| redfire_ivr::Error::internal("Failed to get event receiver"))?;
    service.start().await?;

    let channel = Arc::new(ScriptedChannel::new());
    let control = Arc::new(RecordingCallControl::new());
    let handle = service.start_call(
        Arc::clone(&channel) as Arc<dyn ChannelIo>,
        Arc::clone(&control) as Arc<dyn CallControl>,
        entry,
    )?;
    for digit in digits.chars().filter(|c| !c.is_whitespace()) {
        service.push_digit(handle.call_id(), digit)?;
    }

    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let finished = matches!(event, IvrEvent::CallFinished { .. });
            print_event(&event);
            if finished {
                break;
            }
        }
    });

    let outcome = tokio::select! {
        outcome = handle.join() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping the simulated call");
            service.stop().await?;
            return Ok(());
        }
    };
    let _ = event_task.await;
    service.stop().await?;

    println!();
    for op in channel.ops().into_iter().chain(control.ops()) {
        match op {
            ChannelOp::Played(uri) => println!("  {} {}", "play".cyan(), uri),
            ChannelOp::Spoke { text, .. } => println!("  {} {}", "speak".cyan(), text),
            ChannelOp::Transferred { extension, dialplan, context } => {
                println!("  {} {} {} {}", "transfer".cyan(), extension, dialplan, context)
            }
            ChannelOp::Application { name, args } => println!("  {} {} {}", "exec".cyan(), name, args),
        }
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn print_event(event: &IvrEvent) {
    match event {
        IvrEvent::CallStarted { call_id, entry_menu } => {
            println!("{} Call {} started in {}", "✓".green(), call_id, entry_menu.bold())
        }
        IvrEvent::MenuEntered { menu, depth, .. } => {
            println!("{} {}", "→".blue().to_string().repeat(*depth), menu.bold())
        }
        IvrEvent::ActionDispatched { action, digits, .. } => println!(
            "  {} {}",
            digits.as_deref().unwrap_or("(retries exhausted)").yellow(),
            action
        ),
        IvrEvent::MenuExited { menu, .. } => println!("  {} {}", "←".blue(), menu),
        IvrEvent::CallFinished { duration, .. } => {
            println!("{} Call finished after {:?}", "✓".green(), duration)
        }
        IvrEvent::Error { message, .. } => println!("{} {}", "✗".red(), message),
    }
}

fn validate_configuration(config: IvrConfig) -> Result<()> {
    let menus = config.menus.len();
    let node_id = config.general.node_id.clone();
    let main_menu = config.general.main_menu.clone();
    IvrService::new(config, CallbackRegistry::new())?;

    println!("{} Configuration is valid", "✓".green());
    println!("  Node ID: {}", node_id);
    println!("  Main menu: {}", main_menu);
    println!("  Menus: {}", menus);
    Ok(())
}

fn generate_default_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = IvrConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .map_err(|e| redfire_ivr::Error::internal(format!("Failed to serialize config: {}", e)))?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("{} Default configuration written to: {}", "✓".green(), path.display());
        }
        None => {
            println!("{}", toml_content);
        }
    }

    Ok(())
}
