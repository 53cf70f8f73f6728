use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carik_kernel::application::errors::BotError;
use carik_kernel::application::messaging::ConsoleParser;
use carik_kernel::domain::traits::{CommandTransport, Store};
use carik_kernel::infrastructure::adapters::{run_console, ConsoleTransport};
use carik_kernel::infrastructure::config::Config;
use carik_kernel::infrastructure::database::Database;
use carik_kernel::infrastructure::plugins::PluginCatalog;
use carik_kernel::plugins::{register_builtins, resolve_load_order, Kernel};

#[derive(Parser)]
#[command(name = "carik-kernel")]
#[command(about = "Plugin runtime for carik-bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the kernel and serve interactions from the console
    Run,
    /// List discovered plugins and their load order
    Plugins,
    /// Show version
    Version,
    /// Write a default config file
    InitConfig {
        /// Where to write it
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let result = match cli.command {
        Commands::Run => with_runtime(run_kernel(&cli.config)),
        Commands::Plugins => with_runtime(list_plugins(&cli.config)),
        Commands::Version => {
            println!("carik-kernel v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig { output } => init_config(&output),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn with_runtime<F>(fut: F) -> Result<(), BotError>
where
    F: std::future::Future<Output = Result<(), BotError>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))?;
    rt.block_on(fut)
}

fn load_config(path: &Path) -> Config {
    let mut config = if path.exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        tracing::info!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env();
    config
}

fn catalog() -> Result<Arc<PluginCatalog>, BotError> {
    let catalog = PluginCatalog::new();
    register_builtins(&catalog)?;
    Ok(Arc::new(catalog))
}

fn open_store(config: &Config) -> Option<Arc<dyn Store>> {
    match Database::new(&config.database.path) {
        Ok(db) => {
            tracing::info!("Database opened: {}", config.database.path.display());
            Some(Arc::new(db))
        }
        Err(e) => {
            tracing::warn!("Database unavailable, plugin state will not persist: {}", e);
            None
        }
    }
}

async fn run_kernel(config_path: &Path) -> Result<(), BotError> {
    let config = load_config(config_path);
    tracing::info!("Starting {}", config.bot.name);

    let store = open_store(&config);
    let mut kernel = Kernel::new(config, catalog()?, store)?;

    let transport = Arc::new(ConsoleTransport::new());
    let report = kernel
        .boot(Arc::clone(&transport) as Arc<dyn CommandTransport>)
        .await?;
    if report.is_total_failure() {
        tracing::error!("No plugin loaded; serving core commands only");
    }

    let parser = ConsoleParser::new("console", "console");
    let served = tokio::select! {
        result = run_console(Arc::clone(kernel.router()), transport, parser) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    kernel.shutdown().await;
    served
}

async fn list_plugins(config_path: &Path) -> Result<(), BotError> {
    let config = load_config(config_path);
    let kernel = Kernel::new(config, catalog()?, None)?;
    let descriptors = kernel.loader().refresh_descriptors();
    if descriptors.is_empty() {
        println!("No plugins found");
        return Ok(());
    }

    println!("Plugins:");
    for d in &descriptors {
        let source = d
            .source_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string());
        println!("  {} v{} ({})", d.name, d.version, source);
        if !d.dependencies.is_empty() {
            println!("    requires: {}", d.dependencies.join(", "));
        }
        if !d.optional_dependencies.is_empty() {
            println!("    optional: {}", d.optional_dependencies.join(", "));
        }
    }

    let plan = resolve_load_order(&descriptors);
    println!("\nLoad order: {}", plan.order.join(" -> "));
    for cycle in &plan.cycles {
        println!("Cycle: {}", cycle.join(" -> "));
    }
    for (name, dependency) in &plan.blocked {
        println!("Blocked: {} (waits on {})", name, dependency);
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<(), BotError> {
    Config::default().save(output)?;
    println!("Wrote default config to {}", output.display());
    Ok(())
}
