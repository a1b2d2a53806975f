use clap::{Parser, Subcommand};
use std::path::PathBuf;

use manet_config::{ConfigLoader, GridBounds, ManetConfig};
use manet_core::{ManetError, Result};
use manet_mesh::{FileRegistry, Registry};

mod router;
mod simulate;

/// manet: an ad-hoc wireless network simulator
#[derive(Parser)]
#[command(name = "manet", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to manet.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a router and its devices over TCP; Ctrl-C stops them
    Router {
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Run routers and devices in-process until the network goes quiet
    Simulate {
        /// Number of routers to create
        #[arg(short, long, default_value = "1")]
        routers: usize,

        #[command(flatten)]
        layout: LayoutArgs,

        /// Give up after this many deliveries
        #[arg(long, default_value = "1000000")]
        max_deliveries: usize,
    },
    /// List the routers in the shared registry
    Routers,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Per-router device layout overrides.
#[derive(clap::Args, Debug, Default)]
struct LayoutArgs {
    /// Number of devices per router
    #[arg(short, long)]
    devices: Option<u32>,

    /// Broadcast radius shared by every device
    #[arg(long)]
    radius: Option<u32>,

    /// Placement grid as min_x,max_x,min_y,max_y
    #[arg(short, long)]
    grid: Option<GridBounds>,
}

impl LayoutArgs {
    fn apply(&self, config: &mut ManetConfig) {
        if let Some(count) = self.devices {
            config.devices.count = count;
        }
        if let Some(radius) = self.radius {
            config.devices.radius = radius;
        }
        if let Some(grid) = self.grid {
            config.devices.grid = grid;
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        match &self.command {
            Commands::Router { layout } | Commands::Simulate { layout, .. } => {
                config_loader.update(|c| layout.apply(c))?;
            }
            Commands::Routers | Commands::Config { .. } => {}
        }
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Router { .. } => router::cmd_router(config).await,
            Commands::Simulate {
                routers,
                max_deliveries,
                ..
            } => simulate::cmd_simulate(config, routers, max_deliveries),
            Commands::Routers => Self::cmd_routers(config),
            Commands::Config { json } => Self::cmd_config(config, json),
        }
    }

    fn cmd_routers(config: ManetConfig) -> Result<()> {
        let registry = FileRegistry::new(&config.registry.path);
        let rows = registry.list()?;
        if rows.is_empty() {
            println!("No routers registered in {}", registry.path().display());
            return Ok(());
        }
        println!("Routers in {}:\n", registry.path().display());
        for row in rows {
            println!("   {:<6} {}", row.id, row.endpoint);
        }
        Ok(())
    }

    fn cmd_config(config: ManetConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| ManetError::Config(e.to_string()))?
            );
        }
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}
