//! FSQSB CLI - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fsqsb_cli::commands::{self, action, config, dashboard, status, CliContext};
use fsqsb_cli::config::{ControlConfig, ServiceStatusMode};
use fsqsb_cli::output::{self, print_error};
use fsqsb_common::ActionKind;

/// FSQSB - remote game server control
#[derive(Parser)]
#[command(name = "fsqsb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value_os_t = fsqsb_common::default_config_path())]
    config: PathBuf,

    /// Control API base URL (overrides the configuration file)
    #[arg(long, env = "FSQSB_API_URL", global = true)]
    api_url: Option<String>,

    /// Account name
    #[arg(short, long, env = "FSQSB_USERNAME", global = true)]
    username: Option<String>,

    /// Account password
    #[arg(short, long, env = "FSQSB_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// How service status is obtained
    #[arg(long, global = true)]
    service_status_mode: Option<ServiceStatusMode>,

    /// Use an in-memory backend instead of the control API
    #[arg(long, global = true)]
    simulate: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show instance and service status
    Status,

    /// Print the public IP address of the instance
    Ip,

    /// Boot the instance
    StartInstance(action::ActionArgs),

    /// Shut the instance down
    StopInstance(action::ActionArgs),

    /// Start the game service
    StartService(action::ActionArgs),

    /// Stop the game service
    StopService(action::ActionArgs),

    /// Interactive status view
    Dashboard,

    /// Invoke a signed endpoint and print the response envelope
    Call {
        /// Endpoint path, e.g. `instance_status`
        endpoint: String,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

fn load_config(cli: &Cli) -> anyhow::Result<ControlConfig> {
    let mut config = ControlConfig::load(&cli.config)?;
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(mode) = cli.service_status_mode {
        config.service_status_mode = mode;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    let ctx = CliContext {
        config,
        format: cli.format,
        username: cli.username,
        password: cli.password,
        simulate: cli.simulate,
    };

    match cli.command {
        Commands::Status => status::execute(&ctx).await?,
        Commands::Ip => status::execute_ip(&ctx).await?,
        Commands::StartInstance(args) => action::execute(&ctx, ActionKind::StartInstance, args).await?,
        Commands::StopInstance(args) => action::execute(&ctx, ActionKind::StopInstance, args).await?,
        Commands::StartService(args) => action::execute(&ctx, ActionKind::StartService, args).await?,
        Commands::StopService(args) => action::execute(&ctx, ActionKind::StopService, args).await?,
        Commands::Dashboard => dashboard::execute(&ctx).await?,
        Commands::Call { endpoint } => status::execute_call(&ctx, &endpoint).await?,
        Commands::Config(cmd) => commands::config::execute(cmd, &cli.config, &ctx.config, ctx.format)?,
        Commands::Version => {
            println!("FSQSB CLI v{}", fsqsb_common::VERSION);
            println!("API: {}", ctx.config.api_base_url);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
