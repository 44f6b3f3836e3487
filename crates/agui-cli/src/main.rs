use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use agui_agent::Agent;
use agui_core::config::Config;
use agui_gateway::GatewayState;
use agui_providers::{Credentials, GeminiProvider};

mod logging;

#[derive(Parser)]
#[command(
    name = "agui-gateway",
    about = "AG-UI gateway: stream agent runs to web frontends over server-sent events",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List the tools registered for the configured profile
    Tools,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // .env is optional
    let dotenv = dotenvy::dotenv();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut config = config;
            config.override_gateway(port, bind);
            serve(config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                println!("Config: {}", config_path.display());
                for warning in &warnings {
                    println!("  warning: {warning}");
                }
                for error in &errors {
                    println!("  error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
                println!("Config OK");
            }
        },
        Commands::Tools => {
            let profile = config.agent_profile();
            let tools = agui_tools::registry_for_profile(&profile)?;
            println!("Profile: {profile}");
            for tool in tools.iter() {
                println!("  {:<28} {}", tool.name(), tool.description());
            }
        }
    }

    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("invalid configuration");
    }

    let provider_config = config.provider();
    let credentials = provider_config
        .resolve_api_key()
        .map(|api_key| Credentials::ApiKey { api_key });
    if credentials.is_none() {
        tracing::warn!(
            provider = %provider_config.id,
            "No API key found; every run will end with auth_failure"
        );
    }
    let provider = Arc::new(GeminiProvider::new(provider_config.base_url.as_deref()));

    let config = Arc::new(config);
    let agent = Agent::from_config(config.clone(), provider, credentials)?;
    tracing::info!(
        profile = agent.profile(),
        model = agent.model(),
        tools = ?agent.tool_names(),
        "Agent configured"
    );

    let state = GatewayState::new(config, Arc::new(agent));
    #[cfg(feature = "metrics")]
    let state = state.with_metrics(agui_gateway::metrics::install_prometheus_recorder()?);

    agui_gateway::start_gateway(Arc::new(state)).await
}
