use clap::{Parser, Subcommand};
use parley::channels::{ChannelKind, ChannelRegistry, ChannelState, SendOptions};
use parley::config::Config;
use parley::pipeline::MessagePipeline;
use parley::router::build_router;
use parley::session::MemoryConversationStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley multi-channel messaging gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (webhooks, web chat, admin API).
    Gateway {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8787)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// List channels and whether they are available.
    Channels {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check a channel's credentials with a read-only platform API call.
    Test {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel id: whatsapp, messenger, or instagram
        channel: String,
    },

    /// Send a plain text message through a channel.
    Send {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel id: whatsapp, messenger, or instagram
        channel: String,

        /// Platform recipient id (phone number, PSID, IGSID)
        recipient: String,

        text: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Gateway { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Gateway { config, port }) => run_gateway(config, port).await,
        Some(Commands::Channels { config }) => run_channels(config).await,
        Some(Commands::Test { config, channel }) => run_test(config, channel).await,
        Some(Commands::Send {
            config,
            channel,
            recipient,
            text,
        }) => run_send(config, channel, recipient, text).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(parley::config::default_config_path);
    let dir = parley::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = parley::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    parley::gateway::run_gateway(config, path).await
}

/// Registry for one-shot commands: in-memory conversations, no dedup.
fn offline_registry(config: &Config) -> anyhow::Result<ChannelRegistry> {
    let router = build_router(&config.router)?;
    let pipeline = MessagePipeline::new(Arc::new(MemoryConversationStore::new()), router);
    Ok(ChannelRegistry::from_config(config, Arc::new(pipeline)))
}

async fn run_channels(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = parley::config::load_config(config_path)?;
    let registry = offline_registry(&config)?;
    println!("{:<10} {:<20} {:<13} MISSING", "ID", "NAME", "STATE");
    for status in registry.statuses().await {
        let state = match status.state {
            ChannelState::Available => "available",
            ChannelState::Disabled => "disabled",
            ChannelState::Unconfigured => "unconfigured",
        };
        println!(
            "{:<10} {:<20} {:<13} {}",
            status.id,
            status.name,
            state,
            status.missing.join(", ")
        );
    }
    let web = if config.channels.web.enabled {
        "available"
    } else {
        "disabled"
    };
    println!(
        "{:<10} {:<20} {:<13}",
        ChannelKind::Web.as_str(),
        ChannelKind::Web.display_name(),
        web
    );
    Ok(())
}

async fn run_test(config_path: Option<PathBuf>, channel: String) -> anyhow::Result<()> {
    let (config, _) = parley::config::load_config(config_path)?;
    let registry = offline_registry(&config)?;
    let result = registry.test_connection(&channel).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(
            "{} connection test failed: {}",
            channel,
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_send(
    config_path: Option<PathBuf>,
    channel: String,
    recipient: String,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = parley::config::load_config(config_path)?;
    let registry = offline_registry(&config)?;
    let result = registry
        .send_message(&channel, &recipient, &text, &SendOptions::default())
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!("send via {} failed", channel);
    }
    Ok(())
}
