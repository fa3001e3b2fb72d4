//! Voice agent command-line tool
//!
//! - `token` fetches a voice token for an identity
//! - `presence` announces an agent state on the presence hub
//! - `session` runs a full agent session against a simulated voice device

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::info;

use voice_session_core::adapters::{HttpTokenClient, PresenceHubClient, TokenProvider, WebSocketHubTransport};
use voice_session_core::logging::{log_startup, parse_log_level};
use voice_session_core::{
    setup_logging, AgentIdentity, EventPriority, LogFormat, LoggingConfig, PresenceState, SessionConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Voice agent session tool", long_about = None)]
struct Cli {
    /// TOML configuration file; VOICE_* environment variables override it
    #[arg(short, long, global = true, env = "VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "full")]
    log_format: FormatArg,

    /// Include source file and line in log lines
    #[arg(long, global = true)]
    log_source: bool,

    /// Keep HTTP, TLS and WebSocket crate logs at the main level
    #[arg(long, global = true)]
    transport_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a voice token from the token endpoint
    Token {
        #[arg(short, long, env = "VOICE_IDENTITY")]
        identity: String,

        /// Print the raw token instead of a summary
        #[arg(long)]
        reveal: bool,
    },
    /// Register on the presence hub and announce a state
    Presence {
        #[arg(short, long, env = "VOICE_IDENTITY")]
        identity: String,

        #[arg(short, long, value_enum, default_value = "available")]
        state: StateArg,

        /// Seconds to stay registered before disconnecting
        #[arg(long, default_value_t = 0)]
        hold: u64,
    },
    /// Run an interactive session against a simulated voice device
    Session {
        #[arg(short, long, env = "VOICE_IDENTITY")]
        identity: String,

        /// Milliseconds before a simulated callee answers an outbound call
        #[arg(long, default_value_t = 1500)]
        answer_delay_ms: u64,

        /// Only print session events at or above this priority
        #[arg(long, value_enum, default_value = "low")]
        events: PriorityArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StateArg {
    Available,
    Busy,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Full,
    Compact,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Full => LogFormat::Full,
            FormatArg::Compact => LogFormat::Compact,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for EventPriority {
    fn from(priority: PriorityArg) -> Self {
        match priority {
            PriorityArg::Low => EventPriority::Low,
            PriorityArg::Normal => EventPriority::Normal,
            PriorityArg::High => EventPriority::High,
        }
    }
}

impl From<StateArg> for PresenceState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Available => PresenceState::Available,
            StateArg::Busy => PresenceState::Busy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging =
        LoggingConfig::new(parse_log_level(&cli.log_level)?, "voice-agent").with_format(cli.log_format.into());
    if cli.log_source {
        logging = logging.with_source_location();
    }
    if cli.transport_logs {
        logging = logging.with_transport_logs();
    }
    setup_logging(&logging)?;

    let config = SessionConfig::load(cli.config.as_deref()).context("loading configuration")?;
    log_startup(&logging.app_name, voice_session_core::VERSION, &config);

    match cli.command {
        Command::Token { identity, reveal } => fetch_token(&config, &identity, reveal).await,
        Command::Presence { identity, state, hold } => announce(&config, &identity, state.into(), hold).await,
        Command::Session {
            identity,
            answer_delay_ms,
            events,
        } => console::run(config, identity, answer_delay_ms, events.into()).await,
    }
}

async fn fetch_token(config: &SessionConfig, identity: &str, reveal: bool) -> Result<()> {
    let identity = AgentIdentity::new(identity)?;
    let client = HttpTokenClient::from_config(config)?;
    info!(url = %client.token_url(&identity), "Requesting voice token");

    let token = client.fetch_token(&identity).await.context("fetching voice token")?;
    if reveal {
        println!("{}", token.expose());
    } else {
        println!("token for {}: {} bytes", identity, token.expose().len());
    }
    Ok(())
}

async fn announce(config: &SessionConfig, identity: &str, state: PresenceState, hold: u64) -> Result<()> {
    let identity = AgentIdentity::new(identity)?;
    let transport = Arc::new(WebSocketHubTransport::from_config(config)?);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let client = PresenceHubClient::new(transport, config.hub_connect_retry(), events_tx);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(?event, "Presence hub event");
        }
    });

    let handle = client.connect(&identity).await.context("connecting to presence hub")?;
    client.announce(&handle, state).await;
    println!("{} announced {} on {}", identity, state, config.hub_url);

    if hold > 0 {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(hold)) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    }

    client.disconnect(&handle).await;
    Ok(())
}
