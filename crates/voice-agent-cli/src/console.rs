//! Interactive session console
//!
//! Drives an [`AgentSession`] with line commands on stdin. The voice device is
//! simulated: outbound calls are answered after a delay, and inbound traffic
//! is injected with `ring` and `drop`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use voice_session_core::adapters::{ConnectParams, DeviceDriver, SdkEvent};
use voice_session_core::{AgentSession, EventPriority, OfferId, SessionConfig, VoiceResult, VoiceToken};

const HELP: &str = "\
commands:
  call <number>        place an outbound call
  hangup               end the current call
  answer <id>          answer a pending offer
  reject <id>          reject a pending offer
  mute                 toggle mute on the connected call
  ring <id> [caller]   simulate an incoming call
  drop [id]            simulate the remote side hanging up
  status               print the current snapshot
  quit                 tear down and exit";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Call(String),
    Hangup,
    Answer(String),
    Reject(String),
    Mute,
    Ring { id: String, caller: Option<String> },
    Drop(Option<String>),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut words = rest.split_whitespace();

    let command = match verb.to_ascii_lowercase().as_str() {
        // Dial strings may contain spaces; the session normalizes them
        "call" if !rest.is_empty() => ConsoleCommand::Call(rest.to_string()),
        "hangup" => ConsoleCommand::Hangup,
        "answer" => match words.next() {
            Some(id) => ConsoleCommand::Answer(id.to_string()),
            None => bail!("usage: answer <id>"),
        },
        "reject" => match words.next() {
            Some(id) => ConsoleCommand::Reject(id.to_string()),
            None => bail!("usage: reject <id>"),
        },
        "mute" => ConsoleCommand::Mute,
        "ring" => match words.next() {
            Some(id) => ConsoleCommand::Ring {
                id: id.to_string(),
                caller: words.next().map(str::to_string),
            },
            None => bail!("usage: ring <id> [caller]"),
        },
        "drop" => ConsoleCommand::Drop(words.next().map(str::to_string)),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "call" => bail!("usage: call <number>"),
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(Some(command))
}

/// Device driver standing in for the browser voice SDK
struct SimulatedDevice {
    sdk: mpsc::UnboundedSender<SdkEvent>,
    answer_delay: Duration,
}

impl SimulatedDevice {
    fn emit(&self, event: SdkEvent) {
        if self.sdk.send(event).is_err() {
            warn!("Session stopped listening to the simulated device");
        }
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDevice {
    async fn register(&self, token: &VoiceToken) -> VoiceResult<()> {
        info!(?token, "Simulated device registered");
        self.emit(SdkEvent::new("registered"));
        Ok(())
    }

    async fn update_token(&self, token: &VoiceToken) -> VoiceResult<()> {
        info!(?token, "Simulated device token updated");
        Ok(())
    }

    async fn connect(&self, params: ConnectParams) -> VoiceResult<()> {
        info!(to = %params.to, "Dialing");
        let sdk = self.sdk.clone();
        let delay = self.answer_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sdk.send(SdkEvent::new("accept"));
        });
        Ok(())
    }

    async fn disconnect_all(&self) -> VoiceResult<()> {
        info!("All calls disconnected");
        Ok(())
    }

    async fn destroy(&self) -> VoiceResult<()> {
        info!("Simulated device destroyed");
        Ok(())
    }

    async fn accept(&self, offer_id: &OfferId) -> VoiceResult<()> {
        info!(%offer_id, "Accepted incoming call");
        Ok(())
    }

    async fn reject(&self, offer_id: &OfferId) -> VoiceResult<()> {
        info!(%offer_id, "Rejected incoming call");
        Ok(())
    }

    async fn mute(&self, offer_id: Option<OfferId>, muted: bool) -> VoiceResult<()> {
        info!(?offer_id, muted, "Mute changed");
        Ok(())
    }
}

pub async fn run(
    config: SessionConfig,
    identity: String,
    answer_delay_ms: u64,
    min_priority: EventPriority,
) -> Result<()> {
    let (sdk_tx, sdk_rx) = mpsc::unbounded_channel();
    let device = Arc::new(SimulatedDevice {
        sdk: sdk_tx.clone(),
        answer_delay: Duration::from_millis(answer_delay_ms),
    });

    let session = AgentSession::builder(identity)
        .config(config)
        .device_driver(device, sdk_rx)
        .build()?;

    let mut events = session.coordinator().events();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if event.priority() < min_priority {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode session event"),
            }
        }
    });

    let status = session.initialize().await?;
    println!("session {} for {} is {}", session.id(), session.identity(), status);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let coordinator = session.coordinator();
        let applied = match command {
            ConsoleCommand::Call(number) => coordinator.call_out(number),
            ConsoleCommand::Hangup => coordinator.hangup(),
            ConsoleCommand::Answer(id) => coordinator.answer_call(id),
            ConsoleCommand::Reject(id) => coordinator.reject_call(id),
            ConsoleCommand::Mute => coordinator.toggle_mute(),
            ConsoleCommand::Ring { id, caller } => {
                let mut event = SdkEvent::new("incoming").with_call_id(id);
                if let Some(caller) = caller {
                    event = event.with_parameter("From", caller);
                }
                sdk_tx.send(event).is_ok()
            }
            ConsoleCommand::Drop(id) => {
                let mut event = SdkEvent::new("disconnect");
                if let Some(id) = id {
                    event = event.with_call_id(id);
                }
                sdk_tx.send(event).is_ok()
            }
            ConsoleCommand::Status => {
                println!("{}", serde_json::to_string_pretty(&coordinator.snapshot())?);
                true
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                true
            }
            ConsoleCommand::Quit => break,
        };

        if !applied {
            println!("ignored while {}", coordinator.status());
        }
    }

    session.teardown().await;
    println!("session ended as {}", session.coordinator().status());
    Ok(())
}
