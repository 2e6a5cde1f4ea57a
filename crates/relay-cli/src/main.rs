//! relay-chat: interactive terminal client for the relay bridge.
//!
//! Lines typed on stdin are sent as text messages. `/history [offset]
//! [limit]` pages through the conversation and `/quit` leaves. The session
//! reconnects on its own after network drops.

mod input;
mod token;

use anyhow::Result;
use clap::Parser;
use relay_client::{ClientConfig, EventKind, ReconnectingClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

use input::Input;

/// relay-chat: chat with the backend through a relay bridge
#[derive(Parser, Debug)]
#[command(name = "relay-chat", version, about = "Interactive relay bridge client")]
struct Cli {
    /// Bridge WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8765")]
    url: String,

    /// Authentication token
    #[arg(long, env = "RELAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File to read the token from when none is given
    #[arg(long, default_value = "~/.relay/token")]
    token_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    // stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let token_file = token::expand_tilde(&cli.token_file);
    let token = token::resolve(cli.token, &token_file)?;

    let client = ReconnectingClient::new(ClientConfig {
        url: cli.url,
        ..ClientConfig::default()
    });
    for kind in EventKind::ALL {
        client.on(kind, |event| println!("{}", input::render(event)));
    }
    client.connect(token);

    let waiter = client.clone();
    let mut driver = tokio::spawn(async move { waiter.wait().await });
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut driver => return Ok(()),

            _ = tokio::signal::ctrl_c() => {
                client.disconnect(true);
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    client.disconnect(true);
                    break;
                };
                let sent = match input::parse(&line) {
                    Input::Text(message) => client.send_text(message).await,
                    Input::History { offset, limit } => client.request_history(offset, limit).await,
                    Input::Quit => {
                        client.disconnect(true);
                        break;
                    }
                    Input::Empty => Ok(()),
                    Input::Invalid(message) => {
                        eprintln!("{message}");
                        Ok(())
                    }
                };
                if let Err(e) = sent {
                    eprintln!("not sent: {e}");
                }
            }
        }
    }

    let _ = driver.await;
    Ok(())
}
