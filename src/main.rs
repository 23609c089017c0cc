// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Spectro-Link command-line client.

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spectro_link::bluetooth::{select_endpoint, Discovery, Session};
use spectro_link::config::Config;
use spectro_link::events::{EventProcessor, SessionEvent};
use spectro_link::protocol::DeviceCommand;
use spectro_link::state::LinkState;
use spectro_link::SessionError;

const HELP: &str = "\
Commands:
  ping | fw | fpga | acquire        query the instrument
  <command> [write] [hex bytes...]  any catalog command, e.g. `laser_on write 01`
  list                              list paired serial-port devices
  refresh                           disconnect and list devices again
  connect [name]                    connect to a device (default from config)
  disconnect                        close the connection
  status                            show link status
  quit                              exit";

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Send {
        command: DeviceCommand,
        is_write: bool,
        payload: Vec<u8>,
    },
    List,
    Refresh,
    Connect(Option<String>),
    Disconnect,
    Status,
    Help,
    Quit,
}

fn parse_request(line: &str) -> Result<Option<Request>> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(None);
    };

    let request = match head.to_lowercase().as_str() {
        "list" => Request::List,
        "refresh" => Request::Refresh,
        "connect" => {
            let name = tokens.collect::<Vec<_>>().join(" ");
            Request::Connect((!name.is_empty()).then_some(name))
        }
        "disconnect" => Request::Disconnect,
        "status" => Request::Status,
        "help" | "?" => Request::Help,
        "quit" | "exit" => Request::Quit,
        _ => {
            let command = DeviceCommand::parse(head)
                .ok_or_else(|| anyhow!("Unknown command: {}", head))?;
            let mut rest = tokens.peekable();
            let is_write = rest.next_if(|t| t.eq_ignore_ascii_case("write")).is_some();
            let payload = rest.map(parse_byte).collect::<Result<Vec<u8>>>()?;
            if !is_write && !payload.is_empty() {
                bail!("Payload bytes require `write`");
            }
            Request::Send {
                command,
                is_write,
                payload,
            }
        }
    };
    Ok(Some(request))
}

fn parse_byte(token: &str) -> Result<u8> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u8::from_str_radix(digits, 16).with_context(|| format!("Invalid byte: {}", token))
}

async fn send(session: &Session, command: DeviceCommand, is_write: bool, payload: &[u8]) {
    match session.send_command(command, is_write, payload).await {
        Ok(ack) => info!("{} pending ({} bytes written)", ack.command, ack.bytes_written),
        Err(SessionError::Busy { pending }) => {
            println!("{} is still awaiting a response", pending.as_str())
        }
        Err(e) => println!("SEND ERROR: {}", e),
    }
}

async fn connect(
    session: &mut Session,
    discovery: &Discovery,
    config: &Config,
    name: &str,
) -> Result<()> {
    let endpoints = discovery.discover().await?;
    let endpoint = select_endpoint(&endpoints, name)
        .ok_or_else(|| SessionError::DeviceNotFound(name.to_string()))?;

    session
        .connect(endpoint, config.bluetooth.rfcomm_channel)
        .await?;

    if config.session.ping_on_connect {
        send(session, DeviceCommand::ConnectionPing, false, &[]).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let directive = config
        .log_filter
        .clone()
        .unwrap_or_else(|| "spectro_link=info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    info!("Starting Spectro-Link v{}...", env!("CARGO_PKG_VERSION"));

    let state = LinkState::new();
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(64);

    // Render session events
    let state_events = state.clone();
    tokio::spawn(async move {
        let mut processor = EventProcessor::new(state_events, std::io::stdout());
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = processor.process_event(&event) {
                error!("Error processing session event: {}", e);
            }
        }
    });

    let discovery = Discovery::new()
        .await
        .context("Bluetooth adapter unavailable")?;
    let mut session = Session::new(config.session_options(), event_tx);

    let endpoints = discovery.discover().await?;
    for endpoint in &endpoints {
        println!("  {}", endpoint);
    }

    if let Err(e) = connect(&mut session, &discovery, &config, &config.bluetooth.device_name).await {
        warn!("Initial connect failed: {}", e);
    }

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let request = match parse_request(&line) {
                    Ok(Some(request)) => request,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                match request {
                    Request::Send { command, is_write, payload } => {
                        send(&session, command, is_write, &payload).await;
                    }
                    Request::List => match discovery.discover().await {
                        Ok(endpoints) => endpoints.iter().for_each(|e| println!("  {}", e)),
                        Err(e) => println!("Discovery failed: {}", e),
                    },
                    Request::Refresh => match session.refresh(&discovery).await {
                        Ok(endpoints) => endpoints.iter().for_each(|e| println!("  {}", e)),
                        Err(e) => println!("Discovery failed: {}", e),
                    },
                    Request::Connect(name) => {
                        let name = name.unwrap_or_else(|| config.bluetooth.device_name.clone());
                        if let Err(e) = connect(&mut session, &discovery, &config, &name).await {
                            println!("Cannot connect to {}: {}", name, e);
                        }
                    }
                    Request::Disconnect => session.disconnect().await,
                    Request::Status => {
                        println!("Status: {}", state.get_status().as_str());
                        if let Some(endpoint) = state.get_endpoint() {
                            println!("Device: {}", endpoint);
                        }
                        if let Some(rev) = state.get_firmware_revision() {
                            println!("Firmware: {}", rev);
                        }
                        if let Some(rev) = state.get_fpga_revision() {
                            println!("FPGA: {}", rev);
                        }
                    }
                    Request::Help => println!("{}", HELP),
                    Request::Quit => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.disconnect().await;
    info!("Spectro-Link stopped");
    Ok(())
}
