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

//! Hands-Free client daemon.
//!
//! Connects to one Audio Gateway and prints client events as JSON lines.
//! Without the `bluez` feature, or with `--sim`, it talks to a scripted
//! gateway instead of a phone.

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hfp_client::config::Config;
use hfp_client::runtime::ports::{ChannelSink, EventSink};
use hfp_client::runtime::sim::ScriptedGateway;
use hfp_client::runtime::{inbox, ClientRuntime, Collaborators, InboundSender};
use hfp_client::state::LinkBoard;
use hfp_client::{ClientEvent, PeerAddress};

const DEFAULT_PEER: &str = "00:11:22:33:44:55";

struct Args {
    peer: PeerAddress,
    simulate: bool,
}

fn parse_args() -> Result<Args> {
    let mut peer = None;
    let mut simulate = !cfg!(feature = "bluez");
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--sim" => simulate = true,
            other => {
                peer = Some(
                    other
                        .parse()
                        .with_context(|| format!("invalid Bluetooth address '{}'", other))?,
                )
            }
        }
    }
    let peer = match peer {
        Some(peer) => peer,
        None => DEFAULT_PEER.parse()?,
    };
    Ok(Args { peer, simulate })
}

fn simulated(
    config: &Config,
    peer: PeerAddress,
    tx: InboundSender,
    sink: Box<dyn EventSink>,
) -> Collaborators {
    let gateway = ScriptedGateway::new(peer, &config.simulator, tx);
    Collaborators {
        transport: Box::new(gateway.clone()),
        discovery: Box::new(gateway.clone()),
        audio: Box::new(gateway),
        sink,
    }
}

#[cfg(feature = "bluez")]
async fn bluez(
    config: &Config,
    tx: InboundSender,
    sink: Box<dyn EventSink>,
) -> Result<Collaborators> {
    use hfp_client::runtime::bluez::{default_adapter, BluezDiscovery, BluezTransport, NoAudio};

    let adapter = default_adapter().await?;
    Ok(Collaborators {
        transport: Box::new(BluezTransport::new(tx.clone(), &config.transport)),
        discovery: Box::new(BluezDiscovery::new(adapter, tx)),
        audio: Box::new(NoAudio),
        sink,
    })
}

#[cfg(not(feature = "bluez"))]
async fn bluez(
    _config: &Config,
    _tx: InboundSender,
    _sink: Box<dyn EventSink>,
) -> Result<Collaborators> {
    anyhow::bail!("built without the bluez feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hfp_client=info".parse()?),
        )
        .init();

    info!("Starting Hands-Free client v{}...", env!("CARGO_PKG_VERSION"));

    let args = parse_args()?;
    let config = Config::load()?;
    info!("Configuration loaded");

    let (tx, rx) = inbox();
    let (sink, mut events) = ChannelSink::new();
    let ports = if args.simulate {
        info!("Using scripted Audio Gateway at {}", args.peer);
        simulated(&config, args.peer, tx.clone(), Box::new(sink))
    } else {
        bluez(&config, tx.clone(), Box::new(sink)).await?
    };

    let runtime = ClientRuntime::new(config, (tx, rx), ports);
    let handle = runtime.handle();
    let task = tokio::spawn(runtime.run());

    handle.enable()?;
    handle.register()?;
    handle.open(args.peer)?;

    let board = LinkBoard::new();
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                board.apply(&event);
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Cannot encode event: {}", e),
                }
                match event {
                    ClientEvent::ServiceConnected { peer, .. } => {
                        info!("Service level connection to {} established", peer);
                        if args.simulate {
                            handle.open_audio(peer)?;
                        }
                    }
                    ClientEvent::Closed { peer, reason } => {
                        info!("Link to {} closed: {:?}", peer, reason);
                    }
                    ClientEvent::Deregistered => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                handle.deregister()?;
            }
        }
    }

    handle.shutdown()?;
    if let Err(e) = task.await? {
        error!("Runtime error: {}", e);
    }
    info!("Connected peers at exit: {}", board.connected_peers().len());
    info!("Hands-Free client stopped");
    Ok(())
}
