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

//! BlueZ collaborators.
//!
//! RFCOMM links over bluer sockets, with one reader task and one writer
//! task per link. Discovery checks the device's advertised service UUIDs.
//! bluer has no SCO socket support, so audio links are refused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bluer::rfcomm::{Listener, SocketAddr, Stream};
use bluer::{Adapter, Address};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ports::{AudioLink, Discovery, Transport};
use super::{Inbound, InboundSender};
use crate::config::TransportConfig;
use crate::hfp::audio::LinkParams;
use crate::hfp::constants::AUDIO_GATEWAY_UUID;
use crate::hfp::{Direction, Event, PeerAddress, ServiceRecord, TransportHandle};

/// Open the default adapter and make sure it is powered.
pub async fn default_adapter() -> Result<Adapter> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());

    if !adapter.is_powered().await? {
        info!("Powering on Bluetooth adapter...");
        adapter.set_powered(true).await?;
    }
    adapter.set_pairable(true).await?;
    Ok(adapter)
}

fn to_bluer(peer: PeerAddress) -> Address {
    Address::new(peer.0)
}

struct Link {
    peer: PeerAddress,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

type Links = Arc<Mutex<HashMap<TransportHandle, Link>>>;

/// RFCOMM transport on BlueZ.
pub struct BluezTransport {
    tx: InboundSender,
    server_channel: u8,
    links: Links,
    next_handle: Arc<AtomicU32>,
    server: Option<JoinHandle<()>>,
}

impl BluezTransport {
    pub fn new(tx: InboundSender, config: &TransportConfig) -> Self {
        Self {
            tx,
            server_channel: config.server_channel,
            links: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU32::new(1)),
            server: None,
        }
    }

    /// Register a connected stream and start its I/O tasks.
    fn attach(
        stream: Stream,
        peer: PeerAddress,
        direction: Direction,
        links: &Links,
        next_handle: &AtomicU32,
        tx: &InboundSender,
    ) {
        let handle = TransportHandle(next_handle.fetch_add(1, Ordering::Relaxed));
        let (mut reader, mut writer) = stream.into_split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(data) = write_rx.recv().await {
                if let Err(e) = writer.write_all(&data).await {
                    warn!("RFCOMM write to {} failed: {}", peer, e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        links.lock().insert(
            handle,
            Link {
                peer,
                writer: write_tx,
                reader: None,
            },
        );

        let reader_links = links.clone();
        let reader_tx = tx.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        info!("Connection closed by {}", peer);
                        break;
                    }
                    Ok(n) => {
                        let _ = reader_tx.send(Inbound::Peer {
                            peer,
                            event: Event::TransportData(buf[..n].to_vec()),
                        });
                    }
                    Err(e) => {
                        error!("Read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            if reader_links.lock().remove(&handle).is_some() {
                let _ = reader_tx.send(Inbound::Peer {
                    peer,
                    event: Event::TransportClosed,
                });
            }
        });
        if let Some(link) = links.lock().get_mut(&handle) {
            link.reader = Some(reader);
        }

        let _ = tx.send(Inbound::Peer {
            peer,
            event: Event::TransportOpened { handle, direction },
        });
    }

    async fn accept_loop(
        listener: Listener,
        links: Links,
        next_handle: Arc<AtomicU32>,
        tx: InboundSender,
    ) {
        info!("Waiting for Audio Gateway connections...");
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let peer = PeerAddress(remote.addr.0);
                    info!("Connection from: {}", peer);
                    let _ = tx.send(Inbound::Peer {
                        peer,
                        event: Event::IncomingConnection,
                    });
                    Self::attach(stream, peer, Direction::Inbound, &links, &next_handle, &tx);
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

impl Transport for BluezTransport {
    fn open(&mut self, peer: PeerAddress, channel: u8) -> Result<()> {
        let links = self.links.clone();
        let next_handle = self.next_handle.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let addr = SocketAddr::new(to_bluer(peer), channel);
            match Stream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to {} on channel {}", peer, channel);
                    Self::attach(stream, peer, Direction::Outbound, &links, &next_handle, &tx);
                }
                Err(e) => {
                    warn!("RFCOMM connect to {} failed: {}", peer, e);
                    let _ = tx.send(Inbound::Peer {
                        peer,
                        event: Event::TransportClosed,
                    });
                }
            }
        });
        Ok(())
    }

    fn close(&mut self, handle: TransportHandle) -> Result<()> {
        let link = self
            .links
            .lock()
            .remove(&handle)
            .with_context(|| format!("unknown transport {:?}", handle))?;
        if let Some(reader) = link.reader {
            reader.abort();
        }
        let _ = self.tx.send(Inbound::Peer {
            peer: link.peer,
            event: Event::TransportClosed,
        });
        Ok(())
    }

    fn write(&mut self, handle: TransportHandle, data: &[u8]) -> Result<()> {
        let links = self.links.lock();
        let link = links
            .get(&handle)
            .with_context(|| format!("unknown transport {:?}", handle))?;
        link.writer
            .send(data.to_vec())
            .map_err(|_| anyhow!("writer for {} stopped", link.peer))
    }

    fn start_server(&mut self) -> Result<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let channel = self.server_channel;
        let links = self.links.clone();
        let next_handle = self.next_handle.clone();
        let tx = self.tx.clone();
        self.server = Some(tokio::spawn(async move {
            let local = SocketAddr::new(Address::any(), channel);
            match Listener::bind(local).await {
                Ok(listener) => {
                    info!("RFCOMM server listening on channel {}", channel);
                    Self::accept_loop(listener, links, next_handle, tx).await;
                }
                Err(e) => error!("Cannot listen on channel {}: {}", channel, e),
            }
        }));
        Ok(())
    }

    fn stop_server(&mut self) -> Result<()> {
        if let Some(server) = self.server.take() {
            debug!("Stopping RFCOMM server");
            server.abort();
        }
        Ok(())
    }
}

/// Service discovery through BlueZ device properties.
pub struct BluezDiscovery {
    adapter: Adapter,
    tx: InboundSender,
    pending: HashMap<PeerAddress, JoinHandle<()>>,
}

impl BluezDiscovery {
    pub fn new(adapter: Adapter, tx: InboundSender) -> Self {
        Self {
            adapter,
            tx,
            pending: HashMap::new(),
        }
    }
}

impl Discovery for BluezDiscovery {
    fn discover(&mut self, peer: PeerAddress) -> Result<()> {
        let device = self.adapter.device(to_bluer(peer))?;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let record = match device.uuids().await {
                Ok(Some(uuids)) if uuids.contains(&AUDIO_GATEWAY_UUID) => Some(ServiceRecord {
                    // Resolved from configuration.
                    channel: 0,
                    ..ServiceRecord::default()
                }),
                Ok(_) => {
                    warn!("{} does not offer the Audio Gateway service", peer);
                    None
                }
                Err(e) => {
                    warn!("Reading services of {} failed: {}", peer, e);
                    None
                }
            };
            let _ = tx.send(Inbound::Peer {
                peer,
                event: Event::DiscoveryResult(record),
            });
        });
        if let Some(previous) = self.pending.insert(peer, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&mut self, peer: PeerAddress) {
        if let Some(task) = self.pending.remove(&peer) {
            task.abort();
        }
    }
}

/// Audio transport stand-in that refuses every link.
pub struct NoAudio;

impl AudioLink for NoAudio {
    fn configure(&mut self, _peer: PeerAddress, _params: &LinkParams) -> Result<()> {
        Ok(())
    }

    fn create(&mut self, peer: PeerAddress, originator: bool) -> Result<()> {
        if originator {
            bail!("SCO links to {} are not supported", peer);
        }
        Ok(())
    }

    fn accept(&mut self, peer: PeerAddress, _params: &LinkParams) -> Result<()> {
        bail!("SCO links to {} are not supported", peer)
    }

    fn reject(&mut self, _peer: PeerAddress) {}

    fn remove(&mut self, _peer: PeerAddress) {}

    fn write_frame(&mut self, _peer: PeerAddress, _frame: &[u8]) -> Result<()> {
        bail!("no audio link")
    }
}
