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

//! Event loop around the protocol core.
//!
//! Owns the [`HandsFreeClient`], reads inbound events from one queue and
//! carries out the effects each dispatch returns.

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod ports;
pub mod sim;
pub mod timers;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hfp::{
    AtRequest, AudioRequest, DiscoveryRequest, Effect, Event, HandsFreeClient, PeerAddress,
    TimerRequest, TransportRequest,
};
use ports::{AudioLink, Discovery, EventSink, Transport};
use timers::TokioTimers;

/// Application requests.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Enable,
    Register,
    Deregister,
    Open(PeerAddress),
    Close(PeerAddress),
    OpenAudio(PeerAddress),
    CloseAudio(PeerAddress),
    Send(PeerAddress, AtRequest),
    WriteAudio(PeerAddress, Vec<u8>),
}

/// Everything the runtime reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Peer { peer: PeerAddress, event: Event },
    Command(ClientCommand),
    Shutdown,
}

pub type InboundSender = mpsc::UnboundedSender<Inbound>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Create the runtime inbox. Collaborators get clones of the sender.
pub fn inbox() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Cloneable handle for submitting application commands.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: InboundSender,
}

impl ClientHandle {
    pub fn new(tx: InboundSender) -> Self {
        Self { tx }
    }

    pub fn command(&self, command: ClientCommand) -> Result<()> {
        self.tx
            .send(Inbound::Command(command))
            .map_err(|_| anyhow!("Hands-Free runtime stopped"))
    }

    pub fn enable(&self) -> Result<()> {
        self.command(ClientCommand::Enable)
    }

    pub fn register(&self) -> Result<()> {
        self.command(ClientCommand::Register)
    }

    pub fn deregister(&self) -> Result<()> {
        self.command(ClientCommand::Deregister)
    }

    pub fn open(&self, peer: PeerAddress) -> Result<()> {
        self.command(ClientCommand::Open(peer))
    }

    pub fn close(&self, peer: PeerAddress) -> Result<()> {
        self.command(ClientCommand::Close(peer))
    }

    pub fn open_audio(&self, peer: PeerAddress) -> Result<()> {
        self.command(ClientCommand::OpenAudio(peer))
    }

    pub fn close_audio(&self, peer: PeerAddress) -> Result<()> {
        self.command(ClientCommand::CloseAudio(peer))
    }

    pub fn send(&self, peer: PeerAddress, request: AtRequest) -> Result<()> {
        self.command(ClientCommand::Send(peer, request))
    }

    pub fn write_audio(&self, peer: PeerAddress, data: Vec<u8>) -> Result<()> {
        self.command(ClientCommand::WriteAudio(peer, data))
    }

    /// Stop the runtime after the events already queued.
    pub fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Inbound::Shutdown)
            .map_err(|_| anyhow!("Hands-Free runtime stopped"))
    }
}

/// Boxed collaborators for one runtime.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub discovery: Box<dyn Discovery>,
    pub audio: Box<dyn AudioLink>,
    pub sink: Box<dyn EventSink>,
}

pub struct ClientRuntime {
    client: HandsFreeClient,
    tx: InboundSender,
    rx: InboundReceiver,
    ports: Collaborators,
    timers: TokioTimers,
}

impl ClientRuntime {
    pub fn new(
        config: Config,
        (tx, rx): (InboundSender, InboundReceiver),
        ports: Collaborators,
    ) -> Self {
        Self {
            client: HandsFreeClient::new(config),
            timers: TokioTimers::new(tx.clone()),
            tx,
            rx,
            ports,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(self.tx.clone())
    }

    /// Process inbound events until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!("Hands-Free runtime started");
        while let Some(inbound) = self.rx.recv().await {
            let effects = match inbound {
                Inbound::Peer { peer, event } => {
                    debug!("{} <- {}", peer, event.name());
                    self.client.dispatch(peer, event)
                }
                Inbound::Command(command) => self.command(command),
                Inbound::Shutdown => break,
            };
            self.apply(effects);
        }
        info!("Hands-Free runtime stopped");
        Ok(())
    }

    fn command(&mut self, command: ClientCommand) -> Vec<Effect> {
        match command {
            ClientCommand::Enable => self.client.enable(),
            ClientCommand::Register => self.client.register(),
            ClientCommand::Deregister => self.client.deregister(),
            ClientCommand::Open(peer) => self.client.open(peer),
            ClientCommand::Close(peer) => self.client.close(peer),
            ClientCommand::OpenAudio(peer) => self.client.open_audio(peer),
            ClientCommand::CloseAudio(peer) => self.client.close_audio(peer),
            ClientCommand::Send(peer, request) => self.client.send(peer, request),
            ClientCommand::WriteAudio(peer, data) => self.client.write_audio(peer, &data),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transport(request) => self.apply_transport(request),
                Effect::Discovery(DiscoveryRequest::Discover { peer }) => {
                    if let Err(e) = self.ports.discovery.discover(peer) {
                        warn!("Discovery on {} failed: {}", peer, e);
                        feed_back(&self.tx, peer, Event::DiscoveryResult(None));
                    }
                }
                Effect::Discovery(DiscoveryRequest::Cancel { peer }) => {
                    self.ports.discovery.cancel(peer)
                }
                Effect::Audio(request) => self.apply_audio(request),
                Effect::Timer(TimerRequest::Start { token, after }) => {
                    self.timers.start(token, after)
                }
                Effect::Timer(TimerRequest::Cancel { token }) => self.timers.cancel(token),
                Effect::Notify(event) => self.ports.sink.deliver(event),
            }
        }
    }

    fn apply_transport(&mut self, request: TransportRequest) {
        let transport = &mut self.ports.transport;
        let result = match &request {
            TransportRequest::Open { peer, channel } => {
                let result = transport.open(*peer, *channel);
                if result.is_err() {
                    feed_back(&self.tx, *peer, Event::TransportClosed);
                }
                result
            }
            TransportRequest::Close { handle } => transport.close(*handle),
            TransportRequest::Write { handle, data } => transport.write(*handle, data),
            TransportRequest::StartServer => transport.start_server(),
            TransportRequest::StopServer => transport.stop_server(),
        };
        if let Err(e) = result {
            warn!("Transport request {:?} failed: {}", request, e);
        }
    }

    fn apply_audio(&mut self, request: AudioRequest) {
        let audio = &mut self.ports.audio;
        let result = match &request {
            AudioRequest::Configure { peer, params } => audio.configure(*peer, params),
            AudioRequest::Create { peer, originator } => {
                let result = audio.create(*peer, *originator);
                if result.is_err() && *originator {
                    feed_back(&self.tx, *peer, Event::AudioDisconnected);
                }
                result
            }
            AudioRequest::Accept { peer, params } => {
                let result = audio.accept(*peer, params);
                if result.is_err() {
                    feed_back(&self.tx, *peer, Event::AudioDisconnected);
                }
                result
            }
            AudioRequest::Reject { peer } => {
                audio.reject(*peer);
                Ok(())
            }
            AudioRequest::Remove { peer } => {
                audio.remove(*peer);
                Ok(())
            }
            AudioRequest::WriteFrame { peer, frame } => audio.write_frame(*peer, frame),
        };
        if let Err(e) = result {
            warn!("Audio request failed: {}", e);
        }
    }
}

/// Post an event that results from a failed request.
fn feed_back(tx: &InboundSender, peer: PeerAddress, event: Event) {
    let _ = tx.send(Inbound::Peer { peer, event });
}
