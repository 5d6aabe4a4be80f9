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

//! Per-peer connection lifecycle.
//!
//! A session owns the link state, the AT engine and the audio controller
//! for one Audio Gateway. Every event runs to completion: the state moves
//! first, then the actions for the (state, event) pair run in order. Actions
//! may post follow-up events which are handled before `dispatch` returns.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hfp::at::{AtContext, AtEngine, Origin};
use crate::hfp::audio::{AudioContext, AudioOutcome, AudioSignal, ScoController, ScoState};
use crate::hfp::constants::{version, CallHoldFeatures, LocalFeatures, PeerFeatures};
use crate::hfp::effects::{
    DiscoveryRequest, Effect, Outbox, Timer, TimerKind, TransportRequest, Upcall,
};
use crate::hfp::error::{CloseReason, OpenFailure};
use crate::hfp::events::{ClientEvent, Event, ResultKind};
use crate::hfp::types::{Codec, Direction, PeerAddress, Role, ServiceRecord, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Opening,
    Open,
    Closing,
}

/// Link facts shared by the AT engine and the audio controller.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub handle: Option<TransportHandle>,
    pub local_features: LocalFeatures,
    pub peer_features: PeerFeatures,
    pub call_hold_features: CallHoldFeatures,
    pub peer_version: u16,
    pub service_connected: bool,
    pub codec: Codec,
}

impl LinkInfo {
    pub fn new(local_features: LocalFeatures) -> Self {
        Self {
            handle: None,
            local_features,
            peer_features: PeerFeatures::empty(),
            call_hold_features: CallHoldFeatures::empty(),
            peer_version: version::HFP_1_5,
            service_connected: false,
            codec: Codec::Cvsd,
        }
    }

    pub fn codec_negotiation(&self) -> bool {
        self.local_features.contains(LocalFeatures::CODEC_NEGOTIATION)
            && self.peer_features.contains(PeerFeatures::CODEC_NEGOTIATION)
    }

    pub fn three_way(&self) -> bool {
        self.local_features.contains(LocalFeatures::THREE_WAY)
            && self.peer_features.contains(PeerFeatures::THREE_WAY)
    }

    pub fn esco_s4(&self) -> bool {
        self.local_features.contains(LocalFeatures::ESCO_S4)
            && self.peer_features.contains(PeerFeatures::ESCO_S4)
    }

    fn reset(&mut self) {
        *self = Self::new(self.local_features);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    StartOpen,
    NoteInbound,
    ClearInbound,
    HandleCollision,
    DoTransportOpen,
    TransportOpen,
    DropTransport,
    AcceptorOpen,
    TransportFail,
    DiscoveryFail,
    OpenBusy,
    RecordService,
    DoClose,
    StartClose,
    StartDeregister,
    Terminate,
    TransportClose,
    Feed,
    SendAt,
    RejectCommand,
    TimerFired,
    ScoListen,
    ScoOpen,
    ScoClose,
    ScoConnRequest,
    ScoConnOpen,
    ScoConnClose,
    ScoDataReady,
    ScoIncoming,
    ScoWrite,
}

/// The dispatch table: actions to run and the state to move to.
fn transition(state: SessionState, event: &Event) -> (&'static [Action], SessionState) {
    use Action::*;
    use SessionState::*;

    match (state, event) {
        (Init, Event::Deregister) => (&[Terminate], Init),
        (Init, Event::OpenRequest) => (&[StartOpen], Opening),
        (Init, Event::IncomingConnection) => (&[NoteInbound], Init),
        (
            Init,
            Event::TransportOpened {
                direction: Direction::Outbound,
                ..
            },
        ) => (&[DropTransport], Init),
        (Init, Event::TransportOpened { .. }) => (&[AcceptorOpen, ScoListen], Open),
        (Init, Event::TransportClosed) => (&[ClearInbound], Init),
        (Init, Event::SendCommand(_)) => (&[RejectCommand], Init),
        (Init, Event::AudioConnectionRequest) => (&[ScoConnRequest], Init),
        (Init, Event::TimerExpired(_)) => (&[TimerFired], Init),

        (Opening, Event::Deregister) => (&[StartDeregister, DoClose], Closing),
        (Opening, Event::OpenRequest) => (&[OpenBusy], Opening),
        (Opening, Event::CloseRequest) => (&[DoClose], Closing),
        (Opening, Event::IncomingConnection) => (&[HandleCollision], Init),
        (Opening, Event::TransportOpened { .. }) => (&[TransportOpen, ScoListen], Open),
        (Opening, Event::TransportClosed) => (&[TransportFail], Init),
        (Opening, Event::DiscoveryResult(Some(_))) => (&[DoTransportOpen], Opening),
        (Opening, Event::DiscoveryResult(None)) => (&[DiscoveryFail], Init),
        (Opening, Event::SendCommand(_)) => (&[SendAt], Opening),
        (Opening, Event::TimerExpired(_)) => (&[TimerFired], Opening),

        (Open, Event::Deregister) => (&[StartDeregister, StartClose], Closing),
        (Open, Event::OpenRequest) => (&[OpenBusy], Open),
        (Open, Event::CloseRequest) => (&[StartClose], Closing),
        (Open, Event::AudioOpenRequest) => (&[ScoOpen], Open),
        (Open, Event::AudioCloseRequest) => (&[ScoClose], Open),
        (Open, Event::TransportOpened { .. }) => (&[DropTransport], Open),
        (Open, Event::TransportClosed) => (&[TransportClose], Init),
        (Open, Event::TransportData(_)) => (&[Feed], Open),
        (Open, Event::DiscoveryResult(_)) => (&[RecordService], Open),
        (Open, Event::AudioConnectionRequest) => (&[ScoConnRequest], Open),
        (Open, Event::AudioConnected(_)) => (&[ScoConnOpen], Open),
        (Open, Event::AudioDisconnected) => (&[ScoConnClose], Open),
        (Open, Event::AudioDataReady) => (&[ScoDataReady], Open),
        (Open, Event::AudioReceived(_)) => (&[ScoIncoming], Open),
        (Open, Event::AudioWrite(_)) => (&[ScoWrite], Open),
        (Open, Event::SendCommand(_)) => (&[SendAt], Open),
        (Open, Event::TimerExpired(_)) => (&[TimerFired], Open),

        (Closing, Event::Deregister) => (&[StartDeregister], Closing),
        (Closing, Event::OpenRequest) => (&[OpenBusy], Closing),
        (Closing, Event::TransportOpened { .. }) => (&[DropTransport], Closing),
        (Closing, Event::TransportClosed) => (&[TransportClose], Init),
        (Closing, Event::AudioConnectionRequest) => (&[ScoConnRequest], Closing),
        (Closing, Event::AudioConnected(_)) => (&[ScoConnOpen], Closing),
        (Closing, Event::AudioDisconnected) => (&[ScoConnClose], Closing),
        (Closing, Event::SendCommand(_)) => (&[RejectCommand], Closing),
        (Closing, Event::TimerExpired(_)) => (&[TimerFired], Closing),

        (state, _) => (&[], state),
    }
}

/// One Hands-Free link to one Audio Gateway.
#[derive(Debug)]
pub struct Session {
    peer: PeerAddress,
    epoch: u32,
    state: SessionState,
    role: Role,
    link: LinkInfo,
    at: AtEngine,
    sco: ScoController,
    collision_timer: Timer,
    inbound_pending: bool,
    /// An outbound RFCOMM connect has been requested and not yet resolved.
    outbound_pending: bool,
    /// Closes requested for links this session did not keep.
    stray_closes: u32,
    deregistering: bool,
    close_after_audio: bool,
    close_reason: Option<CloseReason>,
    terminated: bool,
}

impl Session {
    pub fn new(peer: PeerAddress, config: &Config) -> Self {
        Self {
            peer,
            epoch: 0,
            state: SessionState::Init,
            role: Role::Initiator,
            link: LinkInfo::new(config.client.features),
            at: AtEngine::new(config.client.parser_capacity),
            sco: ScoController::new(),
            collision_timer: Timer::new(TimerKind::Collision),
            inbound_pending: false,
            outbound_pending: false,
            stray_closes: 0,
            deregistering: false,
            close_after_audio: false,
            close_reason: None,
            terminated: false,
        }
    }

    /// Tag timers with `epoch` so expiries from an earlier session for the
    /// same peer are told apart.
    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    pub fn at(&self) -> &AtEngine {
        &self.at
    }

    pub fn sco(&self) -> &ScoController {
        &self.sco
    }

    /// Deregistration finished; the session must not be used again.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Nothing open, pending or armed.
    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Init
            && !self.inbound_pending
            && !self.outbound_pending
            && self.stray_closes == 0
            && !self.collision_timer.is_armed()
    }

    /// Run one event to completion and return the requested effects.
    pub fn dispatch(&mut self, config: &Config, event: Event) -> Vec<Effect> {
        let mut out = Outbox::for_session(self.peer, self.epoch);
        let mut posted = VecDeque::from([event]);

        while let Some(event) = posted.pop_front() {
            if self.terminated {
                debug!("{} terminated, dropping {}", self.peer, event.name());
                break;
            }
            if matches!(event, Event::TransportClosed) && self.absorb_close() {
                continue;
            }
            let (actions, next) = transition(self.state, &event);
            if actions.is_empty() {
                debug!("{} ignoring {} in {:?}", self.peer, event.name(), self.state);
                continue;
            }
            if next != self.state {
                debug!(
                    "{} {:?} --{}--> {:?}",
                    self.peer,
                    self.state,
                    event.name(),
                    next
                );
                self.state = next;
            }
            for action in actions {
                self.run(config, *action, &event, &mut out, &mut posted);
                while let Some(upcall) = out.take_upcall() {
                    self.upcall(config, upcall, &mut out, &mut posted);
                }
            }
        }
        out.into_effects()
    }

    fn upcall(
        &mut self,
        config: &Config,
        upcall: Upcall,
        out: &mut Outbox,
        posted: &mut VecDeque<Event>,
    ) {
        match upcall {
            Upcall::Close(reason) => {
                self.close_reason.get_or_insert(reason);
                posted.push_back(Event::CloseRequest);
            }
            Upcall::SendCommand(request) => {
                if self.state == SessionState::Closing {
                    debug!("{} closing, dropping {}", self.peer, request.command.as_str());
                    return;
                }
                let mut ctx = AtContext {
                    link: &mut self.link,
                    config: &config.client,
                    out,
                };
                self.at.send(&mut ctx, request, Origin::Internal);
            }
            Upcall::CodecNegotiationFailed => {
                if self.sco.negotiation_failed() == AudioOutcome::Closed {
                    out.notify(ClientEvent::AudioClosed { peer: self.peer });
                }
            }
        }
    }

    fn run(
        &mut self,
        config: &Config,
        action: Action,
        event: &Event,
        out: &mut Outbox,
        posted: &mut VecDeque<Event>,
    ) {
        let peer = self.peer;
        match action {
            Action::StartOpen => {
                self.role = Role::Initiator;
                if self.inbound_pending {
                    posted.push_back(Event::IncomingConnection);
                } else {
                    out.transport(TransportRequest::StopServer);
                    out.discovery(DiscoveryRequest::Discover { peer });
                }
            }
            Action::NoteInbound => self.inbound_pending = true,
            Action::ClearInbound => {
                self.inbound_pending = false;
                self.outbound_pending = false;
            }
            Action::HandleCollision => {
                info!("Inbound connection from {} while opening, deferring", peer);
                self.inbound_pending = true;
                out.discovery(DiscoveryRequest::Cancel { peer });
                out.transport(TransportRequest::StartServer);
                self.collision_timer
                    .arm(out, config.client.collision_timeout());
            }
            Action::DoTransportOpen => {
                let Event::DiscoveryResult(Some(record)) = event else {
                    return;
                };
                self.record_service(record);
                let channel = if record.channel == 0 {
                    config.transport.default_ag_channel
                } else {
                    record.channel
                };
                debug!("Opening RFCOMM channel {} on {}", channel, peer);
                self.outbound_pending = true;
                out.transport(TransportRequest::Open { peer, channel });
            }
            Action::TransportOpen | Action::AcceptorOpen => {
                let Event::TransportOpened { handle, direction } = event else {
                    return;
                };
                if action == Action::AcceptorOpen {
                    self.role = Role::Acceptor;
                    self.collision_timer.disarm(out);
                    self.inbound_pending = false;
                    out.discovery(DiscoveryRequest::Discover { peer });
                } else if *direction == Direction::Inbound {
                    self.role = Role::Acceptor;
                } else {
                    self.outbound_pending = false;
                }
                self.link.handle = Some(*handle);
                info!("Connected to {} as {:?}", peer, self.role);
                out.notify(ClientEvent::Opened {
                    peer,
                    role: self.role,
                });
                let mut ctx = AtContext {
                    link: &mut self.link,
                    config: &config.client,
                    out,
                };
                self.at.start_slc(&mut ctx);
            }
            Action::DropTransport => {
                let Event::TransportOpened { handle, direction } = event else {
                    return;
                };
                if *direction == Direction::Outbound {
                    self.outbound_pending = false;
                }
                if self.state == SessionState::Closing && self.link.handle.is_none() {
                    // The close was waiting on this connect.
                    self.link.handle = Some(*handle);
                } else {
                    self.stray_closes += 1;
                }
                info!("Dropping unwanted {:?} link {:?} to {}", direction, handle, peer);
                out.transport(TransportRequest::Close { handle: *handle });
            }
            Action::TransportFail => {
                warn!("Transport to {} failed", peer);
                self.outbound_pending = false;
                self.reset_link(out);
                out.transport(TransportRequest::StartServer);
                out.notify(ClientEvent::OpenFailed {
                    peer,
                    reason: OpenFailure::TransportFailed,
                });
            }
            Action::DiscoveryFail => {
                warn!("Service discovery on {} failed", peer);
                out.transport(TransportRequest::StartServer);
                out.notify(ClientEvent::OpenFailed {
                    peer,
                    reason: OpenFailure::DiscoveryFailed,
                });
            }
            Action::OpenBusy => out.notify(ClientEvent::OpenFailed {
                peer,
                reason: OpenFailure::ResourceExhausted,
            }),
            Action::RecordService => {
                if let Event::DiscoveryResult(Some(record)) = event {
                    self.record_service(record);
                }
            }
            Action::DoClose => self.do_close(out, posted),
            Action::StartClose => {
                self.close_reason.get_or_insert(CloseReason::Requested);
                self.quiesce(out);
                self.sco_signal(out, AudioSignal::Shutdown);
                if self.sco.state() == ScoState::ShuttingDown {
                    debug!("Closing {} after audio teardown", peer);
                    self.close_after_audio = true;
                } else {
                    self.do_close(out, posted);
                }
            }
            Action::StartDeregister => {
                self.deregistering = true;
                self.close_reason.get_or_insert(CloseReason::Deregistered);
            }
            Action::Terminate => {
                self.collision_timer.disarm(out);
                self.terminated = true;
            }
            Action::TransportClose => {
                self.outbound_pending = false;
                self.reset_link(out);
                let reason = self.close_reason.take().unwrap_or(CloseReason::TransportLost);
                info!("Disconnected from {}: {}", peer, reason);
                out.notify(ClientEvent::Closed { peer, reason });
                if self.deregistering {
                    self.terminated = true;
                } else {
                    out.transport(TransportRequest::StartServer);
                }
            }
            Action::Feed => {
                if let Event::TransportData(bytes) = event {
                    let mut ctx = AtContext {
                        link: &mut self.link,
                        config: &config.client,
                        out,
                    };
                    self.at.feed(&mut ctx, bytes);
                }
            }
            Action::SendAt => {
                if let Event::SendCommand(request) = event {
                    let mut ctx = AtContext {
                        link: &mut self.link,
                        config: &config.client,
                        out,
                    };
                    self.at.send(&mut ctx, request.clone(), Origin::Application);
                }
            }
            Action::RejectCommand => {
                if let Event::SendCommand(request) = event {
                    debug!("No link to {} for {}", peer, request.command.as_str());
                    out.notify(ClientEvent::Result {
                        peer,
                        command: Some(request.command),
                        kind: ResultKind::Error,
                        code: 0,
                    });
                }
            }
            Action::TimerFired => {
                let Event::TimerExpired(token) = event else {
                    return;
                };
                if token.epoch != self.epoch {
                    debug!("Ignoring {:?} timer from an earlier session", token.kind);
                    return;
                }
                match token.kind {
                    TimerKind::Collision => {
                        if self.collision_timer.expire(token) && self.state == SessionState::Init {
                            info!("Retrying deferred open to {}", peer);
                            posted.push_back(Event::OpenRequest);
                        }
                    }
                    TimerKind::Response | TimerKind::Hold => {
                        let mut ctx = AtContext {
                            link: &mut self.link,
                            config: &config.client,
                            out,
                        };
                        self.at.on_timer(&mut ctx, token);
                    }
                }
            }
            Action::ScoListen => {
                self.sco_signal(out, AudioSignal::Listen);
            }
            Action::ScoOpen => {
                if !self.link.service_connected {
                    warn!("Audio requested before service level connection to {}", peer);
                    return;
                }
                self.sco_signal(out, AudioSignal::Open);
            }
            Action::ScoClose => {
                self.sco_signal(out, AudioSignal::Close);
            }
            Action::ScoConnRequest => {
                let mut ctx = AudioContext {
                    link: &self.link,
                    out,
                };
                self.sco.connection_request(&mut ctx);
            }
            Action::ScoConnOpen => {
                if let Event::AudioConnected(info) = event {
                    if let AudioOutcome::Opened(codec) =
                        self.sco_signal(out, AudioSignal::LinkUp(*info))
                    {
                        out.notify(ClientEvent::AudioOpened { peer, codec });
                    }
                }
            }
            Action::ScoConnClose => {
                if self.sco_signal(out, AudioSignal::LinkDown) == AudioOutcome::Closed {
                    info!("Audio to {} closed", peer);
                    out.notify(ClientEvent::AudioClosed { peer });
                    if self.close_after_audio {
                        self.close_after_audio = false;
                        self.do_close(out, posted);
                    }
                }
            }
            Action::ScoDataReady => {
                self.sco_signal(out, AudioSignal::DataReady);
            }
            Action::ScoIncoming => {
                if let Event::AudioReceived(data) = event {
                    let mut ctx = AudioContext {
                        link: &self.link,
                        out,
                    };
                    self.sco.receive(&mut ctx, data);
                }
            }
            Action::ScoWrite => {
                if let Event::AudioWrite(data) = event {
                    let mut ctx = AudioContext {
                        link: &self.link,
                        out,
                    };
                    self.sco.write(&mut ctx, data);
                }
            }
        }
    }

    fn sco_signal(&mut self, out: &mut Outbox, signal: AudioSignal) -> AudioOutcome {
        let mut ctx = AudioContext {
            link: &self.link,
            out,
        };
        self.sco.signal(&mut ctx, signal)
    }

    fn do_close(&mut self, out: &mut Outbox, posted: &mut VecDeque<Event>) {
        self.close_reason.get_or_insert(CloseReason::Requested);
        self.quiesce(out);
        match self.link.handle {
            Some(handle) => out.transport(TransportRequest::Close { handle }),
            None if self.outbound_pending => {
                debug!("Closing {} once the pending connect resolves", self.peer);
            }
            None => {
                out.discovery(DiscoveryRequest::Cancel { peer: self.peer });
                posted.push_back(Event::TransportClosed);
            }
        }
    }

    /// Stop all command traffic and timers on the way out.
    fn quiesce(&mut self, out: &mut Outbox) {
        self.at.reset(out);
        self.collision_timer.disarm(out);
        self.inbound_pending = false;
    }

    /// Swallow a close that belongs to a link this session dropped, or to
    /// an abandoned connect while another link is up.
    fn absorb_close(&mut self) -> bool {
        if self.stray_closes > 0 {
            self.stray_closes -= 1;
            debug!("{} dropped link closed", self.peer);
            return true;
        }
        if self.outbound_pending && self.state == SessionState::Open {
            self.outbound_pending = false;
            debug!("{} abandoned connect failed", self.peer);
            return true;
        }
        false
    }

    fn record_service(&mut self, record: &ServiceRecord) {
        self.link.peer_version = record.version;
        if !self.link.service_connected {
            // Superseded by +BRSF during the handshake.
            self.link.peer_features = record.peer_features();
        }
        debug!(
            "{} profile version {:#06x}, features {:?}",
            self.peer, record.version, self.link.peer_features
        );
    }

    /// Return every sub-state to its defaults.
    fn reset_link(&mut self, out: &mut Outbox) {
        self.link.reset();
        self.at.reset(out);
        self.sco.reset(out);
        self.collision_timer.disarm(out);
        self.inbound_pending = false;
        self.close_after_audio = false;
    }
}
