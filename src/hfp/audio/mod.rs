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

//! SCO/eSCO audio link control.
//!
//! The controller tracks one synchronous link per session. The two
//! "then" states remember a close or open requested while the opposite
//! operation is still in flight.

mod packetizer;
mod params;

pub use packetizer::{CvsdFramer, MsbcFramer, MsbcReassembler, Packetizer};
pub use params::{
    select, AirMode, AudioLinkInfo, LinkParams, LinkType, PacketTypes, Retransmission,
    ESCO_CVSD_S3, ESCO_CVSD_S4, ESCO_MSBC_T2, SCO_CVSD,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hfp::at::{AtCommand, AtRequest};
use crate::hfp::constants::version;
use crate::hfp::effects::{AudioRequest, Outbox, Upcall};
use crate::hfp::events::ClientEvent;
use crate::hfp::session::LinkInfo;
use crate::hfp::types::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoState {
    Shutdown,
    Listening,
    Opening,
    OpeningThenClose,
    Open,
    Closing,
    ClosingThenOpen,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSignal {
    Listen,
    Open,
    Close,
    Shutdown,
    LinkUp(AudioLinkInfo),
    LinkDown,
    DataReady,
}

/// What a signal did to the audio path, for the session to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    Unchanged,
    Opened(Codec),
    Closed,
    /// eSCO failed; a plain SCO link is being created instead.
    Retrying,
}

/// What the audio transport currently holds for this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Idle,
    Listening,
    Originating,
    Connected,
}

pub(crate) struct AudioContext<'a> {
    pub link: &'a LinkInfo,
    pub out: &'a mut Outbox,
}

#[derive(Debug)]
pub struct ScoController {
    state: ScoState,
    slot: Slot,
    link: Option<AudioLinkInfo>,
    retry_as_sco: bool,
    packetizer: Option<Packetizer>,
    reassembler: MsbcReassembler,
}

impl Default for ScoController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoController {
    pub fn new() -> Self {
        Self {
            state: ScoState::Shutdown,
            slot: Slot::Idle,
            link: None,
            retry_as_sco: false,
            packetizer: None,
            reassembler: MsbcReassembler::new(),
        }
    }

    pub fn state(&self) -> ScoState {
        self.state
    }

    pub fn link(&self) -> Option<&AudioLinkInfo> {
        self.link.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state == ScoState::Open
    }

    fn set_state(&mut self, next: ScoState) {
        if next != self.state {
            debug!("SCO {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub(crate) fn signal(&mut self, ctx: &mut AudioContext<'_>, signal: AudioSignal) -> AudioOutcome {
        use AudioSignal as S;
        use ScoState::*;

        match (self.state, signal) {
            (Shutdown, S::Listen) => {
                self.create(ctx, false);
                self.set_state(Listening);
            }

            (Listening, S::Open) => {
                if ctx.link.codec_negotiation() {
                    // The AG selects a codec and creates the link.
                    ctx.out.upcall(Upcall::SendCommand(AtRequest::new(AtCommand::Bcc)));
                } else {
                    self.remove(ctx);
                    self.create(ctx, true);
                }
                self.set_state(Opening);
            }
            (Listening, S::Shutdown) => {
                self.remove(ctx);
                self.set_state(Shutdown);
            }
            (Listening, S::LinkUp(info)) => return self.link_up(ctx, info),
            (Listening, S::LinkDown) => {
                self.slot = Slot::Idle;
                self.create(ctx, false);
            }

            (Opening, S::Close) => self.set_state(OpeningThenClose),
            (Opening | OpeningThenClose, S::Shutdown) => {
                if self.slot == Slot::Listening {
                    self.remove(ctx);
                    self.set_state(Shutdown);
                } else {
                    self.set_state(ShuttingDown);
                }
            }
            (Opening, S::LinkUp(info)) => return self.link_up(ctx, info),
            (Opening, S::LinkDown) => {
                self.slot = Slot::Idle;
                self.clear_link();
                if self.retry_as_sco && ctx.link.service_connected {
                    info!("eSCO to {} failed, retrying as SCO", ctx.out.peer());
                    self.create(ctx, true);
                    return AudioOutcome::Retrying;
                }
                self.retry_as_sco = false;
                self.create(ctx, false);
                self.set_state(Listening);
                return AudioOutcome::Closed;
            }

            (OpeningThenClose, S::Open) => self.set_state(Opening),
            (OpeningThenClose, S::LinkUp(info)) => {
                self.link = Some(info);
                self.slot = Slot::Connected;
                self.retry_as_sco = false;
                self.remove(ctx);
                self.set_state(Closing);
            }

            (Open, S::Close) => {
                self.flush(ctx);
                self.remove(ctx);
                self.set_state(Closing);
            }
            (Open, S::Shutdown) => {
                self.flush(ctx);
                self.remove(ctx);
                self.set_state(ShuttingDown);
            }
            (Open, S::DataReady) => {
                let len = self.link.map_or(0, |l| l.out_frame_len());
                let peer = ctx.out.peer();
                ctx.out.notify(ClientEvent::AudioRequested { peer, len });
            }

            (Closing, S::Open) => self.set_state(ClosingThenOpen),
            (ClosingThenOpen, S::Close) => self.set_state(Closing),
            (Closing | ClosingThenOpen, S::Shutdown) => self.set_state(ShuttingDown),

            (Open | Closing | OpeningThenClose, S::LinkDown) => {
                self.slot = Slot::Idle;
                self.clear_link();
                self.retry_as_sco = false;
                self.create(ctx, false);
                self.set_state(Listening);
                return AudioOutcome::Closed;
            }
            (ClosingThenOpen, S::LinkDown) => {
                self.slot = Slot::Idle;
                self.clear_link();
                self.create(ctx, true);
                self.set_state(Opening);
                return AudioOutcome::Closed;
            }

            (ShuttingDown, S::LinkUp(info)) => {
                self.link = Some(info);
                self.slot = Slot::Connected;
                self.remove(ctx);
            }
            (ShuttingDown, S::LinkDown) => {
                self.slot = Slot::Idle;
                self.clear_link();
                self.retry_as_sco = false;
                self.set_state(Shutdown);
                return AudioOutcome::Closed;
            }

            (state, signal) => debug!("SCO ignoring {:?} in {:?}", signal, state),
        }
        AudioOutcome::Unchanged
    }

    fn link_up(&mut self, ctx: &mut AudioContext<'_>, info: AudioLinkInfo) -> AudioOutcome {
        let codec = ctx.link.codec;
        info!(
            "Audio link to {} up: {:?}, {:?}, {} byte frames",
            ctx.out.peer(),
            info.link_type,
            codec,
            info.out_frame_len()
        );
        self.link = Some(info);
        self.slot = Slot::Connected;
        self.retry_as_sco = false;
        self.packetizer = Some(Packetizer::new(codec, info.out_frame_len()));
        self.reassembler.reset();
        self.set_state(ScoState::Open);
        AudioOutcome::Opened(codec)
    }

    /// Answer an inbound synchronous connection request.
    pub(crate) fn connection_request(&mut self, ctx: &mut AudioContext<'_>) {
        let peer = ctx.out.peer();
        if self.state != ScoState::Listening && self.state != ScoState::Opening {
            warn!("Rejecting audio connection from {} in {:?}", peer, self.state);
            ctx.out.audio(AudioRequest::Reject { peer });
            return;
        }
        let requested = if ctx.link.peer_version >= version::HFP_1_5 {
            LinkType::Esco
        } else {
            LinkType::Sco
        };
        let params = select(requested, ctx.link.codec, ctx.link.esco_s4());
        debug!("Accepting audio connection from {} with {}", peer, params.name);
        self.retry_as_sco = false;
        ctx.out.audio(AudioRequest::Accept { peer, params });
        self.set_state(ScoState::Opening);
    }

    /// Negotiation for an AG-created link failed; stop waiting for it.
    pub(crate) fn negotiation_failed(&mut self) -> AudioOutcome {
        match self.state {
            ScoState::Opening | ScoState::OpeningThenClose if self.slot == Slot::Listening => {
                self.set_state(ScoState::Listening);
                AudioOutcome::Closed
            }
            _ => AudioOutcome::Unchanged,
        }
    }

    /// Frame and send outgoing audio. Dropped unless the link is open.
    pub(crate) fn write(&mut self, ctx: &mut AudioContext<'_>, data: &[u8]) {
        if self.state != ScoState::Open {
            debug!("Audio not open, dropping {} bytes", data.len());
            return;
        }
        let Some(packetizer) = self.packetizer.as_mut() else {
            return;
        };
        let peer = ctx.out.peer();
        for frame in packetizer.push(data) {
            ctx.out.audio(AudioRequest::WriteFrame { peer, frame });
        }
    }

    /// Send the last partial frame ahead of a link removal.
    fn flush(&mut self, ctx: &mut AudioContext<'_>) {
        let Some(frame) = self.packetizer.as_mut().and_then(Packetizer::flush) else {
            return;
        };
        let peer = ctx.out.peer();
        ctx.out.audio(AudioRequest::WriteFrame { peer, frame });
    }

    /// Deliver received audio to the application.
    pub(crate) fn receive(&mut self, ctx: &mut AudioContext<'_>, data: &[u8]) {
        if self.state != ScoState::Open {
            return;
        }
        let peer = ctx.out.peer();
        match ctx.link.codec {
            Codec::Msbc => {
                for frame in self.reassembler.push(data) {
                    ctx.out.notify(ClientEvent::AudioReceived { peer, data: frame });
                }
            }
            Codec::Cvsd => ctx.out.notify(ClientEvent::AudioReceived {
                peer,
                data: data.to_vec(),
            }),
        }
    }

    /// Drop everything immediately, for session teardown.
    pub(crate) fn reset(&mut self, out: &mut Outbox) {
        if self.slot != Slot::Idle {
            out.audio(AudioRequest::Remove { peer: out.peer() });
        }
        *self = Self::new();
    }

    fn create(&mut self, ctx: &mut AudioContext<'_>, originator: bool) {
        let peer = ctx.out.peer();
        if !originator {
            self.retry_as_sco = false;
            ctx.out.audio(AudioRequest::Create {
                peer,
                originator: false,
            });
            self.slot = Slot::Listening;
            return;
        }

        let esco = ctx.link.peer_version >= version::HFP_1_5 && !self.retry_as_sco;
        let requested = if esco { LinkType::Esco } else { LinkType::Sco };
        let params = select(requested, ctx.link.codec, ctx.link.esco_s4());
        self.retry_as_sco = esco && params.sco_fallback;
        info!("Creating {} link to {}", params.name, peer);
        ctx.out.audio(AudioRequest::Configure { peer, params });
        ctx.out.audio(AudioRequest::Create {
            peer,
            originator: true,
        });
        self.slot = Slot::Originating;
    }

    fn remove(&mut self, ctx: &mut AudioContext<'_>) {
        match self.slot {
            Slot::Idle => {}
            Slot::Listening => {
                // Listeners go away without a link-down.
                ctx.out.audio(AudioRequest::Remove {
                    peer: ctx.out.peer(),
                });
                self.slot = Slot::Idle;
            }
            Slot::Originating | Slot::Connected => ctx.out.audio(AudioRequest::Remove {
                peer: ctx.out.peer(),
            }),
        }
    }

    fn clear_link(&mut self) {
        self.link = None;
        self.packetizer = None;
        self.reassembler.reset();
    }
}
