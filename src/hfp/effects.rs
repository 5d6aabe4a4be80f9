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

//! Side effects requested by the core.
//!
//! The core never performs I/O. Every entry point returns the list of
//! requests for the caller's event loop to carry out; completions come
//! back later as [`Event`](super::events::Event)s.

use std::collections::VecDeque;
use std::time::Duration;

use super::at::AtRequest;
use super::audio::LinkParams;
use super::error::CloseReason;
use super::events::ClientEvent;
use super::types::{PeerAddress, TransportHandle};

/// One request for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Transport(TransportRequest),
    Discovery(DiscoveryRequest),
    Audio(AudioRequest),
    Timer(TimerRequest),
    Notify(ClientEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Open { peer: PeerAddress, channel: u8 },
    Close { handle: TransportHandle },
    Write { handle: TransportHandle, data: Vec<u8> },
    /// Listen for inbound RFCOMM connections.
    StartServer,
    StopServer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryRequest {
    Discover { peer: PeerAddress },
    Cancel { peer: PeerAddress },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioRequest {
    /// Program link parameters ahead of `Create`.
    Configure { peer: PeerAddress, params: LinkParams },
    /// Create a synchronous link, or a listener when not the originator.
    Create { peer: PeerAddress, originator: bool },
    Accept { peer: PeerAddress, params: LinkParams },
    Reject { peer: PeerAddress },
    Remove { peer: PeerAddress },
    WriteFrame { peer: PeerAddress, frame: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerRequest {
    Start { token: TimerToken, after: Duration },
    Cancel { token: TimerToken },
}

/// Timers owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Response,
    Hold,
    Collision,
}

/// Identifies one arming of one timer.
///
/// The generation changes on every re-arm so an expiry that raced a cancel
/// is recognised as stale. The epoch names the session instance, so an
/// expiry left over from an earlier session for the same peer never
/// matches a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub peer: PeerAddress,
    pub kind: TimerKind,
    pub epoch: u32,
    pub generation: u32,
}

/// Requests from the AT engine or audio controller to the session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Upcall {
    Close(CloseReason),
    SendCommand(AtRequest),
    CodecNegotiationFailed,
}

/// Collects effects and upcalls while one event runs to completion.
#[derive(Debug)]
pub(crate) struct Outbox {
    peer: PeerAddress,
    epoch: u32,
    effects: Vec<Effect>,
    upcalls: VecDeque<Upcall>,
}

impl Outbox {
    pub fn new(peer: PeerAddress) -> Self {
        Self::for_session(peer, 0)
    }

    pub fn for_session(peer: PeerAddress, epoch: u32) -> Self {
        Self {
            peer,
            epoch,
            effects: Vec::new(),
            upcalls: VecDeque::new(),
        }
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn notify(&mut self, event: ClientEvent) {
        self.effects.push(Effect::Notify(event));
    }

    pub fn transport(&mut self, request: TransportRequest) {
        self.effects.push(Effect::Transport(request));
    }

    pub fn discovery(&mut self, request: DiscoveryRequest) {
        self.effects.push(Effect::Discovery(request));
    }

    pub fn audio(&mut self, request: AudioRequest) {
        self.effects.push(Effect::Audio(request));
    }

    pub fn upcall(&mut self, upcall: Upcall) {
        self.upcalls.push_back(upcall);
    }

    pub fn take_upcall(&mut self) -> Option<Upcall> {
        self.upcalls.pop_front()
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

/// Single-shot timer bookkeeping for one kind of timer.
#[derive(Debug)]
pub(crate) struct Timer {
    kind: TimerKind,
    generation: u32,
    armed: bool,
}

impl Timer {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            armed: false,
        }
    }

    fn token(&self, out: &Outbox) -> TimerToken {
        TimerToken {
            peer: out.peer(),
            kind: self.kind,
            epoch: out.epoch(),
            generation: self.generation,
        }
    }

    /// Start the timer, cancelling a running one first.
    pub fn arm(&mut self, out: &mut Outbox, after: Duration) {
        self.disarm(out);
        self.generation = self.generation.wrapping_add(1);
        self.armed = true;
        out.push(Effect::Timer(TimerRequest::Start {
            token: self.token(out),
            after,
        }));
    }

    pub fn disarm(&mut self, out: &mut Outbox) {
        if self.armed {
            self.armed = false;
            out.push(Effect::Timer(TimerRequest::Cancel {
                token: self.token(out),
            }));
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Consume an expiry. Returns false for stale or cancelled tokens.
    pub fn expire(&mut self, token: &TimerToken) -> bool {
        if self.armed && token.kind == self.kind && token.generation == self.generation {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerAddress = PeerAddress::new([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_rearm_cancels_previous() {
        let mut out = Outbox::new(PEER);
        let mut timer = Timer::new(TimerKind::Response);
        timer.arm(&mut out, Duration::from_millis(10));
        timer.arm(&mut out, Duration::from_millis(10));
        let effects = out.into_effects();
        assert_eq!(effects.len(), 3);
        assert!(matches!(
            effects[1],
            Effect::Timer(TimerRequest::Cancel { token }) if token.generation == 1
        ));
        assert!(matches!(
            effects[2],
            Effect::Timer(TimerRequest::Start { token, .. }) if token.generation == 2
        ));
    }

    #[test]
    fn test_stale_expiry_ignored() {
        let mut out = Outbox::new(PEER);
        let mut timer = Timer::new(TimerKind::Hold);
        timer.arm(&mut out, Duration::from_millis(10));
        let stale = TimerToken {
            peer: PEER,
            kind: TimerKind::Hold,
            epoch: 0,
            generation: 1,
        };
        timer.arm(&mut out, Duration::from_millis(10));
        assert!(!timer.expire(&stale));
        let current = TimerToken {
            generation: 2,
            ..stale
        };
        assert!(timer.expire(&current));
        assert!(!timer.is_armed());
        assert!(!timer.expire(&current));
    }

    #[test]
    fn test_token_carries_session_epoch() {
        let mut out = Outbox::for_session(PEER, 7);
        let mut timer = Timer::new(TimerKind::Response);
        timer.arm(&mut out, Duration::from_millis(10));
        assert!(matches!(
            out.into_effects()[0],
            Effect::Timer(TimerRequest::Start { token, .. })
                if token.epoch == 7 && token.generation == 1
        ));
    }

    #[test]
    fn test_disarm_idle_timer_is_silent() {
        let mut out = Outbox::new(PEER);
        let mut timer = Timer::new(TimerKind::Collision);
        timer.disarm(&mut out);
        assert!(out.into_effects().is_empty());
    }
}
