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

//! Session registry.
//!
//! Routes events to the session for each peer, creates sessions on demand
//! and keeps the RFCOMM server running while no session holds it closed.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hfp::at::AtRequest;
use crate::hfp::effects::{AudioRequest, Effect, TransportRequest};
use crate::hfp::error::OpenFailure;
use crate::hfp::events::{ClientEvent, Event, ResultKind};
use crate::hfp::session::{Session, SessionState};
use crate::hfp::types::{Direction, PeerAddress};

/// Hands-Free client: one session per connected Audio Gateway.
#[derive(Debug)]
pub struct HandsFreeClient {
    config: Config,
    sessions: HashMap<PeerAddress, Session>,
    /// Peers that asked for the server to stay down.
    server_holds: HashSet<PeerAddress>,
    /// Epoch for the next session, so timers never cross session lifetimes.
    next_epoch: u32,
    enabled: bool,
    registered: bool,
}

impl HandsFreeClient {
    pub fn new(mut config: Config) -> Self {
        config.client = config.client.validated();
        Self {
            config,
            sessions: HashMap::new(),
            server_holds: HashSet::new(),
            next_epoch: 1,
            enabled: false,
            registered: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn session(&self, peer: &PeerAddress) -> Option<&Session> {
        self.sessions.get(peer)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn state(&self, peer: &PeerAddress) -> SessionState {
        self.sessions
            .get(peer)
            .map_or(SessionState::Init, Session::state)
    }

    pub fn enable(&mut self) -> Vec<Effect> {
        self.enabled = true;
        info!("Hands-Free client enabled");
        vec![Effect::Notify(ClientEvent::Enabled)]
    }

    /// Start accepting connections from Audio Gateways.
    pub fn register(&mut self) -> Vec<Effect> {
        if !self.enabled {
            warn!("Register before enable ignored");
            return Vec::new();
        }
        if self.registered {
            return Vec::new();
        }
        self.registered = true;
        let mut effects = Vec::new();
        if self.server_holds.is_empty() {
            effects.push(Effect::Transport(TransportRequest::StartServer));
        }
        effects.push(Effect::Notify(ClientEvent::Registered));
        effects
    }

    /// Tear down every session and stop listening.
    pub fn deregister(&mut self) -> Vec<Effect> {
        if !self.registered {
            return Vec::new();
        }
        self.registered = false;
        let peers: Vec<PeerAddress> = self.sessions.keys().copied().collect();
        let mut effects = Vec::new();
        for peer in peers {
            effects.extend(self.dispatch(peer, Event::Deregister));
        }
        self.server_holds.clear();
        effects.push(Effect::Transport(TransportRequest::StopServer));
        effects.push(Effect::Notify(ClientEvent::Deregistered));
        info!("Hands-Free client deregistered");
        effects
    }

    pub fn open(&mut self, peer: PeerAddress) -> Vec<Effect> {
        self.dispatch(peer, Event::OpenRequest)
    }

    pub fn close(&mut self, peer: PeerAddress) -> Vec<Effect> {
        self.dispatch(peer, Event::CloseRequest)
    }

    pub fn open_audio(&mut self, peer: PeerAddress) -> Vec<Effect> {
        self.dispatch(peer, Event::AudioOpenRequest)
    }

    pub fn close_audio(&mut self, peer: PeerAddress) -> Vec<Effect> {
        self.dispatch(peer, Event::AudioCloseRequest)
    }

    pub fn send(&mut self, peer: PeerAddress, request: AtRequest) -> Vec<Effect> {
        self.dispatch(peer, Event::SendCommand(request))
    }

    pub fn feed(&mut self, peer: PeerAddress, bytes: &[u8]) -> Vec<Effect> {
        self.dispatch(peer, Event::TransportData(bytes.to_vec()))
    }

    pub fn write_audio(&mut self, peer: PeerAddress, data: &[u8]) -> Vec<Effect> {
        self.dispatch(peer, Event::AudioWrite(data.to_vec()))
    }

    /// Route one event to the session for `peer`.
    pub fn dispatch(&mut self, peer: PeerAddress, event: Event) -> Vec<Effect> {
        if !self.sessions.contains_key(&peer) {
            if !self.registered {
                return self.refuse(peer, event, "not registered");
            }
            // An outbound link with no session was abandoned by its opener.
            let creates = matches!(
                event,
                Event::OpenRequest
                    | Event::IncomingConnection
                    | Event::TransportOpened {
                        direction: Direction::Inbound,
                        ..
                    }
            );
            if !creates {
                return self.refuse(peer, event, "no session");
            }
            if self.sessions.len() >= self.config.client.max_sessions {
                warn!(
                    "Session limit {} reached, refusing {}",
                    self.config.client.max_sessions, peer
                );
                return self.refuse(peer, event, "session limit");
            }
            let epoch = self.next_epoch;
            self.next_epoch = self.next_epoch.wrapping_add(1);
            debug!("New session {} for {}", epoch, peer);
            self.sessions
                .insert(peer, Session::new(peer, &self.config).with_epoch(epoch));
        }

        let Some(session) = self.sessions.get_mut(&peer) else {
            return Vec::new();
        };
        let effects = session.dispatch(&self.config, event);
        let finished = session.is_terminated() || session.is_idle();
        let mut routed = self.route(peer, effects);

        if finished {
            debug!("Dropping session for {}", peer);
            self.sessions.remove(&peer);
            if self.server_holds.remove(&peer) && self.server_holds.is_empty() && self.registered {
                routed.push(Effect::Transport(TransportRequest::StartServer));
            }
        }
        routed
    }

    /// Answer an event no session will handle.
    fn refuse(&mut self, peer: PeerAddress, event: Event, why: &str) -> Vec<Effect> {
        debug!("Dropping {} for {}: {}", event.name(), peer, why);
        match event {
            Event::OpenRequest => vec![Effect::Notify(ClientEvent::OpenFailed {
                peer,
                reason: OpenFailure::ResourceExhausted,
            })],
            Event::TransportOpened { handle, .. } => {
                vec![Effect::Transport(TransportRequest::Close { handle })]
            }
            Event::AudioConnectionRequest => vec![Effect::Audio(AudioRequest::Reject { peer })],
            Event::SendCommand(request) => vec![Effect::Notify(ClientEvent::Result {
                peer,
                command: Some(request.command),
                kind: ResultKind::Error,
                code: 0,
            })],
            _ => Vec::new(),
        }
    }

    /// Fold per-session server requests into one shared server.
    fn route(&mut self, peer: PeerAddress, effects: Vec<Effect>) -> Vec<Effect> {
        let mut routed = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::Transport(TransportRequest::StopServer) => {
                    let first = self.server_holds.is_empty();
                    self.server_holds.insert(peer);
                    if first && self.registered {
                        routed.push(effect);
                    }
                }
                Effect::Transport(TransportRequest::StartServer) => {
                    if self.server_holds.remove(&peer)
                        && self.server_holds.is_empty()
                        && self.registered
                    {
                        routed.push(effect);
                    }
                }
                other => routed.push(other),
            }
        }
        routed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::at::AtCommand;
    use crate::hfp::effects::DiscoveryRequest;

    const AG1: PeerAddress = PeerAddress::new([0x11, 0x11, 0x11, 0x11, 0x11, 0x11]);
    const AG2: PeerAddress = PeerAddress::new([0x22, 0x22, 0x22, 0x22, 0x22, 0x22]);
    const AG3: PeerAddress = PeerAddress::new([0x33, 0x33, 0x33, 0x33, 0x33, 0x33]);

    fn registered() -> HandsFreeClient {
        let mut client = HandsFreeClient::new(Config::default());
        client.enable();
        let effects = client.register();
        assert_eq!(
            effects,
            vec![
                Effect::Transport(TransportRequest::StartServer),
                Effect::Notify(ClientEvent::Registered)
            ]
        );
        client
    }

    fn server_requests(effects: &[Effect]) -> Vec<TransportRequest> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Transport(r @ (TransportRequest::StartServer | TransportRequest::StopServer)) => {
                    Some(r.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_register_requires_enable() {
        let mut client = HandsFreeClient::new(Config::default());
        assert!(client.register().is_empty());
        assert!(!client.is_registered());
    }

    #[test]
    fn test_server_held_once_for_two_opens() {
        let mut client = registered();
        assert_eq!(
            server_requests(&client.open(AG1)),
            vec![TransportRequest::StopServer]
        );
        assert!(server_requests(&client.open(AG2)).is_empty());

        assert!(server_requests(&client.dispatch(AG1, Event::DiscoveryResult(None))).is_empty());
        assert_eq!(
            server_requests(&client.dispatch(AG2, Event::DiscoveryResult(None))),
            vec![TransportRequest::StartServer]
        );
        assert!(client.session(&AG1).is_none());
        assert!(client.session(&AG2).is_none());
    }

    #[test]
    fn test_session_limit() {
        let mut client = registered();
        client.open(AG1);
        client.open(AG2);
        let effects = client.open(AG3);
        assert_eq!(
            effects,
            vec![Effect::Notify(ClientEvent::OpenFailed {
                peer: AG3,
                reason: OpenFailure::ResourceExhausted
            })]
        );
        assert!(client.session(&AG3).is_none());
    }

    #[test]
    fn test_unknown_peer_command_rejected() {
        let mut client = registered();
        let effects = client.send(AG1, AtRequest::new(AtCommand::Answer));
        assert_eq!(
            effects,
            vec![Effect::Notify(ClientEvent::Result {
                peer: AG1,
                command: Some(AtCommand::Answer),
                kind: ResultKind::Error,
                code: 0
            })]
        );
    }

    #[test]
    fn test_deregister_stops_server_and_cancels_open() {
        let mut client = registered();
        client.open(AG1);
        let effects = client.deregister();
        assert!(effects.contains(&Effect::Discovery(DiscoveryRequest::Cancel { peer: AG1 })));
        assert!(effects.contains(&Effect::Transport(TransportRequest::StopServer)));
        assert_eq!(effects.last(), Some(&Effect::Notify(ClientEvent::Deregistered)));
        assert!(client.session(&AG1).is_none());
        assert!(client.open(AG1).iter().all(|e| matches!(
            e,
            Effect::Notify(ClientEvent::OpenFailed { .. })
        )));
    }
}
