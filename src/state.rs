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

//! Link status board.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::hfp::{ClientEvent, Codec, Indicator, PeerAddress, Role};

/// Connection status of one Audio Gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    ServiceConnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::ServiceConnected => "Service connected",
        }
    }
}

/// What is known about one peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub status: ConnectionStatus,
    pub role: Option<Role>,
    pub audio: Option<Codec>,
    pub operator: Option<String>,
    pub indicators: BTreeMap<Indicator, u32>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            role: None,
            audio: None,
            operator: None,
            indicators: BTreeMap::new(),
        }
    }
}

/// Shared status, updated from application events.
#[derive(Debug, Default)]
pub struct LinkBoard {
    /// Whether the profile is registered.
    pub registered: RwLock<bool>,

    /// Per-peer status.
    pub links: RwLock<BTreeMap<PeerAddress, LinkStatus>>,
}

impl LinkBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fold one application event into the board.
    pub fn apply(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Registered => *self.registered.write() = true,
            ClientEvent::Deregistered => {
                *self.registered.write() = false;
                self.links.write().clear();
            }
            ClientEvent::Opened { peer, role } => {
                let mut links = self.links.write();
                let link = links.entry(*peer).or_default();
                *link = LinkStatus {
                    status: ConnectionStatus::Connected,
                    role: Some(*role),
                    ..LinkStatus::default()
                };
            }
            ClientEvent::Closed { peer, .. } | ClientEvent::OpenFailed { peer, .. } => {
                self.links.write().remove(peer);
            }
            ClientEvent::ServiceConnected { peer, .. } => {
                self.update(peer, |link| link.status = ConnectionStatus::ServiceConnected);
            }
            ClientEvent::AudioOpened { peer, codec } => {
                self.update(peer, |link| link.audio = Some(*codec));
            }
            ClientEvent::AudioClosed { peer } => self.update(peer, |link| link.audio = None),
            ClientEvent::IndicatorChanged {
                peer,
                indicator,
                value,
            } => self.update(peer, |link| {
                link.indicators.insert(*indicator, *value);
            }),
            ClientEvent::OperatorName { peer, name } => {
                self.update(peer, |link| link.operator = Some(name.clone()));
            }
            _ => {}
        }
    }

    fn update(&self, peer: &PeerAddress, f: impl FnOnce(&mut LinkStatus)) {
        if let Some(link) = self.links.write().get_mut(peer) {
            f(link);
        }
    }

    pub fn is_registered(&self) -> bool {
        *self.registered.read()
    }

    pub fn get_status(&self, peer: &PeerAddress) -> ConnectionStatus {
        self.links
            .read()
            .get(peer)
            .map_or(ConnectionStatus::Disconnected, |l| l.status)
    }

    pub fn get_link(&self, peer: &PeerAddress) -> Option<LinkStatus> {
        self.links.read().get(peer).cloned()
    }

    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.links.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerAddress = PeerAddress::new([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_link_lifecycle() {
        let board = LinkBoard::new();
        board.apply(&ClientEvent::Opened {
            peer: PEER,
            role: Role::Initiator,
        });
        assert_eq!(board.get_status(&PEER), ConnectionStatus::Connected);

        board.apply(&ClientEvent::IndicatorChanged {
            peer: PEER,
            indicator: Indicator::Signal,
            value: 4,
        });
        board.apply(&ClientEvent::AudioOpened {
            peer: PEER,
            codec: Codec::Msbc,
        });
        let link = board.get_link(&PEER).unwrap();
        assert_eq!(link.indicators.get(&Indicator::Signal), Some(&4));
        assert_eq!(link.audio, Some(Codec::Msbc));

        board.apply(&ClientEvent::Closed {
            peer: PEER,
            reason: crate::hfp::CloseReason::TransportLost,
        });
        assert_eq!(board.get_status(&PEER), ConnectionStatus::Disconnected);
        assert!(board.connected_peers().is_empty());
    }

    #[test]
    fn test_events_for_unknown_peer_ignored() {
        let board = LinkBoard::new();
        board.apply(&ClientEvent::OperatorName {
            peer: PEER,
            name: "Carrier".into(),
        });
        assert!(board.get_link(&PEER).is_none());
    }
}
