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

//! Collaborators the runtime drives.
//!
//! Calls are fire-and-forget. Completions and failures that happen later
//! come back through the runtime inbox as [`Event`](crate::hfp::Event)s.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::hfp::audio::LinkParams;
use crate::hfp::{ClientEvent, PeerAddress, TransportHandle};

/// RFCOMM-style byte transport.
pub trait Transport: Send {
    fn open(&mut self, peer: PeerAddress, channel: u8) -> Result<()>;
    fn close(&mut self, handle: TransportHandle) -> Result<()>;
    fn write(&mut self, handle: TransportHandle, data: &[u8]) -> Result<()>;
    /// Accept inbound connections from Audio Gateways.
    fn start_server(&mut self) -> Result<()>;
    fn stop_server(&mut self) -> Result<()>;
}

/// SDP-style service discovery.
pub trait Discovery: Send {
    fn discover(&mut self, peer: PeerAddress) -> Result<()>;
    fn cancel(&mut self, peer: PeerAddress);
}

/// SCO/eSCO audio transport.
pub trait AudioLink: Send {
    fn configure(&mut self, peer: PeerAddress, params: &LinkParams) -> Result<()>;
    fn create(&mut self, peer: PeerAddress, originator: bool) -> Result<()>;
    fn accept(&mut self, peer: PeerAddress, params: &LinkParams) -> Result<()>;
    fn reject(&mut self, peer: PeerAddress);
    fn remove(&mut self, peer: PeerAddress);
    fn write_frame(&mut self, peer: PeerAddress, frame: &[u8]) -> Result<()>;
}

/// Receives application events.
pub trait EventSink: Send {
    fn deliver(&mut self, event: ClientEvent);
}

/// Forwards application events to a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&mut self, event: ClientEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}
