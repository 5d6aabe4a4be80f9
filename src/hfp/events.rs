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

//! Inbound session events and outbound application events.

use serde::Serialize;

use super::at::{AtCommand, AtRequest, Indicator};
use super::audio::AudioLinkInfo;
use super::constants::{CallHoldFeatures, PeerFeatures};
use super::effects::TimerToken;
use super::error::{CloseReason, OpenFailure};
use super::types::{Codec, Direction, PeerAddress, Role, ServiceRecord, TransportHandle, VolumeTarget};

/// Everything a session reacts to, from the application, the transports,
/// discovery and the timer service.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Profile is going away; tear down and do not listen again.
    Deregister,
    /// Application asks for an outbound link.
    OpenRequest,
    /// Application asks to close the link.
    CloseRequest,
    /// Application asks for an audio link.
    AudioOpenRequest,
    /// Application asks to drop the audio link.
    AudioCloseRequest,
    /// Transport saw an inbound connection attempt that is not open yet.
    IncomingConnection,
    /// RFCOMM link is up.
    TransportOpened {
        handle: TransportHandle,
        direction: Direction,
    },
    /// RFCOMM link went down or could not be established.
    TransportClosed,
    /// Bytes read from the RFCOMM link.
    TransportData(Vec<u8>),
    /// Result of service discovery; `None` when discovery failed.
    DiscoveryResult(Option<ServiceRecord>),
    /// Remote side wants to create a synchronous link.
    AudioConnectionRequest,
    /// Synchronous link is up.
    AudioConnected(AudioLinkInfo),
    /// Synchronous link is down.
    AudioDisconnected,
    /// Audio transport can take another outgoing frame.
    AudioDataReady,
    /// Frame received on the synchronous link.
    AudioReceived(Vec<u8>),
    /// Encoded audio to send to the AG.
    AudioWrite(Vec<u8>),
    /// Application AT command.
    SendCommand(AtRequest),
    /// A timer started by this session expired.
    TimerExpired(TimerToken),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Deregister => "deregister",
            Event::OpenRequest => "open_request",
            Event::CloseRequest => "close_request",
            Event::AudioOpenRequest => "audio_open_request",
            Event::AudioCloseRequest => "audio_close_request",
            Event::IncomingConnection => "incoming_connection",
            Event::TransportOpened { .. } => "transport_opened",
            Event::TransportClosed => "transport_closed",
            Event::TransportData(_) => "transport_data",
            Event::DiscoveryResult(_) => "discovery_result",
            Event::AudioConnectionRequest => "audio_connection_request",
            Event::AudioConnected(_) => "audio_connected",
            Event::AudioDisconnected => "audio_disconnected",
            Event::AudioDataReady => "audio_data_ready",
            Event::AudioReceived(_) => "audio_received",
            Event::AudioWrite(_) => "audio_write",
            Event::SendCommand(_) => "send_command",
            Event::TimerExpired(_) => "timer_expired",
        }
    }
}

/// Terminal result classes reported by the AG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Ok,
    Error,
    CmeError,
    NoCarrier,
    Busy,
    NoAnswer,
    Delayed,
    Blacklisted,
}

impl ResultKind {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultKind::Ok)
    }
}

/// One `+CLCC` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallEntry {
    pub index: u32,
    pub incoming: bool,
    pub status: u32,
    pub mode: u32,
    pub multiparty: bool,
    pub number: Option<String>,
    pub number_type: Option<u32>,
}

/// Events delivered to the application's event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Enabled,
    Registered,
    Deregistered,
    Opened {
        peer: PeerAddress,
        role: Role,
    },
    OpenFailed {
        peer: PeerAddress,
        reason: OpenFailure,
    },
    Closed {
        peer: PeerAddress,
        reason: CloseReason,
    },
    ServiceConnected {
        peer: PeerAddress,
        peer_features: PeerFeatures,
        call_hold: CallHoldFeatures,
    },
    AudioOpened {
        peer: PeerAddress,
        codec: Codec,
    },
    AudioClosed {
        peer: PeerAddress,
    },
    IndicatorChanged {
        peer: PeerAddress,
        indicator: Indicator,
        value: u32,
    },
    /// Terminal result for an application command, or an unsolicited one
    /// when `command` is `None`.
    Result {
        peer: PeerAddress,
        command: Option<AtCommand>,
        kind: ResultKind,
        code: u32,
    },
    Ring {
        peer: PeerAddress,
    },
    InbandRing {
        peer: PeerAddress,
        enabled: bool,
    },
    VoiceRecognition {
        peer: PeerAddress,
        active: bool,
    },
    Volume {
        peer: PeerAddress,
        target: VolumeTarget,
        level: u32,
    },
    OperatorName {
        peer: PeerAddress,
        name: String,
    },
    CallerId {
        peer: PeerAddress,
        number: String,
    },
    CallWaiting {
        peer: PeerAddress,
        number: String,
    },
    CurrentCall {
        peer: PeerAddress,
        call: CallEntry,
    },
    SubscriberNumber {
        peer: PeerAddress,
        number: String,
        service: u32,
    },
    ResponseAndHold {
        peer: PeerAddress,
        status: u32,
    },
    VoiceTagNumber {
        peer: PeerAddress,
        number: String,
    },
    /// The audio transport can take `len` more bytes.
    AudioRequested {
        peer: PeerAddress,
        len: usize,
    },
    /// Codec payload received from the AG.
    AudioReceived {
        peer: PeerAddress,
        data: Vec<u8>,
    },
}

impl ClientEvent {
    /// Peer the event belongs to, if any.
    pub fn peer(&self) -> Option<PeerAddress> {
        match self {
            ClientEvent::Enabled | ClientEvent::Registered | ClientEvent::Deregistered => None,
            ClientEvent::Opened { peer, .. }
            | ClientEvent::OpenFailed { peer, .. }
            | ClientEvent::Closed { peer, .. }
            | ClientEvent::ServiceConnected { peer, .. }
            | ClientEvent::AudioOpened { peer, .. }
            | ClientEvent::AudioClosed { peer }
            | ClientEvent::IndicatorChanged { peer, .. }
            | ClientEvent::Result { peer, .. }
            | ClientEvent::Ring { peer }
            | ClientEvent::InbandRing { peer, .. }
            | ClientEvent::VoiceRecognition { peer, .. }
            | ClientEvent::Volume { peer, .. }
            | ClientEvent::OperatorName { peer, .. }
            | ClientEvent::CallerId { peer, .. }
            | ClientEvent::CallWaiting { peer, .. }
            | ClientEvent::CurrentCall { peer, .. }
            | ClientEvent::SubscriberNumber { peer, .. }
            | ClientEvent::ResponseAndHold { peer, .. }
            | ClientEvent::VoiceTagNumber { peer, .. }
            | ClientEvent::AudioRequested { peer, .. }
            | ClientEvent::AudioReceived { peer, .. } => Some(*peer),
        }
    }
}
