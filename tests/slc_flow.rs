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

//! Registry-level link scenarios against a hand-driven Audio Gateway.

use hfp_client::config::Config;
use hfp_client::hfp::audio::{AirMode, AudioLinkInfo, LinkType};
use hfp_client::hfp::{
    AtCommand, AtRequest, AudioRequest, CloseReason, Codec, Direction, Effect, Indicator,
    ResultKind, Role, ServiceRecord, SessionState, TimerKind, TimerRequest, TimerToken,
    TransportHandle, TransportRequest,
};
use hfp_client::{ClientEvent, Event, HandsFreeClient, PeerAddress};

const AG: PeerAddress = PeerAddress::new([0x5c, 0xf3, 0x70, 0x12, 0x34, 0x56]);
const HANDLE: TransportHandle = TransportHandle(3);

/// AG feature bits with and without codec negotiation.
const AG_FEATURES: u32 = 0x3ef;
const AG_FEATURES_CVSD_ONLY: u32 = 0x1ef;

const CIND_RANGES: &str = "\r\n+CIND: (\"service\",(0,1)),(\"call\",(0,1)),(\"callsetup\",(0,3)),(\"callheld\",(0,2)),(\"signal\",(0,5)),(\"roam\",(0,1)),(\"battchg\",(0,5))\r\n\r\nOK\r\n";

struct Rig {
    client: HandsFreeClient,
    ag_features: u32,
    events: Vec<ClientEvent>,
    effects: Vec<Effect>,
    unanswered: Vec<String>,
    sent: Vec<String>,
}

impl Rig {
    fn new(ag_features: u32) -> Self {
        let mut client = HandsFreeClient::new(Config::default());
        client.enable();
        client.register();
        Self {
            client,
            ag_features,
            events: Vec::new(),
            effects: Vec::new(),
            unanswered: Vec::new(),
            sent: Vec::new(),
        }
    }

    fn record(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        for effect in &effects {
            match effect {
                Effect::Transport(TransportRequest::Write { data, .. }) => {
                    let line = String::from_utf8_lossy(data).trim_end().to_string();
                    self.sent.push(line.clone());
                    self.unanswered.push(line);
                }
                Effect::Notify(event) => self.events.push(event.clone()),
                _ => {}
            }
        }
        self.effects.extend(effects.iter().cloned());
        effects
    }

    fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        let effects = self.client.dispatch(AG, event);
        self.record(effects)
    }

    fn feed(&mut self, text: &str) -> Vec<Effect> {
        self.dispatch(Event::TransportData(text.as_bytes().to_vec()))
    }

    fn answer(&self, command: &str) -> String {
        match command {
            c if c.starts_with("AT+BRSF=") => format!("\r\n+BRSF: {}\r\n\r\nOK\r\n", self.ag_features),
            "AT+CIND=?" => CIND_RANGES.to_string(),
            "AT+CIND?" => "\r\n+CIND: 1,0,0,0,4,0,3\r\n\r\nOK\r\n".to_string(),
            "AT+CHLD=?" => "\r\n+CHLD: (0,1,2,3)\r\n\r\nOK\r\n".to_string(),
            "AT+COPS?" => "\r\n+COPS: 0,0,\"Carrier\"\r\n\r\nOK\r\n".to_string(),
            _ => "\r\nOK\r\n".to_string(),
        }
    }

    /// Answer every command until the client goes quiet.
    fn pump(&mut self) {
        while !self.unanswered.is_empty() {
            let pending = std::mem::take(&mut self.unanswered);
            for command in pending {
                let reply = self.answer(&command);
                self.feed(&reply);
            }
        }
    }

    fn discover(&mut self) {
        let effects = self.client.open(AG);
        self.record(effects);
        self.dispatch(Event::DiscoveryResult(Some(ServiceRecord {
            channel: 2,
            version: 0x0107,
            features: 0x3f,
        })));
    }

    fn open_outbound(&mut self) {
        self.discover();
        self.dispatch(Event::TransportOpened {
            handle: HANDLE,
            direction: Direction::Outbound,
        });
    }

    fn connect(&mut self) {
        self.open_outbound();
        self.pump();
        assert_eq!(self.client.state(&AG), SessionState::Open);
    }

    fn count(&self, pred: impl Fn(&ClientEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

fn timer(effects: &[Effect], kind: TimerKind) -> TimerToken {
    effects
        .iter()
        .find_map(|e| match e {
            Effect::Timer(TimerRequest::Start { token, .. }) if token.kind == kind => Some(*token),
            _ => None,
        })
        .expect("timer started")
}

fn response_timer(effects: &[Effect]) -> TimerToken {
    timer(effects, TimerKind::Response)
}

fn has_write(effects: &[Effect]) -> bool {
    effects
        .iter()
        .any(|e| matches!(e, Effect::Transport(TransportRequest::Write { .. })))
}

fn cvsd_link() -> AudioLinkInfo {
    AudioLinkInfo {
        link_type: LinkType::Esco,
        air_mode: AirMode::Cvsd,
        tx_packet_len: 30,
        rx_packet_len: 30,
    }
}

#[test]
fn test_full_service_level_connection() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.connect();

    assert_eq!(
        &rig.sent[..7],
        &[
            format!("AT+BRSF={}", Config::default().client.features.bits()),
            "AT+BAC=1,2".to_string(),
            "AT+CIND=?".to_string(),
            "AT+CIND?".to_string(),
            "AT+CMER=3,0,0,1".to_string(),
            "AT+CHLD=?".to_string(),
            "AT+BIA=1,1,1,1,1,1,1".to_string(),
        ]
    );
    assert!(rig.sent.contains(&"AT+COPS?".to_string()));

    assert_eq!(
        rig.count(|e| matches!(e, ClientEvent::ServiceConnected { .. })),
        1
    );
    assert!(rig.events.contains(&ClientEvent::Opened {
        peer: AG,
        role: Role::Initiator
    }));
    assert!(rig.events.contains(&ClientEvent::IndicatorChanged {
        peer: AG,
        indicator: Indicator::Signal,
        value: 4
    }));
    assert!(rig.events.contains(&ClientEvent::OperatorName {
        peer: AG,
        name: "Carrier".to_string()
    }));
    assert!(rig.effects.contains(&Effect::Transport(TransportRequest::Open {
        peer: AG,
        channel: 2
    })));

    let session = rig.client.session(&AG).expect("session");
    assert!(session.link().service_connected);
    assert!(session.at().current_command().is_none());
    assert_eq!(session.at().queued(), 0);
}

#[test]
fn test_collision_adopts_inbound_link() {
    let mut rig = Rig::new(AG_FEATURES);
    let effects = rig.client.open(AG);
    rig.record(effects);

    let effects = rig.dispatch(Event::IncomingConnection);
    assert!(effects.contains(&Effect::Transport(TransportRequest::StartServer)));
    assert_eq!(rig.client.state(&AG), SessionState::Init);
    assert!(rig.client.session(&AG).is_some());

    rig.dispatch(Event::TransportOpened {
        handle: HANDLE,
        direction: Direction::Inbound,
    });
    rig.dispatch(Event::DiscoveryResult(Some(ServiceRecord::default())));
    rig.pump();

    assert_eq!(rig.client.state(&AG), SessionState::Open);
    assert_eq!(
        rig.client.session(&AG).map(|s| s.role()),
        Some(Role::Acceptor)
    );
    assert!(!rig
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Transport(TransportRequest::Open { .. }))));
    assert_eq!(
        rig.count(|e| matches!(e, ClientEvent::ServiceConnected { .. })),
        1
    );
}

#[test]
fn test_response_timeout_closes_once() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.connect();

    let effects = rig.client.send(AG, AtRequest::new(AtCommand::Answer));
    let token = response_timer(&effects);
    rig.record(effects);
    let effects = rig.client.send(AG, AtRequest::new(AtCommand::HangUp));
    assert!(!has_write(&effects));

    let effects = rig.dispatch(Event::TimerExpired(token));
    assert!(effects.contains(&Effect::Transport(TransportRequest::Close { handle: HANDLE })));
    assert!(!has_write(&effects));
    assert_eq!(rig.client.state(&AG), SessionState::Closing);

    // Late OK from the AG goes nowhere.
    assert!(!has_write(&rig.feed("\r\nOK\r\n")));

    rig.dispatch(Event::TransportClosed);
    assert_eq!(
        rig.count(|e| matches!(e, ClientEvent::Closed { .. })),
        1
    );
    assert!(rig.events.contains(&ClientEvent::Closed {
        peer: AG,
        reason: CloseReason::ResponseTimeout
    }));
    assert!(rig.client.session(&AG).is_none());
    assert!(rig.dispatch(Event::TimerExpired(token)).is_empty());
}

#[test]
fn test_malformed_lines_do_not_stall() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.connect();
    rig.events.clear();

    rig.feed("\r\n+CIEV: 5,x\r\n\r\n+BOGUS: 1\r\n\r\n+CIEV: 5,2\r\n");
    assert_eq!(
        rig.events,
        vec![ClientEvent::IndicatorChanged {
            peer: AG,
            indicator: Indicator::Signal,
            value: 2
        }]
    );

    let effects = rig.client.send(AG, AtRequest::new(AtCommand::Clcc));
    rig.record(effects);
    rig.feed("\r\n+CLCC: 1,x\r\n\r\nOK\r\n");
    assert!(rig.events.contains(&ClientEvent::Result {
        peer: AG,
        command: Some(AtCommand::Clcc),
        kind: ResultKind::Ok,
        code: 0
    }));
}

#[test]
fn test_close_waits_for_audio_teardown() {
    let mut rig = Rig::new(AG_FEATURES_CVSD_ONLY);
    rig.connect();

    let effects = rig.client.open_audio(AG);
    assert!(effects.contains(&Effect::Audio(AudioRequest::Create {
        peer: AG,
        originator: true
    })));
    rig.dispatch(Event::AudioConnected(cvsd_link()));
    assert!(rig.events.contains(&ClientEvent::AudioOpened {
        peer: AG,
        codec: Codec::Cvsd
    }));

    let effects = rig.client.close(AG);
    assert!(effects.contains(&Effect::Audio(AudioRequest::Remove { peer: AG })));
    assert!(!effects
        .iter()
        .any(|e| matches!(e, Effect::Transport(TransportRequest::Close { .. }))));

    let effects = rig.dispatch(Event::AudioDisconnected);
    let audio_closed = effects
        .iter()
        .position(|e| *e == Effect::Notify(ClientEvent::AudioClosed { peer: AG }))
        .expect("audio closed");
    let transport_close = effects
        .iter()
        .position(|e| *e == Effect::Transport(TransportRequest::Close { handle: HANDLE }))
        .expect("transport close");
    assert!(audio_closed < transport_close);

    rig.dispatch(Event::TransportClosed);
    assert!(rig.events.contains(&ClientEvent::Closed {
        peer: AG,
        reason: CloseReason::Requested
    }));
}

#[test]
fn test_chunking_does_not_change_outcome() {
    let mut whole = Rig::new(AG_FEATURES);
    whole.connect();

    for chunk in [1, 3, 11] {
        let mut split = Rig::new(AG_FEATURES);
        split.open_outbound();
        while !split.unanswered.is_empty() {
            let pending = std::mem::take(&mut split.unanswered);
            for command in pending {
                let reply = split.answer(&command);
                for piece in reply.as_bytes().chunks(chunk) {
                    split.dispatch(Event::TransportData(piece.to_vec()));
                }
            }
        }
        assert_eq!(split.sent, whole.sent, "chunk {chunk}");
        assert_eq!(split.events, whole.events, "chunk {chunk}");
    }
}

#[test]
fn test_close_drops_queued_commands_and_timers() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.connect();

    rig.feed("\r\n+BCS: 2\r\n");
    let effects = rig.feed("\r\nOK\r\n");
    let hold = timer(&effects, TimerKind::Hold);
    let effects = rig.client.send(AG, AtRequest::new(AtCommand::Clcc));
    assert!(!has_write(&effects));

    let effects = rig.client.close(AG);
    assert!(effects.contains(&Effect::Timer(TimerRequest::Cancel { token: hold })));
    assert!(effects.contains(&Effect::Transport(TransportRequest::Close { handle: HANDLE })));
    assert_eq!(rig.client.state(&AG), SessionState::Closing);
    assert_eq!(rig.client.session(&AG).map(|s| s.at().queued()), Some(0));

    // The hold expiry raced the cancel and must not release AT+CLCC.
    let effects = rig.dispatch(Event::TimerExpired(hold));
    assert!(!has_write(&effects));
    assert!(!effects
        .iter()
        .any(|e| matches!(e, Effect::Timer(TimerRequest::Start { .. }))));

    rig.dispatch(Event::TransportClosed);
    assert!(rig.events.contains(&ClientEvent::Closed {
        peer: AG,
        reason: CloseReason::Requested
    }));
    assert!(!rig.events.iter().any(|e| matches!(
        e,
        ClientEvent::Result {
            command: Some(AtCommand::Clcc),
            kind: ResultKind::Ok,
            ..
        }
    )));
    assert!(rig.client.session(&AG).is_none());
}

#[test]
fn test_close_during_connect_drops_late_link() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.discover();
    assert!(rig.effects.contains(&Effect::Transport(TransportRequest::Open {
        peer: AG,
        channel: 2
    })));

    let effects = rig.client.close(AG);
    rig.record(effects);
    assert_eq!(rig.client.state(&AG), SessionState::Closing);
    assert_eq!(rig.count(|e| matches!(e, ClientEvent::Closed { .. })), 0);

    let effects = rig.dispatch(Event::TransportOpened {
        handle: HANDLE,
        direction: Direction::Outbound,
    });
    assert_eq!(
        effects,
        vec![Effect::Transport(TransportRequest::Close { handle: HANDLE })]
    );

    rig.dispatch(Event::TransportClosed);
    assert!(rig.events.contains(&ClientEvent::Closed {
        peer: AG,
        reason: CloseReason::Requested
    }));
    assert_eq!(rig.count(|e| matches!(e, ClientEvent::Opened { .. })), 0);
    assert!(rig.sent.is_empty());
    assert!(rig.client.session(&AG).is_none());

    // An outbound link nobody is waiting for is closed, not adopted.
    let effects = rig.dispatch(Event::TransportOpened {
        handle: TransportHandle(4),
        direction: Direction::Outbound,
    });
    assert_eq!(
        effects,
        vec![Effect::Transport(TransportRequest::Close {
            handle: TransportHandle(4)
        })]
    );
    assert!(rig.client.session(&AG).is_none());
}

#[test]
fn test_close_during_connect_then_connect_fails() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.discover();
    rig.client.close(AG);
    assert_eq!(rig.client.state(&AG), SessionState::Closing);

    rig.dispatch(Event::TransportClosed);
    assert_eq!(
        rig.count(|e| *e
            == ClientEvent::Closed {
                peer: AG,
                reason: CloseReason::Requested
            }),
        1
    );
    assert!(rig.client.session(&AG).is_none());
}

#[test]
fn test_timer_from_previous_session_is_ignored() {
    let mut rig = Rig::new(AG_FEATURES);
    rig.connect();
    let effects = rig.client.send(AG, AtRequest::new(AtCommand::Answer));
    let stale = response_timer(&effects);
    rig.record(effects);
    rig.dispatch(Event::TransportClosed);
    assert!(rig.client.session(&AG).is_none());

    rig.unanswered.clear();
    rig.connect();
    let effects = rig.client.send(AG, AtRequest::new(AtCommand::Answer));
    let fresh = response_timer(&effects);
    rig.record(effects);
    assert_ne!(stale.epoch, fresh.epoch);

    assert!(rig.dispatch(Event::TimerExpired(stale)).is_empty());
    assert_eq!(rig.client.state(&AG), SessionState::Open);

    let effects = rig.dispatch(Event::TimerExpired(fresh));
    assert!(effects.contains(&Effect::Transport(TransportRequest::Close { handle: HANDLE })));
    assert_eq!(rig.client.state(&AG), SessionState::Closing);
}
