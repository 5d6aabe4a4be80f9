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

//! AT protocol engine.
//!
//! Frames the RFCOMM byte stream into CRLF-terminated result lines, runs
//! the service level connection handshake and keeps at most one command
//! outstanding, queueing the rest in submission order.

mod command;
mod indicators;
mod parser;

pub use command::{AtCommand, AtRequest};
pub use indicators::{Indicator, IndicatorTable};
pub use parser::{parse_line, AtResponse, IndicatorRange, MatchOutcome};

use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::hfp::constants::{codec_id, version, LocalFeatures, PeerFeatures};
use crate::hfp::effects::{Outbox, Timer, TimerKind, TimerToken, TransportRequest, Upcall};
use crate::hfp::error::CloseReason;
use crate::hfp::events::{ClientEvent, ResultKind};
use crate::hfp::session::LinkInfo;
use crate::hfp::types::{Codec, VolumeTarget};

/// Who asked for a command; only application results are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Internal,
    Application,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    request: AtRequest,
    origin: Origin,
    wire: String,
}

/// Session state the engine reads and updates while handling one event.
pub(crate) struct AtContext<'a> {
    pub link: &'a mut LinkInfo,
    pub config: &'a ClientConfig,
    pub out: &'a mut Outbox,
}

/// Per-session AT engine state.
#[derive(Debug)]
pub struct AtEngine {
    buffer: Vec<u8>,
    capacity: usize,
    current: Option<PendingCommand>,
    queue: VecDeque<PendingCommand>,
    indicators: IndicatorTable,
    response_timer: Timer,
    hold_timer: Timer,
}

impl AtEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            current: None,
            queue: VecDeque::new(),
            indicators: IndicatorTable::new(),
            response_timer: Timer::new(TimerKind::Response),
            hold_timer: Timer::new(TimerKind::Hold),
        }
    }

    /// Command awaiting its terminal result.
    pub fn current_command(&self) -> Option<AtCommand> {
        self.current.as_ref().map(|c| c.request.command)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn indicators(&self) -> &IndicatorTable {
        &self.indicators
    }

    /// Drop buffered input, queued commands and timers.
    pub(crate) fn reset(&mut self, out: &mut Outbox) {
        self.buffer.clear();
        self.current = None;
        self.queue.clear();
        self.indicators.reset();
        self.response_timer.disarm(out);
        self.hold_timer.disarm(out);
    }

    /// Begin the service level connection with `AT+BRSF`.
    pub(crate) fn start_slc(&mut self, ctx: &mut AtContext<'_>) {
        let features = ctx.link.local_features.bits();
        self.send(ctx, AtRequest::with_value(AtCommand::Brsf, features), Origin::Internal);
    }

    /// Append received bytes and handle every complete line.
    pub(crate) fn feed(&mut self, ctx: &mut AtContext<'_>, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let room = self.capacity.saturating_sub(self.buffer.len());
            let take = room.min(bytes.len());
            if self.buffer.try_reserve(take).is_err() {
                warn!("Receive buffer allocation failed, dropping {} bytes", bytes.len());
                return;
            }
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            self.drain_lines(ctx);

            if self.buffer.len() >= self.capacity {
                error!(
                    "No line terminator within {} bytes from {}",
                    self.capacity,
                    ctx.out.peer()
                );
                self.buffer.clear();
                ctx.out.upcall(Upcall::Close(CloseReason::ParserOverflow));
                return;
            }
        }
    }

    fn drain_lines(&mut self, ctx: &mut AtContext<'_>) {
        let Some(end) = self.buffer.windows(2).rposition(|w| w == b"\r\n") else {
            return;
        };
        let complete: Vec<u8> = self.buffer.drain(..end + 2).collect();
        for unit in complete.split(|b| *b == b'\n') {
            let text = String::from_utf8_lossy(unit);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            debug!("AT recv: {}", line);
            match parse_line(line) {
                MatchOutcome::Parsed(response) => self.handle(ctx, response),
                MatchOutcome::Invalid(e) => warn!("Skipping malformed line {:?}: {}", line, e),
                MatchOutcome::NoMatch => warn!("No grammar for line {:?}", line),
            }
        }
    }

    /// Queue or transmit a command.
    pub(crate) fn send(&mut self, ctx: &mut AtContext<'_>, request: AtRequest, origin: Origin) {
        if origin == Origin::Application && !request.command.is_application_command() {
            warn!("Application may not send {}", request.command.as_str());
            self.reject(ctx, request.command);
            return;
        }
        let wire = match request.encode() {
            Ok(wire) => wire,
            Err(e) => {
                warn!("Cannot encode {}: {}", request.command.as_str(), e);
                if origin == Origin::Application {
                    self.reject(ctx, request.command);
                }
                return;
            }
        };
        let pending = PendingCommand {
            request,
            origin,
            wire,
        };

        // Handshake steps bypass commands the application queued early.
        let ready = self.current.is_none()
            && !self.hold_timer.is_armed()
            && if ctx.link.service_connected {
                self.queue.is_empty()
            } else {
                origin == Origin::Internal
            };
        if ready {
            self.transmit(ctx, pending);
        } else if self.queue.try_reserve(1).is_ok() {
            self.queue.push_back(pending);
        } else {
            warn!("Command queue allocation failed, dropping {}", pending.request.command.as_str());
        }
    }

    fn reject(&self, ctx: &mut AtContext<'_>, command: AtCommand) {
        let peer = ctx.out.peer();
        ctx.out.notify(ClientEvent::Result {
            peer,
            command: Some(command),
            kind: ResultKind::Error,
            code: 0,
        });
    }

    fn transmit(&mut self, ctx: &mut AtContext<'_>, pending: PendingCommand) {
        let Some(handle) = ctx.link.handle else {
            warn!("No transport to send {}", pending.request.command.as_str());
            return;
        };
        debug!("AT send: {}", pending.wire.trim_end());
        ctx.out.transport(TransportRequest::Write {
            handle,
            data: pending.wire.as_bytes().to_vec(),
        });
        self.response_timer
            .arm(ctx.out, ctx.config.response_timeout());
        self.current = Some(pending);
    }

    fn send_next(&mut self, ctx: &mut AtContext<'_>) {
        if self.current.is_some() || self.hold_timer.is_armed() {
            return;
        }
        if let Some(next) = self.queue.pop_front() {
            self.transmit(ctx, next);
        }
    }

    /// Handle a response or hold timer expiry.
    pub(crate) fn on_timer(&mut self, ctx: &mut AtContext<'_>, token: &TimerToken) {
        match token.kind {
            TimerKind::Response if self.response_timer.expire(token) => {
                if self.current_command() == Some(AtCommand::Cnum) {
                    // Some AGs never answer AT+CNUM.
                    debug!("AT+CNUM unanswered, treating as OK");
                    self.resolve(ctx, ResultKind::Ok, 0);
                    return;
                }
                error!(
                    "No response to {} from {}",
                    self.current_command().map_or("command", |c| c.as_str()),
                    ctx.out.peer()
                );
                self.current = None;
                self.queue.clear();
                ctx.out.upcall(Upcall::Close(CloseReason::ResponseTimeout));
            }
            TimerKind::Hold if self.hold_timer.expire(token) => self.send_next(ctx),
            _ => debug!("Ignoring stale {:?} timer", token.kind),
        }
    }

    fn handle(&mut self, ctx: &mut AtContext<'_>, response: AtResponse) {
        let peer = ctx.out.peer();
        match response {
            AtResponse::Final(kind, code) => self.resolve(ctx, kind, code),
            AtResponse::Ring => ctx.out.notify(ClientEvent::Ring { peer }),
            AtResponse::Brsf(bits) => {
                ctx.link.peer_features = PeerFeatures::from_bits_truncate(bits);
                debug!("Peer features {:?}", ctx.link.peer_features);
            }
            AtResponse::IndicatorRanges(ranges) => self.indicators.populate(&ranges),
            AtResponse::IndicatorValues(values) => {
                if !self.indicators.is_populated() {
                    warn!("Indicator values before declaration, ignoring");
                    return;
                }
                for (indicator, value) in self.indicators.translate_all(&values) {
                    ctx.out.notify(ClientEvent::IndicatorChanged {
                        peer,
                        indicator,
                        value,
                    });
                }
            }
            AtResponse::IndicatorEvent { position, value } => {
                if let Some((indicator, value)) = self.indicators.translate_event(position, value) {
                    ctx.out.notify(ClientEvent::IndicatorChanged {
                        peer,
                        indicator,
                        value,
                    });
                }
            }
            AtResponse::CallHold(features) => ctx.link.call_hold_features = features,
            AtResponse::CodecSelect(id) => self.select_codec(ctx, id),
            AtResponse::InbandRing(enabled) => {
                ctx.out.notify(ClientEvent::InbandRing { peer, enabled })
            }
            AtResponse::VoiceRecognition(active) => {
                ctx.out.notify(ClientEvent::VoiceRecognition { peer, active })
            }
            AtResponse::SpeakerGain(level) => ctx.out.notify(ClientEvent::Volume {
                peer,
                target: VolumeTarget::Speaker,
                level,
            }),
            AtResponse::MicrophoneGain(level) => ctx.out.notify(ClientEvent::Volume {
                peer,
                target: VolumeTarget::Microphone,
                level,
            }),
            AtResponse::CallWaiting(number) => {
                ctx.out.notify(ClientEvent::CallWaiting { peer, number })
            }
            AtResponse::CallerId(number) => ctx.out.notify(ClientEvent::CallerId { peer, number }),
            AtResponse::Operator(name) => {
                if !name.is_empty() {
                    ctx.out.notify(ClientEvent::OperatorName { peer, name });
                }
            }
            AtResponse::CurrentCall(call) => ctx.out.notify(ClientEvent::CurrentCall { peer, call }),
            AtResponse::SubscriberNumber { number, service } => {
                ctx.out.notify(ClientEvent::SubscriberNumber {
                    peer,
                    number,
                    service,
                })
            }
            AtResponse::ResponseAndHold(status) => {
                ctx.out.notify(ClientEvent::ResponseAndHold { peer, status })
            }
            AtResponse::VoiceTagNumber(number) => {
                ctx.out.notify(ClientEvent::VoiceTagNumber { peer, number })
            }
            AtResponse::Unknown(line) => debug!("Ignoring unsolicited {:?}", line),
        }
    }

    /// Resolve the outstanding command with a terminal result.
    fn resolve(&mut self, ctx: &mut AtContext<'_>, kind: ResultKind, code: u32) {
        let peer = ctx.out.peer();
        let Some(done) = self.current.take() else {
            if ctx.link.service_connected {
                ctx.out.notify(ClientEvent::Result {
                    peer,
                    command: None,
                    kind,
                    code,
                });
            } else {
                debug!("Unsolicited {:?} during setup", kind);
            }
            return;
        };
        self.response_timer.disarm(ctx.out);
        let command = done.request.command;

        if !ctx.link.service_connected {
            if kind.is_ok() {
                self.advance_slc(ctx, command);
            } else {
                warn!("SLC step {} failed: {:?}", command.as_str(), kind);
                ctx.out.upcall(Upcall::Close(CloseReason::SlcFailed));
            }
            return;
        }

        match (command, kind.is_ok()) {
            (AtCommand::Bcs, true) => {
                self.hold_timer.arm(ctx.out, ctx.config.hold_timeout());
                return;
            }
            (AtCommand::Bcs | AtCommand::Bcc, false) => {
                warn!("Codec connection refused: {:?}", kind);
                ctx.out.upcall(Upcall::CodecNegotiationFailed);
            }
            _ if !kind.is_ok() && done.origin == Origin::Internal => {
                debug!("{} rejected by AG: {:?}", command.as_str(), kind);
            }
            _ => {}
        }
        if done.origin == Origin::Application {
            ctx.out.notify(ClientEvent::Result {
                peer,
                command: Some(command),
                kind,
                code,
            });
        }
        self.send_next(ctx);
    }

    fn advance_slc(&mut self, ctx: &mut AtContext<'_>, completed: AtCommand) {
        let link = &*ctx.link;
        let next = match completed {
            AtCommand::Brsf if link.codec_negotiation() => {
                let mask = if ctx.config.msbc_enabled {
                    1 << codec_id::MSBC
                } else {
                    0
                };
                Some(AtRequest::with_value(AtCommand::Bac, mask))
            }
            AtCommand::Brsf | AtCommand::Bac => Some(AtRequest::new(AtCommand::CindTest)),
            AtCommand::CindTest => Some(AtRequest::new(AtCommand::CindRead)),
            AtCommand::CindRead => Some(AtRequest::with_value(AtCommand::Cmer, 1)),
            AtCommand::Cmer if link.three_way() => Some(AtRequest::new(AtCommand::ChldTest)),
            AtCommand::Cmer | AtCommand::ChldTest => None,
            other => {
                warn!("Unexpected {} during setup", other.as_str());
                ctx.out.upcall(Upcall::Close(CloseReason::SlcFailed));
                return;
            }
        };
        match next {
            Some(request) => self.send(ctx, request, Origin::Internal),
            None => self.service_connected(ctx),
        }
    }

    fn service_connected(&mut self, ctx: &mut AtContext<'_>) {
        ctx.link.service_connected = true;
        info!("Service level connection up with {}", ctx.out.peer());
        let peer = ctx.out.peer();
        ctx.out.notify(ClientEvent::ServiceConnected {
            peer,
            peer_features: ctx.link.peer_features,
            call_hold: ctx.link.call_hold_features,
        });

        let mut batch = Vec::new();
        if ctx.link.peer_version >= version::HFP_1_6 && self.indicators.is_populated() {
            batch.push(AtRequest::with_text(
                AtCommand::Bia,
                self.indicators.activation_list(),
            ));
        }
        if ctx.link.three_way() {
            batch.push(AtRequest::with_value(AtCommand::Ccwa, 1));
        }
        if ctx.link.peer_features.contains(PeerFeatures::EXTENDED_ERRORS) {
            batch.push(AtRequest::with_value(AtCommand::Cmee, 1));
        }
        batch.push(AtRequest::new(AtCommand::CopsFormat));
        batch.push(AtRequest::new(AtCommand::CopsRead));
        batch.push(AtRequest::new(AtCommand::BtrhRead));
        if ctx.link.local_features.contains(LocalFeatures::CLI) {
            batch.push(AtRequest::with_value(AtCommand::Clip, 1));
        }
        for request in batch {
            self.send(ctx, request, Origin::Internal);
        }
        self.send_next(ctx);
    }

    /// Answer an AG codec proposal.
    fn select_codec(&mut self, ctx: &mut AtContext<'_>, id: u32) {
        match Codec::from_id(id) {
            Some(codec) if codec == Codec::Cvsd || ctx.config.msbc_enabled => {
                debug!("Accepting codec {:?}", codec);
                ctx.link.codec = codec;
                self.send(ctx, AtRequest::with_value(AtCommand::Bcs, id), Origin::Internal);
            }
            _ => {
                warn!("Codec {} not supported, re-sending codec list", id);
                ctx.link.codec = Codec::Cvsd;
                let mask = if ctx.config.msbc_enabled {
                    1 << codec_id::MSBC
                } else {
                    0
                };
                self.send(ctx, AtRequest::with_value(AtCommand::Bac, mask), Origin::Internal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::constants::CallHoldFeatures;
    use crate::hfp::effects::{Effect, TimerRequest};
    use crate::hfp::types::{PeerAddress, TransportHandle};

    const PEER: PeerAddress = PeerAddress::new([0xa0, 0xb1, 0xc2, 0xd3, 0xe4, 0xf5]);
    const AG_FEATURES: u32 = 0x3ef;

    struct Harness {
        engine: AtEngine,
        link: LinkInfo,
        config: ClientConfig,
    }

    impl Harness {
        fn new() -> Self {
            let config = ClientConfig::default();
            let mut link = LinkInfo::new(config.features);
            link.handle = Some(TransportHandle(7));
            link.peer_version = version::HFP_1_7;
            Self {
                engine: AtEngine::new(config.parser_capacity),
                link,
                config,
            }
        }

        fn run(&mut self, f: impl FnOnce(&mut AtEngine, &mut AtContext<'_>)) -> Vec<Effect> {
            let mut out = Outbox::new(PEER);
            let mut ctx = AtContext {
                link: &mut self.link,
                config: &self.config,
                out: &mut out,
            };
            f(&mut self.engine, &mut ctx);
            out.into_effects()
        }

        fn feed(&mut self, text: &str) -> Vec<Effect> {
            self.run(|engine, ctx| engine.feed(ctx, text.as_bytes()))
        }

        fn send(&mut self, request: AtRequest) -> Vec<Effect> {
            self.run(|engine, ctx| engine.send(ctx, request, Origin::Application))
        }
    }

    fn writes(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Transport(TransportRequest::Write { data, .. }) => {
                    Some(String::from_utf8_lossy(data).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    fn notifications(effects: &[Effect]) -> Vec<ClientEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn timer_token(effects: &[Effect], kind: TimerKind) -> TimerToken {
        effects
            .iter()
            .rev()
            .find_map(|e| match e {
                Effect::Timer(TimerRequest::Start { token, .. }) if token.kind == kind => {
                    Some(*token)
                }
                _ => None,
            })
            .expect("timer started")
    }

    const CIND_RANGES: &str = "+CIND: (\"service\",(0,1)),(\"call\",(0,1)),(\"callsetup\",(0,3)),(\"callheld\",(0,2)),(\"signal\",(0,5)),(\"roam\",(0,1)),(\"battchg\",(0,5))\r\n";

    fn connect(h: &mut Harness) -> Vec<Effect> {
        let mut all = h.run(|engine, ctx| engine.start_slc(ctx));
        all.extend(h.feed(&format!("\r\n+BRSF: {AG_FEATURES}\r\n\r\nOK\r\n")));
        all.extend(h.feed("\r\nOK\r\n"));
        all.extend(h.feed(&format!("\r\n{CIND_RANGES}\r\nOK\r\n")));
        all.extend(h.feed("\r\n+CIND: 1,0,0,0,4,0,3\r\n\r\nOK\r\n"));
        all.extend(h.feed("\r\nOK\r\n"));
        all.extend(h.feed("\r\n+CHLD: (0,1,2,3)\r\n\r\nOK\r\n"));
        all
    }

    #[test]
    fn test_slc_sequence() {
        let mut h = Harness::new();
        let effects = connect(&mut h);
        assert_eq!(
            writes(&effects),
            vec![
                format!("AT+BRSF={}\r", h.config.features.bits()),
                "AT+BAC=1,2\r".to_string(),
                "AT+CIND=?\r".to_string(),
                "AT+CIND?\r".to_string(),
                "AT+CMER=3,0,0,1\r".to_string(),
                "AT+CHLD=?\r".to_string(),
                "AT+BIA=1,1,1,1,1,1,1\r".to_string(),
            ]
        );
        assert!(h.link.service_connected);
        assert!(h.link.call_hold_features.contains(CallHoldFeatures::MERGE));

        let events = notifications(&effects);
        let connected = events
            .iter()
            .position(|e| matches!(e, ClientEvent::ServiceConnected { .. }))
            .unwrap();
        let first_indicator = events
            .iter()
            .position(|e| matches!(e, ClientEvent::IndicatorChanged { .. }))
            .unwrap();
        assert!(first_indicator < connected);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ClientEvent::ServiceConnected { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_post_slc_batch_in_order() {
        let mut h = Harness::new();
        connect(&mut h);
        let mut sent = Vec::new();
        for _ in 0..6 {
            sent.extend(writes(&h.feed("\r\nOK\r\n")));
        }
        assert_eq!(
            sent,
            vec![
                "AT+CCWA=1\r",
                "AT+CMEE=1\r",
                "AT+COPS=3,0\r",
                "AT+COPS?\r",
                "AT+BTRH?\r",
                "AT+CLIP=1\r",
            ]
        );
        assert!(h.engine.current_command().is_some());
        assert!(writes(&h.feed("\r\nOK\r\n")).is_empty());
        assert!(h.engine.current_command().is_none());
    }

    #[test]
    fn test_slc_step_failure_closes() {
        let mut h = Harness::new();
        h.run(|engine, ctx| engine.start_slc(ctx));
        let mut out = Outbox::new(PEER);
        let mut ctx = AtContext {
            link: &mut h.link,
            config: &h.config,
            out: &mut out,
        };
        h.engine.feed(&mut ctx, b"\r\nERROR\r\n");
        assert_eq!(
            out.take_upcall(),
            Some(Upcall::Close(CloseReason::SlcFailed))
        );
        assert!(!h.link.service_connected);
    }

    #[test]
    fn test_no_codec_list_without_negotiation() {
        let mut h = Harness::new();
        h.run(|engine, ctx| engine.start_slc(ctx));
        let effects = h.feed("\r\n+BRSF: 1\r\n\r\nOK\r\n");
        assert_eq!(writes(&effects), vec!["AT+CIND=?\r"]);
    }

    #[test]
    fn test_fifo_with_one_outstanding() {
        let mut h = Harness::new();
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        let first = h.send(AtRequest::dial("5551234"));
        assert_eq!(writes(&first), vec!["ATD5551234;\r"]);
        assert!(writes(&h.send(AtRequest::with_value(AtCommand::Vgs, 9))).is_empty());
        assert!(writes(&h.send(AtRequest::new(AtCommand::Clcc))).is_empty());
        assert_eq!(h.engine.queued(), 2);

        let effects = h.feed("\r\nOK\r\n");
        assert_eq!(writes(&effects), vec!["AT+VGS=9\r"]);
        assert!(notifications(&effects).contains(&ClientEvent::Result {
            peer: PEER,
            command: Some(AtCommand::Dial),
            kind: ResultKind::Ok,
            code: 0,
        }));
        assert_eq!(writes(&h.feed("\r\n+CME ERROR: 3\r\n")), vec!["AT+CLCC\r"]);
    }

    #[test]
    fn test_early_commands_go_before_post_slc_batch() {
        let mut h = Harness::new();
        assert!(writes(&h.send(AtRequest::new(AtCommand::Clcc))).is_empty());
        let effects = connect(&mut h);
        let sent = writes(&effects);
        assert_eq!(sent.last().map(String::as_str), Some("AT+CLCC\r"));
        assert!(!sent.iter().any(|w| w.starts_with("AT+BIA")));

        let effects = h.feed("\r\nOK\r\n");
        assert_eq!(writes(&effects), vec!["AT+BIA=1,1,1,1,1,1,1\r"]);
        assert!(notifications(&effects).contains(&ClientEvent::Result {
            peer: PEER,
            command: Some(AtCommand::Clcc),
            kind: ResultKind::Ok,
            code: 0,
        }));
    }

    #[test]
    fn test_reset_drops_queue_and_timers() {
        let mut h = Harness::new();
        connect(&mut h);
        h.send(AtRequest::new(AtCommand::Clcc));
        let mut out = Outbox::new(PEER);
        h.engine.reset(&mut out);
        let effects = out.into_effects();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Timer(TimerRequest::Cancel { token }) if token.kind == TimerKind::Response
        )));
        assert!(h.engine.current_command().is_none());
        assert_eq!(h.engine.queued(), 0);
    }

    #[test]
    fn test_chunking_does_not_change_events() {
        let stream = format!("\r\n+BRSF: {AG_FEATURES}\r\n\r\nOK\r\n\r\nOK\r\n\r\n{CIND_RANGES}\r\nOK\r\n\r\n+CIND: 1,0,0,0,4,0,3\r\n\r\nOK\r\n\r\nOK\r\n\r\n+CHLD: (0,1,2,3)\r\n\r\nOK\r\n\r\nRING\r\n\r\n+CIEV: 5,2\r\n");

        let mut whole = Harness::new();
        let mut expected = whole.run(|engine, ctx| engine.start_slc(ctx));
        expected.extend(whole.feed(&stream));

        for chunk in [1, 2, 3, 7, 64] {
            let mut split = Harness::new();
            let mut effects = split.run(|engine, ctx| engine.start_slc(ctx));
            for piece in stream.as_bytes().chunks(chunk) {
                effects.extend(split.run(|engine, ctx| engine.feed(ctx, piece)));
            }
            assert_eq!(notifications(&effects), notifications(&expected), "chunk {chunk}");
            assert_eq!(writes(&effects), writes(&expected), "chunk {chunk}");
        }
    }

    #[test]
    fn test_malformed_line_skipped() {
        let mut h = Harness::new();
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        h.send(AtRequest::new(AtCommand::Clcc));
        let effects = h.feed("\r\n+CLCC: 1,x\r\n\r\nOK\r\n");
        assert_eq!(
            notifications(&effects),
            vec![ClientEvent::Result {
                peer: PEER,
                command: Some(AtCommand::Clcc),
                kind: ResultKind::Ok,
                code: 0,
            }]
        );
    }

    #[test]
    fn test_response_timeout_closes() {
        let mut h = Harness::new();
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        let effects = h.send(AtRequest::new(AtCommand::Answer));
        h.send(AtRequest::new(AtCommand::HangUp));
        let token = timer_token(&effects, TimerKind::Response);

        let mut out = Outbox::new(PEER);
        let mut ctx = AtContext {
            link: &mut h.link,
            config: &h.config,
            out: &mut out,
        };
        h.engine.on_timer(&mut ctx, &token);
        assert_eq!(
            out.take_upcall(),
            Some(Upcall::Close(CloseReason::ResponseTimeout))
        );
        assert!(out.into_effects().is_empty());
        assert_eq!(h.engine.queued(), 0);
        assert!(writes(&h.feed("\r\nOK\r\n")).is_empty());
    }

    #[test]
    fn test_cnum_timeout_treated_as_ok() {
        let mut h = Harness::new();
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        let effects = h.send(AtRequest::new(AtCommand::Cnum));
        let token = timer_token(&effects, TimerKind::Response);
        let effects = h.run(|engine, ctx| engine.on_timer(ctx, &token));
        assert_eq!(
            notifications(&effects),
            vec![ClientEvent::Result {
                peer: PEER,
                command: Some(AtCommand::Cnum),
                kind: ResultKind::Ok,
                code: 0,
            }]
        );
    }

    #[test]
    fn test_codec_proposal_and_hold() {
        let mut h = Harness::new();
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        assert_eq!(writes(&h.feed("\r\n+BCS: 2\r\n")), vec!["AT+BCS=2\r"]);
        assert_eq!(h.link.codec, Codec::Msbc);

        let effects = h.feed("\r\nOK\r\n");
        let hold = timer_token(&effects, TimerKind::Hold);
        assert!(writes(&h.send(AtRequest::new(AtCommand::Clcc))).is_empty());

        let effects = h.run(|engine, ctx| engine.on_timer(ctx, &hold));
        assert_eq!(writes(&effects), vec!["AT+CLCC\r"]);
    }

    #[test]
    fn test_unsupported_codec_counter_proposed() {
        let mut h = Harness::new();
        h.config.msbc_enabled = false;
        connect(&mut h);
        for _ in 0..7 {
            h.feed("\r\nOK\r\n");
        }
        assert_eq!(writes(&h.feed("\r\n+BCS: 2\r\n")), vec!["AT+BAC=1\r"]);
        assert_eq!(h.link.codec, Codec::Cvsd);
    }

    #[test]
    fn test_overflow_without_terminator_is_fatal() {
        let mut h = Harness::new();
        h.config.parser_capacity = 32;
        h.engine = AtEngine::new(32);
        let mut out = Outbox::new(PEER);
        let mut ctx = AtContext {
            link: &mut h.link,
            config: &h.config,
            out: &mut out,
        };
        h.engine.feed(&mut ctx, b"\r\nOK\r\n");
        h.engine.feed(&mut ctx, &[b'x'; 40]);
        assert_eq!(
            out.take_upcall(),
            Some(Upcall::Close(CloseReason::ParserOverflow))
        );
    }

    #[test]
    fn test_reserved_command_rejected() {
        let mut h = Harness::new();
        connect(&mut h);
        let effects = h.send(AtRequest::with_value(AtCommand::Brsf, 0));
        assert!(writes(&effects).is_empty());
        assert!(matches!(
            notifications(&effects).as_slice(),
            [ClientEvent::Result {
                kind: ResultKind::Error,
                ..
            }]
        ));
    }
}
