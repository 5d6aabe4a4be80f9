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

//! In-process Audio Gateway.
//!
//! Answers the handshake and call-control commands the way a typical phone
//! does, drives codec negotiation and creates audio links on request. Used
//! by the demo binary and the end-to-end tests.

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tracing::debug;

use super::ports::{AudioLink, Discovery, Transport};
use super::{Inbound, InboundSender};
use crate::config::SimulatorConfig;
use crate::hfp::audio::{AirMode, AudioLinkInfo, LinkParams, SCO_CVSD};
use crate::hfp::constants::PeerFeatures;
use crate::hfp::{Direction, Event, PeerAddress, ServiceRecord, TransportHandle};

const CIND_RANGES: &str = "+CIND: (\"service\",(0,1)),(\"call\",(0,1)),(\"callsetup\",(0,3)),(\"callheld\",(0,2)),(\"signal\",(0,5)),(\"roam\",(0,1)),(\"battchg\",(0,5))";
const CIND_VALUES: &str = "+CIND: 1,0,0,0,4,0,5";
const OPERATOR: &str = "+COPS: 0,0,\"Sim Carrier\"";
const SUBSCRIBER: &str = "+CNUM: ,\"+15551234\",145,,4";
const RFCOMM_CHANNEL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioSide {
    Idle,
    Listening,
    Up,
}

#[derive(Debug)]
struct Gateway {
    address: PeerAddress,
    config: SimulatorConfig,
    tx: InboundSender,
    handle: Option<TransportHandle>,
    next_handle: u32,
    line: Vec<u8>,
    server_running: bool,
    hf_msbc: bool,
    audio: AudioSide,
    params: Option<LinkParams>,
    call_active: bool,
    received: Vec<String>,
    frames_written: usize,
}

impl Gateway {
    fn post(&self, event: Event) {
        let _ = self.tx.send(Inbound::Peer {
            peer: self.address,
            event,
        });
    }

    fn reply(&self, lines: &[&str]) {
        let mut text = String::new();
        for line in lines {
            text.push_str("\r\n");
            text.push_str(line);
            text.push_str("\r\n");
        }
        let bytes = text.into_bytes();
        match self.config.chunk_size {
            0 => self.post(Event::TransportData(bytes)),
            size => {
                for chunk in bytes.chunks(size) {
                    self.post(Event::TransportData(chunk.to_vec()));
                }
            }
        }
    }

    fn features(&self) -> PeerFeatures {
        PeerFeatures::from_bits_truncate(self.config.ag_features)
    }

    fn service_record(&self) -> ServiceRecord {
        let mut sdp = (self.config.ag_features & 0x1f) as u16;
        if self.features().contains(PeerFeatures::CODEC_NEGOTIATION) {
            sdp |= 1 << 5;
        }
        ServiceRecord {
            channel: RFCOMM_CHANNEL,
            version: self.config.version,
            features: sdp,
        }
    }

    fn link_info(&self, params: &LinkParams) -> AudioLinkInfo {
        let len = match params.air_mode {
            AirMode::Cvsd => self.config.audio_packet_len / 2,
            AirMode::Transparent => self.config.audio_packet_len,
        };
        AudioLinkInfo {
            link_type: params.link_type,
            air_mode: params.air_mode,
            tx_packet_len: len,
            rx_packet_len: len,
        }
    }

    fn take_lines(&mut self, data: &[u8]) {
        self.line.extend_from_slice(data);
        while let Some(end) = self.line.iter().position(|b| *b == b'\r') {
            let raw: Vec<u8> = self.line.drain(..=end).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            if !command.is_empty() {
                self.respond(&command);
            }
        }
    }

    fn respond(&mut self, command: &str) {
        debug!("Gateway got {}", command);
        self.received.push(command.to_string());

        match command {
            c if c.starts_with("AT+BRSF=") => {
                let brsf = format!("+BRSF: {}", self.config.ag_features);
                self.reply(&[&brsf, "OK"]);
            }
            c if c.starts_with("AT+BAC=") => {
                self.hf_msbc = c["AT+BAC=".len()..].split(',').any(|v| v.trim() == "2");
                self.reply(&["OK"]);
            }
            "AT+CIND=?" => self.reply(&[CIND_RANGES, "OK"]),
            "AT+CIND?" => self.reply(&[CIND_VALUES, "OK"]),
            "AT+CHLD=?" => self.reply(&["+CHLD: (0,1,2,3)", "OK"]),
            "AT+COPS?" => self.reply(&[OPERATOR, "OK"]),
            "AT+CNUM" => self.reply(&[SUBSCRIBER, "OK"]),
            "AT+BINP=1" => self.reply(&["+BINP: \"5550100\"", "OK"]),
            "AT+CLCC" => {
                if self.call_active {
                    self.reply(&["+CLCC: 1,0,0,0,0,\"5551234\",129", "OK"]);
                } else {
                    self.reply(&["OK"]);
                }
            }
            "ATA" => {
                self.call_active = true;
                self.reply(&["OK", "+CIEV: 2,1", "+CIEV: 3,0"]);
            }
            "AT+CHUP" => {
                self.call_active = false;
                self.reply(&["OK", "+CIEV: 2,0"]);
            }
            c if c.starts_with("ATD") => {
                self.call_active = true;
                self.reply(&["OK", "+CIEV: 3,2", "+CIEV: 3,3", "+CIEV: 2,1", "+CIEV: 3,0"]);
            }
            "AT+BCC" => {
                self.reply(&["OK"]);
                self.propose_codec();
            }
            c if c.starts_with("AT+BCS=") => {
                self.reply(&["OK"]);
                self.post(Event::AudioConnectionRequest);
            }
            c if c.starts_with("AT") && c.len() > 2 => self.reply(&["OK"]),
            _ => self.reply(&["ERROR"]),
        }
    }

    fn propose_codec(&mut self) {
        if self.features().contains(PeerFeatures::CODEC_NEGOTIATION) {
            let codec = if self.hf_msbc { "+BCS: 2" } else { "+BCS: 1" };
            self.reply(&[codec]);
        } else {
            self.post(Event::AudioConnectionRequest);
        }
    }
}

/// Simulated Audio Gateway. Clones share one gateway.
#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    inner: Arc<Mutex<Gateway>>,
}

impl ScriptedGateway {
    pub fn new(address: PeerAddress, config: &SimulatorConfig, tx: InboundSender) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Gateway {
                address,
                config: config.clone(),
                tx,
                handle: None,
                next_handle: 1,
                line: Vec::new(),
                server_running: false,
                hf_msbc: false,
                audio: AudioSide::Idle,
                params: None,
                call_active: false,
                received: Vec::new(),
                frames_written: 0,
            })),
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.inner.lock().address
    }

    /// Commands received so far, without terminators.
    pub fn received(&self) -> Vec<String> {
        self.inner.lock().received.clone()
    }

    pub fn frames_written(&self) -> usize {
        self.inner.lock().frames_written
    }

    pub fn server_running(&self) -> bool {
        self.inner.lock().server_running
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    /// Connect to the client's server as a phone would. Returns false when
    /// nothing is listening.
    pub fn connect_inbound(&self) -> bool {
        let mut gw = self.inner.lock();
        if !gw.server_running || gw.handle.is_some() {
            return false;
        }
        let handle = TransportHandle(gw.next_handle);
        gw.next_handle += 1;
        gw.handle = Some(handle);
        gw.post(Event::IncomingConnection);
        gw.post(Event::TransportOpened {
            handle,
            direction: Direction::Inbound,
        });
        true
    }

    /// Send an unsolicited result such as `RING`.
    pub fn unsolicited(&self, line: &str) {
        self.inner.lock().reply(&[line]);
    }

    /// Drop the link from the gateway side.
    pub fn disconnect(&self) {
        let mut gw = self.inner.lock();
        if gw.handle.take().is_some() {
            if gw.audio == AudioSide::Up {
                gw.post(Event::AudioDisconnected);
            }
            gw.audio = AudioSide::Idle;
            gw.post(Event::TransportClosed);
        }
    }
}

impl Transport for ScriptedGateway {
    fn open(&mut self, peer: PeerAddress, _channel: u8) -> Result<()> {
        let mut gw = self.inner.lock();
        if peer != gw.address {
            bail!("no gateway at {}", peer);
        }
        let handle = TransportHandle(gw.next_handle);
        gw.next_handle += 1;
        gw.handle = Some(handle);
        gw.line.clear();
        gw.post(Event::TransportOpened {
            handle,
            direction: Direction::Outbound,
        });
        Ok(())
    }

    fn close(&mut self, handle: TransportHandle) -> Result<()> {
        let mut gw = self.inner.lock();
        if gw.handle != Some(handle) {
            bail!("unknown transport {:?}", handle);
        }
        gw.handle = None;
        if gw.audio == AudioSide::Up {
            gw.post(Event::AudioDisconnected);
        }
        gw.audio = AudioSide::Idle;
        gw.call_active = false;
        gw.post(Event::TransportClosed);
        Ok(())
    }

    fn write(&mut self, handle: TransportHandle, data: &[u8]) -> Result<()> {
        let mut gw = self.inner.lock();
        if gw.handle != Some(handle) {
            bail!("unknown transport {:?}", handle);
        }
        gw.take_lines(data);
        Ok(())
    }

    fn start_server(&mut self) -> Result<()> {
        self.inner.lock().server_running = true;
        Ok(())
    }

    fn stop_server(&mut self) -> Result<()> {
        self.inner.lock().server_running = false;
        Ok(())
    }
}

impl Discovery for ScriptedGateway {
    fn discover(&mut self, peer: PeerAddress) -> Result<()> {
        let gw = self.inner.lock();
        let record = (peer == gw.address).then(|| gw.service_record());
        let _ = gw.tx.send(Inbound::Peer {
            peer,
            event: Event::DiscoveryResult(record),
        });
        Ok(())
    }

    fn cancel(&mut self, peer: PeerAddress) {
        debug!("Discovery of {} cancelled", peer);
    }
}

impl AudioLink for ScriptedGateway {
    fn configure(&mut self, _peer: PeerAddress, params: &LinkParams) -> Result<()> {
        self.inner.lock().params = Some(*params);
        Ok(())
    }

    fn create(&mut self, peer: PeerAddress, originator: bool) -> Result<()> {
        let mut gw = self.inner.lock();
        if peer != gw.address || gw.handle.is_none() {
            bail!("no link to {}", peer);
        }
        if !originator {
            gw.audio = AudioSide::Listening;
            return Ok(());
        }
        let params = gw.params.take().unwrap_or(SCO_CVSD);
        let info = gw.link_info(&params);
        gw.audio = AudioSide::Up;
        gw.post(Event::AudioConnected(info));
        Ok(())
    }

    fn accept(&mut self, _peer: PeerAddress, params: &LinkParams) -> Result<()> {
        let mut gw = self.inner.lock();
        let info = gw.link_info(params);
        gw.audio = AudioSide::Up;
        gw.post(Event::AudioConnected(info));
        Ok(())
    }

    fn reject(&mut self, peer: PeerAddress) {
        debug!("Audio connection to {} rejected", peer);
    }

    fn remove(&mut self, _peer: PeerAddress) {
        let mut gw = self.inner.lock();
        if gw.audio == AudioSide::Up {
            gw.post(Event::AudioDisconnected);
        }
        gw.audio = AudioSide::Idle;
    }

    fn write_frame(&mut self, _peer: PeerAddress, _frame: &[u8]) -> Result<()> {
        let mut gw = self.inner.lock();
        if gw.audio != AudioSide::Up {
            bail!("audio link down");
        }
        gw.frames_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::inbox;

    const AG: PeerAddress = PeerAddress::new([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);

    fn data(rx: &mut crate::runtime::InboundReceiver) -> String {
        let mut text = String::new();
        while let Ok(inbound) = rx.try_recv() {
            if let Inbound::Peer {
                event: Event::TransportData(bytes),
                ..
            } = inbound
            {
                text.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
        text
    }

    #[test]
    fn test_answers_brsf_in_chunks() {
        let (tx, mut rx) = inbox();
        let config = SimulatorConfig {
            chunk_size: 3,
            ..SimulatorConfig::default()
        };
        let mut gw = ScriptedGateway::new(AG, &config, tx);
        gw.open(AG, 3).unwrap();
        let handle = match rx.try_recv() {
            Ok(Inbound::Peer {
                event: Event::TransportOpened { handle, .. },
                ..
            }) => handle,
            other => panic!("unexpected {other:?}"),
        };

        gw.write(handle, b"AT+BRSF=").unwrap();
        assert!(data(&mut rx).is_empty());
        gw.write(handle, b"191\r").unwrap();
        assert_eq!(data(&mut rx), "\r\n+BRSF: 1007\r\n\r\nOK\r\n");
        assert_eq!(gw.received(), vec!["AT+BRSF=191"]);
    }

    #[test]
    fn test_discovery_of_other_peer_fails() {
        let (tx, mut rx) = inbox();
        let mut gw = ScriptedGateway::new(AG, &SimulatorConfig::default(), tx);
        let other = PeerAddress::new([1; 6]);
        gw.discover(other).unwrap();
        assert_eq!(
            rx.try_recv().ok(),
            Some(Inbound::Peer {
                peer: other,
                event: Event::DiscoveryResult(None)
            })
        );
        assert!(gw.open(other, 1).is_err());
    }

    #[test]
    fn test_inbound_needs_server() {
        let (tx, _rx) = inbox();
        let mut gw = ScriptedGateway::new(AG, &SimulatorConfig::default(), tx);
        assert!(!gw.connect_inbound());
        gw.start_server().unwrap();
        assert!(gw.connect_inbound());
        assert!(gw.is_connected());
    }
}
