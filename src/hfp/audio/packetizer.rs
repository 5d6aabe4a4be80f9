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

//! Audio framing for the synchronous link.
//!
//! CVSD is cut purely on transport frame boundaries. mSBC is sent as H2
//! packets (2-byte header, 57-byte codec frame, 1 pad byte); when the
//! transport frame is shorter than a packet, the packet is spread over
//! consecutive frames and only the first carries the header.

use tracing::{debug, warn};

use crate::hfp::constants::msbc::{FRAME_LEN, FRAME_SYNC, H2_SEQUENCE, H2_SYNC, PACKET_LEN};
use crate::hfp::types::Codec;

/// Alternating bits decode to silence in CVSD.
const CVSD_SILENCE: u8 = 0x55;

/// Outbound framer for the negotiated codec.
#[derive(Debug)]
pub enum Packetizer {
    Cvsd(CvsdFramer),
    Msbc(MsbcFramer),
}

impl Packetizer {
    pub fn new(codec: Codec, frame_len: usize) -> Self {
        match codec {
            Codec::Cvsd => Packetizer::Cvsd(CvsdFramer::new(frame_len)),
            Codec::Msbc => Packetizer::Msbc(MsbcFramer::new(frame_len)),
        }
    }

    /// Accept a chunk of encoded audio and return complete transport frames.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        match self {
            Packetizer::Cvsd(framer) => framer.push(data),
            Packetizer::Msbc(framer) => framer.push(data),
        }
    }

    /// Bytes held back waiting for more input.
    pub fn pending(&self) -> usize {
        match self {
            Packetizer::Cvsd(framer) => framer.pending.len(),
            Packetizer::Msbc(framer) => framer.pending.len(),
        }
    }

    /// Emit what is held back before the link goes away.
    ///
    /// A CVSD tail is padded with silence to a whole transport frame. A
    /// partial mSBC codec frame cannot be encoded and is dropped.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let held = self.pending();
        match self {
            Packetizer::Cvsd(framer) => {
                let frame_len = framer.frame_len;
                let mut tail = framer.flush()?;
                debug!("Padding {} byte CVSD tail to {}", held, frame_len);
                tail.resize(frame_len, CVSD_SILENCE);
                Some(tail)
            }
            Packetizer::Msbc(framer) => {
                if held > 0 {
                    debug!("Dropping {} bytes of a partial mSBC frame", held);
                    framer.pending.clear();
                }
                None
            }
        }
    }
}

/// Splits CVSD audio on transport frame boundaries.
#[derive(Debug)]
pub struct CvsdFramer {
    frame_len: usize,
    pending: Vec<u8>,
}

impl CvsdFramer {
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub fn push(&mut self, mut data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let count = (self.pending.len() + data.len()) / self.frame_len;
        if frames.try_reserve(count).is_err() || self.pending.try_reserve(self.frame_len).is_err() {
            warn!("Audio buffer allocation failed, dropping {} bytes", data.len());
            self.pending.clear();
            return frames;
        }

        if !self.pending.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < self.frame_len {
                return frames;
            }
            frames.push(std::mem::replace(
                &mut self.pending,
                Vec::with_capacity(self.frame_len),
            ));
        }

        let mut whole = data.chunks_exact(self.frame_len);
        for frame in whole.by_ref() {
            frames.push(frame.to_vec());
        }
        self.pending.extend_from_slice(whole.remainder());
        frames
    }

    /// Hand out the partial frame, if any.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Wraps mSBC codec frames in H2 packets.
#[derive(Debug)]
pub struct MsbcFramer {
    frame_len: usize,
    pending: Vec<u8>,
    seq: usize,
}

impl MsbcFramer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.clamp(1, PACKET_LEN),
            pending: Vec::with_capacity(FRAME_LEN),
            seq: 0,
        }
    }

    fn header(&mut self) -> [u8; 2] {
        let header = [H2_SYNC, H2_SEQUENCE[self.seq]];
        self.seq = (self.seq + 1) % H2_SEQUENCE.len();
        header
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if self.pending.try_reserve(data.len()).is_err() {
            warn!("Audio buffer allocation failed, dropping {} bytes", data.len());
            self.pending.clear();
            return frames;
        }
        self.pending.extend_from_slice(data);

        let mut offset = 0;
        while self.pending.len() - offset >= FRAME_LEN {
            let mut packet = Vec::with_capacity(PACKET_LEN);
            packet.extend_from_slice(&self.header());
            packet.extend_from_slice(&self.pending[offset..offset + FRAME_LEN]);
            packet.push(0);
            offset += FRAME_LEN;

            for slice in packet.chunks(self.frame_len) {
                frames.push(slice.to_vec());
            }
        }
        self.pending.drain(..offset);
        frames
    }
}

/// Recovers mSBC codec frames from received H2 packets.
#[derive(Debug, Default)]
pub struct MsbcReassembler {
    buffer: Vec<u8>,
    expected_seq: Option<usize>,
}

impl MsbcReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_header(&self) -> Option<usize> {
        self.buffer.windows(3).position(|w| {
            w[0] == H2_SYNC && H2_SEQUENCE.contains(&w[1]) && w[2] == FRAME_SYNC
        })
    }

    /// Process received bytes; returns every complete codec frame.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(start) = self.find_header() else {
                // Keep a possible partial header.
                let keep = self.buffer.len().min(2);
                let dropped = self.buffer.len() - keep;
                if dropped > 0 {
                    debug!("Discarding {} bytes without H2 header", dropped);
                    self.buffer.drain(..dropped);
                }
                break;
            };
            if start > 0 {
                warn!("Resync: skipped {} bytes before H2 header", start);
                self.buffer.drain(..start);
            }
            if self.buffer.len() < PACKET_LEN {
                break;
            }

            let seq = H2_SEQUENCE
                .iter()
                .position(|s| *s == self.buffer[1])
                .unwrap_or_default();
            if let Some(expected) = self.expected_seq {
                if expected != seq {
                    warn!("H2 sequence error: expected {}, got {}", expected, seq);
                }
            }
            self.expected_seq = Some((seq + 1) % H2_SEQUENCE.len());

            frames.push(self.buffer[2..2 + FRAME_LEN].to_vec());
            self.buffer.drain(..PACKET_LEN);
        }

        frames
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn codec_frame(tag: u8) -> Vec<u8> {
        let mut frame = vec![tag; FRAME_LEN];
        frame[0] = FRAME_SYNC;
        frame
    }

    #[test]
    fn test_cvsd_round_trip_across_chunkings() {
        let input = pcm(1000);
        for frame_len in [1, 3, 48, 60, 120, 999, 1000, 1001] {
            for chunk in [1, 5, 17, 60, 333, 1000] {
                let mut framer = CvsdFramer::new(frame_len);
                let mut output = Vec::new();
                for piece in input.chunks(chunk) {
                    for frame in framer.push(piece) {
                        assert_eq!(frame.len(), frame_len);
                        output.extend(frame);
                    }
                }
                if let Some(tail) = framer.flush() {
                    assert!(tail.len() < frame_len);
                    output.extend(tail);
                }
                assert_eq!(output, input, "frame {frame_len}, chunk {chunk}");
            }
        }
    }

    #[test]
    fn test_cvsd_carries_remainder() {
        let mut framer = CvsdFramer::new(60);
        assert!(framer.push(&pcm(50)).is_empty());
        let frames = framer.push(&pcm(80));
        assert_eq!(frames.len(), 2);
        assert_eq!(framer.flush().map(|t| t.len()), Some(10));
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_msbc_whole_packet() {
        let mut framer = MsbcFramer::new(60);
        let frame = codec_frame(0x11);
        let out = framer.push(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), PACKET_LEN);
        assert_eq!(&out[0][..2], &[0x01, 0x08]);
        assert_eq!(&out[0][2..59], frame.as_slice());
        assert_eq!(out[0][59], 0);
    }

    #[test]
    fn test_msbc_header_sequence() {
        let mut framer = MsbcFramer::new(60);
        let mut input = Vec::new();
        for tag in 0..5 {
            input.extend(codec_frame(tag));
        }
        let seqs: Vec<u8> = framer.push(&input).iter().map(|f| f[1]).collect();
        assert_eq!(seqs, vec![0x08, 0x38, 0xc8, 0xf8, 0x08]);
    }

    #[test]
    fn test_msbc_split_packet() {
        let mut framer = MsbcFramer::new(30);
        let frame = codec_frame(0x22);
        let out = framer.push(&frame);
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..2], &[0x01, 0x08]);
        assert_eq!(out[0].len() + out[1].len(), PACKET_LEN);

        let mut reassembler = MsbcReassembler::new();
        let mut frames = reassembler.push(&out[0]);
        assert!(frames.is_empty());
        frames.extend(reassembler.push(&out[1]));
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_msbc_partial_codec_frame_held() {
        let mut framer = Packetizer::new(Codec::Msbc, 60);
        let frame = codec_frame(0x33);
        assert!(framer.push(&frame[..20]).is_empty());
        assert_eq!(framer.pending(), 20);
        let out = framer.push(&frame[20..]);
        assert_eq!(out.len(), 1);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_flush_pads_cvsd_and_drops_partial_msbc() {
        let mut cvsd = Packetizer::new(Codec::Cvsd, 60);
        assert_eq!(cvsd.push(&pcm(70)).len(), 1);
        let tail = cvsd.flush().expect("cvsd tail");
        assert_eq!(tail.len(), 60);
        assert_eq!(&tail[..10], &pcm(70)[60..]);
        assert!(tail[10..].iter().all(|b| *b == CVSD_SILENCE));
        assert!(cvsd.flush().is_none());

        let mut msbc = Packetizer::new(Codec::Msbc, 60);
        msbc.push(&codec_frame(0x66)[..30]);
        assert!(msbc.flush().is_none());
        assert_eq!(msbc.pending(), 0);
    }

    #[test]
    fn test_reassembler_resyncs_after_garbage() {
        let mut framer = MsbcFramer::new(60);
        let first = codec_frame(0x44);
        let second = codec_frame(0x55);
        let mut stream = vec![0xff, 0x00, 0x01];
        stream.extend(framer.push(&first).concat());
        stream.extend(framer.push(&second).concat());

        let mut reassembler = MsbcReassembler::new();
        let mut frames = Vec::new();
        for piece in stream.chunks(7) {
            frames.extend(reassembler.push(piece));
        }
        assert_eq!(frames, vec![first, second]);
    }
}
