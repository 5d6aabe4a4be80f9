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

//! Hands-Free Profile UUIDs, feature bits and protocol constants.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hands-Free unit service class UUID (0x111E).
pub const HANDSFREE_UUID: Uuid = Uuid::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb);

/// Audio Gateway service class UUID (0x111F).
pub const AUDIO_GATEWAY_UUID: Uuid = Uuid::from_u128(0x0000111f_0000_1000_8000_00805f9b34fb);

/// Profile versions as carried in the SDP profile descriptor list.
pub mod version {
    pub const HFP_1_5: u16 = 0x0105;
    pub const HFP_1_6: u16 = 0x0106;
    pub const HFP_1_7: u16 = 0x0107;
}

bitflags! {
    /// Features advertised by this Hands-Free unit in `AT+BRSF`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct LocalFeatures: u32 {
        const ECNR = 1 << 0;
        const THREE_WAY = 1 << 1;
        const CLI = 1 << 2;
        const VOICE_RECOGNITION = 1 << 3;
        const REMOTE_VOLUME = 1 << 4;
        const ENHANCED_CALL_STATUS = 1 << 5;
        const ENHANCED_CALL_CONTROL = 1 << 6;
        const CODEC_NEGOTIATION = 1 << 7;
        const HF_INDICATORS = 1 << 8;
        const ESCO_S4 = 1 << 9;
    }
}

bitflags! {
    /// Features advertised by the Audio Gateway in `+BRSF`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PeerFeatures: u32 {
        const THREE_WAY = 1 << 0;
        const ECNR = 1 << 1;
        const VOICE_RECOGNITION = 1 << 2;
        const INBAND_RING = 1 << 3;
        const VOICE_TAG = 1 << 4;
        const REJECT = 1 << 5;
        const ENHANCED_CALL_STATUS = 1 << 6;
        const ENHANCED_CALL_CONTROL = 1 << 7;
        const EXTENDED_ERRORS = 1 << 8;
        const CODEC_NEGOTIATION = 1 << 9;
        const HF_INDICATORS = 1 << 10;
        const ESCO_S4 = 1 << 11;
    }
}

impl PeerFeatures {
    /// Map the AG's SDP "SupportedFeatures" attribute onto `+BRSF` bits.
    ///
    /// The low five bits line up; bit 5 of the SDP value is wide-band speech,
    /// which implies codec negotiation.
    pub fn from_sdp(value: u16) -> Self {
        let mut features = Self::from_bits_truncate(u32::from(value & 0x1f));
        if value & (1 << 5) != 0 {
            features |= Self::CODEC_NEGOTIATION;
        }
        features
    }
}

bitflags! {
    /// Call hold and multiparty operations reported in `+CHLD`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CallHoldFeatures: u32 {
        const RELEASE = 0x01;
        const RELEASE_ACCEPT = 0x02;
        const RELEASE_X = 0x04;
        const HOLD_ACCEPT = 0x08;
        const PRIVATE_X = 0x10;
        const MERGE = 0x20;
        const MERGE_DETACH = 0x40;
    }
}

/// Codec identifiers used in `+BCS`/`AT+BAC`.
pub mod codec_id {
    pub const CVSD: u32 = 1;
    pub const MSBC: u32 = 2;
}

/// AT engine limits.
pub mod at {
    /// Default receive accumulator capacity.
    pub const PARSER_CAPACITY: usize = 4096;
    /// Smallest accepted accumulator capacity.
    pub const MIN_PARSER_CAPACITY: usize = 16;
    /// Indicator positions tracked from `+CIND`.
    pub const MAX_INDICATORS: usize = 20;
    /// Longest phone number kept from any result.
    pub const MAX_NUMBER_LEN: usize = 32;
    /// Longest operator name kept from `+COPS`.
    pub const MAX_OPERATOR_LEN: usize = 16;
    /// Longest text argument accepted on an outgoing command.
    pub const MAX_COMMAND_TEXT_LEN: usize = 32;
}

/// Default timer values in milliseconds.
pub mod timeouts {
    pub const RESPONSE_MS: u64 = 29_989;
    pub const HOLD_MS: u64 = 41;
    pub const COLLISION_MS: u64 = 2_411;
}

/// mSBC transport framing.
pub mod msbc {
    /// Encoded mSBC frame.
    pub const FRAME_LEN: usize = 57;
    /// H2 header + frame + one padding byte.
    pub const PACKET_LEN: usize = 60;
    /// First H2 header byte.
    pub const H2_SYNC: u8 = 0x01;
    /// Second H2 header byte, indexed by sequence number.
    pub const H2_SEQUENCE: [u8; 4] = [0x08, 0x38, 0xc8, 0xf8];
    /// mSBC frame sync word.
    pub const FRAME_SYNC: u8 = 0xad;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_features_map_wideband_to_codec() {
        let features = PeerFeatures::from_sdp(0x0021);
        assert!(features.contains(PeerFeatures::THREE_WAY));
        assert!(features.contains(PeerFeatures::CODEC_NEGOTIATION));
        assert!(!features.contains(PeerFeatures::REJECT));
    }

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            HANDSFREE_UUID.to_string(),
            "0000111e-0000-1000-8000-00805f9b34fb"
        );
        assert_ne!(HANDSFREE_UUID, AUDIO_GATEWAY_UUID);
    }
}
