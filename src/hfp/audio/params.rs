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

//! Synchronous link parameter presets.

use bitflags::bitflags;

use crate::hfp::types::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Sco,
    Esco,
}

/// Air coding format on the synchronous link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirMode {
    Cvsd,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmission {
    Off,
    PowerSaving,
    LinkQuality,
}

bitflags! {
    /// HCI synchronous packet type mask. The `NO_*` bits exclude EDR types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketTypes: u16 {
        const HV1 = 0x0001;
        const HV2 = 0x0002;
        const HV3 = 0x0004;
        const EV3 = 0x0008;
        const EV4 = 0x0010;
        const EV5 = 0x0020;
        const NO_2_EV3 = 0x0040;
        const NO_3_EV3 = 0x0080;
        const NO_2_EV5 = 0x0100;
        const NO_3_EV5 = 0x0200;
    }
}

/// Parameters handed to the audio transport when creating or accepting a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub name: &'static str,
    pub link_type: LinkType,
    pub codec: Codec,
    /// Bytes per second in each direction.
    pub bandwidth: u32,
    pub max_latency_ms: u16,
    pub air_mode: AirMode,
    pub packet_types: PacketTypes,
    pub retransmission: Retransmission,
    /// A failed link with these parameters may be retried once as SCO.
    pub sco_fallback: bool,
}

pub const SCO_CVSD: LinkParams = LinkParams {
    name: "SCO CVSD",
    link_type: LinkType::Sco,
    codec: Codec::Cvsd,
    bandwidth: 8000,
    max_latency_ms: 10,
    air_mode: AirMode::Cvsd,
    packet_types: PacketTypes::HV1
        .union(PacketTypes::HV3)
        .union(PacketTypes::NO_2_EV3)
        .union(PacketTypes::NO_3_EV3)
        .union(PacketTypes::NO_2_EV5)
        .union(PacketTypes::NO_3_EV5),
    retransmission: Retransmission::Off,
    sco_fallback: false,
};

pub const ESCO_CVSD_S3: LinkParams = LinkParams {
    name: "eSCO CVSD S3",
    link_type: LinkType::Esco,
    codec: Codec::Cvsd,
    bandwidth: 8000,
    max_latency_ms: 10,
    air_mode: AirMode::Cvsd,
    packet_types: PacketTypes::HV1
        .union(PacketTypes::HV3)
        .union(PacketTypes::EV3)
        .union(PacketTypes::NO_2_EV5)
        .union(PacketTypes::NO_3_EV3)
        .union(PacketTypes::NO_3_EV5),
    retransmission: Retransmission::PowerSaving,
    sco_fallback: true,
};

pub const ESCO_CVSD_S4: LinkParams = LinkParams {
    name: "eSCO CVSD S4",
    link_type: LinkType::Esco,
    codec: Codec::Cvsd,
    bandwidth: 8000,
    max_latency_ms: 12,
    air_mode: AirMode::Cvsd,
    packet_types: PacketTypes::NO_2_EV5
        .union(PacketTypes::NO_3_EV3)
        .union(PacketTypes::NO_3_EV5),
    retransmission: Retransmission::LinkQuality,
    sco_fallback: true,
};

pub const ESCO_MSBC_T2: LinkParams = LinkParams {
    name: "eSCO mSBC T2",
    link_type: LinkType::Esco,
    codec: Codec::Msbc,
    bandwidth: 8000,
    max_latency_ms: 13,
    air_mode: AirMode::Transparent,
    packet_types: PacketTypes::NO_3_EV3
        .union(PacketTypes::NO_2_EV5)
        .union(PacketTypes::NO_3_EV5),
    retransmission: Retransmission::LinkQuality,
    sco_fallback: false,
};

/// Pick the preset for a requested link type and codec.
///
/// mSBC needs a transparent eSCO link and always uses T2. CVSD over eSCO
/// uses S4 when both sides support it.
pub fn select(requested: LinkType, codec: Codec, esco_s4: bool) -> LinkParams {
    match (requested, codec) {
        (_, Codec::Msbc) => ESCO_MSBC_T2,
        (LinkType::Sco, Codec::Cvsd) => SCO_CVSD,
        (LinkType::Esco, Codec::Cvsd) if esco_s4 => ESCO_CVSD_S4,
        (LinkType::Esco, Codec::Cvsd) => ESCO_CVSD_S3,
    }
}

/// What the audio transport reports once a link is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLinkInfo {
    pub link_type: LinkType,
    pub air_mode: AirMode,
    pub tx_packet_len: u16,
    pub rx_packet_len: u16,
}

impl AudioLinkInfo {
    /// Outgoing transport frame size in bytes. CVSD packet lengths count
    /// 8-bit air samples that the host side carries as 16-bit PCM.
    pub fn out_frame_len(&self) -> usize {
        self.scaled(self.tx_packet_len)
    }

    pub fn in_frame_len(&self) -> usize {
        self.scaled(self.rx_packet_len)
    }

    fn scaled(&self, len: u16) -> usize {
        match self.air_mode {
            AirMode::Cvsd => usize::from(len) * 2,
            AirMode::Transparent => usize::from(len),
        }
    }
}
