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

//! Shared value types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::constants::{codec_id, version, PeerFeatures};
use super::error::ParseError;

/// Bluetooth device address of a remote Audio Gateway.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for PeerAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| ParseError::Malformed(format!("address too short: {s}")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::Malformed(format!("bad address octet: {part}")))?;
        }
        if parts.next().is_some() {
            return Err(ParseError::Malformed(format!("address too long: {s}")));
        }
        Ok(Self(bytes))
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which side created the RFCOMM link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Acceptor,
}

/// Direction of a transport link as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Audio codec carried over the synchronous link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Cvsd,
    Msbc,
}

impl Codec {
    pub fn id(&self) -> u32 {
        match self {
            Codec::Cvsd => codec_id::CVSD,
            Codec::Msbc => codec_id::MSBC,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            codec_id::CVSD => Some(Codec::Cvsd),
            codec_id::MSBC => Some(Codec::Msbc),
            _ => None,
        }
    }
}

/// Opaque handle for an open RFCOMM link, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u32);

/// Service record attributes learned from the AG's SDP record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRecord {
    /// RFCOMM server channel of the AG service.
    pub channel: u8,
    /// Profile version, e.g. `0x0106`.
    pub version: u16,
    /// Raw SDP supported-features attribute.
    pub features: u16,
}

impl ServiceRecord {
    pub fn peer_features(&self) -> PeerFeatures {
        PeerFeatures::from_sdp(self.features)
    }
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            channel: 1,
            version: version::HFP_1_6,
            features: 0,
        }
    }
}

/// Speaker or microphone gain target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTarget {
    Speaker,
    Microphone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_round_trip() {
        let addr: PeerAddress = "00:1a:7D:da:71:0b".parse().unwrap();
        assert_eq!(addr.0, [0x00, 0x1a, 0x7d, 0xda, 0x71, 0x0b]);
        assert_eq!(addr.to_string(), "00:1A:7D:DA:71:0B");
    }

    #[test]
    fn test_peer_address_rejects_bad_input() {
        assert!("00:11:22:33:44".parse::<PeerAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<PeerAddress>().is_err());
        assert!("zz:11:22:33:44:55".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_codec_ids() {
        assert_eq!(Codec::from_id(1), Some(Codec::Cvsd));
        assert_eq!(Codec::from_id(2), Some(Codec::Msbc));
        assert_eq!(Codec::from_id(3), None);
        assert_eq!(Codec::Msbc.id(), 2);
    }
}
