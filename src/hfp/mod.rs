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

//! Hands-Free Profile client core.
//!
//! Pure state machines: nothing in here performs I/O. Callers feed
//! [`Event`]s in and carry out the returned [`Effect`]s.

pub mod at;
pub mod audio;
pub mod client;
pub mod constants;
pub mod effects;
pub mod error;
pub mod events;
pub mod session;
pub mod types;

pub use at::{AtCommand, AtRequest, Indicator};
pub use client::HandsFreeClient;
pub use effects::{
    AudioRequest, DiscoveryRequest, Effect, TimerKind, TimerRequest, TimerToken, TransportRequest,
};
pub use error::{CloseReason, CommandError, OpenFailure, ParseError};
pub use events::{CallEntry, ClientEvent, Event, ResultKind};
pub use session::{LinkInfo, Session, SessionState};
pub use types::{Codec, Direction, PeerAddress, Role, ServiceRecord, TransportHandle, VolumeTarget};
