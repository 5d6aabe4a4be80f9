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

//! Error and reason types surfaced by the core.

use serde::Serialize;
use thiserror::Error;

/// Why an open attempt did not produce a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenFailure {
    #[error("no resources for another connection")]
    ResourceExhausted,
    #[error("service discovery failed")]
    DiscoveryFailed,
    #[error("transport connection failed")]
    TransportFailed,
}

/// Why an established link was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    #[error("closed on request")]
    Requested,
    #[error("profile deregistered")]
    Deregistered,
    #[error("transport link lost")]
    TransportLost,
    #[error("no response from audio gateway")]
    ResponseTimeout,
    #[error("service level connection setup failed")]
    SlcFailed,
    #[error("receive buffer overflow")]
    ParserOverflow,
}

/// Failure to parse a protocol unit or value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("number out of range")]
    NumberOutOfRange,
    #[error("unterminated quoted string")]
    UnterminatedString,
    #[error("trailing data: {0:?}")]
    TrailingData(String),
    #[error("malformed: {0}")]
    Malformed(String),
}

/// Rejection of an outgoing command before transmission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0} is reserved for connection setup")]
    Reserved(&'static str),
    #[error("{0} needs a text argument")]
    MissingText(&'static str),
    #[error("text argument longer than {0} bytes")]
    TextTooLong(usize),
    #[error("invalid character {0:?} in argument")]
    InvalidCharacter(char),
    #[error("value {value} out of range for {command}")]
    ValueOutOfRange { command: &'static str, value: u32 },
}
