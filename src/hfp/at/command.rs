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

//! Outgoing AT commands.

use serde::Serialize;

use crate::hfp::constants::{at::MAX_COMMAND_TEXT_LEN, codec_id};
use crate::hfp::error::CommandError;

/// Commands the Hands-Free unit can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtCommand {
    // Connection setup, internal only.
    Brsf,
    Bac,
    CindTest,
    CindRead,
    Cmer,
    ChldTest,
    Bia,
    Ccwa,
    Cmee,
    CopsFormat,
    Clip,
    Bcs,

    // Application commands.
    Vgs,
    Vgm,
    Answer,
    HangUp,
    Dial,
    DialMemory,
    Redial,
    Dtmf,
    Chld,
    Bvra,
    Binp,
    Nrec,
    Cnum,
    Clcc,
    CopsRead,
    BtrhRead,
    Btrh,
    Bcc,
}

impl AtCommand {
    /// Parse an application command name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vgs" | "speaker" => Some(Self::Vgs),
            "vgm" | "mic" => Some(Self::Vgm),
            "answer" => Some(Self::Answer),
            "hangup" => Some(Self::HangUp),
            "dial" => Some(Self::Dial),
            "dial_memory" => Some(Self::DialMemory),
            "redial" => Some(Self::Redial),
            "dtmf" => Some(Self::Dtmf),
            "chld" => Some(Self::Chld),
            "bvra" => Some(Self::Bvra),
            "binp" => Some(Self::Binp),
            "nrec" => Some(Self::Nrec),
            "cnum" => Some(Self::Cnum),
            "clcc" => Some(Self::Clcc),
            "cops" => Some(Self::CopsRead),
            "btrh?" => Some(Self::BtrhRead),
            "btrh" => Some(Self::Btrh),
            "bcc" => Some(Self::Bcc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brsf => "+BRSF",
            Self::Bac => "+BAC",
            Self::CindTest => "+CIND=?",
            Self::CindRead => "+CIND?",
            Self::Cmer => "+CMER",
            Self::ChldTest => "+CHLD=?",
            Self::Bia => "+BIA",
            Self::Ccwa => "+CCWA",
            Self::Cmee => "+CMEE",
            Self::CopsFormat => "+COPS=3,0",
            Self::Clip => "+CLIP",
            Self::Bcs => "+BCS",
            Self::Vgs => "+VGS",
            Self::Vgm => "+VGM",
            Self::Answer => "A",
            Self::HangUp => "+CHUP",
            Self::Dial => "D",
            Self::DialMemory => "D>",
            Self::Redial => "+BLDN",
            Self::Dtmf => "+VTS",
            Self::Chld => "+CHLD",
            Self::Bvra => "+BVRA",
            Self::Binp => "+BINP",
            Self::Nrec => "+NREC",
            Self::Cnum => "+CNUM",
            Self::Clcc => "+CLCC",
            Self::CopsRead => "+COPS?",
            Self::BtrhRead => "+BTRH?",
            Self::Btrh => "+BTRH",
            Self::Bcc => "+BCC",
        }
    }

    /// Whether the application may submit this command.
    pub fn is_application_command(&self) -> bool {
        !matches!(
            self,
            Self::Brsf
                | Self::Bac
                | Self::CindTest
                | Self::CindRead
                | Self::Cmer
                | Self::ChldTest
                | Self::Bia
                | Self::Ccwa
                | Self::Cmee
                | Self::CopsFormat
                | Self::Clip
                | Self::Bcs
        )
    }
}

/// A command with up to two numeric and one text argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtRequest {
    pub command: AtCommand,
    pub val1: u32,
    pub val2: u32,
    pub text: Option<String>,
}

impl AtRequest {
    pub fn new(command: AtCommand) -> Self {
        Self {
            command,
            val1: 0,
            val2: 0,
            text: None,
        }
    }

    pub fn with_value(command: AtCommand, val1: u32) -> Self {
        Self {
            val1,
            ..Self::new(command)
        }
    }

    pub fn with_values(command: AtCommand, val1: u32, val2: u32) -> Self {
        Self {
            val1,
            val2,
            ..Self::new(command)
        }
    }

    pub fn with_text(command: AtCommand, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(command)
        }
    }

    pub fn dial(number: impl Into<String>) -> Self {
        Self::with_text(AtCommand::Dial, number)
    }

    fn text(&self) -> Result<&str, CommandError> {
        let text = self
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(CommandError::MissingText(self.command.as_str()))?;
        if text.len() > MAX_COMMAND_TEXT_LEN {
            return Err(CommandError::TextTooLong(MAX_COMMAND_TEXT_LEN));
        }
        Ok(text)
    }

    fn bounded(&self, value: u32, max: u32) -> Result<u32, CommandError> {
        if value > max {
            Err(CommandError::ValueOutOfRange {
                command: self.command.as_str(),
                value,
            })
        } else {
            Ok(value)
        }
    }

    /// Serialize to the wire form, terminated by CR.
    pub fn encode(&self) -> Result<String, CommandError> {
        let body = match self.command {
            AtCommand::Brsf => format!("AT+BRSF={}", self.val1),
            AtCommand::Bac => {
                let mut codecs = vec![codec_id::CVSD.to_string()];
                if self.val1 & (1 << codec_id::MSBC) != 0 {
                    codecs.push(codec_id::MSBC.to_string());
                }
                format!("AT+BAC={}", codecs.join(","))
            }
            AtCommand::CindTest => "AT+CIND=?".to_string(),
            AtCommand::CindRead => "AT+CIND?".to_string(),
            AtCommand::Cmer => format!("AT+CMER=3,0,0,{}", self.bounded(self.val1, 1)?),
            AtCommand::ChldTest => "AT+CHLD=?".to_string(),
            AtCommand::Bia => {
                let mask = self.text()?;
                if let Some(c) = mask.chars().find(|c| !matches!(c, '0' | '1' | ',')) {
                    return Err(CommandError::InvalidCharacter(c));
                }
                format!("AT+BIA={mask}")
            }
            AtCommand::Ccwa => format!("AT+CCWA={}", self.bounded(self.val1, 1)?),
            AtCommand::Cmee => format!("AT+CMEE={}", self.bounded(self.val1, 1)?),
            AtCommand::CopsFormat => "AT+COPS=3,0".to_string(),
            AtCommand::Clip => format!("AT+CLIP={}", self.bounded(self.val1, 1)?),
            AtCommand::Bcs => format!("AT+BCS={}", self.val1),
            AtCommand::Vgs => format!("AT+VGS={}", self.bounded(self.val1, 15)?),
            AtCommand::Vgm => format!("AT+VGM={}", self.bounded(self.val1, 15)?),
            AtCommand::Answer => "ATA".to_string(),
            AtCommand::HangUp => "AT+CHUP".to_string(),
            AtCommand::Dial => {
                let number = self.text()?;
                if let Some(c) = number
                    .chars()
                    .find(|c| !(c.is_ascii_digit() || matches!(c, '+' | '*' | '#' | ',' | 'p' | 'w')))
                {
                    return Err(CommandError::InvalidCharacter(c));
                }
                format!("ATD{number};")
            }
            AtCommand::DialMemory => format!("ATD>{};", self.val1),
            AtCommand::Redial => "AT+BLDN".to_string(),
            AtCommand::Dtmf => {
                let code = self.text()?;
                let mut chars = code.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D') => {
                        format!("AT+VTS={c}")
                    }
                    (Some(c), None) => return Err(CommandError::InvalidCharacter(c)),
                    _ => return Err(CommandError::TextTooLong(1)),
                }
            }
            AtCommand::Chld => {
                let op = self.bounded(self.val1, 4)?;
                if self.val2 > 0 {
                    format!("AT+CHLD={op}{}", self.val2)
                } else {
                    format!("AT+CHLD={op}")
                }
            }
            AtCommand::Bvra => format!("AT+BVRA={}", self.bounded(self.val1, 1)?),
            AtCommand::Binp => "AT+BINP=1".to_string(),
            AtCommand::Nrec => "AT+NREC=0".to_string(),
            AtCommand::Cnum => "AT+CNUM".to_string(),
            AtCommand::Clcc => "AT+CLCC".to_string(),
            AtCommand::CopsRead => "AT+COPS?".to_string(),
            AtCommand::BtrhRead => "AT+BTRH?".to_string(),
            AtCommand::Btrh => format!("AT+BTRH={}", self.bounded(self.val1, 2)?),
            AtCommand::Bcc => "AT+BCC".to_string(),
        };
        Ok(body + "\r")
    }
}
