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

//! AT result line grammar.
//!
//! Each line is offered to an ordered list of matchers. A matcher either
//! does not recognise the line, recognises it but rejects its arguments,
//! or parses it. The last matcher accepts anything, so every terminated
//! line is consumed.

use crate::hfp::constants::at::{MAX_NUMBER_LEN, MAX_OPERATOR_LEN};
use crate::hfp::constants::CallHoldFeatures;
use crate::hfp::error::ParseError;
use crate::hfp::events::{CallEntry, ResultKind};

/// One indicator as declared by `+CIND: ("name",(min,max)),...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRange {
    pub name: String,
    pub min: u32,
    pub max: u32,
}

/// A parsed result line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResponse {
    /// Terminal result with its CME error code, or 0.
    Final(ResultKind, u32),
    Ring,
    Brsf(u32),
    IndicatorRanges(Vec<IndicatorRange>),
    IndicatorValues(Vec<u32>),
    IndicatorEvent { position: usize, value: u32 },
    CallHold(CallHoldFeatures),
    CodecSelect(u32),
    InbandRing(bool),
    VoiceRecognition(bool),
    SpeakerGain(u32),
    MicrophoneGain(u32),
    CallWaiting(String),
    CallerId(String),
    Operator(String),
    CurrentCall(CallEntry),
    SubscriberNumber { number: String, service: u32 },
    ResponseAndHold(u32),
    VoiceTagNumber(String),
    Unknown(String),
}

/// Outcome of offering a line to one matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    NoMatch,
    Invalid(ParseError),
    Parsed(AtResponse),
}

type Matcher = fn(&str) -> MatchOutcome;

const MATCHERS: &[Matcher] = &[
    match_ok,
    match_error,
    match_ring,
    match_brsf,
    match_cind,
    match_ciev,
    match_chld,
    match_bcs,
    match_bsir,
    match_bvra,
    match_vgs,
    match_vgm,
    match_ccwa,
    match_clip,
    match_cops,
    match_clcc,
    match_cnum,
    match_btrh,
    match_binp,
    match_cme_error,
    match_busy,
    match_delayed,
    match_no_carrier,
    match_no_answer,
    match_blacklisted,
    match_unknown,
];

/// Parse one line with its terminator removed.
pub fn parse_line(line: &str) -> MatchOutcome {
    for matcher in MATCHERS {
        match matcher(line) {
            MatchOutcome::NoMatch => continue,
            outcome => return outcome,
        }
    }
    MatchOutcome::NoMatch
}

/// Byte cursor over the argument part of a line.
struct Scanner<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.s.as_bytes().get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        self.skip_spaces();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8, what: &'static str) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(ParseError::Expected(what))
        }
    }

    fn at_number(&mut self) -> bool {
        self.skip_spaces();
        self.peek().is_some_and(|c| c.is_ascii_digit())
    }

    fn number(&mut self) -> Result<u32, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ParseError::Expected("number"));
        }
        self.s[start..self.pos]
            .parse()
            .map_err(|_| ParseError::NumberOutOfRange)
    }

    fn quoted(&mut self) -> Result<&'a str, ParseError> {
        self.expect(b'"', "quoted string")?;
        let start = self.pos;
        match self.s[start..].find('"') {
            Some(len) => {
                self.pos = start + len + 1;
                Ok(&self.s[start..start + len])
            }
            None => Err(ParseError::UnterminatedString),
        }
    }

    /// Unquoted token up to the next `,` or `)`.
    fn token(&mut self) -> &'a str {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(|c| c != b',' && c != b')') {
            self.pos += 1;
        }
        self.s[start..self.pos].trim()
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        self.skip_spaces();
        if self.pos >= self.s.len() {
            Ok(())
        } else {
            Err(ParseError::TrailingData(self.s[self.pos..].to_string()))
        }
    }
}

/// Truncate to at most `max` bytes on a character boundary.
fn bounded(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn exact(line: &str, word: &str, response: AtResponse) -> MatchOutcome {
    if line == word {
        MatchOutcome::Parsed(response)
    } else {
        MatchOutcome::NoMatch
    }
}

fn with_args(
    line: &str,
    prefix: &str,
    parse: impl FnOnce(&mut Scanner<'_>) -> Result<AtResponse, ParseError>,
) -> MatchOutcome {
    let Some(rest) = line.strip_prefix(prefix) else {
        return MatchOutcome::NoMatch;
    };
    let mut scanner = Scanner::new(rest);
    match parse(&mut scanner) {
        Ok(response) => MatchOutcome::Parsed(response),
        Err(e) => MatchOutcome::Invalid(e),
    }
}

fn single_number(
    line: &str,
    prefix: &str,
    build: impl FnOnce(u32) -> AtResponse,
) -> MatchOutcome {
    with_args(line, prefix, |sc| {
        let value = sc.number()?;
        sc.finish()?;
        Ok(build(value))
    })
}

fn flag(value: u32) -> Result<bool, ParseError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ParseError::NumberOutOfRange),
    }
}

fn match_ok(line: &str) -> MatchOutcome {
    exact(line, "OK", AtResponse::Final(ResultKind::Ok, 0))
}

fn match_error(line: &str) -> MatchOutcome {
    exact(line, "ERROR", AtResponse::Final(ResultKind::Error, 0))
}

fn match_ring(line: &str) -> MatchOutcome {
    exact(line, "RING", AtResponse::Ring)
}

fn match_brsf(line: &str) -> MatchOutcome {
    single_number(line, "+BRSF:", AtResponse::Brsf)
}

fn match_cind(line: &str) -> MatchOutcome {
    with_args(line, "+CIND:", |sc| {
        sc.skip_spaces();
        if sc.peek() == Some(b'(') {
            let mut ranges = Vec::new();
            loop {
                sc.expect(b'(', "(")?;
                let name = sc.quoted()?;
                sc.expect(b',', ",")?;
                sc.expect(b'(', "(")?;
                let min = sc.number()?;
                let mut max = min;
                while sc.eat(b'-') || sc.eat(b',') {
                    max = sc.number()?;
                }
                sc.expect(b')', ")")?;
                sc.expect(b')', ")")?;
                if max < min {
                    return Err(ParseError::Malformed(format!("empty range for {name}")));
                }
                ranges.push(IndicatorRange {
                    name: name.to_string(),
                    min,
                    max,
                });
                if !sc.eat(b',') {
                    break;
                }
            }
            sc.finish()?;
            Ok(AtResponse::IndicatorRanges(ranges))
        } else {
            let mut values = vec![sc.number()?];
            while sc.eat(b',') {
                values.push(sc.number()?);
            }
            sc.finish()?;
            Ok(AtResponse::IndicatorValues(values))
        }
    })
}

fn match_ciev(line: &str) -> MatchOutcome {
    with_args(line, "+CIEV:", |sc| {
        let position = sc.number()? as usize;
        sc.expect(b',', ",")?;
        let value = sc.number()?;
        sc.finish()?;
        Ok(AtResponse::IndicatorEvent { position, value })
    })
}

fn match_chld(line: &str) -> MatchOutcome {
    with_args(line, "+CHLD:", |sc| {
        let parenthesised = sc.eat(b'(');
        let mut features = CallHoldFeatures::empty();
        loop {
            let feature = match sc.token() {
                "0" => CallHoldFeatures::RELEASE,
                "1" => CallHoldFeatures::RELEASE_ACCEPT,
                "1x" | "1X" => CallHoldFeatures::RELEASE_X,
                "2" => CallHoldFeatures::HOLD_ACCEPT,
                "2x" | "2X" => CallHoldFeatures::PRIVATE_X,
                "3" => CallHoldFeatures::MERGE,
                "4" => CallHoldFeatures::MERGE_DETACH,
                "" => return Err(ParseError::Expected("hold operation")),
                _ => CallHoldFeatures::empty(),
            };
            features |= feature;
            if !sc.eat(b',') {
                break;
            }
        }
        if parenthesised {
            sc.expect(b')', ")")?;
        }
        sc.finish()?;
        Ok(AtResponse::CallHold(features))
    })
}

fn match_bcs(line: &str) -> MatchOutcome {
    single_number(line, "+BCS:", AtResponse::CodecSelect)
}

fn match_bsir(line: &str) -> MatchOutcome {
    with_args(line, "+BSIR:", |sc| {
        let enabled = flag(sc.number()?)?;
        sc.finish()?;
        Ok(AtResponse::InbandRing(enabled))
    })
}

fn match_bvra(line: &str) -> MatchOutcome {
    // Later profile versions append voice recognition state fields.
    with_args(line, "+BVRA:", |sc| Ok(AtResponse::VoiceRecognition(flag(sc.number()?)?)))
}

fn match_vgs(line: &str) -> MatchOutcome {
    match single_number(line, "+VGS:", AtResponse::SpeakerGain) {
        MatchOutcome::NoMatch => single_number(line, "+VGS=", AtResponse::SpeakerGain),
        outcome => outcome,
    }
}

fn match_vgm(line: &str) -> MatchOutcome {
    match single_number(line, "+VGM:", AtResponse::MicrophoneGain) {
        MatchOutcome::NoMatch => single_number(line, "+VGM=", AtResponse::MicrophoneGain),
        outcome => outcome,
    }
}

/// `"number",type[,...]`
fn caller_number(sc: &mut Scanner<'_>) -> Result<String, ParseError> {
    let number = sc.quoted()?;
    sc.expect(b',', ",")?;
    sc.number()?;
    Ok(bounded(number, MAX_NUMBER_LEN))
}

fn match_ccwa(line: &str) -> MatchOutcome {
    with_args(line, "+CCWA:", |sc| Ok(AtResponse::CallWaiting(caller_number(sc)?)))
}

fn match_clip(line: &str) -> MatchOutcome {
    with_args(line, "+CLIP:", |sc| Ok(AtResponse::CallerId(caller_number(sc)?)))
}

fn match_cops(line: &str) -> MatchOutcome {
    with_args(line, "+COPS:", |sc| {
        sc.number()?;
        let mut name = String::new();
        if sc.eat(b',') {
            sc.number()?;
            sc.expect(b',', ",")?;
            name = bounded(sc.quoted()?, MAX_OPERATOR_LEN);
        }
        sc.finish()?;
        Ok(AtResponse::Operator(name))
    })
}

fn match_clcc(line: &str) -> MatchOutcome {
    with_args(line, "+CLCC:", |sc| {
        let index = sc.number()?;
        sc.expect(b',', ",")?;
        let incoming = flag(sc.number()?)?;
        sc.expect(b',', ",")?;
        let status = sc.number()?;
        sc.expect(b',', ",")?;
        let mode = sc.number()?;
        sc.expect(b',', ",")?;
        let multiparty = flag(sc.number()?)?;
        let mut number = None;
        let mut number_type = None;
        if sc.eat(b',') {
            number = Some(bounded(sc.quoted()?, MAX_NUMBER_LEN));
            if sc.eat(b',') {
                number_type = Some(sc.number()?);
            }
        }
        sc.finish()?;
        Ok(AtResponse::CurrentCall(CallEntry {
            index,
            incoming,
            status,
            mode,
            multiparty,
            number,
            number_type,
        }))
    })
}

fn match_cnum(line: &str) -> MatchOutcome {
    with_args(line, "+CNUM:", |sc| {
        sc.skip_spaces();
        if sc.peek() == Some(b'"') {
            sc.quoted()?;
        }
        sc.expect(b',', ",")?;
        let number = bounded(sc.quoted()?, MAX_NUMBER_LEN);
        sc.expect(b',', ",")?;
        sc.number()?;
        let mut service = 4;
        if sc.eat(b',') {
            if sc.at_number() {
                sc.number()?;
            }
            if sc.eat(b',') {
                service = sc.number()?;
            }
        }
        sc.finish()?;
        Ok(AtResponse::SubscriberNumber { number, service })
    })
}

fn match_btrh(line: &str) -> MatchOutcome {
    single_number(line, "+BTRH:", AtResponse::ResponseAndHold)
}

fn match_binp(line: &str) -> MatchOutcome {
    with_args(line, "+BINP:", |sc| {
        let number = bounded(sc.quoted()?, MAX_NUMBER_LEN);
        sc.finish()?;
        Ok(AtResponse::VoiceTagNumber(number))
    })
}

fn match_cme_error(line: &str) -> MatchOutcome {
    single_number(line, "+CME ERROR:", |code| {
        AtResponse::Final(ResultKind::CmeError, code)
    })
}

fn match_busy(line: &str) -> MatchOutcome {
    exact(line, "BUSY", AtResponse::Final(ResultKind::Busy, 0))
}

fn match_delayed(line: &str) -> MatchOutcome {
    exact(line, "DELAYED", AtResponse::Final(ResultKind::Delayed, 0))
}

fn match_no_carrier(line: &str) -> MatchOutcome {
    exact(line, "NO CARRIER", AtResponse::Final(ResultKind::NoCarrier, 0))
}

fn match_no_answer(line: &str) -> MatchOutcome {
    exact(line, "NO ANSWER", AtResponse::Final(ResultKind::NoAnswer, 0))
}

fn match_blacklisted(line: &str) -> MatchOutcome {
    exact(line, "BLACKLISTED", AtResponse::Final(ResultKind::Blacklisted, 0))
}

fn match_unknown(line: &str) -> MatchOutcome {
    MatchOutcome::Parsed(AtResponse::Unknown(line.to_string()))
}
