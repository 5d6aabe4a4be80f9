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

//! Mapping from the AG's indicator positions to known indicators.
//!
//! The AG declares its indicators once with `+CIND: ("name",(min,max)),...`
//! and afterwards refers to them by position, either as a full value list
//! (`+CIND: v1,v2,...`, 0-based order) or one at a time (`+CIEV: n,v`,
//! 1-based). Both forms go through [`IndicatorTable::translate`].

use serde::Serialize;
use tracing::{debug, warn};

use super::parser::IndicatorRange;
use crate::hfp::constants::at::MAX_INDICATORS;

/// Indicators this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Service,
    Call,
    CallSetup,
    CallHeld,
    Signal,
    Roam,
    BatteryCharge,
}

struct KnownIndicator {
    name: &'static str,
    indicator: Indicator,
    min: u32,
    max: u32,
}

const KNOWN: &[KnownIndicator] = &[
    KnownIndicator { name: "service", indicator: Indicator::Service, min: 0, max: 1 },
    KnownIndicator { name: "call", indicator: Indicator::Call, min: 0, max: 1 },
    KnownIndicator { name: "callsetup", indicator: Indicator::CallSetup, min: 0, max: 3 },
    KnownIndicator { name: "call_setup", indicator: Indicator::CallSetup, min: 0, max: 3 },
    KnownIndicator { name: "callheld", indicator: Indicator::CallHeld, min: 0, max: 2 },
    KnownIndicator { name: "signal", indicator: Indicator::Signal, min: 0, max: 5 },
    KnownIndicator { name: "roam", indicator: Indicator::Roam, min: 0, max: 1 },
    KnownIndicator { name: "battchg", indicator: Indicator::BatteryCharge, min: 0, max: 5 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    indicator: Indicator,
    min: u32,
    max: u32,
}

/// Position to indicator mapping built from the AG's declaration.
#[derive(Debug, Default)]
pub struct IndicatorTable {
    slots: Vec<Option<Slot>>,
    populated: bool,
}

impl IndicatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from `+CIND=?` ranges.
    ///
    /// Unknown names or ranges that differ from the profile's leave the
    /// position unmapped.
    pub fn populate(&mut self, ranges: &[IndicatorRange]) {
        if ranges.len() > MAX_INDICATORS {
            warn!(
                "AG declared {} indicators, tracking the first {}",
                ranges.len(),
                MAX_INDICATORS
            );
        }
        self.slots = ranges
            .iter()
            .take(MAX_INDICATORS)
            .map(|range| {
                let name = range.name.to_ascii_lowercase();
                KNOWN
                    .iter()
                    .find(|k| k.name == name && k.min == range.min && k.max == range.max)
                    .map(|k| Slot {
                        indicator: k.indicator,
                        min: k.min,
                        max: k.max,
                    })
            })
            .collect();
        self.populated = true;
        debug!(
            "Indicator table: {} positions, {} mapped",
            self.slots.len(),
            self.slots.iter().flatten().count()
        );
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Translate a 0-based position and value; `None` if the position is
    /// unmapped or the value is outside the declared range.
    pub fn translate(&self, position: usize, value: u32) -> Option<(Indicator, u32)> {
        let slot = (*self.slots.get(position)?)?;
        if value < slot.min || value > slot.max {
            warn!(
                "Indicator {:?} value {} outside {}..={}",
                slot.indicator, value, slot.min, slot.max
            );
            return None;
        }
        Some((slot.indicator, value))
    }

    /// Translate a `+CIND:` value list.
    pub fn translate_all(&self, values: &[u32]) -> Vec<(Indicator, u32)> {
        values
            .iter()
            .enumerate()
            .filter_map(|(position, value)| self.translate(position, *value))
            .collect()
    }

    /// Translate a `+CIEV:` event, whose position is 1-based.
    pub fn translate_event(&self, position: usize, value: u32) -> Option<(Indicator, u32)> {
        self.translate(position.checked_sub(1)?, value)
    }

    /// `AT+BIA` activation list: known indicators on, everything else off.
    pub fn activation_list(&self) -> String {
        self.slots
            .iter()
            .map(|slot| if slot.is_some() { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.populated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(name: &str, min: u32, max: u32) -> IndicatorRange {
        IndicatorRange {
            name: name.to_string(),
            min,
            max,
        }
    }

    fn table() -> IndicatorTable {
        let mut table = IndicatorTable::new();
        table.populate(&[
            range("call", 0, 1),
            range("call_setup", 0, 3),
            range("service", 0, 1),
            range("signal", 0, 5),
            range("message", 0, 1),
            range("battchg", 0, 5),
        ]);
        table
    }

    #[test]
    fn test_positions_follow_declaration_order() {
        let table = table();
        assert!(table.is_populated());
        assert_eq!(table.translate(0, 1), Some((Indicator::Call, 1)));
        assert_eq!(table.translate(1, 2), Some((Indicator::CallSetup, 2)));
        assert_eq!(table.translate(4, 1), None);
        assert_eq!(table.translate(6, 1), None);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let table = table();
        assert_eq!(table.translate(3, 6), None);
        assert_eq!(table.translate(3, 5), Some((Indicator::Signal, 5)));
    }

    #[test]
    fn test_range_mismatch_leaves_position_unmapped() {
        let mut table = IndicatorTable::new();
        table.populate(&[range("signal", 0, 4), range("Roam", 0, 1)]);
        assert_eq!(table.translate(0, 1), None);
        assert_eq!(table.translate(1, 1), Some((Indicator::Roam, 1)));
    }

    #[test]
    fn test_list_and_event_forms_agree() {
        let table = table();
        let from_list = table.translate_all(&[0, 3, 1, 4, 1, 2]);
        assert_eq!(
            from_list,
            vec![
                (Indicator::Call, 0),
                (Indicator::CallSetup, 3),
                (Indicator::Service, 1),
                (Indicator::Signal, 4),
                (Indicator::BatteryCharge, 2),
            ]
        );
        assert_eq!(table.translate_event(4, 4), Some((Indicator::Signal, 4)));
        assert_eq!(table.translate_event(0, 1), None);
    }

    #[test]
    fn test_activation_list() {
        assert_eq!(table().activation_list(), "1,1,1,1,0,1");
    }

    #[test]
    fn test_declaration_capped() {
        let ranges: Vec<_> = (0..25).map(|_| range("service", 0, 1)).collect();
        let mut table = IndicatorTable::new();
        table.populate(&ranges);
        assert_eq!(table.translate(19, 1), Some((Indicator::Service, 1)));
        assert_eq!(table.translate(20, 1), None);
    }
}
