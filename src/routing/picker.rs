//! Target selection strategies.

use rand::Rng;
use std::str::FromStr;
use std::sync::Arc;

use crate::routing::error::StrategyError;
use crate::routing::table::{Route, Target};

/// Algorithm choosing one target of a matched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    /// Every target equally likely, weights ignored.
    Random,
    /// Rotate through targets using the route's cursor.
    RoundRobin,
    /// Probability proportional to the normalized weight.
    WeightedRandom,
}

const PICKERS: &[(&str, PickerKind)] = &[
    ("rnd", PickerKind::Random),
    ("rr", PickerKind::RoundRobin),
    ("wrnd", PickerKind::WeightedRandom),
];

impl PickerKind {
    pub fn name(self) -> &'static str {
        PICKERS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("wrnd")
    }

    pub fn pick(self, route: &Route) -> Option<&Arc<Target>> {
        let targets = &route.targets;
        if targets.is_empty() {
            return None;
        }
        match self {
            PickerKind::Random => targets.get(rand::thread_rng().gen_range(0..targets.len())),
            PickerKind::RoundRobin => targets.get(route.next_cursor() % targets.len()),
            PickerKind::WeightedRandom => {
                let weights = route.weights();
                let roll: f64 = rand::thread_rng().gen();
                let mut acc = 0.0;
                for (target, weight) in targets.iter().zip(weights) {
                    acc += weight;
                    if roll < acc {
                        return Some(target);
                    }
                }
                // Rounding left `acc` just under 1.0.
                weights
                    .iter()
                    .rposition(|w| *w > 0.0)
                    .and_then(|i| targets.get(i))
            }
        }
    }
}

impl Default for PickerKind {
    fn default() -> Self {
        PickerKind::WeightedRandom
    }
}

impl FromStr for PickerKind {
    type Err = StrategyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        PICKERS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| StrategyError::UnknownPicker {
                name: name.to_string(),
                expected: PICKERS.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", "),
            })
    }
}
