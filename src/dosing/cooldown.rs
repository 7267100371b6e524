//! Last-dose bookkeeping per pond and substance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::Substance;

/// Last time each substance was dosed, per pond.
///
/// Timestamps never move backwards: recording an older time than the one
/// held is ignored.
#[derive(Debug, Default)]
pub struct CooldownState {
    last_dose: HashMap<(i64, Substance), DateTime<Utc>>,
}

impl CooldownState {
    /// Create an empty state; every substance counts as never dosed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dose of `substance` in `pond_id` at `at`.
    pub fn record(&mut self, pond_id: i64, substance: Substance, at: DateTime<Utc>) {
        self.last_dose
            .entry((pond_id, substance))
            .and_modify(|prev| {
                if at > *prev {
                    *prev = at;
                }
            })
            .or_insert(at);
    }

    /// Last dose time of one substance.
    pub fn last_dose(&self, pond_id: i64, substance: Substance) -> Option<DateTime<Utc>> {
        self.last_dose.get(&(pond_id, substance)).copied()
    }

    /// Snapshot of every recorded substance for one pond.
    pub fn for_pond(&self, pond_id: i64) -> HashMap<Substance, DateTime<Utc>> {
        self.last_dose
            .iter()
            .filter(|((pond, _), _)| *pond == pond_id)
            .map(|((_, substance), at)| (*substance, *at))
            .collect()
    }
}
