//! Dosing decision engine.
//!
//! [`evaluate`] is pure: it takes the water readings, the last-dose times
//! and the clock, and returns a [`DosePlan`]. It owns no state. Cooldown
//! bookkeeping lives in [`cooldown::CooldownState`] and publishing in
//! [`dispatch::AutoDoser`].
//!
//! Rules are independent of each other:
//!
//! | Substance | Channel | Trigger |
//! |---|---|---|
//! | Probiotic | pump 0 | more than `probiotic_interval_days` since last dose |
//! | CaCO3 | servo 0 | pH below `ph_min` |
//! | MgSO4 | servo 1 | temperature above `temp_max` |
//! | Green extract | pump 1 | water classified as clear |
//!
//! Bad constants (non-positive or non-finite) dose nothing.

pub mod command;
pub mod cooldown;
pub mod dispatch;

use std::collections::HashMap;
use std::f64::consts::PI;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DosingConfig;

pub use command::{CommandKind, DoseCommand};

/// Number of servo powder channels.
pub const POWDER_CHANNELS: usize = 2;
/// Number of liquid pump channels.
pub const LIQUID_CHANNELS: usize = 2;

/// A dosable substance and the actuator channel it is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Substance {
    /// Biologic liquid, dosed on a fixed cadence.
    Probiotic,
    /// Acid buffer powder, dosed on low pH.
    Caco3,
    /// Temperature buffer powder, dosed on high temperature.
    Mgso4,
    /// Clarifying liquid, dosed when the water is too clear.
    GreenExtract,
}

impl Substance {
    /// Every substance, in channel order.
    pub const ALL: [Self; 4] = [Self::Caco3, Self::Mgso4, Self::Probiotic, Self::GreenExtract];

    /// Actuator family and channel index.
    pub fn channel(self) -> (CommandKind, usize) {
        match self {
            Self::Caco3 => (CommandKind::Powder, 0),
            Self::Mgso4 => (CommandKind::Powder, 1),
            Self::Probiotic => (CommandKind::Liquid, 0),
            Self::GreenExtract => (CommandKind::Liquid, 1),
        }
    }
}

/// Water-clarity verdict from the external image classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClarityVerdict {
    /// Water is clear (needs clarifying liquid).
    Clear,
    /// Anything else, including no verdict.
    NotClear,
}

impl ClarityVerdict {
    /// Classify the classifier's free-text output.
    ///
    /// Clear when the text holds the word `clear` (any case) or one of the
    /// Thai phrases for clear water.
    pub fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        let has_word = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "clear");
        if has_word || lower.contains("น้ำใส") || lower.contains("ใสเกิน") {
            Self::Clear
        } else {
            Self::NotClear
        }
    }
}

/// Everything the engine looks at for one decision.
#[derive(Debug, Clone)]
pub struct DoseInputs {
    /// Target pond.
    pub pond_id: i64,
    /// Pond surface, rai.
    pub pond_size_rai: f64,
    /// Water pH.
    pub ph: f64,
    /// Water temperature, °C.
    pub temperature: f64,
    /// Dissolved oxygen, mg/L. Accepted but not used by any rule.
    pub dissolved_oxygen: f64,
    /// Clarity verdict for the latest water image.
    pub clarity: ClarityVerdict,
    /// Decision time.
    pub now: DateTime<Utc>,
}

/// Result of one evaluation: per-channel magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosePlan {
    /// Target pond.
    pub pond_id: i64,
    /// Servo rounds per powder channel.
    pub servo_rounds: [u32; POWDER_CHANNELS],
    /// Pump seconds per liquid channel.
    pub pump_durations: [u32; LIQUID_CHANNELS],
}

impl DosePlan {
    /// True when nothing is to be dosed.
    pub fn is_empty(&self) -> bool {
        self.servo_rounds.iter().chain(&self.pump_durations).all(|&m| m == 0)
    }

    /// Commands to publish: powder first, then liquid, skipping all-zero ones.
    pub fn commands(&self) -> Vec<DoseCommand> {
        [
            DoseCommand::new(CommandKind::Powder, self.pond_id, self.servo_rounds.to_vec()),
            DoseCommand::new(CommandKind::Liquid, self.pond_id, self.pump_durations.to_vec()),
        ]
        .into_iter()
        .filter(|cmd| !cmd.is_noop())
        .collect()
    }

    /// Substances with a non-zero magnitude within the given command kind.
    pub fn substances_in(&self, kind: CommandKind) -> Vec<Substance> {
        let magnitudes: &[u32] = match kind {
            CommandKind::Powder => &self.servo_rounds,
            CommandKind::Liquid => &self.pump_durations,
        };
        Substance::ALL
            .into_iter()
            .filter(|s| {
                let (k, idx) = s.channel();
                k == kind && magnitudes.get(idx).is_some_and(|&m| m > 0)
            })
            .collect()
    }
}

/// Run every rule against `inputs`.
///
/// `last_dose` holds the last dose time per substance for this pond; a
/// missing entry means never dosed.
pub fn evaluate(
    rules: &DosingConfig,
    inputs: &DoseInputs,
    last_dose: &HashMap<Substance, DateTime<Utc>>,
) -> DosePlan {
    let size = inputs.pond_size_rai;
    let grams_per_round =
        grams_per_round(rules.servo_radius_cm, rules.servo_height_cm, rules.bulk_density);

    let mut servo_rounds = [0_u32; POWDER_CHANNELS];
    let mut pump_durations = [0_u32; LIQUID_CHANNELS];

    let probiotic_due = match last_dose.get(&Substance::Probiotic) {
        Some(at) => Duration::try_days(rules.probiotic_interval_days)
            .is_some_and(|interval| inputs.now.signed_duration_since(*at) > interval),
        None => true,
    };
    if probiotic_due {
        let ml = quantity(rules.probiotic_ml_per_rai, size);
        pump_durations[0] = to_magnitude(liquid_seconds(ml, rules.pump_ml_per_sec));
    }

    if inputs.ph < rules.ph_min {
        let grams = quantity(rules.caco3_g_per_rai, size);
        servo_rounds[0] = to_magnitude(powder_rounds(grams, grams_per_round));
    }

    if inputs.temperature > rules.temp_max {
        let grams = quantity(rules.mgso4_g_per_rai, size);
        servo_rounds[1] = to_magnitude(powder_rounds(grams, grams_per_round));
    }

    if inputs.clarity == ClarityVerdict::Clear {
        let ml = quantity(rules.green_extract_ml_per_rai, size);
        pump_durations[1] = to_magnitude(liquid_seconds(ml, rules.pump_ml_per_sec));
    }

    DosePlan {
        pond_id: inputs.pond_id,
        servo_rounds,
        pump_durations,
    }
}

/// Grams dispensed per servo round: cylinder volume × bulk density.
pub fn grams_per_round(radius_cm: f64, height_cm: f64, bulk_density: f64) -> f64 {
    PI * radius_cm.powi(2) * height_cm * bulk_density
}

/// Fractional servo rounds for `grams`. Zero for a non-positive cup size.
pub fn powder_rounds(grams: f64, grams_per_round: f64) -> f64 {
    if grams_per_round > 0.0 && grams_per_round.is_finite() {
        grams / grams_per_round
    } else {
        0.0
    }
}

/// Fractional pump seconds for `ml`. Zero for a non-positive flow rate.
pub fn liquid_seconds(ml: f64, ml_per_sec: f64) -> f64 {
    if ml_per_sec > 0.0 && ml_per_sec.is_finite() {
        ml / ml_per_sec
    } else {
        0.0
    }
}

fn quantity(rate: f64, pond_size: f64) -> f64 {
    let valid = |v: f64| v > 0.0 && v.is_finite();
    if valid(rate) && valid(pond_size) {
        rate * pond_size
    } else {
        0.0
    }
}

/// Round to the nearest whole actuator unit, flooring at zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_magnitude(value: f64) -> u32 {
    let rounded = value.round();
    if rounded.is_nan() || rounded <= 0.0 {
        0
    } else {
        // Saturating float-to-int cast; the bound check above rules out sign loss.
        rounded.min(f64::from(u32::MAX)) as u32
    }
}
