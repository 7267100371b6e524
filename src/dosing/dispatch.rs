//! Runs the decision engine and hands its commands to the command sink.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::cooldown::CooldownState;
use super::{evaluate, DoseCommand, DoseInputs, DosePlan};
use crate::config::DosingConfig;
use crate::publisher::CommandSink;

/// What one auto-dose pass decided and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseReport {
    /// The engine's decision.
    pub plan: DosePlan,
    /// Commands the sink accepted.
    pub published: Vec<DoseCommand>,
    /// Commands the sink rejected.
    pub failed: Vec<DoseCommand>,
}

/// Evaluates the rules for one pond and publishes the result.
///
/// The cooldown lock is held for the whole pass so two concurrent triggers
/// for the same pond cannot both dose the probiotic.
pub struct AutoDoser {
    rules: DosingConfig,
    cooldowns: Arc<Mutex<CooldownState>>,
    sink: Arc<dyn CommandSink>,
}

impl AutoDoser {
    /// Doser sharing `cooldowns` with the rest of the service.
    pub fn new(
        rules: DosingConfig,
        cooldowns: Arc<Mutex<CooldownState>>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            rules,
            cooldowns,
            sink,
        }
    }

    /// Dosing constants in use.
    pub fn rules(&self) -> &DosingConfig {
        &self.rules
    }

    /// Evaluate and publish.
    ///
    /// Last-dose times are recorded only for substances whose command the
    /// sink accepted. Sink failures are logged, never returned.
    pub async fn run(&self, inputs: &DoseInputs) -> DoseReport {
        let mut cooldowns = self.cooldowns.lock().await;
        let plan = evaluate(&self.rules, inputs, &cooldowns.for_pond(inputs.pond_id));

        let mut published = Vec::new();
        let mut failed = Vec::new();
        for command in plan.commands() {
            match self.sink.publish(&command).await {
                Ok(()) => {
                    for substance in plan.substances_in(command.kind()) {
                        cooldowns.record(inputs.pond_id, substance, inputs.now);
                    }
                    published.push(command);
                }
                Err(e) => {
                    warn!(
                        pond_id = inputs.pond_id,
                        kind = ?command.kind(),
                        error = %e,
                        "dose command not delivered"
                    );
                    failed.push(command);
                }
            }
        }

        info!(
            pond_id = inputs.pond_id,
            ph = inputs.ph,
            temperature = inputs.temperature,
            servo_rounds = ?plan.servo_rounds,
            pump_durations = ?plan.pump_durations,
            published = published.len(),
            "auto-dose evaluated"
        );
        DoseReport {
            plan,
            published,
            failed,
        }
    }
}
