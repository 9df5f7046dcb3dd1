use serde::{Deserialize, Serialize};

use crate::calc::whole_seconds;
use crate::common::{Distribution, DistributionConfig, DistributionFactory, DistributionParametersError};
use crate::props::ReliabilityInputs;

/// Breakdown inputs converted to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakdownInputs {
    /// T_A
    pub operating_secs: f64,
    /// MTTR
    pub mean_repair_secs: f64,
    /// N_F
    pub failures: f64,
}

impl From<ReliabilityInputs> for BreakdownInputs {
    fn from(r: ReliabilityInputs) -> Self {
        BreakdownInputs {
            operating_secs: r.initial_operating_time * 3600.,
            mean_repair_secs: r.average_repair_duration * 60.,
            failures: r.initial_failure_count,
        }
    }
}

impl BreakdownInputs {
    /// λ = N_F / T_A
    pub fn failure_rate(&self) -> f64 {
        self.failures / self.operating_secs
    }

    /// μ = 1 / MTTR
    pub fn repair_rate(&self) -> f64 {
        1. / self.mean_repair_secs
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BreakdownState {
    /// Working seconds left before the next failure.
    TimeUntilFailure(u64),
    /// Seconds of repair left.
    TimeUntilRepair(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Operational,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownTransition {
    pub from: Condition,
    pub to: Condition,
}

impl BreakdownTransition {
    pub fn has_changed(&self) -> bool {
        self.from != self.to
    }

    pub fn failed(&self) -> bool {
        self.from == Condition::Operational && self.to == Condition::Broken
    }

    pub fn repaired(&self) -> bool {
        self.from == Condition::Broken && self.to == Condition::Operational
    }
}

/// Failure and repair cycle of one actor. Time to failure only counts down while the actor is
/// working; repairs run on the wall clock. Every failure bumps N_F, which shortens the mean
/// time to the next one.
#[derive(Debug, Clone)]
pub struct BreakdownModel {
    pub inputs: BreakdownInputs,
    pub state: BreakdownState,
    until_failure: Distribution,
    until_repair: Distribution,
}

impl BreakdownModel {
    pub fn new(inputs: BreakdownInputs, df: &mut DistributionFactory) -> Result<Self, DistributionParametersError> {
        let until_failure = df.create(DistributionConfig::Exponential { mean: 1. / inputs.failure_rate() })?;
        let until_repair = df.create(DistributionConfig::Exponential { mean: 1. / inputs.repair_rate() })?;
        Ok(BreakdownModel::with_distributions(inputs, until_failure, until_repair))
    }

    pub fn with_distributions(inputs: BreakdownInputs, mut until_failure: Distribution, until_repair: Distribution) -> Self {
        let first = whole_seconds(until_failure.sample());
        BreakdownModel {
            inputs,
            state: BreakdownState::TimeUntilFailure(first),
            until_failure,
            until_repair,
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.state, BreakdownState::TimeUntilRepair(_))
    }

    fn condition(&self) -> Condition {
        if self.is_broken() { Condition::Broken } else { Condition::Operational }
    }

    /// Advances the model by one second.
    pub fn update_state(&mut self, working: bool) -> Result<BreakdownTransition, DistributionParametersError> {
        let from = self.condition();
        match self.state {
            BreakdownState::TimeUntilFailure(0) if working => {
                self.inputs.failures += 1.;
                self.until_failure.set_mean(1. / self.inputs.failure_rate())?;
                let repair = self.until_repair.sample().ceil().max(1.);
                self.state = BreakdownState::TimeUntilRepair(whole_seconds(repair));
            }
            BreakdownState::TimeUntilFailure(left) => {
                if working {
                    self.state = BreakdownState::TimeUntilFailure(left.saturating_sub(1));
                }
            }
            BreakdownState::TimeUntilRepair(left) => {
                let left = left.saturating_sub(1);
                self.state = if left == 0 {
                    BreakdownState::TimeUntilFailure(whole_seconds(self.until_failure.sample()))
                } else {
                    BreakdownState::TimeUntilRepair(left)
                };
            }
        }
        Ok(BreakdownTransition { from, to: self.condition() })
    }
}
