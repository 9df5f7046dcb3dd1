use thiserror::Error;

use crate::common::DistributionParametersError;
use crate::props::ObjectKind;

/// Raised while turning raw scenario input into [`SimData`](crate::props::SimData).
#[derive(Debug, Error)]
pub enum InputError {
    #[error("missing required argument in data: {field}")]
    MissingField { field: String },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("malformed input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input data is empty")]
    EmptyInput,
    #[error("{by} refers to unknown {kind} {id}")]
    UnknownReference { kind: ObjectKind, id: u32, by: String },
    #[error("road network: {0}")]
    Routing(String),
}

impl InputError {
    pub fn missing(field: impl Into<String>) -> Self {
        InputError::MissingField { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        InputError::InvalidValue { field: field.into(), reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("simulation mode is not set")]
    MissingMode,
    #[error("unknown simulation mode '{0}', use 'auto' or 'manual'")]
    UnknownMode(String),
    #[error("configuration could not be read: {0}")]
    Yaml(String),
}

/// The truck-count estimator could not produce a finite answer.
#[derive(Debug, Error, PartialEq)]
pub enum EstimatorError {
    #[error("statistic '{0}' is unavailable")]
    MissingStatistic(&'static str),
    #[error("queue is saturated (rho = {0})")]
    Saturated(f64),
    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no route from {from} to {to}")]
    NoRoute { from: String, to: String },
    #[error("unknown {kind} {id}")]
    UnknownActor { kind: ObjectKind, id: u32 },
    #[error(transparent)]
    Distribution(#[from] DistributionParametersError),
    #[error("simulation host failed: {0}")]
    Host(String),
    #[error("could not write output: {0}")]
    Output(String),
    #[error("truck {truck_id} finished a trip it never began")]
    NoOpenTrip { truck_id: u32 },
}

#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The single failure type of the public run entry points.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("simulation run (seed {}) failed", seed_label(.seed))]
    Run {
        seed: Option<u64>,
        #[source]
        source: RunFailure,
    },
}

fn seed_label(seed: &Option<u64>) -> String {
    seed.map(|s| s.to_string()).unwrap_or_else(|| "unset".into())
}

impl SimulationError {
    pub fn run(seed: Option<u64>, source: impl Into<RunFailure>) -> Self {
        SimulationError::Run { seed, source: source.into() }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            SimulationError::Run { seed, .. } => *seed,
        }
    }

    /// The error and each of its causes, outermost first, joined with `: `.
    pub fn chain(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut cur: Option<&dyn std::error::Error> = std::error::Error::source(self);
        while let Some(e) = cur {
            parts.push(e.to_string());
            cur = e.source();
        }
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_message() {
        let e = InputError::missing("quarry.timezone");
        assert_eq!(e.to_string(), "missing required argument in data: quarry.timezone");
    }

    #[test]
    fn chain_walks_sources() {
        let e = SimulationError::run(Some(4), InputError::EmptyInput);
        assert_eq!(e.chain(), "simulation run (seed 4) failed: input data is empty");
    }
}
