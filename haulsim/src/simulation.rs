//! Public run entry points. Every failure leaves here as a [`SimulationError`].

use serde_json::json;

use crate::config::{Metric, SimConfig, SimOptions};
use crate::engine::Engine;
use crate::error::{InputError, SimulationError};
use crate::model::run_hosted;
use crate::props::SimData;
use crate::serializer::SimDataSerializer;
use crate::stats::reliability::converge;
use crate::writer::{BatchWriter, ReliabilityWriter, SimOutput, SimpleWriter, Summary, Writer};

/// Which sink a run writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterKind {
    #[default]
    Simple,
    Batch,
    Reliability,
}

impl WriterKind {
    fn build(self) -> Box<dyn Writer> {
        match self {
            WriterKind::Simple => Box::new(SimpleWriter::new()),
            WriterKind::Batch => Box::new(BatchWriter::default()),
            WriterKind::Reliability => Box::new(ReliabilityWriter::new()),
        }
    }
}

pub fn run_simulation(raw_input: &str, options: &SimOptions) -> Result<SimOutput, SimulationError> {
    run_simulation_with(raw_input, options, WriterKind::Simple)
}

pub fn run_simulation_with(raw_input: &str, options: &SimOptions, writer: WriterKind) -> Result<SimOutput, SimulationError> {
    let result = prepare(raw_input, options).and_then(|(data, config)| run_data(data, &config, writer));
    if let Err(e) = &result {
        log::error!("{}", e.chain());
    }
    result
}

fn prepare(raw_input: &str, options: &SimOptions) -> Result<(SimData, SimConfig), SimulationError> {
    if raw_input.trim().is_empty() {
        return Err(SimulationError::run(None, InputError::EmptyInput));
    }
    let config = options.validate().map_err(|e| SimulationError::run(None, e))?;
    let data = SimDataSerializer::from_str(raw_input).map_err(|e| SimulationError::run(None, e))?;
    Ok((data, config))
}

/// Runs already parsed data: a reliability study when the config asks for one, a single run
/// otherwise.
pub fn run_data(data: SimData, config: &SimConfig, writer: WriterKind) -> Result<SimOutput, SimulationError> {
    match config.reliability {
        Some(rel) => {
            let base_seed = data.seed.unwrap_or(0);
            let outcome = converge(&rel, base_seed, |seed| {
                let output = run_once(with_seed(&data, seed), config, WriterKind::Reliability)?;
                Ok(metric_value(&output.summary, rel.metric))
            })?;
            let mut output = run_once(with_seed(&data, outcome.chosen_seed), config, writer)?;
            let metric = rel.metric.to_string();
            let extra = &mut output.summary.extra;
            extra.insert(format!("{metric}_reliable"), json!(outcome.reliable));
            extra.insert(format!("{metric}_best_min"), json!(outcome.best_min));
            extra.insert(format!("{metric}_best_max"), json!(outcome.best_max));
            extra.insert("is_stable".into(), json!(outcome.stable));
            extra.insert("confidence_interval".into(), json!((1. - rel.alpha) * 100.));
            extra.insert("reliability_runs".into(), json!(outcome.runs.len()));
            Ok(output)
        }
        None => run_once(data, config, writer),
    }
}

fn with_seed(data: &SimData, seed: u64) -> SimData {
    SimData { seed: Some(seed), ..data.clone() }
}

fn metric_value(summary: &Summary, metric: Metric) -> f64 {
    match metric {
        Metric::Weight => summary.weight as f64,
        Metric::Volume => summary.volume as f64,
        Metric::Trips => summary.trips as f64,
    }
}

/// One seed, start to horizon, hosted in nexosim.
fn run_once(data: SimData, config: &SimConfig, kind: WriterKind) -> Result<SimOutput, SimulationError> {
    let seed = data.seed;
    let mut writer = kind.build();
    writer.update_meta("meta", json!({ "seed": seed }));
    log::debug!("run with seed {:?}: {} trucks, mode {}", seed, data.trucks.len(), config.mode);
    let engine = Engine::new(data, config.clone(), writer).map_err(|e| SimulationError::run(seed, e))?;
    run_hosted(engine).map_err(|e| SimulationError::run(seed, e))
}
