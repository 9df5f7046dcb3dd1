use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Trips come from a planner.
    Auto,
    /// Trucks follow the trail they are bound to.
    Manual,
}

/// Planner selection. `Cp`, `Cbc` and `Highs` all run the in-crate exact solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum SolverKind {
    #[default]
    Greedy,
    Cp,
    Cbc,
    Highs,
}

impl SolverKind {
    pub fn is_greedy(self) -> bool {
        matches!(self, SolverKind::Greedy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    #[default]
    Weight,
    Volume,
    Trips,
}

/// Raw run options, as read from YAML or JSON. Every field is optional; [`SimOptions::validate`]
/// turns them into a [`SimConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    pub breakdown: bool,
    pub refuel: bool,
    pub lunch: bool,
    pub planned_idle: bool,
    pub blasting: bool,
    pub mode: Option<String>,
    pub solver: SolverKind,
    pub time_limit: u64,
    pub msg: bool,
    pub workers: usize,
    pub reliability_calc_enabled: bool,
    pub rel_metric: Metric,
    pub rel_process_num: Option<usize>,
    pub rel_init_runs_num: usize,
    pub rel_step_runs_num: usize,
    pub rel_max_runs_num: usize,
    pub rel_alpha: f64,
    pub rel_r_target: f64,
    pub rel_delta_target: f64,
    pub rel_consecutive: usize,
    pub rel_boot_b: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            breakdown: true,
            refuel: true,
            lunch: true,
            planned_idle: true,
            blasting: true,
            mode: None,
            solver: SolverKind::Greedy,
            time_limit: 10,
            msg: false,
            workers: 4,
            reliability_calc_enabled: false,
            rel_metric: Metric::Weight,
            rel_process_num: None,
            rel_init_runs_num: 15,
            rel_step_runs_num: 15,
            rel_max_runs_num: 30,
            rel_alpha: 0.05,
            rel_r_target: 0.05,
            rel_delta_target: 0.01,
            rel_consecutive: 2,
            rel_boot_b: 5000,
        }
    }
}

impl SimOptions {
    pub fn with_mode(self, mode: Mode) -> Self {
        SimOptions { mode: Some(mode.to_string()), ..self }
    }

    pub fn with_solver(self, solver: SolverKind) -> Self {
        SimOptions { solver, ..self }
    }

    /// Switches every disruption off, leaving a clean production baseline.
    pub fn without_disruptions(self) -> Self {
        SimOptions {
            breakdown: false,
            refuel: false,
            lunch: false,
            planned_idle: false,
            blasting: false,
            ..self
        }
    }

    pub fn validate(&self) -> Result<SimConfig, ConfigError> {
        let mode = match self.mode.as_deref().map(str::trim) {
            None | Some("") => return Err(ConfigError::MissingMode),
            Some(m) => m.to_lowercase().parse::<Mode>().map_err(|_| ConfigError::UnknownMode(m.to_string()))?,
        };
        let reliability = self.reliability_calc_enabled.then(|| ReliabilityConfig {
            metric: self.rel_metric,
            processes: self.rel_process_num.unwrap_or_else(default_processes).max(1),
            init_runs: self.rel_init_runs_num.max(1),
            step_runs: self.rel_step_runs_num.max(1),
            max_runs: self.rel_max_runs_num.max(1),
            alpha: self.rel_alpha,
            r_target: self.rel_r_target,
            delta_target: self.rel_delta_target,
            consecutive: self.rel_consecutive.max(1),
            boot_b: self.rel_boot_b.max(1),
        });
        Ok(SimConfig {
            breakdown: self.breakdown,
            refuel: self.refuel,
            lunch: self.lunch,
            planned_idle: self.planned_idle,
            blasting: self.blasting,
            mode,
            solver: SolverConfig {
                kind: self.solver,
                time_limit_secs: self.time_limit,
                msg: self.msg,
                workers: self.workers.max(1),
            },
            reliability,
        })
    }
}

fn default_processes() -> usize {
    std::thread::available_parallelism().map(|n| n.get() / 2).unwrap_or(1).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolverConfig {
    pub kind: SolverKind,
    pub time_limit_secs: u64,
    pub msg: bool,
    pub workers: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { kind: SolverKind::Greedy, time_limit_secs: 10, msg: false, workers: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReliabilityConfig {
    pub metric: Metric,
    pub processes: usize,
    pub init_runs: usize,
    pub step_runs: usize,
    pub max_runs: usize,
    pub alpha: f64,
    pub r_target: f64,
    pub delta_target: f64,
    pub consecutive: usize,
    pub boot_b: usize,
}

/// Validated configuration of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimConfig {
    pub breakdown: bool,
    pub refuel: bool,
    pub lunch: bool,
    pub planned_idle: bool,
    pub blasting: bool,
    pub mode: Mode,
    pub solver: SolverConfig,
    pub reliability: Option<ReliabilityConfig>,
}

impl SimConfig {
    pub fn is_auto(&self) -> bool {
        self.mode == Mode::Auto
    }

    pub fn is_auto_greedy(&self) -> bool {
        self.is_auto() && self.solver.kind.is_greedy()
    }
}
