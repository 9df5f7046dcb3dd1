//! Background behaviours advanced once per simulated second, independently of what the main
//! processes are doing. They only raise and clear flags; the main processes react to them.

use std::collections::VecDeque;

use crate::calc::breakdown::{BreakdownInputs, BreakdownModel, BreakdownTransition};
use crate::calc::fuel;
use crate::common::{DistributionFactory, DistributionParametersError};
use crate::props::{ReliabilityInputs, TruckProperties};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    Begin,
    End,
}

/// Walks a sorted list of `[start, end)` second windows, e.g. lunch breaks or planned idles.
#[derive(Debug, Clone, Default)]
pub struct WindowWatch {
    windows: VecDeque<(u64, u64)>,
}

impl WindowWatch {
    pub fn new(windows: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut windows: Vec<(u64, u64)> = windows.into_iter().collect();
        windows.sort();
        WindowWatch { windows: windows.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Advances to `now`. Inside a window an eligible actor that is not yet held is sent in;
    /// at the window end a held actor is released. Windows missed entirely are dropped.
    pub fn update(&mut self, now: u64, eligible: bool, active: &mut bool) -> Option<WindowSignal> {
        while let Some(&(start, end)) = self.windows.front() {
            if now >= end {
                self.windows.pop_front();
                if *active {
                    *active = false;
                    return Some(WindowSignal::End);
                }
                continue;
            }
            if now >= start && eligible && !*active {
                *active = true;
                return Some(WindowSignal::Begin);
            }
            return None;
        }
        None
    }
}

/// Failure and repair cycle of one actor, as flags.
#[derive(Debug, Clone)]
pub struct Breakdown {
    model: BreakdownModel,
}

impl Breakdown {
    pub fn new(reliability: ReliabilityInputs, df: &mut DistributionFactory) -> Result<Self, DistributionParametersError> {
        Ok(Breakdown { model: BreakdownModel::new(BreakdownInputs::from(reliability), df)? })
    }

    pub fn from_model(model: BreakdownModel) -> Self {
        Breakdown { model }
    }

    pub fn is_broken(&self) -> bool {
        self.model.is_broken()
    }

    pub fn update(&mut self, working: bool) -> Result<BreakdownTransition, DistributionParametersError> {
        self.model.update_state(working)
    }
}

/// Burns one second of fuel. Returns the new level and whether a planned refuel is due.
pub fn burn_second(props: &TruckProperties, level: f64, moving: bool) -> (f64, bool) {
    let level = fuel::burn(props, level, moving).max(0.);
    (level, level < props.fuel_threshold_planned)
}
