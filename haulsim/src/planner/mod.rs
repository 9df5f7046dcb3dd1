//! Trip planning: the matrices both solvers read, the exact scheduler and the greedy online
//! assigner.

use std::collections::BTreeMap;

use crate::config::SolverConfig;
use crate::props::{ObjectKind, PlannedTrip, SimData};

pub mod exact;
pub mod greedy;
pub mod input;

pub use exact::{ExactSolver, PlanResult, ScheduledTrip, SolveStatus};
pub use greedy::{GreedySolver, LiveQueues, OverlayChange};
pub use input::{Exclusions, InputPlanningData, PlanningOverlay, TruckPosition};

/// Front end of the exact solver.
#[derive(Debug, Clone)]
pub struct Planner {
    solver: ExactSolver,
}

impl Planner {
    pub fn new(config: &SolverConfig) -> Self {
        Planner { solver: ExactSolver::new(config) }
    }

    pub fn run(&self, data: &SimData, overlay: &PlanningOverlay) -> PlanResult {
        if self.solver.msg {
            log::info!("planner run, {} objects excluded", overlay.exclusions.len());
        }
        let pd = InputPlanningData::build(data, overlay);
        let result = self.solver.solve(&pd);
        if self.solver.msg {
            for t in &result.trips {
                log::info!("truck {}: shovel {}, unload {}, trip {}", t.truck_id, t.shovel_id, t.unload_id, t.order);
            }
        }
        result
    }

    /// Plans without the excluded objects and groups the trips per truck. Empty when no truck,
    /// shovel or unload is left.
    pub fn run_with_exclude(&self, data: &SimData, overlay: &PlanningOverlay) -> BTreeMap<u32, Vec<PlannedTrip>> {
        let ex = &overlay.exclusions;
        if !data.trucks.keys().any(|id| !ex.is_excluded(ObjectKind::Truck, *id))
            || !data.shovels.keys().any(|id| !ex.is_excluded(ObjectKind::Shovel, *id))
            || !data.unloads.keys().any(|id| !ex.is_excluded(ObjectKind::Unload, *id))
        {
            return BTreeMap::new();
        }
        let mut planned: BTreeMap<u32, Vec<PlannedTrip>> = BTreeMap::new();
        for t in self.run(data, overlay).trips {
            planned.entry(t.truck_id).or_default().push(PlannedTrip {
                truck_id: t.truck_id,
                shovel_id: t.shovel_id,
                unload_id: t.unload_id,
                order: t.order,
            });
        }
        planned
    }
}
