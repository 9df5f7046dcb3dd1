use crate::planner::input::{InputPlanningData, PlanningOverlay, TruckPosition};
use crate::props::{ObjectKind, ObjectRef, PlannedTrip, SimData};

/// Read-only view of live queue lengths, supplied by the engine when a truck asks for a trip.
pub trait LiveQueues {
    /// Trucks queued or loading at the shovel plus trucks driving empty towards it.
    fn shovel_load(&self, shovel_id: u32) -> usize;
    /// Trucks queued or unloading at the unload.
    fn unload_queue(&self, unload_id: u32) -> usize;
}

/// How the overlay changes on a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayChange {
    Exclude(Vec<ObjectRef>),
    Include(Vec<ObjectRef>),
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub shovel_id: u32,
    pub unload_id: u32,
    pub cycle_time: u64,
    pub score: f64,
}

/// Online assignment of the next (shovel, unload) pair to a free truck.
///
/// The solver never copies [`SimData`]. It keeps an overlay of exclusions and refreshed truck
/// positions, and rebuilds its planning matrices lazily from the snapshot seen through that
/// overlay.
#[derive(Debug, Clone, Default)]
pub struct GreedySolver {
    overlay: PlanningOverlay,
    matrix: Option<InputPlanningData>,
}

impl GreedySolver {
    pub fn new() -> Self {
        GreedySolver::default()
    }

    pub fn overlay(&self) -> &PlanningOverlay {
        &self.overlay
    }

    pub fn planning_data(&mut self, data: &SimData) -> &InputPlanningData {
        let overlay = &self.overlay;
        self.matrix.get_or_insert_with(|| InputPlanningData::build(data, overlay))
    }

    /// Applies an exclusion change, moves the plan start to `elapsed_secs` and refreshes truck
    /// positions. Returns the ids of every truck still planned; the caller nudges each one that
    /// is driving empty or waiting, whether or not its best pair changed.
    pub fn rebuild(
        &mut self,
        data: &SimData,
        elapsed_secs: u64,
        change: OverlayChange,
        positions: impl IntoIterator<Item = (u32, TruckPosition)>,
    ) -> Vec<u32> {
        match &change {
            OverlayChange::Exclude(objs) => objs.iter().for_each(|o| self.overlay.exclusions.exclude(*o)),
            OverlayChange::Include(objs) => objs.iter().for_each(|o| self.overlay.exclusions.include(*o)),
            OverlayChange::Refresh => {}
        }
        self.overlay.elapsed_secs = elapsed_secs;
        self.overlay.positions.extend(positions);
        self.matrix = None;
        log::debug!("greedy rebuild at {} s: {:?}", elapsed_secs, change);
        data.trucks
            .keys()
            .copied()
            .filter(|id| !self.overlay.exclusions.is_excluded(ObjectKind::Truck, *id))
            .collect()
    }

    /// Scores every non-excluded (shovel, unload) pair for the truck and returns the best. The
    /// lowest shovel id, then the lowest unload id, wins a tie.
    pub fn choose(&mut self, data: &SimData, truck_id: u32, live: &dyn LiveQueues) -> Option<Choice> {
        let pd = self.planning_data(data);
        let mut best: Option<Choice> = None;
        for shovel_id in pd.shovel_ids() {
            let (Some(&load), Some(&start), Some(&tons)) = (
                pd.t_load.get(&(truck_id, shovel_id)),
                pd.t_start.get(&(truck_id, shovel_id)),
                pd.m_tons.get(&(truck_id, shovel_id)),
            ) else {
                log::warn!("no planning data for truck {} at shovel {}", truck_id, shovel_id);
                continue;
            };
            let wait_shovel = live.shovel_load(shovel_id) as u64 * load;
            for unload_id in pd.unload_ids() {
                let (Some(&haul), Some(&unload), Some(&back)) = (
                    pd.t_haul.get(&(truck_id, shovel_id, unload_id)),
                    pd.t_unload.get(&(truck_id, unload_id)),
                    pd.t_return.get(&(truck_id, unload_id, shovel_id)),
                ) else {
                    log::warn!("no planning data for truck {} from shovel {} to unload {}", truck_id, shovel_id, unload_id);
                    continue;
                };
                let wait_unload = live.unload_queue(unload_id) as u64 * unload;
                let cycle_time = start + wait_shovel + load + haul + wait_unload + unload + back;
                // whole-minute matrices can round a short cycle down to zero
                let score = tons as f64 / cycle_time.max(1) as f64;
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(Choice { shovel_id, unload_id, cycle_time, score });
                }
            }
        }
        log::debug!("truck {} greedy choice: {:?}", truck_id, best);
        best
    }

    pub fn assign_trip(&mut self, data: &SimData, truck_id: u32, live: &dyn LiveQueues) -> Option<PlannedTrip> {
        self.choose(data, truck_id, live).map(|c| PlannedTrip {
            truck_id,
            shovel_id: c.shovel_id,
            unload_id: c.unload_id,
            order: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct Queues {
        shovels: BTreeMap<u32, usize>,
        unloads: BTreeMap<u32, usize>,
    }

    impl LiveQueues for Queues {
        fn shovel_load(&self, shovel_id: u32) -> usize {
            self.shovels.get(&shovel_id).copied().unwrap_or(0)
        }

        fn unload_queue(&self, unload_id: u32) -> usize {
            self.unloads.get(&unload_id).copied().unwrap_or(0)
        }
    }

    fn idle() -> Queues {
        Queues { shovels: BTreeMap::new(), unloads: BTreeMap::new() }
    }

    /// Two identical shovels and one unload, planning data filled by hand.
    fn solver_with_matrix() -> GreedySolver {
        let mut pd = InputPlanningData { n: 1, m: 2, z: 1, d_work: 600, ..Default::default() };
        for j in [1, 2] {
            pd.t_load.insert((1, j), 4);
            pd.t_start.insert((1, j), 2);
            pd.m_tons.insert((1, j), 90);
            pd.t_haul.insert((1, j, 1), 10);
            pd.t_return.insert((1, 1, j), 8);
        }
        pd.t_unload.insert((1, 1), 2);
        GreedySolver { overlay: PlanningOverlay::default(), matrix: Some(pd) }
    }

    fn data() -> SimData {
        crate::test_support::tiny_sim_data()
    }

    #[test]
    fn ties_go_to_lowest_shovel() {
        let mut g = solver_with_matrix();
        let c = g.choose(&data(), 1, &idle()).unwrap();
        assert_eq!(c.shovel_id, 1);
        assert_eq!(c.cycle_time, 26);
    }

    #[test]
    fn busy_shovel_loses() {
        let mut g = solver_with_matrix();
        let live = Queues { shovels: BTreeMap::from([(1, 2)]), unloads: BTreeMap::new() };
        let c = g.choose(&data(), 1, &live).unwrap();
        assert_eq!(c.shovel_id, 2);
    }

    #[test]
    fn unknown_truck_gets_nothing() {
        let mut g = solver_with_matrix();
        assert!(g.assign_trip(&data(), 9, &idle()).is_none());
    }

    #[test]
    fn rebuild_nudges_every_planned_truck() {
        let mut data = data();
        let mut second = data.trucks[&1].clone();
        second.id = 2;
        data.trucks.insert(2, second);
        let mut g = GreedySolver::new();
        let shovel = ObjectRef::new(ObjectKind::Shovel, 1);
        assert_eq!(g.rebuild(&data, 10, OverlayChange::Exclude(vec![shovel]), []), vec![1, 2]);
        let truck = ObjectRef::new(ObjectKind::Truck, 2);
        assert_eq!(g.rebuild(&data, 20, OverlayChange::Exclude(vec![truck]), []), vec![1]);
        assert_eq!(g.rebuild(&data, 30, OverlayChange::Include(vec![truck]), []), vec![1, 2]);
    }

    #[test]
    fn exclusion_invalidates_matrix() {
        let data = data();
        let mut g = GreedySolver::new();
        assert!(g.assign_trip(&data, 1, &idle()).is_some());
        let planned = g.rebuild(&data, 60, OverlayChange::Exclude(vec![ObjectRef::new(ObjectKind::Shovel, 1)]), []);
        assert_eq!(planned, vec![1]);
        assert!(g.assign_trip(&data, 1, &idle()).is_none());
        g.rebuild(&data, 120, OverlayChange::Include(vec![ObjectRef::new(ObjectKind::Shovel, 1)]), []);
        let trip = g.assign_trip(&data, 1, &idle()).unwrap();
        assert_eq!((trip.shovel_id, trip.unload_id, trip.order), (1, 1, 1));
    }
}
