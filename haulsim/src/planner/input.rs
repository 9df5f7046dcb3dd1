//! Planning matrices shared by the exact and greedy solvers. All times are whole minutes.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::calc::{shovel, truck, unload};
use crate::geometry::Point;
use crate::props::{ObjectKind, ObjectRef, SimData, Truck};
use crate::routing::{Endpoint, Route};

/// Where a truck is when the plan is (re)built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TruckPosition {
    pub point: Point,
    pub edge: Option<usize>,
}

impl TruckPosition {
    pub fn of(truck: &Truck) -> Self {
        TruckPosition { point: truck.position, edge: truck.edge }
    }
}

/// Objects removed from planning. Counted, so that two overlapping disruptions of the same
/// object need two inclusions before it is planned again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exclusions {
    counts: BTreeMap<ObjectRef, u32>,
}

impl Exclusions {
    pub fn exclude(&mut self, obj: ObjectRef) {
        *self.counts.entry(obj).or_default() += 1;
    }

    pub fn include(&mut self, obj: ObjectRef) {
        match self.counts.get_mut(&obj) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.counts.remove(&obj);
            }
            None => log::debug!("{} included without a prior exclusion", obj.tag()),
        }
    }

    pub fn contains(&self, obj: &ObjectRef) -> bool {
        self.counts.contains_key(obj)
    }

    pub fn is_excluded(&self, kind: ObjectKind, id: u32) -> bool {
        self.contains(&ObjectRef::new(kind, id))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn ids(&self, kind: ObjectKind) -> BTreeSet<u32> {
        self.counts.keys().filter(|o| o.kind == kind).map(|o| o.id).collect()
    }
}

/// What the planners see on top of the immutable [`SimData`]: excluded objects, refreshed
/// truck positions and the time already elapsed in the run.
#[derive(Debug, Clone, Default)]
pub struct PlanningOverlay {
    pub exclusions: Exclusions,
    pub positions: BTreeMap<u32, TruckPosition>,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputPlanningData {
    pub n: usize,
    pub m: usize,
    pub z: usize,
    pub d_work: u64,
    /// (truck, shovel)
    pub t_load: BTreeMap<(u32, u32), u64>,
    /// (truck, unload)
    pub t_unload: BTreeMap<(u32, u32), u64>,
    /// (truck, shovel, unload)
    pub t_haul: BTreeMap<(u32, u32, u32), u64>,
    /// (truck, unload, shovel)
    pub t_return: BTreeMap<(u32, u32, u32), u64>,
    pub t_start: BTreeMap<(u32, u32), u64>,
    pub t_end: BTreeMap<(u32, u32), u64>,
    pub m_tons: BTreeMap<(u32, u32), u64>,
    pub kmax_by_truck: Option<BTreeMap<u32, u64>>,
}

fn minutes(secs: u64) -> u64 {
    secs / 60
}

impl InputPlanningData {
    pub fn from_sim_data(data: &SimData) -> Self {
        Self::build(data, &PlanningOverlay::default())
    }

    /// Fills every matrix for the trucks, shovels and unloads left after the overlay's
    /// exclusions. Pairs without a route are left out and reported.
    pub fn build(data: &SimData, overlay: &PlanningOverlay) -> Self {
        let ex = &overlay.exclusions;
        let trucks: Vec<&Truck> = data.trucks.values().filter(|t| !ex.is_excluded(ObjectKind::Truck, t.id)).collect();
        let shovels: Vec<_> = data.shovels.values().filter(|s| !ex.is_excluded(ObjectKind::Shovel, s.id)).collect();
        let unloads: Vec<_> = data.unloads.values().filter(|u| !ex.is_excluded(ObjectKind::Unload, u.id)).collect();
        let net = &data.road_net;
        let shift_change = data
            .idle_areas
            .shift_change_areas()
            .next()
            .map(|a| Endpoint::Object(ObjectRef::new(ObjectKind::IdleArea, a.id)));

        let mut pd = InputPlanningData {
            n: trucks.len(),
            m: shovels.len(),
            z: unloads.len(),
            d_work: minutes(data.duration_secs().saturating_sub(overlay.elapsed_secs)),
            ..Default::default()
        };

        // haul roads do not depend on the truck
        let mut hauls: BTreeMap<(u32, u32), Route> = BTreeMap::new();
        for s in &shovels {
            for u in &unloads {
                let from = Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, s.id));
                let to = Endpoint::Object(ObjectRef::new(ObjectKind::Unload, u.id));
                match net.shortest(&from, &to) {
                    Some(route) => {
                        hauls.insert((s.id, u.id), route);
                    }
                    None => log::warn!("no haul road from shovel {} to unload {}", s.id, u.id),
                }
            }
        }
        let mut returns_home: BTreeMap<u32, Route> = BTreeMap::new();
        for u in &unloads {
            let from = Endpoint::Object(ObjectRef::new(ObjectKind::Unload, u.id));
            let route = match &shift_change {
                Some(area) => net.shortest(&from, area),
                None => Some(Route::default()),
            };
            match route {
                Some(r) => {
                    returns_home.insert(u.id, r);
                }
                None => log::warn!("no road from unload {} to the shift change area", u.id),
            }
        }

        for t in &trucks {
            let props = &t.properties;
            let pos = overlay.positions.get(&t.id).copied().unwrap_or_else(|| TruckPosition::of(t));
            let origin = match (pos.edge, &shift_change) {
                (Some(edge), _) => Endpoint::OnEdge { point: pos.point, edge },
                (None, Some(area)) => *area,
                (None, None) => Endpoint::At(pos.point),
            };
            for s in &shovels {
                let totals = shovel::load_totals(&s.properties, props);
                pd.t_load.insert((t.id, s.id), minutes(totals.secs));
                pd.m_tons.insert((t.id, s.id), totals.weight.max(0.) as u64);
                let to = Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, s.id));
                match net.shortest(&origin, &to) {
                    Some(route) => {
                        pd.t_start.insert((t.id, s.id), minutes(truck::route_time_secs(&route, props, true)));
                    }
                    None => log::warn!("truck {} cannot reach shovel {}", t.id, s.id),
                }
                for u in &unloads {
                    if let Some(route) = hauls.get(&(s.id, u.id)) {
                        pd.t_haul.insert((t.id, s.id, u.id), minutes(truck::route_time_secs(route, props, true)));
                        pd.t_return.insert((t.id, u.id, s.id), minutes(truck::route_time_secs(route, props, false)));
                    }
                }
            }
            for u in &unloads {
                let cycle = unload::cycle_by_norm(&u.properties, props);
                pd.t_unload.insert((t.id, u.id), minutes(crate::calc::whole_seconds(cycle.total)));
                if let Some(route) = returns_home.get(&u.id) {
                    pd.t_end.insert((t.id, u.id), minutes(truck::route_time_secs(route, props, true)));
                }
            }
        }
        pd
    }

    pub fn truck_ids(&self) -> Vec<u32> {
        self.t_load.keys().map(|(i, _)| *i).collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn shovel_ids(&self) -> Vec<u32> {
        self.t_load.keys().map(|(_, j)| *j).collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn unload_ids(&self) -> Vec<u32> {
        self.t_unload.keys().map(|(_, z)| *z).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Minutes of one full cycle of truck `i` through shovel `j` and unload `z`, load and unload
    /// included, or `None` when any leg is missing.
    pub fn cycle(&self, i: u32, j: u32, z: u32) -> Option<u64> {
        Some(
            self.t_haul.get(&(i, j, z))?
                + self.t_return.get(&(i, z, j))?
                + self.t_load.get(&(i, j))?
                + self.t_unload.get(&(i, z))?,
        )
    }

    /// Upper bound on the number of trips truck `i` can make in the shift.
    pub fn kmax(&self, i: u32) -> u64 {
        if let Some(k) = self.kmax_by_truck.as_ref().and_then(|m| m.get(&i)) {
            return *k;
        }
        let shovels = self.shovel_ids();
        let unloads = self.unload_ids();
        let min_start = shovels.iter().filter_map(|j| self.t_start.get(&(i, *j))).min();
        let min_end = unloads.iter().filter_map(|z| self.t_end.get(&(i, *z))).min();
        let min_cycle = shovels
            .iter()
            .flat_map(|j| unloads.iter().filter_map(move |z| self.cycle(i, *j, *z)))
            .min();
        match (min_start, min_end, min_cycle) {
            (Some(s), Some(e), Some(c)) => self.d_work.saturating_sub(s + e) / c.max(1),
            _ => 0,
        }
    }
}
