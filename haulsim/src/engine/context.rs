use std::collections::BTreeMap;

use crate::common::DistributionFactory;
use crate::config::SimConfig;
use crate::engine::events::Event;
use crate::geometry::{Point, Polygon};
use crate::planner::{GreedySolver, Planner, PlanningOverlay};
use crate::props::{AreaKind, IdleAreaStorage, ObjectKind, ObjectRef, PlannedTrip, SimData};
use crate::routing::{Endpoint, RoadNet, Route};
use crate::stats::{StatisticService, TripService};
use crate::writer::Writer;

/// Which trip source the trucks draw from.
#[derive(Debug)]
pub enum PlanningHandle {
    /// Fixed trail assignments, nothing is replanned.
    Manual,
    Greedy(GreedySolver),
    Exact { planner: Planner, overlay: PlanningOverlay },
}

impl PlanningHandle {
    pub fn for_config(config: &SimConfig) -> Self {
        if !config.is_auto() {
            PlanningHandle::Manual
        } else if config.solver.kind.is_greedy() {
            PlanningHandle::Greedy(GreedySolver::new())
        } else {
            PlanningHandle::Exact { planner: Planner::new(&config.solver), overlay: PlanningOverlay::default() }
        }
    }
}

/// Nearest-area lookups over the idle areas of the quarry.
#[derive(Debug, Clone)]
pub struct IdleAreaService {
    areas: IdleAreaStorage,
}

impl IdleAreaService {
    pub fn new(areas: IdleAreaStorage) -> Self {
        IdleAreaService { areas }
    }

    pub fn has_any(&self, kind: AreaKind) -> bool {
        self.areas.of_kind(kind).next().is_some()
    }

    /// Vertex-bound areas are routed to through their vertex, free ones through the nearest
    /// vertex of their position.
    pub fn endpoint(&self, id: u32, net: &dyn RoadNet) -> Option<Endpoint> {
        let area = self.areas.areas.iter().find(|a| a.id == id)?;
        let bound = Endpoint::Object(ObjectRef::new(ObjectKind::IdleArea, id));
        if net.locate(&bound).is_some() { Some(bound) } else { Some(Endpoint::At(area.position)) }
    }

    pub fn area_point(&self, id: u32, net: &dyn RoadNet) -> Option<Point> {
        self.endpoint(id, net).and_then(|e| net.locate(&e))
    }

    pub fn first(&self, kind: AreaKind) -> Option<u32> {
        self.areas.of_kind(kind).map(|a| a.id).min()
    }

    /// The area of `kind` with the shortest route from `from` that stays clear of `polygons`.
    /// Ties go to the lowest id.
    pub fn find_nearest(&self, kind: AreaKind, from: &Endpoint, polygons: &[Polygon], net: &dyn RoadNet) -> Option<(u32, Route)> {
        let mut best: Option<(u32, Route)> = None;
        for area in self.areas.of_kind(kind) {
            let Some(to) = self.endpoint(area.id, net) else {
                continue;
            };
            let route = if polygons.is_empty() { net.shortest(from, &to) } else { net.route_avoiding(from, &to, polygons) };
            let Some(route) = route else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((id, r)) => route.length_m() < r.length_m() || (route.length_m() == r.length_m() && area.id < *id),
            };
            if better {
                best = Some((area.id, route));
            }
        }
        best
    }
}

/// Everything one run owns besides its actors. Created per run and dropped with it.
pub struct SimContext {
    pub data: SimData,
    pub config: SimConfig,
    pub df: DistributionFactory,
    pub writer: Box<dyn Writer>,
    pub trips: TripService,
    pub stats: StatisticService,
    pub planning: PlanningHandle,
    pub areas: IdleAreaService,
    /// Unix seconds of the run start.
    pub start_ts: f64,
}

impl SimContext {
    pub fn new(data: SimData, config: SimConfig, writer: Box<dyn Writer>) -> Self {
        let df = DistributionFactory::new(data.seed.unwrap_or(0));
        let areas = IdleAreaService::new(data.idle_areas.clone());
        let trips = TripService::new(data.start_time, data.utc_offset_minutes, areas.first(AreaKind::ShiftChange));
        SimContext {
            start_ts: data.start_time.timestamp() as f64,
            planning: PlanningHandle::for_config(&config),
            data,
            config,
            df,
            writer,
            trips,
            stats: StatisticService::new(),
            areas,
        }
    }

    pub fn net(&self) -> &dyn RoadNet {
        self.data.road_net.as_ref()
    }

    pub fn timestamp(&self, now: u64) -> f64 {
        self.start_ts + now as f64
    }

    pub fn emit(&mut self, event: Event) {
        self.writer.push_event(event);
    }

    /// Trips each truck starts the run with. Manual mode gives trail trucks one trip to their
    /// trail's pair and leaves the rest out of the run; the exact planner plans every truck up
    /// front; the greedy solver assigns trips as trucks become free.
    pub fn initial_trips(&self) -> BTreeMap<u32, Vec<PlannedTrip>> {
        match &self.planning {
            PlanningHandle::Manual => {
                let mut trips = BTreeMap::new();
                for trail in &self.data.trails {
                    for truck_id in &trail.truck_ids {
                        trips.entry(*truck_id).or_insert_with(|| {
                            vec![PlannedTrip { truck_id: *truck_id, shovel_id: trail.shovel_id, unload_id: trail.unload_id, order: 1 }]
                        });
                    }
                }
                trips
            }
            PlanningHandle::Greedy(_) => self.data.trucks.keys().map(|id| (*id, Vec::new())).collect(),
            PlanningHandle::Exact { planner, overlay } => {
                let mut planned = planner.run_with_exclude(&self.data, overlay);
                for id in self.data.trucks.keys() {
                    planned.entry(*id).or_default();
                }
                planned
            }
        }
    }
}
