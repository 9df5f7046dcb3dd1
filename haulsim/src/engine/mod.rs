//! Second-stepped discrete-event engine. One [`Engine`] runs one scenario: every second the
//! blasting watcher, the background behaviours, the due truck processes and the telemetry tick
//! run in that order.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SimConfig;
use crate::error::EngineError;
use crate::planner::{LiveQueues, OverlayChange, TruckPosition};
use crate::props::{ObjectKind, ObjectRef, PlannedTrip, SimData};
use crate::routing::{Endpoint, RoadNet};
use crate::writer::{SimOutput, Writer};

pub mod behaviors;
pub mod context;
pub mod events;
pub mod fuel_station;
pub mod quarry;
pub mod resource;
pub mod scheduler;
pub mod shovel;
pub mod states;
pub mod telemetry;
pub mod truck;
pub mod unload;

use behaviors::Breakdown;
use context::{PlanningHandle, SimContext};
use events::{Event, EventKind, Notice};
use fuel_station::FuelStationActor;
use quarry::{BlastWatch, any_safe_path};
use scheduler::WakeQueue;
use shovel::ShovelActor;
use states::TruckState;
use telemetry::TelemetryRow;
use truck::{Flow, TruckActor};
use unload::UnloadActor;

/// Transitions one truck may chain within a single second before it is forced to yield.
const MAX_TRANSITIONS: usize = 64;

/// Live queue lengths as the greedy solver sees them.
struct QueueView<'a> {
    shovels: &'a [ShovelActor],
    unloads: &'a [UnloadActor],
    shovel_index: &'a BTreeMap<u32, usize>,
    unload_index: &'a BTreeMap<u32, usize>,
    heading: &'a [Option<u32>],
    /// The asking truck, whose own heading does not count against its choice.
    own: Option<usize>,
}

impl LiveQueues for QueueView<'_> {
    fn shovel_load(&self, shovel_id: u32) -> usize {
        let at_bay = self
            .shovel_index
            .get(&shovel_id)
            .map(|k| self.shovels[*k].bay.holders().len() + self.shovels[*k].bay.waiting().count())
            .unwrap_or(0);
        let heading = self.heading.iter().enumerate().filter(|(k, h)| Some(*k) != self.own && **h == Some(shovel_id)).count();
        at_bay + heading
    }

    fn unload_queue(&self, unload_id: u32) -> usize {
        self.unload_index
            .get(&unload_id)
            .map(|k| self.unloads[*k].bays.holders().len() + self.unloads[*k].bays.waiting().count())
            .unwrap_or(0)
    }
}

/// What a truck process may touch while it runs: the other actors, the run context and the
/// quarry state of the current second.
pub struct Site<'a> {
    pub now: u64,
    pub ctx: &'a mut SimContext,
    pub shovels: &'a mut [ShovelActor],
    pub unloads: &'a mut [UnloadActor],
    pub stations: &'a mut [FuelStationActor],
    pub shovel_index: &'a BTreeMap<u32, usize>,
    pub unload_index: &'a BTreeMap<u32, usize>,
    pub blasts: &'a BlastWatch,
    pub heading: &'a [Option<u32>],
    /// Index of the truck whose process is running.
    pub truck: usize,
    pub notices: &'a mut Vec<Notice>,
    /// Trucks handed a resource slot during this run of the process.
    pub woken: Vec<usize>,
}

impl Site<'_> {
    pub fn net(&self) -> Arc<dyn RoadNet> {
        self.ctx.data.road_net.clone()
    }

    pub fn timestamp(&self) -> f64 {
        self.ctx.timestamp(self.now)
    }

    pub fn blasting_active(&self) -> bool {
        self.ctx.config.blasting && self.blasts.is_active()
    }

    pub fn shovel_mut(&mut self, id: u32) -> Result<&mut ShovelActor, EngineError> {
        let k = *self.shovel_index.get(&id).ok_or(EngineError::UnknownActor { kind: ObjectKind::Shovel, id })?;
        Ok(&mut self.shovels[k])
    }

    pub fn unload_mut(&mut self, id: u32) -> Result<&mut UnloadActor, EngineError> {
        let k = *self.unload_index.get(&id).ok_or(EngineError::UnknownActor { kind: ObjectKind::Unload, id })?;
        Ok(&mut self.unloads[k])
    }

    pub fn station_endpoint(&self, station: usize) -> Endpoint {
        let fs = &self.stations[station];
        let bound = Endpoint::Object(fs.object());
        if self.ctx.data.road_net.locate(&bound).is_some() { bound } else { Endpoint::At(fs.position) }
    }

    pub fn assign_greedy(&mut self, truck_id: u32) -> Option<PlannedTrip> {
        let view = QueueView {
            shovels: &*self.shovels,
            unloads: &*self.unloads,
            shovel_index: self.shovel_index,
            unload_index: self.unload_index,
            heading: self.heading,
            own: Some(self.truck),
        };
        match &mut self.ctx.planning {
            PlanningHandle::Greedy(solver) => solver.assign_trip(&self.ctx.data, truck_id, &view),
            _ => None,
        }
    }
}

pub struct Engine {
    ctx: SimContext,
    now: u64,
    duration: u64,
    trucks: Vec<TruckActor>,
    shovels: Vec<ShovelActor>,
    unloads: Vec<UnloadActor>,
    stations: Vec<FuelStationActor>,
    shovel_index: BTreeMap<u32, usize>,
    unload_index: BTreeMap<u32, usize>,
    heading: Vec<Option<u32>>,
    blasts: BlastWatch,
    wake: WakeQueue,
    notices: Vec<Notice>,
}

impl Engine {
    pub fn new(data: SimData, config: SimConfig, writer: Box<dyn Writer>) -> Result<Self, EngineError> {
        let mut ctx = SimContext::new(data, config, writer);
        let initial = ctx.initial_trips();
        let refuel = ctx.config.refuel && !ctx.data.fuel_stations.is_empty();
        let lunch = if ctx.config.lunch { ctx.data.lunch_offsets() } else { Vec::new() };

        let mut trucks = Vec::with_capacity(initial.len());
        for (id, trips) in initial {
            let truck = ctx.data.trucks.get(&id).ok_or(EngineError::UnknownActor { kind: ObjectKind::Truck, id })?;
            let mut actor = TruckActor::new(trucks.len(), truck, trips).with_refuel(refuel).with_lunch(lunch.clone());
            if ctx.config.breakdown {
                actor = actor.with_breakdown(Breakdown::new(truck.properties.reliability, &mut ctx.df)?);
            }
            if ctx.config.planned_idle {
                actor = actor.with_planned_idle(ctx.data.planned_idle_offsets(ObjectRef::new(ObjectKind::Truck, id)));
            }
            trucks.push(actor);
        }

        let mut shovels = Vec::new();
        for s in ctx.data.shovels.values() {
            let windows = if ctx.config.planned_idle {
                ctx.data.planned_idle_offsets(ObjectRef::new(ObjectKind::Shovel, s.id))
            } else {
                Vec::new()
            };
            shovels.push(ShovelActor::new(s, ctx.config.breakdown, windows, &mut ctx.df)?);
        }
        let mut unloads = Vec::new();
        for u in ctx.data.unloads.values() {
            unloads.push(UnloadActor::new(u, ctx.config.breakdown, &mut ctx.df)?);
        }
        let stations: Vec<FuelStationActor> = ctx.data.fuel_stations.values().map(FuelStationActor::new).collect();

        let mut wake = WakeQueue::new(trucks.len());
        for k in 0..trucks.len() {
            wake.schedule(0, k);
        }
        log::debug!(
            "engine ready: {} trucks, {} shovels, {} unloads, {} fuel stations",
            trucks.len(),
            shovels.len(),
            unloads.len(),
            stations.len()
        );
        Ok(Engine {
            now: 0,
            duration: ctx.data.duration_secs(),
            blasts: BlastWatch::new(&ctx.data),
            shovel_index: shovels.iter().enumerate().map(|(k, s)| (s.id, k)).collect(),
            unload_index: unloads.iter().enumerate().map(|(k, u)| (u.id, k)).collect(),
            heading: vec![None; trucks.len()],
            ctx,
            trucks,
            shovels,
            unloads,
            stations,
            wake,
            notices: Vec::new(),
        })
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn is_done(&self) -> bool {
        self.now >= self.duration
    }

    pub fn trucks(&self) -> &[TruckActor] {
        &self.trucks
    }

    /// Runs one simulated second.
    pub fn step(&mut self) -> Result<(), EngineError> {
        if self.is_done() {
            return Ok(());
        }
        self.watch_blasting();
        self.run_behaviours()?;
        self.process_notices();
        self.run_due()?;
        self.process_notices();
        self.tick();
        self.now += 1;
        Ok(())
    }

    pub fn run_to_end(&mut self) -> Result<(), EngineError> {
        while !self.is_done() {
            self.step()?;
        }
        Ok(())
    }

    /// Closes the writer and fills in the production summary.
    pub fn finish(mut self) -> SimOutput {
        let mut output = self.ctx.writer.finalize();
        let mut summary = self.ctx.trips.summary(self.ctx.data.end_time);
        let lunch_secs: u64 = self.ctx.data.lunch_offsets().iter().map(|(s, e)| e - s).sum();
        summary.trucks_needed = self.ctx.stats.trucks_needed(
            self.ctx.data.target_shovel_load,
            self.duration as f64,
            lunch_secs as f64,
            self.shovels.len(),
            self.unloads.len(),
        );
        output.summary = summary;
        output
    }

    fn watch_blasting(&mut self) {
        if !self.ctx.config.blasting {
            return;
        }
        let generation = self.blasts.generation();
        let ts = self.ctx.timestamp(self.now);
        for (kind, blast) in self.blasts.update(&self.ctx.data, self.now) {
            self.ctx.emit(Event::blasting(kind, ts, &blast));
        }
        if self.blasts.generation() != generation {
            self.check_blast_idle();
        }
    }

    /// Shovels that can reach no unload, and unloads no shovel can reach, idle until the zones
    /// change.
    fn check_blast_idle(&mut self) {
        let net = self.ctx.data.road_net.clone();
        let polygons = self.blasts.polygons();
        let auto = self.ctx.config.is_auto();
        let shovel_ends: Vec<Endpoint> = self.shovels.iter().map(|s| Endpoint::Object(s.object())).collect();
        let unload_ends: Vec<Endpoint> = self.unloads.iter().map(|u| Endpoint::Object(u.object())).collect();

        for (s, from) in self.shovels.iter_mut().zip(&shovel_ends) {
            let blocked = !polygons.is_empty() && !any_safe_path(net.as_ref(), from, &unload_ends, polygons);
            if blocked != s.in_blasting_idle {
                s.in_blasting_idle = blocked;
                log::debug!("shovel {} blasting idle: {}", s.id, blocked);
                if auto {
                    let kind = if blocked { EventKind::BlastingIdleBegin } else { EventKind::BlastingIdleEnd };
                    self.notices.push(Notice::new(kind, ObjectKind::Shovel, s.id));
                }
            }
        }
        for (u, from) in self.unloads.iter_mut().zip(&unload_ends) {
            let blocked = !polygons.is_empty() && !any_safe_path(net.as_ref(), from, &shovel_ends, polygons);
            if blocked != u.in_blasting_idle {
                u.in_blasting_idle = blocked;
                log::debug!("unload {} blasting idle: {}", u.id, blocked);
                if auto {
                    let kind = if blocked { EventKind::BlastingIdleBegin } else { EventKind::BlastingIdleEnd };
                    self.notices.push(Notice::new(kind, ObjectKind::Unload, u.id));
                }
            }
        }
    }

    fn run_behaviours(&mut self) -> Result<(), EngineError> {
        let ts = self.ctx.timestamp(self.now);
        for truck in self.trucks.iter_mut() {
            for kind in truck.behave(self.now)? {
                self.ctx.emit(Event::new(kind, ts, truck.object(), &truck.name));
                self.notices.push(Notice::new(kind, ObjectKind::Truck, truck.id));
            }
        }
        for shovel in self.shovels.iter_mut() {
            shovel.refresh_state();
            let loading = shovel.bay.holders().iter().any(|k| self.trucks[*k].state == TruckState::Loading);
            for kind in shovel.behave(self.now, loading)? {
                self.ctx.emit(Event::new(kind, ts, shovel.object(), &shovel.name));
                self.notices.push(Notice::new(kind, ObjectKind::Shovel, shovel.id));
            }
        }
        for unload in self.unloads.iter_mut() {
            unload.refresh_state();
            let unloading = unload.bays.holders().iter().any(|k| self.trucks[*k].state == TruckState::Unloading);
            for kind in unload.behave(unloading)? {
                self.ctx.emit(Event::new(kind, ts, unload.object(), &unload.name));
                self.notices.push(Notice::new(kind, ObjectKind::Unload, unload.id));
            }
        }
        Ok(())
    }

    fn run_due(&mut self) -> Result<(), EngineError> {
        let now = self.now;
        while let Some(k) = self.wake.pop_due(now) {
            let (flow, woken) = {
                let mut site = Site {
                    now,
                    ctx: &mut self.ctx,
                    shovels: &mut self.shovels,
                    unloads: &mut self.unloads,
                    stations: &mut self.stations,
                    shovel_index: &self.shovel_index,
                    unload_index: &self.unload_index,
                    blasts: &self.blasts,
                    heading: &self.heading,
                    truck: k,
                    notices: &mut self.notices,
                    woken: Vec::new(),
                };
                let truck = &mut self.trucks[k];
                let mut flow = Flow::Continue;
                for _ in 0..MAX_TRANSITIONS {
                    flow = truck.advance(&mut site)?;
                    if flow != Flow::Continue {
                        break;
                    }
                }
                (flow, site.woken)
            };
            self.heading[k] = self.trucks[k].heading_shovel();
            match flow {
                Flow::Sleep(secs) => self.wake.schedule(now + secs.max(1), k),
                Flow::Continue => {
                    log::warn!("truck {} did not settle within one second", self.trucks[k].id);
                    self.wake.schedule(now + 1, k);
                }
                Flow::Block => {}
            }
            for w in woken {
                self.wake.schedule(now, w);
            }
        }
        Ok(())
    }

    /// Applies the exclusions and inclusions raised this second and replans.
    fn process_notices(&mut self) {
        if self.notices.is_empty() {
            return;
        }
        let notices = std::mem::take(&mut self.notices);
        if !self.ctx.config.is_auto() {
            return;
        }
        let greedy = self.ctx.config.is_auto_greedy();
        let (mut exclude, mut include) = (Vec::new(), Vec::new());
        for n in notices {
            if !triggers_replan(&n, greedy) {
                continue;
            }
            if n.kind.is_begin() { exclude.push(n.object) } else { include.push(n.object) }
        }
        if exclude.is_empty() && include.is_empty() {
            return;
        }
        self.replan(exclude, include);
    }

    fn replan(&mut self, exclude: Vec<ObjectRef>, include: Vec<ObjectRef>) {
        let positions: Vec<(u32, TruckPosition)> =
            self.trucks.iter().map(|t| (t.id, TruckPosition { point: t.position, edge: t.edge })).collect();
        let now = self.now;
        let ctx = &mut self.ctx;
        let interrupt: Vec<u32> = match &mut ctx.planning {
            PlanningHandle::Manual => return,
            PlanningHandle::Greedy(solver) => {
                let mut planned = Vec::new();
                if !exclude.is_empty() {
                    planned = solver.rebuild(&ctx.data, now, OverlayChange::Exclude(exclude), positions.clone());
                }
                if !include.is_empty() {
                    planned = solver.rebuild(&ctx.data, now, OverlayChange::Include(include), positions);
                }
                planned
            }
            PlanningHandle::Exact { planner, overlay } => {
                exclude.into_iter().for_each(|o| overlay.exclusions.exclude(o));
                include.into_iter().for_each(|o| overlay.exclusions.include(o));
                overlay.elapsed_secs = now;
                overlay.positions = positions.into_iter().collect();
                let mut plan = planner.run_with_exclude(&ctx.data, overlay);
                for truck in self.trucks.iter_mut() {
                    truck.pending = plan.remove(&truck.id).unwrap_or_default().into();
                }
                self.trucks.iter().map(|t| t.id).collect()
            }
        };
        for truck in self.trucks.iter_mut() {
            if interrupt.contains(&truck.id) && truck.state.is_interruptible() {
                truck.interrupted = true;
                self.wake.schedule(now, truck.index);
            }
        }
    }

    /// Display states, statistics and one telemetry row per actor.
    fn tick(&mut self) {
        let ts = self.ctx.timestamp(self.now);
        let names: Vec<String> = self.trucks.iter().map(|t| t.name.clone()).collect();
        let queue_names = |holders: &[usize], waiting: Vec<usize>| -> Vec<String> {
            holders.iter().chain(waiting.iter()).map(|k| names[*k].clone()).collect()
        };

        for truck in &self.trucks {
            self.ctx.stats.observe_truck(truck.id, truck.state, 1.);
            self.ctx.writer.write_telemetry_row(TelemetryRow::Truck(truck.row(ts)));
        }
        for shovel in self.shovels.iter_mut() {
            let state = shovel.refresh_state();
            let served = shovel.bay.holders().first().map(|k| (self.trucks[*k].id, self.trucks[*k].state));
            self.ctx.stats.observe_shovel(shovel.id, state, 1., served);
            let queue = queue_names(shovel.bay.holders(), shovel.bay.waiting().copied().collect());
            self.ctx.writer.write_telemetry_row(TelemetryRow::Shovel(shovel.row(ts, &queue)));
        }
        for unload in self.unloads.iter_mut() {
            let state = unload.refresh_state();
            let served = unload.bays.holders().first().map(|k| (self.trucks[*k].id, self.trucks[*k].state));
            self.ctx.stats.observe_unload(unload.id, state, 1., served);
            let queue = queue_names(unload.bays.holders(), unload.bays.waiting().copied().collect());
            self.ctx.writer.write_telemetry_row(TelemetryRow::Unload(unload.row(ts, &queue)));
        }
        for station in self.stations.iter_mut() {
            station.refresh_state();
            let queue = queue_names(station.pumps.holders(), station.pumps.waiting().copied().collect());
            self.ctx.writer.write_telemetry_row(TelemetryRow::FuelStation(station.row(ts, &queue)));
        }
    }
}

/// Which disruptions take an object out of planning. Truck blasting idles only count for the
/// greedy solver.
fn triggers_replan(notice: &Notice, greedy: bool) -> bool {
    use EventKind::*;
    match notice.object.kind {
        ObjectKind::Truck => match notice.kind {
            BreakdownBegin | BreakdownEnd | RefuelingBegin | RefuelingEnd | LunchBegin | LunchEnd | PlannedIdleBegin | PlannedIdleEnd => true,
            BlastingIdleBegin | BlastingIdleEnd => greedy,
            _ => false,
        },
        ObjectKind::Shovel => matches!(notice.kind, BreakdownBegin | BreakdownEnd | PlannedIdleBegin | PlannedIdleEnd | BlastingIdleBegin | BlastingIdleEnd),
        ObjectKind::Unload => matches!(notice.kind, BreakdownBegin | BreakdownEnd | BlastingIdleBegin | BlastingIdleEnd),
        _ => false,
    }
}
