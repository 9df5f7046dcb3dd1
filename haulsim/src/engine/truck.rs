//! Truck main process. A trip runs through explicit phases; disruptions met on the road are
//! served as detours that suspend the phase and hand it back when done.

use std::collections::VecDeque;

use crate::calc::shovel::LoadCycle;
use crate::calc::truck::{MotionSample, RouteMotion};
use crate::engine::Site;
use crate::engine::behaviors::{Breakdown, WindowSignal, WindowWatch, burn_second};
use crate::engine::events::{Event, EventKind, Notice};
use crate::engine::fuel_station::pick_station;
use crate::engine::resource::Request;
use crate::engine::states::TruckState;
use crate::engine::telemetry::{TruckRow, round_to};
use crate::error::EngineError;
use crate::geometry::Point;
use crate::props::{AreaKind, ObjectKind, ObjectRef, PlannedTrip, Truck, TruckProperties};
use crate::routing::{Endpoint, Route};
use crate::stats::TripData;

/// Seconds a truck idles after emptying its body.
const IDLE_AFTER_TRIP: u64 = 5;

/// What the engine does with a truck after one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Sleep(u64),
    /// Waiting for a resource; the holder wakes it on release.
    Block,
    Continue,
}

#[derive(Debug, Clone)]
enum Phase {
    Begin,
    ToShovel(RouteMotion),
    AtShovel,
    Loading { cycles: Vec<LoadCycle>, next: usize, until: Option<u64> },
    ToUnload(RouteMotion),
    AtUnload,
    Unloading { total: u64, elapsed: u64, weight: f64, volume: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaReason {
    Lunch,
    PlannedIdle,
    /// Holds while the active zone set keeps this generation.
    Blasting { generation: u64 },
}

impl AreaReason {
    fn kind(self) -> AreaKind {
        match self {
            AreaReason::Lunch => AreaKind::Lunch,
            AreaReason::PlannedIdle => AreaKind::PlannedIdle,
            AreaReason::Blasting { .. } => AreaKind::BlastWaiting,
        }
    }

    fn state(self) -> TruckState {
        match self {
            AreaReason::Lunch => TruckState::Lunch,
            AreaReason::PlannedIdle => TruckState::PlannedIdle,
            AreaReason::Blasting { .. } => TruckState::BlastingIdle,
        }
    }
}

#[derive(Debug, Clone)]
enum AreaStage {
    /// `fallback` carries the zone generation when the truck is heading for a blast-waiting
    /// area because the requested one could not be reached.
    Travel { motion: RouteMotion, fallback: Option<u64> },
    Wait,
    WaitZones { generation: u64 },
}

#[derive(Debug, Clone)]
enum RefuelStage {
    Travel(RouteMotion),
    Queued,
    Filling { until: u64 },
}

#[derive(Debug, Clone)]
enum Detour {
    Repair { prior: TruckState },
    Refuel { prior: TruckState, station: usize, stage: RefuelStage },
    Area { prior: TruckState, reason: AreaReason, stage: AreaStage },
}

enum DetourStep {
    None,
    Busy(Flow),
    Done { moved: bool },
}

#[derive(Debug)]
pub struct TruckActor {
    pub index: usize,
    pub id: u32,
    pub name: String,
    pub properties: TruckProperties,
    pub position: Point,
    pub edge: Option<usize>,
    pub speed: f64,
    pub weight: f64,
    pub volume: f64,
    pub fuel: f64,
    pub state: TruckState,
    pub pending: VecDeque<PlannedTrip>,
    pub current: Option<PlannedTrip>,
    pub interrupted: bool,
    pub fuel_empty: bool,
    pub at_lunch: bool,
    pub at_planned_idle: bool,
    haul_route: Option<Route>,
    returning: bool,
    phase: Phase,
    detour: Option<Detour>,
    detour_moved: bool,
    breakdown: Option<Breakdown>,
    refuel: bool,
    lunch: WindowWatch,
    planned_idle: WindowWatch,
}

impl TruckActor {
    pub fn new(index: usize, truck: &Truck, trips: Vec<PlannedTrip>) -> Self {
        TruckActor {
            index,
            id: truck.id,
            name: truck.name.clone(),
            properties: truck.properties.clone(),
            position: truck.position,
            edge: truck.edge,
            speed: 0.,
            weight: 0.,
            volume: 0.,
            fuel: truck.properties.fuel_level,
            state: TruckState::Idle,
            pending: trips.into(),
            current: None,
            interrupted: false,
            fuel_empty: false,
            at_lunch: false,
            at_planned_idle: false,
            haul_route: None,
            returning: false,
            phase: Phase::Begin,
            detour: None,
            detour_moved: false,
            breakdown: None,
            refuel: false,
            lunch: WindowWatch::default(),
            planned_idle: WindowWatch::default(),
        }
    }

    pub fn with_breakdown(self, breakdown: Breakdown) -> Self {
        TruckActor { breakdown: Some(breakdown), ..self }
    }

    pub fn with_refuel(self, refuel: bool) -> Self {
        TruckActor { refuel, ..self }
    }

    pub fn with_lunch(self, windows: Vec<(u64, u64)>) -> Self {
        TruckActor { lunch: WindowWatch::new(windows), ..self }
    }

    pub fn with_planned_idle(self, windows: Vec<(u64, u64)>) -> Self {
        TruckActor { planned_idle: WindowWatch::new(windows), ..self }
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::Truck, self.id)
    }

    pub fn is_broken(&self) -> bool {
        self.breakdown.as_ref().is_some_and(Breakdown::is_broken)
    }

    /// The shovel the truck is driving empty towards, if any.
    pub fn heading_shovel(&self) -> Option<u32> {
        match self.phase {
            Phase::ToShovel(_) => self.current.map(|t| t.shovel_id),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self.edge {
            Some(edge) => Endpoint::OnEdge { point: self.position, edge },
            None => Endpoint::At(self.position),
        }
    }

    /// Background behaviours for one second: wear, fuel burn, lunch and planned idle.
    pub fn behave(&mut self, now: u64) -> Result<Vec<EventKind>, EngineError> {
        let mut events = Vec::new();
        if let Some(b) = self.breakdown.as_mut() {
            let t = b.update(self.state.is_working())?;
            if t.failed() {
                events.push(EventKind::BreakdownBegin);
            } else if t.repaired() {
                events.push(EventKind::BreakdownEnd);
            }
        }
        if self.refuel {
            let (fuel, due) = burn_second(&self.properties, self.fuel, self.state.is_moving());
            self.fuel = fuel;
            if due && !self.fuel_empty {
                log::debug!("truck {} needs fuel ({:.1} l)", self.id, fuel);
                self.fuel_empty = true;
            }
        }
        match self.lunch.update(now, self.state.is_working(), &mut self.at_lunch) {
            Some(WindowSignal::Begin) => events.push(EventKind::LunchBegin),
            Some(WindowSignal::End) => events.push(EventKind::LunchEnd),
            None => {}
        }
        // detours start on the road, so a truck held in a queue picks its window up once it drives
        match self.planned_idle.update(now, self.state.is_moving(), &mut self.at_planned_idle) {
            Some(WindowSignal::Begin) => events.push(EventKind::PlannedIdleBegin),
            Some(WindowSignal::End) => events.push(EventKind::PlannedIdleEnd),
            None => {}
        }
        Ok(events)
    }

    pub fn row(&self, timestamp: f64) -> TruckRow {
        TruckRow {
            object_id: self.object().tag(),
            object_name: self.name.clone(),
            object_type: ObjectKind::Truck.to_string(),
            lat: round_to(self.position.lat, 6),
            lon: round_to(self.position.lon, 6),
            speed: round_to(self.speed, 1),
            weight: round_to(self.weight, 1),
            fuel: self.fuel,
            state: self.state,
            timestamp,
        }
    }

    /// Runs the main process from its current phase until it yields.
    pub fn advance(&mut self, site: &mut Site<'_>) -> Result<Flow, EngineError> {
        if self.interrupted && self.detour.is_none() && self.state.is_interruptible() {
            self.interrupted = false;
            if matches!(self.phase, Phase::ToShovel(_) | Phase::AtShovel) {
                self.leave_shovel_queue(site);
                self.returning = false;
                self.phase = Phase::Begin;
                log::debug!("truck {} interrupted at {} s", self.id, site.now);
            }
        }

        let phase = std::mem::replace(&mut self.phase, Phase::Begin);
        let (phase, flow) = match phase {
            Phase::Begin => return self.begin(site),
            Phase::ToShovel(motion) => self.drive(site, motion, false)?,
            Phase::AtShovel => self.queue_at_shovel(site)?,
            Phase::Loading { cycles, next, until } => self.load(site, cycles, next, until)?,
            Phase::ToUnload(motion) => self.drive(site, motion, true)?,
            Phase::AtUnload => self.queue_at_unload(site)?,
            Phase::Unloading { total, elapsed, weight, volume } => self.unload(site, total, elapsed, weight, volume)?,
        };
        self.phase = phase;
        Ok(flow)
    }

    fn trip(&self) -> Result<PlannedTrip, EngineError> {
        self.current.ok_or(EngineError::UnknownActor { kind: ObjectKind::Truck, id: self.id })
    }

    fn leave_shovel_queue(&mut self, site: &mut Site<'_>) {
        let Some(trip) = self.current else {
            return;
        };
        if let Ok(shovel) = site.shovel_mut(trip.shovel_id) {
            if shovel.bay.is_holding(self.index) {
                if let Some(next) = shovel.bay.release(self.index) {
                    site.woken.push(next);
                }
            } else {
                shovel.bay.cancel(self.index);
            }
        }
    }

    fn route(&self, site: &Site<'_>, from: &Endpoint, to: &Endpoint) -> Result<Route, EngineError> {
        site.net().shortest(from, to).ok_or_else(|| EngineError::NoRoute { from: label(from), to: label(to) })
    }

    fn target(&self, loaded: bool) -> Result<Endpoint, EngineError> {
        let trip = self.trip()?;
        Ok(if loaded {
            Endpoint::Object(ObjectRef::new(ObjectKind::Unload, trip.unload_id))
        } else {
            Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, trip.shovel_id))
        })
    }

    /// Where the start route begins: the truck's road position, or the shift-change area for a
    /// truck that has not driven yet.
    fn start_endpoint(&mut self, site: &Site<'_>) -> Endpoint {
        if self.edge.is_some() {
            return self.endpoint();
        }
        let net = site.net();
        let areas = &site.ctx.areas;
        match areas.first(AreaKind::ShiftChange).and_then(|id| Some((areas.endpoint(id, net.as_ref())?, areas.area_point(id, net.as_ref())?))) {
            Some((endpoint, point)) => {
                self.position = point;
                endpoint
            }
            None => self.endpoint(),
        }
    }

    fn begin(&mut self, site: &mut Site<'_>) -> Result<Flow, EngineError> {
        self.interrupted = false;
        let greedy = site.ctx.config.is_auto_greedy();
        if self.pending.is_empty() && greedy {
            if let Some(trip) = site.assign_greedy(self.id) {
                self.pending.push_back(trip);
            }
        }

        let last_unload = self.current.map(|t| t.unload_id);
        let start_route = if let Some(trip) = self.pending.pop_front() {
            let shovel = Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, trip.shovel_id));
            let unload = Endpoint::Object(ObjectRef::new(ObjectKind::Unload, trip.unload_id));
            site.shovel_mut(trip.shovel_id)?;
            site.unload_mut(trip.unload_id)?;
            let haul = self.route(site, &shovel, &unload)?;
            let from = self.start_endpoint(site);
            let start = self.route(site, &from, &shovel)?;
            self.current = Some(trip);
            self.haul_route = Some(haul);
            start
        } else if greedy || self.current.is_none() || self.haul_route.is_none() {
            // nothing to do until a plan names this truck
            self.state = TruckState::Idle;
            self.speed = 0.;
            return Ok(Flow::Sleep(1));
        } else if self.returning {
            self.haul_route.as_ref().map(Route::reversed).unwrap_or_default()
        } else {
            let from = self.start_endpoint(site);
            self.route(site, &from, &self.target(false)?)?
        };
        self.returning = false;

        let trip = self.trip()?;
        self.state = TruckState::MovingEmpty;
        let data = TripData {
            truck_id: self.id,
            shovel_id: Some(trip.shovel_id),
            unload_id: last_unload.or(Some(trip.unload_id)),
            weight: self.weight,
            volume: self.volume,
        };
        site.ctx.trips.begin(&data, site.ctx.data.at_offset(site.now));
        self.phase = Phase::ToShovel(RouteMotion::for_truck(start_route, &self.properties, false));
        Ok(Flow::Continue)
    }

    fn apply(&mut self, sample: MotionSample) {
        self.position = sample.position;
        self.edge = Some(sample.edge);
        self.speed = sample.speed;
    }

    fn drive(&mut self, site: &mut Site<'_>, mut motion: RouteMotion, loaded: bool) -> Result<(Phase, Flow), EngineError> {
        let wrap = |m: RouteMotion| if loaded { Phase::ToUnload(m) } else { Phase::ToShovel(m) };
        match self.run_detour(site)? {
            DetourStep::Busy(flow) => return Ok((wrap(motion), flow)),
            DetourStep::Done { moved } => {
                if moved {
                    let route = self.route(site, &self.endpoint(), &self.target(loaded)?)?;
                    motion = RouteMotion::for_truck(route, &self.properties, loaded);
                }
                return Ok((wrap(motion), Flow::Continue));
            }
            DetourStep::None => {}
        }

        if site.blasting_active() && motion.remaining().intersects(site.blasts.polygons()) {
            let target = self.target(loaded)?;
            match site.net().route_avoiding(&self.endpoint(), &target, site.blasts.polygons()) {
                Some(route) => {
                    log::debug!("truck {} reroutes around blasting", self.id);
                    motion = RouteMotion::for_truck(route, &self.properties, loaded);
                }
                None => {
                    let reason = AreaReason::Blasting { generation: site.blasts.generation() };
                    let stage = self.find_area(site, reason.kind());
                    site.notices.push(Notice::new(EventKind::BlastingIdleBegin, ObjectKind::Truck, self.id));
                    self.detour = Some(Detour::Area { prior: self.state, reason, stage });
                    self.detour_moved = false;
                    self.state = TruckState::BlastingIdle;
                    self.speed = 0.;
                    return Ok((wrap(motion), Flow::Continue));
                }
            }
        }

        self.state = if loaded { TruckState::MovingLoaded } else { TruckState::MovingEmpty };
        match motion.next() {
            Some(sample) => {
                self.apply(sample);
                Ok((wrap(motion), Flow::Sleep(1)))
            }
            None => {
                self.speed = 0.;
                Ok((if loaded { Phase::AtUnload } else { Phase::AtShovel }, Flow::Continue))
            }
        }
    }

    fn queue_at_shovel(&mut self, site: &mut Site<'_>) -> Result<(Phase, Flow), EngineError> {
        let trip = self.trip()?;
        self.state = TruckState::Waiting;
        self.speed = 0.;
        self.weight = 0.;
        self.volume = 0.;
        let shovel = site.shovel_mut(trip.shovel_id)?;
        match shovel.bay.request(self.index) {
            Request::Granted => {
                let cycles = shovel.cycles_for(&self.properties);
                Ok((Phase::Loading { cycles, next: 0, until: None }, Flow::Continue))
            }
            Request::Queued => Ok((Phase::AtShovel, Flow::Block)),
        }
    }

    fn load(&mut self, site: &mut Site<'_>, cycles: Vec<LoadCycle>, next: usize, until: Option<u64>) -> Result<(Phase, Flow), EngineError> {
        let trip = self.trip()?;
        if let Some(until) = until {
            if site.now < until {
                return Ok((Phase::Loading { cycles, next, until: Some(until) }, Flow::Sleep(until - site.now)));
            }
            if let Some(c) = cycles.get(next) {
                self.weight = c.weight;
                self.volume = c.volume;
            }
            return Ok((Phase::Loading { cycles, next: next + 1, until: None }, Flow::Continue));
        }

        let truck_broken = self.is_broken();
        let shovel = site.shovel_mut(trip.shovel_id)?;
        let Some(cycle) = cycles.get(next).copied() else {
            if let Some(waiting) = shovel.bay.release(self.index) {
                site.woken.push(waiting);
            }
            let haul = self.haul_route.clone().unwrap_or_default();
            self.state = TruckState::MovingLoaded;
            return Ok((Phase::ToUnload(RouteMotion::for_truck(haul, &self.properties, true)), Flow::Continue));
        };
        if shovel.is_broken() || truck_broken {
            self.state = if truck_broken { TruckState::Repair } else { TruckState::Idle };
            return Ok((Phase::Loading { cycles, next, until: None }, Flow::Sleep(1)));
        }
        self.state = TruckState::Loading;
        if cycle.secs == 0 {
            return Ok((Phase::Loading { cycles, next, until: Some(site.now) }, Flow::Continue));
        }
        Ok((Phase::Loading { cycles, next, until: Some(site.now + cycle.secs) }, Flow::Sleep(cycle.secs)))
    }

    fn queue_at_unload(&mut self, site: &mut Site<'_>) -> Result<(Phase, Flow), EngineError> {
        let trip = self.trip()?;
        self.speed = 0.;
        let unload = site.unload_mut(trip.unload_id)?;
        match unload.bays.request(self.index) {
            Request::Granted => {
                self.state = TruckState::Unloading;
                let total = unload.unload_secs(self.volume);
                let (weight, volume) = (self.weight, self.volume);
                Ok((Phase::Unloading { total, elapsed: 0, weight, volume }, Flow::Continue))
            }
            Request::Queued => {
                self.state = TruckState::Waiting;
                Ok((Phase::AtUnload, Flow::Block))
            }
        }
    }

    fn unload(&mut self, site: &mut Site<'_>, total: u64, elapsed: u64, weight: f64, volume: f64) -> Result<(Phase, Flow), EngineError> {
        let trip = self.trip()?;
        let truck_broken = self.is_broken();
        let unload = site.unload_mut(trip.unload_id)?;
        if elapsed < total {
            if unload.is_broken() || truck_broken {
                self.state = if truck_broken { TruckState::Repair } else { TruckState::Idle };
                return Ok((Phase::Unloading { total, elapsed, weight, volume }, Flow::Sleep(1)));
            }
            self.state = TruckState::Unloading;
            let elapsed = elapsed + 1;
            let left = 1. - elapsed as f64 / total as f64;
            self.weight = weight * left;
            self.volume = volume * left;
            return Ok((Phase::Unloading { total, elapsed, weight, volume }, Flow::Sleep(1)));
        }

        if let Some(waiting) = unload.bays.release(self.index) {
            site.woken.push(waiting);
        }
        self.weight = 0.;
        self.volume = 0.;
        let data = TripData {
            truck_id: self.id,
            shovel_id: Some(trip.shovel_id),
            unload_id: Some(trip.unload_id),
            weight,
            volume,
        };
        site.ctx.trips.finish(&data, site.ctx.data.at_offset(site.now))?;
        self.state = TruckState::Idle;
        self.returning = true;
        Ok((Phase::Begin, Flow::Sleep(IDLE_AFTER_TRIP)))
    }

    fn start_detour(&mut self, site: &Site<'_>) -> Result<Option<Detour>, EngineError> {
        let prior = self.state;
        if self.is_broken() {
            return Ok(Some(Detour::Repair { prior }));
        }
        if self.fuel_empty {
            if let Some(station) = pick_station(&*site.stations, &self.position) {
                let to = site.station_endpoint(station);
                let route = site.net().shortest(&self.endpoint(), &to).unwrap_or_else(|| {
                    log::warn!("truck {} has no road to fuel station {}, refuelling in place", self.id, site.stations[station].id);
                    Route::default()
                });
                let motion = RouteMotion::for_truck(route, &self.properties, self.weight > 0.);
                return Ok(Some(Detour::Refuel { prior, station, stage: RefuelStage::Travel(motion) }));
            }
        }
        if self.at_planned_idle {
            let stage = self.find_area(site, AreaKind::PlannedIdle);
            return Ok(Some(Detour::Area { prior, reason: AreaReason::PlannedIdle, stage }));
        }
        if self.at_lunch {
            let stage = self.find_area(site, AreaKind::Lunch);
            return Ok(Some(Detour::Area { prior, reason: AreaReason::Lunch, stage }));
        }
        Ok(None)
    }

    fn run_detour(&mut self, site: &mut Site<'_>) -> Result<DetourStep, EngineError> {
        let detour = match self.detour.take() {
            Some(d) => d,
            None => match self.start_detour(site)? {
                Some(d) => {
                    self.detour_moved = false;
                    d
                }
                None => return Ok(DetourStep::None),
            },
        };
        let step = match detour {
            Detour::Repair { prior } => self.repair(prior),
            Detour::Refuel { prior, station, stage } => self.refuel_step(site, prior, station, stage)?,
            Detour::Area { prior, reason, stage } => self.area_step(site, prior, reason, stage),
        };
        Ok(match step {
            (Some(d), flow) => {
                self.detour = Some(d);
                DetourStep::Busy(flow)
            }
            (None, _) => DetourStep::Done { moved: std::mem::take(&mut self.detour_moved) },
        })
    }

    fn repair(&mut self, prior: TruckState) -> (Option<Detour>, Flow) {
        if self.is_broken() {
            self.state = TruckState::Repair;
            self.speed = 0.;
            (Some(Detour::Repair { prior }), Flow::Sleep(1))
        } else {
            self.state = prior;
            (None, Flow::Continue)
        }
    }

    fn refuel_step(&mut self, site: &mut Site<'_>, prior: TruckState, station: usize, stage: RefuelStage) -> Result<(Option<Detour>, Flow), EngineError> {
        let keep = |stage| Some(Detour::Refuel { prior, station, stage });
        match stage {
            RefuelStage::Travel(mut motion) => {
                if self.is_broken() {
                    self.state = TruckState::Repair;
                    self.speed = 0.;
                    return Ok((keep(RefuelStage::Travel(motion)), Flow::Sleep(1)));
                }
                if site.blasting_active() && motion.remaining().intersects(site.blasts.polygons()) {
                    let to = site.station_endpoint(station);
                    match site.net().route_avoiding(&self.endpoint(), &to, site.blasts.polygons()) {
                        Some(route) => motion = RouteMotion::for_truck(route, &self.properties, self.weight > 0.),
                        None => {
                            self.speed = 0.;
                            return Ok((keep(RefuelStage::Travel(motion)), Flow::Sleep(1)));
                        }
                    }
                }
                self.state = if prior.is_moving() { prior } else { TruckState::MovingEmpty };
                match motion.next() {
                    Some(sample) => {
                        self.apply(sample);
                        self.detour_moved = true;
                        Ok((keep(RefuelStage::Travel(motion)), Flow::Sleep(1)))
                    }
                    None => {
                        self.speed = 0.;
                        Ok((keep(RefuelStage::Queued), Flow::Continue))
                    }
                }
            }
            RefuelStage::Queued => {
                self.state = TruckState::Waiting;
                match site.stations[station].pumps.request(self.index) {
                    Request::Queued => Ok((keep(RefuelStage::Queued), Flow::Block)),
                    Request::Granted => {
                        let fs = &site.stations[station];
                        let secs = fs.refuel_secs(self.fuel, self.properties.fuel_capacity);
                        let event = Event::new(EventKind::RefuelingBegin, site.timestamp(), fs.object(), &fs.name).with_truck(self.id, &self.name);
                        site.ctx.emit(event);
                        site.notices.push(Notice::new(EventKind::RefuelingBegin, ObjectKind::Truck, self.id));
                        self.state = TruckState::Refueling;
                        Ok((keep(RefuelStage::Filling { until: site.now + secs }), if secs == 0 { Flow::Continue } else { Flow::Sleep(secs) }))
                    }
                }
            }
            RefuelStage::Filling { until } => {
                if site.now < until {
                    self.state = TruckState::Refueling;
                    return Ok((keep(RefuelStage::Filling { until }), Flow::Sleep(until - site.now)));
                }
                self.fuel = self.properties.fuel_capacity;
                self.fuel_empty = false;
                let fs = &mut site.stations[station];
                if let Some(waiting) = fs.pumps.release(self.index) {
                    site.woken.push(waiting);
                }
                let event = Event::new(EventKind::RefuelingEnd, site.ctx.timestamp(site.now), fs.object(), &fs.name).with_truck(self.id, &self.name);
                site.ctx.emit(event);
                site.notices.push(Notice::new(EventKind::RefuelingEnd, ObjectKind::Truck, self.id));
                self.detour_moved = true;
                self.state = prior;
                Ok((None, Flow::Continue))
            }
        }
    }

    fn area_holds(&self, site: &Site<'_>, reason: AreaReason) -> bool {
        match reason {
            AreaReason::Lunch => self.at_lunch,
            AreaReason::PlannedIdle => self.at_planned_idle,
            AreaReason::Blasting { generation } => site.blasts.generation() == generation,
        }
    }

    fn area_step(&mut self, site: &mut Site<'_>, prior: TruckState, reason: AreaReason, stage: AreaStage) -> (Option<Detour>, Flow) {
        if !self.area_holds(site, reason) {
            if matches!(reason, AreaReason::Blasting { .. }) {
                site.notices.push(Notice::new(EventKind::BlastingIdleEnd, ObjectKind::Truck, self.id));
            }
            self.state = prior;
            return (None, Flow::Continue);
        }
        self.state = reason.state();
        let stage = match stage {
            AreaStage::Travel { fallback: Some(generation), .. } if generation != site.blasts.generation() => self.find_area(site, reason.kind()),
            AreaStage::WaitZones { generation } if generation != site.blasts.generation() => self.find_area(site, reason.kind()),
            other => other,
        };
        let stage = match stage {
            AreaStage::Travel { mut motion, fallback } => match motion.next() {
                Some(sample) => {
                    self.apply(sample);
                    self.detour_moved = true;
                    AreaStage::Travel { motion, fallback }
                }
                None => {
                    self.speed = 0.;
                    match fallback {
                        Some(generation) => AreaStage::WaitZones { generation },
                        None => AreaStage::Wait,
                    }
                }
            },
            waiting => {
                self.speed = 0.;
                waiting
            }
        };
        (Some(Detour::Area { prior, reason, stage }), Flow::Sleep(1))
    }

    /// Route to the nearest reachable area of `kind`. When none is reachable the truck falls
    /// back to a blast-waiting area and retries once the zones change.
    fn find_area(&self, site: &Site<'_>, kind: AreaKind) -> AreaStage {
        let net = site.net();
        let from = self.endpoint();
        let polygons = if site.blasting_active() { site.blasts.polygons() } else { &[] };
        let areas = &site.ctx.areas;
        let loaded = self.weight > 0.;
        if let Some((id, route)) = areas.find_nearest(kind, &from, polygons, net.as_ref()) {
            log::debug!("truck {} heads to {} area {}", self.id, kind, id);
            return AreaStage::Travel { motion: RouteMotion::for_truck(route, &self.properties, loaded), fallback: None };
        }
        if !areas.has_any(kind) {
            return AreaStage::Wait;
        }
        let generation = site.blasts.generation();
        log::warn!("truck {} cannot reach any {} area", self.id, kind);
        if kind != AreaKind::BlastWaiting {
            if let Some((_, route)) = areas.find_nearest(AreaKind::BlastWaiting, &from, polygons, net.as_ref()) {
                return AreaStage::Travel { motion: RouteMotion::for_truck(route, &self.properties, loaded), fallback: Some(generation) };
            }
        }
        AreaStage::WaitZones { generation }
    }
}

fn label(e: &Endpoint) -> String {
    match e {
        Endpoint::Object(obj) => obj.tag(),
        Endpoint::OnEdge { edge, .. } => format!("edge {}", edge),
        Endpoint::At(p) => format!("({:.6}, {:.6})", p.lat, p.lon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> TruckActor {
        let data = crate::test_support::tiny_sim_data();
        TruckActor::new(0, &data.trucks[&1], Vec::new()).with_planned_idle(vec![(10, 20)])
    }

    #[test]
    fn planned_idle_waits_until_the_truck_drives() {
        let mut t = actor();
        t.state = TruckState::Waiting;
        for now in 10..15 {
            assert!(t.behave(now).unwrap().is_empty());
        }
        assert!(!t.at_planned_idle);
        t.state = TruckState::MovingEmpty;
        assert_eq!(t.behave(15).unwrap(), vec![EventKind::PlannedIdleBegin]);
        assert!(t.at_planned_idle);
        assert_eq!(t.behave(20).unwrap(), vec![EventKind::PlannedIdleEnd]);
    }

    #[test]
    fn window_missed_in_a_queue_is_dropped() {
        let mut t = actor();
        t.state = TruckState::Waiting;
        for now in 10..20 {
            assert!(t.behave(now).unwrap().is_empty());
        }
        t.state = TruckState::MovingLoaded;
        assert!(t.behave(20).unwrap().is_empty());
        assert!(!t.at_planned_idle);
    }
}
