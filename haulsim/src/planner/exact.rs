//! Exact trip scheduling by depth-first branch and bound over interval timelines.
//!
//! Every shovel and unload owns a timeline of busy intervals that may not overlap. A node of
//! the search picks the open truck that can start its next load earliest and branches on every
//! (shovel, unload) pair that still fits in the shift, plus the option of sending the truck
//! home. Intervals are placed at the earliest gap of the timeline. The root's children are
//! searched in parallel and share the incumbent objective for pruning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use strum_macros::Display;

use crate::config::SolverConfig;
use crate::planner::input::InputPlanningData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    NotSolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTrip {
    pub truck_id: u32,
    pub order: u32,
    pub shovel_id: u32,
    pub unload_id: u32,
    /// Minutes from the plan start.
    pub start_load: u64,
    pub start_unload: u64,
    pub tons: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResult {
    pub status: SolveStatus,
    pub objective: u64,
    pub trips: Vec<ScheduledTrip>,
}

impl PlanResult {
    fn empty(status: SolveStatus) -> Self {
        PlanResult { status, objective: 0, trips: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy)]
struct TripOption {
    j: usize,
    z: usize,
    load: u64,
    haul: u64,
    unload: u64,
    end: u64,
    tons: u64,
}

/// The planning matrices resolved to dense indices. Only complete (shovel, unload) pairs
/// survive as options.
#[derive(Debug)]
struct Problem {
    trucks: Vec<u32>,
    shovels: Vec<u32>,
    unloads: Vec<u32>,
    d_work: u64,
    options: Vec<Vec<TripOption>>,
    start: Vec<Vec<Option<u64>>>,
    ret: Vec<Vec<Vec<Option<u64>>>>,
    kmax: Vec<u64>,
    max_tons: Vec<u64>,
    min_chain: Vec<u64>,
    min_end: Vec<u64>,
}

impl Problem {
    fn new(pd: &InputPlanningData) -> Self {
        let trucks = pd.truck_ids();
        let shovels = pd.shovel_ids();
        let unloads = pd.unload_ids();
        let mut p = Problem {
            d_work: pd.d_work,
            options: Vec::with_capacity(trucks.len()),
            start: Vec::with_capacity(trucks.len()),
            ret: Vec::with_capacity(trucks.len()),
            kmax: Vec::with_capacity(trucks.len()),
            max_tons: Vec::with_capacity(trucks.len()),
            min_chain: Vec::with_capacity(trucks.len()),
            min_end: Vec::with_capacity(trucks.len()),
            trucks: Vec::new(),
            shovels: Vec::new(),
            unloads: Vec::new(),
        };
        for &i in &trucks {
            let mut opts = Vec::new();
            for (jx, &j) in shovels.iter().enumerate() {
                for (zx, &z) in unloads.iter().enumerate() {
                    let legs = (
                        pd.t_load.get(&(i, j)),
                        pd.t_haul.get(&(i, j, z)),
                        pd.t_unload.get(&(i, z)),
                        pd.t_end.get(&(i, z)),
                        pd.m_tons.get(&(i, j)),
                    );
                    if let (Some(&load), Some(&haul), Some(&unload), Some(&end), Some(&tons)) = legs {
                        opts.push(TripOption { j: jx, z: zx, load, haul, unload, end, tons });
                    }
                }
            }
            p.start.push(shovels.iter().map(|&j| pd.t_start.get(&(i, j)).copied()).collect());
            p.ret.push(
                unloads
                    .iter()
                    .map(|&z| shovels.iter().map(|&j| pd.t_return.get(&(i, z, j)).copied()).collect())
                    .collect(),
            );
            p.kmax.push(pd.kmax(i));
            p.max_tons.push(opts.iter().map(|o| o.tons).max().unwrap_or(0));
            p.min_chain.push(opts.iter().map(|o| o.load + o.haul + o.unload).min().unwrap_or(0));
            p.min_end.push(opts.iter().map(|o| o.end).min().unwrap_or(0));
            p.options.push(opts);
        }
        p.trucks = trucks;
        p.shovels = shovels;
        p.unloads = unloads;
        p
    }
}

/// Busy intervals of one shovel or unload, sorted by start and pairwise disjoint.
#[derive(Debug, Clone, Default)]
struct Timeline {
    busy: Vec<(u64, u64)>,
}

impl Timeline {
    fn earliest_fit(&self, ready: u64, dur: u64) -> u64 {
        if dur == 0 {
            return ready;
        }
        let mut t = ready;
        for &(s, e) in &self.busy {
            if e <= t {
                continue;
            }
            if s >= t + dur {
                break;
            }
            t = e;
        }
        t
    }

    fn insert(&mut self, start: u64, dur: u64) -> Option<usize> {
        if dur == 0 {
            return None;
        }
        let at = self.busy.partition_point(|(s, _)| *s < start);
        self.busy.insert(at, (start, start + dur));
        Some(at)
    }

    fn remove(&mut self, at: Option<usize>) {
        if let Some(at) = at {
            self.busy.remove(at);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TruckCursor {
    /// Unload index and end minute of the last trip.
    last: Option<(usize, u64)>,
    count: u64,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Placed {
    truck: usize,
    option: TripOption,
    start_load: u64,
    start_unload: u64,
}

#[derive(Debug, Clone, Default)]
struct State {
    trucks: Vec<TruckCursor>,
    shovels: Vec<Timeline>,
    unloads: Vec<Timeline>,
    objective: u64,
    placed: Vec<Placed>,
}

impl State {
    fn new(p: &Problem) -> Self {
        State {
            trucks: vec![TruckCursor::default(); p.trucks.len()],
            shovels: vec![Timeline::default(); p.shovels.len()],
            unloads: vec![Timeline::default(); p.unloads.len()],
            objective: 0,
            placed: Vec::new(),
        }
    }

    fn ready(&self, p: &Problem, i: usize, j: usize) -> Option<u64> {
        match self.trucks[i].last {
            None => p.start[i][j],
            Some((z, end)) => p.ret[i][z][j].map(|r| end + r),
        }
    }

    fn is_open(&self, p: &Problem, i: usize) -> bool {
        let c = &self.trucks[i];
        !c.closed && c.count < p.kmax[i] && !p.options[i].is_empty()
    }

    fn earliest_ready(&self, p: &Problem, i: usize) -> Option<u64> {
        (0..p.shovels.len()).filter_map(|j| self.ready(p, i, j)).min()
    }

    /// Where the next trip of truck `i` through `o` would sit, if it fits in the shift.
    fn placement(&self, p: &Problem, i: usize, o: &TripOption) -> Option<Placed> {
        let ready = self.ready(p, i, o.j)?;
        let start_load = self.shovels[o.j].earliest_fit(ready, o.load);
        let arrive = start_load + o.load + o.haul;
        let start_unload = self.unloads[o.z].earliest_fit(arrive, o.unload);
        (start_unload + o.unload + o.end <= p.d_work).then_some(Placed { truck: i, option: *o, start_load, start_unload })
    }

    fn bound(&self, p: &Problem) -> u64 {
        let mut ub = self.objective;
        for i in 0..p.trucks.len() {
            if !self.is_open(p, i) {
                continue;
            }
            let Some(ready) = self.earliest_ready(p, i) else { continue };
            let left = p.kmax[i] - self.trucks[i].count;
            let avail = p.d_work.saturating_sub(ready + p.min_end[i]);
            let fits = if p.min_chain[i] > 0 { avail / p.min_chain[i] } else { left };
            ub += left.min(fits) * p.max_tons[i];
        }
        ub
    }

    /// The open truck able to start loading first, lowest index on ties.
    fn branching_truck(&self, p: &Problem) -> Option<usize> {
        (0..p.trucks.len())
            .filter(|&i| self.is_open(p, i))
            .filter_map(|i| self.earliest_ready(p, i).map(|r| (r, i)))
            .min()
            .map(|(_, i)| i)
    }

    /// Feasible next trips of truck `i`, most productive first.
    fn children(&self, p: &Problem, i: usize) -> Vec<Placed> {
        let mut out: Vec<Placed> = p.options[i].iter().filter_map(|o| self.placement(p, i, o)).collect();
        let ready = self.earliest_ready(p, i).unwrap_or(0);
        out.sort_by(|a, b| {
            let rate = |x: &Placed| x.option.tons as f64 / ((x.start_unload + x.option.unload).saturating_sub(ready) + 1) as f64;
            rate(b).total_cmp(&rate(a)).then((a.option.j, a.option.z).cmp(&(b.option.j, b.option.z)))
        });
        out
    }

    fn apply(&mut self, x: &Placed) -> Undo {
        let prev = self.trucks[x.truck];
        let at_shovel = self.shovels[x.option.j].insert(x.start_load, x.option.load);
        let at_unload = self.unloads[x.option.z].insert(x.start_unload, x.option.unload);
        let cursor = &mut self.trucks[x.truck];
        cursor.last = Some((x.option.z, x.start_unload + x.option.unload));
        cursor.count += 1;
        self.objective += x.option.tons;
        self.placed.push(*x);
        Undo { prev, at_shovel, at_unload }
    }

    fn revert(&mut self, x: &Placed, undo: Undo) {
        self.placed.pop();
        self.objective -= x.option.tons;
        self.trucks[x.truck] = undo.prev;
        self.unloads[x.option.z].remove(undo.at_unload);
        self.shovels[x.option.j].remove(undo.at_shovel);
    }
}

struct Undo {
    prev: TruckCursor,
    at_shovel: Option<usize>,
    at_unload: Option<usize>,
}

/// Shared between the parallel root branches.
struct Shared {
    best: AtomicU64,
    has_best: AtomicBool,
    timed_out: AtomicBool,
    deadline: Instant,
    msg: bool,
}

struct Search<'a> {
    p: &'a Problem,
    shared: &'a Shared,
    nodes: u64,
    best: Option<(u64, Vec<Placed>)>,
}

impl<'a> Search<'a> {
    fn out_of_time(&mut self) -> bool {
        self.nodes += 1;
        if self.shared.timed_out.load(Ordering::Relaxed) {
            return true;
        }
        if self.nodes % 256 == 0 && Instant::now() >= self.shared.deadline {
            self.shared.timed_out.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn pruned(&self, state: &State) -> bool {
        let ub = state.bound(self.p);
        if let Some((local, _)) = &self.best {
            if ub <= *local {
                return true;
            }
        }
        // strict, so ties with the shared incumbent are still explored
        self.shared.has_best.load(Ordering::Relaxed) && ub < self.shared.best.load(Ordering::Relaxed)
    }

    fn record(&mut self, state: &State) {
        if self.best.as_ref().is_some_and(|(b, _)| state.objective <= *b) {
            return;
        }
        if self.shared.msg {
            log::info!("exact planner: incumbent {} t after {} nodes", state.objective, self.nodes);
        }
        self.best = Some((state.objective, state.placed.clone()));
        self.shared.best.fetch_max(state.objective, Ordering::Relaxed);
        self.shared.has_best.store(true, Ordering::Relaxed);
    }

    fn dfs(&mut self, state: &mut State) {
        if self.out_of_time() || self.pruned(state) {
            return;
        }
        let Some(i) = state.branching_truck(self.p) else {
            self.record(state);
            return;
        };
        for child in state.children(self.p, i) {
            let undo = state.apply(&child);
            self.dfs(state);
            state.revert(&child, undo);
            if self.shared.timed_out.load(Ordering::Relaxed) {
                return;
            }
        }
        let prev = state.trucks[i];
        state.trucks[i].closed = true;
        self.dfs(state);
        state.trucks[i] = prev;
    }
}

/// Root move: either a first trip for the branching truck, or closing it.
#[derive(Debug, Clone, Copy)]
enum RootMove {
    Place(Placed),
    Close(usize),
}

#[derive(Debug, Clone)]
pub struct ExactSolver {
    pub time_limit: Duration,
    pub workers: usize,
    pub msg: bool,
}

impl ExactSolver {
    pub fn new(config: &SolverConfig) -> Self {
        ExactSolver {
            time_limit: Duration::from_secs(config.time_limit_secs),
            workers: config.workers.max(1),
            msg: config.msg,
        }
    }

    pub fn solve(&self, pd: &InputPlanningData) -> PlanResult {
        let p = Problem::new(pd);
        if self.msg {
            log::info!(
                "exact planner: {} trucks, {} shovels, {} unloads, {} min shift",
                p.trucks.len(),
                p.shovels.len(),
                p.unloads.len(),
                p.d_work
            );
        }
        if p.trucks.is_empty() || p.options.iter().all(Vec::is_empty) {
            return PlanResult::empty(SolveStatus::Infeasible);
        }

        let shared = Shared {
            best: AtomicU64::new(0),
            has_best: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            deadline: Instant::now() + self.time_limit,
            msg: self.msg,
        };
        let root = State::new(&p);
        let moves: Vec<RootMove> = match root.branching_truck(&p) {
            Some(i) => root
                .children(&p, i)
                .into_iter()
                .map(RootMove::Place)
                .chain(std::iter::once(RootMove::Close(i)))
                .collect(),
            None => Vec::new(),
        };
        if moves.is_empty() {
            return self.finish(&p, SolveStatus::Optimal, Some((0, Vec::new())));
        }

        let explore = |m: &RootMove| {
            let mut search = Search { p: &p, shared: &shared, nodes: 0, best: None };
            let mut state = root.clone();
            match m {
                RootMove::Place(x) => {
                    state.apply(x);
                }
                RootMove::Close(i) => state.trucks[*i].closed = true,
            }
            search.dfs(&mut state);
            (search.best, search.nodes)
        };
        let results: Vec<(Option<(u64, Vec<Placed>)>, u64)> = match rayon::ThreadPoolBuilder::new().num_threads(self.workers).build() {
            Ok(pool) => pool.install(|| moves.par_iter().map(explore).collect()),
            Err(e) => {
                log::warn!("exact planner: falling back to the global thread pool ({})", e);
                moves.par_iter().map(explore).collect()
            }
        };

        let nodes: u64 = results.iter().map(|(_, n)| n).sum();
        // highest objective wins, the earliest root branch on ties
        let mut best: Option<(u64, Vec<Placed>)> = None;
        for (found, _) in results {
            if let Some((obj, placed)) = found {
                if best.as_ref().is_none_or(|(b, _)| obj > *b) {
                    best = Some((obj, placed));
                }
            }
        }
        let status = match (shared.timed_out.load(Ordering::Relaxed), best.is_some()) {
            (false, _) => SolveStatus::Optimal,
            (true, true) => SolveStatus::Feasible,
            (true, false) => SolveStatus::NotSolved,
        };
        if self.msg {
            log::info!("exact planner: {} after {} nodes", status, nodes);
        }
        self.finish(&p, status, best)
    }

    fn finish(&self, p: &Problem, status: SolveStatus, best: Option<(u64, Vec<Placed>)>) -> PlanResult {
        let Some((objective, placed)) = best else {
            return PlanResult::empty(status);
        };
        let mut orders = vec![0u32; p.trucks.len()];
        let mut trips: Vec<ScheduledTrip> = placed
            .iter()
            .map(|x| {
                orders[x.truck] += 1;
                ScheduledTrip {
                    truck_id: p.trucks[x.truck],
                    order: orders[x.truck],
                    shovel_id: p.shovels[x.option.j],
                    unload_id: p.unloads[x.option.z],
                    start_load: x.start_load,
                    start_unload: x.start_unload,
                    tons: x.option.tons,
                }
            })
            .collect();
        trips.sort_by_key(|t| (t.truck_id, t.order));
        PlanResult { status, objective, trips }
    }
}
