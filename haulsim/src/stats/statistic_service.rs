//! Per-tick state observations folded into the duration samples the trucks-needed estimator
//! reads.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::calc::trucks_needed::{self, EstimatorInputs};
use crate::engine::states::{ShovelState, TruckState, UnloadState};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShovelTotals {
    pub repairs: f64,
    pub planned_idles: f64,
    pub blast_waiting: f64,
    pub lunches: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShovelStatistics {
    pub load_durations: Vec<f64>,
    pub truck_arrival_waiting: Vec<f64>,
    pub totals: ShovelTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TruckStatistics {
    pub moving_loaded: Vec<f64>,
    pub moving_empty: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnloadStatistics {
    pub unload_durations: Vec<f64>,
    pub truck_arrival_waiting: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Tracking<S> {
    state: S,
    duration: f64,
    current_truck: Option<u32>,
}

impl<S> Tracking<S> {
    fn new(state: S) -> Self {
        Tracking { state, duration: 0., current_truck: None }
    }

    fn flush(&mut self, into: &mut Vec<f64>) {
        into.push(self.duration);
        self.duration = 0.;
    }
}

/// The truck a shovel or unload is serving, as seen on this tick.
pub type Served = Option<(u32, TruckState)>;

#[derive(Debug, Clone, Default)]
pub struct StatisticService {
    pub shovel: ShovelStatistics,
    pub truck: TruckStatistics,
    pub unload: UnloadStatistics,
    shovels: BTreeMap<u32, Tracking<ShovelState>>,
    trucks: BTreeMap<u32, Tracking<TruckState>>,
    unloads: BTreeMap<u32, Tracking<UnloadState>>,
}

impl StatisticService {
    pub fn new() -> Self {
        StatisticService::default()
    }

    pub fn observe_truck(&mut self, id: u32, state: TruckState, duration: f64) {
        let stats = &mut self.truck;
        let t = self.trucks.entry(id).or_insert_with(|| Tracking::new(state));
        if t.state != state {
            match t.state {
                TruckState::MovingEmpty => t.flush(&mut stats.moving_empty),
                TruckState::MovingLoaded => t.flush(&mut stats.moving_loaded),
                _ => {}
            }
        }
        if state.is_moving() {
            t.duration += duration;
        }
        t.state = state;
    }

    pub fn observe_shovel(&mut self, id: u32, state: ShovelState, duration: f64, loading: Served) {
        let stats = &mut self.shovel;
        let truck_id = loading.map(|(id, _)| id);
        let t = self.shovels.entry(id).or_insert_with(|| Tracking { current_truck: truck_id, ..Tracking::new(state) });

        if t.state != state {
            match t.state {
                ShovelState::Waiting => t.flush(&mut stats.truck_arrival_waiting),
                // a breakdown mid-load keeps the load open while the truck stays under the bucket
                ShovelState::Loading if state != ShovelState::Repair || truck_id.is_none() => {
                    t.flush(&mut stats.load_durations);
                    t.current_truck = None;
                }
                _ => {}
            }
            match state {
                ShovelState::Waiting => t.duration += duration,
                ShovelState::Loading => {
                    t.duration += duration;
                    t.current_truck = truck_id;
                }
                _ => {}
            }
        } else if state == ShovelState::Loading {
            if t.current_truck.is_some() && t.current_truck != truck_id {
                t.flush(&mut stats.load_durations);
                t.current_truck = truck_id;
            }
            if matches!(loading, Some((_, TruckState::Loading))) {
                t.duration += duration;
                t.current_truck = truck_id;
            }
        } else if state == ShovelState::Waiting {
            t.duration += duration;
        }

        match state {
            ShovelState::Repair => stats.totals.repairs += duration,
            ShovelState::BlastingIdle => stats.totals.blast_waiting += duration,
            ShovelState::PlannedIdle => stats.totals.planned_idles += duration,
            _ => {}
        }
        t.state = state;
    }

    pub fn observe_unload(&mut self, id: u32, state: UnloadState, duration: f64, unloading: Served) {
        let stats = &mut self.unload;
        let truck_id = unloading.map(|(id, _)| id);
        let t = self.unloads.entry(id).or_insert_with(|| Tracking { current_truck: truck_id, ..Tracking::new(state) });

        if t.state != state && t.state == UnloadState::Open && t.current_truck.is_none() {
            t.flush(&mut stats.truck_arrival_waiting);
        }
        if state == UnloadState::Open {
            match (t.current_truck, truck_id) {
                (None, Some(_)) => t.flush(&mut stats.truck_arrival_waiting),
                (Some(current), _) if Some(current) != truck_id => t.flush(&mut stats.unload_durations),
                _ => {}
            }
            match unloading {
                None => {
                    t.duration += duration;
                    t.current_truck = None;
                }
                Some((truck, TruckState::Unloading)) => {
                    t.duration += duration;
                    t.current_truck = Some(truck);
                }
                Some(_) => {}
            }
        }
        t.state = state;
    }

    /// Fleet size estimate from everything observed so far, or `None` when the statistics
    /// cannot support one.
    pub fn trucks_needed(
        &mut self,
        target_shovel_load: f64,
        duration_secs: f64,
        lunch_secs: f64,
        shovels: usize,
        unloads: usize,
    ) -> Option<f64> {
        self.shovel.totals.lunches = lunch_secs * shovels as f64;
        let inputs = EstimatorInputs {
            target_shovel_utilisation: target_shovel_load,
            duration: duration_secs,
            shovels,
            unloads,
            mean_load: mean(&self.shovel.load_durations),
            var_load: variance(&self.shovel.load_durations),
            mean_unload: mean(&self.unload.unload_durations),
            var_unload: variance(&self.unload.unload_durations),
            mean_moving_loaded: mean(&self.truck.moving_loaded),
            mean_moving_empty: mean(&self.truck.moving_empty),
            mean_shovel_wait: mean(&self.shovel.truck_arrival_waiting),
            var_shovel_wait: variance(&self.shovel.truck_arrival_waiting),
            mean_unload_wait: mean(&self.unload.truck_arrival_waiting),
            var_unload_wait: variance(&self.unload.truck_arrival_waiting),
            shovel_repair: self.shovel.totals.repairs,
            shovel_planned_idle: self.shovel.totals.planned_idles,
            shovel_blast_wait: self.shovel.totals.blast_waiting,
            shovel_lunch: self.shovel.totals.lunches,
        };
        log::debug!("trucks needed inputs: {:?}", inputs);
        match trucks_needed::estimate(&inputs) {
            Ok(e) if e.trucks.is_finite() => Some(e.trucks),
            Ok(e) => {
                log::error!("trucks needed is not finite: {}", e.trucks);
                None
            }
            Err(e) => {
                log::error!("trucks needed could not be estimated: {}", e);
                None
            }
        }
    }
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Sample variance with Bessel's correction.
pub fn variance(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs)?;
    Some(xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moments() {
        assert_eq!(mean(&[]), None);
        assert_eq!(variance(&[3.]), None);
        assert_eq!(mean(&[1., 2., 3.]), Some(2.));
        assert_eq!(variance(&[1., 2., 3.]), Some(1.));
    }

    #[test]
    fn truck_spans_flush_on_exit() {
        let mut s = StatisticService::new();
        for _ in 0..3 {
            s.observe_truck(1, TruckState::MovingEmpty, 1.);
        }
        s.observe_truck(1, TruckState::Waiting, 1.);
        for _ in 0..2 {
            s.observe_truck(1, TruckState::MovingLoaded, 1.);
        }
        s.observe_truck(1, TruckState::Unloading, 1.);
        assert_eq!(s.truck.moving_empty, vec![3.]);
        assert_eq!(s.truck.moving_loaded, vec![2.]);
    }

    #[test]
    fn shovel_load_counts_loading_seconds_only() {
        let mut s = StatisticService::new();
        s.observe_shovel(1, ShovelState::Waiting, 1., None);
        s.observe_shovel(1, ShovelState::Waiting, 1., None);
        s.observe_shovel(1, ShovelState::Loading, 1., Some((7, TruckState::Waiting)));
        s.observe_shovel(1, ShovelState::Loading, 1., Some((7, TruckState::Loading)));
        s.observe_shovel(1, ShovelState::Loading, 1., Some((7, TruckState::Idle)));
        s.observe_shovel(1, ShovelState::Loading, 1., Some((7, TruckState::Loading)));
        s.observe_shovel(1, ShovelState::Waiting, 1., None);
        assert_eq!(s.shovel.truck_arrival_waiting, vec![2.]);
        assert_eq!(s.shovel.load_durations, vec![3.]);
    }

    #[test]
    fn shovel_repair_keeps_load_open() {
        let mut s = StatisticService::new();
        s.observe_shovel(1, ShovelState::Loading, 1., Some((2, TruckState::Loading)));
        s.observe_shovel(1, ShovelState::Repair, 1., Some((2, TruckState::Idle)));
        s.observe_shovel(1, ShovelState::Repair, 1., Some((2, TruckState::Idle)));
        assert!(s.shovel.load_durations.is_empty());
        assert_eq!(s.shovel.totals.repairs, 2.);
        s.observe_shovel(1, ShovelState::Loading, 1., Some((2, TruckState::Loading)));
        s.observe_shovel(1, ShovelState::Loading, 1., Some((3, TruckState::Loading)));
        assert_eq!(s.shovel.load_durations, vec![2.]);
    }

    #[test]
    fn unload_waiting_then_unloading() {
        let mut s = StatisticService::new();
        s.observe_unload(1, UnloadState::Open, 1., None);
        s.observe_unload(1, UnloadState::Open, 1., None);
        s.observe_unload(1, UnloadState::Open, 1., Some((4, TruckState::Unloading)));
        s.observe_unload(1, UnloadState::Open, 1., Some((4, TruckState::Unloading)));
        s.observe_unload(1, UnloadState::Open, 1., None);
        assert_eq!(s.unload.truck_arrival_waiting, vec![2.]);
        assert_eq!(s.unload.unload_durations, vec![2.]);
    }

    #[test]
    fn no_statistics_no_estimate() {
        let mut s = StatisticService::new();
        assert_eq!(s.trucks_needed(0.9, 3600., 0., 1, 1), None);
    }
}
