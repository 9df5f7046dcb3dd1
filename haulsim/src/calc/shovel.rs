use std::f64::consts::PI;

use serde::Serialize;

use crate::calc::whole_seconds;
use crate::props::{ShovelProperties, TruckProperties};

const K_T: f64 = 1.25;
const DRIVER_RATING: f64 = 1.;

/// Working geometry of one bucket cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleGeometry {
    pub dig_depth: f64,
    pub drag_length: f64,
    pub lift_height: f64,
    pub swing_angle: f64,
    pub dump_angle: f64,
    pub idle_fraction: f64,
}

impl Default for CycleGeometry {
    fn default() -> Self {
        CycleGeometry {
            dig_depth: 0.3,
            drag_length: 2.,
            lift_height: 3.,
            swing_angle: PI / 2.,
            dump_angle: PI / 6.,
            idle_fraction: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShovelCycle {
    pub dig: f64,
    pub fill: f64,
    pub lift: f64,
    pub swing: f64,
    pub dump: f64,
    pub ret: f64,
    pub idle: f64,
    pub total: f64,
}

/// Moisture correction, stepped below 30 % and linear up to 50 %.
pub fn moisture_coef(moisture_percent: f64) -> f64 {
    if moisture_percent <= 5. {
        0.8
    } else if moisture_percent <= 15. {
        1.25
    } else if moisture_percent <= 30. {
        1.35
    } else {
        1.5 + 0.5 * ((moisture_percent - 30.) / 20.).clamp(0., 1.)
    }
}

pub fn cycle(props: &ShovelProperties) -> ShovelCycle {
    cycle_with(props, &CycleGeometry::default())
}

pub fn cycle_with(props: &ShovelProperties, g: &CycleGeometry) -> ShovelCycle {
    let k_f = props.bucket_fill_coef;
    let k_r = props.payload_type.resistance();
    let k_w = moisture_coef(props.moisture_percent);
    let (k_i, k_h, k_ret) = (props.inertia_coef, props.hydraulic_coef, props.return_move_coef);

    let dig = g.dig_depth * k_r * k_w / props.bucket_dig_speed * K_T;
    let fill = g.drag_length * k_r * k_w / (props.bucket_fill_speed * k_f) * K_T;
    let lift = g.lift_height / props.bucket_lift_speed * k_i * k_h * K_T;
    let swing = g.swing_angle / props.arm_turn_speed * k_i * k_h * K_T;
    let dump = g.dump_angle / props.arm_turn_speed * k_h * K_T;
    let ret = g.swing_angle / props.arm_turn_speed * k_ret * k_h * K_T;

    let stages = dig + fill + lift + swing + dump + ret;
    let idle = g.idle_fraction * stages / DRIVER_RATING;
    ShovelCycle { dig, fill, lift, swing, dump, ret, idle, total: stages + idle }
}

/// One bucket: its duration and what it adds to (or, cumulatively, what is in) the truck body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadCycle {
    pub secs: u64,
    pub weight: f64,
    pub volume: f64,
}

/// Buckets needed to fill a truck. Stops before the bucket that would overload the body. A
/// bucket heavier than the whole body is still dug once, filled only up to capacity.
pub fn load_cycles(shovel: &ShovelProperties, truck: &TruckProperties) -> Vec<LoadCycle> {
    let secs = whole_seconds(cycle(shovel).total);
    let volume = shovel.bucket_volume * shovel.bucket_fill_coef;
    let weight = volume * shovel.payload_type.density();
    if !(weight > 0.) || !weight.is_finite() || !(truck.body_capacity > 0.) {
        return Vec::new();
    }
    if weight > truck.body_capacity {
        let share = truck.body_capacity / weight;
        return vec![LoadCycle { secs, weight: truck.body_capacity, volume: volume * share }];
    }
    let mut cycles = Vec::new();
    let mut loaded = 0.;
    while loaded + weight <= truck.body_capacity {
        loaded += weight;
        cycles.push(LoadCycle { secs, weight, volume });
    }
    cycles
}

pub fn load_cycles_cumulative(shovel: &ShovelProperties, truck: &TruckProperties) -> Vec<LoadCycle> {
    let (mut weight, mut volume) = (0., 0.);
    load_cycles(shovel, truck)
        .into_iter()
        .map(|c| {
            weight += c.weight;
            volume += c.volume;
            LoadCycle { secs: c.secs, weight, volume }
        })
        .collect()
}

pub fn load_totals(shovel: &ShovelProperties, truck: &TruckProperties) -> LoadCycle {
    load_cycles(shovel, truck).iter().fold(LoadCycle { secs: 0, weight: 0., volume: 0. }, |acc, c| LoadCycle {
        secs: acc.secs + c.secs,
        weight: acc.weight + c.weight,
        volume: acc.volume + c.volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shovel() -> ShovelProperties {
        ShovelProperties::new(12., 1., 0.5, 0.5, 0.5)
    }

    #[test]
    fn moisture_steps() {
        assert_eq!(moisture_coef(5.), 0.8);
        assert_eq!(moisture_coef(10.), 1.25);
        assert_eq!(moisture_coef(30.), 1.35);
        assert_eq!(moisture_coef(40.), 1.75);
        assert_eq!(moisture_coef(90.), 2.);
    }

    #[test]
    fn cycle_total_includes_idle() {
        let c = cycle(&shovel());
        let stages = c.dig + c.fill + c.lift + c.swing + c.dump + c.ret;
        assert!((c.idle - 0.3 * stages).abs() < 1e-9);
        assert!((c.total - 1.3 * stages).abs() < 1e-9);
        // dig = 0.3 * 1.1 * 1.25 / 0.5 * 1.25
        assert!((c.dig - 1.03125).abs() < 1e-9);
    }

    #[test]
    fn load_cycles_never_overload() {
        let s = shovel();
        let truck = TruckProperties::new(90., 40., 30.);
        let cycles = load_cycles_cumulative(&s, &truck);
        // bucket: 12 * 0.8 = 9.6 m3, 15.36 t -> five buckets fit in 90 t
        assert_eq!(cycles.len(), 5);
        let last = cycles.last().unwrap();
        assert!(last.weight <= truck.body_capacity);
        assert!(last.weight + 15.36 > truck.body_capacity);
        let totals = load_totals(&s, &truck);
        assert!((totals.weight - last.weight).abs() < 1e-9);
        assert_eq!(totals.secs, cycles.iter().map(|c| c.secs).sum::<u64>());
    }

    #[test]
    fn oversized_bucket_fills_the_body_once() {
        let truck = TruckProperties::new(10., 40., 30.);
        let cycles = load_cycles(&shovel(), &truck);
        assert_eq!(cycles.len(), 1);
        assert!((cycles[0].weight - 10.).abs() < 1e-9);
        // 15.36 t bucket of 9.6 m3, cut down to 10 t
        assert!((cycles[0].volume - 9.6 * 10. / 15.36).abs() < 1e-9);
        assert!(cycles[0].secs > 0);
        let totals = load_totals(&shovel(), &truck);
        assert!(totals.weight > 0. && totals.secs > 0);
    }

    #[test]
    fn empty_body_takes_no_buckets() {
        let truck = TruckProperties::new(0., 40., 30.);
        assert!(load_cycles(&shovel(), &truck).is_empty());
    }
}
