use serde::Serialize;

use crate::props::{TruckProperties, UnloadProperties};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnloadCycle {
    pub drive: f64,
    pub stop: f64,
    pub lift: f64,
    pub dump: f64,
    pub down: f64,
    pub leave: f64,
    pub total: f64,
}

struct Overheads {
    drive: f64,
    stop: f64,
    lift: f64,
    down: f64,
    k_temp: f64,
}

fn angle_coef(angle: f64) -> f64 {
    1. + 0.01 * (angle - 25.).max(0.)
}

fn compute(props: &UnloadProperties, volume: f64, o: Overheads) -> UnloadCycle {
    let speed = props.unload_type.unloading_speed();
    let k_mat = props.payload_type.resistance();
    let dump = volume / (speed * angle_coef(props.angle) * k_mat * o.k_temp);
    let leave = o.drive;
    UnloadCycle {
        drive: o.drive,
        stop: o.stop,
        lift: o.lift,
        dump,
        down: o.down,
        leave,
        total: o.drive + o.stop + o.lift + dump + o.down + leave,
    }
}

/// Unload time for the volume actually in the body. Used by the engine.
pub fn cycle(props: &UnloadProperties, truck_volume: f64) -> UnloadCycle {
    compute(props, truck_volume, Overheads { drive: 30., stop: 0., lift: 10., down: 10., k_temp: 1.25 })
}

/// Normative unload time for a full body. Used by the planners.
pub fn cycle_by_norm(props: &UnloadProperties, truck: &TruckProperties) -> UnloadCycle {
    let volume = truck.body_capacity / props.payload_type.density();
    compute(props, volume, Overheads { drive: 30., stop: 15., lift: 20., down: 15., k_temp: 1. })
}
