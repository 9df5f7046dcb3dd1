#![allow(dead_code)]

use haulsim::prelude::*;
use serde_json::{Value, json};

/// Two hours at a small pit: three trucks, two shovels, one single-bay dump, one fuel station
/// and a garage that serves every idle purpose. Lunch runs 09:00-09:20, shovel 1 and truck 2
/// have planned idles, and a blast covers shovel 2 from 09:30 to 09:40.
pub fn scenario() -> Value {
    let truck = |id: u32, name: &str| {
        json!({
            "id": id, "name": name, "initial_lat": 0.0, "initial_lon": 0.0,
            "body_capacity": 90.0, "speed_empty": 40.0, "speed_loaded": 30.0,
            "fuel_capacity": 1000.0, "fuel_threshold_critical": 100.0, "fuel_threshold_planned": 300.0,
            "fuel_level": 320.0, "fuel_idle_lph": 36.0, "fuel_specific_consumption": 200.0,
            "fuel_density": 0.8, "engine_power_kw": 720.0
        })
    };
    let shovel = |id: u32, name: &str, lat: f64, lon: f64| {
        json!({
            "id": id, "name": name, "initial_lat": lat, "initial_lon": lon,
            "bucket_volume": 12.0, "bucket_lift_speed": 1.0, "arm_turn_speed": 0.5,
            "bucket_dig_speed": 0.5, "bucket_fill_speed": 0.5
        })
    };
    json!({
        "start_time": "2024-01-01T08:00:00Z",
        "end_time": "2024-01-01T10:00:00Z",
        "seed": 1,
        "quarry": {
            "utc_offset_minutes": 0,
            "lunch_break_offset": 60,
            "lunch_break_duration": 20,
            "shift_config": [{"begin_offset": 480}],
            "road_net": {
                "vertices": [
                    {"id": 1, "lat": 0.0, "lon": 0.0},
                    {"id": 2, "lat": 0.0, "lon": 0.005},
                    {"id": 3, "lat": 0.0, "lon": 0.01},
                    {"id": 4, "lat": 0.005, "lon": 0.005},
                    {"id": 5, "lat": 0.0, "lon": 0.02},
                    {"id": 6, "lat": -0.003, "lon": 0.005}
                ],
                "edges": [
                    {"from": 1, "to": 2},
                    {"from": 2, "to": 3},
                    {"from": 2, "to": 4},
                    {"from": 3, "to": 5},
                    {"from": 4, "to": 5},
                    {"from": 2, "to": 6}
                ],
                "objects": [
                    {"type": "idle_area", "id": 1, "vertex": 1},
                    {"type": "shovel", "id": 1, "vertex": 3},
                    {"type": "shovel", "id": 2, "vertex": 4},
                    {"type": "unload", "id": 1, "vertex": 5},
                    {"type": "fuel_station", "id": 1, "vertex": 6}
                ]
            },
            "truck_list": [truck(1, "TR-1"), truck(2, "TR-2"), truck(3, "TR-3")],
            "shovel_list": [shovel(1, "EX-1", 0.0, 0.01), shovel(2, "EX-2", 0.005, 0.005)],
            "unload_list": [{
                "id": 1, "name": "DUMP-1", "initial_lat": 0.0, "initial_lon": 0.02,
                "angle": 30.0, "unload_type": "hydraulic", "trucks_at_once": 1
            }],
            "fuel_station_list": [{
                "id": 1, "name": "FS-1", "num_pumps": 1, "flow_rate": 10.0,
                "initial_lat": -0.003, "initial_lon": 0.005
            }],
            "idle_area_list": [{
                "id": 1, "name": "Garage", "initial_lat": 0.0, "initial_lon": 0.0,
                "is_shift_change_area": true, "is_lunch_area": true,
                "is_repair_area": true, "is_blast_waiting_area": true
            }],
            "trail_list": [{
                "id": 1, "shovel_id": 1, "unload_id": 1,
                "segments": [{"start": [0.0, 0.01], "end": [0.0, 0.02]}],
                "trucks": [{"id": 1}, {"id": 2}, {"id": 3}]
            }],
            "schedules": {
                "planned_idle": [
                    {"id": 1, "vehicle_type": "shovel", "vehicle_id": 1, "quarry_id": 1,
                     "start_time": "2024-01-01T08:30:00Z", "end_time": "2024-01-01T08:40:00Z"},
                    {"id": 2, "vehicle_type": "truck", "vehicle_id": 2, "quarry_id": 1,
                     "start_time": "2024-01-01T08:45:00Z", "end_time": "2024-01-01T08:55:00Z"}
                ],
                "blasting": [{
                    "id": 1,
                    "start_time": "2024-01-01T09:30:00Z",
                    "end_time": "2024-01-01T09:40:00Z",
                    "geojson_data": {"features": [{"geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.004, 0.004], [0.006, 0.004], [0.006, 0.006], [0.004, 0.006], [0.004, 0.004]]]
                    }}]}
                }]
            }
        }
    })
}

pub fn raw() -> String {
    scenario().to_string()
}

pub fn raw_with_seed(seed: u64) -> String {
    let mut s = scenario();
    s["seed"] = json!(seed);
    s.to_string()
}

/// The same pit with `n` identical trucks, enough to keep a queue at the single dump bay.
pub fn crowded(n: u32) -> String {
    let mut s = scenario();
    let first = s["quarry"]["truck_list"][0].clone();
    let trucks: Vec<Value> = (1..=n)
        .map(|id| {
            let mut t = first.clone();
            t["id"] = json!(id);
            t["name"] = json!(format!("TR-{}", id));
            t
        })
        .collect();
    s["quarry"]["truck_list"] = Value::Array(trucks);
    s.to_string()
}

/// A dump that fails after a few minutes of tipping and takes half an hour to repair.
pub fn fragile_dump(seed: u64) -> String {
    let mut s = scenario();
    s["seed"] = json!(seed);
    let dump = &mut s["quarry"]["unload_list"][0];
    dump["initial_operating_time"] = json!(1.0);
    dump["initial_failure_count"] = json!(20.0);
    dump["average_repair_duration"] = json!(30.0);
    s.to_string()
}

/// Auto, greedy, no disruptions.
pub fn baseline() -> SimOptions {
    SimOptions::default().with_mode(Mode::Auto).with_solver(SolverKind::Greedy).without_disruptions()
}

pub fn telemetry_json(output: &SimOutput) -> Vec<Value> {
    output.rows().map(|r| serde_json::to_value(r).unwrap()).collect()
}
