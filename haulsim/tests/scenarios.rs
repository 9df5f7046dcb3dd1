mod common;

use std::collections::{BTreeMap, BTreeSet};

use haulsim::engine::states::{ShovelState, TruckState};
use haulsim::engine::telemetry::TelemetryRow;
use haulsim::prelude::*;
use serde_json::json;

fn run(options: &SimOptions) -> SimOutput {
    run_simulation(&common::raw(), options).unwrap()
}

fn all_disruptions() -> SimOptions {
    SimOptions::default().with_mode(Mode::Auto).with_solver(SolverKind::Greedy)
}

#[test]
fn baseline_produces_trips() {
    let output = run(&common::baseline());
    let s = &output.summary;
    assert!(s.trips > 0);
    assert_eq!(s.trips as usize, s.trips_table.len());
    assert_eq!(s.trucks_count, 3);
    assert!(s.weight > 0);
    assert_eq!(output.meta["seed"], json!(1));
    // 7200 s of three trucks, two shovels, one dump and one station
    assert_eq!(output.rows().count(), 7200 * 7);
}

#[test]
fn same_seed_same_output() {
    let options = all_disruptions();
    let a = run(&options);
    let b = run(&options);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.events, b.events);
    assert_eq!(a.telemetry, b.telemetry);
}

#[derive(Default)]
struct Tick {
    loading: Vec<String>,
    unloading: Vec<String>,
    shovel_loading: Vec<String>,
    dump_unloading: Vec<String>,
    dump_queue: usize,
}

#[test]
fn capacities_hold_on_every_tick() {
    let output = run_simulation(&common::crowded(8), &all_disruptions()).unwrap();
    let mut ticks: BTreeMap<i64, Tick> = BTreeMap::new();
    for row in output.rows() {
        let tick = ticks.entry(row.timestamp() as i64).or_default();
        match row {
            TelemetryRow::Truck(r) if r.state == TruckState::Loading => tick.loading.push(r.object_name.clone()),
            TelemetryRow::Truck(r) if r.state == TruckState::Unloading => tick.unloading.push(r.object_name.clone()),
            TelemetryRow::Shovel(r) if r.loading_truck != "-" => tick.shovel_loading.push(r.loading_truck.clone()),
            TelemetryRow::Unload(r) => {
                tick.dump_unloading.extend(r.unloading_trucks.iter().cloned());
                tick.dump_queue += r.trucks_queue.len();
            }
            _ => {}
        }
    }
    assert_eq!(ticks.len(), 7200);
    for (ts, tick) in &ticks {
        // every loading truck is the one truck its shovel serves
        for name in &tick.loading {
            assert_eq!(tick.shovel_loading.iter().filter(|n| *n == name).count(), 1, "{} loads without a shovel at {}", name, ts);
        }
        // one bay at the dump
        assert!(tick.unloading.len() <= 1, "{:?} unloading together at {}", tick.unloading, ts);
        assert!(tick.dump_unloading.len() <= 1);
        assert!(tick.unloading.iter().all(|n| tick.dump_unloading.contains(n)), "{:?} unloading off the bay at {}", tick.unloading, ts);
    }
    assert!(ticks.values().any(|t| !t.unloading.is_empty()));
    assert!(ticks.values().any(|t| t.dump_queue > 0), "the dump never had a queue");
}

#[test]
fn timestamps_never_decrease_per_actor() {
    let output = run(&all_disruptions());
    let mut last: BTreeMap<String, f64> = BTreeMap::new();
    for row in output.rows() {
        if let Some(prev) = last.insert(row.object_id().to_string(), row.timestamp()) {
            assert!(row.timestamp() > prev, "{} went back in time", row.object_id());
        }
    }
    assert_eq!(last.len(), 7);
    let events = output.events();
    assert!(events.windows(2).all(|w| w[1].time >= w[0].time));
}

#[test]
fn loads_stay_within_body_capacity() {
    let output = run(&common::baseline());
    for row in output.rows() {
        if let TelemetryRow::Truck(r) = row {
            assert!(r.weight <= 90., "truck {} overloaded: {}", r.object_id, r.weight);
        }
    }
    assert!(output.summary.trips_table.iter().all(|t| t.weight > 0 && t.weight <= 90));
}

#[test]
fn disruptions_come_in_begin_end_pairs() {
    let options = SimOptions { breakdown: false, ..all_disruptions() };
    let output = run(&options);
    let events = output.events();

    // per object and event pair, every begin is closed before the next one opens
    let mut open: BTreeMap<(String, u32), i32> = BTreeMap::new();
    for e in events {
        let pair = (e.event_code + 1) / 2;
        let n = open.entry((e.object_id.clone(), pair)).or_default();
        if e.event_code % 2 == 1 {
            assert_eq!(*n, 0, "{} opened {} twice", e.object_id, e.event_name);
            *n += 1;
        } else {
            assert_eq!(*n, 1, "{} closed {} without opening it", e.object_id, e.event_name);
            *n -= 1;
        }
    }
    assert!(open.values().all(|n| *n == 0));

    let names: BTreeSet<(&str, &str)> = events.iter().map(|e| (e.object_id.as_str(), e.event_name.as_str())).collect();
    assert!(names.contains(&("1_blasting", "blasting_begin")));
    assert!(names.contains(&("1_blasting", "blasting_end")));
    assert!(names.contains(&("1_fuel_station", "refueling_begin")));
    assert!(events.iter().any(|e| e.event_name == "lunch_begin" && e.object_type == "truck"));
    assert!(events.iter().filter(|e| e.object_id == "1_fuel_station").all(|e| e.truck_id.is_some() && e.truck_name.is_some()));
    assert!(!events.iter().any(|e| e.event_name.starts_with("breakdown")));
    assert!(!events.iter().any(|e| e.event_name.starts_with("blasting_idle")));

    let count = |name: &str| events.iter().filter(|e| e.event_name == name).count();
    // one lunch for each of the three trucks, planned idles for shovel 1 and truck 2, one blast
    assert_eq!((count("lunch_begin"), count("lunch_end")), (3, 3));
    assert_eq!((count("planned_idle_begin"), count("planned_idle_end")), (2, 2));
    assert_eq!((count("blasting_begin"), count("blasting_end")), (1, 1));
    let idled: BTreeSet<&str> = events.iter().filter(|e| e.event_name == "planned_idle_begin").map(|e| e.object_id.as_str()).collect();
    assert_eq!(idled, BTreeSet::from(["1_shovel", "2_truck"]));
    assert_eq!(count("refueling_begin"), count("refueling_end"));

    let blast = events.iter().find(|e| e.object_id == "1_blasting").unwrap();
    assert_eq!(blast.object_name, "01-01-2024 09:30:00 - 01-01-2024 09:40:00");
    assert_eq!(blast.object_type, "blasting");
}

#[test]
fn blasted_shovel_idles_only_while_zone_is_active() {
    let options = SimOptions { blasting: true, ..common::baseline() };
    let output = run(&options);
    let start = output.rows().next().unwrap().timestamp();
    let blast = (start + 5400.)..(start + 6000.);
    for row in output.rows() {
        if let TelemetryRow::Shovel(r) = row {
            if r.object_id == "2_shovel" {
                assert_eq!(r.state == ShovelState::BlastingIdle, blast.contains(&r.timestamp), "at {}", r.timestamp);
            } else {
                assert_ne!(r.state, ShovelState::BlastingIdle);
            }
        }
    }
}

#[test]
fn lunch_parks_working_trucks() {
    let options = SimOptions { lunch: true, ..common::baseline() };
    let output = run(&options);
    let start = output.rows().next().unwrap().timestamp();
    let lunch_rows: Vec<f64> = output
        .rows()
        .filter_map(|r| match r {
            TelemetryRow::Truck(t) if t.state == TruckState::Lunch => Some(t.timestamp - start),
            _ => None,
        })
        .collect();
    assert!(!lunch_rows.is_empty());
    assert!(lunch_rows.iter().all(|t| (3600. ..4800.).contains(t)));
}

#[test]
fn breakdowns_never_improve_production() {
    let manual = SimOptions::default().with_mode(Mode::Manual).without_disruptions();
    let broken = SimOptions { breakdown: true, ..manual.clone() };
    for seed in 1..4 {
        let raw = common::raw_with_seed(seed);
        let base = run_simulation(&raw, &manual).unwrap();
        let with = run_simulation(&raw, &broken).unwrap();
        assert!(with.events().iter().any(|e| e.event_name == "breakdown_begin"));
        assert!(with.summary.trips <= base.summary.trips, "seed {}: {} > {}", seed, with.summary.trips, base.summary.trips);
    }
}

#[test]
fn dump_breakdowns_cut_production() {
    let manual = SimOptions::default().with_mode(Mode::Manual).without_disruptions();
    let broken = SimOptions { breakdown: true, ..manual.clone() };
    for seed in 1..4 {
        let raw = common::fragile_dump(seed);
        let base = run_simulation(&raw, &manual).unwrap();
        let with = run_simulation(&raw, &broken).unwrap();
        let dump_failures = with.events().iter().filter(|e| e.object_id == "1_unload" && e.event_name == "breakdown_begin").count();
        assert!(dump_failures > 0, "seed {}: the dump never failed", seed);
        assert!(with.summary.trips < base.summary.trips, "seed {}: {} trips with breakdowns, {} without", seed, with.summary.trips, base.summary.trips);
        assert!(with.summary.weight < base.summary.weight);
    }
}

#[test]
fn manual_trail_serves_only_its_pair() {
    let options = SimOptions::default().with_mode(Mode::Manual).without_disruptions();
    let output = run(&options);
    assert!(output.summary.trips > 0);
    assert!(output.summary.trips_table.iter().all(|t| t.shovel_id == Some(1) && t.unload_id == Some(1)));
}

#[test]
fn exact_plan_uses_known_objects() {
    let options = SimOptions { time_limit: 2, ..common::baseline().with_solver(SolverKind::Cbc) };
    let output = run(&options);
    assert!(output.summary.trips > 0);
    for trip in &output.summary.trips_table {
        assert!((1..=3).contains(&trip.truck_id));
        assert!(matches!(trip.shovel_id, Some(1 | 2)));
        assert_eq!(trip.unload_id, Some(1));
    }
}

#[test]
fn telemetry_field_sets() {
    let output = run(&common::baseline());
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in common::telemetry_json(&output).into_iter().take(7) {
        let obj = row.as_object().unwrap();
        let mut keys: Vec<String> = obj.keys().cloned().collect();
        keys.sort();
        seen.insert(obj["object_type"].as_str().unwrap().to_string(), keys);
    }
    let expect = |keys: &[&str]| -> Vec<String> {
        let mut v: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        v.sort();
        v
    };
    assert_eq!(seen["truck"], expect(&["object_id", "object_name", "object_type", "lat", "lon", "speed", "weight", "fuel", "state", "timestamp"]));
    assert_eq!(seen["shovel"], expect(&["object_id", "object_name", "object_type", "lat", "lon", "state", "timestamp", "loading_truck", "trucks_queue"]));
    assert_eq!(seen["unload"], expect(&["object_id", "object_type", "timestamp", "unloading_trucks", "trucks_queue", "state"]));
    assert_eq!(seen["fuel_station"], expect(&["object_id", "object_type", "timestamp", "refuelling_trucks", "trucks_queue", "state"]));
}

#[test]
fn batch_writer_groups_minutes() {
    let output = run_simulation_with(&common::raw(), &common::baseline(), WriterKind::Batch).unwrap();
    assert!(output.telemetry.is_none());
    let batches = output.batches.as_ref().unwrap();
    assert_eq!(batches.len(), 120);
    assert!(batches.values().all(|b| b.frames.len() == 60 * 7));
    assert_eq!(output.meta["total_frames"], json!(7200 * 7));
    assert_eq!(output.meta["batch_size_seconds"], json!(60));
    assert_eq!(output.meta["seed"], json!(1));
}

#[test]
fn outputs_write_to_disk() {
    let output = run(&common::baseline());
    let dir = tempfile::tempdir().unwrap();
    output.write_csv(dir.path()).unwrap();
    let telemetry = std::fs::read_to_string(dir.path().join("telemetry.csv")).unwrap();
    assert_eq!(telemetry.lines().count(), 7200 * 7 + 1);

    let path = dir.path().join("result.json");
    std::fs::write(&path, serde_json::to_string(&output).unwrap()).unwrap();
    let back: SimOutput = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(back.summary.trips, output.summary.trips);
    assert_eq!(back.meta, output.meta);
}
