//! Builds [`SimData`] from the raw scenario document.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::InputError;
use crate::geometry::{Point, Polygon};
use crate::props::{
    Blasting, FuelStation, FuelStationProperties, IdleArea, IdleAreaStorage, ObjectKind, ObjectRef, PayloadType,
    ReliabilityInputs, Shovel, ShovelProperties, SimData, TimeWindow, TrailRoute, Truck, TruckProperties, Unload,
    UnloadProperties, UnloadType,
};
use crate::routing::GraphRoadNet;

type Obj = Map<String, Value>;

/// Lunch starts closer than this are the same break seen from two shift days.
const LUNCH_DEDUP_SECS: i64 = 60;

fn field<'a>(obj: &'a Obj, key: &str, path: &str) -> Result<&'a Value, InputError> {
    match obj.get(key) {
        Some(Value::Null) | None => Err(InputError::missing(format!("{}{}", path, key))),
        Some(v) => Ok(v),
    }
}

fn as_obj<'a>(v: &'a Value, path: &str) -> Result<&'a Obj, InputError> {
    v.as_object().ok_or_else(|| InputError::invalid(path, "expected an object"))
}

fn req_f64(obj: &Obj, key: &str, path: &str) -> Result<f64, InputError> {
    let v = field(obj, key, path)?;
    v.as_f64().ok_or_else(|| InputError::invalid(format!("{}{}", path, key), format!("expected a number, got {}", v)))
}

fn opt_f64(obj: &Obj, key: &str, path: &str, default: f64) -> Result<f64, InputError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => req_f64(obj, key, path),
    }
}

fn req_u32(obj: &Obj, key: &str, path: &str) -> Result<u32, InputError> {
    let v = field(obj, key, path)?;
    v.as_u64()
        .and_then(|x| u32::try_from(x).ok())
        .ok_or_else(|| InputError::invalid(format!("{}{}", path, key), format!("expected a non-negative integer, got {}", v)))
}

fn req_str<'a>(obj: &'a Obj, key: &str, path: &str) -> Result<&'a str, InputError> {
    let v = field(obj, key, path)?;
    v.as_str().ok_or_else(|| InputError::invalid(format!("{}{}", path, key), "expected a string"))
}

fn req_bool(obj: &Obj, key: &str, path: &str) -> Result<bool, InputError> {
    let v = field(obj, key, path)?;
    v.as_bool().ok_or_else(|| InputError::invalid(format!("{}{}", path, key), "expected a boolean"))
}

fn parse_enum<T: std::str::FromStr>(obj: &Obj, key: &str, path: &str, default: Option<T>) -> Result<T, InputError> {
    match (obj.get(key), default) {
        (None | Some(Value::Null), Some(d)) => Ok(d),
        _ => {
            let raw = req_str(obj, key, path)?;
            raw.parse::<T>().map_err(|_| InputError::invalid(format!("{}{}", path, key), format!("unknown value '{}'", raw)))
        }
    }
}

fn list<'a>(obj: &'a Obj, key: &str) -> &'a [Value] {
    obj.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

pub fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>, InputError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| Utc.from_utc_datetime(&t))
        .map_err(|e| InputError::invalid(field, e.to_string()))
}

fn req_time(obj: &Obj, key: &str, path: &str) -> Result<DateTime<Utc>, InputError> {
    parse_time(req_str(obj, key, path)?, &format!("{}{}", path, key))
}

fn position(obj: &Obj, path: &str) -> Result<Point, InputError> {
    Ok(Point::new(req_f64(obj, "initial_lat", path)?, req_f64(obj, "initial_lon", path)?))
}

fn reliability(obj: &Obj, path: &str, defaults: ReliabilityInputs) -> Result<ReliabilityInputs, InputError> {
    Ok(ReliabilityInputs {
        initial_operating_time: opt_f64(obj, "initial_operating_time", path, defaults.initial_operating_time)?,
        average_repair_duration: opt_f64(obj, "average_repair_duration", path, defaults.average_repair_duration)?,
        initial_failure_count: opt_f64(obj, "initial_failure_count", path, defaults.initial_failure_count)?,
    })
}

fn shovel(raw: &Value, path: &str) -> Result<Shovel, InputError> {
    let o = as_obj(raw, path)?;
    let d = ShovelProperties::new(
        req_f64(o, "bucket_volume", path)?,
        req_f64(o, "bucket_lift_speed", path)?,
        req_f64(o, "arm_turn_speed", path)?,
        req_f64(o, "bucket_dig_speed", path)?,
        req_f64(o, "bucket_fill_speed", path)?,
    );
    let properties = ShovelProperties {
        bucket_fill_coef: opt_f64(o, "bucket_fill_coef", path, d.bucket_fill_coef)?,
        hydraulic_coef: opt_f64(o, "hydraulic_coef", path, d.hydraulic_coef)?,
        inertia_coef: opt_f64(o, "inertia_coef", path, d.inertia_coef)?,
        return_move_coef: opt_f64(o, "return_move_coef", path, d.return_move_coef)?,
        payload_type: parse_enum(o, "payload_type", path, Some(d.payload_type))?,
        moisture_percent: opt_f64(o, "moisture_percent", path, d.moisture_percent)?,
        reliability: reliability(o, path, ReliabilityInputs::SHOVEL)?,
        ..d
    };
    for (name, v) in [
        ("bucket_lift_speed", properties.bucket_lift_speed),
        ("arm_turn_speed", properties.arm_turn_speed),
        ("bucket_dig_speed", properties.bucket_dig_speed),
        ("bucket_fill_speed", properties.bucket_fill_speed),
    ] {
        if !(v > 0.) {
            return Err(InputError::invalid(format!("{}{}", path, name), "must be positive"));
        }
    }
    Ok(Shovel {
        id: req_u32(o, "id", path)?,
        name: req_str(o, "name", path)?.to_string(),
        position: position(o, path)?,
        properties,
    })
}

fn truck(raw: &Value, path: &str) -> Result<Truck, InputError> {
    let o = as_obj(raw, path)?;
    let d = TruckProperties::new(
        req_f64(o, "body_capacity", path)?,
        req_f64(o, "speed_empty", path)?,
        req_f64(o, "speed_loaded", path)?,
    );
    let properties = TruckProperties {
        acceleration_empty: opt_f64(o, "acceleration_empty", path, d.acceleration_empty)?,
        acceleration_loaded: opt_f64(o, "acceleration_loaded", path, d.acceleration_loaded)?,
        driver_skill: opt_f64(o, "driver_skill", path, d.driver_skill)?,
        fuel_capacity: req_f64(o, "fuel_capacity", path)?,
        fuel_threshold_critical: req_f64(o, "fuel_threshold_critical", path)?,
        fuel_threshold_planned: req_f64(o, "fuel_threshold_planned", path)?,
        fuel_level: req_f64(o, "fuel_level", path)?,
        fuel_idle_lph: req_f64(o, "fuel_idle_lph", path)?,
        fuel_specific_consumption: req_f64(o, "fuel_specific_consumption", path)?,
        fuel_density: req_f64(o, "fuel_density", path)?,
        engine_power_kw: req_f64(o, "engine_power_kw", path)?,
        reliability: reliability(o, path, ReliabilityInputs::TRUCK)?,
        ..d
    };
    for (name, v) in [
        ("speed_empty", properties.speed_empty),
        ("speed_loaded", properties.speed_loaded),
        ("acceleration_empty", properties.acceleration_empty),
        ("acceleration_loaded", properties.acceleration_loaded),
        ("fuel_density", properties.fuel_density),
    ] {
        if !(v > 0.) {
            return Err(InputError::invalid(format!("{}{}", path, name), "must be positive"));
        }
    }
    let edge = match o.get("initial_edge") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or_else(|| InputError::invalid(format!("{}initial_edge", path), "expected an edge index"))? as usize),
    };
    Ok(Truck {
        id: req_u32(o, "id", path)?,
        name: req_str(o, "name", path)?.to_string(),
        position: position(o, path)?,
        edge,
        properties,
    })
}

fn unload(raw: &Value, path: &str) -> Result<Unload, InputError> {
    let o = as_obj(raw, path)?;
    let d = UnloadProperties::new(req_f64(o, "angle", path)?, parse_enum::<UnloadType>(o, "unload_type", path, None)?);
    let trucks_at_once = match o.get("trucks_at_once") {
        None | Some(Value::Null) => d.trucks_at_once,
        Some(_) => req_u32(o, "trucks_at_once", path)?.max(1) as usize,
    };
    Ok(Unload {
        id: req_u32(o, "id", path)?,
        name: req_str(o, "name", path)?.to_string(),
        position: position(o, path)?,
        properties: UnloadProperties {
            payload_type: parse_enum::<PayloadType>(o, "payload_type", path, Some(d.payload_type))?,
            trucks_at_once,
            reliability: reliability(o, path, ReliabilityInputs::UNLOAD)?,
            ..d
        },
    })
}

fn fuel_station(raw: &Value, path: &str) -> Result<FuelStation, InputError> {
    let o = as_obj(raw, path)?;
    let flow_rate = req_f64(o, "flow_rate", path)?;
    if !(flow_rate > 0.) {
        return Err(InputError::invalid(format!("{}flow_rate", path), "must be positive"));
    }
    Ok(FuelStation {
        id: req_u32(o, "id", path)?,
        name: req_str(o, "name", path)?.to_string(),
        position: position(o, path)?,
        properties: FuelStationProperties {
            num_pumps: req_u32(o, "num_pumps", path)?.max(1) as usize,
            flow_rate,
        },
    })
}

fn idle_area(raw: &Value, path: &str) -> Result<IdleArea, InputError> {
    let o = as_obj(raw, path)?;
    Ok(IdleArea {
        id: req_u32(o, "id", path)?,
        name: req_str(o, "name", path)?.to_string(),
        position: position(o, path)?,
        is_shift_change_area: req_bool(o, "is_shift_change_area", path)?,
        is_lunch_area: req_bool(o, "is_lunch_area", path)?,
        is_planned_idle_area: req_bool(o, "is_repair_area", path)?,
        is_blast_waiting_area: req_bool(o, "is_blast_waiting_area", path)?,
    })
}

fn trail(raw: &Value, path: &str) -> Result<TrailRoute, InputError> {
    let o = as_obj(raw, path)?;
    let mut truck_ids = Vec::new();
    for t in list(o, "trucks") {
        let id = match t {
            Value::Object(inner) => req_u32(inner, "id", &format!("{}trucks.", path))?,
            other => other
                .as_u64()
                .and_then(|x| u32::try_from(x).ok())
                .ok_or_else(|| InputError::invalid(format!("{}trucks", path), "expected truck ids"))?,
        };
        truck_ids.push(id);
    }
    Ok(TrailRoute {
        id: req_u32(o, "id", path)?,
        shovel_id: req_u32(o, "shovel_id", path)?,
        unload_id: req_u32(o, "unload_id", path)?,
        truck_ids,
    })
}

/// Lunch breaks for every shift of every local day touching the run, clipped to the run and
/// de-duplicated.
pub fn lunch_breaks(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    utc_offset_minutes: i32,
    shift_begin_offsets: &[i64],
    lunch_offset_min: i64,
    lunch_duration_min: i64,
) -> Vec<TimeWindow> {
    let offset = Duration::minutes(utc_offset_minutes as i64);
    let local_midnight = |t: DateTime<Utc>| {
        let local = (t + offset).date_naive();
        local.and_hms_opt(0, 0, 0).map(|m| Utc.from_utc_datetime(&m) - offset)
    };
    let (Some(first_day), Some(last_day)) = (local_midnight(start - Duration::days(1)), local_midnight(end)) else {
        return Vec::new();
    };

    let mut breaks: Vec<TimeWindow> = Vec::new();
    let mut day = first_day;
    while day <= last_day {
        for begin in shift_begin_offsets {
            let lunch_start = day + Duration::minutes(begin + lunch_offset_min);
            let lunch_end = lunch_start + Duration::minutes(lunch_duration_min);
            if lunch_end > start && lunch_start < end {
                let s = lunch_start.max(start);
                let e = lunch_end.min(end);
                if s < e && !breaks.iter().any(|b| (b.start - s).num_seconds().abs() < LUNCH_DEDUP_SECS) {
                    breaks.push(TimeWindow { start: s, end: e });
                }
            }
        }
        day += Duration::days(1);
    }
    breaks.sort();
    breaks
}

fn planned_idles(entries: &[Value]) -> Result<BTreeMap<ObjectRef, Vec<TimeWindow>>, InputError> {
    let mut result: BTreeMap<ObjectRef, Vec<TimeWindow>> = BTreeMap::new();
    for (i, raw) in entries.iter().enumerate() {
        let path = format!("schedules.planned_idle[{}].", i);
        let o = as_obj(raw, &path)?;
        let kind = parse_enum::<ObjectKind>(o, "vehicle_type", &path, None)?;
        let id = req_u32(o, "vehicle_id", &path)?;
        let window = TimeWindow { start: req_time(o, "start_time", &path)?, end: req_time(o, "end_time", &path)? };
        result.entry(ObjectRef::new(kind, id)).or_default().push(window);
    }
    for windows in result.values_mut() {
        windows.sort();
    }
    Ok(result)
}

fn blastings(entries: &[Value]) -> Result<Vec<Blasting>, InputError> {
    let mut result = Vec::new();
    for (i, raw) in entries.iter().enumerate() {
        let path = format!("schedules.blasting[{}].", i);
        let o = as_obj(raw, &path)?;
        let geo = as_obj(field(o, "geojson_data", &path)?, &path)?;
        let mut zones = Vec::new();
        for feature in list(geo, "features") {
            let geometry = feature.get("geometry");
            if geometry.and_then(|g| g.get("type")).and_then(Value::as_str) != Some("Polygon") {
                continue;
            }
            let ring = geometry.and_then(|g| g.get("coordinates")).and_then(|c| c.get(0)).cloned().unwrap_or(Value::Null);
            let coords: Vec<[f64; 2]> = ring
                .as_array()
                .map(|pts| {
                    pts.iter()
                        .filter_map(|p| Some([p.get(0)?.as_f64()?, p.get(1)?.as_f64()?]))
                        .collect()
                })
                .unwrap_or_default();
            if coords.len() >= 3 {
                zones.push(Polygon::from_lon_lat(&coords));
            }
        }
        result.push(Blasting {
            id: req_u32(o, "id", &path)?,
            zones,
            start: req_time(o, "start_time", &path)?,
            end: req_time(o, "end_time", &path)?,
        });
    }
    result.sort_by_key(|b| b.start);
    Ok(result)
}

pub struct SimDataSerializer;

impl SimDataSerializer {
    pub fn from_str(raw: &str) -> Result<SimData, InputError> {
        if raw.trim().is_empty() {
            return Err(InputError::EmptyInput);
        }
        let value: Value = serde_json::from_str(raw)?;
        Self::serialize(&value)
    }

    pub fn serialize(data: &Value) -> Result<SimData, InputError> {
        let root = match data {
            Value::Object(o) if !o.is_empty() => o,
            Value::Null | Value::Object(_) => return Err(InputError::EmptyInput),
            _ => return Err(InputError::invalid("$", "expected an object")),
        };
        let quarry = as_obj(field(root, "quarry", "")?, "quarry")?;
        let utc_offset_minutes = match quarry.get("utc_offset_minutes") {
            Some(v) => v
                .as_i64()
                .and_then(|m| i32::try_from(m).ok())
                .ok_or_else(|| InputError::invalid("quarry.utc_offset_minutes", "expected whole minutes"))?,
            None => return Err(InputError::missing("quarry.timezone")),
        };
        let start_time = req_time(root, "start_time", "")?;
        let end_time = req_time(root, "end_time", "")?;
        if end_time <= start_time {
            return Err(InputError::invalid("end_time", "must be after start_time"));
        }
        let seed = match root.get("seed") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| InputError::invalid("seed", "expected a non-negative integer"))?),
        };

        let mut shovels = BTreeMap::new();
        for (i, raw) in list(quarry, "shovel_list").iter().enumerate() {
            let s = shovel(raw, &format!("shovel_list[{}].", i))?;
            shovels.insert(s.id, s);
        }
        let mut unloads = BTreeMap::new();
        for (i, raw) in list(quarry, "unload_list").iter().enumerate() {
            let u = unload(raw, &format!("unload_list[{}].", i))?;
            unloads.insert(u.id, u);
        }
        let mut fuel_stations = BTreeMap::new();
        for (i, raw) in list(quarry, "fuel_station_list").iter().enumerate() {
            let f = fuel_station(raw, &format!("fuel_station_list[{}].", i))?;
            fuel_stations.insert(f.id, f);
        }
        let mut areas = Vec::new();
        for (i, raw) in list(quarry, "idle_area_list").iter().enumerate() {
            areas.push(idle_area(raw, &format!("idle_area_list[{}].", i))?);
        }
        let mut trucks = BTreeMap::new();
        for (i, raw) in list(quarry, "truck_list").iter().enumerate() {
            let t = truck(raw, &format!("truck_list[{}].", i))?;
            trucks.insert(t.id, t);
        }
        let mut trails = Vec::new();
        for (i, raw) in list(quarry, "trail_list").iter().enumerate() {
            let t = trail(raw, &format!("trail_list[{}].", i))?;
            let by = format!("trail {}", t.id);
            if !shovels.contains_key(&t.shovel_id) {
                return Err(InputError::UnknownReference { kind: ObjectKind::Shovel, id: t.shovel_id, by });
            }
            if !unloads.contains_key(&t.unload_id) {
                return Err(InputError::UnknownReference { kind: ObjectKind::Unload, id: t.unload_id, by });
            }
            if let Some(missing) = t.truck_ids.iter().find(|id| !trucks.contains_key(*id)) {
                return Err(InputError::UnknownReference { kind: ObjectKind::Truck, id: *missing, by });
            }
            trails.push(t);
        }

        let lunch_times = match (quarry.get("lunch_break_offset"), quarry.get("lunch_break_duration")) {
            (Some(off), Some(dur)) if !off.is_null() && !dur.is_null() => {
                let off = req_f64(quarry, "lunch_break_offset", "quarry.")? as i64;
                let dur = req_f64(quarry, "lunch_break_duration", "quarry.")? as i64;
                let mut shifts = Vec::new();
                for (i, s) in list(quarry, "shift_config").iter().enumerate() {
                    let path = format!("quarry.shift_config[{}].", i);
                    shifts.push(req_f64(as_obj(s, &path)?, "begin_offset", &path)? as i64);
                }
                lunch_breaks(start_time, end_time, utc_offset_minutes, &shifts, off, dur)
            }
            _ => Vec::new(),
        };

        let schedules = quarry.get("schedules").and_then(Value::as_object);
        let planned = match schedules {
            Some(s) => planned_idles(list(s, "planned_idle"))?,
            None => BTreeMap::new(),
        };
        let blasting = match schedules {
            Some(s) => blastings(list(s, "blasting"))?,
            None => Vec::new(),
        };

        let mut road_net = GraphRoadNet::from_json(field(quarry, "road_net", "quarry.")?)?;
        let positions = shovels
            .values()
            .map(|s| (ObjectRef::new(ObjectKind::Shovel, s.id), s.position))
            .chain(unloads.values().map(|u| (ObjectRef::new(ObjectKind::Unload, u.id), u.position)))
            .chain(fuel_stations.values().map(|f| (ObjectRef::new(ObjectKind::FuelStation, f.id), f.position)))
            .chain(areas.iter().map(|a| (ObjectRef::new(ObjectKind::IdleArea, a.id), a.position)));
        for (obj, pos) in positions.collect::<Vec<_>>() {
            if road_net.has_object(&obj) {
                continue;
            }
            let vertex = road_net
                .nearest_vertex(&pos)
                .ok_or_else(|| InputError::Routing("road network has no vertices".into()))?;
            road_net.bind(obj, vertex);
        }

        Ok(SimData {
            start_time,
            end_time,
            seed,
            utc_offset_minutes,
            trucks,
            shovels,
            unloads,
            fuel_stations,
            idle_areas: IdleAreaStorage { areas },
            trails,
            road_net: Arc::new(road_net),
            lunch_times,
            planned_idles: planned,
            blasting,
            target_shovel_load: opt_f64(quarry, "target_shovel_load", "quarry.", 0.9)?,
        })
    }
}
