use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::geometry::{Point, Polygon};
use crate::routing::RoadNet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectKind {
    Truck,
    Shovel,
    Unload,
    FuelStation,
    IdleArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: u32,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, id: u32) -> Self {
        ObjectRef { kind, id }
    }

    /// Identifier used in events and telemetry, e.g. `"3_truck"`.
    pub fn tag(&self) -> String {
        format!("{}_{}", self.id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadType {
    Gravel,
    Sand,
    Clay,
    WetOre,
}

impl PayloadType {
    /// Digging resistance coefficient.
    pub fn resistance(self) -> f64 {
        match self {
            PayloadType::Gravel => 1.0,
            PayloadType::Sand => 1.1,
            PayloadType::Clay => 1.4,
            PayloadType::WetOre => 1.5,
        }
    }

    /// Bulk density, t/m³.
    pub fn density(self) -> f64 {
        match self {
            PayloadType::Gravel => 1.5,
            PayloadType::Sand => 1.6,
            PayloadType::Clay => 1.9,
            PayloadType::WetOre => 2.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnloadType {
    Hydraulic,
    Mechanical,
    Gravity,
}

impl UnloadType {
    /// Body tipping speed, m³/s.
    pub fn unloading_speed(self) -> f64 {
        match self {
            UnloadType::Hydraulic => 2.8,
            UnloadType::Mechanical => 0.35,
            UnloadType::Gravity => 0.25,
        }
    }
}

/// Inputs of the breakdown model: hours of operation behind the failure count, mean repair
/// time in minutes and the failure count itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityInputs {
    pub initial_operating_time: f64,
    pub average_repair_duration: f64,
    pub initial_failure_count: f64,
}

impl ReliabilityInputs {
    pub const SHOVEL: ReliabilityInputs = ReliabilityInputs {
        initial_operating_time: 12.,
        average_repair_duration: 8.,
        initial_failure_count: 100.,
    };
    pub const TRUCK: ReliabilityInputs = ReliabilityInputs {
        initial_operating_time: 12.,
        average_repair_duration: 4.,
        initial_failure_count: 50.,
    };
    pub const UNLOAD: ReliabilityInputs = ReliabilityInputs {
        initial_operating_time: 24.,
        average_repair_duration: 24.,
        initial_failure_count: 50.,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShovelProperties {
    pub bucket_volume: f64,
    pub bucket_lift_speed: f64,
    pub arm_turn_speed: f64,
    pub bucket_dig_speed: f64,
    pub bucket_fill_speed: f64,
    pub bucket_fill_coef: f64,
    pub hydraulic_coef: f64,
    pub inertia_coef: f64,
    pub return_move_coef: f64,
    pub payload_type: PayloadType,
    pub moisture_percent: f64,
    pub reliability: ReliabilityInputs,
}

impl ShovelProperties {
    pub fn new(bucket_volume: f64, bucket_lift_speed: f64, arm_turn_speed: f64, bucket_dig_speed: f64, bucket_fill_speed: f64) -> Self {
        ShovelProperties {
            bucket_volume,
            bucket_lift_speed,
            arm_turn_speed,
            bucket_dig_speed,
            bucket_fill_speed,
            bucket_fill_coef: 0.8,
            hydraulic_coef: 1.1,
            inertia_coef: 1.2,
            return_move_coef: 0.85,
            payload_type: PayloadType::Sand,
            moisture_percent: 10.,
            reliability: ReliabilityInputs::SHOVEL,
        }
    }

    pub fn with_payload_type(self, payload_type: PayloadType) -> Self {
        ShovelProperties { payload_type, ..self }
    }

    pub fn with_moisture_percent(self, moisture_percent: f64) -> Self {
        ShovelProperties { moisture_percent, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckProperties {
    pub body_capacity: f64,
    pub speed_empty: f64,
    pub speed_loaded: f64,
    pub acceleration_empty: f64,
    pub acceleration_loaded: f64,
    pub driver_skill: f64,
    pub fuel_capacity: f64,
    pub fuel_threshold_critical: f64,
    pub fuel_threshold_planned: f64,
    pub fuel_level: f64,
    pub fuel_idle_lph: f64,
    pub fuel_specific_consumption: f64,
    pub fuel_density: f64,
    pub engine_power_kw: f64,
    pub reliability: ReliabilityInputs,
}

impl TruckProperties {
    /// Speeds, acceleration defaults and a fuel curve that never triggers refuelling.
    pub fn new(body_capacity: f64, speed_empty: f64, speed_loaded: f64) -> Self {
        TruckProperties {
            body_capacity,
            speed_empty,
            speed_loaded,
            acceleration_empty: 2.8,
            acceleration_loaded: 1.4,
            driver_skill: 1.,
            fuel_capacity: 1000.,
            fuel_threshold_critical: 0.,
            fuel_threshold_planned: 0.,
            fuel_level: 1000.,
            fuel_idle_lph: 0.,
            fuel_specific_consumption: 0.,
            fuel_density: 0.85,
            engine_power_kw: 0.,
            reliability: ReliabilityInputs::TRUCK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadProperties {
    pub angle: f64,
    pub unload_type: UnloadType,
    pub payload_type: PayloadType,
    pub trucks_at_once: usize,
    pub reliability: ReliabilityInputs,
}

impl UnloadProperties {
    pub fn new(angle: f64, unload_type: UnloadType) -> Self {
        UnloadProperties {
            angle,
            unload_type,
            payload_type: PayloadType::Gravel,
            trucks_at_once: 100,
            reliability: ReliabilityInputs::UNLOAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelStationProperties {
    pub num_pumps: usize,
    pub flow_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Truck {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub edge: Option<usize>,
    pub properties: TruckProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shovel {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub properties: ShovelProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unload {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub properties: UnloadProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelStation {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub properties: FuelStationProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AreaKind {
    ShiftChange,
    Lunch,
    PlannedIdle,
    BlastWaiting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleArea {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub is_shift_change_area: bool,
    pub is_lunch_area: bool,
    pub is_planned_idle_area: bool,
    pub is_blast_waiting_area: bool,
}

impl IdleArea {
    pub fn is(&self, kind: AreaKind) -> bool {
        match kind {
            AreaKind::ShiftChange => self.is_shift_change_area,
            AreaKind::Lunch => self.is_lunch_area,
            AreaKind::PlannedIdle => self.is_planned_idle_area,
            AreaKind::BlastWaiting => self.is_blast_waiting_area,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdleAreaStorage {
    pub areas: Vec<IdleArea>,
}

impl IdleAreaStorage {
    pub fn of_kind(&self, kind: AreaKind) -> impl Iterator<Item = &IdleArea> {
        self.areas.iter().filter(move |a| a.is(kind))
    }

    pub fn shift_change_areas(&self) -> impl Iterator<Item = &IdleArea> {
        self.of_kind(AreaKind::ShiftChange)
    }

    pub fn lunch_areas(&self) -> impl Iterator<Item = &IdleArea> {
        self.of_kind(AreaKind::Lunch)
    }

    pub fn planned_idle_areas(&self) -> impl Iterator<Item = &IdleArea> {
        self.of_kind(AreaKind::PlannedIdle)
    }

    pub fn blast_waiting_areas(&self) -> impl Iterator<Item = &IdleArea> {
        self.of_kind(AreaKind::BlastWaiting)
    }
}

/// A trail binds trucks to a fixed shovel and unload pair in manual mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRoute {
    pub id: u32,
    pub shovel_id: u32,
    pub unload_id: u32,
    pub truck_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blasting {
    pub id: u32,
    pub zones: Vec<Polygon>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlannedTrip {
    pub truck_id: u32,
    pub shovel_id: u32,
    pub unload_id: u32,
    pub order: u32,
}

/// Immutable snapshot of one scenario. Everything the engine and planners read about the
/// quarry lives here.
#[derive(Clone)]
pub struct SimData {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub seed: Option<u64>,
    pub utc_offset_minutes: i32,
    pub trucks: BTreeMap<u32, Truck>,
    pub shovels: BTreeMap<u32, Shovel>,
    pub unloads: BTreeMap<u32, Unload>,
    pub fuel_stations: BTreeMap<u32, FuelStation>,
    pub idle_areas: IdleAreaStorage,
    pub trails: Vec<TrailRoute>,
    pub road_net: Arc<dyn RoadNet>,
    pub lunch_times: Vec<TimeWindow>,
    pub planned_idles: BTreeMap<ObjectRef, Vec<TimeWindow>>,
    pub blasting: Vec<Blasting>,
    pub target_shovel_load: f64,
}

impl Debug for SimData {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SimData")
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("seed", &self.seed)
            .field("trucks", &self.trucks.len())
            .field("shovels", &self.shovels.len())
            .field("unloads", &self.unloads.len())
            .field("fuel_stations", &self.fuel_stations.len())
            .finish_non_exhaustive()
    }
}

impl SimData {
    /// Run length in whole seconds.
    pub fn duration_secs(&self) -> u64 {
        (self.end_time - self.start_time).num_seconds().max(0) as u64
    }

    /// Seconds from the run start, clamped to the run.
    pub fn offset_secs(&self, t: DateTime<Utc>) -> u64 {
        ((t - self.start_time).num_seconds().max(0) as u64).min(self.duration_secs())
    }

    pub fn at_offset(&self, secs: u64) -> DateTime<Utc> {
        self.start_time + chrono::Duration::seconds(secs as i64)
    }

    /// Lunch windows as `[start, end)` second offsets, clipped to the run.
    pub fn lunch_offsets(&self) -> Vec<(u64, u64)> {
        clip_windows(self, &self.lunch_times)
    }

    pub fn planned_idle_offsets(&self, obj: ObjectRef) -> Vec<(u64, u64)> {
        self.planned_idles.get(&obj).map(|w| clip_windows(self, w)).unwrap_or_default()
    }
}

fn clip_windows(data: &SimData, windows: &[TimeWindow]) -> Vec<(u64, u64)> {
    windows
        .iter()
        .filter(|w| w.end > data.start_time && w.start < data.end_time)
        .map(|w| (data.offset_secs(w.start), data.offset_secs(w.end)))
        .filter(|(s, e)| e > s)
        .collect()
}
