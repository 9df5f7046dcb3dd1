use serde::{Deserialize, Serialize};

use super::states::{FuelStationState, ShovelState, TruckState, UnloadState};

pub fn round_to(x: f64, places: i32) -> f64 {
    let k = 10f64.powi(places);
    (x * k).round() / k
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckRow {
    pub object_id: String,
    pub object_name: String,
    pub object_type: String,
    pub lat: f64,
    pub lon: f64,
    pub speed: f64,
    pub weight: f64,
    pub fuel: f64,
    pub state: TruckState,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShovelRow {
    pub object_id: String,
    pub object_name: String,
    pub object_type: String,
    pub lat: f64,
    pub lon: f64,
    pub state: ShovelState,
    pub timestamp: f64,
    pub loading_truck: String,
    pub trucks_queue: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadRow {
    pub object_id: String,
    pub object_type: String,
    pub timestamp: f64,
    pub unloading_trucks: Vec<String>,
    pub trucks_queue: Vec<String>,
    pub state: UnloadState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelStationRow {
    pub object_id: String,
    pub object_type: String,
    pub timestamp: f64,
    pub refuelling_trucks: Vec<String>,
    pub trucks_queue: Vec<String>,
    pub state: FuelStationState,
}

/// One per actor per simulated second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryRow {
    Truck(TruckRow),
    Shovel(ShovelRow),
    Unload(UnloadRow),
    FuelStation(FuelStationRow),
}

impl TelemetryRow {
    pub fn timestamp(&self) -> f64 {
        match self {
            TelemetryRow::Truck(r) => r.timestamp,
            TelemetryRow::Shovel(r) => r.timestamp,
            TelemetryRow::Unload(r) => r.timestamp,
            TelemetryRow::FuelStation(r) => r.timestamp,
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            TelemetryRow::Truck(r) => &r.object_id,
            TelemetryRow::Shovel(r) => &r.object_id,
            TelemetryRow::Unload(r) => &r.object_id,
            TelemetryRow::FuelStation(r) => &r.object_id,
        }
    }
}

/// Splits a display queue into the names being served and the names waiting behind them.
pub fn split_queue(queue: &[String], served: usize) -> (Vec<String>, Vec<String>) {
    let served = served.min(queue.len());
    (queue[..served].to_vec(), queue[served..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_to(55.1234567, 6), 55.123457);
        assert_eq!(round_to(31.96, 1), 32.0);
    }

    #[test]
    fn queue_split_respects_capacity() {
        let q: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(split_queue(&q, 2), (vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]));
        assert_eq!(split_queue(&q, 100).1.len(), 0);
    }

    #[test]
    fn truck_row_field_set() {
        let row = TelemetryRow::Truck(TruckRow {
            object_id: "1_truck".into(),
            object_name: "TR-1".into(),
            object_type: "truck".into(),
            lat: 0.,
            lon: 0.,
            speed: 0.,
            weight: 0.,
            fuel: 1000.,
            state: TruckState::Idle,
            timestamp: 1.,
        });
        let v = serde_json::to_value(&row).unwrap();
        let mut keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["fuel", "lat", "lon", "object_id", "object_name", "object_type", "speed", "state", "timestamp", "weight"]);
    }
}
