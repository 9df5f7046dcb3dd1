//! Production accounting: one trip per truck from leaving its previous stop to emptying its
//! body at the unload.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::props::ObjectKind;
use crate::writer::Summary;

/// What the truck carries and where it is bound when a trip begins or ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripData {
    pub truck_id: u32,
    pub shovel_id: Option<u32>,
    pub unload_id: Option<u32>,
    pub weight: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripObject {
    pub id: Option<u32>,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub truck_id: u32,
    pub shovel_id: Option<u32>,
    pub unload_id: Option<u32>,
    pub volume: i64,
    pub weight: i64,
    pub time: String,
    pub start_time: String,
    pub end_time: String,
    pub start_object: TripObject,
    pub end_object: TripObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub time: String,
    pub value: i64,
}

#[derive(Debug, Clone, Copy)]
struct OpenTrip {
    start_object: TripObject,
    start_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TripService {
    start_time: DateTime<Utc>,
    offset: FixedOffset,
    shift_change_area: Option<u32>,
    open: BTreeMap<u32, OpenTrip>,
    finished: BTreeMap<u32, usize>,
    pub total_trips: u64,
    pub total_volume: f64,
    pub total_weight: f64,
    pub total_volume_round: i64,
    pub total_weight_round: i64,
    hourly_volume: BTreeMap<u32, i64>,
    hourly_weight: BTreeMap<u32, i64>,
    hourly_trips: BTreeMap<u32, i64>,
    trucks: BTreeSet<u32>,
    shovels: BTreeSet<u32>,
    pub trips_table: Vec<TripRecord>,
}

impl TripService {
    pub fn new(start_time: DateTime<Utc>, utc_offset_minutes: i32, shift_change_area: Option<u32>) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        TripService {
            start_time,
            offset,
            shift_change_area,
            open: BTreeMap::new(),
            finished: BTreeMap::new(),
            total_trips: 0,
            total_volume: 0.,
            total_weight: 0.,
            total_volume_round: 0,
            total_weight_round: 0,
            hourly_volume: BTreeMap::new(),
            hourly_weight: BTreeMap::new(),
            hourly_trips: BTreeMap::new(),
            trucks: BTreeSet::new(),
            shovels: BTreeSet::new(),
            trips_table: Vec::new(),
        }
    }

    fn local(&self, t: DateTime<Utc>) -> DateTime<FixedOffset> {
        t.with_timezone(&self.offset)
    }

    pub fn is_open(&self, truck_id: u32) -> bool {
        self.open.contains_key(&truck_id)
    }

    /// Opens a trip unless one is already open for the truck.
    pub fn begin(&mut self, data: &TripData, now: DateTime<Utc>) {
        if self.is_open(data.truck_id) {
            log::debug!("trip of truck {} already open", data.truck_id);
            return;
        }
        let start_object = if self.finished.contains_key(&data.truck_id) {
            TripObject { id: data.unload_id, kind: ObjectKind::Unload }
        } else {
            TripObject { id: self.shift_change_area, kind: ObjectKind::IdleArea }
        };
        self.open.insert(data.truck_id, OpenTrip { start_object, start_time: now });
    }

    pub fn finish(&mut self, data: &TripData, now: DateTime<Utc>) -> Result<(), EngineError> {
        let trip = self.open.remove(&data.truck_id).ok_or(EngineError::NoOpenTrip { truck_id: data.truck_id })?;
        *self.finished.entry(data.truck_id).or_default() += 1;

        let (volume_round, weight_round) = (data.volume as i64, data.weight as i64);
        self.total_trips += 1;
        self.total_volume += data.volume;
        self.total_weight += data.weight;
        self.total_volume_round += volume_round;
        self.total_weight_round += weight_round;

        let end_local = self.local(now);
        let hour = end_local.hour();
        *self.hourly_volume.entry(hour).or_default() += volume_round;
        *self.hourly_weight.entry(hour).or_default() += weight_round;
        *self.hourly_trips.entry(hour).or_default() += 1;
        self.trucks.insert(data.truck_id);
        if let Some(shovel) = data.shovel_id {
            self.shovels.insert(shovel);
        }

        let end_time = end_local.to_rfc3339();
        self.trips_table.push(TripRecord {
            truck_id: data.truck_id,
            shovel_id: data.shovel_id,
            unload_id: data.unload_id,
            volume: volume_round,
            weight: weight_round,
            time: end_time.clone(),
            start_time: self.local(trip.start_time).to_rfc3339(),
            end_time,
            start_object: trip.start_object,
            end_object: TripObject { id: data.unload_id, kind: ObjectKind::Unload },
        });
        Ok(())
    }

    fn chart(&self, hourly: &BTreeMap<u32, i64>, hours: &[u32]) -> Vec<ChartPoint> {
        hours
            .iter()
            .filter_map(|h| match hourly.get(h) {
                Some(v) if *v != 0 => Some(ChartPoint { time: format!("{}:00", h), value: *v }),
                _ => None,
            })
            .collect()
    }

    /// Totals and hourly charts from the run start hour to the hour of `end_time`, wrapping
    /// past midnight.
    pub fn summary(&self, end_time: DateTime<Utc>) -> Summary {
        let start_hour = self.local(self.start_time).hour();
        let end_hour = self.local(end_time).hour();
        let hours: Vec<u32> = if end_hour >= start_hour {
            (start_hour..=end_hour).collect()
        } else {
            (start_hour..24).chain(0..=end_hour).collect()
        };
        let weight_chart = self.chart(&self.hourly_weight, &hours);
        Summary {
            trips: self.total_trips,
            volume: self.total_volume_round,
            weight: self.total_weight_round,
            // the volume chart has always carried weights
            chart_volume_data: weight_chart.clone(),
            chart_weight_data: weight_chart,
            chart_trip_data: self.chart(&self.hourly_trips, &hours),
            trucks_count: self.trucks.len(),
            shovels_count: self.shovels.len(),
            trips_table: self.trips_table.clone(),
            trucks_needed: None,
            extra: Default::default(),
        }
    }

    /// Volume per local hour, unaffected by the chart quirk above.
    pub fn hourly_volume(&self) -> &BTreeMap<u32, i64> {
        &self.hourly_volume
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn trip(truck_id: u32, weight: f64, volume: f64) -> TripData {
        TripData { truck_id, shovel_id: Some(1), unload_id: Some(2), weight, volume }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn finish_without_begin_fails() {
        let mut s = TripService::new(at(8, 0), 0, Some(1));
        assert!(matches!(s.finish(&trip(1, 90., 56.), at(8, 10)), Err(EngineError::NoOpenTrip { truck_id: 1 })));
    }

    #[test]
    fn start_object_switches_to_the_unload() {
        let mut s = TripService::new(at(8, 0), 0, Some(5));
        s.begin(&trip(1, 0., 0.), at(8, 0));
        // a second begin while open is ignored
        s.begin(&trip(1, 0., 0.), at(8, 5));
        s.finish(&trip(1, 90.7, 56.6), at(8, 20)).unwrap();
        s.begin(&trip(1, 0., 0.), at(8, 25));
        s.finish(&trip(1, 90.7, 56.6), at(8, 50)).unwrap();
        assert_eq!(s.trips_table[0].start_object, TripObject { id: Some(5), kind: ObjectKind::IdleArea });
        assert_eq!(s.trips_table[0].start_time, "2024-01-01T08:00:00+00:00");
        assert_eq!(s.trips_table[1].start_object, TripObject { id: Some(2), kind: ObjectKind::Unload });
        assert_eq!(s.trips_table[1].weight, 90);
    }

    #[test]
    fn summary_charts_use_local_hours() {
        // UTC+3: 22:00 UTC is 01:00 local
        let mut s = TripService::new(at(20, 30), 180, Some(1));
        s.begin(&trip(1, 0., 0.), at(20, 30));
        s.finish(&trip(1, 90.9, 56.6), at(22, 10)).unwrap();
        let summary = s.summary(at(23, 0));
        assert_eq!(summary.trips, 1);
        assert_eq!(summary.weight, 90);
        assert_eq!(summary.volume, 56);
        assert_eq!(summary.chart_volume_data, vec![ChartPoint { time: "1:00".into(), value: 90 }]);
        assert_eq!(summary.chart_trip_data, vec![ChartPoint { time: "1:00".into(), value: 1 }]);
        assert_eq!(s.hourly_volume().get(&1), Some(&56));
        assert_eq!((summary.trucks_count, summary.shovels_count), (1, 1));
    }
}
