//! Output sinks. A run pushes events and telemetry rows into one [`Writer`] and finalises it
//! into a [`SimOutput`].

use std::error::Error;
use std::fs::File;
use std::path::Path;

use csv::WriterBuilder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::events::Event;
use crate::engine::telemetry::TelemetryRow;
use crate::stats::{ChartPoint, TripRecord};

/// Production totals, hourly charts and the trips table of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub trips: u64,
    pub volume: i64,
    pub weight: i64,
    pub chart_volume_data: Vec<ChartPoint>,
    pub chart_weight_data: Vec<ChartPoint>,
    pub chart_trip_data: Vec<ChartPoint>,
    pub trucks_count: usize,
    pub shovels_count: usize,
    pub trips_table: Vec<TripRecord>,
    pub trucks_needed: Option<f64>,
    /// Reliability annotations and anything else added with `update_meta("summary", ..)`.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub start_time: f64,
    pub end_time: f64,
    pub time_slot: i64,
    pub frames: Vec<TelemetryRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimOutput {
    pub meta: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Vec<TelemetryRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batches: Option<IndexMap<String, Batch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
    pub summary: Summary,
}

pub trait Writer: Send {
    /// Merges the fields of `fields` (a JSON object) into the section named `key`: `"meta"`
    /// or `"summary"`.
    fn update_meta(&mut self, key: &str, fields: Value);
    fn push_event(&mut self, event: Event);
    fn write_telemetry_row(&mut self, row: TelemetryRow);
    fn finalize(&mut self) -> SimOutput;
}

fn merge_into(target: &mut IndexMap<String, Value>, fields: Value) {
    match fields {
        Value::Object(map) => target.extend(map),
        Value::Null => {}
        other => log::warn!("ignoring non-object output fields {}", other),
    }
}

#[derive(Debug, Default)]
struct Sections {
    meta: IndexMap<String, Value>,
    summary: IndexMap<String, Value>,
}

impl Sections {
    fn update(&mut self, key: &str, fields: Value) {
        match key {
            "meta" => merge_into(&mut self.meta, fields),
            "summary" => merge_into(&mut self.summary, fields),
            other => log::warn!("unknown output section '{}'", other),
        }
    }

    fn summary(&mut self) -> Summary {
        Summary { extra: std::mem::take(&mut self.summary), ..Default::default() }
    }
}

/// Keeps every row and event.
#[derive(Debug, Default)]
pub struct SimpleWriter {
    sections: Sections,
    telemetry: Vec<TelemetryRow>,
    events: Vec<Event>,
}

impl SimpleWriter {
    pub fn new() -> Self {
        SimpleWriter::default()
    }
}

impl Writer for SimpleWriter {
    fn update_meta(&mut self, key: &str, fields: Value) {
        self.sections.update(key, fields);
    }

    fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    fn write_telemetry_row(&mut self, row: TelemetryRow) {
        self.telemetry.push(row);
    }

    fn finalize(&mut self) -> SimOutput {
        SimOutput {
            meta: std::mem::take(&mut self.sections.meta),
            telemetry: Some(std::mem::take(&mut self.telemetry)),
            batches: None,
            events: Some(std::mem::take(&mut self.events)),
            summary: self.sections.summary(),
        }
    }
}

/// Used for reliability replications, which only need the summary.
#[derive(Debug, Default)]
pub struct ReliabilityWriter {
    sections: Sections,
}

impl ReliabilityWriter {
    pub fn new() -> Self {
        ReliabilityWriter::default()
    }
}

impl Writer for ReliabilityWriter {
    fn update_meta(&mut self, key: &str, fields: Value) {
        self.sections.update(key, fields);
    }

    fn push_event(&mut self, _event: Event) {}

    fn write_telemetry_row(&mut self, _row: TelemetryRow) {}

    fn finalize(&mut self) -> SimOutput {
        SimOutput { meta: std::mem::take(&mut self.sections.meta), summary: self.sections.summary(), ..Default::default() }
    }
}

/// Groups telemetry rows into consecutive time slots of `batch_size_seconds`, numbered in the
/// order they first appear.
#[derive(Debug)]
pub struct BatchWriter {
    batch_size_seconds: u64,
    frame_interval: u64,
    sections: Sections,
    batches: IndexMap<i64, Batch>,
    events: Vec<Event>,
    start_timestamp: Option<f64>,
    end_timestamp: Option<f64>,
    total_frames: u64,
}

impl Default for BatchWriter {
    fn default() -> Self {
        BatchWriter::new(60)
    }
}

impl BatchWriter {
    pub fn new(batch_size_seconds: u64) -> Self {
        BatchWriter {
            batch_size_seconds: batch_size_seconds.max(1),
            frame_interval: 1,
            sections: Sections::default(),
            batches: IndexMap::new(),
            events: Vec::new(),
            start_timestamp: None,
            end_timestamp: None,
            total_frames: 0,
        }
    }

    pub fn with_frame_interval(self, frame_interval: u64) -> Self {
        BatchWriter { frame_interval, ..self }
    }
}

impl Writer for BatchWriter {
    fn update_meta(&mut self, key: &str, fields: Value) {
        self.sections.update(key, fields);
    }

    fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    fn write_telemetry_row(&mut self, row: TelemetryRow) {
        let ts = row.timestamp();
        let time_slot = (ts / self.batch_size_seconds as f64).floor() as i64;
        let batch = self
            .batches
            .entry(time_slot)
            .or_insert_with(|| Batch { start_time: ts, end_time: ts, time_slot, frames: Vec::new() });
        batch.start_time = batch.start_time.min(ts);
        batch.end_time = batch.end_time.max(ts);
        batch.frames.push(row);
        self.total_frames += 1;
        self.start_timestamp = Some(self.start_timestamp.map_or(ts, |s| s.min(ts)));
        self.end_timestamp = Some(self.end_timestamp.map_or(ts, |e| e.max(ts)));
    }

    fn finalize(&mut self) -> SimOutput {
        let batches: IndexMap<String, Batch> =
            std::mem::take(&mut self.batches).into_values().enumerate().map(|(k, b)| (k.to_string(), b)).collect();
        let mut meta = std::mem::take(&mut self.sections.meta);
        meta.insert("start_timestamp".into(), serde_json::json!(self.start_timestamp));
        meta.insert("end_timestamp".into(), serde_json::json!(self.end_timestamp));
        meta.insert("frame_interval".into(), self.frame_interval.into());
        meta.insert("batch_size_seconds".into(), self.batch_size_seconds.into());
        meta.insert("total_frames".into(), self.total_frames.into());
        meta.insert("total_batches".into(), batches.len().into());
        let keys: Vec<usize> = (0..batches.len()).collect();
        meta.insert("batch_keys".into(), serde_json::json!(keys));
        SimOutput {
            meta,
            telemetry: None,
            batches: Some(batches),
            events: Some(std::mem::take(&mut self.events)),
            summary: self.sections.summary(),
        }
    }
}

/// Flat CSV shape shared by every telemetry row. Queues are joined with `;`.
#[derive(Debug, Serialize)]
struct TelemetryRecord<'a> {
    timestamp: f64,
    object_id: &'a str,
    object_type: &'a str,
    object_name: Option<&'a str>,
    state: String,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    weight: Option<f64>,
    fuel: Option<f64>,
    serving: String,
    queue: String,
}

impl<'a> From<&'a TelemetryRow> for TelemetryRecord<'a> {
    fn from(row: &'a TelemetryRow) -> Self {
        match row {
            TelemetryRow::Truck(r) => TelemetryRecord {
                timestamp: r.timestamp,
                object_id: &r.object_id,
                object_type: &r.object_type,
                object_name: Some(&r.object_name),
                state: r.state.to_string(),
                lat: Some(r.lat),
                lon: Some(r.lon),
                speed: Some(r.speed),
                weight: Some(r.weight),
                fuel: Some(r.fuel),
                serving: String::new(),
                queue: String::new(),
            },
            TelemetryRow::Shovel(r) => TelemetryRecord {
                timestamp: r.timestamp,
                object_id: &r.object_id,
                object_type: &r.object_type,
                object_name: Some(&r.object_name),
                state: r.state.to_string(),
                lat: Some(r.lat),
                lon: Some(r.lon),
                speed: None,
                weight: None,
                fuel: None,
                serving: r.loading_truck.clone(),
                queue: r.trucks_queue.join(";"),
            },
            TelemetryRow::Unload(r) => TelemetryRecord {
                timestamp: r.timestamp,
                object_id: &r.object_id,
                object_type: &r.object_type,
                object_name: None,
                state: r.state.to_string(),
                lat: None,
                lon: None,
                speed: None,
                weight: None,
                fuel: None,
                serving: r.unloading_trucks.join(";"),
                queue: r.trucks_queue.join(";"),
            },
            TelemetryRow::FuelStation(r) => TelemetryRecord {
                timestamp: r.timestamp,
                object_id: &r.object_id,
                object_type: &r.object_type,
                object_name: None,
                state: r.state.to_string(),
                lat: None,
                lon: None,
                speed: None,
                weight: None,
                fuel: None,
                serving: r.refuelling_trucks.join(";"),
                queue: r.trucks_queue.join(";"),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    time: f64,
    event_code: u32,
    event_name: &'a str,
    object_id: &'a str,
    object_type: &'a str,
    object_name: &'a str,
    truck_id: Option<u32>,
    truck_name: Option<&'a str>,
}

impl<'a> From<&'a Event> for EventRecord<'a> {
    fn from(e: &'a Event) -> Self {
        EventRecord {
            time: e.time,
            event_code: e.event_code,
            event_name: &e.event_name,
            object_id: &e.object_id,
            object_type: &e.object_type,
            object_name: &e.object_name,
            truck_id: e.truck_id,
            truck_name: e.truck_name.as_deref(),
        }
    }
}

impl SimOutput {
    /// Every telemetry row, whether kept flat or in batches.
    pub fn rows(&self) -> Box<dyn Iterator<Item = &TelemetryRow> + '_> {
        match (&self.telemetry, &self.batches) {
            (Some(t), _) => Box::new(t.iter()),
            (None, Some(b)) => Box::new(b.values().flat_map(|batch| batch.frames.iter())),
            (None, None) => Box::new(std::iter::empty()),
        }
    }

    pub fn events(&self) -> &[Event] {
        self.events.as_deref().unwrap_or(&[])
    }

    /// Writes `telemetry.csv` and `events.csv` into `dir`.
    pub fn write_csv(&self, dir: &Path) -> Result<(), Box<dyn Error>> {
        let file = File::create(dir.join("telemetry.csv"))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for row in self.rows() {
            writer.serialize(TelemetryRecord::from(row))?;
        }
        writer.flush()?;

        let file = File::create(dir.join("events.csv"))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for event in self.events() {
            writer.serialize(EventRecord::from(event))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventKind;
    use crate::engine::states::UnloadState;
    use crate::engine::telemetry::UnloadRow;
    use crate::props::{ObjectKind, ObjectRef};
    use serde_json::json;

    fn row(ts: f64) -> TelemetryRow {
        TelemetryRow::Unload(UnloadRow {
            object_id: "1_unload".into(),
            object_type: "unload".into(),
            timestamp: ts,
            unloading_trucks: vec!["TR-1".into()],
            trucks_queue: vec!["TR-2".into(), "TR-3".into()],
            state: UnloadState::Open,
        })
    }

    fn event() -> Event {
        Event::new(EventKind::BreakdownBegin, 10., ObjectRef::new(ObjectKind::Unload, 1), "DUMP-1")
    }

    #[test]
    fn simple_writer_keeps_everything() {
        let mut w = SimpleWriter::new();
        w.update_meta("meta", json!({"seed": 3}));
        w.update_meta("summary", json!({"is_stable": true}));
        w.write_telemetry_row(row(0.));
        w.push_event(event());
        let out = w.finalize();
        assert_eq!(out.meta["seed"], json!(3));
        assert_eq!(out.telemetry.as_ref().map(Vec::len), Some(1));
        assert_eq!(out.events().len(), 1);
        assert_eq!(out.summary.extra["is_stable"], json!(true));
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["summary"]["is_stable"], json!(true));
        assert!(v.get("batches").is_none());
    }

    #[test]
    fn reliability_writer_drops_rows_and_events() {
        let mut w = ReliabilityWriter::new();
        w.update_meta("meta", json!({"seed": 1}));
        w.write_telemetry_row(row(0.));
        w.push_event(event());
        let out = w.finalize();
        assert!(out.telemetry.is_none());
        assert!(out.events.is_none());
        assert_eq!(out.meta["seed"], json!(1));
        let v = serde_json::to_value(&out).unwrap();
        assert!(v.get("telemetry").is_none());
        assert!(v.get("events").is_none());
    }

    #[test]
    fn batches_follow_time_slots() {
        let mut w = BatchWriter::new(60);
        for ts in [120., 121., 179., 180., 240.5] {
            w.write_telemetry_row(row(ts));
        }
        let out = w.finalize();
        let batches = out.batches.as_ref().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches["0"].time_slot, 2);
        assert_eq!(batches["0"].frames.len(), 3);
        assert_eq!((batches["0"].start_time, batches["0"].end_time), (120., 179.));
        assert_eq!(batches["2"].time_slot, 4);
        assert_eq!(out.meta["total_frames"], json!(5));
        assert_eq!(out.meta["total_batches"], json!(3));
        assert_eq!(out.meta["batch_keys"], json!([0, 1, 2]));
        assert_eq!(out.meta["start_timestamp"], json!(120.));
        assert_eq!(out.meta["end_timestamp"], json!(240.5));
        assert_eq!(out.meta["frame_interval"], json!(1));
        assert_eq!(out.rows().count(), 5);
    }

    #[test]
    fn csv_files_have_headers() {
        let mut w = SimpleWriter::new();
        w.write_telemetry_row(row(0.));
        w.push_event(event().with_truck(2, "TR-2"));
        let out = w.finalize();
        let dir = tempfile::tempdir().unwrap();
        out.write_csv(dir.path()).unwrap();
        let telemetry = std::fs::read_to_string(dir.path().join("telemetry.csv")).unwrap();
        let mut lines = telemetry.lines();
        assert!(lines.next().unwrap().starts_with("timestamp,object_id,object_type"));
        assert!(lines.next().unwrap().contains("TR-2;TR-3"));
        let events = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
        assert_eq!(events.lines().count(), 2);
        assert!(events.contains("TR-2"));
    }
}
