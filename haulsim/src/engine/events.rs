use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::props::{Blasting, ObjectKind, ObjectRef};

/// Disruption events. Begin and end of one disruption always come in pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    BreakdownBegin,
    BreakdownEnd,
    RefuelingBegin,
    RefuelingEnd,
    LunchBegin,
    LunchEnd,
    BlastingBegin,
    BlastingEnd,
    BlastingIdleBegin,
    BlastingIdleEnd,
    PlannedIdleBegin,
    PlannedIdleEnd,
}

impl EventKind {
    pub fn code(self) -> u32 {
        match self {
            EventKind::BreakdownBegin => 1,
            EventKind::BreakdownEnd => 2,
            EventKind::RefuelingBegin => 3,
            EventKind::RefuelingEnd => 4,
            EventKind::LunchBegin => 5,
            EventKind::LunchEnd => 6,
            EventKind::BlastingBegin => 7,
            EventKind::BlastingEnd => 8,
            EventKind::BlastingIdleBegin => 9,
            EventKind::BlastingIdleEnd => 10,
            EventKind::PlannedIdleBegin => 11,
            EventKind::PlannedIdleEnd => 12,
        }
    }

    pub fn is_begin(self) -> bool {
        self.code() % 2 == 1
    }
}

/// One written event. `truck_id` and `truck_name` are only set on fuel-station events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_code: u32,
    pub event_name: String,
    /// Unix seconds.
    pub time: f64,
    pub object_id: String,
    pub object_type: String,
    pub object_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truck_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truck_name: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, time: f64, object: ObjectRef, object_name: &str) -> Self {
        Event {
            event_code: kind.code(),
            event_name: kind.to_string(),
            time,
            object_id: object.tag(),
            object_type: object.kind.to_string(),
            object_name: object_name.to_string(),
            truck_id: None,
            truck_name: None,
        }
    }

    /// Refuelling events belong to the station and name the truck being served.
    pub fn with_truck(self, truck_id: u32, truck_name: &str) -> Self {
        Event { truck_id: Some(truck_id), truck_name: Some(truck_name.to_string()), ..self }
    }

    pub fn blasting(kind: EventKind, time: f64, blast: &Blasting) -> Self {
        Event {
            event_code: kind.code(),
            event_name: kind.to_string(),
            time,
            object_id: format!("{}_blasting", blast.id),
            object_type: "blasting".into(),
            object_name: format!("{} - {}", blast_stamp(blast.start), blast_stamp(blast.end)),
            truck_id: None,
            truck_name: None,
        }
    }
}

fn blast_stamp(t: DateTime<Utc>) -> String {
    t.format("%d-%m-%Y %H:%M:%S").to_string()
}

/// A disruption the quarry reacts to. Written or not, every disruption raises one, and the
/// quarry turns them into planner exclusions and inclusions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub kind: EventKind,
    pub object: ObjectRef,
}

impl Notice {
    pub fn new(kind: EventKind, object_kind: ObjectKind, id: u32) -> Self {
        Notice { kind, object: ObjectRef::new(object_kind, id) }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn codes_and_names() {
        assert_eq!(EventKind::RefuelingEnd.code(), 4);
        assert_eq!(EventKind::PlannedIdleBegin.to_string(), "planned_idle_begin");
        assert!(EventKind::LunchBegin.is_begin());
        assert!(!EventKind::BlastingIdleEnd.is_begin());
    }

    #[test]
    fn optional_truck_fields_are_skipped() {
        let e = Event::new(EventKind::BreakdownBegin, 10., ObjectRef::new(ObjectKind::Shovel, 2), "EX-2");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v.as_object().unwrap().len(), 6);
        assert_eq!(v["object_id"], "2_shovel");

        let e = Event::new(EventKind::RefuelingBegin, 10., ObjectRef::new(ObjectKind::FuelStation, 1), "FS")
            .with_truck(3, "TR-3");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v.as_object().unwrap().len(), 8);
        assert_eq!(v["object_type"], "fuel_station");
    }

    #[test]
    fn blasting_name_spans_the_window() {
        let blast = Blasting {
            id: 7,
            zones: Vec::new(),
            start: Utc.with_ymd_and_hms(2024, 5, 2, 13, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 13, 30, 0).unwrap(),
        };
        let e = Event::blasting(EventKind::BlastingBegin, 0., &blast);
        assert_eq!(e.object_id, "7_blasting");
        assert_eq!(e.object_name, "02-05-2024 13:00:00 - 02-05-2024 13:30:00");
    }
}
