//! Quarry-wide blasting watcher.

use std::collections::BTreeSet;

use crate::engine::events::EventKind;
use crate::geometry::Polygon;
use crate::props::{Blasting, SimData};
use crate::routing::{Endpoint, RoadNet};

/// Tracks which blasts are active. Every change of the active set bumps `generation`, which
/// actors compare against the generation they last saw.
#[derive(Debug, Clone, Default)]
pub struct BlastWatch {
    pending: Vec<Blasting>,
    active: BTreeSet<u32>,
    polygons: Vec<Polygon>,
    generation: u64,
}

impl BlastWatch {
    pub fn new(data: &SimData) -> Self {
        let mut pending = data.blasting.clone();
        pending.sort_by_key(|b| (b.start, b.id));
        BlastWatch { pending, ..Default::default() }
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advances to `now` and returns the begin and end events of the blasts that changed,
    /// ends first.
    pub fn update(&mut self, data: &SimData, now: u64) -> Vec<(EventKind, Blasting)> {
        if self.is_finished() {
            return Vec::new();
        }
        let at = data.at_offset(now);
        let now_active: BTreeSet<u32> = self.pending.iter().filter(|b| b.start <= at && at < b.end).map(|b| b.id).collect();

        let mut changes = Vec::new();
        for b in self.pending.iter().filter(|b| self.active.contains(&b.id) && !now_active.contains(&b.id)) {
            changes.push((EventKind::BlastingEnd, b.clone()));
        }
        for b in self.pending.iter().filter(|b| now_active.contains(&b.id) && !self.active.contains(&b.id)) {
            changes.push((EventKind::BlastingBegin, b.clone()));
        }
        self.pending.retain(|b| b.end > at);

        if !changes.is_empty() {
            self.polygons = self
                .pending
                .iter()
                .filter(|b| now_active.contains(&b.id))
                .flat_map(|b| b.zones.iter().cloned())
                .collect();
            self.active = now_active;
            self.generation += 1;
        }
        changes
    }
}

/// Whether `from` can still reach any of `targets` without crossing an active zone.
pub fn any_safe_path(net: &dyn RoadNet, from: &Endpoint, targets: &[Endpoint], polygons: &[Polygon]) -> bool {
    targets.iter().any(|to| net.route_avoiding(from, to, polygons).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with_blast() -> SimData {
        let mut data = crate::test_support::tiny_sim_data();
        let zone = Polygon::from_lon_lat(&[[0.014, -0.001], [0.016, -0.001], [0.016, 0.001], [0.014, 0.001]]);
        data.blasting.push(Blasting {
            id: 3,
            zones: vec![zone],
            start: data.at_offset(10),
            end: data.at_offset(20),
        });
        data
    }

    #[test]
    fn begin_and_end_once() {
        let data = data_with_blast();
        let mut w = BlastWatch::new(&data);
        assert!(w.update(&data, 5).is_empty());
        let begin = w.update(&data, 10);
        assert_eq!(begin.len(), 1);
        assert_eq!(begin[0].0, EventKind::BlastingBegin);
        assert!(w.is_active());
        assert_eq!(w.polygons().len(), 1);
        assert!(w.update(&data, 15).is_empty());
        let end = w.update(&data, 20);
        assert_eq!((end[0].0, end[0].1.id), (EventKind::BlastingEnd, 3));
        assert!(w.polygons().is_empty());
        assert!(w.is_finished());
        assert_eq!(w.generation(), 2);
    }

    #[test]
    fn blocked_road_has_no_safe_path() {
        use crate::props::{ObjectKind, ObjectRef};
        let data = data_with_blast();
        let mut w = BlastWatch::new(&data);
        w.update(&data, 12);
        let shovel = Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, 1));
        let unload = Endpoint::Object(ObjectRef::new(ObjectKind::Unload, 1));
        assert!(!any_safe_path(data.road_net.as_ref(), &shovel, &[unload], w.polygons()));
        assert!(any_safe_path(data.road_net.as_ref(), &shovel, &[unload], &[]));
    }
}
