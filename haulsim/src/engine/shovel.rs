use crate::calc::shovel::{self, LoadCycle};
use crate::common::DistributionFactory;
use crate::engine::behaviors::{Breakdown, WindowSignal, WindowWatch};
use crate::engine::events::EventKind;
use crate::engine::resource::Resource;
use crate::engine::states::ShovelState;
use crate::engine::telemetry::{ShovelRow, round_to};
use crate::error::EngineError;
use crate::props::{ObjectKind, ObjectRef, Shovel, ShovelProperties, TruckProperties};

#[derive(Debug)]
pub struct ShovelActor {
    pub id: u32,
    pub name: String,
    pub position: crate::geometry::Point,
    pub properties: ShovelProperties,
    /// One truck under the bucket at a time.
    pub bay: Resource,
    pub breakdown: Option<Breakdown>,
    pub planned_idle: WindowWatch,
    pub at_planned_idle: bool,
    pub in_blasting_idle: bool,
    pub state: ShovelState,
}

impl ShovelActor {
    pub fn new(shovel: &Shovel, breakdowns: bool, planned_idle: Vec<(u64, u64)>, df: &mut DistributionFactory) -> Result<Self, EngineError> {
        let breakdown = if breakdowns { Some(Breakdown::new(shovel.properties.reliability, df)?) } else { None };
        Ok(ShovelActor {
            id: shovel.id,
            name: shovel.name.clone(),
            position: shovel.position,
            properties: shovel.properties.clone(),
            bay: Resource::new(1),
            breakdown,
            planned_idle: WindowWatch::new(planned_idle),
            at_planned_idle: false,
            in_blasting_idle: false,
            state: ShovelState::Waiting,
        })
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::Shovel, self.id)
    }

    pub fn is_broken(&self) -> bool {
        self.breakdown.as_ref().is_some_and(Breakdown::is_broken)
    }

    /// Cumulative weight and volume after each bucket for the given truck.
    pub fn cycles_for(&self, truck: &TruckProperties) -> Vec<LoadCycle> {
        shovel::load_cycles_cumulative(&self.properties, truck)
    }

    /// Advances breakdown and planned idle by one second. `loading` tells whether a truck is
    /// being loaded right now.
    pub fn behave(&mut self, now: u64, loading: bool) -> Result<Vec<EventKind>, EngineError> {
        let mut events = Vec::new();
        if let Some(b) = self.breakdown.as_mut() {
            let t = b.update(loading)?;
            if t.failed() {
                events.push(EventKind::BreakdownBegin);
            } else if t.repaired() {
                events.push(EventKind::BreakdownEnd);
            }
        }
        let eligible = self.state == ShovelState::Waiting;
        match self.planned_idle.update(now, eligible, &mut self.at_planned_idle) {
            Some(WindowSignal::Begin) => events.push(EventKind::PlannedIdleBegin),
            Some(WindowSignal::End) => events.push(EventKind::PlannedIdleEnd),
            None => {}
        }
        Ok(events)
    }

    pub fn refresh_state(&mut self) -> ShovelState {
        self.state = if self.is_broken() {
            ShovelState::Repair
        } else if self.in_blasting_idle {
            ShovelState::BlastingIdle
        } else if !self.bay.holders().is_empty() || self.bay.waiting().next().is_some() {
            ShovelState::Loading
        } else if self.at_planned_idle {
            ShovelState::PlannedIdle
        } else {
            ShovelState::Waiting
        };
        self.state
    }

    /// `queue` holds the names of the trucks at the bay in arrival order.
    pub fn row(&self, timestamp: f64, queue: &[String]) -> ShovelRow {
        ShovelRow {
            object_id: self.object().tag(),
            object_name: self.name.clone(),
            object_type: ObjectKind::Shovel.to_string(),
            lat: round_to(self.position.lat, 6),
            lon: round_to(self.position.lon, 6),
            state: self.state,
            timestamp,
            loading_truck: queue.first().cloned().unwrap_or_else(|| "-".into()),
            trucks_queue: queue.iter().skip(1).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ShovelActor {
        let data = crate::test_support::tiny_sim_data();
        let mut df = DistributionFactory::new(1);
        ShovelActor::new(&data.shovels[&1], false, vec![(5, 8)], &mut df).unwrap()
    }

    #[test]
    fn state_priority() {
        let mut s = actor();
        assert_eq!(s.refresh_state(), ShovelState::Waiting);
        s.at_planned_idle = true;
        assert_eq!(s.refresh_state(), ShovelState::PlannedIdle);
        s.bay.request(0);
        assert_eq!(s.refresh_state(), ShovelState::Loading);
        s.in_blasting_idle = true;
        assert_eq!(s.refresh_state(), ShovelState::BlastingIdle);
    }

    #[test]
    fn planned_idle_waits_for_a_free_shovel() {
        let mut s = actor();
        s.bay.request(0);
        s.refresh_state();
        assert!(s.behave(5, false).unwrap().is_empty());
        s.bay.release(0);
        s.refresh_state();
        assert_eq!(s.behave(6, false).unwrap(), vec![EventKind::PlannedIdleBegin]);
        assert_eq!(s.refresh_state(), ShovelState::PlannedIdle);
        assert_eq!(s.behave(8, false).unwrap(), vec![EventKind::PlannedIdleEnd]);
    }

    #[test]
    fn row_splits_loading_truck_from_queue() {
        let s = actor();
        let row = s.row(1.0, &["TR-1".into(), "TR-2".into()]);
        assert_eq!(row.object_id, "1_shovel");
        assert_eq!(row.loading_truck, "TR-1");
        assert_eq!(row.trucks_queue, vec!["TR-2".to_string()]);
        assert_eq!(s.row(1.0, &[]).loading_truck, "-");
    }

    #[test]
    fn load_cycles_fill_the_body() {
        let s = actor();
        let truck = TruckProperties::new(90., 40., 30.);
        let cycles = s.cycles_for(&truck);
        assert_eq!(cycles.len(), 5);
        let last = cycles.last().unwrap();
        assert!(last.weight <= truck.body_capacity);
        assert!(cycles.windows(2).all(|w| w[1].weight > w[0].weight));
    }
}
