use crate::calc::unload;
use crate::common::DistributionFactory;
use crate::engine::behaviors::Breakdown;
use crate::engine::events::EventKind;
use crate::engine::resource::Resource;
use crate::engine::states::UnloadState;
use crate::engine::telemetry::{UnloadRow, split_queue};
use crate::error::EngineError;
use crate::props::{ObjectKind, ObjectRef, Unload, UnloadProperties};

#[derive(Debug)]
pub struct UnloadActor {
    pub id: u32,
    pub name: String,
    pub properties: UnloadProperties,
    /// `trucks_at_once` bays.
    pub bays: Resource,
    pub breakdown: Option<Breakdown>,
    pub in_blasting_idle: bool,
    pub state: UnloadState,
}

impl UnloadActor {
    pub fn new(unload: &Unload, breakdowns: bool, df: &mut DistributionFactory) -> Result<Self, EngineError> {
        let breakdown = if breakdowns { Some(Breakdown::new(unload.properties.reliability, df)?) } else { None };
        Ok(UnloadActor {
            id: unload.id,
            name: unload.name.clone(),
            properties: unload.properties.clone(),
            bays: Resource::new(unload.properties.trucks_at_once),
            breakdown,
            in_blasting_idle: false,
            state: UnloadState::Open,
        })
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::Unload, self.id)
    }

    pub fn is_broken(&self) -> bool {
        self.breakdown.as_ref().is_some_and(Breakdown::is_broken)
    }

    /// Whole seconds needed to tip `volume`.
    pub fn unload_secs(&self, volume: f64) -> u64 {
        let total = unload::cycle(&self.properties, volume).total;
        if total.is_finite() && total > 0. { total.floor() as u64 } else { 0 }
    }

    /// Wears only while a truck is tipping.
    pub fn behave(&mut self, unloading: bool) -> Result<Vec<EventKind>, EngineError> {
        let Some(b) = self.breakdown.as_mut() else {
            return Ok(Vec::new());
        };
        let t = b.update(self.state == UnloadState::Open && unloading)?;
        Ok(if t.failed() {
            vec![EventKind::BreakdownBegin]
        } else if t.repaired() {
            vec![EventKind::BreakdownEnd]
        } else {
            Vec::new()
        })
    }

    pub fn refresh_state(&mut self) -> UnloadState {
        self.state = if self.is_broken() {
            UnloadState::Repair
        } else if self.in_blasting_idle {
            UnloadState::BlastingIdle
        } else {
            UnloadState::Open
        };
        self.state
    }

    pub fn row(&self, timestamp: f64, queue: &[String]) -> UnloadRow {
        let (unloading_trucks, trucks_queue) = split_queue(queue, self.properties.trucks_at_once);
        UnloadRow {
            object_id: self.object().tag(),
            object_type: ObjectKind::Unload.to_string(),
            timestamp,
            unloading_trucks,
            trucks_queue,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::breakdown::{BreakdownInputs, BreakdownModel};
    use crate::common::Distribution;

    fn actor(trucks_at_once: usize) -> UnloadActor {
        let mut data = crate::test_support::tiny_sim_data();
        data.unloads.get_mut(&1).unwrap().properties.trucks_at_once = trucks_at_once;
        let mut df = DistributionFactory::new(1);
        UnloadActor::new(&data.unloads[&1], false, &mut df).unwrap()
    }

    #[test]
    fn unload_time_is_floored_cycle() {
        let u = actor(1);
        let exact = unload::cycle(&u.properties, 56.).total;
        assert_eq!(u.unload_secs(56.), exact.floor() as u64);
        assert!(u.unload_secs(56.) > u.unload_secs(0.));
    }

    #[test]
    fn idle_unload_does_not_wear() {
        let mut u = actor(1);
        let model = BreakdownModel::with_distributions(
            BreakdownInputs { operating_secs: 3600., mean_repair_secs: 60., failures: 1. },
            Distribution::Constant(1.),
            Distribution::Constant(1.),
        );
        u.breakdown = Some(Breakdown::from_model(model));
        for _ in 0..5 {
            assert!(u.behave(false).unwrap().is_empty());
        }
        u.behave(true).unwrap();
        assert_eq!(u.behave(true).unwrap(), vec![EventKind::BreakdownBegin]);
        assert_eq!(u.refresh_state(), UnloadState::Repair);
        assert_eq!(u.behave(false).unwrap(), vec![EventKind::BreakdownEnd]);
        assert_eq!(u.refresh_state(), UnloadState::Open);
    }

    #[test]
    fn row_serves_trucks_at_once() {
        let u = actor(2);
        let row = u.row(5., &["a".into(), "b".into(), "c".into()]);
        assert_eq!(row.unloading_trucks, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(row.trucks_queue, vec!["c".to_string()]);
        assert_eq!(row.object_id, "1_unload");
    }
}
