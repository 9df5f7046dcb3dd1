use crate::engine::resource::Resource;
use crate::engine::states::FuelStationState;
use crate::engine::telemetry::{FuelStationRow, split_queue};
use crate::geometry::Point;
use crate::props::{FuelStation, ObjectKind, ObjectRef};

#[derive(Debug)]
pub struct FuelStationActor {
    pub id: u32,
    pub name: String,
    pub position: Point,
    pub num_pumps: usize,
    /// Litres per second.
    pub flow_rate: f64,
    pub pumps: Resource,
    pub state: FuelStationState,
}

impl FuelStationActor {
    pub fn new(station: &FuelStation) -> Self {
        FuelStationActor {
            id: station.id,
            name: station.name.clone(),
            position: station.position,
            num_pumps: station.properties.num_pumps,
            flow_rate: station.properties.flow_rate,
            pumps: Resource::new(station.properties.num_pumps),
            state: FuelStationState::Waiting,
        }
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::FuelStation, self.id)
    }

    /// Seconds at the pump to top up from `fuel` to `capacity`.
    pub fn refuel_secs(&self, fuel: f64, capacity: f64) -> u64 {
        if self.flow_rate > 0. { ((capacity - fuel).max(0.) / self.flow_rate).floor() as u64 } else { 0 }
    }

    pub fn refresh_state(&mut self) -> FuelStationState {
        let busy = !self.pumps.holders().is_empty() || self.pumps.waiting().next().is_some();
        self.state = if busy { FuelStationState::Refueling } else { FuelStationState::Waiting };
        self.state
    }

    pub fn row(&self, timestamp: f64, queue: &[String]) -> FuelStationRow {
        let (refuelling_trucks, trucks_queue) = split_queue(queue, self.num_pumps);
        FuelStationRow {
            object_id: self.object().tag(),
            object_type: ObjectKind::FuelStation.to_string(),
            timestamp,
            refuelling_trucks,
            trucks_queue,
            state: self.state,
        }
    }
}

/// The station a truck heads for: the nearest in a straight line when there are more than
/// two, otherwise the first.
pub fn pick_station(stations: &[FuelStationActor], from: &Point) -> Option<usize> {
    if stations.len() > 2 {
        stations
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| from.haversine_m(&a.position).total_cmp(&from.haversine_m(&b.position)))
            .map(|(k, _)| k)
    } else if stations.is_empty() {
        None
    } else {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::FuelStationProperties;

    fn station(id: u32, lon: f64) -> FuelStationActor {
        FuelStationActor::new(&FuelStation {
            id,
            name: format!("FS-{id}"),
            position: Point::new(0., lon),
            properties: FuelStationProperties { num_pumps: 1, flow_rate: 2. },
        })
    }

    #[test]
    fn refuel_time_is_floored() {
        let s = station(1, 0.);
        assert_eq!(s.refuel_secs(995., 1000.), 2);
        assert_eq!(s.refuel_secs(1000., 1000.), 0);
    }

    #[test]
    fn busy_while_anyone_queued() {
        let mut s = station(1, 0.);
        assert_eq!(s.refresh_state(), FuelStationState::Waiting);
        s.pumps.request(3);
        s.pumps.request(4);
        assert_eq!(s.refresh_state(), FuelStationState::Refueling);
        let row = s.row(0., &["a".into(), "b".into()]);
        assert_eq!(row.refuelling_trucks, vec!["a".to_string()]);
        assert_eq!(row.trucks_queue, vec!["b".to_string()]);
        assert_eq!(row.object_id, "1_fuel_station");
    }

    #[test]
    fn station_choice() {
        let here = Point::new(0., 0.03);
        let two = [station(1, 0.), station(2, 0.03)];
        assert_eq!(pick_station(&two, &here), Some(0));
        let three = [station(1, 0.), station(2, 0.03), station(3, 0.01)];
        assert_eq!(pick_station(&three, &here), Some(1));
        assert_eq!(pick_station(&[], &here), None);
    }
}
