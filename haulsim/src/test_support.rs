use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::geometry::Point;
use crate::props::{
    IdleArea, IdleAreaStorage, ObjectKind, ObjectRef, Shovel, ShovelProperties, SimData, Truck, TruckProperties, Unload,
    UnloadProperties, UnloadType,
};
use crate::routing::GraphRoadNet;

/// One truck, one shovel and one unload on a straight two-edge road, with the garage at the
/// far end from the dump. One hour long.
pub(crate) fn tiny_sim_data() -> SimData {
    let mut net = GraphRoadNet::new();
    let garage = net.add_vertex(Point::new(0., 0.));
    let face = net.add_vertex(Point::new(0., 0.01));
    let dump = net.add_vertex(Point::new(0., 0.02));
    net.add_edge(garage, face, 1000.);
    net.add_edge(face, dump, 1500.);
    net.bind(ObjectRef::new(ObjectKind::IdleArea, 1), garage);
    net.bind(ObjectRef::new(ObjectKind::Shovel, 1), face);
    net.bind(ObjectRef::new(ObjectKind::Unload, 1), dump);

    let truck = Truck {
        id: 1,
        name: "TR-1".into(),
        position: Point::new(0., 0.),
        edge: None,
        properties: TruckProperties::new(90., 40., 30.),
    };
    let shovel = Shovel {
        id: 1,
        name: "EX-1".into(),
        position: Point::new(0., 0.01),
        properties: ShovelProperties::new(12., 1., 0.5, 0.5, 0.5),
    };
    let unload = Unload {
        id: 1,
        name: "DUMP-1".into(),
        position: Point::new(0., 0.02),
        properties: UnloadProperties::new(30., UnloadType::Hydraulic),
    };
    let garage_area = IdleArea {
        id: 1,
        name: "Garage".into(),
        position: Point::new(0., 0.),
        is_shift_change_area: true,
        is_lunch_area: false,
        is_planned_idle_area: false,
        is_blast_waiting_area: false,
    };
    let start_time = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    SimData {
        start_time,
        end_time: start_time + chrono::Duration::hours(1),
        seed: Some(1),
        utc_offset_minutes: 0,
        trucks: BTreeMap::from([(1, truck)]),
        shovels: BTreeMap::from([(1, shovel)]),
        unloads: BTreeMap::from([(1, unload)]),
        fuel_stations: BTreeMap::new(),
        idle_areas: IdleAreaStorage { areas: vec![garage_area] },
        trails: Vec::new(),
        road_net: Arc::new(net),
        lunch_times: Vec::new(),
        planned_idles: BTreeMap::new(),
        blasting: Vec::new(),
        target_shovel_load: 0.9,
    }
}
