use crate::geometry::Point;
use crate::props::TruckProperties;
use crate::routing::{Route, RouteEdge};

/// Where a truck is after one simulated second of driving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// km/h
    pub speed: f64,
    pub position: Point,
    pub edge: usize,
}

/// Second-by-second motion along a route. Speed builds up by `accel` km/h each second until
/// `limit` and carries over from one edge to the next; the last sample of every edge lands
/// exactly on its stop point.
#[derive(Debug, Clone)]
pub struct RouteMotion {
    edges: Vec<RouteEdge>,
    current: usize,
    travelled_km: f64,
    speed: f64,
    limit: f64,
    accel: f64,
}

impl RouteMotion {
    pub fn new(route: Route, limit: f64, accel: f64) -> Self {
        RouteMotion {
            edges: route.edges,
            current: 0,
            travelled_km: 0.,
            speed: 0.,
            limit,
            accel,
        }
    }

    /// Limit and acceleration follow the truck's load state.
    pub fn for_truck(route: Route, props: &TruckProperties, loaded: bool) -> Self {
        if loaded {
            RouteMotion::new(route, props.speed_loaded, props.acceleration_loaded)
        } else {
            RouteMotion::new(route, props.speed_empty, props.acceleration_empty)
        }
    }

    /// The untraversed part of the route, starting with the edge in progress.
    pub fn remaining(&self) -> Route {
        Route { edges: self.edges.iter().skip(self.current).copied().collect() }
    }

    pub fn destination(&self) -> Option<Point> {
        self.edges.last().map(|e| e.stop)
    }
}

impl Iterator for RouteMotion {
    type Item = MotionSample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let edge = *self.edges.get(self.current)?;
            let distance_km = edge.length_m / 1000.;
            if self.travelled_km >= distance_km {
                self.current += 1;
                self.travelled_km = 0.;
                continue;
            }
            self.speed = (self.speed + self.accel).min(self.limit);
            if self.speed <= 0. {
                return None;
            }
            self.travelled_km = (self.travelled_km + self.speed / 3600.).min(distance_km);
            let position = edge.start.interpolate(&edge.stop, self.travelled_km / distance_km);
            return Some(MotionSample { speed: self.speed, position, edge: edge.index });
        }
    }
}

/// Drive time in seconds, as the planners see it: loaded when going forward.
pub fn route_time_secs(route: &Route, props: &TruckProperties, forward: bool) -> u64 {
    let route = if forward { route.clone() } else { route.reversed() };
    RouteMotion::for_truck(route, props, forward).count() as u64
}
