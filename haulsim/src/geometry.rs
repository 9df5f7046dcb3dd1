use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Point { lat, lon }
    }

    /// Great-circle distance in metres.
    pub fn haversine_m(&self, other: &Point) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.).sin().powi(2);
        2. * EARTH_RADIUS_M * a.sqrt().atan2((1. - a).sqrt())
    }

    /// Linear interpolation. A ratio of 1 or more returns `to` exactly.
    pub fn interpolate(&self, to: &Point, ratio: f64) -> Point {
        if ratio >= 1. {
            return *to;
        }
        if ratio <= 0. {
            return *self;
        }
        Point {
            lat: self.lat + (to.lat - self.lat) * ratio,
            lon: self.lon + (to.lon - self.lon) * ratio,
        }
    }
}

/// A closed ring of points. The closing edge from the last point back to the first is implied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<Point>,
}

impl Polygon {
    /// Builds a polygon from GeoJSON `[lon, lat]` coordinate pairs.
    pub fn from_lon_lat(coords: &[[f64; 2]]) -> Self {
        Polygon {
            ring: coords.iter().map(|c| Point::new(c[1], c[0])).collect(),
        }
    }

    fn edges(&self) -> impl Iterator<Item = (&Point, &Point)> {
        let n = self.ring.len();
        (0..n).map(move |i| (&self.ring[i], &self.ring[(i + 1) % n]))
    }

    /// Even-odd rule on (lon, lat) as planar coordinates.
    pub fn contains(&self, p: &Point) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.lat > p.lat) != (b.lat > p.lat) {
                let x = a.lon + (p.lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon);
                if p.lon < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// True when the segment touches the polygon: it crosses a boundary edge or an end lies inside.
    pub fn intersects_segment(&self, a: &Point, b: &Point) -> bool {
        if self.ring.len() < 3 {
            return false;
        }
        self.contains(a) || self.contains(b) || self.edges().any(|(c, d)| segments_intersect(a, b, c, d))
    }
}

fn orientation(p: &Point, q: &Point, r: &Point) -> f64 {
    (q.lon - p.lon) * (r.lat - p.lat) - (q.lat - p.lat) * (r.lon - p.lon)
}

fn on_segment(p: &Point, q: &Point, r: &Point) -> bool {
    r.lon >= p.lon.min(q.lon) && r.lon <= p.lon.max(q.lon) && r.lat >= p.lat.min(q.lat) && r.lat <= p.lat.max(q.lat)
}

pub fn segments_intersect(p1: &Point, p2: &Point, p3: &Point, p4: &Point) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);

    if ((d1 > 0. && d2 < 0.) || (d1 < 0. && d2 > 0.)) && ((d3 > 0. && d4 < 0.) || (d3 < 0. && d4 > 0.)) {
        return true;
    }
    (d1 == 0. && on_segment(p3, p4, p1))
        || (d2 == 0. && on_segment(p3, p4, p2))
        || (d3 == 0. && on_segment(p1, p2, p3))
        || (d4 == 0. && on_segment(p1, p2, p4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::from_lon_lat(&[[0., 0.], [1., 0.], [1., 1.], [0., 1.]])
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = Point::new(0., 0.).haversine_m(&Point::new(1., 0.));
        assert!((d - 111_195.).abs() < 10.);
    }

    #[test]
    fn interpolate_lands_on_stop() {
        let a = Point::new(0.1, 0.1);
        let b = Point::new(0.3, 0.7);
        assert_eq!(a.interpolate(&b, 1.), b);
        assert_eq!(a.interpolate(&b, 0.), a);
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.lat - 0.2).abs() < 1e-12);
    }

    #[test]
    fn polygon_contains_and_crossing() {
        let sq = square();
        assert!(sq.contains(&Point::new(0.5, 0.5)));
        assert!(!sq.contains(&Point::new(1.5, 0.5)));
        assert!(sq.intersects_segment(&Point::new(0.5, -1.), &Point::new(0.5, 2.)));
        assert!(sq.intersects_segment(&Point::new(0.5, 0.5), &Point::new(0.6, 0.6)));
        assert!(!sq.intersects_segment(&Point::new(2., 2.), &Point::new(3., 3.)));
    }
}
