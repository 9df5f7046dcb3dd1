//! Road-network oracle. The engine and planners only ever ask for routes between endpoints;
//! [`GraphRoadNet`] answers those questions over an undirected graph of haul roads.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::geometry::{Point, Polygon};
use crate::props::{ObjectKind, ObjectRef};

pub const DEFAULT_PATH_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endpoint {
    /// The vertex an actor is bound to.
    Object(ObjectRef),
    /// A position somewhere along a road edge.
    OnEdge { point: Point, edge: usize },
    /// The vertex nearest to a free point.
    At(Point),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteEdge {
    pub index: usize,
    pub start: Point,
    pub stop: Point,
    pub length_m: f64,
}

impl RouteEdge {
    pub fn reversed(&self) -> RouteEdge {
        RouteEdge {
            index: self.index,
            start: self.stop,
            stop: self.start,
            length_m: self.length_m,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Route {
    pub edges: Vec<RouteEdge>,
}

impl Route {
    pub fn length_m(&self) -> f64 {
        self.edges.iter().map(|e| e.length_m).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn reversed(&self) -> Route {
        Route {
            edges: self.edges.iter().rev().map(RouteEdge::reversed).collect(),
        }
    }

    pub fn end(&self) -> Option<Point> {
        self.edges.last().map(|e| e.stop)
    }

    pub fn intersects(&self, polygons: &[Polygon]) -> bool {
        self.edges
            .iter()
            .any(|e| polygons.iter().any(|p| p.intersects_segment(&e.start, &e.stop)))
    }
}

pub trait RoadNet: Send + Sync + Debug {
    /// Up to `limit` simple routes, shortest first.
    fn paths(&self, from: &Endpoint, to: &Endpoint, limit: usize) -> Vec<Route>;

    fn shortest(&self, from: &Endpoint, to: &Endpoint) -> Option<Route> {
        self.paths(from, to, 1).into_iter().next()
    }

    /// The shortest alternative that stays clear of every polygon.
    fn route_avoiding(&self, from: &Endpoint, to: &Endpoint, polygons: &[Polygon]) -> Option<Route> {
        self.paths(from, to, DEFAULT_PATH_LIMIT)
            .into_iter()
            .find(|r| !r.intersects(polygons))
    }

    /// Resolves an endpoint to a point on the map.
    fn locate(&self, endpoint: &Endpoint) -> Option<Point>;
}

#[derive(Debug, Clone, Deserialize)]
struct RawVertex {
    id: u64,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEdge {
    from: u64,
    to: u64,
    length: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawObject {
    #[serde(rename = "type")]
    kind: ObjectKind,
    id: u32,
    vertex: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawGraph {
    vertices: Vec<RawVertex>,
    edges: Vec<RawEdge>,
    #[serde(default)]
    objects: Vec<RawObject>,
}

#[derive(Debug, Clone)]
struct GraphEdge {
    a: usize,
    b: usize,
    length_m: f64,
}

/// Undirected haul-road graph with actors pinned to vertices.
#[derive(Debug, Clone)]
pub struct GraphRoadNet {
    vertices: Vec<Point>,
    edges: Vec<GraphEdge>,
    adjacency: Vec<Vec<(usize, usize)>>,
    objects: BTreeMap<ObjectRef, usize>,
}

impl GraphRoadNet {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, InputError> {
        let raw: RawGraph = serde_json::from_value(value.clone())?;
        let index: HashMap<u64, usize> = raw.vertices.iter().enumerate().map(|(i, v)| (v.id, i)).collect();
        if index.len() != raw.vertices.len() {
            return Err(InputError::Routing("duplicate vertex id".into()));
        }
        let vertex = |id: u64| {
            index.get(&id).copied().ok_or_else(|| InputError::Routing(format!("unknown vertex {}", id)))
        };

        let mut net = GraphRoadNet {
            vertices: raw.vertices.iter().map(|v| Point::new(v.lat, v.lon)).collect(),
            edges: Vec::with_capacity(raw.edges.len()),
            adjacency: vec![Vec::new(); raw.vertices.len()],
            objects: BTreeMap::new(),
        };
        for e in &raw.edges {
            let (a, b) = (vertex(e.from)?, vertex(e.to)?);
            let length_m = match e.length {
                Some(l) if l.is_finite() && l >= 0. => l,
                Some(l) => return Err(InputError::Routing(format!("invalid edge length {}", l))),
                None => net.vertices[a].haversine_m(&net.vertices[b]),
            };
            net.add_edge(a, b, length_m);
        }
        for o in &raw.objects {
            net.objects.insert(ObjectRef::new(o.kind, o.id), vertex(o.vertex)?);
        }
        Ok(net)
    }

    pub fn new() -> Self {
        GraphRoadNet {
            vertices: Vec::new(),
            edges: Vec::new(),
            adjacency: Vec::new(),
            objects: BTreeMap::new(),
        }
    }

    pub fn add_vertex(&mut self, point: Point) -> usize {
        self.vertices.push(point);
        self.adjacency.push(Vec::new());
        self.vertices.len() - 1
    }

    pub fn add_edge(&mut self, a: usize, b: usize, length_m: f64) -> usize {
        let idx = self.edges.len();
        self.edges.push(GraphEdge { a, b, length_m });
        self.adjacency[a].push((b, idx));
        if a != b {
            self.adjacency[b].push((a, idx));
        }
        idx
    }

    pub fn bind(&mut self, obj: ObjectRef, vertex: usize) {
        self.objects.insert(obj, vertex);
    }

    pub fn has_object(&self, obj: &ObjectRef) -> bool {
        self.objects.contains_key(obj)
    }

    pub fn vertex_point(&self, vertex: usize) -> Option<Point> {
        self.vertices.get(vertex).copied()
    }

    /// Index of the first edge touching the vertex, used to seat an actor on the network.
    pub fn edge_at(&self, vertex: usize) -> Option<usize> {
        self.adjacency.get(vertex).and_then(|adj| adj.first()).map(|(_, e)| *e)
    }

    pub fn object_vertex(&self, obj: &ObjectRef) -> Option<usize> {
        self.objects.get(obj).copied()
    }

    pub fn nearest_vertex(&self, p: &Point) -> Option<usize> {
        self.vertices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.haversine_m(p).total_cmp(&b.haversine_m(p)))
            .map(|(i, _)| i)
    }

    /// Partial hops from a point on an edge to each of the edge's end vertices.
    fn edge_anchors(&self, point: Point, edge: usize) -> Vec<(usize, Option<RouteEdge>)> {
        let Some(e) = self.edges.get(edge) else {
            return Vec::new();
        };
        let (pa, pb) = (self.vertices[e.a], self.vertices[e.b]);
        let (da, db) = (point.haversine_m(&pa), point.haversine_m(&pb));
        let total = da + db;
        let share = |d: f64| if total > 0. { e.length_m * d / total } else { 0. };
        [(e.a, pa, share(da)), (e.b, pb, share(db))]
            .into_iter()
            .map(|(v, vp, len)| {
                let hop = (len > 0.).then_some(RouteEdge { index: edge, start: point, stop: vp, length_m: len });
                (v, hop)
            })
            .collect()
    }

    fn anchors(&self, endpoint: &Endpoint) -> Vec<(usize, Option<RouteEdge>)> {
        match endpoint {
            Endpoint::Object(obj) => self.object_vertex(obj).map(|v| vec![(v, None)]).unwrap_or_default(),
            Endpoint::At(p) => self.nearest_vertex(p).map(|v| vec![(v, None)]).unwrap_or_default(),
            Endpoint::OnEdge { point, edge } => self.edge_anchors(*point, *edge),
        }
    }
}

impl Default for GraphRoadNet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct Cost(f64);

impl Eq for Cost {}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Hop {
    Graph(usize),
    Virtual(Option<RouteEdge>),
}

/// The road graph plus a virtual source and sink wired to the query's anchors.
struct Augmented<'a> {
    net: &'a GraphRoadNet,
    source: usize,
    sink: usize,
    out_of_source: Vec<(usize, f64, usize, Hop)>,
    into_sink: Vec<(usize, f64, usize, Hop)>,
}

#[derive(Debug, Clone, PartialEq)]
struct VPath {
    nodes: Vec<usize>,
    keys: Vec<usize>,
    cost: f64,
}

impl<'a> Augmented<'a> {
    fn new(net: &'a GraphRoadNet, from: &Endpoint, to: &Endpoint) -> Self {
        let n = net.vertices.len();
        let (source, sink) = (n, n + 1);
        let mut key = net.edges.len();
        let mut out_of_source = Vec::new();
        for (v, hop) in net.anchors(from) {
            out_of_source.push((v, hop.map(|h| h.length_m).unwrap_or(0.), key, Hop::Virtual(hop)));
            key += 1;
        }
        let mut into_sink = Vec::new();
        for (v, hop) in net.anchors(to) {
            let hop = hop.map(|h| h.reversed());
            into_sink.push((v, hop.map(|h| h.length_m).unwrap_or(0.), key, Hop::Virtual(hop)));
            key += 1;
        }
        Augmented { net, source, sink, out_of_source, into_sink }
    }

    fn neighbours(&self, u: usize, mut visit: impl FnMut(usize, f64, usize)) {
        if u == self.source {
            for (v, c, k, _) in &self.out_of_source {
                visit(*v, *c, *k);
            }
            return;
        }
        if u == self.sink {
            return;
        }
        for (v, e) in &self.net.adjacency[u] {
            visit(*v, self.net.edges[*e].length_m, *e);
        }
        for (v, c, k, _) in &self.into_sink {
            if *v == u {
                visit(self.sink, *c, *k);
            }
        }
    }

    fn dijkstra(&self, from: usize, banned_nodes: &BTreeSet<usize>, banned_keys: &BTreeSet<(usize, usize)>) -> Option<VPath> {
        let total = self.net.vertices.len() + 2;
        let mut dist = vec![f64::INFINITY; total];
        let mut prev: Vec<Option<(usize, usize)>> = vec![None; total];
        let mut heap = BinaryHeap::new();
        dist[from] = 0.;
        heap.push(Reverse((Cost(0.), from)));
        while let Some(Reverse((Cost(d), u))) = heap.pop() {
            if d > dist[u] {
                continue;
            }
            if u == self.sink {
                break;
            }
            self.neighbours(u, |v, c, k| {
                if banned_nodes.contains(&v) || banned_keys.contains(&(u, k)) {
                    return;
                }
                let nd = d + c;
                if nd < dist[v] {
                    dist[v] = nd;
                    prev[v] = Some((u, k));
                    heap.push(Reverse((Cost(nd), v)));
                }
            });
        }
        if !dist[self.sink].is_finite() {
            return None;
        }
        let mut nodes = vec![self.sink];
        let mut keys = Vec::new();
        let mut cur = self.sink;
        while let Some((p, k)) = prev[cur] {
            nodes.push(p);
            keys.push(k);
            cur = p;
            if cur == from {
                break;
            }
        }
        nodes.reverse();
        keys.reverse();
        Some(VPath { nodes, keys, cost: dist[self.sink] })
    }

    fn hop_cost(&self, u: usize, key: usize) -> f64 {
        if key < self.net.edges.len() {
            return self.net.edges[key].length_m;
        }
        self.out_of_source
            .iter()
            .chain(self.into_sink.iter())
            .find(|(_, _, k, _)| *k == key)
            .map(|(_, c, _, _)| *c)
            .unwrap_or_else(|| {
                log::warn!("unknown hop key {} from node {}", key, u);
                f64::INFINITY
            })
    }

    /// Yen's k shortest loopless paths from the virtual source to the virtual sink.
    fn k_shortest(&self, limit: usize) -> Vec<VPath> {
        let mut accepted: Vec<VPath> = Vec::new();
        let Some(first) = self.dijkstra(self.source, &BTreeSet::new(), &BTreeSet::new()) else {
            return accepted;
        };
        accepted.push(first);
        let mut candidates: Vec<VPath> = Vec::new();

        while accepted.len() < limit {
            let Some(last) = accepted.last().cloned() else { break };
            for i in 0..last.nodes.len().saturating_sub(1) {
                let spur = last.nodes[i];
                let root_nodes = &last.nodes[..=i];
                let root_keys = &last.keys[..i];

                let mut banned_keys = BTreeSet::new();
                for p in accepted.iter().chain(candidates.iter()) {
                    if p.nodes.len() > i + 1 && &p.nodes[..=i] == root_nodes && &p.keys[..i] == root_keys {
                        banned_keys.insert((spur, p.keys[i]));
                    }
                }
                let banned_nodes: BTreeSet<usize> = root_nodes[..i].iter().copied().collect();

                if let Some(spur_path) = self.dijkstra(spur, &banned_nodes, &banned_keys) {
                    let mut nodes = root_nodes[..i].to_vec();
                    nodes.extend_from_slice(&spur_path.nodes);
                    let mut keys = root_keys.to_vec();
                    keys.extend_from_slice(&spur_path.keys);
                    let root_cost: f64 = (0..i).map(|j| self.hop_cost(nodes[j], keys[j])).sum();
                    let candidate = VPath { nodes, keys, cost: root_cost + spur_path.cost };
                    if !candidates.contains(&candidate) && !accepted.iter().any(|a| a.keys == candidate.keys && a.nodes == candidate.nodes) {
                        candidates.push(candidate);
                    }
                }
            }
            if candidates.is_empty() {
                break;
            }
            let best = candidates
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.cost.total_cmp(&b.cost))
                .map(|(i, _)| i);
            match best {
                Some(i) => accepted.push(candidates.swap_remove(i)),
                None => break,
            }
        }
        accepted
    }

    fn to_route(&self, path: &VPath) -> Route {
        let mut edges = Vec::with_capacity(path.keys.len());
        for (j, key) in path.keys.iter().enumerate() {
            let hop = if *key < self.net.edges.len() {
                Hop::Graph(*key)
            } else {
                self.out_of_source
                    .iter()
                    .chain(self.into_sink.iter())
                    .find(|(_, _, k, _)| k == key)
                    .map(|(_, _, _, h)| *h)
                    .unwrap_or(Hop::Virtual(None))
            };
            match hop {
                Hop::Graph(e) => {
                    let (u, v) = (path.nodes[j], path.nodes[j + 1]);
                    edges.push(RouteEdge {
                        index: e,
                        start: self.net.vertices[u],
                        stop: self.net.vertices[v],
                        length_m: self.net.edges[e].length_m,
                    });
                }
                Hop::Virtual(Some(partial)) => edges.push(partial),
                Hop::Virtual(None) => {}
            }
        }
        Route { edges }
    }
}

impl RoadNet for GraphRoadNet {
    fn paths(&self, from: &Endpoint, to: &Endpoint, limit: usize) -> Vec<Route> {
        if limit == 0 || self.vertices.is_empty() {
            return Vec::new();
        }
        let aug = Augmented::new(self, from, to);
        if aug.out_of_source.is_empty() || aug.into_sink.is_empty() {
            return Vec::new();
        }
        let mut routes: Vec<Route> = Vec::new();
        for path in aug.k_shortest(limit) {
            let route = aug.to_route(&path);
            if !routes.contains(&route) {
                routes.push(route);
            }
        }
        routes
    }

    fn locate(&self, endpoint: &Endpoint) -> Option<Point> {
        match endpoint {
            Endpoint::Object(obj) => self.object_vertex(obj).and_then(|v| self.vertex_point(v)),
            Endpoint::At(p) => self.nearest_vertex(p).and_then(|v| self.vertex_point(v)),
            Endpoint::OnEdge { point, .. } => Some(*point),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A square with a diagonal: 0-1-2 along the bottom and right, 0-3-2 along the left and
    /// top, and a direct 0-2 diagonal.
    fn square() -> GraphRoadNet {
        let mut net = GraphRoadNet::new();
        let v0 = net.add_vertex(Point::new(0., 0.));
        let v1 = net.add_vertex(Point::new(0., 0.01));
        let v2 = net.add_vertex(Point::new(0.01, 0.01));
        let v3 = net.add_vertex(Point::new(0.01, 0.));
        net.add_edge(v0, v1, 1000.);
        net.add_edge(v1, v2, 1000.);
        net.add_edge(v0, v3, 1200.);
        net.add_edge(v3, v2, 1200.);
        net.add_edge(v0, v2, 1500.);
        net.bind(ObjectRef::new(ObjectKind::Shovel, 1), v0);
        net.bind(ObjectRef::new(ObjectKind::Unload, 1), v2);
        net
    }

    fn shovel() -> Endpoint {
        Endpoint::Object(ObjectRef::new(ObjectKind::Shovel, 1))
    }

    fn unload() -> Endpoint {
        Endpoint::Object(ObjectRef::new(ObjectKind::Unload, 1))
    }

    #[test]
    fn shortest_takes_diagonal() {
        let net = square();
        let route = net.shortest(&shovel(), &unload()).unwrap();
        assert_eq!(route.edges.len(), 1);
        assert_eq!(route.length_m(), 1500.);
        assert_eq!(route.end(), Some(Point::new(0.01, 0.01)));
    }

    #[test]
    fn alternatives_are_sorted_and_distinct() {
        let net = square();
        let routes = net.paths(&shovel(), &unload(), 8);
        let lengths: Vec<f64> = routes.iter().map(|r| r.length_m()).collect();
        assert_eq!(lengths, vec![1500., 2000., 2400.]);
    }

    #[test]
    fn start_on_edge_uses_partial_hop() {
        let net = square();
        // halfway along 0-1, heading to the unload at vertex 2
        let from = Endpoint::OnEdge { point: Point::new(0., 0.005), edge: 0 };
        let route = net.shortest(&from, &unload()).unwrap();
        assert_eq!(route.edges[0].index, 0);
        assert_eq!(route.edges[0].start, Point::new(0., 0.005));
        assert!((route.length_m() - 1500.).abs() < 1.);
    }

    #[test]
    fn same_vertex_gives_empty_route() {
        let net = square();
        let route = net.shortest(&shovel(), &Endpoint::At(Point::new(0.0001, 0.))).unwrap();
        assert!(route.is_empty());
    }

    #[test]
    fn route_avoiding_polygon() {
        let net = square();
        // a small box around the middle of the diagonal
        let blast = Polygon::from_lon_lat(&[[0.004, 0.004], [0.006, 0.004], [0.006, 0.006], [0.004, 0.006]]);
        let route = net.route_avoiding(&shovel(), &unload(), &[blast]).unwrap();
        assert_eq!(route.length_m(), 2000.);
    }

    #[test]
    fn reversed_route_swaps_ends() {
        let net = square();
        let route = net.paths(&shovel(), &unload(), 2).pop().unwrap();
        let back = route.reversed();
        assert_eq!(back.edges.first().unwrap().start, Point::new(0.01, 0.01));
        assert_eq!(back.end(), Some(Point::new(0., 0.)));
    }

    #[test]
    fn parses_json_graph() {
        let json = serde_json::json!({
            "vertices": [{"id": 10, "lat": 0.0, "lon": 0.0}, {"id": 11, "lat": 0.0, "lon": 0.01}],
            "edges": [{"from": 10, "to": 11}],
            "objects": [{"type": "fuel_station", "id": 4, "vertex": 11}]
        });
        let net = GraphRoadNet::from_json(&json).unwrap();
        let route = net
            .shortest(&Endpoint::At(Point::new(0., 0.)), &Endpoint::Object(ObjectRef::new(ObjectKind::FuelStation, 4)))
            .unwrap();
        assert!((route.length_m() - 1112.).abs() < 2.);
    }
}
