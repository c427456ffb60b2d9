//! DenseGraph: the authoritative graph the CSR topology is derived from.
//!
//! Every undirected edge is stored twice, once in each endpoint's sorted
//! adjacency list. Structural changes (edge insertion/removal) bump the
//! topology epoch; weight changes do not.

use smallvec::SmallVec;

use super::{DyingEdge, Edge, Neighbor, NodeId, NodeState, PLANCK_THRESHOLD};
use crate::{Error, Result};

/// Inline capacity of a node's adjacency list.
pub type AdjacencyList = SmallVec<[Neighbor; 8]>;

#[derive(Debug, Clone, Default)]
pub struct DenseGraph {
    nodes: Vec<NodeState>,
    adjacency: Vec<AdjacencyList>,
    epoch: u64,
}

impl DenseGraph {
    /// A graph of `node_count` default nodes and no edges.
    pub fn new(node_count: usize) -> Self {
        let nodes = (0..node_count)
            .map(|i| NodeState::new(NodeId(i as u32)))
            .collect();
        Self::from_nodes(nodes)
    }

    /// Build from externally prepared node states. Ids are reassigned to the
    /// node's position.
    pub fn from_nodes(mut nodes: Vec<NodeState>) -> Self {
        for (i, node) in nodes.iter_mut().enumerate() {
            node.id = NodeId(i as u32);
        }
        let adjacency = vec![AdjacencyList::new(); nodes.len()];
        Self { nodes, adjacency, epoch: 0 }
    }

    /// Build from a raw adjacency description supplied by a loader.
    ///
    /// Lists are sorted but NOT validated here: an out-of-range neighbor is
    /// reported as a fatal topology error by `SparseTopology::rebuild`.
    pub fn from_adjacency(nodes: Vec<NodeState>, adjacency: Vec<Vec<Neighbor>>) -> Result<Self> {
        if adjacency.len() != nodes.len() {
            return Err(Error::InvalidArgument(format!(
                "adjacency has {} rows for {} nodes",
                adjacency.len(),
                nodes.len()
            )));
        }
        let mut graph = Self::from_nodes(nodes);
        graph.adjacency = adjacency
            .into_iter()
            .map(|row| {
                let mut row: AdjacencyList = row.into_iter().collect();
                row.sort_by_key(|n| n.node);
                row
            })
            .collect();
        Ok(graph)
    }

    /// Build from an edge list, validating every endpoint.
    pub fn from_edges(nodes: Vec<NodeState>, edges: impl IntoIterator<Item = Edge>) -> Result<Self> {
        let mut graph = Self::from_nodes(nodes);
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|row| row.len()).sum::<usize>() / 2
    }

    /// Number of stored adjacency entries (two per undirected edge).
    pub fn slot_count(&self) -> usize {
        self.adjacency.iter().map(|row| row.len()).sum()
    }

    /// Incremented on every structural change.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [NodeState] {
        &mut self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeState> {
        self.nodes.get(id.index())
    }

    pub fn adjacency(&self, id: NodeId) -> &[Neighbor] {
        self.adjacency.get(id.index()).map(|row| row.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn adjacency_mut(&mut self, id: NodeId) -> Option<&mut AdjacencyList> {
        self.adjacency.get_mut(id.index())
    }

    pub fn weight(&self, a: NodeId, b: NodeId) -> Option<f64> {
        let row = self.adjacency.get(a.index())?;
        row.binary_search_by_key(&b, |n| n.node).ok().map(|k| row[k].weight)
    }

    /// Gauge phase of the link read from `a` towards `b`.
    pub fn gauge_phase(&self, a: NodeId, b: NodeId) -> Option<f64> {
        let row = self.adjacency.get(a.index())?;
        row.binary_search_by_key(&b, |n| n.node).ok().and_then(|k| row[k].gauge_phase)
    }

    /// Every undirected edge once, with `from < to`.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.adjacency.iter().enumerate().flat_map(|(i, row)| {
            let from = NodeId(i as u32);
            row.iter().filter(move |n| n.node > from).map(move |n| Edge {
                from,
                to: n.node,
                weight: n.weight,
                gauge_phase: n.gauge_phase,
            })
        })
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Insert an undirected edge. Re-inserting an existing pair is an error.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        let n = self.nodes.len();
        if edge.from.index() >= n || edge.to.index() >= n {
            return Err(Error::InvalidArgument(format!(
                "edge {}-{} references a node outside 0..{n}",
                edge.from, edge.to
            )));
        }
        if edge.from == edge.to {
            return Err(Error::InvalidArgument(format!("self-loop on node {}", edge.from)));
        }
        if !(PLANCK_THRESHOLD..=1.0).contains(&edge.weight) {
            return Err(Error::InvalidArgument(format!(
                "edge {}-{} weight {} outside [{PLANCK_THRESHOLD}, 1]",
                edge.from, edge.to, edge.weight
            )));
        }

        let forward = &mut self.adjacency[edge.from.index()];
        let pos = match forward.binary_search_by_key(&edge.to, |n| n.node) {
            Ok(_) => {
                return Err(Error::InvalidArgument(format!(
                    "edge {}-{} already exists",
                    edge.from, edge.to
                )));
            }
            Err(pos) => pos,
        };
        forward.insert(pos, Neighbor { node: edge.to, weight: edge.weight, gauge_phase: edge.gauge_phase });

        let backward = &mut self.adjacency[edge.to.index()];
        let pos = backward
            .binary_search_by_key(&edge.from, |n| n.node)
            .unwrap_or_else(|p| p);
        backward.insert(pos, Neighbor {
            node: edge.from,
            weight: edge.weight,
            gauge_phase: edge.gauge_phase.map(|p| -p),
        });

        self.epoch += 1;
        Ok(())
    }

    /// Remove an undirected edge, returning the entry as seen from `a`.
    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) -> Option<Neighbor> {
        let removed = {
            let row = self.adjacency.get_mut(a.index())?;
            let k = row.binary_search_by_key(&b, |n| n.node).ok()?;
            row.remove(k)
        };
        if let Some(row) = self.adjacency.get_mut(b.index()) {
            if let Ok(k) = row.binary_search_by_key(&a, |n| n.node) {
                row.remove(k);
            }
        }
        self.epoch += 1;
        Some(removed)
    }

    /// Remove every listed edge that still exists. Returns how many were removed.
    pub fn remove_edges(&mut self, dying: &[DyingEdge]) -> usize {
        dying
            .iter()
            .filter(|d| self.remove_edge(d.from, d.to).is_some())
            .count()
    }

    /// Remove every listed edge that still exists. The returned records
    /// carry the weight and phase this graph held for each removed edge.
    pub fn take_edges(&mut self, dying: &[DyingEdge]) -> Vec<DyingEdge> {
        dying
            .iter()
            .filter_map(|d| {
                self.remove_edge(d.from, d.to).map(|removed| DyingEdge {
                    from: d.from,
                    to: d.to,
                    energy: removed.weight,
                    gauge_phase: removed.gauge_phase,
                })
            })
            .collect()
    }

    /// Set the weight of an existing edge in both directions.
    pub fn set_weight(&mut self, a: NodeId, b: NodeId, weight: f64) -> Result<()> {
        for (row, other) in [(a, b), (b, a)] {
            let list = self
                .adjacency
                .get_mut(row.index())
                .ok_or_else(|| Error::InvalidArgument(format!("node {row} out of range")))?;
            let k = list
                .binary_search_by_key(&other, |n| n.node)
                .map_err(|_| Error::InvalidArgument(format!("no edge {a}-{b}")))?;
            list[k].weight = weight;
        }
        Ok(())
    }

    /// Multiplicative decay of every edge weight by `rate` (fraction lost per
    /// step). Edges that would fall below `floor` are collected, NOT decayed;
    /// the caller redistributes their content and removes them.
    pub fn decay_edges(&mut self, rate: f64, floor: f64) -> Vec<DyingEdge> {
        if rate <= 0.0 {
            return Vec::new();
        }
        let keep = (1.0 - rate).max(0.0);
        let dying: Vec<DyingEdge> = self
            .edges()
            .filter(|e| e.weight * keep < floor)
            .map(|e| DyingEdge { from: e.from, to: e.to, energy: e.weight, gauge_phase: e.gauge_phase })
            .collect();

        for row in &mut self.adjacency {
            for n in row.iter_mut() {
                let decayed = n.weight * keep;
                if decayed >= floor {
                    n.weight = decayed;
                }
            }
        }
        dying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> DenseGraph {
        DenseGraph::from_edges(
            (0..3).map(|i| NodeState::new(NodeId(i))).collect(),
            [
                Edge::new(NodeId(0), NodeId(1), 0.5),
                Edge::new(NodeId(1), NodeId(2), 0.8).with_gauge_phase(0.3),
                Edge::new(NodeId(0), NodeId(2), 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_edges_are_symmetric() {
        let g = triangle();
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.slot_count(), 6);
        assert_eq!(g.weight(NodeId(2), NodeId(1)), Some(0.8));
        assert_eq!(g.adjacency(NodeId(2))[1].gauge_phase, Some(-0.3));
        assert_eq!(g.epoch(), 3);
    }

    #[test]
    fn test_add_edge_rejects_bad_input() {
        let mut g = triangle();
        assert!(g.add_edge(Edge::new(NodeId(0), NodeId(1), 0.5)).is_err());
        assert!(g.add_edge(Edge::new(NodeId(0), NodeId(9), 0.5)).is_err());
        assert!(g.add_edge(Edge::new(NodeId(1), NodeId(1), 0.5)).is_err());
        assert!(g.add_edge(Edge::new(NodeId(0), NodeId(1), 0.0)).is_err());
    }

    #[test]
    fn test_decay_collects_edges_crossing_floor() {
        let mut g = triangle();
        // 0.5 * 0.5 = 0.25 survives, floor 0.3 kills it
        let dying = g.decay_edges(0.5, 0.3);
        assert_eq!(dying.len(), 1);
        assert_eq!((dying[0].from, dying[0].to), (NodeId(0), NodeId(1)));
        assert_eq!(dying[0].energy, 0.5);
        assert_eq!(g.weight(NodeId(1), NodeId(2)), Some(0.4));
        assert_eq!(g.remove_edges(&dying), 1);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_set_weight_keeps_epoch() {
        let mut g = triangle();
        let epoch = g.epoch();
        g.set_weight(NodeId(0), NodeId(2), 0.7).unwrap();
        assert_eq!(g.weight(NodeId(2), NodeId(0)), Some(0.7));
        assert_eq!(g.epoch(), epoch);
        assert!(g.set_weight(NodeId(0), NodeId(0), 0.7).is_err());
    }

    #[test]
    fn test_take_edges_reports_graph_weight() {
        let mut g = triangle();
        let stale = [
            DyingEdge { from: NodeId(2), to: NodeId(1), energy: 0.1, gauge_phase: None },
            DyingEdge { from: NodeId(0), to: NodeId(1), energy: 0.1, gauge_phase: None },
        ];
        let taken = g.take_edges(&stale);
        assert_eq!(taken.len(), 2);
        assert_eq!((taken[0].energy, taken[0].gauge_phase), (0.8, Some(-0.3)));
        assert_eq!(taken[1].energy, 0.5);
        assert_eq!(g.edge_count(), 1);
        assert!(g.take_edges(&stale).is_empty());
    }
}
