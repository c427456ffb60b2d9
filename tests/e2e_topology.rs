//! End-to-end tests for the dense graph → CSR pipeline.
//!
//! Covers the structural invariants on random graphs, the rebuild cadence,
//! and the fatal paths (absent graph, corrupt adjacency).

use proptest::prelude::*;
use spacetime_rs::{
    DenseGraph, Edge, Error, Neighbor, NodeId, NodeState, SparseTopology, SyncAction, TopologySync,
};

fn nodes(n: usize) -> Vec<NodeState> {
    (0..n).map(|i| NodeState::new(NodeId(i as u32))).collect()
}

/// Random simple graph: candidate pairs deduplicated, self-loops dropped.
fn arb_graph() -> impl Strategy<Value = DenseGraph> {
    (1usize..40).prop_flat_map(|n| {
        prop::collection::vec((0..n as u32, 0..n as u32, 0.01f64..=1.0), 0..120).prop_map(move |pairs| {
            let mut graph = DenseGraph::from_nodes(nodes(n));
            for (a, b, w) in pairs {
                if a != b && graph.weight(NodeId(a), NodeId(b)).is_none() {
                    graph.add_edge(Edge::new(NodeId(a), NodeId(b), w)).unwrap();
                }
            }
            graph
        })
    })
}

// ============================================================================
// 1. CSR invariants
// ============================================================================

proptest! {
    #[test]
    fn prop_csr_invariants(graph in arb_graph()) {
        let mut csr = SparseTopology::new();
        csr.rebuild(Some(&graph)).unwrap();
        csr.validate().unwrap();

        let n = graph.node_count();
        let offsets = csr.offsets();
        prop_assert_eq!(offsets.len(), n + 1);
        prop_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(offsets[n] as usize, csr.edge_count());
        prop_assert_eq!(csr.edge_count(), 2 * graph.edge_count());
        prop_assert!(csr.neighbors().iter().all(|&j| (j as usize) < n));

        // every slot's mirror points back and carries the same weight
        for k in 0..csr.edge_count() {
            let r = csr.reverse()[k] as usize;
            prop_assert_eq!(csr.reverse()[r] as usize, k);
            prop_assert_eq!(csr.sources()[r], csr.neighbors()[k]);
            prop_assert_eq!(csr.weights()[r], csr.weights()[k]);
        }
    }

    #[test]
    fn prop_weight_sync_matches_rebuild(graph in arb_graph(), factor in 0.1f64..1.0) {
        let mut csr = SparseTopology::new();
        csr.rebuild(Some(&graph)).unwrap();

        let mut graph = graph;
        let edges: Vec<Edge> = graph.edges().collect();
        for e in &edges {
            graph.set_weight(e.from, e.to, (e.weight * factor).max(0.01)).unwrap();
        }
        csr.sync_weights_only(Some(&graph)).unwrap();

        let mut fresh = SparseTopology::new();
        fresh.rebuild(Some(&graph)).unwrap();
        prop_assert_eq!(csr.weights(), fresh.weights());
        prop_assert_eq!(csr.neighbors(), fresh.neighbors());
    }
}

// ============================================================================
// 2. Layout changes force a rebuild
// ============================================================================

#[test]
fn test_structural_change_invalidates_weight_sync() {
    let mut graph = DenseGraph::from_edges(nodes(3), [Edge::new(NodeId(0), NodeId(1), 0.5)]).unwrap();
    let mut csr = SparseTopology::new();
    csr.rebuild(Some(&graph)).unwrap();
    assert!(csr.is_in_sync_with(&graph));

    graph.add_edge(Edge::new(NodeId(1), NodeId(2), 0.5)).unwrap();
    assert!(!csr.is_in_sync_with(&graph));
    assert!(matches!(csr.sync_weights_only(Some(&graph)), Err(Error::InvalidArgument(_))));

    let mut sync = TopologySync::new(5);
    assert_eq!(sync.plan(true), SyncAction::Rebuild);
    assert_eq!(sync.plan(true), SyncAction::WeightsOnly);
    assert_eq!(sync.plan(csr.is_in_sync_with(&graph)), SyncAction::Rebuild);
}

#[test]
fn test_cadence_interval_zero_rebuilds_every_step() {
    let mut sync = TopologySync::new(0);
    assert_eq!(sync.interval(), 1);
    for _ in 0..4 {
        assert_eq!(sync.plan(true), SyncAction::Rebuild);
    }
}

// ============================================================================
// 3. Fatal paths
// ============================================================================

#[test]
fn test_absent_graph_is_invalid_argument() {
    let mut csr = SparseTopology::new();
    assert!(matches!(csr.rebuild(None), Err(Error::InvalidArgument(_))));
    assert!(matches!(csr.sync_weights_only(None), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_out_of_range_neighbor_is_topology_error() {
    let adjacency = vec![
        vec![Neighbor { node: NodeId(7), weight: 0.5, gauge_phase: None }],
        vec![],
    ];
    let graph = DenseGraph::from_adjacency(nodes(2), adjacency).unwrap();
    let mut csr = SparseTopology::new();
    assert!(matches!(csr.rebuild(Some(&graph)), Err(Error::Topology(_))));
}

#[test]
fn test_missing_mirror_is_topology_error() {
    let adjacency = vec![
        vec![Neighbor { node: NodeId(1), weight: 0.5, gauge_phase: None }],
        vec![],
    ];
    let graph = DenseGraph::from_adjacency(nodes(2), adjacency).unwrap();
    let mut csr = SparseTopology::new();
    assert!(matches!(csr.rebuild(Some(&graph)), Err(Error::Topology(_))));
}
