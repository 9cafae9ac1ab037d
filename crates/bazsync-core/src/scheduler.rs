//! Topological scheduling of changed targets
//!
//! Kahn's algorithm keyed on predecessor in-degree over the whole graph. The
//! emitted order lists consumers before their dependencies; the closure engine
//! walks it in reverse so every target is visited after everything it depends
//! on.

use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

use crate::graph::{TargetGraph, VertexId};

/// Errors raised by the scheduler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("dependency cycle blocks {} target(s): {vertices:?}", vertices.len())]
    CyclicDependency { vertices: Vec<VertexId> },
}

/// Visitation order over a subset of target vertices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologicalOrder {
    /// Consumer-most first, dependency-most last
    pub order: Vec<VertexId>,
    /// Requested vertices that never reached in-degree zero, sorted. These sit
    /// on a dependency cycle or below one.
    pub cyclic: Vec<VertexId>,
}

impl TopologicalOrder {
    /// Iterate dependencies before their dependents
    pub fn dependencies_first(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.order.iter().rev().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.cyclic.is_empty()
    }

    /// Fail when any requested vertex was left out of the order
    pub fn ensure_complete(&self) -> Result<(), SchedulerError> {
        if self.cyclic.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::CyclicDependency {
                vertices: self.cyclic.clone(),
            })
        }
    }
}

/// Order `targets` so every vertex appears after all of its predecessors.
///
/// In-degrees are computed over the whole graph, so the relative order of two
/// targets honours paths through vertices outside the subset. Ties are broken
/// by ascending vertex id.
pub fn topological_order<G>(graph: &G, targets: &BTreeSet<VertexId>) -> TopologicalOrder
where
    G: TargetGraph + ?Sized,
{
    let all = graph.all_vertex_ids();
    let mut degree: HashMap<VertexId, usize> = all
        .iter()
        .map(|&id| (id, graph.predecessors(id).len()))
        .collect();

    let mut queue: VecDeque<VertexId> = all
        .iter()
        .copied()
        .filter(|id| degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(targets.len());
    let mut emitted = BTreeSet::new();

    while let Some(id) = queue.pop_front() {
        if targets.contains(&id) {
            order.push(id);
            emitted.insert(id);
        }
        for succ in graph.successors(id) {
            if let Some(d) = degree.get_mut(&succ) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    trace!(vertex = succ, "Vertex became ready");
                    queue.push_back(succ);
                }
            }
        }
    }

    let cyclic: Vec<VertexId> = targets
        .iter()
        .copied()
        .filter(|id| !emitted.contains(id) && degree.contains_key(id))
        .collect();

    debug!(
        requested = targets.len(),
        scheduled = order.len(),
        cyclic = cyclic.len(),
        "Computed topological order"
    );

    TopologicalOrder { order, cyclic }
}
