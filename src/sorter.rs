//! Priority-Ordered Topological Sorter (C3, §4.3). Wraps a `petgraph` DAG
//! over [`crate::dep_graph::DependencyGraph`], surfacing ready packages in
//! non-decreasing priority order and marking non-reasoned nodes (artifacts
//! already on disk) as immediately done.
//!
//! Grounded on the teacher's `build_set_graph.rs`, which walks a
//! `petgraph::Graph` with a `VecDeque` work queue (`schedule_next_build_in_graph`)
//! to find root nodes and unblock subgraphs as packages complete.

use std::collections::{HashMap, HashSet};

use petgraph::{Directed, Direction, graph::NodeIndex, graph::DiGraph};
use thiserror::Error;

use crate::{Pkgbase, dep_graph::DependencyGraph, reason::BuildReasons};

#[derive(Error, Debug)]
pub enum SorterError {
    #[error("cyclic internal dependency detected among: {0:?}")]
    Cyclic(Vec<Pkgbase>),
}

/// Live priority-ordered topological sorter over the packages considered
/// this cycle.
pub struct PriorityTopoSorter {
    graph: DiGraph<Pkgbase, (), Directed>,
    index_of: HashMap<Pkgbase, NodeIndex>,
    /// Nodes with no remaining unsatisfied incoming edge, not yet returned
    /// from `get_ready()`, sorted by ascending priority on each refresh.
    ready: Vec<Pkgbase>,
    /// Nodes already marked done (built, skipped, failed, or a pre-existing
    /// artifact that never had a reason).
    done: HashSet<Pkgbase>,
}

impl PriorityTopoSorter {
    /// Builds the sorter from `dep_building_map` (§4.3 "Initialization").
    /// An edge runs from dependency to dependent: the sorter only frees a
    /// dependent once every dependency is done.
    pub fn new(graph: &DependencyGraph) -> Result<Self, SorterError> {
        let mut pg = DiGraph::new();
        let mut index_of: HashMap<Pkgbase, NodeIndex> = HashMap::new();

        let mut get_or_insert = |pg: &mut DiGraph<Pkgbase, (), Directed>,
                                  index_of: &mut HashMap<Pkgbase, NodeIndex>,
                                  pkgbase: &Pkgbase| {
            *index_of
                .entry(pkgbase.clone())
                .or_insert_with(|| pg.add_node(pkgbase.clone()))
        };

        for (p, deps) in &graph.dep_building_map {
            let p_idx = get_or_insert(&mut pg, &mut index_of, p);
            for d in deps {
                let d_idx = get_or_insert(&mut pg, &mut index_of, d);
                pg.update_edge(d_idx, p_idx, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&pg) {
            let cyclic = index_of.keys().cloned().collect();
            return Err(SorterError::Cyclic(cyclic));
        }

        let mut sorter = PriorityTopoSorter {
            graph: pg,
            index_of,
            ready: Vec::new(),
            done: HashSet::new(),
        };
        sorter.refresh_frontier(&HashMap::new());
        Ok(sorter)
    }

    /// Nodes with in-degree zero among the not-yet-done nodes.
    fn frontier(&self) -> Vec<Pkgbase> {
        self.index_of
            .iter()
            .filter(|(p, _)| !self.done.contains(*p) && !self.ready.contains(p))
            .filter(|(_, idx)| {
                self.graph
                    .neighbors_directed(**idx, Direction::Incoming)
                    .all(|dep_idx| self.done.contains(&self.graph[dep_idx]))
            })
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Newly-ready nodes with no build reason are artifacts that already
    /// exist; mark them done immediately instead of surfacing them (§4.3).
    fn refresh_frontier(&mut self, build_reasons: &HashMap<Pkgbase, BuildReasons>) {
        loop {
            let newly_ready = self.frontier();
            if newly_ready.is_empty() {
                break;
            }

            let mut added_any_reasoned = false;
            for p in newly_ready {
                if build_reasons.get(&p).is_none_or(BuildReasons::is_empty) {
                    self.done.insert(p);
                } else {
                    self.ready.push(p);
                    added_any_reasoned = true;
                }
            }

            if !added_any_reasoned {
                continue;
            }
            break;
        }

        self.ready
            .sort_by_key(|p| build_reasons.get(p).map(|r| r.effective_priority(build_reasons)).unwrap_or(3));
    }

    /// Current ready frontier, sorted by ascending priority (§4.3).
    pub fn get_ready(&mut self, build_reasons: &HashMap<Pkgbase, BuildReasons>) -> &[Pkgbase] {
        self.refresh_frontier(build_reasons);
        &self.ready
    }

    /// Marks `p` done, unblocking its dependents on the next `get_ready()`.
    pub fn done(&mut self, p: &Pkgbase) {
        self.ready.retain(|x| x != p);
        self.done.insert(p.clone());
    }

    /// Whether any node remains neither done nor ready.
    pub fn is_active(&self) -> bool {
        !self.ready.is_empty() || self.index_of.len() > self.done.len()
    }
}
