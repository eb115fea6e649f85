// SPDX-License-Identifier: MIT

//! DAG Planner (§4.G): builds the step dependency graph, detects cycles via
//! Tarjan's SCC algorithm, and computes parallel execution levels via Kahn's
//! algorithm. Also picks the next runnable step for the lifecycle controller.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use forge_core::StepStatus;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub step_index: i64,
}

/// `edges` run dependency -> dependent: `(from, to)` means `from` must
/// complete before `to` can run.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub nodes: HashMap<String, Node>,
    pub edges: Vec<(String, String)>,
}

impl Dag {
    pub fn from_steps(steps: &[(String, i64, Vec<String>)]) -> Self {
        let mut nodes = HashMap::new();
        let mut edges = Vec::new();
        for (id, step_index, depends_on) in steps {
            nodes.insert(id.clone(), Node { id: id.clone(), step_index: *step_index });
            for dependency in depends_on {
                edges.push((dependency.clone(), id.clone()));
            }
        }
        Self { nodes, edges }
    }

    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = self.nodes.keys().map(|id| (id.as_str(), Vec::new())).collect();
        for (from, to) in &self.edges {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }
        adjacency
    }

    /// Tarjan's SCC algorithm. A graph is acyclic iff every returned SCC has
    /// size 1 (and no self-loop) — callers use [`Dag::has_cycle`] for that check.
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let adjacency = self.adjacency();
        let mut index_counter = 0usize;
        let mut indices: HashMap<&str, usize> = HashMap::new();
        let mut low_links: HashMap<&str, usize> = HashMap::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut sccs: Vec<Vec<String>> = Vec::new();

        let mut node_ids: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        node_ids.sort();

        for start in node_ids {
            if indices.contains_key(start) {
                continue;
            }
            self.strong_connect(start, &adjacency, &mut index_counter, &mut indices, &mut low_links, &mut on_stack, &mut stack, &mut sccs);
        }
        sccs
    }

    #[allow(clippy::too_many_arguments)]
    fn strong_connect<'a>(
        &self,
        v: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        index_counter: &mut usize,
        indices: &mut HashMap<&'a str, usize>,
        low_links: &mut HashMap<&'a str, usize>,
        on_stack: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        sccs: &mut Vec<Vec<String>>,
    ) {
        indices.insert(v, *index_counter);
        low_links.insert(v, *index_counter);
        *index_counter += 1;
        stack.push(v);
        on_stack.insert(v);

        if let Some(successors) = adjacency.get(v) {
            for &w in successors {
                if !indices.contains_key(w) {
                    self.strong_connect(w, adjacency, index_counter, indices, low_links, on_stack, stack, sccs);
                    let w_low = low_links[w];
                    let v_low = low_links[v];
                    low_links.insert(v, v_low.min(w_low));
                } else if on_stack.contains(w) {
                    let w_index = indices[w];
                    let v_low = low_links[v];
                    low_links.insert(v, v_low.min(w_index));
                }
            }
        }

        if low_links[v] == indices[v] {
            let mut component = Vec::new();
            loop {
                #[allow(clippy::expect_used)]
                let w = stack.pop().expect("node on this SCC's stack");
                on_stack.remove(w);
                component.push(w.to_string());
                if w == v {
                    break;
                }
            }
            sccs.push(component);
        }
    }

    /// True if any SCC has more than one node, or a node has a self-loop.
    pub fn has_cycle(&self) -> bool {
        if self.edges.iter().any(|(from, to)| from == to) {
            return true;
        }
        self.strongly_connected_components().iter().any(|scc| scc.len() > 1)
    }

    /// Kahn topological levels: each level holds every node whose in-degree
    /// reaches zero simultaneously. Within a level, nodes are ordered by
    /// `step_index` ascending then `id` ascending (§4.G tie-break).
    pub fn levels(&self) -> Vec<Vec<String>> {
        let adjacency = self.adjacency();
        let mut in_degree: HashMap<&str, usize> = self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for (_, to) in &self.edges {
            *in_degree.entry(to.as_str()).or_insert(0) += 1;
        }

        let mut remaining = in_degree.clone();
        let mut levels = Vec::new();
        let mut placed = 0usize;

        loop {
            let mut ready: Vec<&str> = remaining.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
            if ready.is_empty() {
                break;
            }
            ready.sort_by_key(|id| (self.nodes[*id].step_index, id.to_string()));
            for &id in &ready {
                remaining.remove(id);
                placed += 1;
                if let Some(successors) = adjacency.get(id) {
                    for &succ in successors {
                        if let Some(deg) = remaining.get_mut(succ) {
                            *deg = deg.saturating_sub(1);
                        }
                    }
                }
            }
            levels.push(ready.into_iter().map(String::from).collect());
        }

        debug_assert!(placed <= self.nodes.len());
        levels
    }
}

/// Picks the smallest-`step_index` step that is `pending` with every
/// dependency `completed` (§4.G). `None` if nothing is runnable.
pub fn next_runnable_step(steps: &[(String, i64, StepStatus, Vec<String>)]) -> Option<String> {
    let completed: HashSet<&str> =
        steps.iter().filter(|(_, _, status, _)| *status == StepStatus::Completed).map(|(id, _, _, _)| id.as_str()).collect();

    steps
        .iter()
        .filter(|(_, _, status, _)| *status == StepStatus::Pending)
        .filter(|(_, _, _, depends_on)| depends_on.iter().all(|dep| completed.contains(dep.as_str())))
        .min_by_key(|(id, step_index, _, _)| (*step_index, id.clone()))
        .map(|(id, _, _, _)| id.clone())
}
