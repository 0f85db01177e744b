//! Directed graph of pages and transitions.
//!
//! Nodes are page ids, edges are keyed by `(source, target)`. Inserting a
//! transition always upserts both endpoints first, so an edge can never
//! point at a node the graph does not know. Iteration order follows
//! insertion order everywhere, which keeps reports and diagrams stable
//! between runs.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::operation::{ActionKind, Operation};
use crate::page::{Page, PageId};

/// Upper bound on cycles reported by [`StateGraph::strongly_connected_cycles`].
pub const MAX_CYCLES: usize = 1000;

/// Upper bound on paths enumerated by [`StateGraph::paths_from`].
pub const MAX_PATHS: usize = 1000;

/// A node in the state graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageNode {
    pub id: PageId,
    pub label: String,
    pub element_count: usize,
    /// Created implicitly by a transition, never captured.
    #[serde(default)]
    pub placeholder: bool,
}

/// An edge in the state graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub source: PageId,
    pub target: PageId,
    pub kind: ActionKind,
    pub action_target: String,
    pub count: u32,
    /// Ids of the operations that produced this edge.
    pub operations: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
    #[serde(skip)]
    duration_samples: u32,
}

impl Transition {
    fn new(source: PageId, target: PageId, kind: ActionKind, action_target: String) -> Self {
        Self {
            source,
            target,
            kind,
            action_target,
            count: 0,
            operations: Vec::new(),
            average_duration_ms: None,
            duration_samples: 0,
        }
    }

    fn record(&mut self, operation: Option<&Operation>) {
        self.count += 1;
        let Some(op) = operation else {
            return;
        };
        self.operations.push(op.id);
        if let Some(ms) = op.duration_ms {
            let n = f64::from(self.duration_samples);
            let mean = self.average_duration_ms.unwrap_or(0.0);
            self.average_duration_ms = Some((mean * n + ms as f64) / (n + 1.0));
            self.duration_samples += 1;
        }
    }
}

/// Outgoing edge ranked by how often it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSuggestion {
    pub target: PageId,
    pub kind: ActionKind,
    pub action_target: String,
    pub count: u32,
    /// Share of all outgoing occurrences from the source page.
    pub share: f64,
}

/// Serializable view of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<PageNode>,
    pub edges: Vec<Transition>,
}

#[derive(Debug, Clone, Default)]
pub struct StateGraph {
    nodes: HashMap<PageId, PageNode>,
    node_order: Vec<PageId>,
    edges: HashMap<(PageId, PageId), Transition>,
    edge_order: Vec<(PageId, PageId)>,
    outgoing: HashMap<PageId, Vec<PageId>>,
    incoming: HashMap<PageId, Vec<PageId>>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: &PageId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &PageId) -> Option<&PageNode> {
        self.nodes.get(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &PageNode> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Edges in insertion order.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.edge_order.iter().filter_map(|key| self.edges.get(key))
    }

    pub fn transition(&self, source: &PageId, target: &PageId) -> Option<&Transition> {
        self.edges.get(&(source.clone(), target.clone()))
    }

    /// Insert or refresh the node for `page`. Inserting the same id twice
    /// leaves exactly one node.
    pub fn add_page_node(&mut self, page: &Page) {
        let node = PageNode {
            id: page.id.clone(),
            label: page.label().to_string(),
            element_count: page.elements.len(),
            placeholder: false,
        };
        if !self.nodes.contains_key(&page.id) {
            self.node_order.push(page.id.clone());
        }
        self.nodes.insert(page.id.clone(), node);
    }

    /// Insert a bare node unless one already exists. Returns whether it was created.
    fn ensure_node(&mut self, id: &PageId) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        self.nodes.insert(
            id.clone(),
            PageNode {
                id: id.clone(),
                label: id.to_string(),
                element_count: 0,
                placeholder: true,
            },
        );
        self.node_order.push(id.clone());
        true
    }

    /// Upsert the edge `source -> target`.
    ///
    /// Repeats bump the occurrence count and link the operation; the first
    /// action kind and target descriptor are kept. Missing endpoints are
    /// created as placeholder nodes and returned.
    pub fn add_transition(
        &mut self,
        source: &PageId,
        target: &PageId,
        kind: ActionKind,
        action_target: &str,
        operation: Option<&Operation>,
    ) -> Vec<PageId> {
        let mut created = Vec::new();
        for endpoint in [source, target] {
            if self.ensure_node(endpoint) {
                warn!(page = %endpoint, "Transition referenced unknown page, created placeholder node");
                created.push(endpoint.clone());
            }
        }

        let key = (source.clone(), target.clone());
        if !self.edges.contains_key(&key) {
            self.edge_order.push(key.clone());
            self.outgoing
                .entry(source.clone())
                .or_default()
                .push(target.clone());
            self.incoming
                .entry(target.clone())
                .or_default()
                .push(source.clone());
        }
        self.edges
            .entry(key)
            .or_insert_with(|| {
                Transition::new(source.clone(), target.clone(), kind, action_target.to_string())
            })
            .record(operation);
        created
    }

    fn successors(&self, id: &PageId) -> &[PageId] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn out_degree(&self, id: &PageId) -> usize {
        self.successors(id).len()
    }

    fn in_degree(&self, id: &PageId) -> usize {
        self.incoming.get(id).map_or(0, Vec::len)
    }

    /// Whether a directed path leads from `from` to `to`. A node reaches itself.
    pub fn reachable(&self, from: &PageId, to: &PageId) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        if from == to {
            return true;
        }
        let mut seen: HashSet<&PageId> = HashSet::from([from]);
        let mut queue: VecDeque<&PageId> = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if next == to {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Fewest-edges path including both endpoints. Empty when unreachable or unknown.
    pub fn shortest_path(&self, from: &PageId, to: &PageId) -> Vec<PageId> {
        if !self.contains(from) || !self.contains(to) {
            return Vec::new();
        }
        if from == to {
            return vec![from.clone()];
        }
        let mut parent: HashMap<&PageId, &PageId> = HashMap::new();
        let mut seen: HashSet<&PageId> = HashSet::from([from]);
        let mut queue: VecDeque<&PageId> = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if !seen.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == to {
                    let mut path = vec![to.clone()];
                    let mut cursor = to;
                    while let Some(prev) = parent.get(cursor) {
                        path.push((*prev).clone());
                        cursor = *prev;
                    }
                    path.reverse();
                    return path;
                }
                queue.push_back(next);
            }
        }
        Vec::new()
    }

    /// Nodes with no outgoing edge.
    pub fn dead_ends(&self) -> Vec<PageId> {
        self.node_order
            .iter()
            .filter(|id| self.out_degree(id) == 0)
            .cloned()
            .collect()
    }

    /// Fraction of nodes touched by at least one edge. Zero for an empty graph.
    pub fn coverage(&self) -> f64 {
        let (visited, total) = self.coverage_counts();
        if total == 0 {
            return 0.0;
        }
        visited as f64 / total as f64
    }

    /// `(visited, total)` behind [`coverage`](Self::coverage).
    pub fn coverage_counts(&self) -> (usize, usize) {
        let visited = self
            .node_order
            .iter()
            .filter(|id| self.in_degree(id) > 0 || self.out_degree(id) > 0)
            .count();
        (visited, self.nodes.len())
    }

    /// Strongly connected components with more than one node, in discovery order.
    pub fn strongly_connected_components(&self) -> Vec<Vec<PageId>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            components: Vec::new(),
        };
        for id in &self.node_order {
            if !tarjan.indices.contains_key(id) {
                tarjan.visit(id);
            }
        }
        tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1)
            .map(|mut c| {
                c.sort_by_key(|id| self.position(id));
                c
            })
            .collect()
    }

    fn position(&self, id: &PageId) -> usize {
        self.node_order
            .iter()
            .position(|n| n == id)
            .unwrap_or(usize::MAX)
    }

    /// Every simple cycle inside a multi-node strongly connected component.
    ///
    /// Each cycle starts at its earliest-inserted node and is listed once.
    /// Self-loops are not cycles here; [`StateGraph::self_loops`] lists them.
    /// Output stops at [`MAX_CYCLES`].
    pub fn strongly_connected_cycles(&self) -> Vec<Vec<PageId>> {
        let mut cycles = Vec::new();
        for component in self.strongly_connected_components() {
            let rank: HashMap<&PageId, usize> =
                component.iter().enumerate().map(|(i, id)| (id, i)).collect();
            for (start_rank, start) in component.iter().enumerate() {
                self.cycles_from(start, start_rank, &rank, &mut cycles);
                if cycles.len() >= MAX_CYCLES {
                    cycles.truncate(MAX_CYCLES);
                    return cycles;
                }
            }
        }
        cycles
    }

    /// Depth-first search for cycles through `start`, using an explicit stack.
    ///
    /// Only component members ranked at or after `start` are walked, so each
    /// cycle is found from exactly one start.
    fn cycles_from<'a>(
        &'a self,
        start: &'a PageId,
        start_rank: usize,
        rank: &HashMap<&'a PageId, usize>,
        cycles: &mut Vec<Vec<PageId>>,
    ) {
        // (node, index of its next successor to try)
        let mut path: Vec<(&'a PageId, usize)> = vec![(start, 0)];
        let mut on_path: HashSet<&'a PageId> = HashSet::from([start]);

        while let Some(frame) = path.last_mut() {
            if cycles.len() >= MAX_CYCLES {
                return;
            }
            let current = frame.0;
            let Some(next) = self.successors(current).get(frame.1) else {
                path.pop();
                on_path.remove(current);
                continue;
            };
            frame.1 += 1;

            if !rank.get(next).is_some_and(|&r| r >= start_rank) {
                continue;
            }
            if next == start {
                if path.len() > 1 {
                    cycles.push(path.iter().map(|(id, _)| (*id).clone()).collect());
                }
                continue;
            }
            if on_path.insert(next) {
                path.push((next, 0));
            }
        }
    }

    /// Pages with a transition back to themselves, in insertion order.
    pub fn self_loops(&self) -> Vec<PageId> {
        self.node_order
            .iter()
            .filter(|id| self.edges.contains_key(&((*id).clone(), (*id).clone())))
            .cloned()
            .collect()
    }

    /// Outgoing edges of `page`, most taken first.
    pub fn navigation_suggestions(&self, page: &PageId) -> Vec<NavigationSuggestion> {
        let edges: Vec<&Transition> = self
            .successors(page)
            .iter()
            .filter_map(|target| self.edges.get(&(page.clone(), target.clone())))
            .collect();
        let total: u32 = edges.iter().map(|t| t.count).sum();
        if total == 0 {
            return Vec::new();
        }
        let mut suggestions: Vec<NavigationSuggestion> = edges
            .into_iter()
            .map(|t| NavigationSuggestion {
                target: t.target.clone(),
                kind: t.kind,
                action_target: t.action_target.clone(),
                count: t.count,
                share: f64::from(t.count) / f64::from(total),
            })
            .collect();
        suggestions.sort_by(|a, b| b.count.cmp(&a.count));
        suggestions
    }

    /// Maximal paths from `start`, at most `max_depth` edges long.
    ///
    /// A path ends when it reaches the depth bound or a node whose successors
    /// are all already on the path. Enumeration stops after [`MAX_PATHS`].
    pub fn paths_from(&self, start: &PageId, max_depth: usize) -> Vec<Vec<PageId>> {
        if !self.contains(start) {
            return Vec::new();
        }
        let mut paths = Vec::new();
        let mut path = vec![start];
        let mut on_path: HashSet<&PageId> = HashSet::from([start]);
        self.extend_paths(max_depth, &mut path, &mut on_path, &mut paths);
        paths
    }

    fn extend_paths<'a>(
        &'a self,
        max_depth: usize,
        path: &mut Vec<&'a PageId>,
        on_path: &mut HashSet<&'a PageId>,
        paths: &mut Vec<Vec<PageId>>,
    ) {
        if paths.len() >= MAX_PATHS {
            return;
        }
        let Some(current) = path.last().copied() else {
            return;
        };
        let open: Vec<&PageId> = self
            .successors(current)
            .iter()
            .filter(|next| !on_path.contains(next))
            .collect();
        if path.len() > max_depth || open.is_empty() {
            paths.push(path.iter().map(|id| (*id).clone()).collect());
            return;
        }
        for next in open {
            on_path.insert(next);
            path.push(next);
            self.extend_paths(max_depth, path, on_path, paths);
            path.pop();
            on_path.remove(next);
        }
    }

    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self.nodes().cloned().collect(),
            edges: self.transitions().cloned().collect(),
        }
    }
}

struct Tarjan<'a> {
    graph: &'a StateGraph,
    index: usize,
    indices: HashMap<&'a PageId, usize>,
    lowlink: HashMap<&'a PageId, usize>,
    stack: Vec<&'a PageId>,
    on_stack: HashSet<&'a PageId>,
    components: Vec<Vec<PageId>>,
}

impl<'a> Tarjan<'a> {
    fn open(&mut self, id: &'a PageId) {
        self.indices.insert(id, self.index);
        self.lowlink.insert(id, self.index);
        self.index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);
    }

    /// Tarjan's algorithm from `root` with an explicit work stack, so long
    /// navigation chains cannot exhaust the thread stack.
    fn visit(&mut self, root: &'a PageId) {
        let graph = self.graph;
        // (node, index of its next successor to look at)
        let mut work: Vec<(&'a PageId, usize)> = vec![(root, 0)];
        self.open(root);

        while let Some(frame) = work.last_mut() {
            let id = frame.0;
            if let Some(next) = graph.successors(id).get(frame.1) {
                frame.1 += 1;
                if !self.indices.contains_key(next) {
                    self.open(next);
                    work.push((next, 0));
                } else if self.on_stack.contains(next) {
                    let low = self.lowlink[id].min(self.indices[next]);
                    self.lowlink.insert(id, low);
                }
                continue;
            }

            work.pop();
            if self.lowlink[id] == self.indices[id] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(member);
                    component.push(member.clone());
                    if member == id {
                        break;
                    }
                }
                self.components.push(component);
            }
            if let Some(&(parent, _)) = work.last() {
                let low = self.lowlink[parent].min(self.lowlink[id]);
                self.lowlink.insert(parent, low);
            }
        }
    }
}
