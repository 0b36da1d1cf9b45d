use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::run::identity::{GroupId, prefix_hashes, qualifier, run_hash};
use crate::runner::logger::{Location, TestLogger};
use crate::runner::result::{RecordKind, TestRecord, TestStatus};
use crate::runner::store::{PostponedRun, ResultStore, RunTarget};

/// One postponed (test, run) in the order the next pass should execute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedRun {
    pub test: String,
    pub hash: String,
    pub path: Vec<String>,
}

impl From<&PostponedRun> for OrderedRun {
    fn from(run: &PostponedRun) -> Self {
        Self {
            test: run.test.clone(),
            hash: run.hash.clone(),
            path: run.path.clone(),
        }
    }
}

/// Dependency graph over postponed runs.
///
/// Node weights index into `runs`; an edge `a -> b` means run `a` waits on run `b`.
#[derive(Debug)]
pub struct PostponedGraph {
    pub runs: Vec<PostponedRun>,
    pub graph: DiGraph<usize, ()>,
    pub index: HashMap<(String, String), NodeIndex>,
}

impl PostponedGraph {
    /// Build the graph. A target run path matches every postponed run of the
    /// prerequisite whose path starts with it; `Any` matches all of them.
    pub fn build(runs: Vec<PostponedRun>) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut by_test: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        for (i, run) in runs.iter().enumerate() {
            let node = graph.add_node(i);
            index.insert((run.test.clone(), run.hash.clone()), node);
            by_test.entry(run.test.as_str()).or_default().push(node);
        }

        let mut edges = Vec::new();
        for (i, run) in runs.iter().enumerate() {
            let from = NodeIndex::new(i);
            for (prereq, target) in &run.missing {
                let Some(candidates) = by_test.get(prereq.as_str()) else {
                    continue;
                };
                for &to in candidates {
                    let matches = match target {
                        RunTarget::Any => true,
                        RunTarget::Run(path) => runs[graph[to]].path.starts_with(path),
                    };
                    if matches {
                        edges.push((from, to));
                    }
                }
            }
        }
        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        Self { runs, graph, index }
    }

    fn node(&self, idx: NodeIndex) -> &PostponedRun {
        &self.runs[self.graph[idx]]
    }

    /// Prerequisite nodes of `idx`, lowest index first.
    fn prerequisites(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        next.sort();
        next
    }

    fn matching(&self, prereq: &str, target: &RunTarget) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                let run = self.node(idx);
                run.test == prereq
                    && match target {
                        RunTarget::Any => true,
                        RunTarget::Run(path) => run.path.starts_with(path),
                    }
            })
            .collect()
    }
}

/// Order postponed runs so every prerequisite precedes its dependents.
///
/// Cycles are reported once against the node the search re-entered; the other
/// members are reported as skipped. A prerequisite that never ran under the
/// requested run is reported once and recorded as failed, which makes its
/// dependents orderable so they skip through `requires()` in the next pass.
pub fn resolve(
    postponed: Vec<PostponedRun>,
    store: &mut ResultStore,
    logger: &mut dyn TestLogger,
) -> Vec<OrderedRun> {
    let graph = PostponedGraph::build(postponed);
    let mut resolver = Resolver {
        graph: &graph,
        store,
        logger,
        stack: Vec::new(),
        done: HashSet::new(),
        resolved: HashSet::new(),
        failed: HashSet::new(),
        cycle_members: HashMap::new(),
        reported_cycles: HashSet::new(),
        reported_missing: HashSet::new(),
        order: Vec::new(),
    };
    for idx in graph.graph.node_indices() {
        resolver.visit(idx);
    }
    debug!(
        postponed = graph.runs.len(),
        ordered = resolver.order.len(),
        "resolved postponed tests"
    );
    resolver.order
}

struct Resolver<'a> {
    graph: &'a PostponedGraph,
    store: &'a mut ResultStore,
    logger: &'a mut dyn TestLogger,
    stack: Vec<NodeIndex>,
    done: HashSet<NodeIndex>,
    resolved: HashSet<NodeIndex>,
    failed: HashSet<NodeIndex>,
    /// Cycle member → the node its cycle was reported against.
    cycle_members: HashMap<NodeIndex, NodeIndex>,
    reported_cycles: HashSet<BTreeSet<NodeIndex>>,
    reported_missing: HashSet<(String, String)>,
    order: Vec<OrderedRun>,
}

impl Resolver<'_> {
    fn visit(&mut self, idx: NodeIndex) {
        if let Some(pos) = self.stack.iter().position(|&n| n == idx) {
            let members = self.stack[pos..].to_vec();
            self.report_cycle(&members);
            return;
        }
        if self.done.contains(&idx) {
            return;
        }

        self.stack.push(idx);
        for next in self.graph.prerequisites(idx) {
            self.visit(next);
        }
        self.stack.pop();
        self.done.insert(idx);

        if self.failed.contains(&idx) {
            return;
        }
        if let Some(&root) = self.cycle_members.get(&idx) {
            self.skip_cycle_member(idx, root);
            return;
        }

        let graph = self.graph;
        let run = graph.node(idx);
        for (prereq, target) in &run.missing {
            if !self.satisfied(prereq, target) {
                self.report_never_run(prereq, target);
            }
        }
        self.resolved.insert(idx);
        self.order.push(OrderedRun::from(run));
    }

    fn satisfied(&self, prereq: &str, target: &RunTarget) -> bool {
        let recorded = match target {
            RunTarget::Any => self.store.has_entry(prereq),
            RunTarget::Run(path) => self
                .store
                .lookup(prereq, &run_hash(path))
                .is_some(),
        };
        recorded
            || self
                .graph
                .matching(prereq, target)
                .iter()
                .any(|idx| self.resolved.contains(idx))
    }

    fn report_cycle(&mut self, members: &[NodeIndex]) {
        let key: BTreeSet<NodeIndex> = members.iter().copied().collect();
        if !self.reported_cycles.insert(key) {
            return;
        }

        let revisited = members[0];
        let mut names: Vec<String> = members
            .iter()
            .map(|&idx| display_name(self.graph.node(idx)))
            .collect();
        names.push(display_name(self.graph.node(revisited)));
        let message = format!("dependency cycle: {}", names.join(" -> "));
        self.fail(revisited, TestStatus::Error, &message);

        for &member in &members[1..] {
            if !self.failed.contains(&member) {
                self.cycle_members.entry(member).or_insert(revisited);
            }
        }
    }

    fn skip_cycle_member(&mut self, idx: NodeIndex, root: NodeIndex) {
        let reason = format!("depends on {}, which did not pass", self.graph.node(root).test);
        self.fail(idx, TestStatus::Skipped, &reason);
    }

    /// Report `idx` and mark it failed at its run and every ancestor run.
    fn fail(&mut self, idx: NodeIndex, status: TestStatus, message: &str) {
        let graph = self.graph;
        let run = graph.node(idx);
        let location = Location::new(run.test.clone(), run.qualifier());
        match status {
            TestStatus::Skipped => self.logger.log_skip(&run.test, message, &location),
            _ => self.logger.log_error(&run.test, message, &location),
        }
        self.store.record(TestRecord::new(
            run.test.clone(),
            RecordKind::Test,
            run.hash.clone(),
            run.qualifier(),
            status,
            Some(message.to_owned()),
        ));
        self.store
            .record_fail(&run.test, &run.group, &prefix_hashes(&run.path));
        self.failed.insert(idx);
    }

    fn report_never_run(&mut self, prereq: &str, target: &RunTarget) {
        let hash = target.hash();
        if !self.reported_missing.insert((prereq.to_owned(), hash.clone())) {
            return;
        }
        let message = "other tests depend on this test, but it was never run";
        let qualifier = qualifier(target.path());
        let location = Location::new(prereq, qualifier.clone());
        self.logger.log_error(prereq, message, &location);
        self.store.record(TestRecord::new(
            prereq,
            RecordKind::Dependency,
            hash,
            qualifier,
            TestStatus::Error,
            Some(message.to_owned()),
        ));
        let group = self
            .store
            .ledger_entry(prereq)
            .map(|entry| entry.group().clone())
            .unwrap_or_else(GroupId::root);
        self.store
            .record_fail(prereq, &group, &prefix_hashes(target.path()));
    }
}

fn display_name(run: &PostponedRun) -> String {
    format!("{}{}", run.test, run.qualifier())
}
