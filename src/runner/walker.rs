use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::graph::resolver::OrderedRun;
use crate::run::identity::{GroupId, RunArena, RunId, RunInstance};
use crate::runner::context::Context;
use crate::runner::invoker::{FixtureCall, FixtureInvoker};
use crate::runner::logger::{Location, TestLogger};
use crate::runner::result::{RecordKind, TestOutcome, TestRecord};
use crate::runner::store::ResultStore;
use crate::tree::fixture::{Fixture, FixtureResult, RunInfo, Teardown};
use crate::tree::{PATH_SEPARATOR, TestNode, TestTree, join_path};

/// The (test, run) pairs a restricted pass is allowed to execute.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    entries: Vec<(String, Vec<String>)>,
    leaves: HashSet<(String, String)>,
}

impl Selection {
    pub fn new(order: &[OrderedRun]) -> Self {
        Self {
            entries: order
                .iter()
                .map(|r| (r.test.clone(), r.path.clone()))
                .collect(),
            leaves: order
                .iter()
                .map(|r| (r.test.clone(), r.hash.clone()))
                .collect(),
        }
    }

    /// Whether any selected run lies under the node at `path` entered with
    /// the run path `run_path`.
    pub fn covers(&self, path: &str, run_path: &[String]) -> bool {
        let prefix = format!("{path}{PATH_SEPARATOR}");
        self.entries.iter().any(|(test, target)| {
            (test == path || test.starts_with(&prefix)) && target.starts_with(run_path)
        })
    }

    pub fn contains(&self, test: &str, hash: &str) -> bool {
        self.leaves.contains(&(test.to_owned(), hash.to_owned()))
    }

    /// Selected test names, each once, in selection order.
    pub fn tests(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|(test, _)| seen.insert(test.as_str()))
            .map(|(test, _)| test.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Executes one pass over a (possibly restricted) test tree.
pub struct TreeWalker<'a> {
    tree: &'a TestTree,
    store: &'a mut ResultStore,
    arena: &'a mut RunArena,
    logger: &'a mut dyn TestLogger,
    selection: Option<&'a Selection>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(
        tree: &'a TestTree,
        store: &'a mut ResultStore,
        arena: &'a mut RunArena,
        logger: &'a mut dyn TestLogger,
    ) -> Self {
        Self {
            tree,
            store,
            arena,
            logger,
            selection: None,
        }
    }

    /// Only execute the selected (test, run) pairs.
    pub fn restricted(mut self, selection: &'a Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Walk `nodes` under the root run.
    pub fn walk(&mut self, nodes: &[TestNode]) {
        let root = self.arena.root();
        for node in nodes {
            self.walk_node(node, root, &[]);
        }
    }

    fn invoker(&mut self) -> FixtureInvoker<'_> {
        FixtureInvoker::new(&mut *self.store, &mut *self.logger)
    }

    fn covers(&self, node: &TestNode, run: RunId) -> bool {
        match self.selection {
            None => true,
            Some(selection) => selection.covers(&node.path, self.arena.get(run).path()),
        }
    }

    fn walk_node(&mut self, node: &TestNode, run: RunId, args: &[Value]) {
        if !self.covers(node, run) {
            return;
        }
        match &node.run {
            Some(info) => self.walk_parameterized(node, info, run, args),
            None => self.walk_body(node, run, args),
        }
    }

    fn walk_parameterized(&mut self, node: &TestNode, info: &RunInfo, run: RunId, args: &[Value]) {
        let call = self.container_call(node, &info.name, run);
        let Some(result) = self.invoker().setup(&call, &info.setup, args, true) else {
            return;
        };

        let sets = match result {
            FixtureResult::NoArgs => {
                self.walk_body(node, run, args);
                if let Some(teardown) = &info.teardown {
                    self.invoker().teardown(&call, teardown, args);
                }
                return;
            }
            FixtureResult::ArgSets(sets) => sets,
        };

        let group = GroupId::new(info.id, Some(self.arena.get(run).group()));
        for set in &sets {
            let child = self.arena.child(run, group.clone(), &set.name);
            debug!(node = %node.path, group = %group, run = %self.arena.get(child).hash(), "entering run");
            if self.covers(node, child) {
                self.walk_body(node, child, &set.args);
            }
            if let Some(teardown) = &info.teardown {
                let call = self.container_call(node, &info.name, child);
                self.invoker().teardown(&call, teardown, &set.args);
            }
        }
    }

    fn walk_body(&mut self, node: &TestNode, run: RunId, args: &[Value]) {
        if node.is_leaf() {
            self.run_leaf(node, run, args);
        } else {
            self.walk_container(node, run, args);
        }
    }

    fn walk_container(&mut self, node: &TestNode, run: RunId, args: &[Value]) {
        if let Some(setup) = &node.setup {
            let call = self.container_call(node, &setup.name, run);
            if self.invoker().setup(&call, &setup.func, args, false).is_none() {
                return;
            }
        }
        for child in &node.children {
            self.walk_node(child, run, args);
        }
        if let Some(teardown) = &node.teardown {
            let call = self.container_call(node, &teardown.name, run);
            self.invoker().teardown(&call, &teardown.func, args);
        }
    }

    fn run_leaf(&mut self, node: &TestNode, run: RunId, args: &[Value]) {
        let hash = self.arena.get(run).hash().to_owned();
        if let Some(selection) = self.selection
            && !selection.contains(&node.path, &hash)
        {
            return;
        }
        let Some(body) = &node.body else {
            return;
        };

        if let Some(setup) = &node.setup
            && !self.leaf_setup(node, setup, run, args)
        {
            let instance = self.arena.get(run);
            let hashes = ancestor_hashes(self.arena, run);
            self.store
                .record_fail(&node.path, instance.group(), &hashes);
            return;
        }

        let outcome = {
            let instance = self.arena.get(run);
            let mut ctx = Context::new(
                self.tree,
                &mut *self.store,
                &mut *self.logger,
                &node.path,
                instance,
                args,
            );
            ctx.run_body(body)
        };

        if let Some(teardown) = &node.teardown {
            self.leaf_teardown(node, teardown, run, args);
        }
        self.record(node, run, outcome);
    }

    fn leaf_setup(&mut self, node: &TestNode, setup: &Fixture, run: RunId, args: &[Value]) -> bool {
        let call = self.leaf_call(node, &setup.name, run);
        self.invoker()
            .setup(&call, &setup.func, args, false)
            .is_some()
    }

    fn leaf_teardown(&mut self, node: &TestNode, teardown: &Teardown, run: RunId, args: &[Value]) {
        let call = self.leaf_call(node, &teardown.name, run);
        self.invoker().teardown(&call, &teardown.func, args);
    }

    fn record(&mut self, node: &TestNode, run: RunId, outcome: TestOutcome) {
        let instance = self.arena.get(run);
        let location = Location::new(node.path.clone(), instance.qualifier());
        let outcome = match outcome {
            TestOutcome::Postpone if self.store.is_postponed(&node.path, instance.hash()) => {
                return;
            }
            TestOutcome::Postpone => {
                TestOutcome::Error("postponed without an unsatisfied requirement".to_owned())
            }
            other => other,
        };

        match &outcome {
            TestOutcome::Pass => self.logger.log_pass(&node.path, &location),
            TestOutcome::Fail(reason) => self.logger.log_failure(&node.path, reason, &location),
            TestOutcome::Error(reason) => self.logger.log_error(&node.path, reason, &location),
            TestOutcome::Skip(reason) => self.logger.log_skip(&node.path, reason, &location),
            TestOutcome::Postpone => {}
        }

        let hashes = ancestor_hashes(self.arena, run);
        if outcome == TestOutcome::Pass {
            self.store.record_pass(&node.path, instance.group(), &hashes);
        } else {
            self.store.record_fail(&node.path, instance.group(), &hashes);
        }

        if let Some(status) = outcome.status() {
            self.store.record(TestRecord::new(
                node.path.clone(),
                RecordKind::Test,
                instance.hash(),
                instance.qualifier(),
                status,
                outcome.message().map(str::to_owned),
            ));
        }
    }

    fn container_call(&self, node: &TestNode, fixture: &str, run: RunId) -> FixtureCall {
        self.call(join_path(&node.path, fixture), node, run)
    }

    fn leaf_call(&self, node: &TestNode, fixture: &str, run: RunId) -> FixtureCall {
        self.call(format!("{fixture} for {}", node.path), node, run)
    }

    fn call(&self, source: String, node: &TestNode, run: RunId) -> FixtureCall {
        let instance: &RunInstance = self.arena.get(run);
        FixtureCall {
            source,
            hash: instance.hash().to_owned(),
            location: Location::new(node.path.clone(), instance.qualifier()),
        }
    }
}

/// Hashes of `run` and every parent run, innermost first.
fn ancestor_hashes(arena: &RunArena, run: RunId) -> Vec<String> {
    arena
        .ancestors(run)
        .map(|r| r.hash().to_owned())
        .collect()
}
