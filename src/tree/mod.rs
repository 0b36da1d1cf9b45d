pub mod fixture;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use crate::runner::context::Context;
use crate::runner::result::TestResult;

pub use fixture::{ArgSet, Fixture, FixtureResult, RunInfo, Teardown};

/// Separator between node names in a fully-qualified test name.
pub const PATH_SEPARATOR: &str = "::";

/// A test body. Receives the dependency context and the run's arguments.
pub type TestFn = Rc<dyn Fn(&mut Context<'_>, &[Value]) -> TestResult>;

/// The four node kinds discovery produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
    Class,
    Function,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::File => write!(f, "file"),
            Self::Class => write!(f, "class"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// Structural problems in a discovered tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid node name '{0}': names must be non-empty and must not contain '::'")]
    InvalidName(String),
    #[error("duplicate node name '{name}' under '{parent}'")]
    DuplicateName { parent: String, name: String },
    #[error("function '{0}' cannot have child nodes")]
    FunctionWithChildren(String),
}

/// One node of the discovered test tree.
#[derive(Clone)]
pub struct TestNode {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) path: String,
    pub(crate) setup: Option<Fixture>,
    pub(crate) teardown: Option<Teardown>,
    pub(crate) run: Option<RunInfo>,
    pub(crate) body: Option<TestFn>,
    pub(crate) children: Vec<TestNode>,
}

impl TestNode {
    fn container(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            path: String::new(),
            setup: None,
            teardown: None,
            run: None,
            body: None,
            children: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::container(name, NodeKind::Directory)
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::container(name, NodeKind::File)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::container(name, NodeKind::Class)
    }

    /// A test function or method.
    pub fn function<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Context<'_>, &[Value]) -> TestResult + 'static,
    {
        let mut node = Self::container(name, NodeKind::Function);
        node.body = Some(Rc::new(body));
        node
    }

    /// Attach a setup fixture. On a container it runs once before the
    /// children; on a function it runs before every invocation.
    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&[Value]) -> TestResult + 'static,
    {
        self.setup = Some(Fixture {
            name: "setup".to_owned(),
            func: Rc::new(move |args: &[Value]| setup(args).map(|()| FixtureResult::NoArgs)),
        });
        self
    }

    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&[Value]) -> TestResult + 'static,
    {
        self.teardown = Some(Teardown {
            name: "teardown".to_owned(),
            func: Rc::new(teardown),
        });
        self
    }

    /// Wrap this node in a parameterized-run declaration.
    pub fn parameterized(mut self, run: RunInfo) -> Self {
        self.run = Some(run);
        self
    }

    pub fn child(mut self, node: TestNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn children<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = TestNode>,
    {
        self.children.extend(nodes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Fully-qualified name; empty until the node is placed in a [`TestTree`].
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn child_nodes(&self) -> &[TestNode] {
        &self.children
    }

    pub fn run_info(&self) -> Option<&RunInfo> {
        self.run.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Function
    }

    /// Copy of this node without its children.
    fn shallow(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            path: self.path.clone(),
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
            run: self.run.clone(),
            body: self.body.clone(),
            children: Vec::new(),
        }
    }
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("run", &self.run)
            .field("children", &self.children)
            .finish()
    }
}

/// A validated test tree with every node's fully-qualified name assigned.
#[derive(Debug, Clone)]
pub struct TestTree {
    name: String,
    nodes: Vec<TestNode>,
    tests: Vec<String>,
    index: HashSet<String>,
}

impl TestTree {
    /// Validate `nodes`, assign fully-qualified names and run-group ids.
    ///
    /// Run-group ids are numbered from 1 in tree order; 0 is the implicit root group.
    ///
    /// # Errors
    ///
    /// Returns a [`TreeError`] for empty or `::`-containing names, duplicate
    /// sibling names, or functions with children.
    pub fn new(name: impl Into<String>, mut nodes: Vec<TestNode>) -> Result<Self, TreeError> {
        let mut next_group = 1;
        let mut tests = Vec::new();
        check_siblings("", &nodes)?;
        for node in &mut nodes {
            assign(node, "", &mut next_group, &mut tests)?;
        }
        let index = tests.iter().cloned().collect();
        Ok(Self {
            name: name.into(),
            nodes,
            tests,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    /// Fully-qualified test names in tree order.
    pub fn tests(&self) -> &[String] {
        &self.tests
    }

    pub fn contains(&self, test: &str) -> bool {
        self.index.contains(test)
    }

    /// Resolve `name` relative to the test `caller`.
    ///
    /// Candidates are tried from the caller's innermost container outward to
    /// the root; the first one naming a discovered test wins. When none does,
    /// the innermost candidate is returned.
    pub fn resolve_name(&self, caller: &str, name: &str) -> String {
        let mut scopes: Vec<&str> = Vec::new();
        let mut scope = caller;
        while let Some(idx) = scope.rfind(PATH_SEPARATOR) {
            scope = &scope[..idx];
            scopes.push(scope);
        }
        scopes.push("");

        let candidates: Vec<String> = scopes.iter().map(|s| join_path(s, name)).collect();
        candidates
            .iter()
            .find(|c| self.index.contains(c.as_str()))
            .unwrap_or(&candidates[0])
            .clone()
    }

    /// The tree pruned to the containers that hold one of `order`'s tests,
    /// with siblings reordered by the earliest position of their tests in `order`.
    pub fn restrict(&self, order: &[String]) -> Vec<TestNode> {
        let mut rank: HashMap<&str, usize> = HashMap::new();
        for (i, test) in order.iter().enumerate() {
            rank.entry(test.as_str()).or_insert(i);
        }
        let mut kept: Vec<(usize, TestNode)> =
            self.nodes.iter().filter_map(|n| prune(n, &rank)).collect();
        kept.sort_by_key(|(r, _)| *r);
        kept.into_iter().map(|(_, n)| n).collect()
    }

    /// Total number of nodes, containers included.
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[TestNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        count(&self.nodes)
    }
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}{PATH_SEPARATOR}{name}")
    }
}

fn check_siblings(parent: &str, nodes: &[TestNode]) -> Result<(), TreeError> {
    let mut seen = HashSet::new();
    for node in nodes {
        if node.name.is_empty() || node.name.contains(PATH_SEPARATOR) {
            return Err(TreeError::InvalidName(node.name.clone()));
        }
        if !seen.insert(node.name.as_str()) {
            return Err(TreeError::DuplicateName {
                parent: if parent.is_empty() { "<root>".to_owned() } else { parent.to_owned() },
                name: node.name.clone(),
            });
        }
    }
    Ok(())
}

fn assign(
    node: &mut TestNode,
    parent: &str,
    next_group: &mut u32,
    tests: &mut Vec<String>,
) -> Result<(), TreeError> {
    node.path = join_path(parent, &node.name);
    if let Some(run) = &mut node.run {
        run.id = *next_group;
        *next_group += 1;
    }
    if node.is_leaf() {
        if !node.children.is_empty() {
            return Err(TreeError::FunctionWithChildren(node.path.clone()));
        }
        tests.push(node.path.clone());
        return Ok(());
    }
    check_siblings(&node.path, &node.children)?;
    let path = node.path.clone();
    for child in &mut node.children {
        assign(child, &path, next_group, tests)?;
    }
    Ok(())
}

fn prune(node: &TestNode, rank: &HashMap<&str, usize>) -> Option<(usize, TestNode)> {
    if node.is_leaf() {
        return rank.get(node.path.as_str()).map(|r| (*r, node.clone()));
    }
    let mut kept: Vec<(usize, TestNode)> =
        node.children.iter().filter_map(|c| prune(c, rank)).collect();
    if kept.is_empty() {
        return None;
    }
    kept.sort_by_key(|(r, _)| *r);
    let first = kept[0].0;
    let mut pruned = node.shallow();
    pruned.children = kept.into_iter().map(|(_, n)| n).collect();
    Some((first, pruned))
}
