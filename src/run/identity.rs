use std::fmt;

/// Identifies a parameterization point by the chain of run-group ids leading to it.
///
/// The implicit root group is `0`; every other id is the id of the
/// parameterized declaration that opened the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    path: Vec<u32>,
}

impl GroupId {
    /// The implicit group every run tree starts in.
    pub fn root() -> Self {
        Self { path: vec![0] }
    }

    /// Open a group `id` nested under `parent`, or a top-level group when
    /// there is no parent.
    pub fn new(id: u32, parent: Option<&GroupId>) -> Self {
        let mut path = parent.map(|p| p.path.clone()).unwrap_or_default();
        path.push(id);
        Self { path }
    }

    /// The id of this group (the last element of its path).
    pub fn id(&self) -> u32 {
        self.path[self.path.len() - 1]
    }

    /// Ancestor ids, outermost first, ending with this group's id.
    pub fn path(&self) -> &[u32] {
        &self.path
    }

    /// Number of leading ids shared with `other`.
    pub fn common_prefix_len(&self, other: &GroupId) -> usize {
        self.path
            .iter()
            .zip(&other.path)
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.path.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Index of a [`RunInstance`] inside a [`RunArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(usize);

/// One concrete execution context produced by expanding a parameterized fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstance {
    parent: Option<RunId>,
    group: GroupId,
    path: Vec<String>,
    hash: String,
    qualifier: String,
}

impl RunInstance {
    fn new(group: GroupId, path: Vec<String>, parent: Option<RunId>) -> Self {
        Self {
            parent,
            group,
            hash: run_hash(&path),
            qualifier: qualifier(&path),
            path,
        }
    }

    pub fn parent(&self) -> Option<RunId> {
        self.parent
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Run names from the outermost parameterization inward.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Stable identity of the run: equal hashes denote the same run.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Display suffix: empty for the root run, otherwise `" (a, b)"`.
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }
}

/// Join a run path into its hash.
///
/// Components are comma-joined; commas and backslashes inside a component are
/// escaped and an empty component is written as `\e`, so distinct paths never
/// produce the same hash.
pub fn run_hash(path: &[String]) -> String {
    path.iter()
        .map(|name| escape_component(name))
        .collect::<Vec<_>>()
        .join(",")
}

/// Hashes of every prefix of `path`, from the full path down to the root (`""`).
pub fn prefix_hashes(path: &[String]) -> Vec<String> {
    (0..=path.len()).rev().map(|len| run_hash(&path[..len])).collect()
}

/// Display qualifier for a run path.
pub fn qualifier(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" ({})", path.join(", "))
    }
}

fn escape_component(name: &str) -> String {
    if name.is_empty() {
        return "\\e".to_owned();
    }
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch == ',' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Arena holding every run instance created during a scheduler run.
///
/// Parents are referenced by index, so the tree needs no back-pointers.
#[derive(Debug, Clone)]
pub struct RunArena {
    runs: Vec<RunInstance>,
}

impl RunArena {
    /// Create an arena containing only the root run.
    pub fn new() -> Self {
        Self {
            runs: vec![RunInstance::new(GroupId::root(), Vec::new(), None)],
        }
    }

    pub fn root(&self) -> RunId {
        RunId(0)
    }

    /// Create a child run named `name` in `group` under `parent`.
    pub fn child(&mut self, parent: RunId, group: GroupId, name: &str) -> RunId {
        let mut path = self.get(parent).path.clone();
        path.push(name.to_owned());
        let id = RunId(self.runs.len());
        self.runs.push(RunInstance::new(group, path, Some(parent)));
        id
    }

    pub fn get(&self, id: RunId) -> &RunInstance {
        &self.runs[id.0]
    }

    /// The run itself followed by each parent up to the root.
    pub fn ancestors(&self, id: RunId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: Some(id),
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl Default for RunArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a run and its parents. See [`RunArena::ancestors`].
pub struct Ancestors<'a> {
    arena: &'a RunArena,
    next: Option<RunId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a RunInstance;

    fn next(&mut self) -> Option<Self::Item> {
        let run = self.arena.get(self.next?);
        self.next = run.parent;
        Some(run)
    }
}
