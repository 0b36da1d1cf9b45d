use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;

use crate::run::identity::{GroupId, RunInstance, run_hash};
use crate::runner::result::TestRecord;

/// Completion ledger for one fully-qualified test name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    group: GroupId,
    runs: HashMap<String, bool>,
}

impl LedgerEntry {
    /// Group the test completed in first.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Whether the test passed under `hash`, if it completed there at all.
    pub fn get(&self, hash: &str) -> Option<bool> {
        self.runs.get(hash).copied()
    }
}

/// Which run of a prerequisite a postponed test is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// The prerequisite has not completed under any run.
    Any,
    /// A specific run path (possibly truncated to a common ancestor).
    Run(Vec<String>),
}

impl RunTarget {
    pub fn path(&self) -> &[String] {
        match self {
            Self::Any => &[],
            Self::Run(path) => path,
        }
    }

    pub fn hash(&self) -> String {
        run_hash(self.path())
    }
}

impl fmt::Display for RunTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any run"),
            Self::Run(path) if path.is_empty() => write!(f, "the root run"),
            Self::Run(path) => write!(f, "run ({})", path.join(", ")),
        }
    }
}

/// One (test, run) that asked for prerequisites which had not completed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostponedRun {
    pub test: String,
    pub hash: String,
    pub path: Vec<String>,
    pub group: GroupId,
    /// Prerequisite name → the run it must complete under.
    pub missing: BTreeMap<String, RunTarget>,
}

impl PostponedRun {
    pub fn new(test: impl Into<String>, run: &RunInstance) -> Self {
        Self {
            test: test.into(),
            hash: run.hash().to_owned(),
            path: run.path().to_vec(),
            group: run.group().clone(),
            missing: BTreeMap::new(),
        }
    }

    pub fn qualifier(&self) -> String {
        crate::run::identity::qualifier(&self.path)
    }
}

/// Everything the scheduler learns while running: the completion ledger,
/// published values, postponed runs and reported statuses.
#[derive(Debug, Default)]
pub struct ResultStore {
    ledger: HashMap<String, LedgerEntry>,
    values: HashMap<String, HashMap<String, Value>>,
    postponed: Vec<PostponedRun>,
    records: Vec<TestRecord>,
    record_index: HashMap<(String, String), usize>,
    revision: usize,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger_entry(&self, test: &str) -> Option<&LedgerEntry> {
        self.ledger.get(test)
    }

    pub fn has_entry(&self, test: &str) -> bool {
        self.ledger.contains_key(test)
    }

    /// Ledger value for `test` under `hash`.
    pub fn lookup(&self, test: &str, hash: &str) -> Option<bool> {
        self.ledger.get(test).and_then(|e| e.get(hash))
    }

    /// Mark `test` passed at each of `hashes`. A hash already recorded as
    /// failed stays failed.
    pub fn record_pass(&mut self, test: &str, group: &GroupId, hashes: &[String]) {
        let entry = self.entry(test, group);
        for hash in hashes {
            entry.runs.entry(hash.clone()).or_insert(true);
        }
        self.clear_postponed(test, hashes);
        self.revision += 1;
    }

    /// Mark `test` failed at each of `hashes`.
    pub fn record_fail(&mut self, test: &str, group: &GroupId, hashes: &[String]) {
        let entry = self.entry(test, group);
        for hash in hashes {
            entry.runs.insert(hash.clone(), false);
        }
        self.clear_postponed(test, hashes);
        self.revision += 1;
    }

    fn entry(&mut self, test: &str, group: &GroupId) -> &mut LedgerEntry {
        self.ledger
            .entry(test.to_owned())
            .or_insert_with(|| LedgerEntry {
                group: group.clone(),
                runs: HashMap::new(),
            })
    }

    fn clear_postponed(&mut self, test: &str, hashes: &[String]) {
        self.postponed
            .retain(|p| !(p.test == test && hashes.contains(&p.hash)));
    }

    pub fn publish(&mut self, test: &str, hash: &str, value: Value) {
        self.values
            .entry(test.to_owned())
            .or_default()
            .insert(hash.to_owned(), value);
    }

    pub fn published(&self, test: &str, hash: &str) -> Option<&Value> {
        self.values.get(test).and_then(|runs| runs.get(hash))
    }

    /// Add `missing` to the postponed record of `run`, creating it if needed.
    pub fn postpone<I>(&mut self, mut run: PostponedRun, missing: I)
    where
        I: IntoIterator<Item = (String, RunTarget)>,
    {
        let existing = self
            .postponed
            .iter()
            .position(|p| p.test == run.test && p.hash == run.hash);
        match existing {
            Some(idx) => self.postponed[idx].missing.extend(missing),
            None => {
                run.missing.extend(missing);
                self.postponed.push(run);
            }
        }
    }

    pub fn postponed(&self) -> &[PostponedRun] {
        &self.postponed
    }

    pub fn is_postponed(&self, test: &str, hash: &str) -> bool {
        self.postponed
            .iter()
            .any(|p| p.test == test && p.hash == hash)
    }

    /// Remove and return every postponed record.
    pub fn take_postponed(&mut self) -> Vec<PostponedRun> {
        std::mem::take(&mut self.postponed)
    }

    /// Report a status. A later report for the same source and run replaces
    /// the earlier one in place.
    pub fn record(&mut self, record: TestRecord) {
        let key = (record.source.clone(), record.run_hash.clone());
        match self.record_index.get(&key) {
            Some(&idx) => self.records[idx] = record,
            None => {
                self.record_index.insert(key, self.records.len());
                self.records.push(record);
            }
        }
        self.revision += 1;
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    pub fn record_for(&self, source: &str, hash: &str) -> Option<&TestRecord> {
        self.record_index
            .get(&(source.to_owned(), hash.to_owned()))
            .map(|&idx| &self.records[idx])
    }

    /// Bumped on every ledger write and status report.
    pub fn revision(&self) -> usize {
        self.revision
    }

    /// True iff no record failed or errored.
    pub fn success(&self) -> bool {
        !self.records.iter().any(TestRecord::is_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::identity::RunArena;
    use crate::runner::result::{RecordKind, TestStatus};
    use serde_json::json;

    fn hashes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn store_pass_is_written_at_every_hash() {
        let mut store = ResultStore::new();
        store.record_pass("t", &GroupId::root(), &hashes(&["a,b", "a", ""]));
        assert_eq!(store.lookup("t", "a,b"), Some(true));
        assert_eq!(store.lookup("t", "a"), Some(true));
        assert_eq!(store.lookup("t", ""), Some(true));
        assert_eq!(store.lookup("t", "z"), None);
        assert_eq!(store.lookup("other", ""), None);
    }

    #[test]
    fn store_false_is_never_overturned() {
        let mut store = ResultStore::new();
        let root = GroupId::root();
        store.record_pass("t", &root, &hashes(&["x", ""]));
        store.record_fail("t", &root, &hashes(&["y", ""]));
        store.record_pass("t", &root, &hashes(&["z", ""]));
        assert_eq!(store.lookup("t", "x"), Some(true));
        assert_eq!(store.lookup("t", "y"), Some(false));
        assert_eq!(store.lookup("t", "z"), Some(true));
        assert_eq!(store.lookup("t", ""), Some(false));
    }

    #[test]
    fn store_entry_keeps_first_group() {
        let mut store = ResultStore::new();
        let g1 = GroupId::new(1, Some(&GroupId::root()));
        store.record_pass("t", &g1, &hashes(&["a", ""]));
        store.record_pass("t", &GroupId::root(), &hashes(&[""]));
        assert_eq!(store.ledger_entry("t").unwrap().group(), &g1);
        assert!(store.has_entry("t"));
    }

    #[test]
    fn store_published_values_are_per_hash() {
        let mut store = ResultStore::new();
        store.publish("t", "a", json!(1));
        store.publish("t", "b", json!({"k": 2}));
        assert_eq!(store.published("t", "a"), Some(&json!(1)));
        assert_eq!(store.published("t", "b"), Some(&json!({"k": 2})));
        assert_eq!(store.published("t", ""), None);
    }

    #[test]
    fn store_postpone_extends_existing_record() {
        let arena = RunArena::new();
        let run = arena.get(arena.root());
        let mut store = ResultStore::new();
        store.postpone(
            PostponedRun::new("b", run),
            vec![("a".to_string(), RunTarget::Any)],
        );
        store.postpone(
            PostponedRun::new("b", run),
            vec![("c".to_string(), RunTarget::Run(vec![]))],
        );
        assert_eq!(store.postponed().len(), 1);
        let missing = &store.postponed()[0].missing;
        assert_eq!(missing.get("a"), Some(&RunTarget::Any));
        assert_eq!(missing.get("c"), Some(&RunTarget::Run(vec![])));
        assert!(store.is_postponed("b", ""));
    }

    #[test]
    fn store_completion_clears_postponed_record() {
        let arena = RunArena::new();
        let run = arena.get(arena.root());
        let mut store = ResultStore::new();
        store.postpone(
            PostponedRun::new("b", run),
            vec![("a".to_string(), RunTarget::Any)],
        );
        store.record_fail("b", &GroupId::root(), &hashes(&[""]));
        assert!(store.postponed().is_empty());
    }

    #[test]
    fn store_take_postponed_empties_set() {
        let arena = RunArena::new();
        let mut store = ResultStore::new();
        store.postpone(
            PostponedRun::new("b", arena.get(arena.root())),
            vec![("a".to_string(), RunTarget::Any)],
        );
        let taken = store.take_postponed();
        assert_eq!(taken.len(), 1);
        assert!(store.postponed().is_empty());
    }

    #[test]
    fn store_record_replaces_same_source_and_run() {
        let mut store = ResultStore::new();
        store.record(TestRecord::new("t", RecordKind::Test, "", "", TestStatus::Skipped, None));
        store.record(TestRecord::new("u", RecordKind::Test, "", "", TestStatus::Passed, None));
        store.record(TestRecord::new(
            "t",
            RecordKind::Test,
            "",
            "",
            TestStatus::Error,
            Some("cycle".into()),
        ));
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.records()[0].status, TestStatus::Error);
        assert_eq!(store.record_for("u", "").unwrap().status, TestStatus::Passed);
        assert!(!store.success());
    }

    #[test]
    fn store_success_ignores_skips() {
        let mut store = ResultStore::new();
        assert!(store.success());
        store.record(TestRecord::new("t", RecordKind::Test, "", "", TestStatus::Skipped, None));
        assert!(store.success());
    }

    #[test]
    fn store_revision_moves_on_writes() {
        let mut store = ResultStore::new();
        let start = store.revision();
        store.record_pass("t", &GroupId::root(), &hashes(&[""]));
        assert!(store.revision() > start);
    }

    #[test]
    fn run_target_display_and_hash() {
        assert_eq!(RunTarget::Any.to_string(), "any run");
        assert_eq!(RunTarget::Run(vec![]).to_string(), "the root run");
        let target = RunTarget::Run(vec!["a".into(), "b".into()]);
        assert_eq!(target.to_string(), "run (a, b)");
        assert_eq!(target.hash(), "a,b");
        assert_eq!(RunTarget::Any.hash(), "");
    }
}
