use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::runner::result::{Interrupt, TestResult};

/// A setup callable. Receives the inherited positional arguments.
pub type SetupFn = Rc<dyn Fn(&[Value]) -> Result<FixtureResult, Interrupt>>;

/// A teardown callable. Receives the same arguments as the matching setup.
pub type TeardownFn = Rc<dyn Fn(&[Value]) -> TestResult>;

/// One concrete argument list returned by a parameterized setup.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSet {
    /// Run name, used for the run hash and display qualifier.
    pub name: String,
    pub args: Vec<Value>,
}

impl ArgSet {
    /// An argument set named after its values (`"sqlite"`, `"1-true"`).
    pub fn new(args: Vec<Value>) -> Self {
        let name = args.iter().map(label).collect::<Vec<_>>().join("-");
        Self { name, args }
    }

    pub fn named(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

fn label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalized return value of a setup callable.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureResult {
    /// No further parameterization.
    NoArgs,
    /// One run per argument set.
    ArgSets(Vec<ArgSet>),
}

impl FixtureResult {
    /// Build argument sets from plain argument lists, naming each after its values.
    pub fn runs<I>(runs: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        Self::ArgSets(runs.into_iter().map(ArgSet::new).collect())
    }
}

/// Give repeated run names a `#n` suffix so sibling runs keep distinct hashes.
///
/// The first set with a name keeps it; later ones take the smallest free
/// `#n`, skipping names any set already carries.
pub fn disambiguate_names(sets: &mut [ArgSet]) {
    let mut taken: HashSet<String> = sets.iter().map(|s| s.name.clone()).collect();
    let mut kept: HashSet<String> = HashSet::new();
    for set in sets.iter_mut() {
        if kept.insert(set.name.clone()) {
            continue;
        }
        let name = (2..)
            .map(|n| format!("{}#{n}", set.name))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_default();
        taken.insert(name.clone());
        kept.insert(name.clone());
        set.name = name;
    }
}

/// A named setup callable attached to a container or leaf.
#[derive(Clone)]
pub struct Fixture {
    pub name: String,
    pub func: SetupFn,
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture").field("name", &self.name).finish()
    }
}

/// A named teardown callable attached to a container or leaf.
#[derive(Clone)]
pub struct Teardown {
    pub name: String,
    pub func: TeardownFn,
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown").field("name", &self.name).finish()
    }
}

/// A parameterized-run declaration: its setup fans the wrapped node out into
/// one run per returned argument set.
#[derive(Clone)]
pub struct RunInfo {
    pub(crate) id: u32,
    pub name: String,
    pub setup: SetupFn,
    pub teardown: Option<TeardownFn>,
}

impl RunInfo {
    /// Declare a parameterization. The id is assigned when the tree is built.
    pub fn new<F>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&[Value]) -> Result<FixtureResult, Interrupt> + 'static,
    {
        Self {
            id: 0,
            name: name.into(),
            setup: Rc::new(setup),
            teardown: None,
        }
    }

    /// Parameterize over fixed argument lists.
    pub fn over<I>(name: impl Into<String>, runs: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let runs: Vec<Vec<Value>> = runs.into_iter().collect();
        Self::new(name, move |_| Ok(FixtureResult::runs(runs.clone())))
    }

    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&[Value]) -> TestResult + 'static,
    {
        self.teardown = Some(Rc::new(teardown));
        self
    }

    /// Id of the run group this declaration opens; `0` until the tree is built.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Debug for RunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arg_set_named_after_values() {
        assert_eq!(ArgSet::new(vec![json!("sqlite")]).name, "sqlite");
        assert_eq!(ArgSet::new(vec![json!(1), json!(true)]).name, "1-true");
        assert_eq!(ArgSet::new(vec![json!({"a": 1})]).name, r#"{"a":1}"#);
    }

    #[test]
    fn arg_set_explicit_name() {
        let set = ArgSet::named("pg", vec![json!("postgres://")]);
        assert_eq!(set.name, "pg");
        assert_eq!(set.args, vec![json!("postgres://")]);
    }

    #[test]
    fn fixture_result_runs_builds_named_sets() {
        let result = FixtureResult::runs(vec![vec![json!("a")], vec![json!("b")]]);
        match result {
            FixtureResult::ArgSets(sets) => {
                let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            FixtureResult::NoArgs => panic!("expected argument sets"),
        }
    }

    #[test]
    fn disambiguate_suffixes_repeats_only() {
        let mut sets = vec![
            ArgSet::new(vec![json!("x")]),
            ArgSet::new(vec![json!("y")]),
            ArgSet::new(vec![json!("x")]),
            ArgSet::new(vec![json!("x")]),
        ];
        disambiguate_names(&mut sets);
        let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "x#2", "x#3"]);
    }

    #[test]
    fn disambiguate_skips_names_already_taken() {
        let mut sets = vec![
            ArgSet::named("x", vec![]),
            ArgSet::named("x", vec![]),
            ArgSet::named("x#2", vec![]),
        ];
        disambiguate_names(&mut sets);
        let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["x", "x#3", "x#2"]);
    }

    #[test]
    fn disambiguate_suffix_never_matches_a_later_name() {
        let mut sets = vec![
            ArgSet::named("x", vec![]),
            ArgSet::named("x", vec![]),
            ArgSet::named("x", vec![]),
            ArgSet::named("x#3", vec![]),
            ArgSet::named("x#2", vec![]),
        ];
        disambiguate_names(&mut sets);
        let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["x", "x#4", "x#5", "x#3", "x#2"]);
    }

    #[test]
    fn run_info_over_returns_fixed_runs() {
        let info = RunInfo::over("backend", vec![vec![json!("sqlite")], vec![json!("pg")]]);
        assert_eq!(info.name, "backend");
        assert_eq!(info.id(), 0);
        let result = (info.setup)(&[]).unwrap();
        assert_eq!(
            result,
            FixtureResult::ArgSets(vec![
                ArgSet::new(vec![json!("sqlite")]),
                ArgSet::new(vec![json!("pg")]),
            ])
        );
    }

    #[test]
    fn run_info_setup_sees_inherited_args() {
        let info = RunInfo::new("nested", |args| {
            Ok(FixtureResult::runs(vec![vec![args[0].clone(), json!(2)]]))
        });
        let result = (info.setup)(&[json!(1)]).unwrap();
        assert_eq!(result, FixtureResult::runs(vec![vec![json!(1), json!(2)]]));
    }
}
