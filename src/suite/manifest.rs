use serde::Deserialize;
use serde_json::Value;

use crate::suite::SuiteError;
use crate::tree::NodeKind;

/// Top-level suite document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// One node of a suite. Exactly one of the four kind keys names it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub setup: Option<Vec<StepSpec>>,
    #[serde(default)]
    pub teardown: Option<Vec<StepSpec>>,
    #[serde(default)]
    pub parameterize: Option<ParamSpec>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl NodeSpec {
    /// The node's kind and name.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Invalid`] unless exactly one kind key is set.
    pub fn kind(&self, at: &str) -> Result<(NodeKind, &str), SuiteError> {
        let keys = [
            (NodeKind::Directory, &self.directory),
            (NodeKind::File, &self.file),
            (NodeKind::Class, &self.class),
            (NodeKind::Function, &self.function),
        ];
        let mut named = keys
            .into_iter()
            .filter_map(|(kind, name)| name.as_deref().map(|n| (kind, n)));
        match (named.next(), named.next()) {
            (Some(found), None) => Ok(found),
            (None, _) => Err(SuiteError::invalid(
                at,
                "node needs one of: directory, file, class, function",
            )),
            (Some(_), Some(_)) => Err(SuiteError::invalid(
                at,
                "node has more than one of: directory, file, class, function",
            )),
        }
    }
}

/// A parameterized-run declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub runs: Vec<Vec<Value>>,
    /// Explicit run names, one per entry of `runs`.
    #[serde(default)]
    pub names: Option<Vec<String>>,
    /// Skip the whole parameterized subtree with this reason.
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub teardown: Option<Vec<StepSpec>>,
}

/// `requires: a` or `requires: [a, b]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectSpec {
    pub name: String,
    pub equals: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtestSpec {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// Raw step as written; exactly one field may be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    #[serde(default)]
    pub requires: Option<Names>,
    #[serde(default)]
    pub set: Option<Value>,
    #[serde(default)]
    pub print: Option<String>,
    #[serde(default)]
    pub fail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub expect: Option<ExpectSpec>,
    #[serde(default)]
    pub subtest: Option<SubtestSpec>,
}

/// A validated step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Requires(Vec<String>),
    Set(Value),
    Print(String),
    Fail(String),
    Error(String),
    Skip(String),
    Expect { name: String, equals: Value },
    Subtest { name: String, steps: Vec<Step> },
}

impl Step {
    /// Whether a fixture may run this step.
    pub fn allowed_in_fixture(&self) -> bool {
        matches!(self, Self::Fail(_) | Self::Error(_) | Self::Skip(_))
    }
}

impl StepSpec {
    /// Validate into a [`Step`].
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Invalid`] when zero or several fields are set.
    pub fn into_step(self, at: &str) -> Result<Step, SuiteError> {
        let mut steps = Vec::new();
        if let Some(names) = self.requires {
            steps.push(Step::Requires(names.into_vec()));
        }
        if let Some(value) = self.set {
            steps.push(Step::Set(value));
        }
        if let Some(text) = self.print {
            steps.push(Step::Print(text));
        }
        if let Some(message) = self.fail {
            steps.push(Step::Fail(message));
        }
        if let Some(message) = self.error {
            steps.push(Step::Error(message));
        }
        if let Some(reason) = self.skip {
            steps.push(Step::Skip(reason));
        }
        if let Some(expect) = self.expect {
            steps.push(Step::Expect {
                name: expect.name,
                equals: expect.equals,
            });
        }
        if let Some(subtest) = self.subtest {
            let inner = format!("{at}::{}", subtest.name);
            let steps_inner = into_steps(subtest.steps, &inner)?;
            steps.push(Step::Subtest {
                name: subtest.name,
                steps: steps_inner,
            });
        }

        if steps.len() != 1 {
            return Err(SuiteError::invalid(
                at,
                format!("a step must set exactly one action, found {}", steps.len()),
            ));
        }
        Ok(steps.remove(0))
    }
}

/// Validate a list of raw steps.
///
/// # Errors
///
/// Returns the first invalid step's error.
pub fn into_steps(specs: Vec<StepSpec>, at: &str) -> Result<Vec<Step>, SuiteError> {
    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| spec.into_step(&format!("{at} step {}", i + 1)))
        .collect()
}
