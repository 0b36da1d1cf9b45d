//! Turns a parsed suite into a [`TestTree`] whose callables run step scripts.

use std::rc::Rc;

use serde_json::Value;

use crate::runner::context::Context;
use crate::runner::result::{Interrupt, TestResult};
use crate::suite::manifest::{NodeSpec, ParamSpec, Step, StepSpec, into_steps};
use crate::suite::{SuiteError, SuiteFile};
use crate::tree::{ArgSet, FixtureResult, NodeKind, RunInfo, TestNode, TestTree};

/// Build the test tree a suite describes.
///
/// # Errors
///
/// Returns [`SuiteError::Invalid`] for malformed nodes or steps and
/// [`SuiteError::Tree`] for structural problems such as duplicate names.
pub fn build_tree(suite: SuiteFile) -> Result<TestTree, SuiteError> {
    let SuiteFile { name, nodes } = suite;
    let nodes = build_nodes(nodes, &name)?;
    Ok(TestTree::new(name, nodes)?)
}

fn build_nodes(specs: Vec<NodeSpec>, parent: &str) -> Result<Vec<TestNode>, SuiteError> {
    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| build_node(spec, &format!("{parent} node {}", i + 1), parent))
        .collect()
}

fn build_node(spec: NodeSpec, slot: &str, parent: &str) -> Result<TestNode, SuiteError> {
    let (kind, name) = spec.kind(slot).map(|(kind, name)| (kind, name.to_owned()))?;
    let at = format!("{parent}::{name}");

    let mut node = match kind {
        NodeKind::Function => {
            if !spec.nodes.is_empty() {
                return Err(SuiteError::invalid(&at, "a function cannot have child nodes"));
            }
            let steps = into_steps(spec.steps, &at)?;
            TestNode::function(name, move |ctx, _| run_steps(ctx, &steps))
        }
        container => {
            if !spec.steps.is_empty() {
                return Err(SuiteError::invalid(
                    &at,
                    format!("a {container} cannot have steps; only functions run steps"),
                ));
            }
            let children = build_nodes(spec.nodes, &at)?;
            let node = match container {
                NodeKind::Directory => TestNode::directory(name),
                NodeKind::File => TestNode::file(name),
                _ => TestNode::class(name),
            };
            node.children(children)
        }
    };

    if let Some(setup) = spec.setup {
        let steps = fixture_steps(setup, &format!("{at} setup"))?;
        node = node.with_setup(move |_| run_fixture(&steps));
    }
    if let Some(teardown) = spec.teardown {
        let steps = fixture_steps(teardown, &format!("{at} teardown"))?;
        node = node.with_teardown(move |_| run_fixture(&steps));
    }
    if let Some(param) = spec.parameterize {
        node = node.parameterized(run_info(param, &at)?);
    }
    Ok(node)
}

fn run_info(param: ParamSpec, at: &str) -> Result<RunInfo, SuiteError> {
    let at = format!("{at} parameterize");
    if let Some(names) = &param.names
        && names.len() != param.runs.len()
    {
        return Err(SuiteError::invalid(
            at,
            format!(
                "{} names given for {} runs",
                names.len(),
                param.runs.len()
            ),
        ));
    }

    let ParamSpec {
        name,
        runs,
        names,
        skip,
        teardown,
    } = param;
    let info = RunInfo::new(name, move |_| {
        if let Some(reason) = &skip {
            return Err(Interrupt::skip(reason.clone()));
        }
        let sets: Vec<ArgSet> = match &names {
            Some(names) => names
                .iter()
                .zip(&runs)
                .map(|(name, args)| ArgSet::named(name.clone(), args.clone()))
                .collect(),
            None => runs.iter().cloned().map(ArgSet::new).collect(),
        };
        Ok(FixtureResult::ArgSets(sets))
    });

    match teardown {
        Some(teardown) => {
            let steps = fixture_steps(teardown, &format!("{at} teardown"))?;
            Ok(info.with_teardown(move |_| run_fixture(&steps)))
        }
        None => Ok(info),
    }
}

fn fixture_steps(specs: Vec<StepSpec>, at: &str) -> Result<Rc<[Step]>, SuiteError> {
    let steps = into_steps(specs, at)?;
    if let Some(step) = steps.iter().find(|step| !step.allowed_in_fixture()) {
        return Err(SuiteError::invalid(
            at,
            format!("fixtures may only fail, error or skip, found {step:?}"),
        ));
    }
    Ok(steps.into())
}

fn run_fixture(steps: &[Step]) -> TestResult {
    for step in steps {
        match step {
            Step::Fail(message) => return Err(Interrupt::failure(message.clone())),
            Step::Error(message) => return Err(Interrupt::error(message.clone())),
            Step::Skip(reason) => return Err(Interrupt::skip(reason.clone())),
            _ => {}
        }
    }
    Ok(())
}

/// Execute a test body script against the dependency context.
///
/// # Errors
///
/// The first step that fails, errors, skips or postpones ends the script.
pub fn run_steps(ctx: &mut Context<'_>, steps: &[Step]) -> TestResult {
    for step in steps {
        match step {
            Step::Requires(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                ctx.requires_all(&names)?;
            }
            Step::Set(value) => ctx.set(value.clone()),
            Step::Print(text) => ctx.print(text),
            Step::Fail(message) => return Err(Interrupt::failure(message.clone())),
            Step::Error(message) => return Err(Interrupt::error(message.clone())),
            Step::Skip(reason) => return Err(Interrupt::skip(reason.clone())),
            Step::Expect { name, equals } => {
                let value = ctx.requires(name)?;
                if value.as_ref() != Some(equals) {
                    return Err(Interrupt::failure(format!(
                        "expected {name} to publish {equals}, got {}",
                        describe(value.as_ref())
                    )));
                }
            }
            Step::Subtest { name, steps } => {
                ctx.subtest(name, |ctx| run_steps(ctx, steps))?;
            }
        }
    }
    Ok(())
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "nothing".to_owned(), Value::to_string)
}
