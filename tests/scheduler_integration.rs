//! End-to-end scheduler tests: trees built in code, run to a fixpoint.

use std::cell::RefCell;
use std::rc::Rc;

use prereq::runner::executor::{RunConfig, Scheduler, TestRunResult};
use prereq::runner::logger::EventKind;
use prereq::runner::result::{Interrupt, RecordKind, TestStatus};
use prereq::tree::{FixtureResult, RunInfo, TestNode, TestTree};
use serde_json::{Value, json};

fn run(tree: &TestTree) -> (Scheduler, TestRunResult) {
    let mut sched = Scheduler::new(RunConfig::default());
    let result = sched.run(tree);
    (sched, result)
}

fn status(sched: &Scheduler, test: &str, hash: &str) -> Option<TestStatus> {
    sched.store().record_for(test, hash).map(|r| r.status)
}

fn requires(name: &'static str) -> TestNode {
    TestNode::function(format!("needs_{name}"), move |ctx, _| {
        ctx.requires(name)?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_prerequisite_discovered_after_dependent() {
    let tree = TestTree::new(
        "scenario_a",
        vec![
            TestNode::function("b", |ctx, _| {
                let value = ctx.requires("a")?;
                if value != Some(json!(42)) {
                    return Err(Interrupt::failure(format!("got {value:?}")));
                }
                Ok(())
            }),
            TestNode::function("a", |ctx, _| {
                ctx.set(42);
                Ok(())
            }),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    assert_eq!(result.passes, 2);
    assert_eq!(status(&sched, "a", ""), Some(TestStatus::Passed));
    assert_eq!(status(&sched, "b", ""), Some(TestStatus::Passed));
    let order: Vec<&str> = result.records.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(order, vec!["a", "b"]);
    assert!(result.summary.success());
}

#[test]
fn scenario_two_node_cycle_reports_one_error() {
    let tree = TestTree::new(
        "scenario_b",
        vec![
            TestNode::function("a", |ctx, _| {
                ctx.requires("b")?;
                Ok(())
            }),
            TestNode::function("b", |ctx, _| {
                ctx.requires("a")?;
                Ok(())
            }),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    let errors: Vec<_> = result
        .records
        .iter()
        .filter(|r| r.status == TestStatus::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    let message = errors[0].message.as_deref().unwrap();
    assert!(message.starts_with("dependency cycle: "));
    assert!(message.contains('a') && message.contains('b'));
    assert_eq!(result.summary.passed, 0);
    assert_eq!(sched.store().lookup("a", ""), Some(false));
    assert_eq!(sched.store().lookup("b", ""), Some(false));
}

#[test]
fn scenario_parameterized_runs_share_root_prerequisite() {
    let tree = TestTree::new(
        "scenario_c",
        vec![
            TestNode::directory("d")
                .parameterized(RunInfo::over("p", vec![vec![json!("r1")], vec![json!("r2")]]))
                .child(TestNode::function("t", |ctx, _| {
                    let value = ctx.requires("s")?;
                    assert_eq!(value, Some(json!("ready")));
                    Ok(())
                })),
            TestNode::function("s", |ctx, _| {
                ctx.set("ready");
                Ok(())
            }),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    assert_eq!(status(&sched, "d::t", "r1"), Some(TestStatus::Passed));
    assert_eq!(status(&sched, "d::t", "r2"), Some(TestStatus::Passed));
    let t1 = sched.store().record_for("d::t", "r1").unwrap();
    assert_eq!(t1.display_name(), "d::t (r1)");
    assert_eq!(result.summary.passed, 3);
}

// ---------------------------------------------------------------------------
// Parameterization
// ---------------------------------------------------------------------------

#[test]
fn nested_parameters_resolve_within_each_run() {
    let inner = TestNode::directory("inner")
        .parameterized(RunInfo::over("q", vec![vec![json!(1)], vec![json!(2)]]))
        .child(TestNode::function("t1", |ctx, args| {
            let expected = args.first().cloned();
            let value = ctx.requires("t2")?;
            if value != expected {
                return Err(Interrupt::failure(format!("{value:?} != {expected:?}")));
            }
            Ok(())
        }))
        .child(TestNode::function("t2", |ctx, args| {
            ctx.set(args[0].clone());
            Ok(())
        }));
    let tree = TestTree::new(
        "nested",
        vec![
            TestNode::directory("outer")
                .parameterized(RunInfo::over("p", vec![vec![json!("x")], vec![json!("y")]]))
                .child(inner),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    assert_eq!(result.passes, 2);
    for hash in ["x,1", "x,2", "y,1", "y,2"] {
        assert_eq!(status(&sched, "outer::inner::t1", hash), Some(TestStatus::Passed));
        assert_eq!(status(&sched, "outer::inner::t2", hash), Some(TestStatus::Passed));
    }
    assert_eq!(result.summary.passed, 8);
    let record = sched.store().record_for("outer::inner::t1", "y,2").unwrap();
    assert_eq!(record.qualifier, " (y, 2)");
}

#[test]
fn empty_argument_sets_are_an_error() {
    let tree = TestTree::new(
        "empty",
        vec![
            TestNode::directory("d")
                .parameterized(RunInfo::new("p", |_| Ok(FixtureResult::ArgSets(vec![]))))
                .child(TestNode::function("t", |_, _| Ok(()))),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    let record = sched.store().record_for("d::p", "").unwrap();
    assert_eq!(record.kind, RecordKind::Fixture);
    assert_eq!(record.status, TestStatus::Error);
    assert_eq!(record.message.as_deref(), Some("did not return any arguments"));
    assert!(sched.store().record_for("d::t", "").is_none());
    assert!(!result.summary.success());
}

#[test]
fn duplicate_run_names_get_suffixes() {
    let tree = TestTree::new(
        "dupes",
        vec![
            TestNode::directory("d")
                .parameterized(RunInfo::over("p", vec![vec![json!("a")], vec![json!("a")]]))
                .child(TestNode::function("t", |_, _| Ok(()))),
        ],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert_eq!(status(&sched, "d::t", "a"), Some(TestStatus::Passed));
    assert_eq!(status(&sched, "d::t", "a#2"), Some(TestStatus::Passed));
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[test]
fn container_setup_failure_is_isolated_to_its_run() {
    let tree = TestTree::new(
        "isolation",
        vec![
            TestNode::directory("d")
                .parameterized(RunInfo::over(
                    "p",
                    vec![vec![json!("good")], vec![json!("bad")]],
                ))
                .child(
                    TestNode::file("f")
                        .with_setup(|args| {
                            if args == [json!("bad")] {
                                Err(Interrupt::error("cannot connect"))
                            } else {
                                Ok(())
                            }
                        })
                        .child(TestNode::function("t", |_, _| Ok(()))),
                ),
        ],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert_eq!(status(&sched, "d::f::t", "good"), Some(TestStatus::Passed));
    assert!(sched.store().record_for("d::f::t", "bad").is_none());
    let setup = sched.store().record_for("d::f::setup", "bad").unwrap();
    assert_eq!(setup.status, TestStatus::Error);
    assert_eq!(setup.message.as_deref(), Some("cannot connect"));
}

#[test]
fn leaf_setup_failure_skips_dependents() {
    let tree = TestTree::new(
        "leaf_setup",
        vec![
            requires("a"),
            TestNode::function("a", |_, _| Ok(())).with_setup(|_| Err(Interrupt::error("no db"))),
        ],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert_eq!(sched.store().lookup("a", ""), Some(false));
    let dependent = sched.store().record_for("needs_a", "").unwrap();
    assert_eq!(dependent.status, TestStatus::Skipped);
    assert_eq!(
        dependent.message.as_deref(),
        Some("depends on a, which did not pass")
    );
}

#[test]
fn registered_teardowns_run_last_first() {
    let trace = Rc::new(RefCell::new(Vec::new()));
    let t = trace.clone();
    let tree = TestTree::new(
        "teardowns",
        vec![TestNode::function("t", move |ctx, _| {
            for i in 1..=3 {
                let t = t.clone();
                ctx.teardown(move || {
                    t.borrow_mut().push(i);
                    if i == 1 {
                        Err(Interrupt::failure("leaked handle"))
                    } else {
                        Ok(())
                    }
                });
            }
            Ok(())
        })],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert_eq!(*trace.borrow(), vec![3, 2, 1]);
    assert_eq!(status(&sched, "t", ""), Some(TestStatus::Passed));
    let teardown = sched.store().record_for("teardown #1 for t", "").unwrap();
    assert_eq!(teardown.kind, RecordKind::Fixture);
    assert_eq!(teardown.status, TestStatus::Error);
    assert_eq!(teardown.message.as_deref(), Some("leaked handle"));
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[test]
fn failed_subtest_fails_enclosing_test() {
    let tree = TestTree::new(
        "subtests",
        vec![TestNode::function("t", |ctx, _| {
            let ok = ctx.subtest("good", |_| Ok(()))?;
            let bad = ctx.subtest("bad", |_| Err(Interrupt::failure("off by one")))?;
            assert!(ok && !bad);
            Ok(())
        })],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert!(sched.store().record_for("t::good", "").is_none());
    assert_eq!(status(&sched, "t::bad", ""), Some(TestStatus::Failed));
    let record = sched.store().record_for("t", "").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert_eq!(record.message.as_deref(), Some("1 subtest failed"));
}

#[test]
fn panicking_body_fails_with_message() {
    let tree = TestTree::new(
        "panics",
        vec![TestNode::function("t", |_, _| panic!("index out of range"))],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    let record = sched.store().record_for("t", "").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert_eq!(record.message.as_deref(), Some("panicked: index out of range"));
}

#[test]
fn captured_output_is_kept_per_test() {
    let tree = TestTree::new(
        "output",
        vec![TestNode::function("t", |ctx, _| {
            ctx.print("hello");
            Ok(())
        })],
    )
    .unwrap();

    let (sched, _) = run(&tree);
    assert_eq!(sched.logger().output("t"), Some("hello\n"));
}

#[test]
fn postponed_attempt_output_is_not_repeated() {
    let tree = TestTree::new(
        "output",
        vec![
            TestNode::function("b", |ctx, _| {
                ctx.print("hello");
                ctx.subtest("early", |_| Err(Interrupt::failure("flaky")))?;
                ctx.requires("a")?;
                Ok(())
            }),
            TestNode::function("a", |_, _| Ok(())),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    assert_eq!(result.passes, 2);
    assert_eq!(sched.logger().output("b"), Some("hello\n"));
    let subtest_records = sched
        .store()
        .records()
        .iter()
        .filter(|r| r.source == "b::early")
        .count();
    assert_eq!(subtest_records, 1);
    assert_eq!(status(&sched, "b", ""), Some(TestStatus::Failed));
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[test]
fn never_run_prerequisite_is_reported() {
    let tree = TestTree::new("ghost", vec![requires("ghost")]).unwrap();

    let (sched, result) = run(&tree);
    let ghost = sched.store().record_for("ghost", "").unwrap();
    assert_eq!(ghost.kind, RecordKind::Dependency);
    assert_eq!(ghost.status, TestStatus::Error);
    assert_eq!(
        ghost.message.as_deref(),
        Some("other tests depend on this test, but it was never run")
    );
    assert_eq!(status(&sched, "needs_ghost", ""), Some(TestStatus::Skipped));
    assert!(!result.summary.success());
}

#[test]
fn three_node_cycle_and_its_dependent() {
    let tree = TestTree::new(
        "cycle3",
        vec![
            requires("a"),
            TestNode::function("a", |ctx, _| {
                ctx.requires("b")?;
                Ok(())
            }),
            TestNode::function("b", |ctx, _| {
                ctx.requires("c")?;
                Ok(())
            }),
            TestNode::function("c", |ctx, _| {
                ctx.requires("a")?;
                Ok(())
            }),
        ],
    )
    .unwrap();

    let (sched, result) = run(&tree);
    assert_eq!(result.summary.errors, 1);
    assert_eq!(result.summary.skipped, 3);
    assert_eq!(result.summary.passed, 0);
    assert_eq!(status(&sched, "needs_a", ""), Some(TestStatus::Skipped));
    assert_eq!(sched.logger().count(EventKind::Error), 1);
}

#[test]
fn restricted_pass_reruns_only_postponed_tests() {
    let calls = Rc::new(RefCell::new(0));
    let c = calls.clone();
    let tree = TestTree::new(
        "restricted",
        vec![
            TestNode::function("b", |ctx, _| {
                ctx.requires("a")?;
                Ok(())
            }),
            TestNode::function("plain", move |_, _| {
                *c.borrow_mut() += 1;
                Ok(())
            }),
            TestNode::function("a", |_, _| Ok(())),
        ],
    )
    .unwrap();

    let (_, result) = run(&tree);
    assert_eq!(result.passes, 2);
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(result.summary.passed, 3);
}

#[test]
fn requires_all_returns_values_by_requested_name() {
    let seen: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let tree = TestTree::new(
        "many",
        vec![
            TestNode::file("f")
                .child(TestNode::function("x", |ctx, _| {
                    ctx.set(1);
                    Ok(())
                }))
                .child(TestNode::function("y", |ctx, _| {
                    ctx.set(2);
                    Ok(())
                }))
                .child(TestNode::function("z", move |ctx, _| {
                    let values = ctx.requires_all(&["x", "y"])?;
                    *s.borrow_mut() = Some(json!({
                        "x": values["x"],
                        "y": values["y"],
                    }));
                    Ok(())
                })),
        ],
    )
    .unwrap();

    let (_, result) = run(&tree);
    assert_eq!(result.passes, 1);
    assert_eq!(*seen.borrow(), Some(json!({"x": 1, "y": 2})));
}
