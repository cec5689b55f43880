//! End-to-end runs of the orchestrator against the in-memory container runtime

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};
use suitey::cli::handlers::{execute_run, report_run};
use suitey::execution::EntryKind;
use suitey::runtime::{MockBehavior, MockRuntime, RuntimeCall};
use suitey::scheduler::ARTIFACTS_MOUNT;
use suitey::{ModuleRegistry, Orchestrator, RunStatus, ShutdownState, SuiteyError};
use support::{registry, stub, stub_building, stub_project, test_config};
use yare::parameterized;

/// Build containers that leave an artifact behind
fn producing() -> MockRuntime {
    MockRuntime::new().with_default(MockBehavior::exit(0, "ok").writing(ARTIFACTS_MOUNT, "out/bin"))
}

fn created_with_prefix(runtime: &MockRuntime, prefix: &str) -> Vec<String> {
    runtime
        .created()
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn test_dependent_builds_run_in_tier_order() {
    let project = stub_project(&["alpha", "beta"]);
    let runtime = Arc::new(producing());
    let orchestrator = Orchestrator::new(test_config(), runtime.clone()).with_registry(registry(
        vec![
            stub_building("beta", "make beta", &["alpha"]),
            stub_building("alpha", "make alpha", &[]),
        ],
    ));

    let summary = orchestrator.run(project.path()).await.unwrap();
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.build.tiers, 2);

    let builds = created_with_prefix(&runtime, "suitey-build-");
    assert_eq!(builds.len(), 2);
    assert!(builds[0].starts_with("suitey-build-alpha"));
    assert!(builds[1].starts_with("suitey-build-beta"));

    // each suite ran inside its platform's verified image
    for call in runtime.calls() {
        if let RuntimeCall::Create { name, image } = call {
            if name.starts_with("suitey-test-alpha") {
                assert!(image.starts_with("alpha-"));
            }
            if name.starts_with("suitey-test-beta") {
                assert!(image.starts_with("beta-"));
            }
        }
    }
    assert!(runtime.images().is_empty());
    assert!(runtime.live_containers().is_empty());
}

#[tokio::test]
async fn test_failed_build_keeps_sibling_output_and_skips_tests() {
    let project = stub_project(&["alpha", "beta"]);
    let runtime = Arc::new(
        producing()
            .with_behavior("suitey-build-alpha", MockBehavior::exit(2, "alpha: linker error"))
            .with_behavior(
                "suitey-build-beta",
                MockBehavior::exit(0, "beta done")
                    .with_delay(Duration::from_millis(100))
                    .writing(ARTIFACTS_MOUNT, "out/bin"),
            ),
    );
    let orchestrator = Orchestrator::new(test_config(), runtime.clone()).with_registry(registry(
        vec![
            stub_building("alpha", "make alpha", &[]),
            stub_building("beta", "make beta", &[]),
        ],
    ));
    let board = orchestrator.board();

    let err = orchestrator.run(project.path()).await.unwrap_err();
    match &err {
        SuiteyError::Build(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].framework, "alpha");
            assert_eq!(failures[0].exit_code, Some(2));
            assert_eq!(failures[0].output, "alpha: linker error");
        }
        other => panic!("Expected build failure, got {}", other),
    }
    assert_eq!(err.exit_code(), 1);

    let beta = board.get(EntryKind::Build, "beta").unwrap();
    assert_eq!(beta.status, RunStatus::Built);
    assert_eq!(beta.exit_code, Some(0));
    assert!(beta.output.contains("beta done"));

    assert!(created_with_prefix(&runtime, "suitey-test-").is_empty());
    assert!(runtime.images().is_empty());
}

#[tokio::test]
async fn test_image_missing_a_layer_fails_verification() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(producing().with_behavior(
        "suitey-verify-",
        MockBehavior::exit(1, "MISSING /workspace/out\n"),
    ));
    let orchestrator = Orchestrator::new(test_config(), runtime.clone())
        .with_registry(registry(vec![stub_building("alpha", "make", &[])]));

    let err = orchestrator.run(project.path()).await.unwrap_err();
    match err {
        SuiteyError::Build(failures) => {
            assert!(failures[0].error.as_deref().unwrap_or("").contains("/workspace/out"));
        }
        other => panic!("Expected build failure, got {}", other),
    }
    assert!(created_with_prefix(&runtime, "suitey-test-").is_empty());
    assert!(runtime.images().is_empty());
}

#[tokio::test]
async fn test_build_without_artifacts_never_builds_an_image() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(MockRuntime::new().with_default(MockBehavior::exit(0, "")));
    let orchestrator = Orchestrator::new(test_config(), runtime.clone())
        .with_registry(registry(vec![stub_building("alpha", "make", &[])]));

    assert!(matches!(
        orchestrator.run(project.path()).await,
        Err(SuiteyError::Build(_))
    ));
    assert!(!runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::BuildImage(_))));
}

#[tokio::test]
async fn test_single_interrupt_drains_and_fails_the_run() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(MockRuntime::new().with_default(MockBehavior::hang()));
    let orchestrator = Orchestrator::new(test_config(), runtime.clone())
        .with_registry(registry(vec![stub_building("alpha", "make", &[])]));
    let controller = orchestrator.controller().unwrap();
    let handle = controller.clone();

    let (result, _) = tokio::join!(
        orchestrator.run_with_controller(project.path(), controller),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.interrupt();
        }
    );

    let err = result.unwrap_err();
    assert!(matches!(err, SuiteyError::Interrupted { forced: false, .. }));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(handle.state(), ShutdownState::GracefulShutdown);
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Stop(_))));
    assert!(created_with_prefix(&runtime, "suitey-test-").is_empty());
}

#[tokio::test]
async fn test_graceful_interrupt_reports_finished_suites() {
    let project = stub_project(&["alpha", "beta"]);
    let runtime = Arc::new(
        MockRuntime::new()
            .with_behavior("suitey-test-alpha", MockBehavior::exit(0, "ok"))
            .with_behavior("suitey-test-beta", MockBehavior::hang()),
    );
    let orchestrator = Orchestrator::new(test_config(), runtime.clone())
        .with_registry(registry(vec![stub("alpha"), stub("beta")]));
    let controller = orchestrator.controller().unwrap();
    let handle = controller.clone();

    let (result, _) = tokio::join!(
        orchestrator.run_with_controller(project.path(), controller),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.interrupt();
        }
    );

    let err = result.unwrap_err();
    let partial = err.partial_summary().expect("graceful interrupt keeps results");
    let alpha = partial.outcomes.iter().find(|o| o.suite == "alpha").unwrap();
    assert_eq!(alpha.status, RunStatus::Passed);
    assert_eq!(partial.passed(), 1);
    assert!(runtime.live_containers().is_empty());

    let (code, report) = report_run(Err(err), project.path());
    assert_eq!(code, 1);
    assert!(report.contains("alpha"));
    assert!(report.contains("1 passed"));
}

#[tokio::test]
async fn test_second_interrupt_forces_removal_without_waiting() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(MockRuntime::new().with_default(MockBehavior::hang().ignoring_stop()));
    let mut config = test_config();
    config.grace_period_secs = 30;
    let orchestrator = Orchestrator::new(config, runtime.clone())
        .with_registry(registry(vec![stub_building("alpha", "make", &[])]));
    let controller = orchestrator.controller().unwrap();
    let handle = controller.clone();

    let started = Instant::now();
    let (result, _) = tokio::join!(
        orchestrator.run_with_controller(project.path(), controller),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.interrupt();
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.interrupt();
        }
    );

    let err = result.unwrap_err();
    assert!(matches!(err, SuiteyError::Interrupted { forced: true, summary: None }));
    assert_eq!(err.exit_code(), 130);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Kill(_))));
}

#[tokio::test]
async fn test_keep_images_leaves_test_images() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(producing());
    let mut config = test_config();
    config.keep_images = true;
    let orchestrator = Orchestrator::new(config, runtime.clone())
        .with_registry(registry(vec![stub_building("alpha", "make", &[])]));

    orchestrator.run(project.path()).await.unwrap();
    assert_eq!(runtime.images().len(), 1);
}

#[parameterized(
    all_pass = { MockBehavior::exit(0, "ok"), 0 },
    suite_fails = { MockBehavior::exit(1, "not ok"), 1 },
)]
#[test_macro(tokio::test)]
async fn test_run_exit_codes(suite: MockBehavior, expected: i32) {
    let project = stub_project(&["alpha", "beta"]);
    let runtime = Arc::new(MockRuntime::new().with_behavior("suitey-test-beta", suite));
    let orchestrator = Orchestrator::new(test_config(), runtime).with_registry(registry(vec![
        stub("alpha"),
        stub("beta"),
    ]));

    let (code, report) = execute_run(&orchestrator, project.path()).await;
    assert_eq!(code, expected);
    assert!(report.contains("alpha"));
    assert!(report.contains("beta"));
}

#[tokio::test]
async fn test_run_exit_code_for_build_failure_lists_output() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(
        MockRuntime::new().with_behavior("suitey-build-", MockBehavior::exit(101, "error[E0432]")),
    );
    let orchestrator = Orchestrator::new(test_config(), runtime)
        .with_registry(registry(vec![stub_building("alpha", "cargo build", &[])]));

    let (code, report) = execute_run(&orchestrator, project.path()).await;
    assert_eq!(code, 1);
    assert!(report.contains("error[E0432]"));
    assert!(report.contains("Tests were not run"));
}

#[tokio::test]
async fn test_run_without_suites_is_an_internal_error() {
    let project = support::TestProject::new().file("README.md", "");
    let orchestrator = Orchestrator::new(test_config(), Arc::new(MockRuntime::new()))
        .with_registry(Arc::new(ModuleRegistry::with_builtins()));

    let (code, _) = execute_run(&orchestrator, project.path()).await;
    assert_eq!(code, 2);
}

#[tokio::test]
async fn test_unreachable_runtime_is_an_internal_error() {
    let project = stub_project(&["alpha"]);
    let runtime = Arc::new(MockRuntime::unavailable());
    let orchestrator = Orchestrator::new(test_config(), runtime.clone())
        .with_registry(registry(vec![stub("alpha")]));

    let (code, _) = execute_run(&orchestrator, project.path()).await;
    assert_eq!(code, 2);
    assert!(runtime.created().is_empty());
}
