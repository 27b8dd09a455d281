//! 测试会话测试

use serde_json::json;
use std::sync::{Arc, Mutex};

use atp_datasource::InMemoryDataSourceReader;
use atp_executor::{Component, EntityRole};
use atp_orchestrator::*;
use atp_scripting::VariableScriptEngineFactory;

fn runner(config: RunnerConfig, reader: InMemoryDataSourceReader) -> TestRunner {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    TestRunner::new(config, Arc::new(VariableScriptEngineFactory), Arc::new(reader))
}

/// 环境已准备的运行器
async fn ready_runner(config: RunnerConfig, reader: InMemoryDataSourceReader) -> TestRunner {
    let mut runner = runner(config, reader);
    assert!(runner.set_up_environment().await);
    runner
}

fn numbers() -> InMemoryDataSourceReader {
    InMemoryDataSourceReader::new().with_rows("numbers", vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
}

fn tracker(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Component {
    let log = Arc::clone(log);
    Component::fn_actor(name, move |_| {
        log.lock().unwrap().push(name.to_string());
        Ok(())
    })
}

#[tokio::test]
async fn test_session_runs_tests_in_priority_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut runner = ready_runner(RunnerConfig::default(), numbers()).await;
    let mut fixture = TestFixture::new("f")
        .with_stage(EntityRole::OneTimeSetUp, [tracker(&log, "fixture-setup")])
        .with_stage(EntityRole::OneTimeTearDown, [tracker(&log, "fixture-teardown")])
        .with_test(TestCase::new("second").with_order(2).with_step(tracker(&log, "second")))
        .with_test(TestCase::new("first").with_order(1).with_step(tracker(&log, "first")))
        .with_test(
            TestCase::new("urgent")
                .with_priority(Priority::High)
                .with_step(tracker(&log, "urgent")),
        )
        .with_test(TestCase::new("quiet").muted().with_step(tracker(&log, "quiet")));

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["fixture-setup", "urgent", "first", "second", "fixture-teardown"]
    );
    assert!(report.is_success());
    assert_eq!(report.total_rows, 3);
    assert_eq!(report.skipped_tests, vec!["quiet".to_string()]);
    assert!(!runner.is_fixture_open("f"));
    assert!(fixture.entity().is_some());
}

#[tokio::test]
async fn test_session_continues_after_failed_rows() {
    let mut runner = ready_runner(RunnerConfig::default(), numbers()).await;
    let mut fixture = TestFixture::new("f")
        .with_test(
            TestCase::new("a")
                .with_data_source("numbers")
                .with_step(Component::script("check", "assert n != 2")),
        )
        .with_test(TestCase::new("b").with_order(1));

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert_eq!(report.total_rows, 4);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.tests.len(), 2);
    assert_eq!(report.tests[0].results.len(), 3);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_stop_on_first_failure() {
    let config = RunnerConfig {
        stop_on_first_failure: true,
        ..RunnerConfig::default()
    };
    let mut runner = ready_runner(config, numbers()).await;
    let mut fixture = TestFixture::new("f")
        .with_test(
            TestCase::new("a")
                .with_data_source("numbers")
                .with_step(Component::script("check", "assert n != 2")),
        )
        .with_test(TestCase::new("b").with_order(1));

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert_eq!(report.total_rows, 2);
    assert_eq!(report.tests.len(), 1);
    assert!(!runner.is_fixture_open("f"));
}

#[tokio::test]
async fn test_abort_is_observed_between_rows() {
    let mut runner = ready_runner(RunnerConfig::default(), numbers()).await;
    let abort = runner.abort_handle();
    let rows_seen = Arc::new(Mutex::new(0));
    let seen = Arc::clone(&rows_seen);
    let mut fixture = TestFixture::new("f").with_test(
        TestCase::new("a")
            .with_data_source("numbers")
            .with_step(Component::fn_actor("abort", move |_| {
                *seen.lock().unwrap() += 1;
                abort.cancel();
                Ok(())
            }))
            .with_step(Component::script("still-runs", "done = true")),
    );

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert_eq!(*rows_seen.lock().unwrap(), 1);
    assert!(report.aborted);
    assert_eq!(report.total_rows, 1);
    assert_eq!(report.passed_count, 1);
    assert!(runner.is_abort_requested());
    assert!(!runner.is_fixture_open("f"));
}

#[tokio::test]
async fn test_immediate_abort_interrupts_running_row() {
    let config = RunnerConfig {
        abort_mode: AbortMode::Immediate,
        ..RunnerConfig::default()
    };
    let mut runner = ready_runner(config, numbers()).await;
    let abort = runner.abort_handle();
    let mut fixture = TestFixture::new("f").with_test(
        TestCase::new("a")
            .with_data_source("numbers")
            .with_step(Component::fn_actor("abort", move |_| {
                abort.cancel();
                Ok(())
            }))
            .with_step(Component::script("never", "done = true")),
    );

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert!(report.aborted);
    assert_eq!(report.failed_count, 1);
    assert!(report.tests[0].results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("取消"));
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let mut runner = ready_runner(RunnerConfig::default(), InMemoryDataSourceReader::new()).await;
    let mut fixture = TestFixture::new("f")
        .with_test(TestCase::new("missing").with_data_source("nowhere"))
        .with_test(TestCase::new("fine").with_order(1));

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert_eq!(report.failed_count, 1);
    assert_eq!(report.passed_count, 1);
    assert!(report.tests[0].results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("nowhere"));
}

#[tokio::test]
async fn test_run_sets_up_and_tears_down_environment() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut runner = runner(RunnerConfig::default(), numbers())
        .with_environment_stage(EntityRole::OneTimeSetUp, [tracker(&log, "env-setup")])
        .with_environment_stage(EntityRole::OneTimeTearDown, [tracker(&log, "env-teardown")]);
    let mut fixtures = vec![
        TestFixture::new("one").with_test(TestCase::new("t").with_step(tracker(&log, "one"))),
        TestFixture::new("two").with_test(TestCase::new("t").with_step(tracker(&log, "two"))),
    ];

    let reports = TestSession::new(&mut runner).run(&mut fixtures).await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(TestRunReport::is_success));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["env-setup", "one", "two", "env-teardown"]
    );
    assert_eq!(runner.state(), RunnerState::EnvironmentTornDown);
}

#[tokio::test]
async fn test_fixture_is_skipped_without_environment() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut runner = runner(RunnerConfig::default(), numbers());
    let mut fixture = TestFixture::new("f")
        .with_stage(EntityRole::OneTimeSetUp, [tracker(&log, "fixture-setup")])
        .with_test(TestCase::new("t").with_step(tracker(&log, "body")));

    let report = TestSession::new(&mut runner).run_fixture(&mut fixture).await;

    assert!(log.lock().unwrap().is_empty());
    assert!(!report.is_success());
    assert_eq!(report.total_rows, 0);
    assert_eq!(report.fixture_errors.len(), 1);
    assert!(!runner.is_fixture_open("f"));
    assert!(fixture.entity().is_some());
    assert_eq!(runner.state(), RunnerState::Uninitialized);
}
