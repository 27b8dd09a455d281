//! 测试会话
//!
//! 按顺序驱动整个夹具: 打开夹具、一次性准备、逐个执行用例、一次性清理、关闭夹具。
//! 中止请求在每个数据行开始前检查。

use futures_util::StreamExt;
use tracing::{error, info, warn};

use atp_common::TestResult;

use crate::fixture::TestFixture;
use crate::report::TestRunReport;
use crate::runner::TestRunner;
use crate::RunnerError;

/// 测试会话
pub struct TestSession<'a> {
    runner: &'a mut TestRunner,
    stop_on_first_failure: bool,
}

impl<'a> TestSession<'a> {
    /// 创建新的测试会话，失败策略取自运行器配置
    pub fn new(runner: &'a mut TestRunner) -> Self {
        let stop_on_first_failure = runner.config().stop_on_first_failure;
        Self {
            runner,
            stop_on_first_failure,
        }
    }

    pub fn stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    /// 准备环境，依次运行全部夹具，最后清理环境
    pub async fn run(&mut self, fixtures: &mut [TestFixture]) -> Vec<TestRunReport> {
        let mut reports = Vec::new();

        if !self.runner.set_up_environment().await {
            error!("环境准备失败，跳过全部夹具");
            self.runner.tear_down_environment().await;
            return reports;
        }

        for fixture in fixtures.iter_mut() {
            if self.runner.is_abort_requested() {
                warn!("会话已中止，跳过夹具: {}", fixture.id);
                break;
            }
            let report = self.run_fixture(fixture).await;
            let stop = self.stop_on_first_failure && !report.is_success();
            reports.push(report);
            if stop {
                warn!("出现失败，停止会话");
                break;
            }
        }

        self.runner.tear_down_environment().await;
        reports
    }

    /// 运行单个夹具，环境必须已准备
    pub async fn run_fixture(&mut self, fixture: &mut TestFixture) -> TestRunReport {
        let mut report = TestRunReport::new(&fixture.id);
        report.description = fixture.description.clone();
        report.skipped_tests = fixture.muted_tests().iter().map(|t| t.id.clone()).collect();

        info!("开始运行夹具: {}", fixture.id);
        if !self.runner.can_run_tests() {
            error!("环境未就绪，跳过夹具: {}", fixture.id);
            report.add_fixture_error(RunnerError::EnvironmentNotReady.to_string());
            report.finalize();
            return report;
        }

        if let Err(e) = self.runner.open_test_fixture(fixture).await {
            error!("打开夹具 {} 失败: {}", fixture.id, e);
            report.add_fixture_error(format!("打开夹具失败: {}", e));
            report.finalize();
            return report;
        }

        if self.runner.one_time_set_up(fixture).await {
            let test_ids: Vec<String> = fixture
                .execution_order()
                .into_iter()
                .map(|t| t.id.clone())
                .collect();

            for test_id in &test_ids {
                let failed = self.run_test_case(fixture, test_id, &mut report).await;
                if report.aborted || (failed && self.stop_on_first_failure) {
                    break;
                }
            }
        } else {
            report.add_fixture_error("夹具一次性准备失败");
        }

        if !self.runner.one_time_tear_down(fixture).await {
            report.add_fixture_error("夹具一次性清理失败");
        }
        if let Err(e) = self.runner.try_close_test_fixture(fixture) {
            error!("关闭夹具 {} 失败: {}", fixture.id, e);
            report.add_fixture_error(format!("关闭夹具失败: {}", e));
        }

        report.finalize();
        info!(
            "夹具 {} 运行完成: 成功 {} 行，失败 {} 行",
            fixture.id, report.passed_count, report.failed_count
        );
        report
    }

    /// 运行单个用例，返回是否有失败的数据行
    async fn run_test_case(
        &mut self,
        fixture: &mut TestFixture,
        test_id: &str,
        report: &mut TestRunReport,
    ) -> bool {
        let abort = self.runner.abort_handle();

        if let Err(e) = self.runner.open_test_case(fixture, test_id).await {
            error!("打开用例 {} 失败: {}", test_id, e);
            report.add_result(TestResult::failed(
                test_id,
                0,
                &serde_json::Value::Null,
                format!("打开用例失败: {}", e),
                Default::default(),
                chrono::Utc::now(),
            ));
            return true;
        }

        let mut failed = false;
        match self.runner.run_test(fixture, test_id).await {
            Ok(rows) => {
                futures_util::pin_mut!(rows);
                loop {
                    if abort.is_cancelled() {
                        warn!("会话已中止，停止用例 {}", test_id);
                        report.aborted = true;
                        break;
                    }
                    let Some(result) = rows.next().await else {
                        break;
                    };
                    failed |= !result.is_success();
                    report.add_result(result);
                    if failed && self.stop_on_first_failure {
                        break;
                    }
                }
            }
            Err(e) => {
                error!("执行用例 {} 失败: {}", test_id, e);
                report.add_result(TestResult::failed(
                    test_id,
                    0,
                    &serde_json::Value::Null,
                    e.to_string(),
                    Default::default(),
                    chrono::Utc::now(),
                ));
                failed = true;
            }
        }

        self.runner.try_close_test_case(fixture, test_id).await;
        failed
    }
}
