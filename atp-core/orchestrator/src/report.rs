//! 测试报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use atp_common::TestResult;

/// 夹具运行报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunReport {
    /// 夹具 ID
    pub name: String,

    /// 夹具描述
    pub description: Option<String>,

    /// 开始时间
    pub start_time: DateTime<Utc>,

    /// 结束时间
    pub end_time: Option<DateTime<Utc>>,

    /// 总耗时
    #[serde(skip)]
    pub duration: Duration,

    /// 总数据行数
    pub total_rows: usize,

    /// 成功行数
    pub passed_count: usize,

    /// 失败行数
    pub failed_count: usize,

    /// 夹具级阶段失败 (打开、一次性准备或清理)
    pub fixture_errors: Vec<String>,

    /// 静音跳过的用例
    pub skipped_tests: Vec<String>,

    /// 会话是否被中止
    pub aborted: bool,

    /// 用例结果列表 (按执行顺序)
    pub tests: Vec<TestCaseReport>,
}

impl TestRunReport {
    /// 创建新的测试报告
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::from_secs(0),
            total_rows: 0,
            passed_count: 0,
            failed_count: 0,
            fixture_errors: Vec::new(),
            skipped_tests: Vec::new(),
            aborted: false,
            tests: Vec::new(),
        }
    }

    /// 添加数据行结果
    pub fn add_result(&mut self, result: TestResult) {
        if result.is_success() {
            self.passed_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.total_rows += 1;

        match self.tests.iter_mut().find(|t| t.test_id == result.test_id) {
            Some(test) => test.add_result(result),
            None => {
                let mut test = TestCaseReport::new(&result.test_id);
                test.add_result(result);
                self.tests.push(test);
            }
        }
    }

    /// 记录夹具级失败
    pub fn add_fixture_error(&mut self, error: impl Into<String>) {
        self.fixture_errors.push(error.into());
    }

    /// 完成报告
    pub fn finalize(&mut self) {
        let end_time = Utc::now();
        self.duration = (end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        self.end_time = Some(end_time);
    }

    /// 运行是否成功
    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && self.fixture_errors.is_empty() && !self.aborted
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// 单个用例的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseReport {
    /// 用例 ID
    pub test_id: String,

    /// 成功行数
    pub passed: usize,

    /// 失败行数
    pub failed: usize,

    /// 数据行结果 (按数据源顺序)
    pub results: Vec<TestResult>,
}

impl TestCaseReport {
    pub fn new(test_id: &str) -> Self {
        Self {
            test_id: test_id.to_string(),
            passed: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    fn add_result(&mut self, result: TestResult) {
        if result.is_success() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(test_id: &str, row_index: usize, ok: bool) -> TestResult {
        let row = json!({ "row": row_index });
        if ok {
            TestResult::success(test_id, row_index, &row, Duration::from_millis(5), Utc::now())
        } else {
            TestResult::failed(test_id, row_index, &row, "断言失败", Duration::from_millis(5), Utc::now())
        }
    }

    #[test]
    fn test_results_are_grouped_by_test() {
        let mut report = TestRunReport::new("login");
        report.add_result(result("a", 0, true));
        report.add_result(result("a", 1, false));
        report.add_result(result("b", 0, true));
        report.finalize();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.passed_count, 2);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.tests.len(), 2);
        assert_eq!(report.tests[0].failed, 1);
        assert_eq!(report.tests[0].results[1].row_data, r#"{"row":1}"#);
        assert!(report.end_time.is_some());
        assert!(!report.is_success());
    }

    #[test]
    fn test_export() {
        let mut report = TestRunReport::new("login");
        report.add_result(result("a", 0, true));
        report.skipped_tests.push("quiet".to_string());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"name\": \"login\""));
        assert!(json.contains("\"status\": \"success\""));

        let yaml = report.to_yaml().unwrap();
        assert!(yaml.contains("- quiet"));
        assert!(report.is_success());
    }
}
