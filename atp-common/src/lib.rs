//! ATP 通用类型定义
//!
//! 此 crate 包含测试运行器与其调用方 (CLI、报告) 之间共享的类型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 测试结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// 成功
    Success,

    /// 失败
    Failed,
}

/// 单个数据行的测试结果
///
/// 每个测试用例每执行一行数据产生一个结果，产出后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// 测试用例 ID
    pub test_id: String,

    /// 数据行索引 (从 0 开始)
    pub row_index: usize,

    /// 结果状态
    pub status: TestStatus,

    /// 错误信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 执行耗时
    pub execution_time: Duration,

    /// 序列化后的数据行
    pub row_data: String,

    /// 开始时间
    pub started_at: DateTime<Utc>,
}

impl TestResult {
    /// 创建成功结果
    pub fn success(
        test_id: &str,
        row_index: usize,
        row: &serde_json::Value,
        execution_time: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            test_id: test_id.to_string(),
            row_index,
            status: TestStatus::Success,
            error: None,
            execution_time,
            row_data: serialize_row(row),
            started_at,
        }
    }

    /// 创建失败结果
    pub fn failed(
        test_id: &str,
        row_index: usize,
        row: &serde_json::Value,
        error: impl Into<String>,
        execution_time: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            test_id: test_id.to_string(),
            row_index,
            status: TestStatus::Failed,
            error: Some(error.into()),
            execution_time,
            row_data: serialize_row(row),
            started_at,
        }
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// 数据行序列化为紧凑 JSON
pub fn serialize_row(row: &serde_json::Value) -> String {
    serde_json::to_string(row).unwrap_or_else(|_| row.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_result() {
        let row = json!({"user": "alice", "age": 30});
        let result = TestResult::success("login", 0, &row, Duration::from_millis(12), Utc::now());

        assert!(result.is_success());
        assert!(result.error.is_none());
        assert_eq!(result.row_data, r#"{"age":30,"user":"alice"}"#);
    }

    #[test]
    fn test_failed_result_keeps_error() {
        let result = TestResult::failed(
            "login",
            2,
            &serde_json::Value::Null,
            "密码错误",
            Duration::ZERO,
            Utc::now(),
        );

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("密码错误"));
        assert_eq!(result.row_index, 2);
        assert_eq!(result.row_data, "null");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TestStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
