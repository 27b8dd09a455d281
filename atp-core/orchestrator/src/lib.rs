//! ATP 测试编排器
//!
//! 负责测试夹具与测试用例的生命周期:
//! 环境准备 -> 夹具准备 -> 按数据行执行用例 (夹具与用例之间拷贝脚本变量) -> 清理 -> 环境清理。

pub mod config;
pub mod error;
pub mod fixture;
pub mod report;
pub mod runner;
pub mod session;

pub use config::{AbortMode, RunnerConfig};
pub use error::{Result, RunnerError};
pub use fixture::{Priority, TestCase, TestFixture};
pub use report::{TestCaseReport, TestRunReport};
pub use runner::{RunnerState, TestRunner, DATA_SOURCE_SUFFIX_VARIABLE};
pub use session::TestSession;
