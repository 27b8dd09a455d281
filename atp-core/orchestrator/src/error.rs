//! 编排器错误类型

use thiserror::Error;

use atp_datasource::DataSourceError;
use atp_executor::ProcessError;
use atp_scripting::ScriptError;

/// 测试运行器错误
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("测试环境未就绪")]
    EnvironmentNotReady,

    #[error("夹具未打开: {0}")]
    FixtureNotOpen(String),

    #[error("夹具 {fixture} 仍有打开的测试用例: {tests:?}")]
    TestsStillOpen { fixture: String, tests: Vec<String> },

    #[error("测试用例未打开: {0}")]
    TestNotOpen(String),

    #[error("夹具 {fixture} 中不存在测试用例: {test}")]
    TestNotFound { fixture: String, test: String },

    #[error("组件树已被移出: {0}")]
    EntityDetached(String),

    #[error("数据源 {0} 没有数据行")]
    NoRows(String),

    #[error("数据源错误: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("脚本错误: {0}")]
    Script(#[from] ScriptError),

    #[error("{0}")]
    Process(#[from] ProcessError),
}

/// 编排器结果类型
pub type Result<T> = std::result::Result<T, RunnerError>;
