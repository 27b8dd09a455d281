//! 脚本引擎错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 脚本错误
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("脚本解析错误 (第 {line} 行): {message}")]
    Parse { line: usize, message: String },

    #[error("未定义的变量: {0}")]
    UndefinedVariable(String),

    #[error("类型错误: {0}")]
    Type(String),

    #[error("断言失败 (第 {line} 行): {expression}")]
    AssertionFailed { line: usize, expression: String },

    #[error("读取脚本文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("变量 {name} 转换失败: {source}")]
    Serde {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 脚本引擎结果类型
pub type Result<T> = std::result::Result<T, ScriptError>;
