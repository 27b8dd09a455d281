//! 数据源错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 数据源错误
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("数据源不存在: {0}")]
    NotFound(String),

    #[error("不支持的数据源类型: {kind} (数据源: {id})")]
    UnsupportedKind { id: String, kind: String },

    #[error("读取数据文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析数据源 {id} 失败: {message}")]
    Parse { id: String, message: String },
}

/// 数据源结果类型
pub type Result<T> = std::result::Result<T, DataSourceError>;
