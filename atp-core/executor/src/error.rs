//! 执行器错误类型

use thiserror::Error;

use crate::ComponentId;

/// 组件树处理错误
#[derive(Error, Debug)]
pub enum ProcessError {
    /// 未设置 continue_on_error 的组件执行失败，遍历已展开全部故障钩子
    #[error("组件 {component} 执行失败: {source}")]
    Aborted {
        component: String,
        component_id: ComponentId,
        #[source]
        source: anyhow::Error,
    },

    #[error("执行已取消")]
    Cancelled,

    #[error("组件 {0} 不是实体，无法作为处理根节点")]
    NotAnEntity(String),
}

impl ProcessError {
    /// 导致中止的原始错误
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            ProcessError::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 执行器结果类型
pub type Result<T> = std::result::Result<T, ProcessError>;
