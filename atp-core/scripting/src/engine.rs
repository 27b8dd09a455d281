//! 脚本引擎接口

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Result, ScriptError};

/// 脚本变量描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptVariable {
    /// 变量名
    pub name: String,

    /// 类型名 (null/bool/number/string/array/object)
    pub type_name: String,
}

/// 初始化脚本来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    /// 脚本文件
    File(PathBuf),

    /// 内联脚本
    Inline(String),
}

impl ScriptSource {
    /// 相对路径基于给定目录解析，内联脚本原样返回
    pub fn resolve(&self, base_dir: &Path) -> ScriptSource {
        match self {
            ScriptSource::File(path) if path.is_relative() => {
                ScriptSource::File(base_dir.join(path))
            }
            other => other.clone(),
        }
    }
}

/// 脚本引擎
///
/// 所有方法都通过 `&self` 调用，实现方自行负责内部状态的同步。
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// 引擎所属作用域名称
    fn scope(&self) -> &str;

    /// 清除全部脚本状态 (变量与全局对象)
    fn clear_state(&self);

    /// 执行脚本文件
    async fn execute_file(&self, path: &Path) -> Result<Value> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ScriptError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.execute_script(&content).await
    }

    /// 执行脚本文本，返回最后一条语句的值
    async fn execute_script(&self, script: &str) -> Result<Value>;

    /// 列出当前声明的变量
    fn script_variables(&self) -> Vec<ScriptVariable>;

    /// 读取变量的原始值
    fn variable_raw(&self, name: &str) -> Result<Value>;

    /// 设置变量值 (不存在时声明)
    fn set_variable_value(&self, name: &str, value: Value) -> Result<()>;

    /// 变量是否已声明
    fn has_script_variable(&self, name: &str) -> bool;

    /// 设置脚本可读的全局对象 (通常为当前数据行)
    fn set_globals(&self, globals: Value);
}

impl dyn ScriptEngine {
    /// 读取变量并转换为指定类型
    pub fn variable_value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let raw = self.variable_raw(name)?;
        serde_json::from_value(raw).map_err(|source| ScriptError::Serde {
            name: name.to_string(),
            source,
        })
    }

    /// 执行脚本来源
    pub async fn execute_source(&self, source: &ScriptSource) -> Result<Value> {
        match source {
            ScriptSource::File(path) => self.execute_file(path).await,
            ScriptSource::Inline(script) => self.execute_script(script).await,
        }
    }

    /// 将本引擎全部变量的当前值拷贝到目标引擎
    pub fn copy_variables_to(&self, target: &dyn ScriptEngine) -> Result<usize> {
        let variables = self.script_variables();
        for variable in &variables {
            let value = self.variable_raw(&variable.name)?;
            target.set_variable_value(&variable.name, value)?;
        }
        Ok(variables.len())
    }

    /// 只回写目标引擎已声明的变量
    pub fn copy_shared_variables_to(&self, target: &dyn ScriptEngine) -> Result<usize> {
        let mut copied = 0;
        for variable in self.script_variables() {
            if target.has_script_variable(&variable.name) {
                let value = self.variable_raw(&variable.name)?;
                target.set_variable_value(&variable.name, value)?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

/// 脚本引擎工厂，每个执行上下文创建一个引擎
pub trait ScriptEngineFactory: Send + Sync {
    fn create(&self, scope: &str) -> Arc<dyn ScriptEngine>;
}

/// JSON 值的类型名
pub fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
