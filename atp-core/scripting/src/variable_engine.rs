//! 内置变量脚本引擎

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::engine::type_name_of;
use crate::{interpreter, Result, ScriptEngine, ScriptEngineFactory, ScriptVariable};

#[derive(Debug, Default)]
struct ScriptState {
    variables: BTreeMap<String, Value>,
    globals: Value,
}

/// 基于变量表的脚本引擎
///
/// 变量按名称排序保存；脚本在持有写锁期间一次性执行完毕，
/// 执行失败时已执行语句的修改保留，与逐行解释的脚本宿主行为一致。
#[derive(Debug)]
pub struct VariableScriptEngine {
    scope: String,
    state: RwLock<ScriptState>,
}

impl VariableScriptEngine {
    /// 创建新的脚本引擎
    pub fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            state: RwLock::new(ScriptState::default()),
        }
    }
}

#[async_trait]
impl ScriptEngine for VariableScriptEngine {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn clear_state(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.variables.clear();
        state.globals = Value::Null;
        debug!("[{}] 脚本状态已清除", self.scope);
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        let lines = interpreter::parse(script)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let ScriptState { variables, globals } = &mut *state;
        let value = interpreter::execute(&lines, variables, globals)?;
        debug!("[{}] 执行脚本完成 ({} 条语句)", self.scope, lines.len());
        Ok(value)
    }

    fn script_variables(&self) -> Vec<ScriptVariable> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .variables
            .iter()
            .map(|(name, value)| ScriptVariable {
                name: name.clone(),
                type_name: type_name_of(value).to_string(),
            })
            .collect()
    }

    fn variable_raw(&self, name: &str) -> Result<Value> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| crate::ScriptError::UndefinedVariable(name.to_string()))
    }

    fn set_variable_value(&self, name: &str, value: Value) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.variables.insert(name.to_string(), value);
        Ok(())
    }

    fn has_script_variable(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.variables.contains_key(name)
    }

    fn set_globals(&self, globals: Value) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.globals = globals;
    }
}

/// 创建 [`VariableScriptEngine`] 的工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct VariableScriptEngineFactory;

impl ScriptEngineFactory for VariableScriptEngineFactory {
    fn create(&self, scope: &str) -> Arc<dyn ScriptEngine> {
        Arc::new(VariableScriptEngine::new(scope))
    }
}
