//! ATP 脚本引擎
//!
//! 每个执行上下文 (夹具或测试用例) 拥有一个独立的脚本引擎实例，
//! 夹具与用例之间只通过显式的变量拷贝共享状态。

pub mod engine;
pub mod error;
mod interpreter;
pub mod variable_engine;

pub use engine::{ScriptEngine, ScriptEngineFactory, ScriptSource, ScriptVariable};
pub use error::{Result, ScriptError};
pub use variable_engine::{VariableScriptEngine, VariableScriptEngineFactory};
