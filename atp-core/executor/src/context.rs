//! 执行上下文
//!
//! 每个可独立运行的单元 (夹具或测试用例) 拥有一个 [`EntityManager`]:
//! 参数实例、脚本引擎、服务查找与取消令牌。子上下文可以读取父上下文的服务，
//! 但拥有自己的参数实例和脚本状态。

use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use atp_scripting::{ScriptEngine, ScriptSource};

/// 上下文文件系统 (数据与脚本目录)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFileSystem {
    /// 数据目录
    pub data_dir: PathBuf,

    /// 脚本目录
    pub scripts_dir: PathBuf,
}

impl Default for ScopeFileSystem {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            scripts_dir: PathBuf::from("./scripts"),
        }
    }
}

impl ScopeFileSystem {
    pub fn new(data_dir: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            scripts_dir: scripts_dir.into(),
        }
    }

    /// 脚本文件相对路径基于脚本目录解析
    pub fn resolve_script(&self, source: &ScriptSource) -> ScriptSource {
        source.resolve(&self.scripts_dir)
    }

    /// 数据文件相对路径基于数据目录解析
    pub fn resolve_data(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.data_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// 执行上下文
pub struct EntityManager {
    /// 作用域名称 (夹具或用例 ID)
    scope: String,

    /// 父上下文
    parent: Option<Arc<EntityManager>>,

    /// 参数实例 (当前数据行)
    arguments: RwLock<Value>,

    /// 脚本引擎
    script_engine: Arc<dyn ScriptEngine>,

    /// 服务注册表
    services: RwLock<ServiceMap>,

    /// 文件系统
    file_system: ScopeFileSystem,

    /// 取消令牌
    cancellation: CancellationToken,

    /// 每个执行者完成后的延迟
    post_action_delay: Duration,

    disposed: AtomicBool,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("scope", &self.scope)
            .field("parent", &self.parent.as_ref().map(|p| p.scope.clone()))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl EntityManager {
    /// 创建根上下文
    pub fn new(scope: &str, script_engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            scope: scope.to_string(),
            parent: None,
            arguments: RwLock::new(Value::Null),
            script_engine,
            services: RwLock::new(HashMap::new()),
            file_system: ScopeFileSystem::default(),
            cancellation: CancellationToken::new(),
            post_action_delay: Duration::ZERO,
            disposed: AtomicBool::new(false),
        }
    }

    /// 创建子上下文，继承文件系统、延迟与取消令牌 (子令牌)
    pub fn new_child(
        parent: &Arc<EntityManager>,
        scope: &str,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        Self {
            scope: scope.to_string(),
            parent: Some(Arc::clone(parent)),
            arguments: RwLock::new(Value::Null),
            script_engine,
            services: RwLock::new(HashMap::new()),
            file_system: parent.file_system.clone(),
            cancellation: parent.cancellation.child_token(),
            post_action_delay: parent.post_action_delay,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_file_system(mut self, file_system: ScopeFileSystem) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_post_action_delay(mut self, delay: Duration) -> Self {
        self.post_action_delay = delay;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn parent(&self) -> Option<&Arc<EntityManager>> {
        self.parent.as_ref()
    }

    /// 当前参数实例的副本
    pub fn arguments(&self) -> Value {
        self.arguments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 设置参数实例，同时作为脚本全局对象
    pub fn set_arguments(&self, arguments: Value) {
        self.script_engine.set_globals(arguments.clone());
        *self.arguments.write().unwrap_or_else(PoisonError::into_inner) = arguments;
    }

    pub fn script_engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.script_engine
    }

    pub fn file_system(&self) -> &ScopeFileSystem {
        &self.file_system
    }

    /// 注册服务 (同类型覆盖)
    pub fn register_service<T: Any + Send + Sync>(&self, service: Arc<T>) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), service);
    }

    /// 查找服务，本上下文没有时向父上下文查找
    pub fn get_service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let local = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .cloned();

        match local {
            Some(service) => service.downcast::<T>().ok(),
            None => self.parent.as_ref().and_then(|p| p.get_service::<T>()),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn post_action_delay(&self) -> Duration {
        self.post_action_delay
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// 释放上下文: 清除脚本状态、服务与参数并取消令牌，重复调用无副作用
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.script_engine.clear_state();
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.arguments.write().unwrap_or_else(PoisonError::into_inner) = Value::Null;
        self.cancellation.cancel();
        debug!("执行上下文已释放: {}", self.scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atp_scripting::VariableScriptEngine;
    use serde_json::json;

    fn manager(scope: &str) -> EntityManager {
        EntityManager::new(scope, Arc::new(VariableScriptEngine::new(scope)))
    }

    #[derive(Debug, PartialEq)]
    struct Clock(u64);

    #[test]
    fn test_services_read_through_parent() {
        let parent = Arc::new(manager("fixture"));
        parent.register_service(Arc::new(Clock(7)));

        let child = EntityManager::new_child(
            &parent,
            "test",
            Arc::new(VariableScriptEngine::new("test")),
        );
        assert_eq!(child.get_service::<Clock>().as_deref(), Some(&Clock(7)));

        child.register_service(Arc::new(Clock(9)));
        assert_eq!(child.get_service::<Clock>().as_deref(), Some(&Clock(9)));
        assert_eq!(parent.get_service::<Clock>().as_deref(), Some(&Clock(7)));
        assert!(child.get_service::<String>().is_none());
    }

    #[tokio::test]
    async fn test_arguments_become_script_globals() {
        let ctx = manager("test");
        ctx.set_arguments(json!({"user": "alice"}));

        assert_eq!(ctx.arguments()["user"], "alice");
        let value = ctx.script_engine().execute_script("user + '!'").await.unwrap();
        assert_eq!(value, json!("alice!"));
    }

    #[test]
    fn test_child_token_follows_parent() {
        let parent = Arc::new(manager("env"));
        let child = EntityManager::new_child(
            &parent,
            "fixture",
            Arc::new(VariableScriptEngine::new("fixture")),
        );

        parent.cancellation_token().cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_clears_state() {
        let ctx = manager("fixture");
        ctx.script_engine().execute_script("x = 1").await.unwrap();
        ctx.register_service(Arc::new(Clock(1)));

        ctx.dispose();
        ctx.dispose();

        assert!(ctx.is_disposed());
        assert!(ctx.is_cancelled());
        assert!(!ctx.script_engine().has_script_variable("x"));
        assert!(ctx.get_service::<Clock>().is_none());
    }

    #[test]
    fn test_file_system_resolution() {
        let fs = ScopeFileSystem::new("/data", "/scripts");
        assert_eq!(
            fs.resolve_script(&ScriptSource::File(PathBuf::from("init.script"))),
            ScriptSource::File(PathBuf::from("/scripts/init.script"))
        );
        assert_eq!(fs.resolve_data(Path::new("rows.json")), PathBuf::from("/data/rows.json"));
        assert_eq!(fs.resolve_data(Path::new("/abs.json")), PathBuf::from("/abs.json"));
    }
}
