//! 测试运行器
//!
//! 生命周期:
//! `Uninitialized -> EnvironmentReady -> (FixtureOpen -> TestOpen ... -> FixtureClosed)* -> EnvironmentTornDown`
//!
//! 运行器拥有进程根实体。根实体的 `OneTimeSetUp`/`OneTimeTearDown` 角色子实体是环境级子树，
//! 打开的夹具实体挂在根实体下，打开的用例实体挂在所属夹具实体下。

use chrono::Utc;
use futures_util::stream::{self, Stream};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use atp_common::TestResult;
use atp_datasource::DataSourceReader;
use atp_executor::{Component, ComponentId, EntityManager, EntityRole, ProcessEngine};
use atp_scripting::{ScriptEngine, ScriptEngineFactory, ScriptSource};

use crate::config::{AbortMode, RunnerConfig};
use crate::fixture::{stage_entity, TestFixture};
use crate::{Result, RunnerError};

/// 环境脚本中用于选择数据文件后缀的变量
pub const DATA_SOURCE_SUFFIX_VARIABLE: &str = "data_source_suffix";

/// 运行器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Uninitialized,
    EnvironmentReady,
    FixtureOpen,
    TestOpen,
    EnvironmentTornDown,
}

struct TestScope {
    manager: Arc<EntityManager>,
    entity_id: ComponentId,
}

struct FixtureScope {
    manager: Arc<EntityManager>,
    entity_id: ComponentId,
    tests: HashMap<String, TestScope>,
}

/// 单次 `run_test` 调用所需的全部信息
struct RowPlan {
    test_id: String,
    fixture_ctx: Arc<EntityManager>,
    test_ctx: Arc<EntityManager>,
    fixture_script: Option<ScriptSource>,
    test_script: Option<ScriptSource>,
    set_up: Option<ComponentId>,
    tear_down: Option<ComponentId>,
    test_entity: ComponentId,
    rows: Vec<Value>,
}

/// 测试运行器
pub struct TestRunner {
    config: RunnerConfig,
    root: Component,
    engine: ProcessEngine,
    environment: Arc<EntityManager>,
    script_factory: Arc<dyn ScriptEngineFactory>,
    reader: Arc<dyn DataSourceReader>,
    fixtures: HashMap<String, FixtureScope>,
    abort: CancellationToken,
    can_run_tests: bool,
    torn_down: bool,
    span: Span,
}

impl TestRunner {
    /// 创建新的测试运行器
    pub fn new(
        config: RunnerConfig,
        script_factory: Arc<dyn ScriptEngineFactory>,
        reader: Arc<dyn DataSourceReader>,
    ) -> Self {
        let environment = EntityManager::new("environment", script_factory.create("environment"))
            .with_file_system(config.file_system())
            .with_post_action_delay(config.post_action_delay());

        Self {
            config,
            root: Component::entity("process"),
            engine: ProcessEngine::new("test_runner"),
            environment: Arc::new(environment),
            script_factory,
            reader,
            fixtures: HashMap::new(),
            abort: CancellationToken::new(),
            can_run_tests: false,
            torn_down: false,
            span: info_span!("test_runner"),
        }
    }

    /// 添加环境级生命周期子树 (`OneTimeSetUp` / `OneTimeTearDown`)
    pub fn with_environment_stage(
        mut self,
        role: EntityRole,
        children: impl IntoIterator<Item = Component>,
    ) -> Self {
        let name = format!("environment.{:?}", role);
        self.root.add_child(stage_entity(&name, role, children));
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// 进程根实体
    pub fn process_root(&self) -> &Component {
        &self.root
    }

    pub fn environment(&self) -> &Arc<EntityManager> {
        &self.environment
    }

    pub fn can_run_tests(&self) -> bool {
        self.can_run_tests
    }

    /// 当前状态
    pub fn state(&self) -> RunnerState {
        if self.torn_down {
            RunnerState::EnvironmentTornDown
        } else if !self.can_run_tests {
            RunnerState::Uninitialized
        } else if self.fixtures.values().any(|f| !f.tests.is_empty()) {
            RunnerState::TestOpen
        } else if !self.fixtures.is_empty() {
            RunnerState::FixtureOpen
        } else {
            RunnerState::EnvironmentReady
        }
    }

    /// 夹具是否已打开
    pub fn is_fixture_open(&self, fixture_id: &str) -> bool {
        self.fixtures.contains_key(fixture_id)
    }

    /// 用例是否已打开
    pub fn is_test_open(&self, fixture_id: &str, test_id: &str) -> bool {
        self.fixtures
            .get(fixture_id)
            .is_some_and(|f| f.tests.contains_key(test_id))
    }

    /// 夹具的执行上下文
    pub fn fixture_context(&self, fixture_id: &str) -> Option<&Arc<EntityManager>> {
        self.fixtures.get(fixture_id).map(|f| &f.manager)
    }

    /// 用例的执行上下文
    pub fn test_context(&self, fixture_id: &str, test_id: &str) -> Option<&Arc<EntityManager>> {
        self.fixtures
            .get(fixture_id)
            .and_then(|f| f.tests.get(test_id))
            .map(|t| &t.manager)
    }

    /// 中止令牌，取消后会话在下一行数据前停止
    ///
    /// `AbortMode::Immediate` 下用例上下文的取消令牌是它的子令牌，正在执行的用例会被打断。
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn request_abort(&self) {
        warn!("收到中止请求");
        self.abort.cancel();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }

    // ============================================
    // 环境级
    // ============================================

    /// 执行环境级一次性准备
    pub async fn set_up_environment(&mut self) -> bool {
        let span = self.span.clone();
        match self.set_up_environment_inner().instrument(span).await {
            Ok(()) => true,
            Err(e) => {
                error!("环境准备失败: {}", e);
                false
            }
        }
    }

    async fn set_up_environment_inner(&mut self) -> Result<()> {
        info!("开始准备测试环境");
        self.torn_down = false;
        self.run_role(EntityRole::OneTimeSetUp).await?;

        let engine = self.environment.script_engine();
        if engine.has_script_variable(DATA_SOURCE_SUFFIX_VARIABLE) {
            let suffix: String = engine.variable_value(DATA_SOURCE_SUFFIX_VARIABLE)?;
            info!("使用数据源后缀: {}", suffix);
            self.reader.set_data_source_suffix(&suffix);
        }

        self.can_run_tests = true;
        info!("测试环境准备完成");
        Ok(())
    }

    /// 执行环境级一次性清理，结束后总是禁止运行测试
    pub async fn tear_down_environment(&mut self) -> bool {
        let span = self.span.clone();
        let result = async {
            info!("开始清理测试环境");
            self.run_role(EntityRole::OneTimeTearDown).await
        }
        .instrument(span)
        .await;

        self.can_run_tests = false;
        self.torn_down = true;
        match result {
            Ok(()) => {
                info!("测试环境清理完成");
                true
            }
            Err(e) => {
                error!("环境清理失败: {}", e);
                false
            }
        }
    }

    async fn run_role(&mut self, role: EntityRole) -> Result<()> {
        let Some(id) = self.root.child_id_by_role(role) else {
            debug!("进程树没有 {:?} 子树", role);
            return Ok(());
        };
        let ctx = Arc::clone(&self.environment);
        self.process(id, &ctx).await
    }

    /// 处理进程树中的指定子树
    async fn process(&mut self, id: ComponentId, ctx: &EntityManager) -> Result<()> {
        let node = self
            .root
            .find_mut(id)
            .ok_or_else(|| RunnerError::EntityDetached(id.to_string()))?;
        self.engine.process_entity(node, ctx).await?;
        Ok(())
    }

    // ============================================
    // 夹具级
    // ============================================

    /// 打开夹具，已打开时直接成功
    pub async fn try_open_test_fixture(&mut self, fixture: &mut TestFixture) -> bool {
        match self.open_test_fixture(fixture).await {
            Ok(()) => true,
            Err(e) => {
                error!("打开夹具 {} 失败: {}", fixture.id, e);
                false
            }
        }
    }

    /// 打开夹具: 创建执行上下文，挂载夹具实体并执行初始化脚本
    pub async fn open_test_fixture(&mut self, fixture: &mut TestFixture) -> Result<()> {
        if self.fixtures.contains_key(&fixture.id) {
            debug!("夹具已打开: {}", fixture.id);
            return Ok(());
        }

        let entity = fixture
            .take_entity()
            .ok_or_else(|| RunnerError::EntityDetached(fixture.id.clone()))?;

        let manager = Arc::new(EntityManager::new_child(
            &self.environment,
            &fixture.id,
            self.script_factory.create(&fixture.id),
        ));

        if let Err(e) = execute_init_script(&manager, fixture.init_script.as_ref()).await {
            manager.dispose();
            fixture.restore_entity(entity);
            return Err(e);
        }

        let entity_id = self.root.add_child(entity);
        self.fixtures.insert(
            fixture.id.clone(),
            FixtureScope {
                manager,
                entity_id,
                tests: HashMap::new(),
            },
        );
        info!("夹具已打开: {}", fixture.id);
        Ok(())
    }

    /// 关闭夹具，仍有打开的用例时返回错误
    pub fn try_close_test_fixture(&mut self, fixture: &mut TestFixture) -> Result<()> {
        let Some(scope) = self.fixtures.get(&fixture.id) else {
            debug!("夹具未打开: {}", fixture.id);
            return Ok(());
        };

        if !scope.tests.is_empty() {
            let mut tests: Vec<String> = scope.tests.keys().cloned().collect();
            tests.sort();
            return Err(RunnerError::TestsStillOpen {
                fixture: fixture.id.clone(),
                tests,
            });
        }

        if let Some(scope) = self.fixtures.remove(&fixture.id) {
            scope.manager.dispose();
            match self.root.remove_child(scope.entity_id) {
                Some(entity) => fixture.restore_entity(entity),
                None => warn!("夹具实体不在进程树中: {}", fixture.id),
            }
        }
        info!("夹具已关闭: {}", fixture.id);
        Ok(())
    }

    /// 夹具一次性准备
    pub async fn one_time_set_up(&mut self, fixture: &TestFixture) -> bool {
        self.one_time_stage(fixture, EntityRole::OneTimeSetUp).await
    }

    /// 夹具一次性清理
    pub async fn one_time_tear_down(&mut self, fixture: &TestFixture) -> bool {
        self.one_time_stage(fixture, EntityRole::OneTimeTearDown).await
    }

    async fn one_time_stage(&mut self, fixture: &TestFixture, role: EntityRole) -> bool {
        let span = self.span.clone();
        let result: Result<()> = async {
            let (manager, entity_id) = {
                let scope = self
                    .fixtures
                    .get(&fixture.id)
                    .ok_or_else(|| RunnerError::FixtureNotOpen(fixture.id.clone()))?;
                (Arc::clone(&scope.manager), scope.entity_id)
            };

            info!("夹具 {} 执行 {:?}", fixture.id, role);
            manager.script_engine().clear_state();
            execute_init_script(&manager, fixture.init_script.as_ref()).await?;

            let stage = self
                .root
                .find(entity_id)
                .and_then(|entity| entity.child_id_by_role(role));
            match stage {
                Some(id) => self.process(id, &manager).await,
                None => Ok(()),
            }
        }
        .instrument(span)
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("夹具 {} {:?} 失败: {}", fixture.id, role, e);
                false
            }
        }
    }

    // ============================================
    // 用例级
    // ============================================

    /// 打开测试用例
    pub async fn try_open_test_case(&mut self, fixture: &mut TestFixture, test_id: &str) -> bool {
        match self.open_test_case(fixture, test_id).await {
            Ok(()) => true,
            Err(e) => {
                error!("打开用例 {} 失败: {}", test_id, e);
                false
            }
        }
    }

    /// 打开测试用例
    ///
    /// 夹具必须已打开，数据源必须至少有一行数据 (用于初始化参数实例)。
    /// 夹具与用例的初始化脚本都在用例自己的脚本引擎中执行。
    pub async fn open_test_case(&mut self, fixture: &mut TestFixture, test_id: &str) -> Result<()> {
        let (fixture_manager, fixture_entity) = {
            let scope = self
                .fixtures
                .get(&fixture.id)
                .ok_or_else(|| RunnerError::FixtureNotOpen(fixture.id.clone()))?;
            if scope.tests.contains_key(test_id) {
                debug!("用例已打开: {}", test_id);
                return Ok(());
            }
            (Arc::clone(&scope.manager), scope.entity_id)
        };

        let fixture_id = fixture.id.clone();
        let fixture_script = fixture.init_script.clone();
        let test = fixture
            .test_mut(test_id)
            .ok_or_else(|| RunnerError::TestNotFound {
                fixture: fixture_id.clone(),
                test: test_id.to_string(),
            })?;

        let reader = Arc::clone(&self.reader);
        let rows = load_rows(reader.as_ref(), test.data_source_id.as_deref()).await?;
        let first_row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RunnerError::NoRows(test.data_source_id.clone().unwrap_or_default()))?;

        let mut manager = EntityManager::new_child(
            &fixture_manager,
            &test.id,
            self.script_factory.create(&test.id),
        )
        .with_post_action_delay(scaled_delay(self.config.post_action_delay(), test.delay_factor));
        if self.config.abort_mode == AbortMode::Immediate {
            manager = manager.with_cancellation(self.abort.child_token());
        }
        let manager = Arc::new(manager);
        manager.set_arguments(first_row);

        let scripts: Result<()> = async {
            execute_init_script(&manager, fixture_script.as_ref()).await?;
            execute_init_script(&manager, test.init_script.as_ref()).await
        }
        .await;
        if let Err(e) = scripts {
            manager.dispose();
            return Err(e);
        }

        let Some(entity) = test.take_entity() else {
            manager.dispose();
            return Err(RunnerError::EntityDetached(test.id.clone()));
        };
        let Some(parent) = self.root.find_mut(fixture_entity) else {
            manager.dispose();
            test.restore_entity(entity);
            return Err(RunnerError::EntityDetached(fixture_id));
        };
        let entity_id = parent.add_child(entity);

        if let Some(scope) = self.fixtures.get_mut(&fixture_id) {
            scope.tests.insert(
                test_id.to_string(),
                TestScope {
                    manager,
                    entity_id,
                },
            );
        }
        info!("用例已打开: {}/{}", fixture_id, test_id);
        Ok(())
    }

    /// 关闭测试用例，用例或夹具未打开时直接成功
    pub async fn try_close_test_case(&mut self, fixture: &mut TestFixture, test_id: &str) -> bool {
        let Some(scope) = self.fixtures.get_mut(&fixture.id) else {
            debug!("夹具未打开，用例 {} 无需关闭", test_id);
            return true;
        };
        let Some(test_scope) = scope.tests.remove(test_id) else {
            debug!("用例未打开: {}", test_id);
            return true;
        };
        let fixture_entity = scope.entity_id;

        test_scope.manager.dispose();
        let entity = self
            .root
            .find_mut(fixture_entity)
            .and_then(|parent| parent.remove_child(test_scope.entity_id));
        match (entity, fixture.test_mut(test_id)) {
            (Some(entity), Some(test)) => test.restore_entity(entity),
            _ => warn!("用例实体无法归还: {}", test_id),
        }
        info!("用例已关闭: {}/{}", fixture.id, test_id);
        true
    }

    // ============================================
    // 数据驱动执行
    // ============================================

    /// 执行测试用例，每个数据行产生一个结果
    ///
    /// 数据在调用时加载，每次调用都从第一行重新开始。单行失败记录在该行结果中，
    /// 不影响后续行。
    pub async fn run_test(
        &mut self,
        fixture: &TestFixture,
        test_id: &str,
    ) -> Result<impl Stream<Item = TestResult> + '_> {
        let mut plan = self.plan_run(fixture, test_id)?;
        let reader = Arc::clone(&self.reader);
        let data_source_id = fixture
            .test(test_id)
            .and_then(|test| test.data_source_id.clone());
        plan.rows = load_rows(reader.as_ref(), data_source_id.as_deref()).await?;
        info!("开始执行用例 {}: {} 行数据", test_id, plan.rows.len());
        Ok(self.row_stream(plan))
    }

    fn plan_run(&self, fixture: &TestFixture, test_id: &str) -> Result<RowPlan> {
        if !self.can_run_tests {
            return Err(RunnerError::EnvironmentNotReady);
        }
        let scope = self
            .fixtures
            .get(&fixture.id)
            .ok_or_else(|| RunnerError::FixtureNotOpen(fixture.id.clone()))?;
        let test_scope = scope
            .tests
            .get(test_id)
            .ok_or_else(|| RunnerError::TestNotOpen(test_id.to_string()))?;
        let test = fixture.test(test_id).ok_or_else(|| RunnerError::TestNotFound {
            fixture: fixture.id.clone(),
            test: test_id.to_string(),
        })?;

        let fixture_entity = self.root.find(scope.entity_id);
        let stage = |role| fixture_entity.and_then(|entity| entity.child_id_by_role(role));

        Ok(RowPlan {
            test_id: test_id.to_string(),
            fixture_ctx: Arc::clone(&scope.manager),
            test_ctx: Arc::clone(&test_scope.manager),
            fixture_script: fixture.init_script.clone(),
            test_script: test.init_script.clone(),
            set_up: stage(EntityRole::SetUp),
            tear_down: stage(EntityRole::TearDown),
            test_entity: test_scope.entity_id,
            rows: Vec::new(),
        })
    }

    fn row_stream(&mut self, plan: RowPlan) -> impl Stream<Item = TestResult> + '_ {
        stream::unfold((self, plan, 0usize), |(runner, plan, index)| async move {
            let row = plan.rows.get(index)?.clone();
            let span = info_span!(parent: &runner.span, "row", test = %plan.test_id, index);
            let result = runner.run_row(&plan, index, row).instrument(span).await;
            Some((result, (runner, plan, index + 1)))
        })
    }

    async fn run_row(&mut self, plan: &RowPlan, index: usize, row: Value) -> TestResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = self.execute_row(plan, &row).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                info!("第 {} 行执行成功 ({:?})", index, elapsed);
                TestResult::success(&plan.test_id, index, &row, elapsed, started_at)
            }
            Err(e) => {
                error!("第 {} 行执行失败: {}", index, e);
                TestResult::failed(&plan.test_id, index, &row, e.to_string(), elapsed, started_at)
            }
        }
    }

    async fn execute_row(&mut self, plan: &RowPlan, row: &Value) -> Result<()> {
        let test_ctx = Arc::clone(&plan.test_ctx);
        let fixture_engine = Arc::clone(plan.fixture_ctx.script_engine());
        let test_engine = Arc::clone(test_ctx.script_engine());

        let body: Result<()> = async {
            test_engine.clear_state();
            test_ctx.set_arguments(row.clone());
            execute_init_script(&test_ctx, plan.fixture_script.as_ref()).await?;
            let copied = fixture_engine.copy_variables_to(test_engine.as_ref())?;
            debug!("从夹具拷贝 {} 个变量", copied);
            execute_init_script(&test_ctx, plan.test_script.as_ref()).await?;

            if let Some(id) = plan.set_up {
                self.process(id, &test_ctx).await.map_err(|e| {
                    error!("用例前置阶段失败: {}", e);
                    e
                })?;
            }

            self.process(plan.test_entity, &test_ctx)
                .await
                .map_err(|e| {
                    error!("用例执行阶段失败: {}", e);
                    e
                })
        }
        .await;

        let tear_down: Result<()> = async {
            if let Some(id) = plan.tear_down {
                self.process(id, &test_ctx).await.map_err(|e| {
                    error!("用例清理阶段失败: {}", e);
                    e
                })?;
            }
            let copied = test_engine.copy_shared_variables_to(fixture_engine.as_ref())?;
            debug!("向夹具回写 {} 个变量", copied);
            Ok(())
        }
        .await;

        body.and(tear_down)
    }

}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("state", &self.state())
            .field("fixtures", &self.fixtures.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 用例的数据行，未设置数据源时为单个空行
async fn load_rows(reader: &dyn DataSourceReader, data_source_id: Option<&str>) -> Result<Vec<Value>> {
    match data_source_id {
        Some(id) => Ok(reader.load_data(id).await?),
        None => Ok(vec![Value::Null]),
    }
}

/// 在上下文的脚本引擎中执行初始化脚本，脚本文件相对脚本目录解析
async fn execute_init_script(manager: &EntityManager, script: Option<&ScriptSource>) -> Result<()> {
    let Some(script) = script else {
        return Ok(());
    };
    let source = manager.file_system().resolve_script(script);
    debug!("[{}] 执行初始化脚本: {:?}", manager.scope(), source);
    manager.script_engine().execute_source(&source).await?;
    Ok(())
}

fn scaled_delay(base: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
}
