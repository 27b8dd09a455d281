//! 测试夹具与测试用例定义

use serde::{Deserialize, Serialize};

use atp_executor::{Component, EntityHooks, EntityRole};
use atp_scripting::ScriptSource;

/// 用例优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// 创建阶段子树
pub(crate) fn stage_entity(
    name: &str,
    role: EntityRole,
    children: impl IntoIterator<Item = Component>,
) -> Component {
    children
        .into_iter()
        .fold(Component::entity_with_role(name, role), Component::with_child)
}

/// 测试夹具
///
/// 夹具实体的角色子实体就是它的生命周期子树:
/// `OneTimeSetUp`/`OneTimeTearDown` 在夹具级执行一次，
/// `SetUp`/`TearDown` 在每个用例的每一行数据前后执行。
/// 夹具打开期间实体挂在运行器的进程树上，此时 `entity` 为 `None`。
#[derive(Debug)]
pub struct TestFixture {
    pub id: String,

    pub description: Option<String>,

    /// 初始化脚本
    pub init_script: Option<ScriptSource>,

    entity: Option<Component>,

    tests: Vec<TestCase>,
}

impl TestFixture {
    /// 创建新的测试夹具
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            init_script: None,
            entity: Some(Component::entity_with_role(id, EntityRole::TestFixture)),
            tests: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_init_script(mut self, script: ScriptSource) -> Self {
        self.init_script = Some(script);
        self
    }

    /// 设置夹具实体的钩子
    pub fn with_hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        self.entity = self.entity.take().map(|entity| entity.with_hooks(hooks));
        self
    }

    /// 添加生命周期子树
    pub fn with_stage(
        mut self,
        role: EntityRole,
        children: impl IntoIterator<Item = Component>,
    ) -> Self {
        let name = format!("{}.{:?}", self.id, role);
        if let Some(entity) = self.entity.as_mut() {
            entity.add_child(stage_entity(&name, role, children));
        }
        self
    }

    /// 添加测试用例
    pub fn add_test(&mut self, mut test: TestCase) {
        test.fixture_id = self.id.clone();
        self.tests.push(test);
    }

    pub fn with_test(mut self, test: TestCase) -> Self {
        self.add_test(test);
        self
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn test(&self, id: &str) -> Option<&TestCase> {
        self.tests.iter().find(|t| t.id == id)
    }

    pub fn test_mut(&mut self, id: &str) -> Option<&mut TestCase> {
        self.tests.iter_mut().find(|t| t.id == id)
    }

    /// 夹具实体 (夹具打开期间为 `None`)
    pub fn entity(&self) -> Option<&Component> {
        self.entity.as_ref()
    }

    pub(crate) fn take_entity(&mut self) -> Option<Component> {
        self.entity.take()
    }

    pub(crate) fn restore_entity(&mut self, entity: Component) {
        self.entity = Some(entity);
    }

    /// 未静音用例的执行顺序: 优先级降序，同优先级按 order 升序
    pub fn execution_order(&self) -> Vec<&TestCase> {
        let mut tests: Vec<&TestCase> = self.tests.iter().filter(|t| !t.is_muted).collect();
        tests.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        tests
    }

    /// 静音的用例
    pub fn muted_tests(&self) -> Vec<&TestCase> {
        self.tests.iter().filter(|t| t.is_muted).collect()
    }
}

/// 测试用例
#[derive(Debug)]
pub struct TestCase {
    pub id: String,

    /// 所属夹具 ID
    pub fixture_id: String,

    pub description: Option<String>,

    /// 数据源 ID，未设置时只以空数据行执行一次
    pub data_source_id: Option<String>,

    /// 初始化脚本
    pub init_script: Option<ScriptSource>,

    /// 同优先级内的执行顺序
    pub order: i32,

    pub priority: Priority,

    /// 执行者延迟倍数
    pub delay_factor: f64,

    /// 静音的用例不会被会话执行
    pub is_muted: bool,

    pub tags: Vec<String>,

    entity: Option<Component>,
}

impl TestCase {
    /// 创建新的测试用例
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fixture_id: String::new(),
            description: None,
            data_source_id: None,
            init_script: None,
            order: 0,
            priority: Priority::Normal,
            delay_factor: 1.0,
            is_muted: false,
            tags: Vec::new(),
            entity: Some(Component::entity_with_role(id, EntityRole::TestCase)),
        }
    }

    /// 添加步骤
    pub fn with_step(mut self, step: Component) -> Self {
        self.entity = self.entity.take().map(|entity| entity.with_child(step));
        self
    }

    pub fn with_hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        self.entity = self.entity.take().map(|entity| entity.with_hooks(hooks));
        self
    }

    pub fn with_data_source(mut self, data_source_id: &str) -> Self {
        self.data_source_id = Some(data_source_id.to_string());
        self
    }

    pub fn with_init_script(mut self, script: ScriptSource) -> Self {
        self.init_script = Some(script);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_factor(mut self, delay_factor: f64) -> Self {
        self.delay_factor = delay_factor;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn muted(mut self) -> Self {
        self.is_muted = true;
        self
    }

    /// 用例实体 (用例打开期间为 `None`)
    pub fn entity(&self) -> Option<&Component> {
        self.entity.as_ref()
    }

    pub(crate) fn take_entity(&mut self) -> Option<Component> {
        self.entity.take()
    }

    pub(crate) fn restore_entity(&mut self, entity: Component) {
        self.entity = Some(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_order() {
        let fixture = TestFixture::new("login")
            .with_test(TestCase::new("b").with_order(2))
            .with_test(TestCase::new("a").with_order(1))
            .with_test(TestCase::new("urgent").with_priority(Priority::High).with_order(9))
            .with_test(TestCase::new("later").with_priority(Priority::Low))
            .with_test(TestCase::new("quiet").muted());

        let order: Vec<&str> = fixture
            .execution_order()
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(order, vec!["urgent", "a", "b", "later"]);
        assert_eq!(fixture.muted_tests()[0].id, "quiet");
        assert!(fixture.tests().iter().all(|t| t.fixture_id == "login"));
    }

    #[test]
    fn test_stages_are_role_children() {
        let fixture = TestFixture::new("f")
            .with_stage(EntityRole::SetUp, [Component::entity("inner")])
            .with_stage(EntityRole::OneTimeTearDown, Vec::new());

        let entity = fixture.entity().unwrap();
        assert_eq!(entity.role(), Some(EntityRole::TestFixture));
        let setup = entity.find_child_by_role(EntityRole::SetUp).unwrap();
        assert_eq!(setup.name(), "f.SetUp");
        assert_eq!(setup.children().len(), 1);
        assert!(entity.find_child_by_role(EntityRole::OneTimeTearDown).is_some());
        assert!(entity.find_child_by_role(EntityRole::TearDown).is_none());
    }
}
