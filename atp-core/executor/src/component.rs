//! 组件树模型
//!
//! 组件分为四类:
//! - 同步执行者 ([`Actor`])
//! - 异步执行者 ([`AsyncActor`])
//! - 子处理器 ([`EntityProcessor`])，自行遍历其拥有的子树
//! - 实体 ([`Entity`])，按插入顺序保存子组件的容器

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::context::EntityManager;
use crate::traversal::{NodePath, TraversalCursor, Visit};

/// 组件 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 同步执行者
pub trait Actor: Send {
    /// 执行工作单元
    fn act(&mut self, ctx: &EntityManager) -> anyhow::Result<()>;

    /// 工作单元完成后调用
    fn on_completion(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 异步执行者
#[async_trait]
pub trait AsyncActor: Send {
    /// 执行工作单元，遍历在其完成前不会前进
    async fn act(&mut self, ctx: &EntityManager) -> anyhow::Result<()>;

    fn on_completion(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 子处理器
///
/// 拥有并遍历自己的子树，对外层遍历而言是一个不透明的异步叶子。
#[async_trait]
pub trait EntityProcessor: Send {
    async fn begin_process(&mut self, ctx: &EntityManager) -> anyhow::Result<()>;
}

/// 故障信息，在故障展开时传给每一层实体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// 故障组件 ID
    pub component_id: ComponentId,

    /// 故障组件名称
    pub component_name: String,

    /// 错误描述
    pub message: String,
}

impl Fault {
    pub fn new(component_id: ComponentId, component_name: &str, error: &anyhow::Error) -> Self {
        Self {
            component_id,
            component_name: component_name.to_string(),
            message: format!("{:#}", error),
        }
    }
}

/// 实体钩子
///
/// `before_process` 与 `on_completion` 包围子树的执行；
/// `on_fault` 在后代的失败展开经过该实体时调用。
pub trait EntityHooks: Send {
    fn before_process(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_completion(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_fault(&mut self, _ctx: &EntityManager, _fault: &Fault) {}
}

/// 空钩子
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl EntityHooks for NoopHooks {}

/// 实体角色，用于定位生命周期子树
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    Plain,
    OneTimeSetUp,
    OneTimeTearDown,
    SetUp,
    TearDown,
    TestFixture,
    TestCase,
}

/// 执行者状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorState {
    /// 仅在工作单元运行期间为 true
    pub is_executing: bool,

    /// 工作单元失败后为 true
    pub is_faulted: bool,

    /// 失败后是否继续遍历
    pub continue_on_error: bool,
}

/// 容器组件
pub struct Entity {
    role: EntityRole,
    children: Vec<Component>,
    hooks: Box<dyn EntityHooks>,
}

impl Entity {
    pub fn role(&self) -> EntityRole {
        self.role
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    pub fn hooks_mut(&mut self) -> &mut dyn EntityHooks {
        self.hooks.as_mut()
    }
}

/// 组件种类
pub enum ComponentKind {
    Actor {
        state: ActorState,
        actor: Box<dyn Actor>,
    },
    AsyncActor {
        state: ActorState,
        actor: Box<dyn AsyncActor>,
    },
    Processor(Box<dyn EntityProcessor>),
    Entity(Entity),
}

impl ComponentKind {
    fn label(&self) -> &'static str {
        match self {
            ComponentKind::Actor { .. } => "actor",
            ComponentKind::AsyncActor { .. } => "async-actor",
            ComponentKind::Processor(_) => "processor",
            ComponentKind::Entity(_) => "entity",
        }
    }
}

/// 组件树节点
pub struct Component {
    id: ComponentId,
    name: String,
    tag: String,
    enabled: bool,
    parent: Option<ComponentId>,
    pub(crate) kind: ComponentKind,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Component");
        debug
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("enabled", &self.enabled);
        if let ComponentKind::Entity(entity) = &self.kind {
            debug
                .field("role", &entity.role)
                .field("children", &entity.children);
        }
        debug.finish()
    }
}

impl Component {
    fn with_kind(name: &str, kind: ComponentKind) -> Self {
        Self {
            id: ComponentId::new(),
            name: name.to_string(),
            tag: String::new(),
            enabled: true,
            parent: None,
            kind,
        }
    }

    /// 创建普通实体
    pub fn entity(name: &str) -> Self {
        Self::entity_with_role(name, EntityRole::Plain)
    }

    /// 创建指定角色的实体
    pub fn entity_with_role(name: &str, role: EntityRole) -> Self {
        Self::with_kind(
            name,
            ComponentKind::Entity(Entity {
                role,
                children: Vec::new(),
                hooks: Box::new(NoopHooks),
            }),
        )
    }

    /// 创建同步执行者
    pub fn actor(name: &str, actor: impl Actor + 'static) -> Self {
        Self::with_kind(
            name,
            ComponentKind::Actor {
                state: ActorState::default(),
                actor: Box::new(actor),
            },
        )
    }

    /// 创建异步执行者
    pub fn async_actor(name: &str, actor: impl AsyncActor + 'static) -> Self {
        Self::with_kind(
            name,
            ComponentKind::AsyncActor {
                state: ActorState::default(),
                actor: Box::new(actor),
            },
        )
    }

    /// 创建子处理器
    pub fn processor(name: &str, processor: impl EntityProcessor + 'static) -> Self {
        Self::with_kind(name, ComponentKind::Processor(Box::new(processor)))
    }

    /// 设置标签
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    /// 设置实体钩子，非实体组件忽略
    pub fn with_hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        if let ComponentKind::Entity(entity) = &mut self.kind {
            entity.hooks = Box::new(hooks);
        }
        self
    }

    /// 设置执行者失败后是否继续，非执行者组件忽略
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        if let Some(state) = self.actor_state_mut() {
            state.continue_on_error = continue_on_error;
        }
        self
    }

    /// 禁用组件
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 链式添加子组件
    pub fn with_child(mut self, child: Component) -> Self {
        self.add_child(child);
        self
    }

    /// 添加子组件，返回子组件 ID
    ///
    /// 非实体组件不接受子组件，直接丢弃并返回子组件 ID。
    pub fn add_child(&mut self, mut child: Component) -> ComponentId {
        let child_id = child.id;
        let parent_id = self.id;
        if let ComponentKind::Entity(entity) = &mut self.kind {
            child.parent = Some(parent_id);
            entity.children.push(child);
        } else {
            tracing::warn!("组件 {} 不是实体，无法添加子组件 {}", self.name, child.name);
        }
        child_id
    }

    /// 移除直接子组件
    pub fn remove_child(&mut self, id: ComponentId) -> Option<Component> {
        let ComponentKind::Entity(entity) = &mut self.kind else {
            return None;
        };
        let index = entity.children.iter().position(|c| c.id == id)?;
        let mut child = entity.children.remove(index);
        child.parent = None;
        Some(child)
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn is_entity(&self) -> bool {
        matches!(self.kind, ComponentKind::Entity(_))
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match &self.kind {
            ComponentKind::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match &mut self.kind {
            ComponentKind::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// 实体角色，非实体返回 None
    pub fn role(&self) -> Option<EntityRole> {
        self.as_entity().map(Entity::role)
    }

    /// 执行者状态，非执行者返回 None
    pub fn actor_state(&self) -> Option<&ActorState> {
        match &self.kind {
            ComponentKind::Actor { state, .. } | ComponentKind::AsyncActor { state, .. } => {
                Some(state)
            }
            _ => None,
        }
    }

    fn actor_state_mut(&mut self) -> Option<&mut ActorState> {
        match &mut self.kind {
            ComponentKind::Actor { state, .. } | ComponentKind::AsyncActor { state, .. } => {
                Some(state)
            }
            _ => None,
        }
    }

    /// 子组件 (非实体为空)
    pub fn children(&self) -> &[Component] {
        match &self.kind {
            ComponentKind::Entity(entity) => &entity.children,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [Component] {
        match &mut self.kind {
            ComponentKind::Entity(entity) => &mut entity.children,
            _ => &mut [],
        }
    }

    /// 按相对路径定位节点，空路径为自身
    pub fn node_at(&self, path: &NodePath) -> Option<&Component> {
        path.iter()
            .try_fold(self, |node, &index| node.children().get(index))
    }

    pub fn node_at_mut(&mut self, path: &NodePath) -> Option<&mut Component> {
        let mut node = self;
        for &index in path.iter() {
            node = node.children_mut().get_mut(index)?;
        }
        Some(node)
    }

    /// 深度优先查找组件 (包含自身)
    pub fn find(&self, id: ComponentId) -> Option<&Component> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut()
            .iter_mut()
            .find_map(|child| child.find_mut(id))
    }

    /// 按名称查找第一个匹配的后代 (包含自身)
    pub fn find_by_name(&self, name: &str) -> Option<&Component> {
        if self.name == name {
            return Some(self);
        }
        self.children()
            .iter()
            .find_map(|child| child.find_by_name(name))
    }

    /// 查找指定角色的直接子实体
    pub fn find_child_by_role(&self, role: EntityRole) -> Option<&Component> {
        self.children()
            .iter()
            .find(|child| child.role() == Some(role))
    }

    /// 指定角色直接子实体的 ID
    pub fn child_id_by_role(&self, role: EntityRole) -> Option<ComponentId> {
        self.find_child_by_role(role).map(Component::id)
    }

    /// 是否包含指定 ID 的直接子组件
    pub fn has_child(&self, id: ComponentId) -> bool {
        self.children().iter().any(|child| child.id == id)
    }

    /// 完整的遍历事件序列 (用于检查和单步调试)
    pub fn visits(&self) -> Vec<Visit> {
        let mut cursor = TraversalCursor::new();
        std::iter::from_fn(|| cursor.next(self)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Actor for Noop {
        fn act(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn sample_tree() -> Component {
        Component::entity("root")
            .with_child(Component::entity_with_role("setup", EntityRole::SetUp))
            .with_child(
                Component::entity("body")
                    .with_child(Component::actor("a", Noop))
                    .with_child(Component::actor("b", Noop).continue_on_error(true)),
            )
    }

    #[test]
    fn test_add_child_assigns_parent() {
        let root = sample_tree();
        let body = root.find_by_name("body").unwrap();
        let a = root.find_by_name("a").unwrap();

        assert_eq!(body.parent(), Some(root.id()));
        assert_eq!(a.parent(), Some(body.id()));
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_actor_cannot_have_children() {
        let mut actor = Component::actor("leaf", Noop);
        actor.add_child(Component::entity("orphan"));
        assert!(actor.children().is_empty());
    }

    #[test]
    fn test_remove_child_clears_parent() {
        let mut root = sample_tree();
        let body_id = root.find_by_name("body").unwrap().id();

        let body = root.remove_child(body_id).unwrap();
        assert!(body.parent().is_none());
        assert!(root.find(body_id).is_none());
        assert!(root.remove_child(body_id).is_none());
    }

    #[test]
    fn test_lookup_helpers() {
        let mut root = sample_tree();
        assert!(root.find_child_by_role(EntityRole::SetUp).is_some());
        assert!(root.find_child_by_role(EntityRole::TearDown).is_none());

        let b = root.node_at(&vec![1, 1]).unwrap();
        assert_eq!(b.name(), "b");
        assert!(b.actor_state().unwrap().continue_on_error);

        let b_id = b.id();
        root.find_mut(b_id).unwrap().set_enabled(false);
        assert!(!root.find(b_id).unwrap().is_enabled());
        assert!(root.node_at(&vec![5]).is_none());
    }
}
