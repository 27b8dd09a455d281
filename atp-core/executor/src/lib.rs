//! ATP 执行器
//!
//! 组件树模型、执行上下文与深度优先的遍历调度引擎

pub mod actors;
pub mod component;
pub mod context;
pub mod engine;
pub mod error;
pub mod traversal;

pub use actors::{DelayActor, FnActor, NestedProcessor, ScriptActor};
pub use component::{
    Actor, ActorState, AsyncActor, Component, ComponentId, ComponentKind, Entity, EntityHooks,
    EntityProcessor, EntityRole, Fault, NoopHooks,
};
pub use context::{EntityManager, ScopeFileSystem};
pub use engine::{DispatchOutcome, ProcessEngine};
pub use error::{ProcessError, Result};
pub use traversal::{NodePath, TraversalCursor, Visit};
