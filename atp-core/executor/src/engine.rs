//! 组件树处理引擎
//!
//! 处理流程:
//! 1. 调用根实体的 `before_process`
//! 2. 按遍历事件依次调度: 进入实体时调用 `before_process` 并入栈，
//!    叶子按种类同步/异步执行，离开实体时出栈并调用 `on_completion`
//! 3. 调用根实体的 `on_completion`
//!
//! 中止失败时，按由内到外的顺序对栈中每个实体调用 `on_fault`，
//! 最后调用根实体的 `on_fault`，然后将原始错误返回给调用方。

use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::component::{ActorState, Component, ComponentId, ComponentKind, Fault};
use crate::context::EntityManager;
use crate::traversal::{NodePath, TraversalCursor, Visit};
use crate::{ProcessError, Result};

/// 单个工作单元的调度结果
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 正常完成
    Completed,

    /// 失败但设置了 continue_on_error，遍历继续
    FaultedButContinuing(anyhow::Error),

    /// 失败且需要中止遍历
    Aborted(anyhow::Error),
}

impl ActorState {
    fn begin(&mut self) {
        self.is_executing = true;
        self.is_faulted = false;
    }

    fn finish(&mut self, result: anyhow::Result<()>) -> DispatchOutcome {
        self.is_executing = false;
        match result {
            Ok(()) => DispatchOutcome::Completed,
            Err(e) => {
                self.is_faulted = true;
                if self.continue_on_error {
                    DispatchOutcome::FaultedButContinuing(e)
                } else {
                    DispatchOutcome::Aborted(e)
                }
            }
        }
    }
}

/// 组件树处理引擎
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    span: Span,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new("default")
    }
}

impl ProcessEngine {
    /// 创建新的处理引擎，日志记录在以 `name` 标识的 span 下
    pub fn new(name: &str) -> Self {
        Self {
            span: info_span!("process_engine", engine = %name),
        }
    }

    /// 使用调用方提供的 span
    pub fn with_span(span: Span) -> Self {
        Self { span }
    }

    /// 处理以 `root` 为根的实体子树
    pub async fn process_entity(&self, root: &mut Component, ctx: &EntityManager) -> Result<()> {
        self.walk(root, ctx).instrument(self.span.clone()).await
    }

    async fn walk(&self, root: &mut Component, ctx: &EntityManager) -> Result<()> {
        if !root.is_entity() {
            return Err(ProcessError::NotAnEntity(root.name().to_string()));
        }
        if !root.is_enabled() {
            debug!("跳过已禁用的实体: {}", root.name());
            return Ok(());
        }

        let root_id = root.id();
        let root_name = root.name().to_string();
        info!("开始处理实体: {} [{}]", root_name, ctx.scope());

        if let Some(entity) = root.as_entity_mut() {
            if let Err(e) = entity.hooks_mut().before_process(ctx) {
                let fault = Fault::new(root_id, &root_name, &e);
                entity.hooks_mut().on_fault(ctx, &fault);
                error!("实体 {} 前置钩子失败: {:#}", root_name, e);
                return Err(aborted(&root_name, root_id, e));
            }
        }

        let mut cursor = TraversalCursor::new();
        let mut stack: Vec<NodePath> = Vec::new();

        while let Some(visit) = cursor.next(root) {
            if ctx.is_cancelled() {
                warn!("实体 {} 处理已取消", root_name);
                let fault = Fault {
                    component_id: root_id,
                    component_name: root_name.clone(),
                    message: "执行已取消".to_string(),
                };
                return Err(unwind(root, &mut stack, &fault, ctx, ProcessError::Cancelled));
            }

            match visit {
                Visit::Enter(path) => {
                    stack.push(path.clone());
                    let Some(node) = root.node_at_mut(&path) else {
                        continue;
                    };
                    let (id, name) = (node.id(), node.name().to_string());
                    debug!("进入实体: {}", name);
                    let result = match node.as_entity_mut() {
                        Some(entity) => entity.hooks_mut().before_process(ctx),
                        None => Ok(()),
                    };
                    if let Err(e) = result {
                        error!("实体 {} 前置钩子失败: {:#}", name, e);
                        let fault = Fault::new(id, &name, &e);
                        return Err(unwind(root, &mut stack, &fault, ctx, aborted(&name, id, e)));
                    }
                }
                Visit::Leaf(path) => {
                    let Some(node) = root.node_at_mut(&path) else {
                        continue;
                    };
                    let (id, name) = (node.id(), node.name().to_string());
                    let is_actor = node.actor_state().is_some();

                    match self.dispatch(node, ctx).await {
                        DispatchOutcome::Completed => {}
                        DispatchOutcome::FaultedButContinuing(e) => {
                            warn!("组件 {} 执行失败，继续执行: {:#}", name, e);
                        }
                        DispatchOutcome::Aborted(e) => {
                            let fault = Fault::new(id, &name, &e);
                            // 令牌已取消时，执行者的失败视为取消
                            let error = if ctx.is_cancelled() {
                                warn!("组件 {} 执行被取消: {:#}", name, e);
                                ProcessError::Cancelled
                            } else {
                                error!("组件 {} 执行失败: {:#}", name, e);
                                aborted(&name, id, e)
                            };
                            return Err(unwind(root, &mut stack, &fault, ctx, error));
                        }
                    }

                    let delay = ctx.post_action_delay();
                    if is_actor && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Visit::Exit(path) => {
                    let popped = stack.pop();
                    debug_assert_eq!(popped.as_ref(), Some(&path));
                    let Some(node) = root.node_at_mut(&path) else {
                        continue;
                    };
                    let (id, name) = (node.id(), node.name().to_string());
                    let result = match node.as_entity_mut() {
                        Some(entity) => entity.hooks_mut().on_completion(ctx),
                        None => Ok(()),
                    };
                    if let Err(e) = result {
                        error!("实体 {} 完成钩子失败: {:#}", name, e);
                        let fault = Fault::new(id, &name, &e);
                        stack.push(path);
                        return Err(unwind(root, &mut stack, &fault, ctx, aborted(&name, id, e)));
                    }
                    debug!("离开实体: {}", name);
                }
            }
        }

        if let Some(entity) = root.as_entity_mut() {
            if let Err(e) = entity.hooks_mut().on_completion(ctx) {
                let fault = Fault::new(root_id, &root_name, &e);
                entity.hooks_mut().on_fault(ctx, &fault);
                error!("实体 {} 完成钩子失败: {:#}", root_name, e);
                return Err(aborted(&root_name, root_id, e));
            }
        }

        info!("实体处理完成: {}", root_name);
        Ok(())
    }

    /// 调度单个工作单元
    pub async fn dispatch(&self, component: &mut Component, ctx: &EntityManager) -> DispatchOutcome {
        debug!("调度组件: {}", component.name());
        match &mut component.kind {
            ComponentKind::Actor { state, actor } => {
                state.begin();
                let result = actor.act(ctx).and_then(|()| actor.on_completion(ctx));
                state.finish(result)
            }
            ComponentKind::AsyncActor { state, actor } => {
                state.begin();
                let result = match actor.act(ctx).await {
                    Ok(()) => actor.on_completion(ctx),
                    Err(e) => Err(e),
                };
                state.finish(result)
            }
            ComponentKind::Processor(processor) => match processor.begin_process(ctx).await {
                Ok(()) => DispatchOutcome::Completed,
                Err(e) => DispatchOutcome::Aborted(e),
            },
            ComponentKind::Entity(_) => DispatchOutcome::Completed,
        }
    }
}

fn aborted(name: &str, id: ComponentId, source: anyhow::Error) -> ProcessError {
    ProcessError::Aborted {
        component: name.to_string(),
        component_id: id,
        source,
    }
}

/// 由内到外调用栈中实体的故障钩子，最后调用根实体的故障钩子
fn unwind(
    root: &mut Component,
    stack: &mut Vec<NodePath>,
    fault: &Fault,
    ctx: &EntityManager,
    error: ProcessError,
) -> ProcessError {
    while let Some(path) = stack.pop() {
        if let Some(entity) = root.node_at_mut(&path).and_then(Component::as_entity_mut) {
            entity.hooks_mut().on_fault(ctx, fault);
        }
    }
    if let Some(entity) = root.as_entity_mut() {
        entity.hooks_mut().on_fault(ctx, fault);
    }
    error
}
