//! 内置执行者与子处理器

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::component::{Actor, AsyncActor, Component, EntityProcessor};
use crate::context::EntityManager;
use crate::engine::ProcessEngine;

/// 闭包执行者
pub struct FnActor<F>(F);

impl<F> FnActor<F>
where
    F: FnMut(&EntityManager) -> anyhow::Result<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Actor for FnActor<F>
where
    F: FnMut(&EntityManager) -> anyhow::Result<()> + Send,
{
    fn act(&mut self, ctx: &EntityManager) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// 在上下文脚本引擎中执行一段脚本
#[derive(Debug, Clone)]
pub struct ScriptActor {
    script: String,
}

impl ScriptActor {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
        }
    }
}

#[async_trait]
impl AsyncActor for ScriptActor {
    async fn act(&mut self, ctx: &EntityManager) -> anyhow::Result<()> {
        let value = ctx
            .script_engine()
            .execute_script(&self.script)
            .await
            .with_context(|| format!("执行脚本失败: {}", self.script))?;
        debug!("脚本结果: {}", value);
        Ok(())
    }
}

/// 等待指定时长
#[derive(Debug, Clone, Copy)]
pub struct DelayActor {
    duration: Duration,
}

impl DelayActor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl AsyncActor for DelayActor {
    async fn act(&mut self, ctx: &EntityManager) -> anyhow::Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(()),
            _ = ctx.cancellation_token().cancelled() => anyhow::bail!("等待被取消"),
        }
    }
}

/// 拥有独立子树的子处理器，用自己的引擎遍历
pub struct NestedProcessor {
    engine: ProcessEngine,
    root: Component,
}

impl NestedProcessor {
    pub fn new(root: Component) -> Self {
        let engine = ProcessEngine::new(root.name());
        Self { engine, root }
    }

    pub fn root(&self) -> &Component {
        &self.root
    }
}

#[async_trait]
impl EntityProcessor for NestedProcessor {
    async fn begin_process(&mut self, ctx: &EntityManager) -> anyhow::Result<()> {
        self.engine.process_entity(&mut self.root, ctx).await?;
        Ok(())
    }
}

impl Component {
    /// 闭包执行者
    pub fn fn_actor<F>(name: &str, f: F) -> Self
    where
        F: FnMut(&EntityManager) -> anyhow::Result<()> + Send + 'static,
    {
        Self::actor(name, FnActor::new(f))
    }

    /// 脚本执行者
    pub fn script(name: &str, script: &str) -> Self {
        Self::async_actor(name, ScriptActor::new(script))
    }

    /// 延迟执行者
    pub fn delay(name: &str, duration: Duration) -> Self {
        Self::async_actor(name, DelayActor::new(duration))
    }

    /// 嵌套子处理器
    pub fn nested(name: &str, root: Component) -> Self {
        Self::processor(name, NestedProcessor::new(root))
    }
}
