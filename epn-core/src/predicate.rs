//! 事件谓词（Predicate）
//!
//! 处理前的有状态过滤器，拒绝的事件被静默丢弃：不重试、不转发、不计入失败。
//!
use crate::{context::EpnContext, error::EpnResult, event_list::Event};
use async_trait::async_trait;

/// 事件谓词；`apply` 只会在 `init` 成功之后、`close` 之前被调用
#[async_trait]
pub trait Predicate<E: Event>: Send + Sync {
    /// 获取外部资源（例如缓存句柄）
    async fn init(&self, _ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        Ok(())
    }

    async fn apply(&self, event: &E) -> bool;

    async fn close(&self, _ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        Ok(())
    }
}
