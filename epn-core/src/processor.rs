//! 事件处理器（EventProcessor）
//!
//! 业务逻辑的唯一扩展点：逐个事件转换，决定转发、丢弃或请求重试。
//!
use crate::{context::EpnContext, error::EpnResult, event_list::Event};
use async_trait::async_trait;

/// 事件处理器
///
/// 生命周期：`init` → 多次 `process` → `close`，三者均由所属节点调用。
/// `process` 的返回值含义：
/// - `Ok(Some(e))`：转发结果 `e` 至下游；
/// - `Ok(None)`：已消费，无需转发；
/// - `Err(_)`：该事件需要重试，原始事件进入重试列表。
///
/// 同一处理器可能被并发调用（不同批次），需自行保证内部状态的并发安全。
#[async_trait]
pub trait EventProcessor<E: Event>: Send + Sync {
    async fn init(&self, _ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        Ok(())
    }

    /// 处理单个事件；`source` 为上游节点名（根节点批次为 `None`）
    async fn process(&self, source: Option<&str>, event: &E, retries_left: u32)
    -> anyhow::Result<Option<E>>;

    async fn close(&self, _ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        Ok(())
    }
}
