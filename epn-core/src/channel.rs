//! 传输通道（Channel / RetryChannel）
//!
//! 节点初始化时由 `EpnContext` 解析，之后在节点生命周期内不可变。
//! 发送失败必须以错误返回：调用方所在的传输单元据此整体回滚并触发传输层重投，
//! 与节点自身的重试计数相互独立。
//!
use crate::{error::EpnResult, event_list::Event, event_list::EventList};
use async_trait::async_trait;

/// 指向某个下游 `Destination` 的单向通道
#[async_trait]
pub trait Channel<E: Event>: Send + Sync {
    /// 发送一批结果，`source` 为发送方节点名
    async fn send(&self, source: &str, events: &EventList<E>) -> EpnResult<()>;

    async fn close(&self) -> EpnResult<()> {
        Ok(())
    }
}

/// 将批次重新提交给同一节点的通道
#[async_trait]
pub trait RetryChannel<E: Event>: Send + Sync {
    /// 以 `retries_remaining` 作为新的剩余重试次数重新提交
    ///
    /// `source` 为原批次的来源节点（根批次为 `None`），重试时原样保留。
    async fn send(
        &self,
        source: Option<&str>,
        events: &EventList<E>,
        retries_remaining: u32,
    ) -> EpnResult<()>;

    async fn close(&self) -> EpnResult<()> {
        Ok(())
    }
}
