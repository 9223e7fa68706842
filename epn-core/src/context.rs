//! 运行时上下文（EpnContext）
//!
//! 由宿主运行时提供：解析通道，并接收耗尽重试的事件（死信入口）。
//!
use crate::{
    channel::{Channel, RetryChannel},
    destination::Destination,
    error::EpnResult,
    event_list::{Event, EventList},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

#[async_trait]
pub trait EpnContext<E: Event>: Send + Sync {
    /// 为目标地址解析通道；节点初始化时对每个目标各调用一次，失败即节点初始化失败
    async fn channel(&self, destination: &Destination) -> EpnResult<Arc<dyn Channel<E>>>;

    /// 为节点解析重试通道；`None` 表示未配置，失败事件直接进入死信
    ///
    /// `interval` 为节点声明的重试间隔，`None` 表示使用传输层默认值。
    async fn retry_channel(
        &self,
        node: &Destination,
        interval: Option<Duration>,
    ) -> EpnResult<Option<Arc<dyn RetryChannel<E>>>>;

    /// 报告永久失败的事件；每个耗尽重试的批次恰好调用一次
    async fn event_processing_failed(
        &self,
        node: &Destination,
        events: EventList<E>,
    ) -> EpnResult<()>;
}
