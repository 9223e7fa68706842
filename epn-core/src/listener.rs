//! 节点监听器（NodeListener）
//!
use crate::event_list::{Event, EventList};
use async_trait::async_trait;

/// 观察节点批次处理结果
///
/// 每次分发结束后调用：
/// - `events_processed`：批次中未进入重试的事件（已转发、已消费或被过滤）；
/// - `events_filtered`：被谓词拒绝的事件，仅在非空时调用。
#[async_trait]
pub trait NodeListener<E: Event>: Send + Sync {
    async fn events_processed(&self, events: &EventList<E>);

    async fn events_filtered(&self, _events: &EventList<E>) {}
}
