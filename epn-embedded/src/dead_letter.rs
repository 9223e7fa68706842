//! 死信接收器（DeadLetterSink）
//!
//! 两类终态失败：
//! - 节点重试耗尽的事件（`events_failed`，即 `EpnContext::event_processing_failed`）；
//! - 传输层重投达到上限仍无法分发的信封（`envelope_undeliverable`）。
//!
use crate::envelope::BatchEnvelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use epn_core::{Destination, EpnResult, Event, EventList};
use tokio::sync::Mutex;
use tracing::error;

#[async_trait]
pub trait DeadLetterSink<E: Event>: Send + Sync {
    async fn events_failed(&self, node: &Destination, events: EventList<E>) -> EpnResult<()>;

    async fn envelope_undeliverable(&self, envelope: BatchEnvelope<E>, reason: String);
}

/// 仅记录日志的死信接收器（默认）
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeadLetterSink;

#[async_trait]
impl<E: Event> DeadLetterSink<E> for LoggingDeadLetterSink {
    async fn events_failed(&self, node: &Destination, events: EventList<E>) -> EpnResult<()> {
        error!(
            node = %node,
            events = ?events,
            "Events failed permanently"
        );
        Ok(())
    }

    async fn envelope_undeliverable(&self, envelope: BatchEnvelope<E>, reason: String) {
        error!(
            message_id = %envelope.message_id(),
            network = %envelope.network(),
            node = envelope.node().unwrap_or("<root>"),
            attempts = envelope.delivery_attempt(),
            reason = %reason,
            "Batch undeliverable"
        );
    }
}

/// 死信记录
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetter<E> {
    /// 节点重试耗尽
    Exhausted {
        node: Destination,
        events: EventList<E>,
        at: DateTime<Utc>,
    },
    /// 传输层重投耗尽
    Undeliverable {
        envelope: BatchEnvelope<E>,
        reason: String,
        at: DateTime<Utc>,
    },
}

/// 保存在内存中、可供检查的死信接收器
pub struct InMemoryDeadLetterSink<E> {
    entries: Mutex<Vec<DeadLetter<E>>>,
}

impl<E> Default for InMemoryDeadLetterSink<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Event> InMemoryDeadLetterSink<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DeadLetter<E>> {
        self.entries.lock().await.clone()
    }

    /// 所有重试耗尽的事件，按上报顺序
    pub async fn failed_events(&self) -> Vec<E> {
        self.entries
            .lock()
            .await
            .iter()
            .filter_map(|entry| match entry {
                DeadLetter::Exhausted { events, .. } => Some(events.iter().cloned()),
                DeadLetter::Undeliverable { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub async fn undeliverable(&self) -> Vec<BatchEnvelope<E>> {
        self.entries
            .lock()
            .await
            .iter()
            .filter_map(|entry| match entry {
                DeadLetter::Undeliverable { envelope, .. } => Some(envelope.clone()),
                DeadLetter::Exhausted { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl<E: Event> DeadLetterSink<E> for InMemoryDeadLetterSink<E> {
    async fn events_failed(&self, node: &Destination, events: EventList<E>) -> EpnResult<()> {
        self.entries.lock().await.push(DeadLetter::Exhausted {
            node: node.clone(),
            events,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn envelope_undeliverable(&self, envelope: BatchEnvelope<E>, reason: String) {
        self.entries.lock().await.push(DeadLetter::Undeliverable {
            envelope,
            reason,
            at: Utc::now(),
        });
    }
}
