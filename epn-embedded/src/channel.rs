//! 基于批次队列的通道实现
//!
use crate::envelope::{BatchEnvelope, BatchQueue};
use async_trait::async_trait;
use epn_core::{Channel, Destination, EpnError, EpnResult, Event, EventList, RetryChannel};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// 把结果批次投递到下游节点；剩余重试次数由接收节点的 `max_retries` 决定
pub struct QueueChannel<E: Event> {
    destination: Destination,
    queue: BatchQueue<E>,
    closed: AtomicBool,
}

impl<E: Event> QueueChannel<E> {
    pub fn new(destination: Destination, queue: BatchQueue<E>) -> Self {
        Self {
            destination,
            queue,
            closed: AtomicBool::new(false),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    fn failure(&self, reason: impl ToString) -> EpnError {
        EpnError::Channel {
            destination: self.destination.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl<E: Event> Channel<E> for QueueChannel<E> {
    async fn send(&self, source: &str, events: &EventList<E>) -> EpnResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.failure("channel is closed"));
        }
        let envelope = BatchEnvelope::to_node(&self.destination, source, events.clone());
        self.queue
            .submit(envelope, None)
            .map_err(|err| self.failure(err))
    }

    async fn close(&self) -> EpnResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// 把失败事件重新投递给同一节点，按重试间隔延迟
pub struct QueueRetryChannel<E: Event> {
    node: Destination,
    queue: BatchQueue<E>,
    interval: Option<Duration>,
    closed: AtomicBool,
}

impl<E: Event> QueueRetryChannel<E> {
    pub fn new(node: Destination, queue: BatchQueue<E>, interval: Option<Duration>) -> Self {
        Self {
            node,
            queue,
            interval,
            closed: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    fn failure(&self, reason: impl ToString) -> EpnError {
        EpnError::RetryChannel {
            node: self.node.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl<E: Event> RetryChannel<E> for QueueRetryChannel<E> {
    async fn send(
        &self,
        source: Option<&str>,
        events: &EventList<E>,
        retries_remaining: u32,
    ) -> EpnResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.failure("retry channel is closed"));
        }
        let envelope = BatchEnvelope::retry(&self.node, source, events.clone(), retries_remaining);
        self.queue
            .submit(envelope, self.interval)
            .map_err(|err| self.failure(err))
    }

    async fn close(&self) -> EpnResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
