//! 进程内运行时上下文
//!
use crate::{
    channel::{QueueChannel, QueueRetryChannel},
    dead_letter::DeadLetterSink,
    envelope::BatchQueue,
};
use async_trait::async_trait;
use epn_core::{
    Channel, Destination, EpnContext, EpnError, EpnResult, Event, EventList, RetryChannel,
};
use std::{sync::Arc, time::Duration};

pub struct EmbeddedContext<E: Event> {
    queue: BatchQueue<E>,
    dead_letters: Arc<dyn DeadLetterSink<E>>,
    default_retry_interval: Option<Duration>,
}

impl<E: Event> EmbeddedContext<E> {
    pub fn new(
        queue: BatchQueue<E>,
        dead_letters: Arc<dyn DeadLetterSink<E>>,
        default_retry_interval: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            default_retry_interval,
        }
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterSink<E>> {
        &self.dead_letters
    }
}

#[async_trait]
impl<E: Event> EpnContext<E> for EmbeddedContext<E> {
    async fn channel(&self, destination: &Destination) -> EpnResult<Arc<dyn Channel<E>>> {
        if self.queue.is_closed() {
            return Err(EpnError::transport("batch queue is closed"));
        }
        Ok(Arc::new(QueueChannel::new(
            destination.clone(),
            self.queue.clone(),
        )))
    }

    async fn retry_channel(
        &self,
        node: &Destination,
        interval: Option<Duration>,
    ) -> EpnResult<Option<Arc<dyn RetryChannel<E>>>> {
        Ok(Some(Arc::new(QueueRetryChannel::new(
            node.clone(),
            self.queue.clone(),
            interval.or(self.default_retry_interval),
        ))))
    }

    async fn event_processing_failed(
        &self,
        node: &Destination,
        events: EventList<E>,
    ) -> EpnResult<()> {
        self.dead_letters.events_failed(node, events).await
    }
}
