//! 批次信封与进程内队列
//!
//! 信封携带传输边界要求的全部信息：目标网络、目标节点（缺省为根节点）、
//! 来源节点（根批次为空）、事件批次与剩余重试次数（缺省为节点的 `max_retries`），
//! 以及用于传输层重投计数的投递次数。
//!
use crate::dead_letter::DeadLetterSink;
use chrono::{DateTime, Utc};
use epn_core::{Destination, EpnError, EpnResult, Event, EventList};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope<E> {
    message_id: Uuid,
    enqueued_at: DateTime<Utc>,
    network: String,
    node: Option<String>,
    source: Option<String>,
    events: EventList<E>,
    retries_left: Option<u32>,
    delivery_attempt: u32,
}

impl<E> BatchEnvelope<E> {
    fn new(
        network: String,
        node: Option<String>,
        source: Option<String>,
        events: EventList<E>,
        retries_left: Option<u32>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            network,
            node,
            source,
            events,
            retries_left,
            delivery_attempt: 0,
        }
    }

    /// 提交给网络根节点的新批次
    pub fn root(network: impl Into<String>, events: EventList<E>) -> Self {
        Self::new(network.into(), None, None, events, None)
    }

    /// 上游节点转发给下游目标的批次
    pub fn to_node(destination: &Destination, source: &str, events: EventList<E>) -> Self {
        Self::new(
            destination.network().to_string(),
            Some(destination.node().to_string()),
            Some(source.to_string()),
            events,
            None,
        )
    }

    /// 重新提交给同一节点的重试批次，保留原批次的来源
    pub fn retry(
        node: &Destination,
        source: Option<&str>,
        events: EventList<E>,
        retries_left: u32,
    ) -> Self {
        Self::new(
            node.network().to_string(),
            Some(node.node().to_string()),
            source.map(str::to_string),
            events,
            Some(retries_left),
        )
    }

    /// 传输层重投：保留消息标识与剩余重试次数，投递次数加一
    pub fn redelivered(mut self) -> Self {
        self.delivery_attempt += 1;
        self.enqueued_at = Utc::now();
        self
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn events(&self) -> &EventList<E> {
        &self.events
    }

    pub fn retries_left(&self) -> Option<u32> {
        self.retries_left
    }

    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }
}

/// 进程内批次队列（发送端）
///
/// 设置了死信接收器时，延迟到期但队列已关闭的信封交给接收器，否则只记录日志。
pub struct BatchQueue<E: Event> {
    tx: mpsc::UnboundedSender<BatchEnvelope<E>>,
    dead_letters: Option<Arc<dyn DeadLetterSink<E>>>,
}

impl<E: Event> Clone for BatchQueue<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dead_letters: self.dead_letters.clone(),
        }
    }
}

impl<E: Event> BatchQueue<E> {
    pub fn unbounded() -> (Self, mpsc::UnboundedReceiver<BatchEnvelope<E>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                dead_letters: None,
            },
            rx,
        )
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink<E>>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 投递信封；带延迟时在独立任务中等待后入队
    pub fn submit(&self, envelope: BatchEnvelope<E>, delay: Option<Duration>) -> EpnResult<()> {
        if self.tx.is_closed() {
            return Err(EpnError::transport("batch queue is closed"));
        }

        match delay.filter(|delay| !delay.is_zero()) {
            None => self
                .tx
                .send(envelope)
                .map_err(|_| EpnError::transport("batch queue is closed")),
            Some(delay) => {
                let tx = self.tx.clone();
                let dead_letters = self.dead_letters.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Err(mpsc::error::SendError(envelope)) = tx.send(envelope) else {
                        return;
                    };
                    match dead_letters {
                        Some(sink) => {
                            sink.envelope_undeliverable(
                                envelope,
                                "batch queue closed before delayed delivery".to_string(),
                            )
                            .await;
                        }
                        None => warn!(
                            message_id = %envelope.message_id(),
                            network = %envelope.network(),
                            "Dropped delayed batch, queue closed"
                        ),
                    }
                });
                Ok(())
            }
        }
    }
}
