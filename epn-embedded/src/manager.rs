//! 进程内网络管理器（EmbeddedEpnManager）
//!
//! 长驻任务从批次队列取出信封，按 `worker_concurrency` 并发分发：
//! - 信封未指定节点时投递给根节点，未指定剩余重试次数时取节点的 `max_retries`；
//! - 分发失败（通道发送失败、死信上报失败等）时整批重投，投递次数加一；
//! - 投递次数达到 `max_redeliveries` 后交给死信接收器，不再重投；
//! - 目标网络/节点不存在或已关闭等重投无法改变的错误直接交给死信接收器。
//!
//! 关闭后不再从队列取新信封，正在处理的批次会完整跑完；
//! 队列中剩余的信封以及关闭后才到期的延迟重试都交给死信接收器。
//!
use crate::{
    config::EmbeddedConfig,
    context::EmbeddedContext,
    dead_letter::{DeadLetterSink, LoggingDeadLetterSink},
    envelope::{BatchEnvelope, BatchQueue},
};
use async_trait::async_trait;
use bon::bon;
use epn_core::{
    BatchOutcome, EpnError, EpnManager, EpnResult, Event, EventList, NetworkRegistry,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct EmbeddedEpnManager<E: Event> {
    registry: NetworkRegistry<E>,
    queue: BatchQueue<E>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BatchEnvelope<E>>>>,
    dead_letters: Arc<dyn DeadLetterSink<E>>,
    config: EmbeddedConfig,
}

#[bon]
impl<E: Event> EmbeddedEpnManager<E> {
    /// 未指定死信接收器时仅记录日志
    #[builder]
    pub fn new(
        #[builder(default)] config: EmbeddedConfig,
        dead_letter_sink: Option<Arc<dyn DeadLetterSink<E>>>,
    ) -> Self {
        let dead_letters = dead_letter_sink
            .unwrap_or_else(|| Arc::new(LoggingDeadLetterSink) as Arc<dyn DeadLetterSink<E>>);
        let (queue, receiver) = BatchQueue::unbounded();
        let queue = queue.with_dead_letters(dead_letters.clone());
        let context = Arc::new(EmbeddedContext::new(
            queue.clone(),
            dead_letters.clone(),
            config.default_retry_interval(),
        ));

        Self {
            registry: NetworkRegistry::new(context),
            queue,
            receiver: Mutex::new(Some(receiver)),
            dead_letters,
            config,
        }
    }
}

impl<E: Event> EmbeddedEpnManager<E> {
    pub fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    /// 启动分发任务，返回可用于关闭/等待的句柄；只能启动一次
    pub fn start(self: &Arc<Self>) -> EpnResult<ManagerHandle> {
        let receiver = self
            .receiver
            .try_lock()
            .map_err(|_| EpnError::transport("manager is already starting"))?
            .take()
            .ok_or_else(|| EpnError::transport("manager already started"))?;

        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run(self.clone(), receiver, token.clone()));
        info!(
            concurrency = self.config.worker_concurrency,
            max_redeliveries = self.config.max_redeliveries,
            "Embedded EPN manager started"
        );

        Ok(ManagerHandle {
            token,
            task: Some(task),
        })
    }

    async fn run(
        self: Arc<Self>,
        receiver: mpsc::UnboundedReceiver<BatchEnvelope<E>>,
        token: CancellationToken,
    ) {
        let concurrency = self.config.worker_concurrency.max(1);
        let mut stream = UnboundedReceiverStream::new(receiver);

        (&mut stream)
            .take_until(token.cancelled_owned())
            .for_each_concurrent(Some(concurrency), |envelope| {
                let manager = self.clone();
                async move { manager.deliver(envelope).await }
            })
            .await;

        // 关闭队列后，尚未分发的信封交给死信接收器
        let mut receiver = stream.into_inner();
        receiver.close();
        let mut stranded = 0usize;
        while let Some(envelope) = receiver.recv().await {
            stranded += 1;
            self.dead_letters
                .envelope_undeliverable(envelope, "manager shut down".to_string())
                .await;
        }

        info!(stranded, "Embedded EPN manager stopped");
    }

    async fn deliver(&self, envelope: BatchEnvelope<E>) {
        match self.dispatch(&envelope).await {
            Ok(outcome) => {
                trace!(
                    message_id = %envelope.message_id(),
                    network = %envelope.network(),
                    forwarded = outcome.forwarded(),
                    retried = outcome.retries().len(),
                    filtered = outcome.filtered().len(),
                    "Batch delivered"
                );
            }
            Err(err) => self.redeliver(envelope, err).await,
        }
    }

    async fn dispatch(&self, envelope: &BatchEnvelope<E>) -> EpnResult<BatchOutcome<E>> {
        let node = match envelope.node() {
            Some(node) => self.registry.node(envelope.network(), node).await?,
            None => self.registry.root(envelope.network()).await?,
        };
        let retries_left = envelope
            .retries_left()
            .unwrap_or_else(|| node.max_retries());

        self.registry
            .process_node(&node, envelope.source(), envelope.events(), retries_left)
            .await
    }

    async fn redeliver(&self, envelope: BatchEnvelope<E>, err: EpnError) {
        if !err.is_retryable() {
            warn!(
                message_id = %envelope.message_id(),
                network = %envelope.network(),
                node = envelope.node().unwrap_or("<root>"),
                error = %err,
                "Batch cannot be dispatched, dead-lettering without redelivery"
            );
            self.dead_letters
                .envelope_undeliverable(envelope, err.to_string())
                .await;
            return;
        }

        if envelope.delivery_attempt() >= self.config.max_redeliveries {
            warn!(
                message_id = %envelope.message_id(),
                network = %envelope.network(),
                attempts = envelope.delivery_attempt(),
                error = %err,
                "Redelivery limit reached, dead-lettering batch"
            );
            self.dead_letters
                .envelope_undeliverable(envelope, err.to_string())
                .await;
            return;
        }

        debug!(
            message_id = %envelope.message_id(),
            network = %envelope.network(),
            attempt = envelope.delivery_attempt() + 1,
            error = %err,
            "Dispatch failed, redelivering batch"
        );
        let next = envelope.clone().redelivered();
        if let Err(submit_err) = self.queue.submit(next, self.config.redelivery_delay()) {
            self.dead_letters
                .envelope_undeliverable(envelope, submit_err.to_string())
                .await;
        }
    }
}

#[async_trait]
impl<E: Event> EpnManager<E> for EmbeddedEpnManager<E> {
    fn registry(&self) -> &NetworkRegistry<E> {
        &self.registry
    }

    async fn enqueue(&self, network: &str, events: EventList<E>) -> EpnResult<()> {
        self.registry.network(network).await?;
        self.queue.submit(BatchEnvelope::root(network, events), None)
    }
}

/// 管理器运行句柄：用于优雅关闭与等待分发任务结束
pub struct ManagerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ManagerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ManagerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
