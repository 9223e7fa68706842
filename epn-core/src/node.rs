//! 处理节点（Node）
//!
//! 网络中的一个处理阶段：持有事件处理器、可选谓词、重试预算，
//! 以及初始化时解析出的下游通道与重试通道。
//!
//! 单批次处理流程（`Node::process`）：
//! - 按原顺序对每个事件应用谓词，被拒绝的事件静默丢弃；
//! - 通过谓词的事件交给处理器：结果按序收集，失败的原始事件进入重试列表；
//! - 结果非空时广播到每个通道（按配置顺序，每个通道收到完整结果）；
//! - 重试列表非空时，有剩余次数且配置了重试通道则以 `retries_left - 1` 连同原来源重新提交，否则报告死信。
//!
//! 初始化后的状态只读，同一节点可被不同批次并发调用而无需加锁。
//!
use crate::{
    channel::{Channel, RetryChannel},
    context::EpnContext,
    destination::Destination,
    error::{EpnError, EpnResult},
    event_list::{Event, EventList},
    predicate::Predicate,
    processor::EventProcessor,
};
use bon::Builder;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, trace, warn};

/// 节点默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Builder)]
pub struct Node<E: Event> {
    /// 节点名，在所属网络内唯一
    #[builder(into)]
    name: String,
    /// 根批次的初始剩余重试次数
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    /// 重试间隔提示；`None` 使用传输层默认值
    retry_interval: Option<Duration>,
    /// 下游目标，按配置顺序广播
    #[builder(default)]
    destinations: Vec<Destination>,
    event_processor: Option<Arc<dyn EventProcessor<E>>>,
    predicate: Option<Arc<dyn Predicate<E>>>,

    // 以下为运行时状态，仅在 init 时写入
    #[builder(skip)]
    channels: Vec<Arc<dyn Channel<E>>>,
    #[builder(skip)]
    retry_channel: Option<Arc<dyn RetryChannel<E>>>,
    #[builder(skip)]
    address: Option<Destination>,
    #[builder(skip)]
    active: AtomicBool,
}

/// 单批次处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<E> {
    retries: EventList<E>,
    filtered: EventList<E>,
    forwarded: usize,
}

impl<E> BatchOutcome<E> {
    /// 处理失败、已交给重试通道或死信的原始事件
    pub fn retries(&self) -> &EventList<E> {
        &self.retries
    }

    /// 被谓词拒绝的事件
    pub fn filtered(&self) -> &EventList<E> {
        &self.filtered
    }

    /// 广播到下游的结果数量
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }
}

impl<E: Event> Node<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn event_processor(&self) -> Option<&Arc<dyn EventProcessor<E>>> {
        self.event_processor.as_ref()
    }

    pub fn predicate(&self) -> Option<&Arc<dyn Predicate<E>>> {
        self.predicate.as_ref()
    }

    /// 节点地址（所属网络 + 节点名），初始化后可用
    pub fn address(&self) -> Option<&Destination> {
        self.address.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 初始化节点：解析通道与重试通道，依次初始化谓词与处理器
    ///
    /// 任一步失败时释放已获取的资源并返回错误，节点保持未激活。
    pub(crate) async fn init(&mut self, network: &str, ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        let Some(processor) = self.event_processor.clone() else {
            return Err(EpnError::MissingEventProcessor {
                node: self.name.clone(),
            });
        };

        let address = Destination::new(network, self.name.clone());
        let mut acquired = Acquired::new();

        if let Err(err) = self.acquire(&address, ctx, &processor, &mut acquired).await {
            let failures = acquired.release(self.predicate.as_deref(), ctx).await;
            if !failures.is_empty() {
                warn!(
                    node = %address,
                    failures = ?failures,
                    "Failed to release node resources after init failure"
                );
            }
            return Err(err);
        }

        self.channels = acquired.channels;
        self.retry_channel = acquired.retry_channel;
        self.address = Some(address);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    async fn acquire(
        &self,
        address: &Destination,
        ctx: &dyn EpnContext<E>,
        processor: &Arc<dyn EventProcessor<E>>,
        acquired: &mut Acquired<E>,
    ) -> EpnResult<()> {
        for destination in &self.destinations {
            let channel =
                ctx.channel(destination)
                    .await
                    .map_err(|err| EpnError::ChannelResolution {
                        destination: destination.to_string(),
                        reason: err.to_string(),
                    })?;
            acquired.channels.push(channel);
        }

        acquired.retry_channel = ctx.retry_channel(address, self.retry_interval).await?;

        if let Some(predicate) = &self.predicate {
            predicate.init(ctx).await?;
            acquired.predicate_ready = true;
        }

        processor.init(ctx).await
    }

    /// 关闭节点：处理器、谓词、重试通道、通道，逆序尽力释放并汇总失败
    ///
    /// 未激活的节点直接返回成功。
    pub(crate) async fn close(&self, ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();
        if let Some(processor) = &self.event_processor
            && let Err(err) = processor.close(ctx).await
        {
            failures.push(format!("event processor: {err}"));
        }
        if let Some(predicate) = &self.predicate
            && let Err(err) = predicate.close(ctx).await
        {
            failures.push(format!("predicate: {err}"));
        }
        failures.extend(release_transport(self.retry_channel.as_ref(), &self.channels).await);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EpnError::Close {
                component: format!("node {}", self.name),
                failures,
            })
        }
    }

    /// 处理一个批次
    ///
    /// 单个事件的处理失败不会越过节点边界；只有通道、重试通道或死信上报的失败以错误返回，
    /// 由调用方所在的传输单元整体回滚。
    pub async fn process(
        &self,
        ctx: &dyn EpnContext<E>,
        source: Option<&str>,
        events: &EventList<E>,
        retries_left: u32,
    ) -> EpnResult<BatchOutcome<E>> {
        let (Some(processor), Some(address)) = (self.event_processor.as_deref(), self.address())
        else {
            return Err(EpnError::NodeNotActive {
                node: self.name.clone(),
            });
        };
        if !self.is_active() {
            return Err(EpnError::NodeNotActive {
                node: self.name.clone(),
            });
        }

        trace!(
            node = %address,
            source = source.unwrap_or("<root>"),
            batch.size = events.len(),
            retries_left,
            "Processing batch"
        );

        let mut results = EventList::with_capacity(events.len());
        let mut retries = EventList::new();
        let mut filtered = EventList::new();

        for event in events {
            if let Some(predicate) = &self.predicate
                && !predicate.apply(event).await
            {
                filtered.push(event.clone());
                continue;
            }

            match processor.process(source, event, retries_left).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => {
                    debug!(
                        node = %address,
                        retries_left,
                        error = %err,
                        "Event processing failed, scheduling retry"
                    );
                    retries.push(event.clone());
                }
            }
        }

        if !results.is_empty() {
            for channel in &self.channels {
                channel.send(&self.name, &results).await?;
            }
        }

        if !retries.is_empty() {
            match &self.retry_channel {
                Some(retry_channel) if retries_left > 0 => {
                    retry_channel
                        .send(source, &retries, retries_left - 1)
                        .await?;
                }
                _ => {
                    warn!(
                        node = %address,
                        events = retries.len(),
                        "Retries exhausted, reporting events as failed"
                    );
                    ctx.event_processing_failed(address, retries.clone())
                        .await?;
                }
            }
        }

        Ok(BatchOutcome {
            retries,
            filtered,
            forwarded: results.len(),
        })
    }
}

/// 初始化过程中已获取的资源，失败时据此回滚
struct Acquired<E: Event> {
    channels: Vec<Arc<dyn Channel<E>>>,
    retry_channel: Option<Arc<dyn RetryChannel<E>>>,
    predicate_ready: bool,
}

impl<E: Event> Acquired<E> {
    fn new() -> Self {
        Self {
            channels: Vec::new(),
            retry_channel: None,
            predicate_ready: false,
        }
    }

    async fn release(
        self,
        predicate: Option<&dyn Predicate<E>>,
        ctx: &dyn EpnContext<E>,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        if self.predicate_ready
            && let Some(predicate) = predicate
            && let Err(err) = predicate.close(ctx).await
        {
            failures.push(format!("predicate: {err}"));
        }
        failures.extend(release_transport(self.retry_channel.as_ref(), &self.channels).await);
        failures
    }
}

async fn release_transport<E: Event>(
    retry_channel: Option<&Arc<dyn RetryChannel<E>>>,
    channels: &[Arc<dyn Channel<E>>],
) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(retry_channel) = retry_channel
        && let Err(err) = retry_channel.close().await
    {
        failures.push(format!("retry channel: {err}"));
    }
    for channel in channels {
        if let Err(err) = channel.close().await {
            failures.push(format!("channel: {err}"));
        }
    }
    failures
}
