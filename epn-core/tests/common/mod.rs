#![allow(dead_code)]

use async_trait::async_trait;
use epn_core::{
    Channel, Destination, EpnContext, EpnError, EpnResult, EventList, EventProcessor, Network,
    Node, NodeListener, Predicate, RetryChannel,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn events(items: &[&str]) -> EventList<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

// ---------------------------------------------------------------------------
// 传输替身
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingChannel {
    pub sent: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel<String> for RecordingChannel {
    async fn send(&self, source: &str, events: &EventList<String>) -> EpnResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((source.to_string(), events.clone().into_vec()));
        Ok(())
    }

    async fn close(&self) -> EpnResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FailingChannel;

#[async_trait]
impl Channel<String> for FailingChannel {
    async fn send(&self, _source: &str, _events: &EventList<String>) -> EpnResult<()> {
        Err(EpnError::Channel {
            destination: "broken".into(),
            reason: "connection refused".into(),
        })
    }
}

#[derive(Clone, Default)]
pub struct RecordingRetryChannel {
    pub sent: Arc<Mutex<Vec<(Vec<String>, u32)>>>,
    pub sources: Arc<Mutex<Vec<Option<String>>>>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl RetryChannel<String> for RecordingRetryChannel {
    async fn send(
        &self,
        source: Option<&str>,
        events: &EventList<String>,
        retries_remaining: u32,
    ) -> EpnResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((events.clone().into_vec(), retries_remaining));
        self.sources
            .lock()
            .unwrap()
            .push(source.map(str::to_string));
        Ok(())
    }

    async fn close(&self) -> EpnResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 记录通道解析、重试与死信的上下文
#[derive(Default)]
pub struct SpyContext {
    channels: Mutex<HashMap<Destination, RecordingChannel>>,
    retry: Option<RecordingRetryChannel>,
    broken: Option<Destination>,
    unresolvable: Option<Destination>,
    pub retry_requests: Mutex<Vec<(Destination, Option<Duration>)>>,
    pub failed: Mutex<Vec<(Destination, Vec<String>)>>,
}

impl SpyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry() -> Self {
        Self {
            retry: Some(RecordingRetryChannel::default()),
            ..Self::default()
        }
    }

    /// 对该目标返回一个发送必然失败的通道
    pub fn with_broken(mut self, destination: Destination) -> Self {
        self.broken = Some(destination);
        self
    }

    /// 对该目标的通道解析失败
    pub fn with_unresolvable(mut self, destination: Destination) -> Self {
        self.unresolvable = Some(destination);
        self
    }

    pub fn channel_for(&self, destination: &Destination) -> RecordingChannel {
        self.channels
            .lock()
            .unwrap()
            .entry(destination.clone())
            .or_default()
            .clone()
    }

    pub fn sent_to(&self, network: &str, node: &str) -> Vec<(String, Vec<String>)> {
        self.channel_for(&Destination::new(network, node))
            .sent
            .lock()
            .unwrap()
            .clone()
    }

    pub fn retries(&self) -> Vec<(Vec<String>, u32)> {
        self.retry
            .as_ref()
            .map(|retry| retry.sent.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn retry_sources(&self) -> Vec<Option<String>> {
        self.retry
            .as_ref()
            .map(|retry| retry.sources.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn retry_closed(&self) -> bool {
        self.retry
            .as_ref()
            .is_some_and(|retry| retry.closed.load(Ordering::SeqCst))
    }

    pub fn failed(&self) -> Vec<(Destination, Vec<String>)> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl EpnContext<String> for SpyContext {
    async fn channel(&self, destination: &Destination) -> EpnResult<Arc<dyn Channel<String>>> {
        if self.unresolvable.as_ref() == Some(destination) {
            return Err(EpnError::transport(format!("no route to {destination}")));
        }
        if self.broken.as_ref() == Some(destination) {
            return Ok(Arc::new(FailingChannel));
        }
        Ok(Arc::new(self.channel_for(destination)))
    }

    async fn retry_channel(
        &self,
        node: &Destination,
        interval: Option<Duration>,
    ) -> EpnResult<Option<Arc<dyn RetryChannel<String>>>> {
        self.retry_requests
            .lock()
            .unwrap()
            .push((node.clone(), interval));
        Ok(self
            .retry
            .clone()
            .map(|retry| Arc::new(retry) as Arc<dyn RetryChannel<String>>))
    }

    async fn event_processing_failed(
        &self,
        node: &Destination,
        events: EventList<String>,
    ) -> EpnResult<()> {
        self.failed
            .lock()
            .unwrap()
            .push((node.clone(), events.into_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 处理器与谓词替身
// ---------------------------------------------------------------------------

type ProcessFn = Box<dyn Fn(&str, u32) -> anyhow::Result<Option<String>> + Send + Sync>;

/// 以闭包实现的处理器，记录每次调用与生命周期
pub struct FnProcessor {
    f: ProcessFn,
    fail_init: bool,
    fail_close: bool,
    pub seen: Mutex<Vec<(String, u32)>>,
    pub inits: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FnProcessor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, u32) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            f: Box::new(f),
            fail_init: false,
            fail_close: false,
            seen: Mutex::new(Vec::new()),
            inits: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(|event, _| Ok(Some(event.to_string())))
    }

    /// 对列出的事件处理失败，其余事件原样转发
    pub fn failing_on(failing: &[&str]) -> Self {
        let failing = strings(failing);
        Self::new(move |event, _| {
            if failing.iter().any(|f| f == event) {
                anyhow::bail!("cannot process {event}")
            }
            Ok(Some(event.to_string()))
        })
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn seen(&self) -> Vec<(String, u32)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_events(&self) -> Vec<String> {
        self.seen().into_iter().map(|(event, _)| event).collect()
    }
}

#[async_trait]
impl EventProcessor<String> for FnProcessor {
    async fn init(&self, _ctx: &dyn EpnContext<String>) -> EpnResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(EpnError::lifecycle("processor", "init refused"));
        }
        Ok(())
    }

    async fn process(
        &self,
        _source: Option<&str>,
        event: &String,
        retries_left: u32,
    ) -> anyhow::Result<Option<String>> {
        self.seen
            .lock()
            .unwrap()
            .push((event.clone(), retries_left));
        (self.f)(event, retries_left)
    }

    async fn close(&self, _ctx: &dyn EpnContext<String>) -> EpnResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(EpnError::lifecycle("processor", "close refused"));
        }
        Ok(())
    }
}

/// 拒绝空字符串的谓词，记录生命周期
#[derive(Default)]
pub struct NonEmpty {
    pub inits: AtomicUsize,
    pub closes: AtomicUsize,
    pub applied: AtomicUsize,
}

#[async_trait]
impl Predicate<String> for NonEmpty {
    async fn init(&self, _ctx: &dyn EpnContext<String>) -> EpnResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply(&self, event: &String) -> bool {
        self.applied.fetch_add(1, Ordering::SeqCst);
        !event.is_empty()
    }

    async fn close(&self, _ctx: &dyn EpnContext<String>) -> EpnResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub processed: Mutex<Vec<Vec<String>>>,
    pub filtered: Mutex<Vec<Vec<String>>>,
}

impl RecordingListener {
    pub fn processed(&self) -> Vec<Vec<String>> {
        self.processed.lock().unwrap().clone()
    }

    pub fn filtered(&self) -> Vec<Vec<String>> {
        self.filtered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeListener<String> for RecordingListener {
    async fn events_processed(&self, events: &EventList<String>) {
        self.processed
            .lock()
            .unwrap()
            .push(events.clone().into_vec());
    }

    async fn events_filtered(&self, events: &EventList<String>) {
        self.filtered
            .lock()
            .unwrap()
            .push(events.clone().into_vec());
    }
}

// ---------------------------------------------------------------------------
// 拓扑辅助
// ---------------------------------------------------------------------------

pub fn as_processor(processor: &Arc<FnProcessor>) -> Arc<dyn EventProcessor<String>> {
    processor.clone()
}

pub fn as_predicate(predicate: &Arc<NonEmpty>) -> Arc<dyn Predicate<String>> {
    predicate.clone()
}

pub fn node(
    name: &str,
    max_retries: u32,
    processor: &Arc<FnProcessor>,
    destinations: Vec<Destination>,
) -> Node<String> {
    Node::builder()
        .name(name)
        .max_retries(max_retries)
        .destinations(destinations)
        .event_processor(as_processor(processor))
        .build()
}

pub fn network(name: &str, root: &str, nodes: Vec<Node<String>>) -> Network<String> {
    Network::builder()
        .name(name)
        .root_node_name(root)
        .nodes(nodes)
        .build()
}
