use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use epn_core::config::{ComponentRegistry, NetworkDescriptor};
use epn_core::{EpnManager, EpnResult, EventList, EventProcessor, NodeListener, Predicate};
use epn_embedded::{EmbeddedConfig, EmbeddedEpnManager, InMemoryDeadLetterSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const TOPOLOGY: &str = include_str!("../topology.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Direction {
    Request,
    Response,
}

/// 一次服务交互中的单条消息活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Activity {
    id: Uuid,
    timestamp: DateTime<Utc>,
    service_type: Option<String>,
    operation: String,
    direction: Direction,
    correlation: String,
    fault: Option<String>,
    content: String,
}

impl Activity {
    fn request(service_type: &str, operation: &str, correlation: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: at,
            service_type: Some(service_type.to_string()),
            operation: operation.to_string(),
            direction: Direction::Request,
            correlation: correlation.to_string(),
            fault: None,
            content: format!("<{operation}/>"),
        }
    }

    fn response(request: &Activity, after_ms: i64, fault: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: request.timestamp + ChronoDuration::milliseconds(after_ms),
            direction: Direction::Response,
            fault: fault.map(str::to_string),
            content: format!("<{}Response/>", request.operation),
            ..request.clone()
        }
    }
}

/// 服务调用统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ServiceSummary {
    service_type: String,
    invocations: u64,
    faults: u64,
    total_duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum MonitorEvent {
    Activity(Activity),
    Correlated {
        service_type: String,
        operation: String,
        fault: Option<String>,
        duration_ms: i64,
    },
    Summary(ServiceSummary),
}

// ---------------------------------------------------------------------------
// 处理节点
// ---------------------------------------------------------------------------

/// 规范化服务类型
struct Ingest;

#[async_trait]
impl EventProcessor<MonitorEvent> for Ingest {
    async fn process(
        &self,
        _source: Option<&str>,
        event: &MonitorEvent,
        _retries_left: u32,
    ) -> anyhow::Result<Option<MonitorEvent>> {
        let MonitorEvent::Activity(activity) = event else {
            return Ok(None);
        };
        let mut activity = activity.clone();
        activity.service_type = activity
            .service_type
            .map(|service| service.trim().to_lowercase());
        Ok(Some(MonitorEvent::Activity(activity)))
    }
}

struct HasServiceType;

#[async_trait]
impl Predicate<MonitorEvent> for HasServiceType {
    async fn apply(&self, event: &MonitorEvent) -> bool {
        match event {
            MonitorEvent::Activity(activity) => activity
                .service_type
                .as_deref()
                .is_some_and(|service| !service.trim().is_empty()),
            _ => true,
        }
    }
}

/// 按关联标识配对请求与响应
///
/// 响应可能先于请求到达（批次之间无顺序保证），此时响应重试，
/// 重试耗尽仍未配对的响应进入死信。
#[derive(Default)]
struct Correlate {
    pending: DashMap<String, Activity>,
}

#[async_trait]
impl EventProcessor<MonitorEvent> for Correlate {
    async fn process(
        &self,
        _source: Option<&str>,
        event: &MonitorEvent,
        retries_left: u32,
    ) -> anyhow::Result<Option<MonitorEvent>> {
        let MonitorEvent::Activity(activity) = event else {
            return Ok(None);
        };

        match activity.direction {
            Direction::Request => {
                self.pending
                    .insert(activity.correlation.clone(), activity.clone());
                Ok(None)
            }
            Direction::Response => {
                let Some((_, request)) = self.pending.remove(&activity.correlation) else {
                    anyhow::bail!(
                        "no request for correlation {} yet ({retries_left} retries left)",
                        activity.correlation
                    );
                };
                Ok(Some(MonitorEvent::Correlated {
                    service_type: request.service_type.unwrap_or_default(),
                    operation: request.operation,
                    fault: activity.fault.clone(),
                    duration_ms: (activity.timestamp - request.timestamp).num_milliseconds(),
                }))
            }
        }
    }
}

/// 按服务累计调用次数、故障次数与耗时
#[derive(Default)]
struct Aggregate {
    counters: DashMap<String, ServiceSummary>,
}

#[async_trait]
impl EventProcessor<MonitorEvent> for Aggregate {
    async fn process(
        &self,
        _source: Option<&str>,
        event: &MonitorEvent,
        _retries_left: u32,
    ) -> anyhow::Result<Option<MonitorEvent>> {
        let MonitorEvent::Correlated {
            service_type,
            fault,
            duration_ms,
            ..
        } = event
        else {
            return Ok(None);
        };

        let mut summary = self
            .counters
            .entry(service_type.clone())
            .or_insert_with(|| ServiceSummary {
                service_type: service_type.clone(),
                ..ServiceSummary::default()
            });
        summary.invocations += 1;
        summary.total_duration_ms += duration_ms;
        if fault.is_some() {
            summary.faults += 1;
        }
        Ok(Some(MonitorEvent::Summary(summary.clone())))
    }
}

/// 发布最新统计到看板
struct Publish {
    prefix: String,
    dashboard: Arc<DashMap<String, ServiceSummary>>,
}

#[async_trait]
impl EventProcessor<MonitorEvent> for Publish {
    async fn process(
        &self,
        _source: Option<&str>,
        event: &MonitorEvent,
        _retries_left: u32,
    ) -> anyhow::Result<Option<MonitorEvent>> {
        if let MonitorEvent::Summary(summary) = event {
            info!(
                topic = %format!("{}.{}", self.prefix, summary.service_type),
                invocations = summary.invocations,
                faults = summary.faults,
                "Published service summary"
            );
            self.dashboard
                .insert(summary.service_type.clone(), summary.clone());
        }
        Ok(None)
    }
}

#[derive(Deserialize)]
struct PublishProperties {
    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_prefix() -> String {
    "activity".to_string()
}

/// 统计发布节点处理过的事件数
#[derive(Default)]
struct PublishedCounter {
    events: AtomicUsize,
}

#[async_trait]
impl NodeListener<MonitorEvent> for PublishedCounter {
    async fn events_processed(&self, events: &EventList<MonitorEvent>) {
        self.events.fetch_add(events.len(), Ordering::SeqCst);
    }
}

type Processor = Arc<dyn EventProcessor<MonitorEvent>>;

fn components(
    dashboard: &Arc<DashMap<String, ServiceSummary>>,
) -> EpnResult<ComponentRegistry<MonitorEvent>> {
    let mut registry = ComponentRegistry::new();
    registry.register_processor("ingest", |_| Ok(Arc::new(Ingest) as Processor))?;
    registry.register_processor("correlate", |_| {
        Ok(Arc::new(Correlate::default()) as Processor)
    })?;
    registry.register_processor("aggregate", |_| {
        Ok(Arc::new(Aggregate::default()) as Processor)
    })?;

    let dashboard = dashboard.clone();
    registry.register_processor("publish", move |properties| {
        let properties: PublishProperties = if properties.is_null() {
            PublishProperties {
                prefix: default_prefix(),
            }
        } else {
            serde_json::from_value(properties.clone())?
        };
        Ok(Arc::new(Publish {
            prefix: properties.prefix,
            dashboard: dashboard.clone(),
        }) as Processor)
    })?;

    registry.register_predicate("has-service-type", |_| {
        Ok(Arc::new(HasServiceType) as Arc<dyn Predicate<MonitorEvent>>)
    })?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// 活动上报
// ---------------------------------------------------------------------------

/// 将应用侧采集到的活动批量提交给监控网络的根节点
struct ActivityNotifier {
    manager: Arc<dyn EpnManager<MonitorEvent>>,
    network: String,
}

impl ActivityNotifier {
    fn new(manager: Arc<dyn EpnManager<MonitorEvent>>, network: impl Into<String>) -> Self {
        Self {
            manager,
            network: network.into(),
        }
    }

    async fn report(&self, activities: Vec<Activity>) -> EpnResult<()> {
        if activities.is_empty() {
            return Ok(());
        }
        let events = activities.into_iter().map(MonitorEvent::Activity).collect();
        self.manager.enqueue(&self.network, events).await
    }
}

/// 示例流量：c3 的响应先于请求到达，c9 的响应没有对应请求
fn sample_traffic() -> Vec<Vec<Activity>> {
    let now = Utc::now();
    let submit = Activity::request("Order-Service", "submitOrder", "c1", now);
    let reserve = Activity::request("inventory-service", "reserveStock", "c2", now);
    let lookup = Activity::request("inventory-service", "lookupStock", "c3", now);
    let orphan = Activity::request("billing-service", "charge", "c9", now);
    let mut untyped = Activity::request("unknown", "ping", "c0", now);
    untyped.service_type = None;

    vec![
        vec![
            submit.clone(),
            Activity::response(&submit, 42, None),
            reserve.clone(),
            Activity::response(&lookup, 7, None),
            untyped,
        ],
        vec![
            Activity::response(&reserve, 120, Some("OutOfStock")),
            lookup,
            Activity::response(&orphan, 5, None),
        ],
    ]
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("EPN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // 加载拓扑并注册网络
    let dashboard = Arc::new(DashMap::new());
    let descriptor = NetworkDescriptor::from_json(TOPOLOGY.as_bytes())?;
    let network = descriptor.build(&components(&dashboard)?)?;

    let dead_letters = Arc::new(InMemoryDeadLetterSink::<MonitorEvent>::new());
    let manager = Arc::new(
        EmbeddedEpnManager::<MonitorEvent>::builder()
            .config(EmbeddedConfig {
                worker_concurrency: 4,
                max_redeliveries: 3,
                redelivery_delay_ms: 50,
                ..EmbeddedConfig::default()
            })
            .dead_letter_sink(dead_letters.clone())
            .build(),
    );
    manager.register(network).await?;

    let published = Arc::new(PublishedCounter::default());
    manager
        .add_node_listener(&descriptor.name, "publish", published.clone())
        .await?;

    let handle = manager.start()?;

    // 上报活动
    let notifier = ActivityNotifier::new(manager.clone(), descriptor.name.clone());
    for batch in sample_traffic() {
        notifier.report(batch).await?;
    }

    // 等待三次配对发布完成且孤立响应进入死信
    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        while published.events.load(Ordering::SeqCst) < 3
            || dead_letters.failed_events().await.is_empty()
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if settled.is_err() {
        warn!("Pipeline did not settle in time");
    }

    handle.shutdown();
    handle.join().await;
    manager.close().await?;

    let mut summaries: Vec<ServiceSummary> =
        dashboard.iter().map(|entry| entry.value().clone()).collect();
    summaries.sort_by(|a, b| a.service_type.cmp(&b.service_type));
    for summary in &summaries {
        println!(
            "service={}, invocations={}, faults={}, avg_ms={}",
            summary.service_type,
            summary.invocations,
            summary.faults,
            summary.total_duration_ms / summary.invocations.max(1) as i64
        );
    }
    for event in dead_letters.failed_events().await {
        println!("dead letter: {}", serde_json::to_string(&event)?);
    }
    Ok(())
}
