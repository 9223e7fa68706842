//! 声明式拓扑配置
//!
//! 网络/节点拓扑（名称、根节点、重试次数、重试间隔、下游目标）以 JSON 描述，
//! 进程启动时加载一次，经 `ComponentRegistry` 解析处理器与谓词后构建内存中的 `Network`。
//!
use crate::{
    destination::Destination,
    error::{EpnError, EpnResult},
    event_list::Event,
    network::Network,
    node::{DEFAULT_MAX_RETRIES, Node},
    predicate::Predicate,
    processor::EventProcessor,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

/// 网络描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub name: String,
    pub root_node_name: String,
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

/// 节点描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub name: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试间隔（毫秒），0 表示使用传输层默认值
    #[serde(default)]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_processor: Option<ComponentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<ComponentDescriptor>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// 处理器/谓词描述：类型名 + 任意属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub properties: Value,
}

impl ComponentDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

impl NetworkDescriptor {
    pub fn from_json(bytes: &[u8]) -> EpnResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> EpnResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn to_json(&self) -> EpnResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// 通过组件注册表构建网络；未知的组件类型视为配置错误
    pub fn build<E: Event>(&self, registry: &ComponentRegistry<E>) -> EpnResult<Network<E>> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for descriptor in &self.nodes {
            let event_processor = descriptor
                .event_processor
                .as_ref()
                .map(|component| registry.processor(component))
                .transpose()?;
            let predicate = descriptor
                .predicate
                .as_ref()
                .map(|component| registry.predicate(component))
                .transpose()?;
            let retry_interval = (descriptor.retry_interval_ms > 0)
                .then(|| Duration::from_millis(descriptor.retry_interval_ms));

            nodes.push(
                Node::builder()
                    .name(descriptor.name.clone())
                    .max_retries(descriptor.max_retries)
                    .maybe_retry_interval(retry_interval)
                    .destinations(descriptor.destinations.clone())
                    .maybe_event_processor(event_processor)
                    .maybe_predicate(predicate)
                    .build(),
            );
        }

        Ok(Network::builder()
            .name(self.name.clone())
            .root_node_name(self.root_node_name.clone())
            .nodes(nodes)
            .build())
    }
}

type ProcessorFactory<E> =
    Arc<dyn Fn(&Value) -> EpnResult<Arc<dyn EventProcessor<E>>> + Send + Sync>;
type PredicateFactory<E> = Arc<dyn Fn(&Value) -> EpnResult<Arc<dyn Predicate<E>>> + Send + Sync>;

/// 按类型名创建处理器与谓词的工厂注册表
pub struct ComponentRegistry<E: Event> {
    processors: HashMap<String, ProcessorFactory<E>>,
    predicates: HashMap<String, PredicateFactory<E>>,
}

impl<E: Event> Default for ComponentRegistry<E> {
    fn default() -> Self {
        Self {
            processors: HashMap::new(),
            predicates: HashMap::new(),
        }
    }
}

impl<E: Event> ComponentRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_processor<F>(&mut self, type_name: impl Into<String>, factory: F) -> EpnResult<()>
    where
        F: Fn(&Value) -> EpnResult<Arc<dyn EventProcessor<E>>> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.processors.contains_key(&type_name) {
            return Err(EpnError::ComponentAlreadyRegistered {
                kind: "event processor",
                type_name,
            });
        }
        self.processors.insert(type_name, Arc::new(factory));
        Ok(())
    }

    pub fn register_predicate<F>(&mut self, type_name: impl Into<String>, factory: F) -> EpnResult<()>
    where
        F: Fn(&Value) -> EpnResult<Arc<dyn Predicate<E>>> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.predicates.contains_key(&type_name) {
            return Err(EpnError::ComponentAlreadyRegistered {
                kind: "predicate",
                type_name,
            });
        }
        self.predicates.insert(type_name, Arc::new(factory));
        Ok(())
    }

    pub fn processor(&self, component: &ComponentDescriptor) -> EpnResult<Arc<dyn EventProcessor<E>>> {
        let factory = self.processors.get(&component.type_name).ok_or_else(|| {
            EpnError::UnknownComponent {
                kind: "event processor",
                type_name: component.type_name.clone(),
            }
        })?;
        factory(&component.properties)
    }

    pub fn predicate(&self, component: &ComponentDescriptor) -> EpnResult<Arc<dyn Predicate<E>>> {
        let factory = self.predicates.get(&component.type_name).ok_or_else(|| {
            EpnError::UnknownComponent {
                kind: "predicate",
                type_name: component.type_name.clone(),
            }
        })?;
        factory(&component.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl EventProcessor<String> for Upper {
        async fn process(
            &self,
            _source: Option<&str>,
            event: &String,
            _retries_left: u32,
        ) -> anyhow::Result<Option<String>> {
            Ok(Some(event.to_uppercase()))
        }
    }

    const TOPOLOGY: &str = r#"{
        "name": "monitor",
        "rootNodeName": "ingest",
        "nodes": [
            {
                "name": "ingest",
                "retryIntervalMs": 250,
                "destinations": [{ "network": "monitor", "node": "publish" }],
                "eventProcessor": { "type": "upper" }
            },
            {
                "name": "publish",
                "maxRetries": 0,
                "eventProcessor": { "type": "upper", "properties": { "verbose": true } }
            }
        ]
    }"#;

    fn registry() -> ComponentRegistry<String> {
        let mut registry = ComponentRegistry::new();
        registry
            .register_processor("upper", |_| Ok(Arc::new(Upper) as Arc<dyn EventProcessor<String>>))
            .unwrap();
        registry
    }

    #[test]
    fn descriptor_applies_defaults() {
        let descriptor = NetworkDescriptor::from_json(TOPOLOGY.as_bytes()).unwrap();

        assert_eq!(descriptor.root_node_name, "ingest");
        assert_eq!(descriptor.nodes[0].max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(descriptor.nodes[0].retry_interval_ms, 250);
        assert_eq!(descriptor.nodes[1].max_retries, 0);
        assert_eq!(descriptor.nodes[1].retry_interval_ms, 0);
        assert!(descriptor.nodes[1].predicate.is_none());
        assert_eq!(
            descriptor.nodes[1]
                .event_processor
                .as_ref()
                .map(|c| c.properties["verbose"].clone()),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn descriptor_survives_save_and_load() {
        let descriptor = NetworkDescriptor::from_json(TOPOLOGY.as_bytes()).unwrap();
        let saved = descriptor.to_json().unwrap();
        assert_eq!(NetworkDescriptor::from_json(&saved).unwrap(), descriptor);
    }

    #[test]
    fn build_resolves_components() {
        let descriptor = NetworkDescriptor::from_json(TOPOLOGY.as_bytes()).unwrap();
        let network = descriptor.build(&registry()).unwrap();

        assert_eq!(network.name(), "monitor");
        assert_eq!(network.nodes().len(), 2);
        let ingest = network.node("ingest").unwrap();
        assert_eq!(ingest.retry_interval(), Some(Duration::from_millis(250)));
        assert_eq!(ingest.destinations(), &[Destination::new("monitor", "publish")]);
        assert!(ingest.event_processor().is_some());
        assert_eq!(network.node("publish").unwrap().retry_interval(), None);
    }

    #[test]
    fn build_rejects_unknown_component() {
        let mut descriptor = NetworkDescriptor::from_json(TOPOLOGY.as_bytes()).unwrap();
        descriptor.nodes[0].predicate = Some(ComponentDescriptor::new("missing"));

        let err = descriptor.build(&registry()).err().unwrap();
        assert!(matches!(
            err,
            EpnError::UnknownComponent { kind: "predicate", ref type_name } if type_name == "missing"
        ));
    }

    #[test]
    fn duplicate_factory_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register_processor("upper", |_| Ok(Arc::new(Upper) as Arc<dyn EventProcessor<String>>))
            .unwrap_err();
        assert!(matches!(err, EpnError::ComponentAlreadyRegistered { .. }));
    }

    #[test]
    fn malformed_json_is_a_serde_error() {
        let err = NetworkDescriptor::from_json(b"{ not json").unwrap_err();
        assert!(matches!(err, EpnError::Serde { .. }));
    }
}
