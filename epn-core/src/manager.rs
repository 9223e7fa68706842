//! 网络注册表与管理器（EpnManager）
//!
//! `NetworkRegistry` 是进程内唯一的网络注册表，由宿主进程在启动时创建并显式传递：
//! - 按名称注册/替换/注销网络，注册时完成初始化；
//! - 将传输层投递的批次分发给目标节点；
//! - 维护节点监听器，并在每次分发后通知。
//!
//! `EpnManager` 将注册表绑定到具体传输，具体实现只需提供 `registry` 与 `enqueue`。
//!
use crate::{
    context::EpnContext,
    destination::Destination,
    error::{EpnError, EpnResult},
    event_list::{Event, EventList},
    listener::NodeListener,
    network::Network,
    node::{BatchOutcome, Node},
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::{
    collections::{HashMap, hash_map::Entry},
    ops::Deref,
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 绑定到具体传输的网络管理器
#[async_trait]
pub trait EpnManager<E: Event>: Send + Sync {
    fn registry(&self) -> &NetworkRegistry<E>;

    /// 经由传输层向网络的根节点提交新批次
    async fn enqueue(&self, network: &str, events: EventList<E>) -> EpnResult<()>;

    async fn register(&self, network: Network<E>) -> EpnResult<()> {
        self.registry().register(network).await
    }

    async fn replace(&self, network: Network<E>) -> EpnResult<bool> {
        self.registry().replace(network).await
    }

    async fn unregister(&self, name: &str) -> EpnResult<()> {
        self.registry().unregister(name).await
    }

    async fn network(&self, name: &str) -> EpnResult<Arc<Network<E>>> {
        self.registry().network(name).await
    }

    async fn node(&self, network: &str, node: &str) -> EpnResult<NodeRef<E>> {
        self.registry().node(network, node).await
    }

    async fn add_node_listener(
        &self,
        network: &str,
        node: &str,
        listener: Arc<dyn NodeListener<E>>,
    ) -> EpnResult<()> {
        self.registry()
            .add_node_listener(network, node, listener)
            .await
    }

    async fn remove_node_listener(
        &self,
        network: &str,
        node: &str,
        listener: &Arc<dyn NodeListener<E>>,
    ) -> EpnResult<bool> {
        self.registry()
            .remove_node_listener(network, node, listener)
            .await
    }

    async fn close(&self) -> EpnResult<()> {
        self.registry().close_all().await
    }
}

/// 已注册网络中某个节点的共享引用
pub struct NodeRef<E: Event> {
    network: Arc<Network<E>>,
    position: usize,
}

impl<E: Event> Clone for NodeRef<E> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            position: self.position,
        }
    }
}

impl<E: Event> NodeRef<E> {
    pub fn network(&self) -> &Arc<Network<E>> {
        &self.network
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.network.name(), self.name())
    }
}

impl<E: Event> Deref for NodeRef<E> {
    type Target = Node<E>;

    fn deref(&self) -> &Node<E> {
        &self.network.nodes()[self.position]
    }
}

/// 网络注册表
pub struct NetworkRegistry<E: Event> {
    context: Arc<dyn EpnContext<E>>,
    networks: RwLock<HashMap<String, Arc<Network<E>>>>,
    listeners: DashMap<Destination, Vec<Arc<dyn NodeListener<E>>>>,
}

impl<E: Event> NetworkRegistry<E> {
    pub fn new(context: Arc<dyn EpnContext<E>>) -> Self {
        Self {
            context,
            networks: RwLock::new(HashMap::new()),
            listeners: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<dyn EpnContext<E>> {
        &self.context
    }

    /// 初始化并注册网络；名称已被占用或初始化失败时不会登记
    pub async fn register(&self, mut network: Network<E>) -> EpnResult<()> {
        let name = network.name().to_string();
        if self.networks.read().await.contains_key(&name) {
            return Err(EpnError::NetworkAlreadyRegistered { network: name });
        }

        network.init(self.context.as_ref()).await?;
        let network = Arc::new(network);

        // 初始化期间可能有同名网络抢先注册
        let inserted = match self.networks.write().await.entry(name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(network.clone());
                true
            }
            Entry::Occupied(_) => false,
        };

        if !inserted {
            if let Err(err) = network.close(self.context.as_ref()).await {
                warn!(network = %name, error = %err, "Failed to close rejected network");
            }
            return Err(EpnError::NetworkAlreadyRegistered { network: name });
        }

        info!(network = %name, "Registered network");
        Ok(())
    }

    /// 初始化并注册网络，关闭被替换的同名网络；返回是否发生了替换
    pub async fn replace(&self, mut network: Network<E>) -> EpnResult<bool> {
        network.init(self.context.as_ref()).await?;
        let name = network.name().to_string();
        let displaced = self
            .networks
            .write()
            .await
            .insert(name.clone(), Arc::new(network));

        let Some(displaced) = displaced else {
            info!(network = %name, "Registered network");
            return Ok(false);
        };

        if let Err(err) = displaced.close(self.context.as_ref()).await {
            warn!(network = %name, error = %err, "Failed to close displaced network");
        }
        info!(network = %name, "Replaced network");
        Ok(true)
    }

    /// 注销并关闭网络，同时移除其节点上的监听器
    pub async fn unregister(&self, name: &str) -> EpnResult<()> {
        let network = self.networks.write().await.remove(name).ok_or_else(|| {
            EpnError::NetworkNotFound {
                network: name.to_string(),
            }
        })?;
        self.listeners
            .retain(|destination, _| destination.network() != name);

        info!(network = %name, "Unregistered network");
        network.close(self.context.as_ref()).await
    }

    pub async fn network(&self, name: &str) -> EpnResult<Arc<Network<E>>> {
        self.networks
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EpnError::NetworkNotFound {
                network: name.to_string(),
            })
    }

    pub async fn node(&self, network: &str, node: &str) -> EpnResult<NodeRef<E>> {
        let network = self.network(network).await?;
        let position = network
            .position_of(node)
            .ok_or_else(|| EpnError::NodeNotFound {
                network: network.name().to_string(),
                node: node.to_string(),
            })?;
        Ok(NodeRef { network, position })
    }

    pub async fn root(&self, network: &str) -> EpnResult<NodeRef<E>> {
        let root = self.network(network).await?.root_node_name().to_string();
        self.node(network, &root).await
    }

    pub async fn network_names(&self) -> Vec<String> {
        self.networks.read().await.keys().cloned().collect()
    }

    /// 将批次分发给指定节点
    pub async fn dispatch(
        &self,
        network: &str,
        node: &str,
        source: Option<&str>,
        events: &EventList<E>,
        retries_left: u32,
    ) -> EpnResult<BatchOutcome<E>> {
        let node = self.node(network, node).await?;
        self.process_node(&node, source, events, retries_left).await
    }

    /// 将新批次分发给网络的根节点，初始剩余重试次数为根节点的 `max_retries`
    pub async fn dispatch_root(
        &self,
        network: &str,
        events: &EventList<E>,
    ) -> EpnResult<BatchOutcome<E>> {
        let root = self.root(network).await?;
        let retries_left = root.max_retries();
        self.process_node(&root, None, events, retries_left).await
    }

    /// 在已解析的节点上处理批次并通知监听器
    pub async fn process_node(
        &self,
        node: &NodeRef<E>,
        source: Option<&str>,
        events: &EventList<E>,
        retries_left: u32,
    ) -> EpnResult<BatchOutcome<E>> {
        let outcome = node
            .process(self.context.as_ref(), source, events, retries_left)
            .await?;
        self.notify(&node.destination(), events, &outcome).await;
        Ok(outcome)
    }

    async fn notify(
        &self,
        destination: &Destination,
        events: &EventList<E>,
        outcome: &BatchOutcome<E>,
    ) {
        // 先复制监听器列表再释放分片锁，回调期间允许并发注册与移除
        let Some(listeners) = self
            .listeners
            .get(destination)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        if listeners.is_empty() {
            return;
        }

        let processed = if outcome.retries().is_empty() {
            events.clone()
        } else {
            events.without(outcome.retries())
        };

        for listener in &listeners {
            listener.events_processed(&processed).await;
            if !outcome.filtered().is_empty() {
                listener.events_filtered(outcome.filtered()).await;
            }
        }
    }

    pub async fn add_node_listener(
        &self,
        network: &str,
        node: &str,
        listener: Arc<dyn NodeListener<E>>,
    ) -> EpnResult<()> {
        let destination = self.node(network, node).await?.destination();
        self.listeners
            .entry(destination)
            .or_default()
            .push(listener);
        Ok(())
    }

    /// 移除监听器（按指针相等），返回是否确有移除
    pub async fn remove_node_listener(
        &self,
        network: &str,
        node: &str,
        listener: &Arc<dyn NodeListener<E>>,
    ) -> EpnResult<bool> {
        let destination = self.node(network, node).await?.destination();

        let removed = match self.listeners.get_mut(&destination) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|registered| {
                    !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(listener))
                });
                before != entry.len()
            }
            None => false,
        };
        self.listeners
            .remove_if(&destination, |_, listeners| listeners.is_empty());
        Ok(removed)
    }

    /// 关闭并移除全部网络，汇总各网络的关闭失败
    pub async fn close_all(&self) -> EpnResult<()> {
        let networks: Vec<_> = self.networks.write().await.drain().map(|(_, n)| n).collect();
        self.listeners.clear();

        let context = self.context.as_ref();
        let results = join_all(networks.iter().map(|network| network.close(context))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err().map(|err| err.to_string()))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EpnError::Close {
                component: "network registry".to_string(),
                failures,
            })
        }
    }
}
