//! 处理网络（Network）
//!
//! 具名、经过校验的节点图，恰有一个根节点。
//! 状态机：`Unregistered → Initializing → Active → Closed`。
//! 拓扑只在 `init`/`close` 期间变化，激活后只读，可在并发分发之间自由共享。
//!
use crate::{
    context::EpnContext,
    error::{EpnError, EpnResult},
    event_list::{Event, EventList},
    node::{BatchOutcome, Node},
};
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU8, Ordering},
};
use tracing::{info, warn};

/// 网络生命周期状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    Unregistered = 0,
    Initializing = 1,
    Active = 2,
    Closed = 3,
}

impl NetworkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NetworkState::Initializing,
            2 => NetworkState::Active,
            3 => NetworkState::Closed,
            _ => NetworkState::Unregistered,
        }
    }
}

#[derive(Builder)]
pub struct Network<E: Event> {
    #[builder(into)]
    name: String,
    #[builder(into)]
    root_node_name: String,
    /// 按声明顺序保存的节点
    #[builder(default)]
    nodes: Vec<Node<E>>,

    #[builder(skip)]
    index: HashMap<String, usize>,
    #[builder(skip = AtomicU8::new(NetworkState::Unregistered as u8))]
    state: AtomicU8,
}

impl<E: Event> Network<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_node_name(&self) -> &str {
        &self.root_node_name
    }

    pub fn nodes(&self) -> &[Node<E>] {
        &self.nodes
    }

    pub fn state(&self) -> NetworkState {
        NetworkState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: NetworkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 追加节点，仅允许在注册之前调用
    pub fn add_node(&mut self, node: Node<E>) -> EpnResult<()> {
        self.expect_state(NetworkState::Unregistered)?;
        self.nodes.push(node);
        Ok(())
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        if self.index.is_empty() {
            self.nodes.iter().position(|node| node.name() == name)
        } else {
            self.index.get(name).copied()
        }
    }

    pub fn node(&self, name: &str) -> Option<&Node<E>> {
        self.position_of(name)
            .and_then(|position| self.nodes.get(position))
    }

    pub fn root(&self) -> EpnResult<&Node<E>> {
        self.node(&self.root_node_name)
            .ok_or_else(|| EpnError::RootNodeNotFound {
                network: self.name.clone(),
                root: self.root_node_name.clone(),
            })
    }

    fn expect_state(&self, expected: NetworkState) -> EpnResult<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(EpnError::InvalidNetworkState {
                network: self.name.clone(),
                state,
                expected,
            })
        }
    }

    /// 校验拓扑：节点名唯一、根节点存在、每个节点都配置了处理器
    fn validate(&mut self) -> EpnResult<()> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (position, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), position).is_some() {
                return Err(EpnError::DuplicateNode {
                    network: self.name.clone(),
                    node: node.name().to_string(),
                });
            }
        }
        if !index.contains_key(&self.root_node_name) {
            return Err(EpnError::RootNodeNotFound {
                network: self.name.clone(),
                root: self.root_node_name.clone(),
            });
        }
        if let Some(node) = self.nodes.iter().find(|node| node.event_processor().is_none()) {
            return Err(EpnError::MissingEventProcessor {
                node: node.name().to_string(),
            });
        }

        self.index = index;
        Ok(())
    }

    /// 初始化网络：先整体校验，再按声明顺序初始化每个节点
    ///
    /// 任一步失败时关闭已初始化的节点，网络回到 `Unregistered`，不会进入 `Active`。
    pub async fn init(&mut self, ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        self.expect_state(NetworkState::Unregistered)?;
        self.set_state(NetworkState::Initializing);

        if let Err(err) = self.validate() {
            self.set_state(NetworkState::Unregistered);
            return Err(err);
        }

        let mut failure = None;
        for (position, node) in self.nodes.iter_mut().enumerate() {
            if let Err(err) = node.init(&self.name, ctx).await {
                failure = Some((position, err));
                break;
            }
        }

        if let Some((position, err)) = failure {
            for node in self.nodes[..position].iter().rev() {
                if let Err(close_err) = node.close(ctx).await {
                    warn!(
                        network = %self.name,
                        node = %node.name(),
                        error = %close_err,
                        "Failed to close node after network init failure"
                    );
                }
            }
            self.index.clear();
            self.set_state(NetworkState::Unregistered);
            return Err(err);
        }

        self.set_state(NetworkState::Active);
        info!(
            network = %self.name,
            root = %self.root_node_name,
            nodes = self.nodes.len(),
            "Network initialized"
        );
        Ok(())
    }

    /// 将新批次交给根节点，初始剩余重试次数为根节点的 `max_retries`
    pub async fn process(
        &self,
        ctx: &dyn EpnContext<E>,
        events: &EventList<E>,
    ) -> EpnResult<BatchOutcome<E>> {
        self.expect_state(NetworkState::Active)?;
        let root = self.root()?;
        root.process(ctx, None, events, root.max_retries()).await
    }

    /// 按声明顺序关闭全部节点，尽力而为并汇总失败；重复关闭直接返回成功
    pub async fn close(&self, ctx: &dyn EpnContext<E>) -> EpnResult<()> {
        let previous = NetworkState::from_u8(
            self.state
                .swap(NetworkState::Closed as u8, Ordering::AcqRel),
        );
        if previous == NetworkState::Closed {
            return Ok(());
        }

        let mut failures = Vec::new();
        for node in &self.nodes {
            if let Err(err) = node.close(ctx).await {
                warn!(
                    network = %self.name,
                    node = %node.name(),
                    error = %err,
                    "Failed to close node"
                );
                failures.push(err.to_string());
            }
        }

        info!(network = %self.name, "Network closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EpnError::Close {
                component: format!("network {}", self.name),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            NetworkState::Unregistered,
            NetworkState::Initializing,
            NetworkState::Active,
            NetworkState::Closed,
        ] {
            assert_eq!(NetworkState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn lookup_before_init_uses_declaration_order() {
        let network = Network::<String>::builder()
            .name("n")
            .root_node_name("a")
            .nodes(vec![
                Node::builder().name("a").build(),
                Node::builder().name("b").build(),
            ])
            .build();

        assert_eq!(network.state(), NetworkState::Unregistered);
        assert_eq!(network.position_of("b"), Some(1));
        assert!(network.node("c").is_none());
        assert_eq!(network.root().map(|node| node.name()).ok(), Some("a"));
    }

    #[test]
    fn add_node_appends_while_unregistered() {
        let mut network = Network::<String>::builder()
            .name("n")
            .root_node_name("a")
            .build();
        network
            .add_node(Node::builder().name("a").build())
            .unwrap();
        assert_eq!(network.nodes().len(), 1);
    }
}
