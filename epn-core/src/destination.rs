//! 路由地址（Destination）
//!
//! 由网络名与节点名组成的不可变值，仅作为向 `EpnContext` 解析 `Channel` 的键使用。
//!
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// 目标网络名
    network: String,
    /// 目标节点名
    node: String,
}

impl Destination {
    pub fn new(network: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            node: node.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.node)
    }
}
