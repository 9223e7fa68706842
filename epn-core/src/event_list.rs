//! 事件批次（EventList）
//!
//! 一次处理单元内的有序事件集合，只允许追加。
//! 事件相等性（`PartialEq`）用于计算“未进入重试的事件”：已处理 = 批次 − 重试。
//!
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// 网络中流转的事件需满足的约束
///
/// 每个网络声明一种事件类型；需要在不同阶段流转多种事件时，使用枚举统一表达。
pub trait Event: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> Event for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// 有序事件批次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventList<E> {
    events: Vec<E>,
}

impl<E> Default for EventList<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventList<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    /// 追加事件（批次唯一的修改方式）
    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn into_vec(self) -> Vec<E> {
        self.events
    }
}

impl<E: PartialEq> EventList<E> {
    pub fn contains(&self, event: &E) -> bool {
        self.events.contains(event)
    }
}

impl<E: PartialEq + Clone> EventList<E> {
    /// 返回不在 `excluded` 中的事件，保持原有顺序
    pub fn without(&self, excluded: &EventList<E>) -> EventList<E> {
        self.events
            .iter()
            .filter(|event| !excluded.contains(event))
            .cloned()
            .collect()
    }
}

impl<E> From<Vec<E>> for EventList<E> {
    fn from(events: Vec<E>) -> Self {
        Self { events }
    }
}

impl<E> FromIterator<E> for EventList<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl<E> Extend<E> for EventList<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.events.extend(iter);
    }
}

impl<E> IntoIterator for EventList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a EventList<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
