//! 跨多次编译保存资源状态
//!
//! 默认每次 `compile()` 的资源状态只在本次编译内有效。需要在多个批次之间延续
//! 资源的 layout / 队列族 / 最后访问时，调用方自己持有一个 [`ResourceStateTable`]，
//! 并通过 `compile_with_states()` 传入：表中的记录代替"第一次访问"，
//! 编译成功后表被更新为本批次结束时的状态。

use std::collections::HashMap;

use super::access::{ResourceAccess, ResourceId};

/// 资源在某个时间点的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceState {
    pub access: ResourceAccess,
    pub queue_family: u32,
}

impl ResourceState {
    #[inline]
    pub fn new(access: impl Into<ResourceAccess>, queue_family: u32) -> Self {
        Self {
            access: access.into(),
            queue_family,
        }
    }
}

/// 外部持有的资源状态表
#[derive(Clone, Debug, Default)]
pub struct ResourceStateTable {
    states: HashMap<ResourceId, ResourceState>,
}

// new & init
impl ResourceStateTable {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters & iter
impl ResourceStateTable {
    #[inline]
    pub fn get(&self, resource: &ResourceId) -> Option<&ResourceState> {
        self.states.get(resource)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ResourceState)> {
        self.states.iter()
    }
}

// tools
impl ResourceStateTable {
    /// 登记资源的当前状态（例如外部导入的 image 已经处于某个 layout）
    #[inline]
    pub fn insert(&mut self, resource: ResourceId, state: ResourceState) -> Option<ResourceState> {
        self.states.insert(resource, state)
    }

    /// 资源被销毁后应当移除，否则后续编译会基于过期状态生成 barrier
    #[inline]
    pub fn remove(&mut self, resource: &ResourceId) -> Option<ResourceState> {
        self.states.remove(resource)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub(crate) fn apply(&mut self, final_states: impl IntoIterator<Item = (ResourceId, ResourceState)>) {
        self.states.extend(final_states);
    }
}
