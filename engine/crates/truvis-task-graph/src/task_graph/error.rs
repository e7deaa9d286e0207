use thiserror::Error;

use super::access::ResourceId;
use crate::arena::ArenaError;

/// 构建和编译任务图时的错误
#[derive(Debug, Error)]
pub enum TaskGraphError {
    /// 句柄失效、容量耗尽等节点存储错误
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// 依赖图中存在环，`nodes` 是无法排序的节点名
    #[error("task graph contains a cycle, unresolved nodes: {nodes:?}")]
    CycleDetected { nodes: Vec<String> },

    #[error("node \"{node}\" declares {resource:?} more than once")]
    DuplicateResource { node: String, resource: ResourceId },

    #[error("node \"{node}\" has an unsupported usage of {resource:?}: {reason}")]
    UnsupportedUsage {
        node: String,
        resource: ResourceId,
        reason: &'static str,
    },

    /// 内部状态不一致，不应该出现
    #[error("internal task graph error: {0}")]
    InternalBug(String),
}

pub type TaskGraphResult<T> = Result<T, TaskGraphError>;
