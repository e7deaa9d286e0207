//! 任务节点定义
//!
//! 节点在插入时就完成类型擦除：资源使用列表被立即收集，录制逻辑被装箱成闭包，
//! 具体的任务类型不会被保留。

use std::fmt;

use ash::vk;
use indexmap::IndexMap;

use super::access::{BufferState, ImageState, ResourceAccess, ResourceId};
use crate::arena::ArenaHandle;

/// 任务节点句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) ArenaHandle);

impl NodeHandle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.0.index()
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.0.generation()
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}.g{})", self.index(), self.generation())
    }
}

/// 任务声明的一次资源使用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskUsage {
    pub resource: ResourceId,
    pub access: ResourceAccess,
}

impl TaskUsage {
    #[inline]
    pub fn new(resource: ResourceId, access: ResourceAccess) -> Self {
        Self { resource, access }
    }

    #[inline]
    pub fn buffer(buffer: vk::Buffer, state: BufferState) -> Self {
        Self::new(ResourceId::Buffer(buffer), state.into())
    }

    #[inline]
    pub fn image(image: vk::Image, state: ImageState) -> Self {
        Self::new(ResourceId::Image(image), state.into())
    }
}

/// 任务录制时的上下文
pub struct TaskContext<'a> {
    /// 已经 begin 的命令缓冲区
    pub cmd: vk::CommandBuffer,
    /// 该任务被分配到的队列族
    pub queue_family: u32,
    /// 在编译结果中的位置
    pub step_index: usize,
    pub name: &'a str,
}

/// 类型擦除后的录制回调
pub(crate) type RecordFn<'a> = Box<dyn Fn(&TaskContext<'_>) + 'a>;

/// 任务 trait
///
/// 只是 `add_task` 的便捷入口：插入时立即调用 `usages()` 收集资源使用，
/// 并把 `record()` 包装成闭包，之后不再持有具体类型。
///
/// # 示例
///
/// ```ignore
/// struct ClearBuffer {
///     buffer: vk::Buffer,
/// }
///
/// impl TaskOperation for ClearBuffer {
///     fn usages(&self) -> Vec<TaskUsage> {
///         vec![TaskUsage::buffer(self.buffer, BufferState::TRANSFER_DST)]
///     }
///
///     fn record(&self, ctx: &TaskContext<'_>) {
///         // device.cmd_fill_buffer(ctx.cmd, self.buffer, 0, vk::WHOLE_SIZE, 0);
///     }
/// }
/// ```
pub trait TaskOperation {
    /// 声明任务访问的资源
    fn usages(&self) -> Vec<TaskUsage>;

    /// 录制命令
    fn record(&self, ctx: &TaskContext<'_>);
}

/// 图中的一个任务节点
pub struct TaskNode<'a> {
    pub(crate) name: String,
    pub(crate) queue_family: u32,
    /// 资源 -> 访问，保持声明顺序
    pub(crate) usages: IndexMap<ResourceId, ResourceAccess>,

    /// 显式入边
    pub(crate) in_edges: Vec<NodeHandle>,
    /// 显式出边
    pub(crate) out_edges: Vec<NodeHandle>,

    /// 插入序号，编译时按它的顺序做 hazard 分析
    pub(crate) sequence: u64,

    pub(crate) record: RecordFn<'a>,
}

// getters
impl TaskNode<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    #[inline]
    pub fn usages(&self) -> impl Iterator<Item = (&ResourceId, &ResourceAccess)> {
        self.usages.iter()
    }

    #[inline]
    pub fn usage(&self, resource: &ResourceId) -> Option<&ResourceAccess> {
        self.usages.get(resource)
    }

    #[inline]
    pub fn in_edges(&self) -> &[NodeHandle] {
        &self.in_edges
    }

    #[inline]
    pub fn out_edges(&self) -> &[NodeHandle] {
        &self.out_edges
    }

    /// 节点所有使用的 stage 并集，没有使用时返回 `ALL_COMMANDS`
    pub fn stage_union(&self) -> vk::PipelineStageFlags2 {
        let stages = self.usages.values().fold(vk::PipelineStageFlags2::NONE, |acc, access| acc | access.stage);
        if stages.is_empty() { vk::PipelineStageFlags2::ALL_COMMANDS } else { stages }
    }
}

impl fmt::Debug for TaskNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("queue_family", &self.queue_family)
            .field("usages", &self.usages)
            .field("in_edges", &self.in_edges)
            .field("out_edges", &self.out_edges)
            .finish_non_exhaustive()
    }
}
