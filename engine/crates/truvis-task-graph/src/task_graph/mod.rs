//! TaskGraph - 基于资源访问自动推导同步的 GPU 任务图
//!
//! 每个任务声明它访问的资源（stage / access / layout）和所属队列族，
//! 编译时按插入顺序分析资源 hazard，推导出执行顺序、barrier 以及跨队列的 semaphore。
//!
//! # 核心概念
//!
//! - **ResourceId**: 资源身份（`vk::Buffer` / `vk::Image`），只用于比较和哈希
//! - **BufferState / ImageState**: 常用的访问状态组合
//! - **TaskOperation**: 任务 trait，插入时即被类型擦除
//! - **TaskGraphBuilder**: 构建器，添加节点和显式依赖
//! - **ExecutableGraph**: 编译结果，按顺序排列的 step 和 submission
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_task_graph::task_graph::*;
//!
//! let mut builder = TaskGraphBuilder::new();
//!
//! let upload = builder.add_node(
//!     "upload",
//!     transfer_family,
//!     [TaskUsage::buffer(particles, BufferState::TRANSFER_DST)],
//!     |ctx| device.cmd_copy_buffer(ctx.cmd, staging, particles, &regions),
//! )?;
//! builder.add_node(
//!     "simulate",
//!     compute_family,
//!     [
//!         TaskUsage::buffer(particles, BufferState::STORAGE_READ_WRITE_COMPUTE),
//!         TaskUsage::image(density, ImageState::STORAGE_WRITE_COMPUTE),
//!     ],
//!     |ctx| simulate_pass.dispatch(ctx.cmd),
//! )?;
//!
//! let graph = builder.compile()?;
//!
//! for submission in graph.submissions() {
//!     for index in submission.steps.clone() {
//!         let step = &graph.steps()[index];
//!         let batch = BarrierBatch::new(step.barriers(), |_| color_subresource_range());
//!         device.cmd_pipeline_barrier2(cmd, &batch.dependency_info());
//!         graph.record_step(index, cmd);
//!         // release_barriers 同理
//!     }
//!     // 以 submission.wait_semaphores / signal_semaphores 提交
//! }
//! ```
//!
//! # 模块结构
//!
//! - `access`: 资源身份与访问状态
//! - `node`: 节点、任务 trait、录制上下文
//! - `hazard`: 资源 hazard 分类，产生依赖边和 barrier
//! - `graph`: 依赖图和拓扑排序
//! - `synthesizer`: submission 分组和 semaphore 分配
//! - `barrier`: barrier 描述与 vulkan 结构体转换
//! - `executable`: 编译结果
//! - `state_table`: 可选的跨编译资源状态
//! - `builder`: 构建器和编译流程

mod access;
mod barrier;
mod builder;
mod error;
mod executable;
mod graph;
mod hazard;
mod node;
mod state_table;
mod synthesizer;

// Re-exports
pub use access::{BufferState, ImageState, ResourceAccess, ResourceId, WRITE_ACCESS, is_write};
pub use barrier::{BarrierBatch, BarrierDesc, BarrierKind, color_subresource_range};
pub use builder::TaskGraphBuilder;
pub use error::{TaskGraphError, TaskGraphResult};
pub use executable::{ExecutableGraph, Step};
pub use graph::{DependencyEdge, DependencyGraph, respects_edges};
pub use hazard::{Hazard, HazardOutcome, HazardTracker, NodeBarriers, PendingRelease};
pub use node::{NodeHandle, TaskContext, TaskNode, TaskOperation, TaskUsage};
pub use state_table::{ResourceState, ResourceStateTable};
pub use synthesizer::{SemaphoreId, SemaphoreInfo, Submission};
