//! 编译结果
//!
//! [`ExecutableGraph`] 是不可变的 step 序列，不持有任何 builder 的引用。
//! barrier 和 semaphore 都只是数据，由提交层负责创建 vulkan 对象、发出 barrier 以及 queue submit。

use std::fmt;

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;

use super::access::{ResourceAccess, ResourceId};
use super::barrier::{BarrierDesc, BarrierKind};
use super::graph::DependencyEdge;
use super::node::{NodeHandle, RecordFn, TaskContext};
use super::synthesizer::{SemaphoreInfo, Submission};

/// 执行计划中的一步，对应一个任务节点
pub struct Step<'a> {
    pub(crate) name: String,
    pub(crate) node: NodeHandle,
    pub(crate) queue_family: u32,
    pub(crate) submission: usize,
    pub(crate) usages: IndexMap<ResourceId, ResourceAccess>,

    /// 录制之前发出
    pub(crate) barriers: Vec<BarrierDesc>,
    /// 录制之后发出（队列族所有权 release）
    pub(crate) release_barriers: Vec<BarrierDesc>,

    pub(crate) wait_semaphores: Vec<SemaphoreInfo>,
    pub(crate) signal_semaphores: Vec<SemaphoreInfo>,

    pub(crate) record: RecordFn<'a>,
}

// getters
impl Step<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 编译前节点的句柄，编译后仅用于标识
    #[inline]
    pub fn node(&self) -> NodeHandle {
        self.node
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// 所属 submission 在 `ExecutableGraph::submissions()` 中的索引
    #[inline]
    pub fn submission_index(&self) -> usize {
        self.submission
    }

    #[inline]
    pub fn usages(&self) -> impl Iterator<Item = (&ResourceId, &ResourceAccess)> {
        self.usages.iter()
    }

    #[inline]
    pub fn barriers(&self) -> &[BarrierDesc] {
        &self.barriers
    }

    #[inline]
    pub fn release_barriers(&self) -> &[BarrierDesc] {
        &self.release_barriers
    }

    #[inline]
    pub fn wait_semaphores(&self) -> &[SemaphoreInfo] {
        &self.wait_semaphores
    }

    #[inline]
    pub fn signal_semaphores(&self) -> &[SemaphoreInfo] {
        &self.signal_semaphores
    }

    /// 某个资源上挂着的 barrier
    pub fn barriers_for(&self, resource: ResourceId) -> impl Iterator<Item = &BarrierDesc> {
        self.barriers.iter().filter(move |barrier| barrier.resource == resource)
    }

    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.barriers.is_empty() || !self.release_barriers.is_empty()
    }
}

impl Step<'_> {
    /// 调用节点的录制回调，外部通过 [`ExecutableGraph::record_step`] 录制
    pub(crate) fn record(&self, cmd: vk::CommandBuffer, step_index: usize) {
        let ctx = TaskContext {
            cmd,
            queue_family: self.queue_family,
            step_index,
            name: &self.name,
        };
        (self.record)(&ctx);
    }
}

impl fmt::Debug for Step<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("queue_family", &self.queue_family)
            .field("submission", &self.submission)
            .field("barriers", &self.barriers)
            .field("release_barriers", &self.release_barriers)
            .field("wait_semaphores", &self.wait_semaphores)
            .field("signal_semaphores", &self.signal_semaphores)
            .finish_non_exhaustive()
    }
}

/// 编译后的任务图
///
/// 典型的提交流程：
/// 1. 按 `semaphore_count()` 创建 binary semaphore
/// 2. 对每个 submission，按顺序处理它的 step：发出 `barriers()`，`record_step()`，发出 `release_barriers()`
/// 3. 以 submission 的 wait/signal 提交到对应队列族的队列
#[derive(Debug)]
pub struct ExecutableGraph<'a> {
    pub(crate) steps: Vec<Step<'a>>,
    pub(crate) submissions: Vec<Submission>,
    /// producer/consumer 为 step 索引
    pub(crate) edges: Vec<DependencyEdge>,
    pub(crate) semaphore_count: u32,
}

// getters
impl<'a> ExecutableGraph<'a> {
    #[inline]
    pub fn steps(&self) -> &[Step<'a>] {
        &self.steps
    }

    #[inline]
    pub fn step(&self, index: usize) -> Option<&Step<'a>> {
        self.steps.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[inline]
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// 需要创建的 binary semaphore 数量，`SemaphoreId` 在 `0..semaphore_count` 中
    #[inline]
    pub fn semaphore_count(&self) -> u32 {
        self.semaphore_count
    }

    /// 依赖边，端点是 step 索引
    #[inline]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// 节点在执行顺序中的位置
    pub fn position_of(&self, node: NodeHandle) -> Option<usize> {
        self.steps.iter().position(|step| step.node == node)
    }

    /// 按名字查找 step，主要用于调试和测试
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }

    pub fn barrier_count(&self) -> usize {
        self.steps.iter().map(|step| step.barriers.len() + step.release_barriers.len()).sum()
    }
}

// tools
impl ExecutableGraph<'_> {
    /// 录制第 `index` 个 step
    ///
    /// # Panics
    /// `index` 越界
    pub fn record_step(&self, index: usize, cmd: vk::CommandBuffer) {
        self.steps[index].record(cmd, index);
    }

    /// 打印执行计划
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              TaskGraph Execution Plan                            ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Steps: {}  |  Submissions: {}  |  Semaphores: {}",
            self.steps.len(),
            self.submissions.len(),
            self.semaphore_count
        );
        log::info!("║ Order: [{}]", self.steps.iter().map(|step| step.name.as_str()).join(" → "));
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (submission_index, submission) in self.submissions.iter().enumerate() {
            log::info!("");
            log::info!(
                "━━ Submission #{} (queue family {}) ━━ wait: [{}]  signal: [{}]",
                submission_index,
                submission.queue_family,
                format_semaphores(&submission.wait_semaphores),
                format_semaphores(&submission.signal_semaphores)
            );

            for index in submission.steps.clone() {
                self.print_step(index);
            }
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }

    fn print_step(&self, index: usize) {
        let step = &self.steps[index];

        log::info!("┌─────────────────────────────────────────────────────────────────┐");
        log::info!(
            "│ [{}/{}] Step: \"{}\" (queue family {})",
            index + 1,
            self.steps.len(),
            step.name,
            step.queue_family
        );
        log::info!("├─────────────────────────────────────────────────────────────────┤");

        for (resource, access) in &step.usages {
            let marker = if access.is_write() { "✏️ " } else { "📖" };
            let layout = if resource.is_image() { format!(" @ {:?}", access.layout) } else { String::new() };
            log::info!(
                "│   {} {:?}{} (stage: {}, access: {})",
                marker,
                resource,
                layout,
                format_pipeline_stage(access.stage),
                format_access_flags(access.access)
            );
        }

        if step.has_barriers() {
            log::info!("├─────────────────────────────────────────────────────────────────┤");
            log::info!("│ Barriers: {} before, {} after", step.barriers.len(), step.release_barriers.len());
            for barrier in step.barriers.iter().chain(&step.release_barriers) {
                print_barrier(barrier);
            }
        } else {
            log::info!("│ No barriers required");
        }

        if !step.wait_semaphores.is_empty() || !step.signal_semaphores.is_empty() {
            log::info!(
                "│ Semaphores: wait [{}]  signal [{}]",
                format_semaphores(&step.wait_semaphores),
                format_semaphores(&step.signal_semaphores)
            );
        }

        log::info!("└─────────────────────────────────────────────────────────────────┘");
    }
}

fn print_barrier(barrier: &BarrierDesc) {
    let kind = match barrier.kind {
        BarrierKind::InitialTransition => "initial",
        BarrierKind::LayoutTransition => "layout",
        BarrierKind::Memory => "memory",
        BarrierKind::Execution => "execution",
        BarrierKind::Release => "release",
        BarrierKind::Acquire => "acquire",
    };

    log::info!("│   🔒 {:?} ({})", barrier.resource, kind);
    if barrier.resource.is_image() {
        if barrier.is_layout_transition() {
            log::info!("│       Layout: {:?} → {:?}", barrier.old_layout, barrier.new_layout);
        } else {
            log::info!("│       Layout: {:?} (no layout change)", barrier.old_layout);
        }
    }
    log::info!(
        "│       Stage:  {} → {}",
        format_pipeline_stage(barrier.src_stage),
        format_pipeline_stage(barrier.dst_stage)
    );
    log::info!(
        "│       Access: {} → {}",
        format_access_flags(barrier.src_access),
        format_access_flags(barrier.dst_access)
    );
    if barrier.is_queue_transfer() {
        log::info!("│       Queue:  {} → {}", barrier.src_queue_family, barrier.dst_queue_family);
    }
}

fn format_semaphores(semaphores: &[SemaphoreInfo]) -> String {
    semaphores
        .iter()
        .map(|info| format!("#{}@{}", info.semaphore.0, format_pipeline_stage(info.stage)))
        .join(", ")
}

const STAGE_NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
    (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
    (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
    (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
    (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
    (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
    (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
    (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
    (vk::PipelineStageFlags2::HOST, "HOST"),
    (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RAY_TRACING_SHADER"),
    (vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR, "ACCEL_STRUCT_BUILD"),
    (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
    (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
];

const ACCESS_NAMES: &[(vk::AccessFlags2, &str)] = &[
    (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
    (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
    (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
    (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
    (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
    (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
    (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
    (vk::AccessFlags2::HOST_READ, "HOST_READ"),
    (vk::AccessFlags2::HOST_WRITE, "HOST_WRITE"),
    (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
    (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
];

/// 格式化 PipelineStageFlags2 为可读字符串
pub(crate) fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }

    let names: Vec<_> = STAGE_NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect();
    if names.is_empty() { format!("{:?}", stage) } else { names.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
pub(crate) fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }

    let names: Vec<_> = ACCESS_NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect();
    if names.is_empty() { format!("{:?}", access) } else { names.join(" | ") }
}
