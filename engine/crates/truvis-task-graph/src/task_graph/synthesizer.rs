//! 提交分组与跨队列 semaphore 分配
//!
//! 按拓扑顺序遍历节点：队列族变化时开始一个新的 submission；
//! 每条跨队列族的依赖边分配一个 binary semaphore，
//! producer 所在 submission signal，consumer 所在 submission wait。
//! 同一队列族内的依赖由 hazard 分析生成的 barrier 保证。

use std::ops::Range;

use ash::vk;

use super::graph::{DependencyEdge, DependencyGraph};
use super::node::TaskNode;

/// 编译期分配的 semaphore 编号
///
/// 稠密分配，提交层按 `ExecutableGraph::semaphore_count()` 创建对应数量的 binary semaphore。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreInfo {
    pub semaphore: SemaphoreId,
    /// wait 时是等待的 stage，signal 时是需要完成的 stage
    pub stage: vk::PipelineStageFlags2,
}

impl SemaphoreInfo {
    #[inline]
    pub fn new(semaphore: SemaphoreId, stage: vk::PipelineStageFlags2) -> Self {
        Self { semaphore, stage }
    }
}

/// 一次队列提交：连续的、同一队列族的 step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub queue_family: u32,
    /// 在 `ExecutableGraph::steps()` 中的范围
    pub steps: Range<usize>,
    pub wait_semaphores: Vec<SemaphoreInfo>,
    pub signal_semaphores: Vec<SemaphoreInfo>,
}

/// 同步方案
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub submissions: Vec<Submission>,
    /// 拓扑位置 -> submission 索引
    pub step_submission: Vec<usize>,
    /// 节点索引 -> 需要等待的 semaphore
    pub waits: Vec<Vec<SemaphoreInfo>>,
    /// 节点索引 -> 需要发出的 semaphore
    pub signals: Vec<Vec<SemaphoreInfo>>,
    pub semaphore_count: u32,
}

/// 边上资源在节点中使用的 stage 并集，显式边返回 `ALL_COMMANDS`
fn edge_stage(node: &TaskNode<'_>, edge: &DependencyEdge) -> vk::PipelineStageFlags2 {
    let stage = edge
        .resources
        .iter()
        .filter_map(|resource| node.usage(resource))
        .fold(vk::PipelineStageFlags2::NONE, |acc, access| acc | access.stage);

    if edge.explicit || stage.is_empty() { vk::PipelineStageFlags2::ALL_COMMANDS } else { stage }
}

/// 根据拓扑顺序生成 submission 和 semaphore
///
/// `nodes` 按节点索引排列（与 `graph` 一致）。
pub fn synthesize(order: &[usize], graph: &DependencyGraph, nodes: &[TaskNode<'_>]) -> SyncPlan {
    let _span = profile_span!("TaskGraph::synthesize");

    let mut plan = SyncPlan {
        waits: vec![Vec::new(); nodes.len()],
        signals: vec![Vec::new(); nodes.len()],
        step_submission: Vec::with_capacity(order.len()),
        ..Default::default()
    };

    // 1. 分组
    for (position, &node) in order.iter().enumerate() {
        let queue_family = nodes[node].queue_family;
        match plan.submissions.last_mut() {
            Some(submission) if submission.queue_family == queue_family => submission.steps.end = position + 1,
            _ => plan.submissions.push(Submission {
                queue_family,
                steps: position..position + 1,
                wait_semaphores: Vec::new(),
                signal_semaphores: Vec::new(),
            }),
        }
        plan.step_submission.push(plan.submissions.len() - 1);
    }

    // 2. 每条跨队列的边一个 semaphore，按拓扑顺序分配编号
    for &producer in order {
        for edge in graph.out_edges(producer) {
            let consumer = edge.consumer;
            if nodes[producer].queue_family == nodes[consumer].queue_family {
                continue;
            }

            let semaphore = SemaphoreId(plan.semaphore_count);
            plan.semaphore_count += 1;

            plan.signals[producer].push(SemaphoreInfo::new(semaphore, edge_stage(&nodes[producer], edge)));
            plan.waits[consumer].push(SemaphoreInfo::new(semaphore, edge_stage(&nodes[consumer], edge)));

            log::debug!(
                "semaphore {:?}: \"{}\" (queue {}) -> \"{}\" (queue {})",
                semaphore,
                nodes[producer].name,
                nodes[producer].queue_family,
                nodes[consumer].name,
                nodes[consumer].queue_family
            );
        }
    }

    // 3. 汇总到 submission
    for submission in &mut plan.submissions {
        for &node in &order[submission.steps.clone()] {
            submission.wait_semaphores.extend_from_slice(&plan.waits[node]);
            submission.signal_semaphores.extend_from_slice(&plan.signals[node]);
        }
    }

    plan
}
