//! TaskGraph 构建器
//!
//! 提供 `TaskGraphBuilder` 用于声明任务节点和显式依赖，
//! `compile()` 消费 builder，生成 [`ExecutableGraph`]。

use std::collections::HashMap;

use indexmap::IndexMap;
use indexmap::map::Entry;

use ash::vk;

use super::access::{ResourceAccess, ResourceId};
use super::error::{TaskGraphError, TaskGraphResult};
use super::executable::{ExecutableGraph, Step};
use super::graph::DependencyGraph;
use super::hazard::{HazardOutcome, HazardTracker, NodeBarriers};
use super::node::{NodeHandle, TaskContext, TaskNode, TaskOperation, TaskUsage};
use super::state_table::{ResourceState, ResourceStateTable};
use super::synthesizer::{SyncPlan, synthesize};
use crate::arena::Arena;
use crate::config::TaskGraphConfig;

/// TaskGraph 构建器
///
/// # 使用流程
///
/// 1. 创建 builder: `TaskGraphBuilder::new()`
/// 2. 添加节点: `builder.add_node("name", queue_family, usages, |ctx| { ... })`
///    或者 `builder.add_task("name", queue_family, task)`
/// 3. 可选的显式依赖: `builder.add_edge(a, b)`
/// 4. 编译: `builder.compile()`
///
/// # 生命周期
///
/// `'a` 是录制回调可以借用的外部数据的生命周期，
/// 回调可以直接引用外部的 pipeline、device 等，不需要 Rc/Arc 包装。
pub struct TaskGraphBuilder<'a> {
    nodes: Arena<TaskNode<'a>>,
    /// 下一个节点的插入序号
    next_sequence: u64,
    config: TaskGraphConfig,
}

impl Default for TaskGraphBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<'a> TaskGraphBuilder<'a> {
    pub fn new() -> Self {
        Self::with_config(TaskGraphConfig::default())
    }

    pub fn with_config(config: TaskGraphConfig) -> Self {
        let nodes = match config.node_capacity {
            Some(capacity) => Arena::with_capacity_limit(capacity),
            None => Arena::new(),
        };

        Self {
            nodes,
            next_sequence: 0,
            config,
        }
    }
}

// getters
impl<'a> TaskGraphBuilder<'a> {
    #[inline]
    pub fn config(&self) -> &TaskGraphConfig {
        &self.config
    }

    #[inline]
    pub fn node(&self, handle: NodeHandle) -> TaskGraphResult<&TaskNode<'a>> {
        Ok(self.nodes.get(handle.0)?)
    }

    #[inline]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains(handle.0)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 显式边的数量
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|(_, node)| node.out_edges.len()).sum()
    }

    /// 按 arena 槽位顺序遍历节点
    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &TaskNode<'a>)> {
        self.nodes.iter().map(|(handle, node)| (NodeHandle(handle), node))
    }
}

// 构建
impl<'a> TaskGraphBuilder<'a> {
    /// 添加任务节点
    ///
    /// # 参数
    /// - `name`: 节点名称（用于调试和日志）
    /// - `queue_family`: 节点提交到的队列族
    /// - `usages`: 节点访问的资源，同一个资源只能出现一次
    /// - `record`: 录制回调，在执行时以 [`TaskContext`] 调用
    pub fn add_node<F>(
        &mut self,
        name: impl Into<String>,
        queue_family: u32,
        usages: impl IntoIterator<Item = TaskUsage>,
        record: F,
    ) -> TaskGraphResult<NodeHandle>
    where
        F: Fn(&TaskContext<'_>) + 'a,
    {
        let name = name.into();

        let mut usage_map = IndexMap::new();
        for usage in usages {
            if self.config.validate_usages {
                validate_usage(&name, &usage)?;
            }
            match usage_map.entry(usage.resource) {
                Entry::Occupied(_) => {
                    return Err(TaskGraphError::DuplicateResource {
                        node: name,
                        resource: usage.resource,
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(usage.access);
                }
            }
        }

        let node = TaskNode {
            name,
            queue_family,
            usages: usage_map,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            sequence: self.next_sequence,
            record: Box::new(record),
        };

        let handle = NodeHandle(self.nodes.emplace(node)?);
        self.next_sequence += 1;
        Ok(handle)
    }

    /// 添加实现了 [`TaskOperation`] 的任务
    ///
    /// 插入时立即收集资源使用，之后只保留录制闭包。
    pub fn add_task<T>(&mut self, name: impl Into<String>, queue_family: u32, task: T) -> TaskGraphResult<NodeHandle>
    where
        T: TaskOperation + 'a,
    {
        let usages = task.usages();
        self.add_node(name, queue_family, usages, move |ctx| task.record(ctx))
    }

    /// 添加显式依赖：`from` 在 `to` 之前执行
    ///
    /// 重复添加同一条边没有效果。显式边只约束顺序，不产生 barrier；
    /// 跨队列族时会分配 semaphore。
    pub fn add_edge(&mut self, from: NodeHandle, to: NodeHandle) -> TaskGraphResult<()> {
        self.nodes.get(to.0)?;
        let from_node = self.nodes.get_mut(from.0)?;
        if from_node.out_edges.contains(&to) {
            return Ok(());
        }
        from_node.out_edges.push(to);
        self.nodes.get_unchecked_mut(to.0.index()).in_edges.push(from);
        Ok(())
    }

    /// 删除显式依赖，返回边是否存在
    pub fn remove_edge(&mut self, from: NodeHandle, to: NodeHandle) -> TaskGraphResult<bool> {
        self.nodes.get(to.0)?;
        let from_node = self.nodes.get_mut(from.0)?;
        let Some(position) = from_node.out_edges.iter().position(|&handle| handle == to) else {
            return Ok(false);
        };
        from_node.out_edges.remove(position);
        self.nodes.get_unchecked_mut(to.0.index()).in_edges.retain(|&handle| handle != from);
        Ok(true)
    }

    /// 删除节点
    ///
    /// 先把节点从所有相邻节点的边表中摘除，再回收槽位，之后旧句柄会被识别为 stale。
    pub fn remove_node(&mut self, handle: NodeHandle) -> TaskGraphResult<()> {
        let node = self.nodes.get(handle.0)?;
        let sources = node.in_edges.clone();
        let targets = node.out_edges.clone();

        for source in sources.into_iter().filter(|&source| source != handle) {
            self.neighbor_mut(source)?.out_edges.retain(|&target| target != handle);
        }
        for target in targets.into_iter().filter(|&target| target != handle) {
            self.neighbor_mut(target)?.in_edges.retain(|&source| source != handle);
        }

        self.nodes.remove(handle.0)?;
        Ok(())
    }

    /// 边表中记录的相邻节点必须存活
    fn neighbor_mut(&mut self, handle: NodeHandle) -> TaskGraphResult<&mut TaskNode<'a>> {
        match self.nodes.get_mut(handle.0) {
            Ok(node) => Ok(node),
            Err(err) => {
                debug_assert!(false, "edge list references a dead node {:?}: {}", handle, err);
                Err(TaskGraphError::InternalBug(format!("edge list references a dead node {:?}: {}", handle, err)))
            }
        }
    }
}

// 编译
impl<'a> TaskGraphBuilder<'a> {
    /// 编译任务图
    ///
    /// 执行 hazard 分析、拓扑排序、submission 与 semaphore 分配。
    /// 资源状态只在本次编译内有效。
    ///
    /// # Errors
    /// 依赖存在环时返回 [`TaskGraphError::CycleDetected`]，不会产生部分结果。
    pub fn compile(self) -> TaskGraphResult<ExecutableGraph<'a>> {
        self.compile_inner(None).map(|(graph, _)| graph)
    }

    /// 带外部资源状态表的编译
    ///
    /// 表中已有的资源以记录的状态作为起点；编译成功后，
    /// 本次涉及的资源在表中被更新为批次结束时的状态。编译失败时表保持不变。
    pub fn compile_with_states(self, states: &mut ResourceStateTable) -> TaskGraphResult<ExecutableGraph<'a>> {
        let (graph, final_states) = self.compile_inner(Some(&*states))?;
        states.apply(final_states);
        Ok(graph)
    }

    fn compile_inner(
        mut self,
        seed: Option<&ResourceStateTable>,
    ) -> TaskGraphResult<(ExecutableGraph<'a>, Vec<(ResourceId, ResourceState)>)> {
        let _span = profile_span!("TaskGraphBuilder::compile");

        // 1. 按插入顺序取出节点，分配稠密索引
        let mut entries: Vec<_> = self.nodes.drain().map(|(handle, node)| (NodeHandle(handle), node)).collect();
        entries.sort_by_key(|(_, node)| node.sequence);
        let (handles, nodes): (Vec<NodeHandle>, Vec<TaskNode<'a>>) = entries.into_iter().unzip();
        let dense: HashMap<NodeHandle, usize> =
            handles.iter().enumerate().map(|(index, &handle)| (handle, index)).collect();

        // 2. 显式边
        let mut graph = DependencyGraph::new(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            for target in &node.out_edges {
                let Some(&consumer) = dense.get(target) else {
                    debug_assert!(false, "\"{}\" has an edge to a removed node {:?}", node.name, target);
                    return Err(TaskGraphError::InternalBug(format!(
                        "\"{}\" has an edge to a removed node {:?}",
                        node.name, target
                    )));
                };
                graph.add_explicit_edge(index, consumer);
            }
        }

        // 3. 资源 hazard，按插入顺序
        let mut outcome = {
            let _span = profile_span!("TaskGraph::hazards");

            let mut tracker = HazardTracker::new(nodes.len(), seed);
            for (index, node) in nodes.iter().enumerate() {
                for (&resource, &access) in &node.usages {
                    let hazard = tracker.access(&mut graph, index, node.queue_family, resource, access);
                    log::debug!("\"{}\" {:?}: {:?}", node.name, resource, hazard);
                }
            }
            tracker.finish()
        };

        // 4. 拓扑排序，之后才能确定队列族 release 的位置
        let order = graph.topological_sort().map_err(|remaining| {
            let names: Vec<String> = remaining.iter().map(|&index| nodes[index].name.clone()).collect();
            log::error!("task graph contains a cycle, unresolved nodes: {:?}", names);
            TaskGraphError::CycleDetected { nodes: names }
        })?;
        outcome.place_releases(&order);
        let HazardOutcome {
            barriers: node_barriers,
            final_states,
            ..
        } = outcome;

        // 5. submission 与 semaphore
        let SyncPlan {
            submissions,
            step_submission,
            mut waits,
            mut signals,
            semaphore_count,
        } = synthesize(&order, &graph, &nodes);

        // 6. 生成 step
        let mut position = vec![0; nodes.len()];
        for (step_index, &node) in order.iter().enumerate() {
            position[node] = step_index;
        }

        let mut pending: Vec<Option<(TaskNode<'a>, NodeBarriers)>> =
            nodes.into_iter().zip(node_barriers).map(Some).collect();
        let mut steps = Vec::with_capacity(order.len());
        for (step_index, &index) in order.iter().enumerate() {
            let Some((node, barriers)) = pending[index].take() else {
                debug_assert!(false, "node {} appears twice in the topological order", index);
                return Err(TaskGraphError::InternalBug(format!(
                    "node {} appears twice in the topological order",
                    index
                )));
            };

            steps.push(Step {
                name: node.name,
                node: handles[index],
                queue_family: node.queue_family,
                submission: step_submission[step_index],
                usages: node.usages,
                barriers: barriers.pre,
                release_barriers: barriers.post,
                wait_semaphores: std::mem::take(&mut waits[index]),
                signal_semaphores: std::mem::take(&mut signals[index]),
                record: node.record,
            });
        }

        let edges = graph
            .into_edges()
            .into_iter()
            .map(|mut edge| {
                edge.producer = position[edge.producer];
                edge.consumer = position[edge.consumer];
                edge
            })
            .collect();

        let executable = ExecutableGraph {
            steps,
            submissions,
            edges,
            semaphore_count,
        };

        log::info!(
            "task graph compiled: {} steps, {} edges, {} barriers, {} submissions, {} semaphores",
            executable.len(),
            executable.edges().len(),
            executable.barrier_count(),
            executable.submissions().len(),
            executable.semaphore_count()
        );
        if self.config.print_execution_plan {
            executable.print_execution_plan();
        }

        Ok((executable, final_states))
    }
}

/// 检查单个资源使用是否合法
fn validate_usage(node: &str, usage: &TaskUsage) -> TaskGraphResult<()> {
    let ResourceAccess { stage, access, layout } = usage.access;

    let reason = if stage.is_empty() {
        Some("empty pipeline stage mask")
    } else {
        match usage.resource {
            ResourceId::Buffer(_) if layout != vk::ImageLayout::UNDEFINED => {
                Some("buffer usage declares an image layout")
            }
            ResourceId::Buffer(_) if access.is_empty() => Some("empty access mask"),
            ResourceId::Image(_)
                if layout == vk::ImageLayout::UNDEFINED || layout == vk::ImageLayout::PREINITIALIZED =>
            {
                Some("image usage requires a concrete layout")
            }
            _ => None,
        }
    };

    match reason {
        Some(reason) => Err(TaskGraphError::UnsupportedUsage {
            node: node.to_string(),
            resource: usage.resource,
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;

    use super::*;
    use crate::arena::ArenaError;
    use crate::task_graph::access::{BufferState, ImageState, WRITE_ACCESS};
    use crate::task_graph::barrier::BarrierKind;
    use crate::task_graph::synthesizer::SemaphoreId;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    fn image(raw: u64) -> vk::Image {
        vk::Image::from_raw(raw)
    }

    fn add(
        builder: &mut TaskGraphBuilder<'_>,
        name: &str,
        queue_family: u32,
        usages: impl IntoIterator<Item = TaskUsage>,
    ) -> NodeHandle {
        builder.add_node(name, queue_family, usages, |_| {}).unwrap()
    }

    fn position(graph: &ExecutableGraph<'_>, name: &str) -> usize {
        graph.position_by_name(name).unwrap()
    }

    #[test]
    fn test_dag_compiles_every_node() {
        truvis_crate_tools::init_log::init_test_log();

        let mut builder = TaskGraphBuilder::new();
        let upload = add(&mut builder, "upload", 0, [TaskUsage::buffer(buffer(1), BufferState::TRANSFER_DST)]);
        add(
            &mut builder,
            "simulate",
            0,
            [
                TaskUsage::buffer(buffer(1), BufferState::STORAGE_READ_COMPUTE),
                TaskUsage::image(image(2), ImageState::STORAGE_WRITE_COMPUTE),
            ],
        );
        add(&mut builder, "shade", 0, [TaskUsage::image(image(2), ImageState::SHADER_READ_FRAGMENT)]);
        let stats = add(&mut builder, "stats", 0, []);
        builder.add_edge(upload, stats).unwrap();

        let graph = builder.compile().unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.edges().iter().all(|edge| edge.producer < edge.consumer));
        assert!(position(&graph, "upload") < position(&graph, "simulate"));
        assert!(position(&graph, "simulate") < position(&graph, "shade"));
        assert!(position(&graph, "upload") < position(&graph, "stats"));
    }

    #[test]
    fn test_print_execution_plan_from_config() {
        truvis_crate_tools::init_log::init_test_log();

        let config = TaskGraphConfig::from_toml_str("print_execution_plan = true").unwrap();
        let mut builder = TaskGraphBuilder::with_config(config);
        add(&mut builder, "render", 0, [TaskUsage::image(image(1), ImageState::COLOR_ATTACHMENT_WRITE)]);
        add(&mut builder, "post", 1, [TaskUsage::image(image(1), ImageState::STORAGE_READ_WRITE_COMPUTE)]);
        add(&mut builder, "present", 0, [TaskUsage::image(image(1), ImageState::PRESENT)]);

        let graph = builder.compile().unwrap();
        assert_eq!(graph.submissions().len(), 3);
        assert_eq!(graph.semaphore_count(), 2);
        assert_eq!(graph.barrier_count(), 5);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, []);
        let b = add(&mut builder, "b", 0, []);
        add(&mut builder, "c", 0, []);
        builder.add_edge(a, b).unwrap();
        builder.add_edge(b, a).unwrap();

        match builder.compile() {
            Err(TaskGraphError::CycleDetected { mut nodes }) => {
                nodes.sort();
                assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected a cycle, got {:?}", other.map(|graph| graph.len())),
        }
    }

    #[test]
    fn test_write_after_write_orders_and_syncs() {
        let mut builder = TaskGraphBuilder::new();
        let r = TaskUsage::buffer(buffer(7), BufferState::STORAGE_WRITE_COMPUTE);
        add(&mut builder, "w1", 0, [r]);
        add(&mut builder, "w2", 0, [r]);

        let graph = builder.compile().unwrap();
        let (w1, w2) = (position(&graph, "w1"), position(&graph, "w2"));
        assert!(w1 < w2);

        let barriers: Vec<_> = graph.steps()[w2].barriers_for(r.resource).collect();
        assert_eq!(barriers.len(), 1);
        assert!(barriers[0].src_access.intersects(WRITE_ACCESS));
        assert!(!barriers[0].dst_access.is_empty());
        assert!(graph.steps()[w1].barriers().is_empty());
    }

    #[test]
    fn test_read_after_read_is_unconstrained() {
        let mut builder = TaskGraphBuilder::new();
        let r = TaskUsage::buffer(buffer(7), BufferState::UNIFORM_COMPUTE);
        add(&mut builder, "r1", 0, [r]);
        add(&mut builder, "r2", 0, [r]);

        let graph = builder.compile().unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.edges().is_empty());
        assert!(graph.steps().iter().all(|step| !step.has_barriers()));
    }

    #[test]
    fn test_cross_queue_handoff() {
        let mut builder = TaskGraphBuilder::new();
        add(&mut builder, "w", 0, [TaskUsage::buffer(buffer(3), BufferState::STORAGE_WRITE_COMPUTE)]);
        add(&mut builder, "r", 1, [TaskUsage::buffer(buffer(3), BufferState::TRANSFER_SRC)]);

        let graph = builder.compile().unwrap();
        assert_eq!(graph.semaphore_count(), 1);

        let submissions = graph.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].queue_family, 0);
        assert_eq!(submissions[0].signal_semaphores[0].semaphore, SemaphoreId(0));
        assert_eq!(submissions[1].queue_family, 1);
        assert_eq!(submissions[1].wait_semaphores[0].semaphore, SemaphoreId(0));

        let w = &graph.steps()[position(&graph, "w")];
        assert_eq!(w.release_barriers().len(), 1);
        assert_eq!(w.release_barriers()[0].kind, BarrierKind::Release);

        let r = &graph.steps()[position(&graph, "r")];
        assert_eq!(r.barriers().len(), 1);
        assert_eq!(r.barriers()[0].kind, BarrierKind::Acquire);
        assert_eq!((r.barriers()[0].src_queue_family, r.barriers()[0].dst_queue_family), (0, 1));
    }

    #[test]
    fn test_queue_transfer_respects_explicit_reader_order() {
        truvis_crate_tools::init_log::init_test_log();

        let mut builder = TaskGraphBuilder::new();
        let resource = buffer(9);
        let r1 = add(&mut builder, "r1", 0, [TaskUsage::buffer(resource, BufferState::STORAGE_READ_COMPUTE)]);
        let r2 = add(&mut builder, "r2", 0, [TaskUsage::buffer(resource, BufferState::STORAGE_READ_COMPUTE)]);
        builder.add_edge(r2, r1).unwrap();
        add(&mut builder, "w", 1, [TaskUsage::buffer(resource, BufferState::TRANSFER_DST)]);

        let graph = builder.compile().unwrap();
        let (r1, r2, w) = (position(&graph, "r1"), position(&graph, "r2"), position(&graph, "w"));
        assert!(r2 < r1);
        assert!(r1 < w);

        // release 跟在旧队列上最后执行的读者之后
        assert!(graph.steps()[r2].release_barriers().is_empty());
        let release = graph.steps()[r1].release_barriers();
        assert_eq!(release.len(), 1);
        assert_eq!(release[0].kind, BarrierKind::Release);
        assert_eq!(graph.steps()[w].barriers()[0].kind, BarrierKind::Acquire);

        // 两个读者都通过 semaphore 通知写者
        assert_eq!(graph.semaphore_count(), 2);
        assert_eq!(graph.steps()[w].wait_semaphores().len(), 2);
    }

    #[test]
    fn test_second_write_waits_for_intermediate_reader() {
        let mut builder = TaskGraphBuilder::new();
        let resource = buffer(5);
        add(&mut builder, "w1", 0, [TaskUsage::buffer(resource, BufferState::STORAGE_WRITE_COMPUTE)]);
        add(&mut builder, "rd", 0, [TaskUsage::buffer(resource, BufferState::INDIRECT_BUFFER)]);
        add(&mut builder, "w2", 0, [TaskUsage::buffer(resource, BufferState::TRANSFER_DST)]);

        let graph = builder.compile().unwrap();
        assert!(position(&graph, "w1") < position(&graph, "rd"));
        assert!(position(&graph, "rd") < position(&graph, "w2"));

        let w2 = &graph.steps()[position(&graph, "w2")];
        assert_eq!(w2.barriers().len(), 1);
        assert!(w2.barriers()[0].src_stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
    }

    #[test]
    fn test_image_first_use_transitions() {
        let mut builder = TaskGraphBuilder::new();
        add(&mut builder, "clear", 0, [TaskUsage::image(image(1), ImageState::TRANSFER_DST)]);

        let graph = builder.compile().unwrap();
        let barriers = graph.steps()[0].barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].kind, BarrierKind::InitialTransition);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_explicit_cross_queue_edge_gets_semaphore() {
        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, []);
        let b = add(&mut builder, "b", 2, []);
        builder.add_edge(a, b).unwrap();

        let graph = builder.compile().unwrap();
        assert_eq!(graph.semaphore_count(), 1);
        let b = &graph.steps()[graph.position_of(b).unwrap()];
        assert_eq!(b.wait_semaphores()[0].stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert!(!b.has_barriers());
    }

    #[test]
    fn test_removed_node_handle_is_stale() {
        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, []);
        builder.remove_node(a).unwrap();
        let b = add(&mut builder, "b", 0, []);

        assert_eq!(a.index(), b.index());
        assert!(b.generation() > a.generation());
        assert!(matches!(builder.node(a), Err(TaskGraphError::Arena(ArenaError::StaleHandle { .. }))));
        assert_eq!(builder.node(b).unwrap().name(), "b");
        assert!(matches!(builder.remove_node(a), Err(TaskGraphError::Arena(ArenaError::StaleHandle { .. }))));
    }

    #[test]
    fn test_remove_node_detaches_edges() {
        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, []);
        let b = add(&mut builder, "b", 0, []);
        let c = add(&mut builder, "c", 0, []);
        builder.add_edge(a, b).unwrap();
        builder.add_edge(b, c).unwrap();
        assert_eq!(builder.edge_count(), 2);

        builder.remove_node(b).unwrap();
        assert_eq!(builder.node_count(), 2);
        assert_eq!(builder.edge_count(), 0);
        assert!(builder.node(a).unwrap().out_edges().is_empty());
        assert!(builder.node(c).unwrap().in_edges().is_empty());

        assert_eq!(builder.compile().unwrap().len(), 2);
    }

    #[test]
    fn test_add_and_remove_edge() {
        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, []);
        let b = add(&mut builder, "b", 0, []);

        builder.add_edge(a, b).unwrap();
        builder.add_edge(a, b).unwrap();
        assert_eq!(builder.edge_count(), 1);

        assert!(builder.remove_edge(a, b).unwrap());
        assert!(!builder.remove_edge(a, b).unwrap());
        assert!(builder.node(b).unwrap().in_edges().is_empty());
    }

    #[test]
    fn test_usage_validation() {
        let mut builder = TaskGraphBuilder::new();

        let duplicate = builder.add_node(
            "dup",
            0,
            [
                TaskUsage::buffer(buffer(1), BufferState::UNIFORM_COMPUTE),
                TaskUsage::buffer(buffer(1), BufferState::TRANSFER_DST),
            ],
            |_| {},
        );
        assert!(matches!(duplicate, Err(TaskGraphError::DuplicateResource { .. })));

        let undefined_layout = builder.add_node(
            "undefined",
            0,
            [TaskUsage::new(
                ResourceId::Image(image(2)),
                ResourceAccess::new(
                    vk::PipelineStageFlags2::COMPUTE_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_READ,
                    vk::ImageLayout::UNDEFINED,
                ),
            )],
            |_| {},
        );
        assert!(matches!(undefined_layout, Err(TaskGraphError::UnsupportedUsage { .. })));

        let no_stage = TaskUsage::new(
            ResourceId::Buffer(buffer(3)),
            ResourceAccess::new(
                vk::PipelineStageFlags2::NONE,
                vk::AccessFlags2::UNIFORM_READ,
                vk::ImageLayout::UNDEFINED,
            ),
        );
        assert!(matches!(
            builder.add_node("no_stage", 0, [no_stage], |_| {}),
            Err(TaskGraphError::UnsupportedUsage { .. })
        ));

        // 失败的 add_node 不占用节点
        assert_eq!(builder.node_count(), 0);

        // present 没有 access，但有 layout
        assert!(builder.add_node("present", 0, [TaskUsage::image(image(4), ImageState::PRESENT)], |_| {}).is_ok());

        let mut relaxed = TaskGraphBuilder::with_config(TaskGraphConfig {
            validate_usages: false,
            ..Default::default()
        });
        assert!(relaxed.add_node("no_stage", 0, [no_stage], |_| {}).is_ok());
    }

    #[test]
    fn test_node_capacity() {
        let mut builder = TaskGraphBuilder::with_config(TaskGraphConfig {
            node_capacity: Some(1),
            ..Default::default()
        });
        add(&mut builder, "only", 0, []);

        let result = builder.add_node("overflow", 0, [], |_| {});
        assert!(matches!(result, Err(TaskGraphError::Arena(ArenaError::CapacityExhausted { .. }))));
    }

    struct FillBuffer<'r> {
        buffer: vk::Buffer,
        log: &'r RefCell<Vec<String>>,
    }

    impl TaskOperation for FillBuffer<'_> {
        fn usages(&self) -> Vec<TaskUsage> {
            vec![TaskUsage::buffer(self.buffer, BufferState::TRANSFER_DST)]
        }

        fn record(&self, ctx: &TaskContext<'_>) {
            self.log.borrow_mut().push(format!("{}@{}#{}", ctx.name, ctx.queue_family, ctx.step_index));
        }
    }

    #[test]
    fn test_add_task_records_through_context() {
        let calls = RefCell::new(Vec::new());

        let mut builder = TaskGraphBuilder::new();
        builder.add_task("fill", 2, FillBuffer { buffer: buffer(9), log: &calls }).unwrap();
        builder
            .add_node("read", 2, [TaskUsage::buffer(buffer(9), BufferState::TRANSFER_SRC)], |ctx| {
                calls.borrow_mut().push(format!("{}@{}#{}", ctx.name, ctx.queue_family, ctx.step_index));
            })
            .unwrap();

        let graph = builder.compile().unwrap();
        for index in 0..graph.len() {
            graph.record_step(index, vk::CommandBuffer::null());
        }

        assert_eq!(*calls.borrow(), vec!["fill@2#0".to_string(), "read@2#1".to_string()]);
    }

    #[test]
    fn test_record_step_reports_real_position() {
        let calls = RefCell::new(Vec::new());

        let mut builder = TaskGraphBuilder::new();
        for name in ["a", "b", "c"] {
            builder
                .add_node(name, 0, [], |ctx| {
                    calls.borrow_mut().push((ctx.name.to_string(), ctx.step_index));
                })
                .unwrap();
        }

        let graph = builder.compile().unwrap();
        for index in (0..graph.len()).rev() {
            graph.record_step(index, vk::CommandBuffer::null());
        }

        for (name, step_index) in calls.borrow().iter() {
            assert_eq!(graph.position_by_name(name), Some(*step_index));
        }
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn test_state_table_carries_layout_between_batches() {
        let target = image(11);
        let mut states = ResourceStateTable::new();

        let mut first = TaskGraphBuilder::new();
        add(&mut first, "draw", 0, [TaskUsage::image(target, ImageState::COLOR_ATTACHMENT_WRITE)]);
        first.compile_with_states(&mut states).unwrap();

        let recorded = states.get(&ResourceId::Image(target)).unwrap();
        assert_eq!(recorded.access.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let mut second = TaskGraphBuilder::new();
        add(&mut second, "sample", 0, [TaskUsage::image(target, ImageState::SHADER_READ_FRAGMENT)]);
        let graph = second.compile_with_states(&mut states).unwrap();

        let barrier = &graph.steps()[0].barriers()[0];
        assert_eq!(barrier.kind, BarrierKind::LayoutTransition);
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_failed_compile_leaves_state_table_untouched() {
        let target = image(12);
        let mut states = ResourceStateTable::new();
        states.insert(ResourceId::Image(target), ResourceState::new(ImageState::TRANSFER_DST, 0));

        let mut builder = TaskGraphBuilder::new();
        let a = add(&mut builder, "a", 0, [TaskUsage::image(target, ImageState::SHADER_READ_COMPUTE)]);
        let b = add(&mut builder, "b", 0, []);
        builder.add_edge(a, b).unwrap();
        builder.add_edge(b, a).unwrap();

        assert!(builder.compile_with_states(&mut states).is_err());
        let state = states.get(&ResourceId::Image(target)).unwrap();
        assert_eq!(state.access.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
