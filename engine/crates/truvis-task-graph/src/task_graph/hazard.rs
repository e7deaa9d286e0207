//! 资源 hazard 分析
//!
//! 按插入顺序遍历每个节点声明的资源使用，把它和资源上一次的访问比较，
//! 产生依赖边和 barrier 描述。
//!
//! 分类规则（按优先级）：
//! 1. 第一次访问：image 需要从 `UNDEFINED` 做初始转换，buffer 不需要 barrier
//! 2. 队列族变化：当前节点 acquire，旧队列上的每个访问者都指向当前节点；
//!    release 要等拓扑排序之后才能确定放在哪个访问者之后
//! 3. image layout 变化：layout transition
//! 4. 之前的访问包含写：memory barrier
//! 5. 当前是写、之前只有读：execution barrier，不需要 access mask
//! 6. 读之后的读：没有 barrier，把 stage/access 合并进状态，
//!    这样之后的写会等待所有读者

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use ash::vk;

use super::access::{ResourceAccess, ResourceId};
use super::barrier::{BarrierDesc, BarrierKind};
use super::graph::DependencyGraph;
use super::state_table::{ResourceState, ResourceStateTable};

/// 一次访问被归入的 hazard 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hazard {
    FirstUse,
    QueueTransfer,
    LayoutTransition,
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
    ReadAfterRead,
}

/// 单个节点在编译期间收集到的 barrier
#[derive(Clone, Debug, Default)]
pub struct NodeBarriers {
    /// 录制之前发出
    pub pre: Vec<BarrierDesc>,
    /// 录制之后发出（队列族 release）
    pub post: Vec<BarrierDesc>,
}

/// 还没有确定位置的队列族 release
///
/// 旧队列上的访问者之间没有顺序约束，release 必须放在它们之中最后执行的那个之后，
/// 只能在拓扑排序之后决定。
#[derive(Clone, Debug)]
pub struct PendingRelease {
    /// 旧队列族上、上一次重置以来的所有访问者
    pub accessors: Vec<usize>,
    pub barrier: BarrierDesc,
}

/// hazard 分析的结果
#[derive(Debug)]
pub struct HazardOutcome {
    pub barriers: Vec<NodeBarriers>,
    pub releases: Vec<PendingRelease>,
    pub final_states: Vec<(ResourceId, ResourceState)>,
}

impl HazardOutcome {
    /// 按执行顺序把每个 release 放到最后一个旧访问者的 post barrier 中
    pub fn place_releases(&mut self, order: &[usize]) {
        let mut position = vec![0; self.barriers.len()];
        for (step, &node) in order.iter().enumerate() {
            position[node] = step;
        }

        for release in self.releases.drain(..) {
            let Some(&last) = release.accessors.iter().max_by_key(|&&node| position[node]) else {
                debug_assert!(false, "release of {:?} has no accessor", release.barrier.resource);
                continue;
            };
            self.barriers[last].post.push(release.barrier);
        }
    }
}

/// 资源的跟踪状态
///
/// 从上一次"重置"（写、layout 转换、队列转移）开始的访问都合并在 `access` 中。
#[derive(Debug)]
struct TrackedResource {
    access: ResourceAccess,
    queue_family: u32,

    /// 最近一次写或状态转换的节点
    producer: Option<usize>,
    /// producer 的 pre barrier 中负责转换的那一个，之后的读者会扩大它的 dst
    producer_barrier: Option<usize>,
    /// producer 之后的读者
    readers: Vec<usize>,
}

impl TrackedResource {
    fn seeded(state: &ResourceState) -> Self {
        Self {
            access: state.access,
            queue_family: state.queue_family,
            producer: None,
            producer_barrier: None,
            readers: Vec::new(),
        }
    }

    /// 当前节点成为新的 producer
    fn reset(&mut self, node: usize, queue_family: u32, access: ResourceAccess, barrier: Option<usize>) {
        self.access = access;
        self.queue_family = queue_family;
        self.producer = Some(node);
        self.producer_barrier = barrier;
        self.readers.clear();
    }

    /// 上一次重置以来访问过资源的所有节点
    fn accessors(&self) -> impl Iterator<Item = usize> + '_ {
        self.producer.into_iter().chain(self.readers.iter().copied())
    }

    /// barrier 的 src：合并后的 stage，只保留写 access
    fn src(&self) -> ResourceAccess {
        ResourceAccess::new(self.access.stage, self.access.src_access(), self.access.layout)
    }
}

pub struct HazardTracker<'s> {
    seed: Option<&'s ResourceStateTable>,
    resources: HashMap<ResourceId, TrackedResource>,
    barriers: Vec<NodeBarriers>,
    releases: Vec<PendingRelease>,
}

// new & init
impl<'s> HazardTracker<'s> {
    pub fn new(node_count: usize, seed: Option<&'s ResourceStateTable>) -> Self {
        Self {
            seed,
            resources: HashMap::new(),
            barriers: vec![NodeBarriers::default(); node_count],
            releases: Vec::new(),
        }
    }
}

// getters
impl HazardTracker<'_> {
    #[inline]
    pub fn barriers(&self, node: usize) -> &NodeBarriers {
        &self.barriers[node]
    }

    #[inline]
    pub fn releases(&self) -> &[PendingRelease] {
        &self.releases
    }
}

// tools
impl HazardTracker<'_> {
    /// 处理节点 `node` 对 `resource` 的一次访问
    ///
    /// 节点必须按插入顺序提交，产生的依赖边写入 `graph`。
    pub fn access(
        &mut self,
        graph: &mut DependencyGraph,
        node: usize,
        queue_family: u32,
        resource: ResourceId,
        access: ResourceAccess,
    ) -> Hazard {
        let state = match self.resources.entry(resource) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.seed.and_then(|table| table.get(&resource)) {
                Some(seeded) => entry.insert(TrackedResource::seeded(seeded)),
                None => {
                    entry.insert(Self::first_use(&mut self.barriers, node, queue_family, resource, access));
                    return Hazard::FirstUse;
                }
            },
        };

        let barriers = &mut self.barriers;
        if state.queue_family != queue_family {
            let src = state.src();
            let accessors: Vec<usize> = state.accessors().collect();
            if accessors.is_empty() {
                log::warn!(
                    "{:?} is owned by queue family {} from a previous batch, \
                     acquiring on {} without a matching release",
                    resource,
                    state.queue_family,
                    queue_family
                );
            } else {
                // 旧队列上的访问者之间不加边，每个访问者都排在 acquire 之前
                for &accessor in &accessors {
                    graph.add_resource_edge(accessor, node, resource);
                }

                let release_dst =
                    ResourceAccess::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, access.layout);
                self.releases.push(PendingRelease {
                    accessors,
                    barrier: BarrierDesc::new(BarrierKind::Release, resource, &src, &release_dst)
                        .queue_family_transfer(state.queue_family, queue_family),
                });
            }

            // acquire 的 src stage 和 semaphore wait 的 stage 对齐
            let acquire_src = ResourceAccess::new(access.stage, vk::AccessFlags2::NONE, src.layout);
            let index = Self::push_pre(
                barriers,
                node,
                BarrierDesc::new(BarrierKind::Acquire, resource, &acquire_src, &access)
                    .queue_family_transfer(state.queue_family, queue_family),
            );
            state.reset(node, queue_family, access, Some(index));
            Hazard::QueueTransfer
        } else if resource.is_image() && state.access.layout != access.layout {
            let barrier = BarrierDesc::new(BarrierKind::LayoutTransition, resource, &state.src(), &access);
            let index = Self::push_pre(barriers, node, barrier);
            for accessor in state.accessors() {
                graph.add_resource_edge(accessor, node, resource);
            }
            state.reset(node, queue_family, access, Some(index));
            Hazard::LayoutTransition
        } else if state.access.is_write() {
            let barrier = BarrierDesc::new(BarrierKind::Memory, resource, &state.src(), &access);
            Self::push_pre(barriers, node, barrier);

            if access.is_write() {
                for accessor in state.accessors() {
                    graph.add_resource_edge(accessor, node, resource);
                }
                state.reset(node, queue_family, access, None);
                Hazard::WriteAfterWrite
            } else {
                if let Some(producer) = state.producer {
                    graph.add_resource_edge(producer, node, resource);
                }
                // 写 access 保留在状态里，之后的读者同样需要 barrier
                state.readers.push(node);
                state.access.merge(&access);
                Hazard::ReadAfterWrite
            }
        } else if access.is_write() {
            let src = ResourceAccess::new(state.access.stage, vk::AccessFlags2::NONE, state.access.layout);
            let dst = ResourceAccess::new(access.stage, vk::AccessFlags2::NONE, access.layout);
            Self::push_pre(barriers, node, BarrierDesc::new(BarrierKind::Execution, resource, &src, &dst));
            for accessor in state.accessors() {
                graph.add_resource_edge(accessor, node, resource);
            }
            state.reset(node, queue_family, access, None);
            Hazard::WriteAfterRead
        } else {
            // 读之后的读：如果资源刚被转换过，
            // 读者必须排在转换之后，并且扩大转换 barrier 的 dst
            if let Some(producer) = state.producer {
                graph.add_resource_edge(producer, node, resource);
                if let Some(index) = state.producer_barrier {
                    debug_assert!(index < barriers[producer].pre.len(), "producer barrier slot missing");
                    if let Some(barrier) = barriers[producer].pre.get_mut(index) {
                        barrier.dst_stage |= access.stage;
                        barrier.dst_access |= access.access;
                    }
                }
            }
            state.readers.push(node);
            state.access.merge(&access);
            Hazard::ReadAfterRead
        }
    }

    /// 消费 tracker，返回每个节点的 barrier、待放置的 release 和每个资源最终的状态
    pub fn finish(self) -> HazardOutcome {
        let final_states = self
            .resources
            .into_iter()
            .map(|(resource, state)| {
                (
                    resource,
                    ResourceState {
                        access: state.access,
                        queue_family: state.queue_family,
                    },
                )
            })
            .collect();
        HazardOutcome {
            barriers: self.barriers,
            releases: self.releases,
            final_states,
        }
    }

    fn first_use(
        barriers: &mut [NodeBarriers],
        node: usize,
        queue_family: u32,
        resource: ResourceId,
        access: ResourceAccess,
    ) -> TrackedResource {
        let mut state = TrackedResource {
            access,
            queue_family,
            producer: None,
            producer_barrier: None,
            readers: Vec::new(),
        };

        match resource {
            ResourceId::Image(_) => {
                let barrier =
                    BarrierDesc::new(BarrierKind::InitialTransition, resource, &ResourceAccess::NONE, &access);
                let index = Self::push_pre(barriers, node, barrier);
                state.producer = Some(node);
                state.producer_barrier = Some(index);
            }
            ResourceId::Buffer(_) if access.is_write() => state.producer = Some(node),
            ResourceId::Buffer(_) => state.readers.push(node),
        }

        state
    }

    fn push_pre(barriers: &mut [NodeBarriers], node: usize, barrier: BarrierDesc) -> usize {
        let pre = &mut barriers[node].pre;
        pre.push(barrier);
        pre.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::task_graph::access::{BufferState, ImageState};

    fn buffer() -> ResourceId {
        ResourceId::Buffer(vk::Buffer::from_raw(0x10))
    }

    fn image() -> ResourceId {
        ResourceId::Image(vk::Image::from_raw(0x20))
    }

    #[test]
    fn test_first_buffer_use_has_no_barrier() {
        let mut graph = DependencyGraph::new(1);
        let mut tracker = HazardTracker::new(1, None);

        let hazard = tracker.access(&mut graph, 0, 0, buffer(), BufferState::STORAGE_WRITE_COMPUTE.into());
        assert_eq!(hazard, Hazard::FirstUse);
        assert!(tracker.barriers(0).pre.is_empty());
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_first_image_use_transitions_from_undefined() {
        let mut graph = DependencyGraph::new(1);
        let mut tracker = HazardTracker::new(1, None);

        tracker.access(&mut graph, 0, 0, image(), ImageState::TRANSFER_DST.into());
        let pre = &tracker.barriers(0).pre;
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].kind, BarrierKind::InitialTransition);
        assert_eq!(pre[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(pre[0].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn test_read_after_write_keeps_write_for_later_readers() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, buffer(), BufferState::STORAGE_WRITE_COMPUTE.into());
        let first = tracker.access(&mut graph, 1, 0, buffer(), BufferState::UNIFORM_COMPUTE.into());
        let second = tracker.access(&mut graph, 2, 0, buffer(), BufferState::STORAGE_READ_COMPUTE.into());

        assert_eq!(first, Hazard::ReadAfterWrite);
        assert_eq!(second, Hazard::ReadAfterWrite);
        for reader in [1, 2] {
            let pre = &tracker.barriers(reader).pre;
            assert_eq!(pre.len(), 1);
            assert_eq!(pre[0].kind, BarrierKind::Memory);
            assert_eq!(pre[0].src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        }
        // 两个读者都只依赖写者
        assert_eq!(graph.predecessors(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.predecessors(2).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_write_after_read_waits_for_every_reader() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, buffer(), BufferState::UNIFORM_COMPUTE.into());
        assert_eq!(
            tracker.access(&mut graph, 1, 0, buffer(), BufferState::INDIRECT_BUFFER.into()),
            Hazard::ReadAfterRead
        );
        let hazard = tracker.access(&mut graph, 2, 0, buffer(), BufferState::TRANSFER_DST.into());

        assert_eq!(hazard, Hazard::WriteAfterRead);
        let pre = &tracker.barriers(2).pre;
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].kind, BarrierKind::Execution);
        assert!(!pre[0].has_memory_dependency());
        assert!(pre[0].src_stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(pre[0].src_stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));

        let mut predecessors = graph.predecessors(2).collect::<Vec<_>>();
        predecessors.sort();
        assert_eq!(predecessors, vec![0, 1]);
    }

    #[test]
    fn test_readers_widen_layout_transition() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, image(), ImageState::STORAGE_WRITE_COMPUTE.into());
        let hazard = tracker.access(&mut graph, 1, 0, image(), ImageState::SHADER_READ_COMPUTE.into());
        assert_eq!(hazard, Hazard::LayoutTransition);

        // 第二个读者复用节点 1 的 layout transition
        let hazard = tracker.access(&mut graph, 2, 0, image(), ImageState::SHADER_READ_FRAGMENT.into());
        assert_eq!(hazard, Hazard::ReadAfterRead);
        assert!(tracker.barriers(2).pre.is_empty());

        let transition = &tracker.barriers(1).pre[0];
        assert!(transition.dst_stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert_eq!(graph.predecessors(2).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_queue_transfer_releases_on_last_accessor() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, buffer(), BufferState::STORAGE_WRITE_COMPUTE.into());
        tracker.access(&mut graph, 1, 0, buffer(), BufferState::STORAGE_READ_COMPUTE.into());
        let hazard = tracker.access(&mut graph, 2, 1, buffer(), BufferState::TRANSFER_SRC.into());

        assert_eq!(hazard, Hazard::QueueTransfer);
        let acquire = &tracker.barriers(2).pre;
        assert_eq!(acquire.len(), 1);
        assert_eq!(acquire[0].kind, BarrierKind::Acquire);
        assert_eq!(acquire[0].dst_access, vk::AccessFlags2::TRANSFER_READ);

        let mut predecessors = graph.predecessors(2).collect::<Vec<_>>();
        predecessors.sort();
        assert_eq!(predecessors, vec![0, 1]);

        let order = graph.topological_sort().unwrap();
        let mut outcome = tracker.finish();
        outcome.place_releases(&order);
        assert!(outcome.releases.is_empty());

        let release = &outcome.barriers[1].post;
        assert_eq!(release.len(), 1);
        assert_eq!(release[0].kind, BarrierKind::Release);
        assert_eq!((release[0].src_queue_family, release[0].dst_queue_family), (0, 1));
        assert_eq!(release[0].src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert!(outcome.barriers[0].post.is_empty());
    }

    #[test]
    fn test_queue_transfer_leaves_readers_unordered() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, buffer(), BufferState::UNIFORM_COMPUTE.into());
        tracker.access(&mut graph, 1, 0, buffer(), BufferState::INDIRECT_BUFFER.into());
        tracker.access(&mut graph, 2, 1, buffer(), BufferState::TRANSFER_DST.into());

        // 读者之间没有边，两种顺序都合法
        assert!(graph.predecessors(0).next().is_none());
        assert!(graph.predecessors(1).next().is_none());
        assert_eq!(tracker.releases().len(), 1);
        assert_eq!(tracker.releases()[0].accessors, vec![0, 1]);

        let outcome = tracker.finish();
        for (order, releasing) in [(vec![0, 1, 2], 1), (vec![1, 0, 2], 0)] {
            let mut placed = HazardOutcome {
                barriers: outcome.barriers.clone(),
                releases: outcome.releases.clone(),
                final_states: Vec::new(),
            };
            placed.place_releases(&order);

            assert_eq!(placed.barriers[releasing].post.len(), 1);
            assert!(placed.barriers[1 - releasing].post.is_empty());
            let release = &placed.barriers[releasing].post[0];
            assert!(release.src_stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
            assert!(release.src_stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
        }
    }

    #[test]
    fn test_image_queue_transfer_carries_layout_change() {
        let mut graph = DependencyGraph::new(2);
        let mut tracker = HazardTracker::new(2, None);

        tracker.access(&mut graph, 0, 0, image(), ImageState::STORAGE_WRITE_COMPUTE.into());
        let hazard = tracker.access(&mut graph, 1, 1, image(), ImageState::SHADER_READ_FRAGMENT.into());
        assert_eq!(hazard, Hazard::QueueTransfer);

        let mut outcome = tracker.finish();
        outcome.place_releases(&[0, 1]);

        let release = &outcome.barriers[0].post[0];
        let acquire = &outcome.barriers[1].pre[0];
        assert_eq!(release.kind, BarrierKind::Release);
        assert_eq!(acquire.kind, BarrierKind::Acquire);
        for barrier in [release, acquire] {
            assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
            assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!((barrier.src_queue_family, barrier.dst_queue_family), (0, 1));
        }
        assert_eq!(release.dst_access, vk::AccessFlags2::NONE);
        assert_eq!(acquire.src_access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_layout_change_after_reads_waits_for_every_reader() {
        let mut graph = DependencyGraph::new(3);
        let mut tracker = HazardTracker::new(3, None);

        tracker.access(&mut graph, 0, 0, image(), ImageState::SHADER_READ_FRAGMENT.into());
        tracker.access(&mut graph, 1, 0, image(), ImageState::SHADER_READ_COMPUTE.into());
        let hazard = tracker.access(&mut graph, 2, 0, image(), ImageState::TRANSFER_DST.into());

        assert_eq!(hazard, Hazard::LayoutTransition);
        let pre = &tracker.barriers(2).pre;
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].kind, BarrierKind::LayoutTransition);
        assert_eq!(pre[0].src_access, vk::AccessFlags2::NONE);
        assert!(pre[0].src_stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(pre[0].src_stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert_eq!(pre[0].old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(pre[0].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let mut predecessors = graph.predecessors(2).collect::<Vec<_>>();
        predecessors.sort();
        assert_eq!(predecessors, vec![0, 1]);
    }

    #[test]
    fn test_seeded_state_replaces_first_use() {
        let mut table = ResourceStateTable::new();
        table.insert(image(), ResourceState::new(ImageState::TRANSFER_DST, 0));

        let mut graph = DependencyGraph::new(1);
        let mut tracker = HazardTracker::new(1, Some(&table));
        let hazard = tracker.access(&mut graph, 0, 0, image(), ImageState::SHADER_READ_FRAGMENT.into());

        assert_eq!(hazard, Hazard::LayoutTransition);
        let pre = &tracker.barriers(0).pre;
        assert_eq!(pre[0].old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(pre[0].src_access, vk::AccessFlags2::TRANSFER_WRITE);

        let outcome = tracker.finish();
        assert_eq!(outcome.final_states.len(), 1);
        assert_eq!(outcome.final_states[0].1.access.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_seeded_foreign_queue_acquires_without_release() {
        let mut table = ResourceStateTable::new();
        table.insert(buffer(), ResourceState::new(BufferState::TRANSFER_DST, 2));

        let mut graph = DependencyGraph::new(1);
        let mut tracker = HazardTracker::new(1, Some(&table));
        let hazard = tracker.access(&mut graph, 0, 0, buffer(), BufferState::VERTEX_BUFFER.into());

        assert_eq!(hazard, Hazard::QueueTransfer);
        assert_eq!(tracker.barriers(0).pre[0].kind, BarrierKind::Acquire);
        assert!(graph.edges().is_empty());
        assert!(tracker.releases().is_empty());
    }
}
