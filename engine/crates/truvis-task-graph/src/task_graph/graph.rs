//! 依赖图和拓扑排序
//!
//! 节点用编译期的稠密索引（`0..node_count`）表示，边来自显式声明和 hazard 分析。

use super::access::ResourceId;

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyEdge {
    /// 生产者节点索引（先执行）
    pub producer: usize,
    /// 消费者节点索引（后执行）
    pub consumer: usize,
    /// 产生这条依赖的资源，显式边可以为空
    pub resources: Vec<ResourceId>,
    /// 是否由用户显式添加
    pub explicit: bool,
}

/// 依赖图
///
/// 同一对节点之间最多一条边，多个资源造成的依赖合并到同一条边上。
#[derive(Debug)]
pub struct DependencyGraph {
    node_count: usize,
    /// 邻接表（出边）：node -> [edge index]
    adjacency: Vec<Vec<usize>>,
    /// 入度表
    in_degrees: Vec<usize>,
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            adjacency: vec![Vec::new(); node_count],
            in_degrees: vec![0; node_count],
            edges: Vec::new(),
        }
    }

    fn find_edge(&self, producer: usize, consumer: usize) -> Option<usize> {
        self.adjacency[producer].iter().copied().find(|&edge| self.edges[edge].consumer == consumer)
    }

    /// 添加显式依赖边，重复添加会被合并
    pub fn add_explicit_edge(&mut self, producer: usize, consumer: usize) {
        match self.find_edge(producer, consumer) {
            Some(edge) => self.edges[edge].explicit = true,
            None => self.push_edge(producer, consumer, Vec::new(), true),
        }
    }

    /// 添加由资源 hazard 产生的依赖边
    ///
    /// 同一对节点已经有边时只追加资源。返回 `true` 表示新建了边。
    pub fn add_resource_edge(&mut self, producer: usize, consumer: usize, resource: ResourceId) -> bool {
        debug_assert_ne!(producer, consumer, "a node never depends on itself through a resource");

        match self.find_edge(producer, consumer) {
            Some(edge) => {
                let resources = &mut self.edges[edge].resources;
                if !resources.contains(&resource) {
                    resources.push(resource);
                }
                false
            }
            None => {
                self.push_edge(producer, consumer, vec![resource], false);
                true
            }
        }
    }

    fn push_edge(&mut self, producer: usize, consumer: usize, resources: Vec<ResourceId>, explicit: bool) {
        self.adjacency[producer].push(self.edges.len());
        self.in_degrees[consumer] += 1;
        self.edges.push(DependencyEdge {
            producer,
            consumer,
            resources,
            explicit,
        });
    }

    /// Kahn 算法拓扑排序
    ///
    /// 就绪节点用栈保存，同时就绪的节点之间的先后顺序没有保证。
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑排序后的节点索引列表
    /// - `Err(remaining)`: 存在环，返回入度始终没有归零的节点
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready: Vec<usize> = (0..self.node_count).rev().filter(|&node| in_degrees[node] == 0).collect();
        let mut order = Vec::with_capacity(self.node_count);

        while let Some(node) = ready.pop() {
            order.push(node);

            for &edge in &self.adjacency[node] {
                let consumer = self.edges[edge].consumer;
                in_degrees[consumer] -= 1;
                if in_degrees[consumer] == 0 {
                    ready.push(consumer);
                }
            }
        }

        if order.len() != self.node_count {
            let remaining = (0..self.node_count).filter(|&node| in_degrees[node] > 0).collect();
            Err(remaining)
        } else {
            Ok(order)
        }
    }

    /// 节点的直接前驱
    pub fn predecessors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().filter(move |edge| edge.consumer == node).map(|edge| edge.producer)
    }

    /// 节点的直接后继
    pub fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[node].iter().map(|&edge| self.edges[edge].consumer)
    }

    /// 节点的出边
    pub fn out_edges(&self, node: usize) -> impl Iterator<Item = &DependencyEdge> + '_ {
        self.adjacency[node].iter().map(|&edge| &self.edges[edge])
    }

    #[inline]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub(crate) fn into_edges(self) -> Vec<DependencyEdge> {
        self.edges
    }
}

/// 检查 `order` 是否满足所有边的约束
pub fn respects_edges(order: &[usize], edges: &[DependencyEdge]) -> bool {
    let mut position = vec![usize::MAX; order.len()];
    for (pos, &node) in order.iter().enumerate() {
        if node >= position.len() {
            return false;
        }
        position[node] = pos;
    }
    edges.iter().all(|edge| position[edge.producer] < position[edge.consumer])
}
