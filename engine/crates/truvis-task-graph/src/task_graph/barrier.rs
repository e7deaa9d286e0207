//! Barrier 描述
//!
//! 编译结果中的 barrier 只是数据：由提交层在录制时转换成
//! `vk::BufferMemoryBarrier2` / `vk::ImageMemoryBarrier2` 并发出。

use ash::vk;

use super::access::{ResourceAccess, ResourceId};

/// Barrier 的来源分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// 资源第一次被访问：从未定义（或外部记录的）状态转换到需要的状态
    InitialTransition,
    /// image layout 改变
    LayoutTransition,
    /// 写之后的访问：等待写入可见
    Memory,
    /// 读之后的写：只需要执行依赖，不需要 access mask
    Execution,
    /// 队列族所有权释放，挂在旧队列上最后一个访问者之后
    Release,
    /// 队列族所有权获取，挂在新队列的第一个访问者之前
    Acquire,
}

/// 单个资源的 barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierDesc {
    pub kind: BarrierKind,
    pub resource: ResourceId,

    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,

    /// buffer 恒为 `UNDEFINED`
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,

    /// 非所有权转移时为 `vk::QUEUE_FAMILY_IGNORED`
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

// new & init
impl BarrierDesc {
    /// 从两次访问构造 barrier，队列族默认忽略
    pub fn new(kind: BarrierKind, resource: ResourceId, src: &ResourceAccess, dst: &ResourceAccess) -> Self {
        Self {
            kind,
            resource,
            src_stage: src.stage,
            src_access: src.access,
            dst_stage: dst.stage,
            dst_access: dst.access,
            old_layout: src.layout,
            new_layout: dst.layout,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family: u32, dst_queue_family: u32) -> Self {
        self.src_queue_family = src_queue_family;
        self.dst_queue_family = dst_queue_family;
        self
    }
}

// getters
impl BarrierDesc {
    #[inline]
    pub fn is_queue_transfer(&self) -> bool {
        self.src_queue_family != self.dst_queue_family
    }

    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }

    /// 是否携带内存可见性（有任意 access mask）
    #[inline]
    pub fn has_memory_dependency(&self) -> bool {
        !self.src_access.is_empty() || !self.dst_access.is_empty()
    }
}

// 转换为 vulkan 结构体
impl BarrierDesc {
    /// 转换为 `vk::BufferMemoryBarrier2`，覆盖整个 buffer
    ///
    /// image barrier 返回 `None`
    pub fn to_buffer_barrier2(&self) -> Option<vk::BufferMemoryBarrier2<'static>> {
        let ResourceId::Buffer(buffer) = self.resource else {
            return None;
        };

        Some(
            vk::BufferMemoryBarrier2::default()
                .src_stage_mask(self.src_stage)
                .src_access_mask(self.src_access)
                .dst_stage_mask(self.dst_stage)
                .dst_access_mask(self.dst_access)
                .src_queue_family_index(self.src_queue_family)
                .dst_queue_family_index(self.dst_queue_family)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        )
    }

    /// 转换为 `vk::ImageMemoryBarrier2`
    ///
    /// buffer barrier 返回 `None`
    pub fn to_image_barrier2(
        &self,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Option<vk::ImageMemoryBarrier2<'static>> {
        let ResourceId::Image(image) = self.resource else {
            return None;
        };

        Some(
            vk::ImageMemoryBarrier2::default()
                .src_stage_mask(self.src_stage)
                .src_access_mask(self.src_access)
                .dst_stage_mask(self.dst_stage)
                .dst_access_mask(self.dst_access)
                .old_layout(self.old_layout)
                .new_layout(self.new_layout)
                .src_queue_family_index(self.src_queue_family)
                .dst_queue_family_index(self.dst_queue_family)
                .image(image)
                .subresource_range(subresource_range),
        )
    }
}

/// 一个 step 需要发出的 vulkan barrier 集合
///
/// 持有转换后的结构体，`dependency_info()` 借用它们。
#[derive(Default)]
pub struct BarrierBatch {
    buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
}

impl BarrierBatch {
    /// `image_range` 为每个 image 选择 subresource range（例如按 format 推断 aspect）
    pub fn new<'b>(
        barriers: impl IntoIterator<Item = &'b BarrierDesc>,
        mut image_range: impl FnMut(vk::Image) -> vk::ImageSubresourceRange,
    ) -> Self {
        let mut batch = Self::default();
        for barrier in barriers {
            match barrier.resource {
                ResourceId::Buffer(_) => batch.buffer_barriers.extend(barrier.to_buffer_barrier2()),
                ResourceId::Image(image) => batch.image_barriers.extend(barrier.to_image_barrier2(image_range(image))),
            }
        }
        batch
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    #[inline]
    pub fn buffer_barriers(&self) -> &[vk::BufferMemoryBarrier2<'static>] {
        &self.buffer_barriers
    }

    #[inline]
    pub fn image_barriers(&self) -> &[vk::ImageMemoryBarrier2<'static>] {
        &self.image_barriers
    }

    /// 用于 `vkCmdPipelineBarrier2`
    #[inline]
    pub fn dependency_info(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default()
            .buffer_memory_barriers(&self.buffer_barriers)
            .image_memory_barriers(&self.image_barriers)
    }
}

/// 整个 color mip 0 / layer 0 的 subresource range
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}
