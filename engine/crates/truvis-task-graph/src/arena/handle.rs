//! Arena 句柄定义
//!
//! 句柄把 `(generation, index)` 打包进一个 `u32`：低 `INDEX_BITS` 位是槽位索引，
//! 高 `GENERATION_BITS` 位是代数。槽位被回收后代数递增，旧句柄因此失效。

use std::fmt;

/// Arena 的代际句柄
///
/// 位宽与所属的 [`Arena`](super::Arena) 一致，默认 24 位索引 + 8 位代数。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaHandle<const INDEX_BITS: u32 = 24, const GENERATION_BITS: u32 = 8> {
    raw: u32,
}

impl<const INDEX_BITS: u32, const GENERATION_BITS: u32> ArenaHandle<INDEX_BITS, GENERATION_BITS> {
    pub(crate) const INDEX_MASK: u32 = if INDEX_BITS >= 32 { u32::MAX } else { (1u32 << INDEX_BITS) - 1 };
    pub(crate) const GENERATION_MASK: u32 =
        if GENERATION_BITS >= 32 { u32::MAX } else { (1u32 << GENERATION_BITS) - 1 };

    /// 由索引和代数组装句柄，超出位宽的部分被截断
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        let generation = generation & Self::GENERATION_MASK;
        let packed_generation = if INDEX_BITS >= 32 { 0 } else { generation << INDEX_BITS };
        Self {
            raw: packed_generation | (index & Self::INDEX_MASK),
        }
    }

    /// 槽位索引
    #[inline]
    pub const fn index(&self) -> u32 {
        self.raw & Self::INDEX_MASK
    }

    /// 代数
    #[inline]
    pub const fn generation(&self) -> u32 {
        if INDEX_BITS >= 32 { 0 } else { (self.raw >> INDEX_BITS) & Self::GENERATION_MASK }
    }

    /// 打包后的原始值
    #[inline]
    pub const fn to_raw(&self) -> u32 {
        self.raw
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }
}

impl<const INDEX_BITS: u32, const GENERATION_BITS: u32> fmt::Debug for ArenaHandle<INDEX_BITS, GENERATION_BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}.g{})", self.index(), self.generation())
    }
}
