//! 代际 Arena
//!
//! 稠密存储 + 空闲链表，通过 [`ArenaHandle`] 访问。插入、删除、查询都是 O(1)，
//! 使用已删除槽位的旧句柄会被识别为 [`ArenaError::StaleHandle`]。
//!
//! 代数按 `2^GENERATION_BITS` 取模递增：同一个槽位被复用 `2^GENERATION_BITS` 次之后，
//! 极旧的句柄有可能重新"生效"。这是已知且接受的限制。

mod handle;

pub use handle::ArenaHandle;

/// Arena 操作的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena capacity exhausted (capacity: {capacity})")]
    CapacityExhausted { capacity: u32 },

    #[error("arena index {index} out of range (slots: {len})")]
    IndexOutOfRange { index: u32, len: u32 },

    #[error("arena slot {index} is empty")]
    SlotEmpty { index: u32 },

    #[error("stale arena handle: slot {index} is at generation {current}, handle has {stale}")]
    StaleHandle { index: u32, current: u32, stale: u32 },
}

struct Slot<T> {
    /// `None` 表示槽位空闲
    value: Option<T>,
    generation: u32,
}

/// 代际 Arena
///
/// - `INDEX_BITS`：索引位宽，决定最大槽位数
/// - `GENERATION_BITS`：代数位宽，`INDEX_BITS + GENERATION_BITS` 不能超过 32
///
/// 可以额外指定固定容量，超出后 `emplace` 返回 [`ArenaError::CapacityExhausted`]。
pub struct Arena<T, const INDEX_BITS: u32 = 24, const GENERATION_BITS: u32 = 8> {
    slots: Vec<Slot<T>>,
    /// 空闲槽位索引，后进先出
    free: Vec<u32>,
    len: usize,
    capacity_limit: Option<u32>,
}

impl<T, const INDEX_BITS: u32, const GENERATION_BITS: u32> Default for Arena<T, INDEX_BITS, GENERATION_BITS> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T, const INDEX_BITS: u32, const GENERATION_BITS: u32> Arena<T, INDEX_BITS, GENERATION_BITS> {
    const VALID_WIDTHS: () = assert!(
        INDEX_BITS > 0 && GENERATION_BITS > 0 && INDEX_BITS + GENERATION_BITS <= 32,
        "Arena: INDEX_BITS + GENERATION_BITS must be <= 32 and both non-zero"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_WIDTHS;
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity_limit: None,
        }
    }

    /// 创建固定容量的 Arena，容量会被限制在索引位宽能表示的范围内
    pub fn with_capacity_limit(capacity: u32) -> Self {
        let mut arena = Self::new();
        let capacity = capacity.min(Self::max_slots());
        arena.slots.reserve(capacity as usize);
        arena.capacity_limit = Some(capacity);
        arena
    }

    /// 索引位宽能表示的最大槽位数
    #[inline]
    const fn max_slots() -> u32 {
        ArenaHandle::<INDEX_BITS, GENERATION_BITS>::INDEX_MASK.saturating_add(1)
    }
}

// getters
impl<T, const INDEX_BITS: u32, const GENERATION_BITS: u32> Arena<T, INDEX_BITS, GENERATION_BITS> {
    /// 存活元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 最多能容纳的元素数量
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity_limit.unwrap_or(Self::max_slots())
    }

    /// 已分配的槽位数量（包含空闲槽位）
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

// tools
impl<T, const INDEX_BITS: u32, const GENERATION_BITS: u32> Arena<T, INDEX_BITS, GENERATION_BITS> {
    /// 放入一个元素
    ///
    /// 优先复用最近释放的槽位；复用时句柄的代数就是该槽位当前的代数（删除时已经递增过）。
    pub fn emplace(&mut self, value: T) -> Result<ArenaHandle<INDEX_BITS, GENERATION_BITS>, ArenaError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none(), "free list points at an occupied slot");
            slot.value = Some(value);
            self.len += 1;
            return Ok(ArenaHandle::new(index, slot.generation));
        }

        let capacity = self.capacity();
        if self.slots.len() as u64 >= capacity as u64 {
            return Err(ArenaError::CapacityExhausted { capacity });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            value: Some(value),
            generation: 0,
        });
        self.len += 1;
        Ok(ArenaHandle::new(index, 0))
    }

    /// 校验句柄，返回槽位索引
    fn check(&self, handle: ArenaHandle<INDEX_BITS, GENERATION_BITS>) -> Result<usize, ArenaError> {
        let index = handle.index();
        let slot = self.slots.get(index as usize).ok_or(ArenaError::IndexOutOfRange {
            index,
            len: self.slots.len() as u32,
        })?;

        if slot.value.is_none() {
            return Err(ArenaError::SlotEmpty { index });
        }
        if slot.generation != handle.generation() {
            return Err(ArenaError::StaleHandle {
                index,
                current: slot.generation,
                stale: handle.generation(),
            });
        }

        Ok(index as usize)
    }

    pub fn get(&self, handle: ArenaHandle<INDEX_BITS, GENERATION_BITS>) -> Result<&T, ArenaError> {
        let index = self.check(handle)?;
        self.slots[index].value.as_ref().ok_or(ArenaError::SlotEmpty { index: index as u32 })
    }

    pub fn get_mut(&mut self, handle: ArenaHandle<INDEX_BITS, GENERATION_BITS>) -> Result<&mut T, ArenaError> {
        let index = self.check(handle)?;
        self.slots[index].value.as_mut().ok_or(ArenaError::SlotEmpty { index: index as u32 })
    }

    #[inline]
    pub fn contains(&self, handle: ArenaHandle<INDEX_BITS, GENERATION_BITS>) -> bool {
        self.check(handle).is_ok()
    }

    /// 按槽位索引直接访问，不校验代数
    ///
    /// 只用于内部已经校验过的索引，不要传入用户提供的句柄。
    ///
    /// # Panics
    /// 索引越界或槽位为空
    #[inline]
    pub fn get_unchecked(&self, index: u32) -> &T {
        match self.slots.get(index as usize).and_then(|slot| slot.value.as_ref()) {
            Some(value) => value,
            None => panic!("Arena::get_unchecked: slot {index} is vacant or out of range"),
        }
    }

    /// # Panics
    /// 索引越界或槽位为空
    #[inline]
    pub fn get_unchecked_mut(&mut self, index: u32) -> &mut T {
        match self.slots.get_mut(index as usize).and_then(|slot| slot.value.as_mut()) {
            Some(value) => value,
            None => panic!("Arena::get_unchecked_mut: slot {index} is vacant or out of range"),
        }
    }

    /// 删除元素并返回它
    ///
    /// 槽位的代数立即递增，之前发出的句柄全部失效。
    pub fn remove(&mut self, handle: ArenaHandle<INDEX_BITS, GENERATION_BITS>) -> Result<T, ArenaError> {
        let index = self.check(handle)?;
        let slot = &mut self.slots[index];
        let value = slot.value.take().ok_or(ArenaError::SlotEmpty { index: index as u32 })?;
        slot.generation = slot.generation.wrapping_add(1) & ArenaHandle::<INDEX_BITS, GENERATION_BITS>::GENERATION_MASK;
        self.free.push(index as u32);
        self.len -= 1;
        Ok(value)
    }

    /// 遍历所有存活元素
    pub fn iter(&self) -> impl Iterator<Item = (ArenaHandle<INDEX_BITS, GENERATION_BITS>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| (ArenaHandle::new(index as u32, slot.generation), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaHandle<INDEX_BITS, GENERATION_BITS>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| (ArenaHandle::new(index as u32, generation), value))
        })
    }

    /// 取出所有存活元素，Arena 被清空
    pub fn drain(&mut self) -> impl Iterator<Item = (ArenaHandle<INDEX_BITS, GENERATION_BITS>, T)> + '_ {
        self.free.clear();
        self.len = 0;
        self.slots.drain(..).enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.map(|value| (ArenaHandle::new(index as u32, generation), value))
        })
    }
}
