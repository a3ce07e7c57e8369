/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Shared memory layout of a split virtqueue.

use super::{AvailRing, DescTable, Descriptor, RingError, UsedRing};

/// Largest queue length the split ring supports.
pub const MAX_QUEUE_LEN: usize = 32768;

/// Is `queue_len` usable for a split ring?
///
/// It must be a power of two so ring positions can wrap with a mask, at least
/// 2 so the ring can carry an entry, and at most [`MAX_QUEUE_LEN`] so the
/// end-of-chain sentinel still fits the 16-bit `next` field.
pub const fn is_valid_queue_len(queue_len: usize) -> bool {
    queue_len.is_power_of_two() && queue_len >= 2 && queue_len <= MAX_QUEUE_LEN
}

/// Layout of a split virtqueue in shared memory.
///
/// Describes where the descriptor table and both rings live. Use
/// [`from_base`](Self::from_base) to place all three contiguously, or
/// [`new`](Self::new) when they live in separate regions.
///
/// # Memory Layout
///
/// [`from_base`](Self::from_base) uses the conventional placement:
/// 1. Descriptor table: `queue_len` × 16 bytes, aligned to 16 bytes
/// 2. Available ring: `6 + 2 × queue_len` bytes, aligned to 2 bytes
/// 3. Used ring: `6 + 8 × queue_len` bytes, aligned to 4 bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Descriptor table base in shared memory.
    pub desc_table_addr: u64,
    /// Available ring base in shared memory.
    pub avail_addr: u64,
    /// Used ring base in shared memory.
    pub used_addr: u64,
    /// Number of descriptors and ring entries.
    pub queue_len: u16,
}

#[inline]
const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

pub(crate) fn check_queue_len(queue_len: usize) -> Result<u16, RingError> {
    if !is_valid_queue_len(queue_len) {
        log::error!("Invalid queue_len: {queue_len}, must be a power of 2.");
        return Err(RingError::InvalidQueueLen(queue_len));
    }

    Ok(queue_len as u16)
}

impl Layout {
    /// Create a Layout from three separately placed regions.
    ///
    /// # Safety
    /// - each region must be valid for its `query_size` bytes
    ///   ([`Layout::desc_table_size`], [`AvailRing::query_size`],
    ///   [`UsedRing::query_size`]).
    /// - memory must remain valid for the lifetime of the queue.
    pub unsafe fn new(
        desc_table_addr: u64,
        avail_addr: u64,
        used_addr: u64,
        queue_len: usize,
    ) -> Result<Self, RingError> {
        let queue_len = check_queue_len(queue_len)?;

        if !desc_table_addr.is_multiple_of(Descriptor::ALIGN as u64)
            || !avail_addr.is_multiple_of(AvailRing::ALIGN as u64)
            || !used_addr.is_multiple_of(UsedRing::ALIGN as u64)
        {
            return Err(RingError::InvalidLayout);
        }

        Ok(Self {
            desc_table_addr,
            avail_addr,
            used_addr,
            queue_len,
        })
    }

    /// Create a Layout from a base address and queue length.
    ///
    /// The memory region starting at `base` must be at least
    /// `Layout::query_size(queue_len)` bytes.
    ///
    /// # Safety
    /// - `base` must be valid for `Layout::query_size(queue_len)` bytes.
    /// - `base` must be aligned to `Descriptor::ALIGN`.
    /// - Memory must remain valid for the lifetime of the queue.
    pub unsafe fn from_base(base: u64, queue_len: usize) -> Result<Self, RingError> {
        check_queue_len(queue_len)?;

        let avail_offset = Self::avail_offset(queue_len);
        let used_offset = Self::used_offset(queue_len);

        // SAFETY: the caller vouches for the whole contiguous region
        unsafe {
            Self::new(
                base,
                base + avail_offset as u64,
                base + used_offset as u64,
                queue_len,
            )
        }
    }

    /// Calculate the memory size needed for a contiguous queue of `queue_len`
    /// entries, accounting for alignment requirements.
    pub const fn query_size(queue_len: usize) -> usize {
        Self::used_offset(queue_len) + UsedRing::query_size(queue_len)
    }

    /// Bytes occupied by the descriptor table.
    pub const fn desc_table_size(queue_len: usize) -> usize {
        queue_len * Descriptor::SIZE
    }

    /// Bytes occupied by the available ring, event trailer included.
    pub const fn avail_ring_size(queue_len: usize) -> usize {
        AvailRing::query_size(queue_len)
    }

    /// Bytes occupied by the used ring, event trailer included.
    pub const fn used_ring_size(queue_len: usize) -> usize {
        UsedRing::query_size(queue_len)
    }

    const fn avail_offset(queue_len: usize) -> usize {
        align_up(Self::desc_table_size(queue_len), AvailRing::ALIGN)
    }

    const fn used_offset(queue_len: usize) -> usize {
        align_up(
            Self::avail_offset(queue_len) + AvailRing::query_size(queue_len),
            UsedRing::ALIGN,
        )
    }

    pub(crate) fn desc_table(&self) -> DescTable {
        // SAFETY: construction checked alignment and the caller vouched for the region
        unsafe { DescTable::from_raw_parts(self.desc_table_addr, self.queue_len) }
    }

    pub(crate) fn avail_ring(&self) -> AvailRing {
        // SAFETY: construction checked alignment and the caller vouched for the region
        unsafe { AvailRing::from_raw_parts(self.avail_addr, self.queue_len) }
    }

    pub(crate) fn used_ring(&self) -> UsedRing {
        // SAFETY: construction checked alignment and the caller vouched for the region
        unsafe { UsedRing::from_raw_parts(self.used_addr, self.queue_len) }
    }
}
