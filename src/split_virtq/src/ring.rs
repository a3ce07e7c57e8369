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

//! Available and Used Rings
//!
//! Both rings share the same shape: a 16-bit `flags` word, a 16-bit `idx`
//! naming the next slot the writer will fill, and `queue_len` entries.
//!
//! ```text
//! avail: ┌───────┬─────┬─────────┬─────────┬─────┬──────────────┐
//!        │ flags │ idx │ ring[0] │ ring[1] │ ... │ ring[n-1]    │  u16 heads
//!        └───────┴─────┴─────────┴─────────┴─────┴──────────────┘
//! used:  ┌───────┬─────┬───────────────┬─────┬──────────────────┐
//!        │ flags │ idx │ {id,len}[0]   │ ... │ {id,len}[n-1]    │  u32 pairs
//!        └───────┴─────┴───────────────┴─────┴──────────────────┘
//! ```
//!
//! `idx` is stored already masked (`(idx + 1) & (queue_len - 1)`). A reader
//! keeps the last slot it consumed; it has something new when
//! `(last_seen + 1) & mask != idx`. Readers start with `last_seen =
//! queue_len - 1` so the first expected slot is 0. Under this encoding at most
//! `queue_len - 1` entries can be outstanding at once.
//!
//! Each ring has exactly one writer. The writer fills a slot with plain
//! writes and then publishes `idx` with [`MemOps::store_release`]; the reader
//! observes `idx` with [`MemOps::load_acquire`] before reading the slot.

use bytemuck::{Pod, Zeroable};

use super::{MemOps, RingError};

/// One completion in the used ring.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct UsedElem {
    /// Head index of the completed chain.
    pub id: u32,
    /// Total number of bytes the device reports for the chain.
    pub len: u32,
}

const _: () = assert!(core::mem::size_of::<UsedElem>() == 8);

/// Offsets shared by both ring headers.
const FLAGS_OFFSET: u64 = 0;
const IDX_OFFSET: u64 = 2;
const RING_OFFSET: u64 = 4;

/// Position of a ring index modulo a power-of-two queue length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    pos: u16,
    mask: u16,
}

impl RingIndex {
    pub(crate) fn new(pos: u16, queue_len: u16) -> Self {
        let mask = queue_len - 1;
        Self {
            pos: pos & mask,
            mask,
        }
    }

    /// The position a reader starts from: one before slot 0.
    pub(crate) fn reader_start(queue_len: u16) -> Self {
        Self::new(queue_len - 1, queue_len)
    }

    #[inline]
    pub fn get(&self) -> u16 {
        self.pos
    }

    #[inline]
    pub(crate) fn next(&self) -> Self {
        Self {
            pos: self.pos.wrapping_add(1) & self.mask,
            mask: self.mask,
        }
    }

    /// Number of steps from `self` forward to `other`.
    #[inline]
    pub(crate) fn distance_to(&self, other: RingIndex) -> u16 {
        other.pos.wrapping_sub(self.pos) & self.mask
    }
}

/// The driver-written ring of published chain heads.
#[derive(Debug, Clone, Copy)]
pub struct AvailRing {
    base_addr: u64,
    size: u16,
}

impl AvailRing {
    pub const ALIGN: usize = 2;

    /// Bytes occupied by an available ring of `queue_len` entries, including the
    /// trailing event-index word of the conventional layout.
    pub const fn query_size(queue_len: usize) -> usize {
        RING_OFFSET as usize + queue_len * 2 + 2
    }

    /// # Safety
    ///
    /// `base_addr` must be valid for reads and writes of
    /// [`AvailRing::query_size`] bytes, aligned to [`AvailRing::ALIGN`], for the
    /// lifetime of this ring.
    pub unsafe fn from_raw_parts(base_addr: u64, size: u16) -> Self {
        Self { base_addr, size }
    }

    pub fn flags_addr(&self) -> u64 {
        self.base_addr + FLAGS_OFFSET
    }

    pub fn idx_addr(&self) -> u64 {
        self.base_addr + IDX_OFFSET
    }

    pub fn slot_addr(&self, slot: RingIndex) -> u64 {
        self.base_addr + RING_OFFSET + slot.get() as u64 * 2
    }

    /// Zero `flags` and `idx`.
    pub fn init<M: MemOps>(&self, mem: &M) -> Result<(), RingError> {
        mem.write_val(self.flags_addr(), 0u16)
            .map_err(|_| RingError::MemError)?;
        mem.store_release(self.idx_addr(), 0)
            .map_err(|_| RingError::MemError)
    }

    /// Acquire-load the published index.
    pub fn load_idx<M: MemOps>(&self, mem: &M) -> Result<RingIndex, RingError> {
        let raw = mem
            .load_acquire(self.idx_addr())
            .map_err(|_| RingError::MemError)?;
        Ok(RingIndex::new(raw, self.size))
    }

    /// Write `head` into `slot`, then release-publish `slot + 1` as the new
    /// index. Returns the new index.
    pub fn publish<M: MemOps>(
        &self,
        mem: &M,
        slot: RingIndex,
        head: u16,
    ) -> Result<RingIndex, RingError> {
        mem.write_val(self.slot_addr(slot), head)
            .map_err(|_| RingError::MemError)?;
        let next = slot.next();
        mem.store_release(self.idx_addr(), next.get())
            .map_err(|_| RingError::MemError)?;
        Ok(next)
    }

    /// Read the head stored in `slot`.
    pub fn read_slot<M: MemOps>(&self, mem: &M, slot: RingIndex) -> Result<u16, RingError> {
        mem.read_val(self.slot_addr(slot))
            .map_err(|_| RingError::MemError)
    }

    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// The device-written ring of completed chains.
#[derive(Debug, Clone, Copy)]
pub struct UsedRing {
    base_addr: u64,
    size: u16,
}

impl UsedRing {
    pub const ALIGN: usize = 4;

    /// Bytes occupied by a used ring of `queue_len` entries, including the
    /// trailing event-index word of the conventional layout.
    pub const fn query_size(queue_len: usize) -> usize {
        RING_OFFSET as usize + queue_len * core::mem::size_of::<UsedElem>() + 2
    }

    /// # Safety
    ///
    /// `base_addr` must be valid for reads and writes of
    /// [`UsedRing::query_size`] bytes, aligned to [`UsedRing::ALIGN`], for the
    /// lifetime of this ring.
    pub unsafe fn from_raw_parts(base_addr: u64, size: u16) -> Self {
        Self { base_addr, size }
    }

    pub fn flags_addr(&self) -> u64 {
        self.base_addr + FLAGS_OFFSET
    }

    pub fn idx_addr(&self) -> u64 {
        self.base_addr + IDX_OFFSET
    }

    pub fn slot_addr(&self, slot: RingIndex) -> u64 {
        self.base_addr + RING_OFFSET + slot.get() as u64 * core::mem::size_of::<UsedElem>() as u64
    }

    /// Zero `flags` and `idx`.
    pub fn init<M: MemOps>(&self, mem: &M) -> Result<(), RingError> {
        mem.write_val(self.flags_addr(), 0u16)
            .map_err(|_| RingError::MemError)?;
        mem.store_release(self.idx_addr(), 0)
            .map_err(|_| RingError::MemError)
    }

    /// Acquire-load the published index.
    pub fn load_idx<M: MemOps>(&self, mem: &M) -> Result<RingIndex, RingError> {
        let raw = mem
            .load_acquire(self.idx_addr())
            .map_err(|_| RingError::MemError)?;
        Ok(RingIndex::new(raw, self.size))
    }

    /// Write `elem` into `slot`, then release-publish `slot + 1` as the new
    /// index. Returns the new index.
    pub fn publish<M: MemOps>(
        &self,
        mem: &M,
        slot: RingIndex,
        elem: UsedElem,
    ) -> Result<RingIndex, RingError> {
        mem.write_val(self.slot_addr(slot), elem)
            .map_err(|_| RingError::MemError)?;
        let next = slot.next();
        mem.store_release(self.idx_addr(), next.get())
            .map_err(|_| RingError::MemError)?;
        Ok(next)
    }

    /// Read the completion stored in `slot`.
    pub fn read_slot<M: MemOps>(&self, mem: &M, slot: RingIndex) -> Result<UsedElem, RingError> {
        mem.read_val(self.slot_addr(slot))
            .map_err(|_| RingError::MemError)
    }

    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
