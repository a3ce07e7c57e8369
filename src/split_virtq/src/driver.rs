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

//! Driver Side of a Split Virtqueue
//!
//! The driver owns the descriptor free list. It builds descriptor chains,
//! publishes their heads into the available ring and, once the device has
//! published a completion into the used ring, walks each completed chain and
//! returns its descriptors to the free list.
//!
//! # Lifecycle
//!
//! 1. Build: call [`add_available_buf`](VirtqDriver::add_available_buf) once per
//!    buffer on one [`RingObject`], or publish a whole [`BufferChain`] with
//!    [`add_available_chain`](VirtqDriver::add_available_chain)
//! 2. Notify: call [`notify`](VirtqDriver::notify) when the device should look
//! 3. Poll: call [`get_used_buf`](VirtqDriver::get_used_buf) to bind a completed chain
//! 4. Reclaim: call [`gather_used`](VirtqDriver::gather_used) until it reports
//!    [`RingError::ChainExhausted`]

use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::layout::check_queue_len;
use super::ring::RingIndex;
use super::{
    AvailRing, BufferChain, BufferElement, ChainState, DescFlags, DescTable, Descriptor, Layout,
    MemOps, Notifier, RingError, RingObject, UsedRing,
};

/// A chain reclaimed from the used ring.
#[derive(Debug, Clone)]
pub struct UsedBuffer {
    /// Head index the chain was published under
    pub id: u16,
    /// Length the device reported for the chain
    pub len: u32,
    /// The chain's buffers in order; their descriptors are free again
    pub descs: SmallVec<[BufferElement; 16]>,
}

/// Driver side of a split virtqueue.
///
/// Writes the available ring, reads the used ring and is the only owner of
/// the descriptor free list.
#[derive(Debug)]
pub struct VirtqDriver<M, N, C = ()> {
    /// Memory accessor
    mem: M,
    /// Hook for kicking the device
    notifier: N,
    /// Caller bookkeeping
    cookie: C,
    queue_len: u16,
    desc_table: DescTable,
    avail: AvailRing,
    used: UsedRing,
    /// First free descriptor, None when the table is exhausted
    free_head: Option<u16>,
    num_free: usize,
    /// Shadow of the published avail idx; the driver is its only writer
    avail_idx: RingIndex,
    /// Last used ring slot consumed
    used_last_seen: RingIndex,
    /// Heads published and not yet taken back from the used ring
    outstanding: FixedBitSet,
}

impl<M: MemOps, N: Notifier, C> VirtqDriver<M, N, C> {
    /// Initialize the driver side of a queue.
    ///
    /// Threads the whole descriptor table into the free list and zeroes both
    /// ring headers. Fails with [`RingError::InvalidQueueLen`] if the layout's
    /// queue length cannot be used.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, level = "Trace"))]
    pub fn new(layout: Layout, mem: M, notifier: N, cookie: C) -> Result<Self, RingError> {
        let queue_len = check_queue_len(layout.queue_len as usize)?;

        let desc_table = layout.desc_table();
        let avail = layout.avail_ring();
        let used = layout.used_ring();

        desc_table.init_free_list(&mem)?;
        avail.init(&mem)?;
        used.init(&mem)?;

        log::debug!("initialized split virtqueue driver, queue_len={queue_len}");

        Ok(Self {
            mem,
            notifier,
            cookie,
            queue_len,
            desc_table,
            avail,
            used,
            free_head: Some(0),
            num_free: queue_len as usize,
            avail_idx: RingIndex::new(0, queue_len),
            used_last_seen: RingIndex::reader_start(queue_len),
            outstanding: FixedBitSet::with_capacity(queue_len as usize),
        })
    }

    /// Pop a descriptor off the free list and fill it in.
    ///
    /// The new descriptor ends its chain. If `prev` is given, that descriptor's
    /// `next` is pointed at the new one, extending its chain.
    ///
    /// # Errors
    ///
    /// - [`RingError::TableFull`] - The free list is empty
    /// - [`RingError::BadIndex`] - `prev` is not a descriptor index
    pub fn allocate(
        &mut self,
        addr: u64,
        len: u32,
        flags: DescFlags,
        prev: Option<u16>,
    ) -> Result<u16, RingError> {
        let head = self
            .free_head
            .filter(|_| self.num_free > 0)
            .ok_or(RingError::TableFull)?;

        if let Some(prev) = prev
            && prev >= self.queue_len
        {
            return Err(RingError::BadIndex(prev as u32));
        }

        let next_free = self
            .desc_table
            .read(&self.mem, head)?
            .next_index(self.queue_len);

        let desc = Descriptor::new(addr, len, flags, None, self.queue_len);
        self.desc_table.write(&self.mem, head, desc)?;

        if let Some(prev) = prev {
            self.desc_table.write_next(&self.mem, prev, Some(head))?;
        }

        self.free_head = next_free;
        self.num_free -= 1;

        Ok(head)
    }

    /// Push descriptor `idx` back onto the free list.
    ///
    /// Returns what the descriptor held and the link it had before being
    /// freed, so the caller can continue freeing the rest of its chain.
    ///
    /// Fails with [`RingError::BadChain`] if every descriptor is already free,
    /// which means a completion named a chain that was never outstanding.
    pub fn release(&mut self, idx: u16) -> Result<(BufferElement, Option<u16>), RingError> {
        if self.num_free >= self.queue_len as usize {
            return Err(RingError::BadChain);
        }

        let desc = self.desc_table.read(&self.mem, idx)?;
        let next = desc.next_index(self.queue_len);

        self.desc_table.write_next(&self.mem, idx, self.free_head)?;
        self.free_head = Some(idx);
        self.num_free += 1;

        Ok((BufferElement::from(&desc), next))
    }

    /// Add one buffer to the chain `obj` is building.
    ///
    /// The first call on an unset `obj` allocates the head and publishes it
    /// into the available ring. Later calls link a new descriptor after
    /// `obj.cur()` without publishing again: the device finds them by walking
    /// `next` from the head. The device may see the head as soon as it is
    /// published, so finish the chain before calling [`notify`](Self::notify).
    ///
    /// Flags are taken per buffer, so readable and writable buffers may be
    /// mixed in any order. A device using
    /// [`VirtqDevice::read_available_chain`](crate::VirtqDevice::read_available_chain)
    /// rejects a readable buffer after a writable one; put readables first for
    /// such devices.
    ///
    /// # Errors
    ///
    /// - [`RingError::TableFull`] - No free descriptor
    /// - [`RingError::RingFull`] - A new head would overrun the available ring
    /// - [`RingError::ChainExhausted`] - `obj` was walked to its end and
    ///   cannot be extended
    pub fn add_available_buf(
        &mut self,
        obj: &mut RingObject,
        addr: u64,
        len: u32,
        flags: DescFlags,
    ) -> Result<(), RingError> {
        match obj.state() {
            ChainState::Unset => {
                if self.avail_full() {
                    return Err(RingError::RingFull);
                }

                let head = self.allocate(addr, len, flags, None)?;
                self.publish_head(head)?;
                obj.bind(head);
            }
            ChainState::Active => {
                let idx = self.allocate(addr, len, flags, obj.cur())?;
                obj.set_cur(Some(idx));
            }
            ChainState::Exhausted => return Err(RingError::ChainExhausted),
        }

        Ok(())
    }

    /// Build `chain` in the descriptor table and publish its head.
    ///
    /// Every element but the last gets [`DescFlags::NEXT`]. The head is
    /// published only after the whole chain has been written, and the call
    /// fails before touching anything if the chain does not fit.
    ///
    /// # Returns
    ///
    /// The head index, which the matching completion will carry as its id.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, level = "Trace"))]
    pub fn add_available_chain(&mut self, chain: &BufferChain) -> Result<u16, RingError> {
        let total = chain.len();

        if self.avail_full() {
            return Err(RingError::RingFull);
        }

        if self.num_free < total {
            return Err(RingError::TableFull);
        }

        let mut head = None;
        let mut prev = None;

        for (i, elem) in chain.elems().iter().enumerate() {
            let mut flags = elem.flags;
            flags.set(DescFlags::NEXT, i + 1 < total);

            let idx = self.allocate(elem.addr, elem.len, flags, prev)?;
            head.get_or_insert(idx);
            prev = Some(idx);
        }

        let head = head.ok_or(RingError::EmptyChain)?;
        self.publish_head(head)?;

        Ok(head)
    }

    /// Bind `obj` to the next completed chain in the used ring.
    ///
    /// # Returns
    ///
    /// - `Ok(len)` - The length the device reported for the chain
    /// - `Err(RingError::WouldBlock)` - No new completions
    /// - `Err(RingError::BadIndex)` - The device reported an id that is not the
    ///   head of an outstanding chain, such as a chain it already completed;
    ///   the entry is consumed and nothing is freed
    pub fn get_used_buf(&mut self, obj: &mut RingObject) -> Result<u32, RingError> {
        let next = self.used_last_seen.next();
        let idx = self.used.load_idx(&self.mem)?;

        if next == idx {
            return Err(RingError::WouldBlock);
        }

        let elem = self.used.read_slot(&self.mem, next)?;
        self.used_last_seen = next;

        let head = u16::try_from(elem.id)
            .ok()
            .filter(|&id| id < self.queue_len && self.outstanding.contains(id as usize))
            .ok_or(RingError::BadIndex(elem.id))?;

        self.outstanding.set(head as usize, false);

        #[cfg(debug_assertions)]
        self.check_used_len(head, elem.len);

        obj.bind(head);
        Ok(elem.len)
    }

    /// Free the descriptor under `obj`'s cursor and step to the next one.
    ///
    /// Fails with [`RingError::ChainExhausted`], changing nothing, once the
    /// whole chain has been freed.
    pub fn gather_used(&mut self, obj: &mut RingObject) -> Result<BufferElement, RingError> {
        let cur = obj.cur().ok_or(RingError::ChainExhausted)?;
        let (elem, next) = self.release(cur)?;
        obj.set_cur(next);
        Ok(elem)
    }

    /// Take the next completion and free its whole chain.
    ///
    /// # Returns
    ///
    /// - `Ok(UsedBuffer)` - A chain was completed and reclaimed
    /// - `Err(RingError::WouldBlock)` - No completions available
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, level = "Trace"))]
    pub fn reclaim_used(&mut self) -> Result<UsedBuffer, RingError> {
        let mut obj = RingObject::new();
        let len = self.get_used_buf(&mut obj)?;
        let id = obj.first().ok_or(RingError::Unbound)?;

        let mut descs = SmallVec::new();
        for _ in 0..self.queue_len {
            match self.gather_used(&mut obj) {
                Ok(elem) => descs.push(elem),
                Err(RingError::ChainExhausted) => return Ok(UsedBuffer { id, len, descs }),
                Err(e) => return Err(e),
            }
        }

        Err(RingError::BadChain)
    }

    /// Invoke the notification hook.
    pub fn notify(&self) {
        self.notifier.notify();
    }

    /// Number of descriptors and ring entries.
    pub fn queue_len(&self) -> usize {
        self.queue_len as usize
    }

    /// Number of descriptors on the free list.
    pub fn num_free(&self) -> usize {
        self.num_free
    }

    /// Number of published heads not yet taken back from the used ring.
    pub fn num_inflight(&self) -> usize {
        self.used_last_seen.next().distance_to(self.avail_idx) as usize
    }

    /// Check if the descriptor table is exhausted.
    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// Walk the free list from its head.
    pub fn free_list(&self) -> FreeList<'_, M> {
        FreeList {
            mem: &self.mem,
            desc_table: self.desc_table,
            queue_len: self.queue_len,
            cur: self.free_head,
            remaining: self.queue_len as usize,
        }
    }

    /// Get memory accessor reference
    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn cookie(&self) -> &C {
        &self.cookie
    }

    pub fn cookie_mut(&mut self) -> &mut C {
        &mut self.cookie
    }

    fn publish_head(&mut self, head: u16) -> Result<(), RingError> {
        self.avail_idx = self.avail.publish(&self.mem, self.avail_idx, head)?;
        self.outstanding.insert(head as usize);
        Ok(())
    }

    /// Ring indices are stored masked, so at most `queue_len - 1` heads can be
    /// outstanding before a reader could no longer tell full from empty.
    fn avail_full(&self) -> bool {
        self.num_inflight() >= self.queue_len as usize - 1
    }

    #[cfg(debug_assertions)]
    fn check_used_len(&self, head: u16, len: u32) {
        match self.desc_table.chain_size(&self.mem, Some(head)) {
            Ok(capacity) if len as u64 > capacity => {
                log::warn!("device reported {len} bytes for chain {head} with capacity {capacity}");
            }
            Ok(_) => {}
            Err(e) => log::warn!("cannot size chain {head}: {e}"),
        }
    }
}

/// Iterator over the descriptor indices on the free list.
pub struct FreeList<'a, M> {
    mem: &'a M,
    desc_table: DescTable,
    queue_len: u16,
    cur: Option<u16>,
    remaining: usize,
}

impl<M: MemOps> Iterator for FreeList<'_, M> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let idx = self.cur?;

        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        self.cur = self
            .desc_table
            .read(self.mem, idx)
            .ok()
            .and_then(|d| d.next_index(self.queue_len));

        Some(idx)
    }
}
