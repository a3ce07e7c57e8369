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

//! Device Side of a Split Virtqueue
//!
//! The device consumes chain heads from the available ring, walks each chain
//! read-only and publishes one completion per chain into the used ring. It
//! never allocates, frees or relinks descriptors: the table and its free list
//! belong to the driver.
//!
//! # Lifecycle
//!
//! 1. Poll: call [`get_available_buf`](VirtqDevice::get_available_buf) to bind a chain
//! 2. Process: call [`gather_available`](VirtqDevice::gather_available) until it
//!    reports [`RingError::ChainExhausted`]
//! 3. Complete: call [`add_used_buf`](VirtqDevice::add_used_buf) with the byte count
//! 4. Notify: call [`notify`](VirtqDevice::notify) when the driver should look

use smallvec::SmallVec;
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::layout::check_queue_len;
use super::ring::RingIndex;
use super::{
    AvailRing, BufferChain, BufferElement, DescTable, Layout, MemOps, Notifier, RingError,
    RingObject, UsedElem, UsedRing,
};

/// Device side of a split virtqueue.
#[derive(Debug)]
pub struct VirtqDevice<M, N, C = ()> {
    /// Memory accessor
    mem: M,
    /// Hook for interrupting the driver
    notifier: N,
    /// Caller bookkeeping
    cookie: C,
    queue_len: u16,
    desc_table: DescTable,
    avail: AvailRing,
    used: UsedRing,
    /// Last available ring slot consumed
    avail_last_seen: RingIndex,
}

impl<M: MemOps, N: Notifier, C> VirtqDevice<M, N, C> {
    /// Initialize the device side of a queue.
    ///
    /// Writes nothing to shared memory; the driver initializes the table and
    /// both rings.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, level = "Trace"))]
    pub fn new(layout: Layout, mem: M, notifier: N, cookie: C) -> Result<Self, RingError> {
        let queue_len = check_queue_len(layout.queue_len as usize)?;

        log::debug!("initialized split virtqueue device, queue_len={queue_len}");

        Ok(Self {
            mem,
            notifier,
            cookie,
            queue_len,
            desc_table: layout.desc_table(),
            avail: layout.avail_ring(),
            used: layout.used_ring(),
            avail_last_seen: RingIndex::reader_start(queue_len),
        })
    }

    /// Bind `obj` to the next chain the driver published.
    ///
    /// # Returns
    ///
    /// - `Ok(head)` - `obj` now walks the chain starting at `head`
    /// - `Err(RingError::WouldBlock)` - Nothing new was published
    /// - `Err(RingError::BadIndex)` - The driver published something that is
    ///   not a descriptor index; the entry is consumed
    pub fn get_available_buf(&mut self, obj: &mut RingObject) -> Result<u16, RingError> {
        let next = self.avail_last_seen.next();
        let idx = self.avail.load_idx(&self.mem)?;

        if next == idx {
            return Err(RingError::WouldBlock);
        }

        let head = self.avail.read_slot(&self.mem, next)?;
        self.avail_last_seen = next;

        if head >= self.queue_len {
            return Err(RingError::BadIndex(head as u32));
        }

        obj.bind(head);
        Ok(head)
    }

    /// Check whether a chain is waiting without consuming it.
    pub fn peek_available(&self) -> Result<bool, RingError> {
        let idx = self.avail.load_idx(&self.mem)?;
        Ok(self.avail_last_seen.next() != idx)
    }

    /// Read the descriptor under `obj`'s cursor and step to the next one.
    ///
    /// Nothing in shared memory changes. Fails with
    /// [`RingError::ChainExhausted`], leaving `obj` as it was, once the walk
    /// has passed the tail.
    pub fn gather_available(&self, obj: &mut RingObject) -> Result<BufferElement, RingError> {
        let cur = obj.cur().ok_or(RingError::ChainExhausted)?;
        let desc = self.desc_table.read(&self.mem, cur)?;
        obj.set_cur(desc.next_index(self.queue_len));
        Ok(BufferElement::from(&desc))
    }

    /// Total length of every buffer in the chain `obj` is bound to.
    ///
    /// Walks from `obj.first()` regardless of the cursor, so it can be called
    /// at any point and any number of times. An unbound `obj` sizes to zero.
    pub fn scattered_available_size(&self, obj: &RingObject) -> Result<u64, RingError> {
        self.desc_table.chain_size(&self.mem, obj.first())
    }

    /// Read the whole chain `obj` is bound to without moving its cursor.
    ///
    /// A [`BufferChain`] keeps every device-readable buffer before every
    /// device-writable one. [`VirtqDriver::add_available_chain`] always
    /// builds chains in that order, but
    /// [`VirtqDriver::add_available_buf`] takes flags per buffer and can
    /// interleave them. Walk such chains with
    /// [`gather_available`](Self::gather_available) instead.
    ///
    /// # Errors
    ///
    /// - [`RingError::BadChain`] - A readable buffer follows a writable one,
    ///   or the links loop
    ///
    /// [`VirtqDriver::add_available_chain`]: crate::VirtqDriver::add_available_chain
    /// [`VirtqDriver::add_available_buf`]: crate::VirtqDriver::add_available_buf
    pub fn read_available_chain(&self, obj: &RingObject) -> Result<BufferChain, RingError> {
        let mut walk = *obj;
        walk.set_cur(obj.first());

        let mut elems = SmallVec::new();
        for _ in 0..self.queue_len {
            match self.gather_available(&mut walk) {
                Ok(elem) => elems.push(elem),
                Err(RingError::ChainExhausted) => return BufferChain::from_elems(elems),
                Err(e) => return Err(e),
            }
        }

        if walk.cur().is_some() {
            return Err(RingError::BadChain);
        }

        BufferChain::from_elems(elems)
    }

    /// Publish a completion for the chain `obj` is bound to.
    ///
    /// `total_len` is the device's own byte count and is not checked against
    /// the chain's capacity; debug builds log a warning when it exceeds it.
    ///
    /// # Errors
    ///
    /// - [`RingError::Unbound`] - `obj` is not bound to a chain
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, level = "Trace"))]
    pub fn add_used_buf(&mut self, obj: &RingObject, total_len: u32) -> Result<(), RingError> {
        let head = obj.first().ok_or(RingError::Unbound)?;

        #[cfg(debug_assertions)]
        self.check_used_len(obj, total_len);

        // The device is the only writer of used.idx, so the stored value is
        // the slot to fill next.
        let slot = self.used.load_idx(&self.mem)?;
        let elem = UsedElem {
            id: head as u32,
            len: total_len,
        };
        self.used.publish(&self.mem, slot, elem)?;

        Ok(())
    }

    /// Invoke the notification hook.
    pub fn notify(&self) {
        self.notifier.notify();
    }

    /// Number of descriptors and ring entries.
    pub fn queue_len(&self) -> usize {
        self.queue_len as usize
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

    #[cfg(debug_assertions)]
    fn check_used_len(&self, obj: &RingObject, total_len: u32) {
        match self.scattered_available_size(obj) {
            Ok(capacity) if total_len as u64 > capacity => {
                log::warn!("completing {total_len} bytes on a chain with capacity {capacity}");
            }
            Ok(_) => {}
            Err(e) => log::warn!("cannot size chain: {e}"),
        }
    }
}
