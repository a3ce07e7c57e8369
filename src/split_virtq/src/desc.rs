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

//! Virtqueue Descriptor Types
//!
//! This module defines the descriptor format for split virtqueues. Each
//! descriptor references one buffer; descriptors are chained through their
//! `next` field to form scatter-gather lists. Unused descriptors are threaded
//! through the same field into the driver's free list, so the table is an
//! index-addressed arena holding several disjoint linked traversals.
//!
//! ```text
//! free list:   head=3 ─► [3] ─► [4] ─► ... ─► [n-1] ─► n (end)
//! live chain:  [0] ─► [1] ─► [2] ─► n (end)
//! ```

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::{MemOps, RingError};

bitflags! {
    /// Descriptor flags as defined by VIRTIO specification.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DescFlags: u16 {
        /// This marks a buffer as continuing via the next field.
        const NEXT     = 1 << 0;
        /// This marks a buffer as device write-only (otherwise device read-only).
        const WRITE    = 1 << 1;
        /// This means the buffer contains a list of buffer descriptors (unsupported here).
        const INDIRECT = 1 << 2;
    }
}

#[cfg(feature = "fuzzing")]
impl<'a> arbitrary::Arbitrary<'a> for DescFlags {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from_bits_truncate(u.arbitrary()?))
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Address of the buffer.
    pub addr: u64,
    /// Length of the buffer in bytes.
    pub len: u32,
    /// Flags (NEXT, WRITE, INDIRECT).
    pub flags: u16,
    /// Index of the next descriptor, `queue_len` terminates the chain.
    pub next: u16,
}

const _: () = assert!(core::mem::size_of::<Descriptor>() == 16);
const _: () = assert!(Descriptor::ADDR_OFFSET == 0);
const _: () = assert!(Descriptor::LEN_OFFSET == 8);
const _: () = assert!(Descriptor::FLAGS_OFFSET == 12);
const _: () = assert!(Descriptor::NEXT_OFFSET == 14);

impl Descriptor {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    pub const ALIGN: usize = 16;

    pub const ADDR_OFFSET: usize = core::mem::offset_of!(Self, addr);
    pub const LEN_OFFSET: usize = core::mem::offset_of!(Self, len);
    pub const FLAGS_OFFSET: usize = core::mem::offset_of!(Self, flags);
    pub const NEXT_OFFSET: usize = core::mem::offset_of!(Self, next);

    pub fn new(addr: u64, len: u32, flags: DescFlags, next: Option<u16>, queue_len: u16) -> Self {
        Self {
            addr,
            len,
            flags: flags.bits(),
            next: encode_next(next, queue_len),
        }
    }

    /// Get flags as a [`DescFlags`] bitfield.
    #[inline]
    pub fn flags(&self) -> DescFlags {
        DescFlags::from_bits_truncate(self.flags)
    }

    /// Is this descriptor writable by the device?
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags().contains(DescFlags::WRITE)
    }

    /// Decode the `next` link. Anything at or past `queue_len` ends the chain.
    #[inline]
    pub fn next_index(&self, queue_len: u16) -> Option<u16> {
        decode_next(self.next, queue_len)
    }

    #[inline]
    pub fn set_next(&mut self, next: Option<u16>, queue_len: u16) {
        self.next = encode_next(next, queue_len);
    }
}

#[inline]
pub(crate) fn decode_next(raw: u16, queue_len: u16) -> Option<u16> {
    (raw < queue_len).then_some(raw)
}

#[inline]
pub(crate) fn encode_next(next: Option<u16>, queue_len: u16) -> u16 {
    next.unwrap_or(queue_len)
}

/// A table of descriptors stored in shared memory.
#[derive(Debug, Clone, Copy)]
pub struct DescTable {
    base_addr: u64,
    size: u16,
}

impl DescTable {
    /// Create a descriptor table from shared memory.
    ///
    /// # Safety
    ///
    /// - `base_addr` must be valid for reads and writes of `size` descriptors
    /// - `base_addr` must be aligned to [`Descriptor::ALIGN`]
    /// - memory must remain valid for the lifetime of this table
    pub unsafe fn from_raw_parts(base_addr: u64, size: u16) -> Self {
        Self { base_addr, size }
    }

    /// Get address of the descriptor at `idx` or None if idx is out of bounds
    pub fn desc_addr(&self, idx: u16) -> Option<u64> {
        if idx >= self.size {
            return None;
        }

        Some(self.base_addr + (idx as u64 * Descriptor::SIZE as u64))
    }

    /// Get number of descriptors in table
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// Is the descriptor table empty?
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Read the descriptor at `idx`.
    pub fn read<M: MemOps>(&self, mem: &M, idx: u16) -> Result<Descriptor, RingError> {
        let addr = self.desc_addr(idx).ok_or(RingError::BadIndex(idx as u32))?;
        mem.read_val(addr).map_err(|_| RingError::MemError)
    }

    /// Write the descriptor at `idx`.
    pub fn write<M: MemOps>(&self, mem: &M, idx: u16, desc: Descriptor) -> Result<(), RingError> {
        let addr = self.desc_addr(idx).ok_or(RingError::BadIndex(idx as u32))?;
        mem.write_val(addr, desc).map_err(|_| RingError::MemError)
    }

    /// Rewrite only the `next` link of the descriptor at `idx`.
    pub fn write_next<M: MemOps>(&self, mem: &M, idx: u16, next: Option<u16>) -> Result<(), RingError> {
        let addr = self.desc_addr(idx).ok_or(RingError::BadIndex(idx as u32))?;
        mem.write_val(
            addr + Descriptor::NEXT_OFFSET as u64,
            encode_next(next, self.size),
        )
        .map_err(|_| RingError::MemError)
    }

    /// Sum `len` over the chain starting at `head`, following `next` links to
    /// the end-of-chain sentinel. An unset head sums to zero.
    ///
    /// A chain cannot be longer than the table; walking more links than that
    /// means the links form a loop and [`RingError::BadChain`] is returned.
    pub fn chain_size<M: MemOps>(&self, mem: &M, head: Option<u16>) -> Result<u64, RingError> {
        let mut total = 0u64;
        let mut cur = head;
        let mut steps = 0usize;

        while let Some(idx) = cur {
            if steps == self.len() {
                return Err(RingError::BadChain);
            }

            let desc = self.read(mem, idx)?;
            total += desc.len as u64;
            cur = desc.next_index(self.size);
            steps += 1;
        }

        Ok(total)
    }

    /// Thread every entry into one free list: `entry[i].next = i + 1`, all
    /// other fields zeroed. The last entry links to the end-of-chain sentinel.
    pub fn init_free_list<M: MemOps>(&self, mem: &M) -> Result<(), RingError> {
        for i in 0..self.size {
            let desc = Descriptor {
                next: i + 1,
                ..Descriptor::zeroed()
            };
            self.write(mem, i, desc)?;
        }

        Ok(())
    }
}
