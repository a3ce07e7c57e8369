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

//! Descriptor Chain Cursors and Buffer Chains
//!
//! A [`RingObject`] is a caller-owned cursor over one descriptor chain. It moves
//! through three states:
//!
//! ```text
//!   ┌───────┐  bind (get_*_buf /     ┌────────┐  gather past tail  ┌───────────┐
//!   │ Unset │ ─────────────────────> │ Active │ ─────────────────> │ Exhausted │
//!   └───────┘  first add_available)  └────────┘                    └───────────┘
//!       ^                                                                │
//!       └──────────────────────────── reset() ───────────────────────────┘
//! ```
//!
//! [`BufferChain`] is the owned counterpart: a whole scatter-gather list the
//! driver can publish in one step, or the device can read out in one step.

use core::marker::PhantomData;

use smallvec::SmallVec;

use super::{DescFlags, Descriptor, RingError};

/// Where a [`RingObject`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Not bound to any chain.
    Unset,
    /// Bound, and the cursor points at a descriptor.
    Active,
    /// Bound, and the cursor has walked past the tail.
    Exhausted,
}

/// Cursor over one descriptor chain.
///
/// On the driver side while building, `cur` is the tail the next buffer gets
/// linked after. While walking, `cur` is the next descriptor to gather.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingObject {
    first: Option<u16>,
    cur: Option<u16>,
}

impl RingObject {
    /// A fresh, unbound ring object.
    pub const fn new() -> Self {
        Self {
            first: None,
            cur: None,
        }
    }

    /// Return to [`ChainState::Unset`] so the object can be reused.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Head of the bound chain.
    #[inline]
    pub fn first(&self) -> Option<u16> {
        self.first
    }

    /// Current walk position.
    #[inline]
    pub fn cur(&self) -> Option<u16> {
        self.cur
    }

    pub fn state(&self) -> ChainState {
        match (self.first, self.cur) {
            (None, _) => ChainState::Unset,
            (Some(_), Some(_)) => ChainState::Active,
            (Some(_), None) => ChainState::Exhausted,
        }
    }

    /// Bind to the chain starting at `head` and rewind the cursor to it.
    #[inline]
    pub(crate) fn bind(&mut self, head: u16) {
        self.first = Some(head);
        self.cur = Some(head);
    }

    #[inline]
    pub(crate) fn set_cur(&mut self, cur: Option<u16>) {
        self.cur = cur;
    }
}

/// A single buffer element in a scatter-gather list.
///
/// Represents one contiguous memory region, as read back from a descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct BufferElement {
    /// Address of buffer
    pub addr: u64,
    /// Length of the buffer in bytes
    pub len: u32,
    /// Descriptor flags the driver set
    pub flags: DescFlags,
}

impl BufferElement {
    /// Is this buffer writable by the device
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(DescFlags::WRITE)
    }
}

impl From<&Descriptor> for BufferElement {
    fn from(desc: &Descriptor) -> Self {
        BufferElement {
            addr: desc.addr,
            len: desc.len,
            flags: desc.flags(),
        }
    }
}

/// Type-state: Can add readable buffers
pub struct Readable;

/// Type-state: Can add writable buffers (no more readables allowed)
pub struct Writable;

/// A builder for buffer chains using type-state to enforce readable/writable order.
///
/// Upholds invariants: at least one buffer must be present in the chain,
/// and readable buffers must be added before writable buffers.
#[derive(Debug)]
pub struct BufferChainBuilder<T> {
    elems: SmallVec<[BufferElement; 16]>,
    split: usize,
    marker: PhantomData<T>,
}

impl Default for BufferChainBuilder<Readable> {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferChainBuilder<Readable> {
    /// Create a new builder in the [`Readable`] state.
    pub fn new() -> Self {
        Self {
            elems: Default::default(),
            split: 0,
            marker: PhantomData,
        }
    }

    /// Add a readable buffer (device reads from this).
    pub fn readable(mut self, addr: u64, len: u32) -> Self {
        self.elems.push(BufferElement {
            addr,
            len,
            flags: DescFlags::empty(),
        });
        self.split += 1;
        self
    }

    /// Add a writable buffer (device writes to this).
    ///
    /// This transitions to Writable state so no more readable buffers can be added.
    pub fn writable(mut self, addr: u64, len: u32) -> BufferChainBuilder<Writable> {
        self.elems.push(BufferElement {
            addr,
            len,
            flags: DescFlags::WRITE,
        });

        BufferChainBuilder {
            elems: self.elems,
            split: self.split,
            marker: PhantomData,
        }
    }

    /// Build a buffer chain with only readable buffers.
    ///
    /// Chain must have at least one buffer otherwise an error is returned.
    pub fn build(self) -> Result<BufferChain, RingError> {
        BufferChain::from_parts(self.elems, self.split)
    }
}

impl BufferChainBuilder<Writable> {
    /// Add writable buffer
    pub fn writable(mut self, addr: u64, len: u32) -> Self {
        self.elems.push(BufferElement {
            addr,
            len,
            flags: DescFlags::WRITE,
        });
        self
    }

    /// Build the buffer chain.
    pub fn build(self) -> Result<BufferChain, RingError> {
        BufferChain::from_parts(self.elems, self.split)
    }
}

/// A chain of buffers, readable (driver->device) followed by writable
/// (device->driver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferChain {
    elems: SmallVec<[BufferElement; 16]>,
    split: usize,
}

impl BufferChain {
    fn from_parts(elems: SmallVec<[BufferElement; 16]>, split: usize) -> Result<Self, RingError> {
        if elems.is_empty() {
            return Err(RingError::EmptyChain);
        }

        Ok(Self { elems, split })
    }

    /// Collect elements read back from a descriptor chain.
    ///
    /// Rejects an empty chain, and a chain where a readable buffer follows a
    /// writable one.
    pub(crate) fn from_elems(elems: SmallVec<[BufferElement; 16]>) -> Result<Self, RingError> {
        let split = chain_readable_count(&elems)?;
        Self::from_parts(elems, split)
    }

    /// Get all buffer elements in the chain.
    pub fn elems(&self) -> &[BufferElement] {
        self.elems.as_slice()
    }

    /// Get readable buffers in chain
    pub fn readables(&self) -> &[BufferElement] {
        &self.elems[..self.split]
    }

    /// Get writable buffers in chain
    pub fn writables(&self) -> &[BufferElement] {
        &self.elems[self.split..]
    }

    /// Get total number of buffers in chain
    // Note: buffer chain cannot be empty by construction
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Sum of all buffer lengths.
    pub fn total_len(&self) -> u64 {
        self.elems.iter().map(|e| e.len as u64).sum()
    }
}

/// Check that a buffer chain is well-formed: all readable buffers first,
/// then writable and return the count of readable buffers.
fn chain_readable_count(elems: &[BufferElement]) -> Result<usize, RingError> {
    let mut seen_writable = false;
    let mut writables = 0;

    for e in elems {
        if e.is_writable() {
            seen_writable = true;
            writables += 1;
        } else if seen_writable {
            return Err(RingError::BadChain);
        }
    }

    Ok(elems.len() - writables)
}
