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

//! Memory Access Traits for Virtqueue Operations
//!
//! This module defines the [`MemOps`] trait that abstracts memory access patterns
//! required by the split ring. The rings never dereference shared memory
//! directly; they hand addresses to a backend, which lets the driver and device
//! views run over guest memory, host mappings or test buffers alike.

use bytemuck::Pod;

/// Backend-provided memory access for the split ring.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Addresses passed to methods are valid for the duration of the call
/// - Memory ordering guarantees are upheld as documented
/// - Reads and writes don't cause undefined behavior (alignment, validity)
pub trait MemOps {
    type Error;

    /// Read bytes from shared memory.
    ///
    /// Returns the number of bytes actually read (should equal `dst.len()` on success).
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write bytes to shared memory.
    ///
    /// Returns the number of bytes actually written (should equal `src.len()` on success).
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load a u16 with acquire semantics.
    ///
    /// Used for every ring `idx` observed from the other side. Reads of the
    /// ring slots and descriptors it covers must not be reordered before it.
    ///
    /// # Safety
    ///
    /// `addr` must translate to a valid, aligned `AtomicU16` in shared memory.
    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error>;

    /// Store a u16 with release semantics.
    ///
    /// Used for every ring `idx` published to the other side. Writes of the
    /// ring slots and descriptors it covers must not be reordered after it.
    ///
    /// # Safety
    ///
    /// `addr` must translate to a valid, aligned `AtomicU16` in shared memory.
    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error>;

    /// Read a Pod type at the given address.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod type at the given address.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }
}

impl<M: MemOps + ?Sized> MemOps for &M {
    type Error = M::Error;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read(addr, dst)
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(addr, src)
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        (**self).load_acquire(addr)
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        (**self).store_release(addr, val)
    }

    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        (**self).read_val(addr)
    }

    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        (**self).write_val(addr, val)
    }
}
