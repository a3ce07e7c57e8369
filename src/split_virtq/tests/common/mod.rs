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

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use split_virtq::{Layout, MemOps};

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; 16]);

/// A heap region standing in for memory shared between two domains.
///
/// Accesses go through raw pointers; the ring protocol keeps the two sides off
/// each other's bytes except for the ring indices, which are atomic.
pub struct SharedRegion {
    _storage: Box<[Chunk]>,
    base: *mut u8,
    len: usize,
}

// SAFETY: concurrent access is coordinated by the ring's acquire/release indices
unsafe impl Sync for SharedRegion {}
// SAFETY: the region owns its storage
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    pub fn new(len: usize) -> Arc<Self> {
        let mut storage = vec![Chunk([0; 16]); len.div_ceil(16)].into_boxed_slice();
        let base = storage.as_mut_ptr().cast::<u8>();
        Arc::new(Self {
            _storage: storage,
            base,
            len,
        })
    }

    pub fn base_addr(&self) -> u64 {
        self.base as u64
    }

    fn ptr_for_addr(&self, addr: u64, len: usize) -> Result<*mut u8, OutOfBounds> {
        let offset = addr
            .checked_sub(self.base_addr())
            .ok_or(OutOfBounds(addr))? as usize;
        if offset + len > self.len {
            return Err(OutOfBounds(addr));
        }
        Ok(self.base.wrapping_add(offset))
    }
}

#[derive(Debug)]
pub struct OutOfBounds(#[allow(dead_code)] pub u64);

/// Cloneable handle to a [`SharedRegion`]; a local type so it can implement `MemOps`.
#[derive(Clone)]
pub struct Region(Arc<SharedRegion>);

impl std::ops::Deref for Region {
    type Target = SharedRegion;

    fn deref(&self) -> &SharedRegion {
        &self.0
    }
}

impl MemOps for Region {
    type Error = OutOfBounds;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.ptr_for_addr(addr, dst.len())?;
        // SAFETY: bounds checked above
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let dst = self.ptr_for_addr(addr, src.len())?;
        // SAFETY: bounds checked above
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        let ptr = self.ptr_for_addr(addr, 2)?.cast::<AtomicU16>();
        // SAFETY: ring indices are 2-byte aligned inside the region
        Ok(unsafe { (*ptr).load(Ordering::Acquire) })
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        let ptr = self.ptr_for_addr(addr, 2)?.cast::<AtomicU16>();
        // SAFETY: ring indices are 2-byte aligned inside the region
        unsafe { (*ptr).store(val, Ordering::Release) };
        Ok(())
    }
}

/// A region sized for a contiguous queue of `queue_len` entries, plus its layout.
pub fn queue_region(queue_len: usize) -> (Region, Layout) {
    let region = SharedRegion::new(Layout::query_size(queue_len));
    // SAFETY: the region is sized by query_size and 16-byte aligned
    let layout = unsafe { Layout::from_base(region.base_addr(), queue_len) }.unwrap();
    (Region(region), layout)
}
