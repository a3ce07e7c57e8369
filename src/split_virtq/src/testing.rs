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

//! Shared-memory fixtures for unit tests.

use std::cell::UnsafeCell;
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::{
    AvailRing, DescTable, Descriptor, Layout, MemOps, UsedElem, UsedRing, VirtqDevice,
    VirtqDriver,
};

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Line([u8; 16]);

/// A heap buffer standing in for the shared region.
///
/// Storage is 16-byte aligned so the descriptor table can sit at its base.
/// Every access derives its pointer from the storage itself.
pub struct TestMem {
    lines: UnsafeCell<Box<[Line]>>,
    size: usize,
}

impl TestMem {
    pub fn new(size: usize) -> Self {
        let lines = vec![Line([0; 16]); size.div_ceil(16)].into_boxed_slice();
        Self {
            lines: UnsafeCell::new(lines),
            size,
        }
    }

    fn bytes(&self) -> *mut u8 {
        unsafe { (*self.lines.get()).as_mut_ptr().cast() }
    }

    pub fn base_addr(&self) -> u64 {
        self.bytes() as u64
    }

    /// Pointer to `len` bytes at `addr`; panics outside the buffer.
    fn at(&self, addr: u64, len: usize) -> *mut u8 {
        let offset = addr
            .checked_sub(self.base_addr())
            .map(|o| o as usize)
            .filter(|o| o + len <= self.size);

        match offset {
            Some(o) => self.bytes().wrapping_add(o),
            None => panic!("access of {len} bytes at {addr:#x} outside test memory"),
        }
    }

    /// Copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0; self.size];
        unsafe { ptr::copy_nonoverlapping(self.bytes(), out.as_mut_ptr(), self.size) };
        out
    }

    /// Set every byte of the buffer to `byte`.
    pub fn fill(&self, byte: u8) {
        unsafe { ptr::write_bytes(self.bytes(), byte, self.size) };
    }
}

impl MemOps for Rc<TestMem> {
    type Error = core::convert::Infallible;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.at(addr, dst.len());
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let dst = self.at(addr, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        let word = self.at(addr, 2).cast::<AtomicU16>();
        Ok(unsafe { (*word).load(Ordering::Acquire) })
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        let word = self.at(addr, 2).cast::<AtomicU16>();
        unsafe { (*word).store(val, Ordering::Release) };
        Ok(())
    }
}

/// A whole queue laid out at the start of its own [`TestMem`].
pub struct OwnedRing {
    mem: Rc<TestMem>,
    layout: Layout,
}

impl OwnedRing {
    pub fn new(queue_len: usize) -> Self {
        let mem = Rc::new(TestMem::new(Layout::query_size(queue_len)));
        let layout = unsafe { Layout::from_base(mem.base_addr(), queue_len) }.unwrap();
        Self { mem, layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn mem(&self) -> Rc<TestMem> {
        self.mem.clone()
    }

    pub fn len(&self) -> usize {
        self.layout.queue_len as usize
    }

    pub fn desc_table(&self) -> DescTable {
        self.layout.desc_table()
    }

    pub fn avail_ring(&self) -> AvailRing {
        self.layout.avail_ring()
    }

    pub fn used_ring(&self) -> UsedRing {
        self.layout.used_ring()
    }

    /// Read descriptor directly (for test verification)
    pub fn read_desc(&self, idx: u16) -> Descriptor {
        self.desc_table().read(&self.mem, idx).unwrap()
    }

    /// Raw `idx` word of the available ring
    pub fn avail_idx(&self) -> u16 {
        self.mem.read_val(self.avail_ring().idx_addr()).unwrap()
    }

    /// Head stored in available ring slot `slot`
    pub fn avail_slot(&self, slot: u16) -> u16 {
        self.mem
            .read_val(self.layout.avail_addr + 4 + slot as u64 * 2)
            .unwrap()
    }

    /// Raw `idx` word of the used ring
    pub fn used_idx(&self) -> u16 {
        self.mem.read_val(self.used_ring().idx_addr()).unwrap()
    }

    /// Completion stored in used ring slot `slot`
    pub fn used_slot(&self, slot: u16) -> UsedElem {
        self.mem
            .read_val(self.layout.used_addr + 4 + slot as u64 * 8)
            .unwrap()
    }

    /// Write a completion and bump the used index, as a device would
    pub fn push_used(&self, elem: UsedElem) {
        let slot = self.used_idx();
        self.mem
            .write_val(self.layout.used_addr + 4 + slot as u64 * 8, elem)
            .unwrap();
        let next = (slot + 1) & (self.layout.queue_len - 1);
        self.mem
            .store_release(self.used_ring().idx_addr(), next)
            .unwrap();
    }
}

pub(crate) type TestDriver = VirtqDriver<Rc<TestMem>, fn(), ()>;
pub(crate) type TestDevice = VirtqDevice<Rc<TestMem>, fn(), ()>;

fn no_notify() {}

pub(crate) fn make_ring(size: usize) -> OwnedRing {
    OwnedRing::new(size)
}

pub(crate) fn make_driver(ring: &OwnedRing) -> TestDriver {
    VirtqDriver::new(ring.layout(), ring.mem(), no_notify as fn(), ()).unwrap()
}

pub(crate) fn make_device(ring: &OwnedRing) -> TestDevice {
    VirtqDevice::new(ring.layout(), ring.mem(), no_notify as fn(), ()).unwrap()
}
