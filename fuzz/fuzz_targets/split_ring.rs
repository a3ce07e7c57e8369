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

#![no_main]

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU16, Ordering};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use split_virtq::{
    BufferChainBuilder, BufferElement, Layout, MemOps, RingError, RingObject, VirtqDevice,
    VirtqDriver,
};

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; 16]);

struct Region {
    storage: UnsafeCell<Vec<Chunk>>,
    len: usize,
}

#[derive(Debug)]
struct OutOfBounds;

impl Region {
    fn new(len: usize) -> Self {
        Self {
            storage: UnsafeCell::new(vec![Chunk([0; 16]); len.div_ceil(16)]),
            len,
        }
    }

    fn base(&self) -> u64 {
        // SAFETY: the vec is never resized after construction
        unsafe { (*self.storage.get()).as_mut_ptr() as u64 }
    }

    fn check(&self, addr: u64, len: usize) -> Result<*mut u8, OutOfBounds> {
        let offset = addr.checked_sub(self.base()).ok_or(OutOfBounds)? as usize;
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(OutOfBounds);
        }
        Ok(addr as *mut u8)
    }
}

impl MemOps for Region {
    type Error = OutOfBounds;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.check(addr, dst.len())?;
        // SAFETY: bounds checked above
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let dst = self.check(addr, src.len())?;
        // SAFETY: bounds checked above
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        let p = self.check(addr, 2)?;
        // SAFETY: bounds checked above, ring idx fields are 2-byte aligned
        Ok(unsafe { (*(p as *const AtomicU16)).load(Ordering::Acquire) })
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        let p = self.check(addr, 2)?;
        // SAFETY: as for load_acquire
        unsafe { (*(p as *const AtomicU16)).store(val, Ordering::Release) };
        Ok(())
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    /// Driver builds a chain one buffer at a time
    AddBuf { count: u8, elem: BufferElement },
    /// Driver publishes a prebuilt chain
    AddChain { readable: u8, writable: u8 },
    /// Device takes a chain and completes it
    Complete { len: u32 },
    /// Driver reclaims one completion
    Reclaim,
    /// Scribble over shared memory the way a hostile peer could
    Corrupt { offset: u16, bytes: [u8; 4] },
}

#[derive(Arbitrary, Debug)]
struct Input {
    log_len: u8,
    ops: Vec<Op>,
}

// Neither side may panic, whatever the other side leaves in shared memory.
fuzz_target!(|input: Input| {
    let queue_len = 1usize << (input.log_len % 8 + 1);
    let region = Region::new(Layout::query_size(queue_len));
    // SAFETY: the region outlives both views and is sized by query_size
    let Ok(layout) = (unsafe { Layout::from_base(region.base(), queue_len) }) else {
        return;
    };

    let mut drv = VirtqDriver::new(layout, &region, || {}, ()).unwrap();
    let mut dev = VirtqDevice::new(layout, &region, || {}, ()).unwrap();

    for op in input.ops {
        match op {
            Op::AddBuf { count, elem } => {
                let mut obj = RingObject::new();
                for _ in 0..count % 4 + 1 {
                    if drv
                        .add_available_buf(&mut obj, elem.addr, elem.len, elem.flags)
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Op::AddChain { readable, writable } => {
                let mut builder = BufferChainBuilder::new();
                for i in 0..readable % 4 {
                    builder = builder.readable(0x1000 * i as u64, 64);
                }
                let mut builder = builder.writable(0x8000, 128);
                for i in 0..writable % 4 {
                    builder = builder.writable(0x9000 + 0x100 * i as u64, 256);
                }
                if let Ok(chain) = builder.build() {
                    let _ = drv.add_available_chain(&chain);
                }
            }
            Op::Complete { len } => {
                let mut obj = RingObject::new();
                match dev.get_available_buf(&mut obj) {
                    Ok(_) => {
                        let _ = dev.scattered_available_size(&obj);
                        let _ = dev.read_available_chain(&obj);
                        // Corrupted links can loop; a chain never outgrows the table
                        for _ in 0..dev.queue_len() {
                            if dev.gather_available(&mut obj).is_err() {
                                break;
                            }
                        }
                        let _ = dev.add_used_buf(&obj, len);
                    }
                    Err(RingError::WouldBlock | RingError::BadIndex(_)) => {}
                    Err(e) => panic!("unexpected device error: {e:?}"),
                }
            }
            Op::Reclaim => {
                let _ = drv.reclaim_used();
                assert!(drv.num_free() <= drv.queue_len());
                assert!(drv.free_list().count() <= drv.queue_len());
            }
            Op::Corrupt { offset, bytes } => {
                let addr = region.base() + (offset as usize % region.len) as u64;
                let n = bytes.len().min(region.len - (addr - region.base()) as usize);
                let _ = region.write(addr, &bytes[..n]);
            }
        }
    }
});
