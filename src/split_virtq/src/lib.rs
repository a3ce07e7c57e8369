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

//! Split Virtqueue Implementation
//!
//! This crate implements the split virtqueue ring protocol: a descriptor table,
//! an available ring written by the driver and a used ring written by the
//! device, all living in a caller-provided shared memory region.
//!
//! # Architecture
//!
//! - **Views** ([`VirtqDriver`], [`VirtqDevice`]): the two endpoints. The driver
//!   owns the descriptor free list, publishes chain heads into the available
//!   ring and reclaims completed chains from the used ring. The device walks
//!   published chains read-only and publishes completions.
//!
//! - **Cursors** ([`RingObject`]): a caller-owned cursor over one descriptor
//!   chain, bound by [`VirtqDriver::get_used_buf`] or
//!   [`VirtqDevice::get_available_buf`] and advanced one descriptor per gather.
//!
//! - **Wire types** ([`Descriptor`], [`AvailRing`], [`UsedRing`]): raw
//!   `#[repr(C)]` structures in the conventional split-ring layout.
//!
//! - **Memory access** ([`MemOps`]): every access to shared memory goes through
//!   this trait, so the same ring code runs over guest memory, a host mapping or
//!   a plain buffer in tests.
//!
//! # Data flow
//!
//! ```text
//!  driver                                   device
//!  ------                                   ------
//!  allocate / chain descriptors
//!  publish head ──► avail ring ──► get_available_buf
//!                                  gather_available (walk, read-only)
//!  get_used_buf ◄── used ring  ◄── add_used_buf(total_len)
//!  gather_used (walk, frees)
//! ```
//!
//! # Memory ordering
//!
//! Ring indices are the only publication points. Every index publish is a
//! [`MemOps::store_release`] and every index observation is a
//! [`MemOps::load_acquire`]; descriptor contents and ring slots are ordered by
//! those two operations. Notification delivery is left to the integrator via
//! [`Notifier`].
//!
//! # Example
//!
//! ```ignore
//! let layout = unsafe { Layout::from_base(base, 256)? };
//! let mut driver = VirtqDriver::new(layout, mem.clone(), kick, ())?;
//! let mut device = VirtqDevice::new(layout, mem, irq, ())?;
//!
//! let mut obj = RingObject::new();
//! driver.add_available_buf(&mut obj, req_addr, req_len, DescFlags::NEXT)?;
//! driver.add_available_buf(&mut obj, resp_addr, resp_len, DescFlags::WRITE)?;
//! driver.notify();
//!
//! let mut robj = RingObject::new();
//! device.get_available_buf(&mut robj)?;
//! while let Ok(elem) = device.gather_available(&mut robj) {
//!     process(elem);
//! }
//! device.add_used_buf(&robj, written)?;
//! device.notify();
//! ```

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod access;
mod chain;
mod desc;
mod device;
mod driver;
mod error;
mod layout;
mod ring;

#[cfg(test)]
pub(crate) mod testing;

pub use access::*;
pub use chain::*;
pub use desc::*;
pub use device::*;
pub use driver::*;
pub use error::*;
pub use layout::*;
pub use ring::*;

/// A hook for notifying the other side about newly published entries.
///
/// Ring operations never call this on their own; publishing and then
/// notifying is the caller's decision.
pub trait Notifier {
    fn notify(&self);
}

impl<F: Fn()> Notifier for F {
    fn notify(&self) {
        self()
    }
}
