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

use thiserror::Error;

/// Errors returned by ring operations.
///
/// Every failing operation leaves the ring and the caller's [`RingObject`]
/// untouched, so the same call can simply be retried later.
///
/// [`RingObject`]: crate::RingObject
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Invalid queue length {0}, must be a power of 2 between 2 and 32768")]
    InvalidQueueLen(usize),
    #[error("Invalid memory layout")]
    InvalidLayout,
    /// The driver's free list is empty.
    #[error("Descriptor table full")]
    TableFull,
    /// The available ring already carries `queue_len - 1` outstanding heads.
    #[error("Available ring full")]
    RingFull,
    /// Nothing new has been published; try again later.
    #[error("Operation would block")]
    WouldBlock,
    /// The ring object has walked past the end of its chain.
    #[error("Descriptor chain exhausted")]
    ChainExhausted,
    /// The ring object is not bound to any chain.
    #[error("Ring object is not bound to a chain")]
    Unbound,
    #[error("Descriptor index {0} out of range")]
    BadIndex(u32),
    #[error("Buffer chain is malformed")]
    BadChain,
    #[error("Buffer chain is empty")]
    EmptyChain,
    #[error("Backend memory error")]
    MemError,
}
