// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! Zero-copy inter-process communication using POSIX shared memory.
//! Provides a blocking slot ring guarded by named semaphores.

pub mod layout;
mod region;
mod ring_buffer;
mod semaphore;

pub use layout::{
    sanitize_semaphore_name, semaphore_name, RingGeometry, RingHeader, SemaphoreRole, HEADER_SIZE,
    RING_MAGIC, RING_VERSION,
};
pub use region::SharedMemoryRegion;
pub use ring_buffer::SharedRing;
pub use semaphore::{NamedSemaphore, RetryPolicy, Semaphore, SemaphoreGuard, SemaphoreTriplet};
