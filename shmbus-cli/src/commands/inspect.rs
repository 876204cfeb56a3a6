// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmbus inspect` command - Show the state of an existing ring.

use shmbus_core::shm::{RING_MAGIC, RING_VERSION};
use shmbus_core::{RetryPolicy, SharedRing, ShmName};

pub async fn execute(shm_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let name = ShmName::new(shm_name)?;

    // Opening checks magic, version and geometry; nothing is waited for
    let ring = SharedRing::open(&name, RetryPolicy::once())?;
    let geometry = ring.geometry();
    let (head, tail) = ring.indices()?;

    println!("Ring {}", ring.name());
    println!("  Magic:         {:#010x}", RING_MAGIC);
    println!("  Version:       {}", RING_VERSION);
    println!("  Slot Count:    {}", geometry.slot_count());
    println!("  Slot Size:     {} bytes", geometry.slot_size());
    println!("  Segment Size:  {} bytes", geometry.segment_size());
    println!("  Head:          {}", head);
    println!("  Tail:          {}", tail);
    println!();
    println!("Semaphores:");
    println!("  Free:          {}", ring.free_slots()?);
    println!("  Filled:        {}", ring.filled_slots()?);

    Ok(())
}
