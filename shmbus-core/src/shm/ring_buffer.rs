// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Blocking slot ring buffer in shared memory.
//!
//! A fixed number of equally sized slots follow a [`RingHeader`]. Flow control
//! is the bounded-buffer protocol over three named semaphores:
//!
//! - writer: wait `free`, then under `mutex` copy into slot `tail` and advance
//!   it, then signal `filled`
//! - reader: wait `filled`, then under `mutex` copy out of slot `head` and
//!   advance it, then signal `free`
//!
//! One writer and one reader per ring is the intended pattern. Additional
//! writers are serialized by `mutex` but get no ordering guarantee among
//! themselves.

use std::ptr::{addr_of, addr_of_mut};
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use crate::error::SharedMemoryError;
use crate::shm::layout::{
    RingGeometry, RingHeader, HEADER_SIZE, LENGTH_PREFIX_SIZE, RING_MAGIC, RING_VERSION,
};
use crate::shm::semaphore::{RetryPolicy, Semaphore, SemaphoreGuard, SemaphoreTriplet};
use crate::shm::SharedMemoryRegion;
use crate::types::ShmName;

/// Shared memory ring buffer with semaphore flow control.
///
/// The creating instance owns the kernel names and is the only one that
/// removes them, via [`SharedRing::unlink_resources`]. Dropping any instance
/// unmaps the segment and closes the semaphore handles without unlinking.
pub struct SharedRing {
    region: SharedMemoryRegion,
    sems: SemaphoreTriplet,
    geometry: RingGeometry,
    unlinked: bool,
}

impl SharedRing {
    /// Create a ring or open an existing one.
    ///
    /// With `create` set, the segment and semaphores are created and fail if
    /// they already exist. Otherwise `slot_count` and `slot_size` are ignored
    /// in favour of the values stored in the header, and semaphore opens are
    /// retried with the default policy.
    pub fn create_or_open(
        name: &ShmName,
        slot_count: u32,
        slot_size: u32,
        create: bool,
    ) -> Result<Self, SharedMemoryError> {
        if create {
            let geometry = RingGeometry::new(slot_count, slot_size).map_err(|e| {
                SharedMemoryError::InvalidGeometry {
                    reason: e.to_string(),
                }
            })?;
            Self::create(name, geometry)
        } else {
            Self::open(name, RetryPolicy::default())
        }
    }

    /// Create a new ring: segment, header, zeroed slots and semaphores.
    ///
    /// Anything already created is unlinked again if a later step fails.
    pub fn create(name: &ShmName, geometry: RingGeometry) -> Result<Self, SharedMemoryError> {
        // Region::create zero-fills, which covers the slot area.
        let mut region = SharedMemoryRegion::create(name, geometry.segment_size())?;

        let header = region.as_ptr() as *mut RingHeader;
        // SAFETY: the region is at least HEADER_SIZE bytes, page aligned, and
        // not yet advertised to anyone
        unsafe {
            header.write(RingHeader {
                magic: 0,
                ..RingHeader::new(geometry)
            });
            // Openers treat a valid magic as "header complete".
            fence(Ordering::Release);
            addr_of_mut!((*header).magic).write_volatile(RING_MAGIC);
        }

        let sems = match SemaphoreTriplet::create(name.as_str(), geometry.slot_count()) {
            Ok(sems) => sems,
            Err(e) => {
                let _ = region.unlink();
                return Err(e.into());
            }
        };

        tracing::debug!(
            name = %name,
            slot_count = geometry.slot_count(),
            slot_size = geometry.slot_size(),
            "Created shared ring"
        );

        Ok(Self {
            region,
            sems,
            geometry,
            unlinked: false,
        })
    }

    /// Open an existing ring without taking ownership.
    ///
    /// Rejects segments whose magic or version does not match, or whose
    /// recorded geometry does not fit the segment. Semaphore opens are
    /// retried according to `retry` since the owner creates them after the
    /// segment.
    pub fn open(name: &ShmName, retry: RetryPolicy) -> Result<Self, SharedMemoryError> {
        let region = SharedMemoryRegion::open(name)?;

        if region.size() < HEADER_SIZE {
            return Err(SharedMemoryError::TooSmall {
                name: name.to_string(),
                size: region.size(),
                required: HEADER_SIZE,
            });
        }

        let header = region.as_ptr() as *const RingHeader;
        // SAFETY: the mapping holds a full header; everything but head and
        // tail is written once by the creator before the magic
        let (magic, snapshot) = unsafe {
            let magic = addr_of!((*header).magic).read_volatile();
            fence(Ordering::Acquire);
            (magic, header.read_volatile())
        };

        if magic != RING_MAGIC {
            return Err(SharedMemoryError::BadMagic {
                name: name.to_string(),
                found: magic,
            });
        }
        if snapshot.version != RING_VERSION {
            return Err(SharedMemoryError::UnsupportedVersion {
                name: name.to_string(),
                found: snapshot.version,
            });
        }

        let geometry = snapshot
            .geometry()
            .map_err(|e| SharedMemoryError::InvalidGeometry {
                reason: e.to_string(),
            })?;
        if region.size() < geometry.segment_size() {
            return Err(SharedMemoryError::TooSmall {
                name: name.to_string(),
                size: region.size(),
                required: geometry.segment_size(),
            });
        }

        let sems = SemaphoreTriplet::open(name.as_str(), retry)?;

        tracing::debug!(
            name = %name,
            slot_count = geometry.slot_count(),
            slot_size = geometry.slot_size(),
            "Opened shared ring"
        );

        Ok(Self {
            region,
            sems,
            geometry,
            unlinked: false,
        })
    }

    /// Write one message, blocking while the ring is full.
    ///
    /// A payload larger than `slot_size` is rejected before anything is
    /// touched.
    pub fn write_message(&self, payload: &[u8]) -> Result<(), SharedMemoryError> {
        self.check_payload(payload)?;
        self.sems.free.wait()?;
        self.store(payload)
    }

    /// Write one message if a slot is free right now.
    ///
    /// Returns `RingBufferFull` instead of blocking.
    pub fn try_write_message(&self, payload: &[u8]) -> Result<(), SharedMemoryError> {
        self.check_payload(payload)?;
        if !self.sems.free.try_wait()? {
            return Err(SharedMemoryError::RingBufferFull);
        }
        self.store(payload)
    }

    /// Write one message, waiting at most `timeout` for a free slot.
    ///
    /// Returns `RingBufferFull` if no slot freed up in time.
    pub fn write_message_timeout(
        &self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), SharedMemoryError> {
        self.check_payload(payload)?;
        if !self.sems.free.wait_timeout(timeout)? {
            return Err(SharedMemoryError::RingBufferFull);
        }
        self.store(payload)
    }

    /// Read the oldest message, blocking while the ring is empty.
    pub fn read_message(&self) -> Result<Vec<u8>, SharedMemoryError> {
        self.sems.filled.wait()?;
        self.load()
    }

    /// Read the oldest message if one is available right now.
    pub fn try_read_message(&self) -> Result<Option<Vec<u8>>, SharedMemoryError> {
        if !self.sems.filled.try_wait()? {
            return Ok(None);
        }
        self.load().map(Some)
    }

    /// Read the oldest message, waiting at most `timeout` for one.
    pub fn read_message_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, SharedMemoryError> {
        if !self.sems.filled.wait_timeout(timeout)? {
            return Ok(None);
        }
        self.load().map(Some)
    }

    /// Remove the segment and semaphore names from the kernel namespace.
    ///
    /// Only the creating instance does anything; for everyone else, and for
    /// repeated calls, this is a no-op. Returns whether names were removed.
    pub fn unlink_resources(&mut self) -> Result<bool, SharedMemoryError> {
        if !self.is_owner() || self.unlinked {
            return Ok(false);
        }

        let sem_result = self.sems.unlink();
        let shm_result = self.region.unlink();
        self.unlinked = true;

        sem_result?;
        shm_result?;

        tracing::debug!(name = %self.name(), "Unlinked shared ring resources");
        Ok(true)
    }

    pub fn name(&self) -> &ShmName {
        self.region.name()
    }

    pub fn is_owner(&self) -> bool {
        self.region.is_owner()
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn slot_count(&self) -> u32 {
        self.geometry.slot_count()
    }

    pub fn slot_size(&self) -> u32 {
        self.geometry.slot_size()
    }

    /// Current value of the `free` semaphore.
    pub fn free_slots(&self) -> Result<u32, SharedMemoryError> {
        Ok(self.sems.free.value()?)
    }

    /// Current value of the `filled` semaphore.
    pub fn filled_slots(&self) -> Result<u32, SharedMemoryError> {
        Ok(self.sems.filled.value()?)
    }

    /// Header `(head, tail)` read under the ring mutex.
    pub fn indices(&self) -> Result<(u32, u32), SharedMemoryError> {
        let _guard = SemaphoreGuard::acquire(&self.sems.mutex)?;
        let header = self.header();
        // SAFETY: header is valid and we hold the mutex
        unsafe {
            Ok((
                addr_of!((*header).head).read_volatile(),
                addr_of!((*header).tail).read_volatile(),
            ))
        }
    }

    /// Index of the next slot to read.
    pub fn head(&self) -> Result<u32, SharedMemoryError> {
        self.indices().map(|(head, _)| head)
    }

    /// Index of the next slot to write.
    pub fn tail(&self) -> Result<u32, SharedMemoryError> {
        self.indices().map(|(_, tail)| tail)
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), SharedMemoryError> {
        let max = self.geometry.slot_size() as usize;
        if payload.len() > max {
            return Err(SharedMemoryError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        Ok(())
    }

    fn header(&self) -> *mut RingHeader {
        self.region.as_ptr() as *mut RingHeader
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        // SAFETY: callers pass index < slot_count, and open/create checked
        // the segment holds all slots
        unsafe { self.region.as_ptr().add(self.geometry.slot_offset(index)) }
    }

    fn corrupt(&self, reason: String) -> SharedMemoryError {
        SharedMemoryError::CorruptState {
            name: self.name().to_string(),
            reason,
        }
    }

    /// Copy `payload` into slot `tail` and publish it. The caller holds one
    /// unit of `free`, which is given back if the copy cannot happen.
    fn store(&self, payload: &[u8]) -> Result<(), SharedMemoryError> {
        let guard = match SemaphoreGuard::acquire(&self.sems.mutex) {
            Ok(guard) => guard,
            Err(e) => {
                let _ = self.sems.free.signal();
                return Err(e.into());
            }
        };

        let header = self.header();
        let slot_count = self.geometry.slot_count();

        // SAFETY: header is valid and we hold the mutex
        let index = unsafe { addr_of!((*header).tail).read_volatile() };
        if index >= slot_count {
            drop(guard);
            let _ = self.sems.free.signal();
            return Err(self.corrupt(format!("tail {} >= slot_count {}", index, slot_count)));
        }

        let slot = self.slot_ptr(index);
        // SAFETY: slot has room for the prefix plus slot_size bytes, payload
        // length was checked against slot_size, and the free/filled protocol
        // guarantees no reader is looking at this slot
        unsafe {
            (slot as *mut u32).write_unaligned(payload.len() as u32);
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                slot.add(LENGTH_PREFIX_SIZE),
                payload.len(),
            );
            addr_of_mut!((*header).tail).write_volatile((index + 1) % slot_count);
        }
        drop(guard);

        self.sems.filled.signal()?;
        Ok(())
    }

    /// Copy the payload out of slot `head` and release the slot. The caller
    /// holds one unit of `filled`, which is given back if nothing was read.
    fn load(&self) -> Result<Vec<u8>, SharedMemoryError> {
        let guard = match SemaphoreGuard::acquire(&self.sems.mutex) {
            Ok(guard) => guard,
            Err(e) => {
                let _ = self.sems.filled.signal();
                return Err(e.into());
            }
        };

        let header = self.header();
        let slot_count = self.geometry.slot_count();

        // SAFETY: header is valid and we hold the mutex
        let index = unsafe { addr_of!((*header).head).read_volatile() };
        if index >= slot_count {
            drop(guard);
            let _ = self.sems.filled.signal();
            return Err(self.corrupt(format!("head {} >= slot_count {}", index, slot_count)));
        }

        let slot = self.slot_ptr(index);
        // SAFETY: slot has room for the length prefix
        let len = unsafe { (slot as *const u32).read_unaligned() } as usize;
        if len > self.geometry.slot_size() as usize {
            drop(guard);
            let _ = self.sems.filled.signal();
            return Err(self.corrupt(format!(
                "slot {} length {} > slot_size {}",
                index,
                len,
                self.geometry.slot_size()
            )));
        }

        let mut payload = vec![0u8; len];
        // SAFETY: len <= slot_size so the source stays inside the slot, and the
        // free/filled protocol guarantees no writer is touching this slot
        unsafe {
            std::ptr::copy_nonoverlapping(slot.add(LENGTH_PREFIX_SIZE), payload.as_mut_ptr(), len);
            addr_of_mut!((*header).head).write_volatile((index + 1) % slot_count);
        }
        drop(guard);

        self.sems.free.signal()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> ShmName {
        ShmName::new(format!("/shmbus_ring_{}_{}", tag, std::process::id())).unwrap()
    }

    fn create(tag: &str, slot_count: u32, slot_size: u32) -> SharedRing {
        SharedRing::create(&test_name(tag), RingGeometry::new(slot_count, slot_size).unwrap())
            .unwrap()
    }

    fn assert_conserved(ring: &SharedRing) {
        assert_eq!(
            ring.free_slots().unwrap() + ring.filled_slots().unwrap(),
            ring.slot_count()
        );
    }

    #[test]
    fn test_write_read() {
        let mut ring = create("basic", 4, 64);
        ring.write_message(b"hello").unwrap();
        assert_eq!(ring.read_message().unwrap(), b"hello");
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = create("fifo", 8, 32);
        let messages: Vec<Vec<u8>> = (0..8).map(|i| format!("Message {}", i).into_bytes()).collect();

        for m in &messages {
            ring.write_message(m).unwrap();
            assert_conserved(&ring);
        }
        for m in &messages {
            assert_eq!(&ring.read_message().unwrap(), m);
            assert_conserved(&ring);
        }

        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_wraparound() {
        let mut ring = create("wrap", 3, 16);
        for round in 0..10u32 {
            let payload = round.to_le_bytes();
            ring.write_message(&payload).unwrap();
            assert_eq!(ring.read_message().unwrap(), payload);
        }
        // 10 writes and reads over 3 slots leave both cursors at 10 % 3
        assert_eq!(ring.indices().unwrap(), (1, 1));
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_empty_and_full_payloads() {
        let mut ring = create("edges", 2, 8);
        ring.write_message(b"").unwrap();
        ring.write_message(&[7u8; 8]).unwrap();
        assert_eq!(ring.read_message().unwrap(), Vec::<u8>::new());
        assert_eq!(ring.read_message().unwrap(), vec![7u8; 8]);
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_oversized_rejected_without_side_effects() {
        let mut ring = create("oversize", 4, 16);
        ring.write_message(b"first").unwrap();
        let before = ring.indices().unwrap();

        let result = ring.write_message(&[0u8; 17]);
        assert!(matches!(
            result,
            Err(SharedMemoryError::PayloadTooLarge { size: 17, max: 16 })
        ));

        assert_eq!(ring.indices().unwrap(), before);
        assert_eq!(ring.free_slots().unwrap(), 3);
        assert_eq!(ring.filled_slots().unwrap(), 1);
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_capacity_bound() {
        let mut ring = create("capacity", 4, 16);
        for i in 0..4u8 {
            ring.try_write_message(&[i]).unwrap();
        }
        assert!(matches!(
            ring.try_write_message(&[4]),
            Err(SharedMemoryError::RingBufferFull)
        ));

        std::thread::scope(|s| {
            let writer = s.spawn(|| ring.write_message(&[4]));

            std::thread::sleep(Duration::from_millis(100));
            assert!(!writer.is_finished(), "fifth write should block");

            assert_eq!(ring.read_message().unwrap(), vec![0]);
            writer.join().unwrap().unwrap();
        });

        for expected in 1..=4u8 {
            assert_eq!(ring.read_message().unwrap(), vec![expected]);
        }
        assert_conserved(&ring);
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_try_read_and_timeout_on_empty() {
        let mut ring = create("empty", 2, 8);
        assert!(ring.try_read_message().unwrap().is_none());
        assert!(ring
            .read_message_timeout(Duration::from_millis(20))
            .unwrap()
            .is_none());

        ring.write_message(b"x").unwrap();
        assert_eq!(
            ring.read_message_timeout(Duration::from_millis(20)).unwrap(),
            Some(b"x".to_vec())
        );
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_write_timeout_on_full() {
        let mut ring = create("wfull", 1, 8);
        ring.write_message_timeout(b"a", Duration::from_millis(20))
            .unwrap();
        assert!(matches!(
            ring.write_message_timeout(b"b", Duration::from_millis(20)),
            Err(SharedMemoryError::RingBufferFull)
        ));
        assert_eq!((ring.head().unwrap(), ring.tail().unwrap()), (0, 0));
        assert_conserved(&ring);
        ring.unlink_resources().unwrap();
    }

    #[test]
    fn test_open_adopts_header_geometry() {
        let name = test_name("adopt");
        let mut owner = SharedRing::create_or_open(&name, 5, 40, true).unwrap();
        let reader = SharedRing::create_or_open(&name, 1, 1, false).unwrap();

        assert!(!reader.is_owner());
        assert_eq!(reader.slot_count(), 5);
        assert_eq!(reader.slot_size(), 40);

        owner.write_message(b"across handles").unwrap();
        assert_eq!(reader.read_message().unwrap(), b"across handles");

        owner.unlink_resources().unwrap();
    }

    #[test]
    fn test_create_existing_fails() {
        let name = test_name("exists");
        let mut owner = SharedRing::create_or_open(&name, 2, 8, true).unwrap();
        assert!(matches!(
            SharedRing::create_or_open(&name, 2, 8, true),
            Err(SharedMemoryError::AlreadyExists { .. })
        ));
        // the failed create must not have removed the live ring
        assert!(SharedRing::open(&name, RetryPolicy::once()).is_ok());
        owner.unlink_resources().unwrap();
    }

    #[test]
    fn test_bad_magic_rejected() {
        let name = test_name("magic");
        let mut owner = create("magic", 2, 8);

        let raw = SharedMemoryRegion::open(&name).unwrap();
        // SAFETY: the mapping is larger than 4 bytes and nothing else runs
        unsafe { (raw.as_ptr() as *mut u32).write(0xDEAD_BEEF) };

        let before = raw.size();
        let result = SharedRing::open(&name, RetryPolicy::once());
        assert!(matches!(
            result,
            Err(SharedMemoryError::BadMagic {
                found: 0xDEAD_BEEF,
                ..
            })
        ));

        // nothing else in the segment was touched by the failed open
        assert_eq!(raw.size(), before);
        assert_eq!(owner.free_slots().unwrap(), 2);
        assert_eq!(owner.filled_slots().unwrap(), 0);
        assert_eq!(owner.indices().unwrap(), (0, 0));

        owner.unlink_resources().unwrap();
    }

    #[test]
    fn test_unlink_owner_only() {
        let name = test_name("owner");
        let mut owner = create("owner", 2, 8);
        let mut other = SharedRing::open(&name, RetryPolicy::once()).unwrap();

        assert!(!other.unlink_resources().unwrap());
        drop(other);
        assert!(SharedRing::open(&name, RetryPolicy::once()).is_ok());

        assert!(owner.unlink_resources().unwrap());
        assert!(!owner.unlink_resources().unwrap());
        assert!(SharedRing::open(&name, RetryPolicy::once()).is_err());
    }

    #[test]
    fn test_corrupt_header_geometry_rejected() {
        let name = test_name("badgeom");
        let mut owner = create("badgeom", 2, 8);

        let raw = SharedMemoryRegion::open(&name).unwrap();
        let header = raw.as_ptr() as *mut RingHeader;
        // SAFETY: the mapping holds a full header and nothing else runs
        unsafe { addr_of_mut!((*header).slot_count).write_volatile(0) };

        let result = SharedRing::open(&name, RetryPolicy::once());
        assert!(matches!(
            result,
            Err(SharedMemoryError::InvalidGeometry { .. })
        ));

        owner.unlink_resources().unwrap();
    }

    #[test]
    fn test_invalid_geometry() {
        let result = SharedRing::create_or_open(&test_name("geometry"), 0, 8, true);
        assert!(matches!(
            result,
            Err(SharedMemoryError::InvalidGeometry { .. })
        ));
    }
}
