// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Binary layout of a shared ring segment.
//!
//! ```text
//! [RingHeader: 52 bytes][slot 0][slot 1]...[slot N-1]
//! slot i at HEADER_SIZE + i * (4 + slot_size): [length: u32][payload: slot_size bytes]
//! ```
//!
//! All integers are native-endian; peers share a machine.

use crate::error::HardValidationError;

/// Magic number at offset 0 of every ring segment.
pub const RING_MAGIC: u32 = 0xA1B2_C3D4;

/// Current ring format version.
pub const RING_VERSION: u32 = 1;

/// Size of the length prefix in front of each slot payload.
pub const LENGTH_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

/// Largest accepted slot count.
pub const MAX_SLOT_COUNT: u32 = 65_536;

/// Largest accepted slot payload size (16 MB).
pub const MAX_SLOT_SIZE: u32 = 16 * 1024 * 1024;

/// Ring header stored at the start of shared memory.
///
/// `head` and `tail` are only read or written while holding the ring's
/// `mutex` semaphore.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RingHeader {
    pub magic: u32,
    pub version: u32,
    pub slot_count: u32,
    /// Payload bytes per slot, excluding the length prefix.
    pub slot_size: u32,
    /// Next slot to read.
    pub head: u32,
    /// Next slot to write.
    pub tail: u32,
    pub reserved: [u8; 28],
}

const _: () = assert!(HEADER_SIZE == 52);

impl RingHeader {
    /// Fresh header for a ring of the given geometry.
    pub fn new(geometry: RingGeometry) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            slot_count: geometry.slot_count,
            slot_size: geometry.slot_size,
            head: 0,
            tail: 0,
            reserved: [0; 28],
        }
    }

    /// Geometry recorded in this header, if it is within bounds.
    pub fn geometry(&self) -> Result<RingGeometry, HardValidationError> {
        RingGeometry::new(self.slot_count, self.slot_size)
    }
}

/// Validated slot count and slot size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    slot_count: u32,
    slot_size: u32,
}

impl RingGeometry {
    /// Create a geometry, rejecting zero or oversized values.
    pub fn new(slot_count: u32, slot_size: u32) -> Result<Self, HardValidationError> {
        if !(1..=MAX_SLOT_COUNT).contains(&slot_count) {
            return Err(HardValidationError::OutOfBounds {
                field: "slot_count",
                value: slot_count as u64,
                min: 1,
                max: MAX_SLOT_COUNT as u64,
            });
        }
        if !(1..=MAX_SLOT_SIZE).contains(&slot_size) {
            return Err(HardValidationError::OutOfBounds {
                field: "slot_size",
                value: slot_size as u64,
                min: 1,
                max: MAX_SLOT_SIZE as u64,
            });
        }
        Ok(Self {
            slot_count,
            slot_size,
        })
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Bytes occupied by one slot including its length prefix.
    pub fn slot_stride(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.slot_size as usize
    }

    /// Byte offset of slot `index` from the start of the segment.
    pub fn slot_offset(&self, index: u32) -> usize {
        HEADER_SIZE + index as usize * self.slot_stride()
    }

    /// Total segment size: header plus all slots.
    pub fn segment_size(&self) -> usize {
        HEADER_SIZE + self.slot_count as usize * self.slot_stride()
    }
}

/// Which member of the semaphore triplet a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreRole {
    /// Counts empty slots.
    Free,
    /// Counts slots holding unread data.
    Filled,
    /// Guards header index mutation.
    Mutex,
}

impl SemaphoreRole {
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Free => "_free",
            Self::Filled => "_filled",
            Self::Mutex => "_mutex",
        }
    }
}

/// Sanitize a base string into a valid named-semaphore name.
///
/// Leading separators are stripped, embedded `/` become `_`, and a single
/// leading `/` is added. Applying it twice gives the same result.
pub fn sanitize_semaphore_name(base: &str) -> String {
    let body: String = base
        .trim_start_matches('/')
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    format!("/{}", body)
}

/// Semaphore name for one member of the triplet guarding `shm_name`.
pub fn semaphore_name(shm_name: &str, role: SemaphoreRole) -> String {
    sanitize_semaphore_name(&format!("{}{}", shm_name, role.suffix()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_field_offsets() {
        assert_eq!(std::mem::offset_of!(RingHeader, magic), 0);
        assert_eq!(std::mem::offset_of!(RingHeader, version), 4);
        assert_eq!(std::mem::offset_of!(RingHeader, slot_count), 8);
        assert_eq!(std::mem::offset_of!(RingHeader, slot_size), 12);
        assert_eq!(std::mem::offset_of!(RingHeader, head), 16);
        assert_eq!(std::mem::offset_of!(RingHeader, tail), 20);
        assert_eq!(HEADER_SIZE, 52);
    }

    #[test]
    fn test_slot_offsets() {
        let geometry = RingGeometry::new(4, 64).unwrap();
        assert_eq!(geometry.slot_stride(), 68);
        assert_eq!(geometry.slot_offset(0), HEADER_SIZE);
        assert_eq!(geometry.slot_offset(3), HEADER_SIZE + 3 * 68);
        assert_eq!(geometry.segment_size(), HEADER_SIZE + 4 * 68);
    }

    #[test]
    fn test_geometry_bounds() {
        assert!(RingGeometry::new(0, 64).is_err());
        assert!(RingGeometry::new(4, 0).is_err());
        assert!(RingGeometry::new(MAX_SLOT_COUNT + 1, 64).is_err());
        assert!(RingGeometry::new(4, MAX_SLOT_SIZE + 1).is_err());
        assert!(RingGeometry::new(MAX_SLOT_COUNT, MAX_SLOT_SIZE).is_ok());
    }

    #[test]
    fn test_new_header() {
        let header = RingHeader::new(RingGeometry::new(8, 256).unwrap());
        assert_eq!(header.magic, RING_MAGIC);
        assert_eq!(header.version, RING_VERSION);
        assert_eq!((header.head, header.tail), (0, 0));
        assert_eq!(header.geometry().unwrap(), RingGeometry::new(8, 256).unwrap());
    }

    #[test]
    fn test_semaphore_names() {
        assert_eq!(
            semaphore_name("/ipc_demo_42", SemaphoreRole::Free),
            "/ipc_demo_42_free"
        );
        assert_eq!(
            semaphore_name("/ipc_demo_42", SemaphoreRole::Filled),
            "/ipc_demo_42_filled"
        );
        assert_eq!(
            semaphore_name("/ipc_demo_42", SemaphoreRole::Mutex),
            "/ipc_demo_42_mutex"
        );
    }

    #[test]
    fn test_sanitize_embedded_separators() {
        assert_eq!(sanitize_semaphore_name("/a/b/c_free"), "/a_b_c_free");
        assert_eq!(sanitize_semaphore_name("plain"), "/plain");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for base in ["/ring_free", "ring/x_mutex", "//double/slash", "/", ""] {
            let once = sanitize_semaphore_name(base);
            assert_eq!(sanitize_semaphore_name(&once), once, "base {:?}", base);
        }
    }
}
