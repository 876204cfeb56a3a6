//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for zero-copy IPC.
//! All unsafe operations are encapsulated with bounds checking.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

use crate::error::SharedMemoryError;
use crate::types::ShmName;

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and the descriptor and releases both on drop.
/// Dropping never removes the kernel-visible name; only the creating
/// instance may do that, through [`SharedMemoryRegion::unlink`].
pub struct SharedMemoryRegion {
    /// Name of the shared memory object.
    name: ShmName,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// Descriptor for the shared memory object, closed on drop.
    _fd: OwnedFd,
    /// Whether this instance created the segment.
    is_owner: bool,
    /// Whether the name has already been unlinked.
    unlinked: bool,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: the region only hands out raw pointers; SharedRing serializes all
// access to the mapped bytes through its semaphores.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create a new shared memory segment, failing if the name is taken.
    ///
    /// The mapped bytes are zero-initialized.
    ///
    /// # Errors
    /// Returns SharedMemoryError if creation, sizing or mapping fails. On any
    /// failure after `shm_open` the name is unlinked again.
    pub fn create(name: &ShmName, size: usize) -> Result<Self, SharedMemoryError> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} outside 1..={}", size, Self::MAX_SIZE),
            });
        }

        let c_name = c_name(name, |reason| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let raw_fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600 as libc::mode_t,
            )
        };

        if raw_fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(SharedMemoryError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // SAFETY: raw_fd was just returned by shm_open and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let unlink_on_error = |err: SharedMemoryError| {
            // SAFETY: c_name is a valid CString
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            err
        };

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
        if result < 0 {
            return Err(unlink_on_error(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", std::io::Error::last_os_error()),
            }));
        }

        let ptr = map(&fd, size).map_err(unlink_on_error)?;

        // SAFETY: ptr is valid for size bytes and nobody else has seen it yet
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.clone(),
            ptr,
            size,
            _fd: fd,
            is_owner: true,
            unlinked: false,
        })
    }

    /// Open an existing shared memory segment and map all of it.
    ///
    /// The mapped size is taken from the segment itself.
    pub fn open(name: &ShmName) -> Result<Self, SharedMemoryError> {
        let open_failed = |reason: String| SharedMemoryError::OpenFailed {
            name: name.to_string(),
            reason,
        };

        let c_name = c_name(name, open_failed)?;

        // SAFETY: c_name is a valid CString
        let raw_fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if raw_fd < 0 {
            return Err(open_failed(format!(
                "shm_open failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        // SAFETY: raw_fd was just returned by shm_open and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        // SAFETY: stat is plain data, fully written by fstat on success
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid and stat points to writable memory
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(open_failed(format!(
                "fstat failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let size = stat.st_size as usize;
        if size == 0 {
            return Err(SharedMemoryError::TooSmall {
                name: name.to_string(),
                size,
                required: 1,
            });
        }
        if size > Self::MAX_SIZE {
            return Err(open_failed(format!(
                "Segment size {} exceeds {}",
                size,
                Self::MAX_SIZE
            )));
        }

        let ptr = map(&fd, size)?;

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.clone(),
            ptr,
            size,
            _fd: fd,
            is_owner: false,
            unlinked: false,
        })
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &ShmName {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this instance created the segment.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Remove the segment name from the kernel namespace.
    ///
    /// No-op for non-owners and for a second call. Existing mappings stay
    /// valid until they are dropped. Returns whether a name was removed.
    pub fn unlink(&mut self) -> Result<bool, SharedMemoryError> {
        if !self.is_owner || self.unlinked {
            return Ok(false);
        }

        let c_name = c_name(&self.name, |reason| SharedMemoryError::Unlink {
            name: self.name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let errno = std::io::Error::last_os_error();
            // Someone else already removed it; nothing left to do.
            if errno.raw_os_error() != Some(libc::ENOENT) {
                return Err(SharedMemoryError::Unlink {
                    name: self.name.to_string(),
                    reason: errno.to_string(),
                });
            }
        }

        self.unlinked = true;
        tracing::debug!(name = %self.name, "Unlinked shared memory region");
        Ok(true)
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }
        // _fd closes itself
    }
}

fn c_name<E>(name: &ShmName, err: impl FnOnce(String) -> E) -> Result<CString, E> {
    CString::new(name.as_str()).map_err(|e| err(format!("Invalid name: {}", e)))
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
    // SAFETY: fd is valid, size is non-zero, offset 0 is valid
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(SharedMemoryError::MapFailed {
            reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
        });
    }

    NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
        reason: "mmap returned null".to_string(),
    })
}
