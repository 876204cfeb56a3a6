// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Named semaphores for cross-process flow control.
//!
//! The ring algorithm only talks to the [`Semaphore`] trait. [`NamedSemaphore`]
//! implements it on top of POSIX `sem_open`, and [`SemaphoreTriplet`] bundles
//! the `free` / `filled` / `mutex` set that guards one ring.

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::SemaphoreError;
use crate::shm::layout::{semaphore_name, SemaphoreRole};

/// Counting semaphore operations used by the ring buffer.
pub trait Semaphore {
    /// Block until the count can be decremented.
    ///
    /// Interruptions by signals are retried and never reported.
    fn wait(&self) -> Result<(), SemaphoreError>;

    /// Decrement if possible without blocking. Returns whether it did.
    fn try_wait(&self) -> Result<bool, SemaphoreError>;

    /// Like [`Semaphore::wait`] but gives up after `timeout`.
    /// Returns whether the count was decremented.
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError>;

    /// Increment the count, waking one waiter.
    fn signal(&self) -> Result<(), SemaphoreError>;

    /// Current count.
    fn value(&self) -> Result<u32, SemaphoreError>;
}

/// Held semaphore unit that is signalled back when dropped.
///
/// Used for the ring's `mutex` so that an early return or a panic inside the
/// critical section cannot leave it held.
pub struct SemaphoreGuard<'a, S: Semaphore + ?Sized> {
    sem: &'a S,
}

impl<'a, S: Semaphore + ?Sized> SemaphoreGuard<'a, S> {
    /// Wait on `sem` and return a guard that releases it.
    pub fn acquire(sem: &'a S) -> Result<Self, SemaphoreError> {
        sem.wait()?;
        Ok(Self { sem })
    }
}

impl<S: Semaphore + ?Sized> Drop for SemaphoreGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.signal() {
            tracing::error!(error = %e, "Failed to release semaphore guard");
        }
    }
}

/// Bounded retry schedule with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_backoff: Duration,
}

impl RetryPolicy {
    /// Upper bound on a single backoff step.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

    /// Create a policy. At least one attempt is always made.
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to sleep after failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(Self::MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(100))
    }
}

/// POSIX named semaphore handle.
///
/// Dropping closes the handle; the name stays in the kernel namespace until
/// [`NamedSemaphore::unlink`] is called.
pub struct NamedSemaphore {
    name: String,
    sem: NonNull<libc::sem_t>,
}

// SAFETY: sem_t handles from sem_open are process-wide and the sem_* calls
// are thread-safe.
unsafe impl Send for NamedSemaphore {}

// SAFETY: see above; every operation goes through thread-safe libc calls.
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a semaphore with an initial count, failing if the name exists.
    pub fn create(name: &str, initial: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|e| SemaphoreError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })?;

        // SAFETY: c_name is a valid CString; O_CREAT requires the mode and
        // value arguments, passed as unsigned ints per the C prototype
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial as libc::c_uint,
            )
        };

        match Self::from_raw(name, sem) {
            Some(sem) => {
                tracing::debug!(name = %name, initial = initial, "Created semaphore");
                Ok(sem)
            }
            None => {
                let errno = Errno::last();
                if errno == Errno::EEXIST {
                    Err(SemaphoreError::AlreadyExists {
                        name: name.to_string(),
                    })
                } else {
                    Err(SemaphoreError::CreateFailed {
                        name: name.to_string(),
                        reason: errno.to_string(),
                    })
                }
            }
        }
    }

    /// Open an existing semaphore once.
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        Self::open_with_retry(name, RetryPolicy::once())
    }

    /// Open an existing semaphore, retrying while it does not exist yet.
    pub fn open_with_retry(name: &str, retry: RetryPolicy) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|e| SemaphoreError::OpenFailed {
            name: name.to_string(),
            attempts: 0,
            reason: format!("Invalid name: {}", e),
        })?;

        let mut last = Errno::UnknownErrno;
        for attempt in 0..retry.attempts() {
            // SAFETY: c_name is a valid CString
            let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
            if let Some(sem) = Self::from_raw(name, sem) {
                tracing::debug!(name = %name, attempt = attempt, "Opened semaphore");
                return Ok(sem);
            }

            last = Errno::last();
            if last != Errno::ENOENT {
                // Only "not created yet" is worth waiting for.
                break;
            }
            if attempt + 1 < retry.attempts() {
                tracing::debug!(name = %name, attempt = attempt, "Semaphore not ready, retrying");
                std::thread::sleep(retry.backoff(attempt));
            }
        }

        Err(SemaphoreError::OpenFailed {
            name: name.to_string(),
            attempts: retry.attempts(),
            reason: last.to_string(),
        })
    }

    /// Remove a semaphore name from the kernel namespace.
    ///
    /// A name that is already gone is not an error.
    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|e| SemaphoreError::Unlink {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })?;

        // SAFETY: c_name is a valid CString
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } < 0 {
            let errno = Errno::last();
            if errno != Errno::ENOENT {
                return Err(SemaphoreError::Unlink {
                    name: name.to_string(),
                    reason: errno.to_string(),
                });
            }
        }

        tracing::debug!(name = %name, "Unlinked semaphore");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn from_raw(name: &str, sem: *mut libc::sem_t) -> Option<Self> {
        if sem == libc::SEM_FAILED {
            return None;
        }
        NonNull::new(sem).map(|sem| Self {
            name: name.to_string(),
            sem,
        })
    }

    fn wait_failed(&self, errno: Errno) -> SemaphoreError {
        SemaphoreError::WaitFailed {
            name: self.name.clone(),
            reason: errno.to_string(),
        }
    }

    #[cfg(target_os = "linux")]
    fn deadline(timeout: Duration) -> libc::timespec {
        // SAFETY: timespec is plain data, fully written by clock_gettime
        let mut now: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: now points to writable memory; CLOCK_REALTIME always exists
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };

        let nanos = now.tv_nsec as u64 + timeout.subsec_nanos() as u64;
        let secs = (now.tv_sec as u64)
            .saturating_add(timeout.as_secs())
            .saturating_add(nanos / 1_000_000_000);
        now.tv_sec = secs.min(libc::time_t::MAX as u64) as libc::time_t;
        now.tv_nsec = (nanos % 1_000_000_000) as _;
        now
    }
}

impl Semaphore for NamedSemaphore {
    fn wait(&self) -> Result<(), SemaphoreError> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(self.wait_failed(errno)),
            }
        }
    }

    fn try_wait(&self) -> Result<bool, SemaphoreError> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return Ok(false),
                errno => return Err(self.wait_failed(errno)),
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        let deadline = Self::deadline(timeout);
        loop {
            // SAFETY: self.sem is a live handle, deadline is a valid timespec
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::ETIMEDOUT => return Ok(false),
                errno => return Err(self.wait_failed(errno)),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        // No sem_timedwait here; poll instead.
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn signal(&self) -> Result<(), SemaphoreError> {
        // SAFETY: self.sem is a live handle from sem_open
        if unsafe { libc::sem_post(self.sem.as_ptr()) } < 0 {
            return Err(SemaphoreError::PostFailed {
                name: self.name.clone(),
                reason: Errno::last().to_string(),
            });
        }
        Ok(())
    }

    fn value(&self) -> Result<u32, SemaphoreError> {
        let mut value: libc::c_int = 0;
        // SAFETY: self.sem is a live handle, value points to writable memory
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } < 0 {
            return Err(self.wait_failed(Errno::last()));
        }
        // Linux reports 0 when there are waiters; other systems may go negative.
        Ok(value.max(0) as u32)
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: self.sem is a live handle and is not used after this
        if unsafe { libc::sem_close(self.sem.as_ptr()) } < 0 {
            tracing::error!(
                name = %self.name,
                error = %Errno::last(),
                "Failed to close semaphore"
            );
        }
    }
}

/// The three semaphores guarding one ring.
pub struct SemaphoreTriplet {
    /// Counts empty slots, starts at slot_count.
    pub free: NamedSemaphore,
    /// Counts slots with unread data, starts at 0.
    pub filled: NamedSemaphore,
    /// Binary semaphore around header index updates, starts at 1.
    pub mutex: NamedSemaphore,
}

impl SemaphoreTriplet {
    /// Create all three semaphores for the ring named `shm_name`.
    ///
    /// If any of them cannot be created, the ones already created are
    /// unlinked again before returning the error.
    pub fn create(shm_name: &str, slot_count: u32) -> Result<Self, SemaphoreError> {
        let free = NamedSemaphore::create(&semaphore_name(shm_name, SemaphoreRole::Free), slot_count)?;

        let filled = match NamedSemaphore::create(&semaphore_name(shm_name, SemaphoreRole::Filled), 0)
        {
            Ok(sem) => sem,
            Err(e) => {
                let _ = NamedSemaphore::unlink(free.name());
                return Err(e);
            }
        };

        let mutex = match NamedSemaphore::create(&semaphore_name(shm_name, SemaphoreRole::Mutex), 1)
        {
            Ok(sem) => sem,
            Err(e) => {
                let _ = NamedSemaphore::unlink(free.name());
                let _ = NamedSemaphore::unlink(filled.name());
                return Err(e);
            }
        };

        Ok(Self {
            free,
            filled,
            mutex,
        })
    }

    /// Open the three semaphores of an existing ring.
    ///
    /// The owner creates them after the segment, so each open is retried
    /// according to `retry`.
    pub fn open(shm_name: &str, retry: RetryPolicy) -> Result<Self, SemaphoreError> {
        Ok(Self {
            free: NamedSemaphore::open_with_retry(
                &semaphore_name(shm_name, SemaphoreRole::Free),
                retry,
            )?,
            filled: NamedSemaphore::open_with_retry(
                &semaphore_name(shm_name, SemaphoreRole::Filled),
                retry,
            )?,
            mutex: NamedSemaphore::open_with_retry(
                &semaphore_name(shm_name, SemaphoreRole::Mutex),
                retry,
            )?,
        })
    }

    /// Unlink all three names. Every name is attempted; the first error wins.
    pub fn unlink(&self) -> Result<(), SemaphoreError> {
        let mut first_err = None;
        for sem in [&self.free, &self.filled, &self.mutex] {
            if let Err(e) = NamedSemaphore::unlink(sem.name()) {
                tracing::error!(name = %sem.name(), error = %e, "Failed to unlink semaphore");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/shmbus_sem_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_counting() {
        let name = test_name("count");
        let sem = NamedSemaphore::create(&name, 2).unwrap();

        assert_eq!(sem.value().unwrap(), 2);
        assert!(sem.try_wait().unwrap());
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());
        assert_eq!(sem.value().unwrap(), 0);

        sem.signal().unwrap();
        assert_eq!(sem.value().unwrap(), 1);
        sem.wait().unwrap();
        assert_eq!(sem.value().unwrap(), 0);

        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_create_exclusive() {
        let name = test_name("excl");
        let _sem = NamedSemaphore::create(&name, 0).unwrap();
        assert!(matches!(
            NamedSemaphore::create(&name, 0),
            Err(SemaphoreError::AlreadyExists { .. })
        ));
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_shares_count() {
        let name = test_name("share");
        let owner = NamedSemaphore::create(&name, 0).unwrap();
        let other = NamedSemaphore::open(&name).unwrap();

        owner.signal().unwrap();
        assert!(other.try_wait().unwrap());
        assert_eq!(owner.value().unwrap(), 0);

        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing_gives_up() {
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let result = NamedSemaphore::open_with_retry(&test_name("missing"), retry);
        assert!(matches!(
            result,
            Err(SemaphoreError::OpenFailed { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_wait_timeout() {
        let name = test_name("timeout");
        let sem = NamedSemaphore::create(&name, 0).unwrap();

        assert!(!sem.wait_timeout(Duration::from_millis(20)).unwrap());
        sem.signal().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(20)).unwrap());

        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let name = test_name("guard");
        let sem = NamedSemaphore::create(&name, 1).unwrap();
        {
            let _guard = SemaphoreGuard::acquire(&sem).unwrap();
            assert_eq!(sem.value().unwrap(), 0);
        }
        assert_eq!(sem.value().unwrap(), 1);

        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_triplet_initial_counts() {
        let shm = test_name("triplet");
        let triplet = SemaphoreTriplet::create(&shm, 4).unwrap();
        assert_eq!(triplet.free.value().unwrap(), 4);
        assert_eq!(triplet.filled.value().unwrap(), 0);
        assert_eq!(triplet.mutex.value().unwrap(), 1);

        // a second create must not clobber the live set
        assert!(SemaphoreTriplet::create(&shm, 4).is_err());
        assert_eq!(triplet.free.value().unwrap(), 4);

        triplet.unlink().unwrap();
        assert!(SemaphoreTriplet::open(&shm, RetryPolicy::once()).is_err());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let retry = RetryPolicy::new(50, Duration::from_millis(100));
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(40), RetryPolicy::MAX_BACKOFF);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
