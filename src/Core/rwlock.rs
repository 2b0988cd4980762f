// Reader/writer lock whose whole state is one u32 inside the segment header,
// so every process that maps the segment synchronizes through it.
//
// Layout of the word:
//   bit 31      writer holds the lock
//   bit 30      a writer is waiting; new readers back off
//   bits 0..30  number of readers holding the lock
//
// Writers are preferred: once one is waiting no new reader gets in, so a
// steady stream of readers cannot starve it. Unlock wakes every waiter and
// each re-checks the word; critical sections are short enough that the
// thundering herd does not matter.
//
// A process that dies while holding the lock leaves it held. There is no
// owner tracking to recover from that.

use super::futex::{futex_wait, futex_wake_all};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

const WRITER: u32 = 1 << 31;
const WRITER_WAITING: u32 = 1 << 30;
const READERS: u32 = WRITER_WAITING - 1;

const SPIN_LIMIT: u32 = 64;

#[repr(C)]
pub struct SharedRwLock {
    state: AtomicU32,
}

impl SharedRwLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Acquire shared access, blocking while a writer holds or waits for the lock.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut spins = 0;
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & (WRITER | WRITER_WAITING) == 0 {
                debug_assert!(s & READERS != READERS, "reader count overflow");
                if self
                    .state
                    .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return ReadGuard { lock: self };
                }
                continue;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                futex_wait(&self.state, s);
            }
        }
    }

    /// Acquire exclusive access, blocking until all readers and writers are gone.
    pub fn write(&self) -> WriteGuard<'_> {
        let mut spins = 0;
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & (WRITER | READERS) == 0 {
                // Take it and drop the waiting bit; other waiting writers get
                // woken by our unlock and set it again.
                if self
                    .state
                    .compare_exchange_weak(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return WriteGuard { lock: self };
                }
                continue;
            }

            if s & WRITER_WAITING == 0 {
                let _ = self.state.compare_exchange_weak(
                    s,
                    s | WRITER_WAITING,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
                continue;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                futex_wait(&self.state, s);
            }
        }
    }

    /// Shared access if it is available right now.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | WRITER_WAITING) != 0 {
            return None;
        }
        self.state
            .compare_exchange(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ReadGuard { lock: self })
    }

    /// Exclusive access if it is available right now.
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | READERS) != 0 {
            return None;
        }
        self.state
            .compare_exchange(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| WriteGuard { lock: self })
    }

    /// Number of readers currently inside.
    pub fn reader_count(&self) -> u32 {
        self.state.load(Ordering::Relaxed) & READERS
    }

    /// Whether a writer currently holds the lock.
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }

    fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        if prev & READERS == 1 && prev & WRITER_WAITING != 0 {
            futex_wake_all(&self.state);
        }
    }

    fn write_unlock(&self) {
        self.state.store(0, Ordering::Release);
        futex_wake_all(&self.state);
    }
}

impl Default for SharedRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRwLock")
            .field("readers", &self.reader_count())
            .field("writer", &self.is_write_locked())
            .finish()
    }
}

/// Shared access; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a SharedRwLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Exclusive access; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a SharedRwLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}
