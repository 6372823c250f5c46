use crate::{RawLock, RawSpin, RawUnlock};
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A re-entrant lock keyed by an opaque owner token.
///
/// The kernel has no thread-local storage at this layer, so callers identify
/// themselves with a non-zero token (usually the current thread's ID). The
/// holder may call [`lock`](Self::lock) again without deadlocking; the lock is
/// released when [`unlock`](Self::unlock) has been called as often as `lock`.
///
/// The lock protects no data of its own. It serializes whatever the caller
/// decides it protects, which is why it carries no `T`.
///
/// # Examples
/// ```
/// use core::num::NonZeroU64;
/// use kernel_sync::RecursiveLock;
///
/// let me = NonZeroU64::new(7).unwrap();
/// let lock = RecursiveLock::new();
/// lock.lock(me);
/// lock.lock(me);
/// assert_eq!(lock.depth(), 2);
/// unsafe {
///     assert!(!lock.unlock(me));
///     assert!(lock.unlock(me));
/// }
/// assert!(!lock.is_locked());
/// ```
pub struct RecursiveLock<R = RawSpin> {
    raw: R,
    /// Token of the current holder, `0` when free.
    owner: AtomicU64,
    /// Recursion depth; only touched by the holder.
    depth: AtomicU32,
}

impl Default for RecursiveLock<RawSpin> {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveLock<RawSpin> {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_raw(RawSpin::new())
    }
}

impl<R> RecursiveLock<R> {
    pub const fn from_raw(raw: R) -> Self {
        Self {
            raw,
            owner: AtomicU64::new(0),
            depth: AtomicU32::new(0),
        }
    }

    /// Returns `true` if `owner` currently holds the lock.
    ///
    /// The answer is exact for the calling owner: nobody else can make it
    /// become `true` or `false` for them.
    #[inline]
    pub fn is_owned_by(&self, owner: NonZeroU64) -> bool {
        self.owner.load(Ordering::Relaxed) == owner.get()
    }

    /// Returns `true` if anyone holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != 0
    }

    /// Current recursion depth (`0` when free). Meaningful to the holder only.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }
}

impl<R> RecursiveLock<R>
where
    R: RawLock + RawUnlock,
{
    /// Acquire the lock for `owner`, spinning while someone else holds it.
    #[inline]
    pub fn lock(&self, owner: NonZeroU64) {
        if self.is_owned_by(owner) {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.raw.raw_lock();
        self.enter(owner);
    }

    /// Acquire without spinning. Re-entry by the holder always succeeds.
    #[inline]
    pub fn try_lock(&self, owner: NonZeroU64) -> bool {
        if self.is_owned_by(owner) {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self.raw.raw_try_lock() {
            self.enter(owner);
            return true;
        }
        false
    }

    /// Release one level of recursion. Returns `true` if the lock is now free.
    ///
    /// # Safety
    /// `owner` must currently hold the lock.
    #[inline]
    pub unsafe fn unlock(&self, owner: NonZeroU64) -> bool {
        debug_assert!(self.is_owned_by(owner), "unlock by non-owner");
        let prev = self.depth.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "unbalanced unlock");
        if prev > 1 {
            return false;
        }
        self.owner.store(0, Ordering::Relaxed);
        unsafe { self.raw.raw_unlock() };
        true
    }

    #[inline]
    fn enter(&self, owner: NonZeroU64) {
        self.owner.store(owner.get(), Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
    }
}
