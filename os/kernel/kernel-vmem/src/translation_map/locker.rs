use super::TranslationMap;
use crate::platform::Platform;
use core::marker::PhantomData;
use core::num::NonZeroU64;

/// Holds a [`TranslationMap`]'s lock on behalf of the current thread.
///
/// Lockers nest. When the outermost one is dropped, pending invalidations
/// are flushed before the lock is released, so no other thread can observe
/// the tree change while a stale translation may still be cached.
#[must_use = "the map is unlocked when the locker is dropped"]
pub struct MapLocker<'m, 'p, P: Platform, const N: usize> {
    map: &'m TranslationMap<'p, P, N>,
    owner: NonZeroU64,
    /// The owner token is only valid on the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl<'m, 'p, P: Platform, const N: usize> MapLocker<'m, 'p, P, N> {
    pub(super) fn new(map: &'m TranslationMap<'p, P, N>) -> Self {
        let owner = map.platform.current_thread();
        map.lock.lock(owner);
        Self {
            map,
            owner,
            _not_send: PhantomData,
        }
    }

    /// Recursion depth including this locker.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.map.lock.depth()
    }

    /// Release now instead of at the end of the scope.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<P: Platform, const N: usize> Drop for MapLocker<'_, '_, P, N> {
    fn drop(&mut self) {
        if self.map.lock.depth() == 1 {
            self.map.flush();
        }
        // SAFETY: `new` acquired the lock for `owner`.
        unsafe {
            self.map.lock.unlock(self.owner);
        }
    }
}
