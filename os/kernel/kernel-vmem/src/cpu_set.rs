//! Sets of CPUs, as used for shootdown targets and activity tracking.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Index of a CPU (hart), dense from zero.
pub type CpuId = usize;

/// Largest number of CPUs a [`CpuSet`] can describe.
pub const MAX_CPUS: usize = 64;

/// A plain bit set of CPUs.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct CpuSet(u64);

impl CpuSet {
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// CPUs `0..count`.
    #[inline]
    #[must_use]
    pub const fn first(count: usize) -> Self {
        if count >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1 << count) - 1)
        }
    }

    #[inline]
    #[must_use]
    pub const fn single(cpu: CpuId) -> Self {
        Self::empty().with(cpu)
    }

    #[inline]
    #[must_use]
    pub const fn with(self, cpu: CpuId) -> Self {
        debug_assert!(cpu < MAX_CPUS);
        Self(self.0 | (1 << cpu))
    }

    #[inline]
    #[must_use]
    pub const fn without(self, cpu: CpuId) -> Self {
        debug_assert!(cpu < MAX_CPUS);
        Self(self.0 & !(1 << cpu))
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, cpu: CpuId) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter(move |&cpu| self.contains(cpu))
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<T: IntoIterator<Item = CpuId>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// A [`CpuSet`] that CPUs update concurrently, e.g. when switching address
/// spaces.
#[derive(Default)]
pub struct AtomicCpuSet(AtomicU64);

impl AtomicCpuSet {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn insert(&self, cpu: CpuId) {
        debug_assert!(cpu < MAX_CPUS);
        self.0.fetch_or(1 << cpu, Ordering::AcqRel);
    }

    #[inline]
    pub fn remove(&self, cpu: CpuId) {
        debug_assert!(cpu < MAX_CPUS);
        self.0.fetch_and(!(1 << cpu), Ordering::AcqRel);
    }

    #[inline]
    #[must_use]
    pub fn load(&self) -> CpuSet {
        CpuSet(self.0.load(Ordering::Acquire))
    }
}

impl fmt::Debug for AtomicCpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership() {
        let set = CpuSet::first(3).without(1);
        assert!(set.contains(0) && !set.contains(1) && set.contains(2));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(format!("{set:?}"), "{0, 2}");
    }

    #[test]
    fn first_saturates() {
        assert_eq!(CpuSet::first(64).len(), 64);
        assert_eq!(CpuSet::first(100).len(), 64);
        assert!(CpuSet::first(0).is_empty());
    }

    #[test]
    fn atomic_updates() {
        let set = AtomicCpuSet::new();
        set.insert(5);
        set.insert(7);
        set.remove(5);
        assert_eq!(set.load(), CpuSet::single(7));
        assert_eq!([1, 2].into_iter().collect::<CpuSet>(), CpuSet::single(1).with(2));
    }
}
