use core::fmt;
use core::ops::{Deref, DerefMut};

// -----------------------------------------------------------------------------
// CachePadded

/// Pads and aligns a value to the length of a cache line.
///
/// 128 bytes covers the adjacent-line prefetcher on x86_64 and the large
/// lines of aarch64 big cores.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
#[repr(align(128))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Pads and aligns a value to the length of a cache line.
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the inner value.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePadded")
            .field("value", &self.value)
            .finish()
    }
}

impl<T> From<T> for CachePadded<T> {
    #[inline(always)]
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::CachePadded;

    #[test]
    fn aligned_to_line() {
        assert_eq!(align_of::<CachePadded<u8>>(), 128);
        let padded = CachePadded::new(7_u64);
        assert_eq!(*padded, 7);
        assert_eq!(padded.into_inner(), 7);
    }
}
