//! The symbolic representation of memory. Only the address domain is
//! modeled here; values live in [`crate::value`].

use std::fmt;

/// A symbolic memory address.
///
/// An address is a 64-bit bitfield:
///
/// ```text
///     bit 63:    1 -> static, 0 -> dynamic
///     bit 62:    1 -> automatic, 0 -> heap
///     bit 61:    1 -> internal, 0 -> user
///     bits 0-60: allocation index
/// ```
///
/// Addresses are totally ordered by their raw representation, which keeps
/// all addresses of one storage class contiguous.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SAddr(u64);

const STATIC_MASK: u64 = 1 << 63;
const AUTOMATIC_MASK: u64 = 1 << 62;
const INTERNAL_MASK: u64 = 1 << 61;
const ADDRESS_MASK: u64 = INTERNAL_MASK - 1;

impl SAddr {
    /// The limit of the per-pool address space.
    pub const LIMIT: u64 = INTERNAL_MASK - 1;

    fn create(storage: u64, value: u64, internal: bool) -> SAddr {
        assert!(value < SAddr::LIMIT);
        let mut fresh = storage | value;
        if internal {
            fresh |= INTERNAL_MASK;
        }
        SAddr(fresh)
    }

    /// The null address.
    pub fn null() -> SAddr {
        SAddr(0)
    }

    pub(crate) fn from_raw(raw: u64) -> SAddr {
        SAddr(raw)
    }

    /// Whether the address has static storage duration.
    pub fn is_static(self) -> bool {
        self.0 & STATIC_MASK != 0
    }

    /// Whether the address was allocated dynamically.
    pub fn is_dynamic(self) -> bool {
        !self.is_static()
    }

    /// Whether the address has automatic (stack) storage duration.
    pub fn is_automatic(self) -> bool {
        self.0 & AUTOMATIC_MASK != 0
    }

    /// Whether the address lives on the modeled heap.
    pub fn is_heap(self) -> bool {
        self.is_dynamic() && !self.is_automatic()
    }

    /// Whether the address belongs to the checker's own bookkeeping
    /// (e.g., `errno`) rather than user memory.
    pub fn is_internal(self) -> bool {
        self.0 & INTERNAL_MASK != 0
    }

    /// Whether the address is user-visible.
    pub fn is_user(self) -> bool {
        !self.is_internal()
    }

    /// Whether the address is null.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw bit pattern.
    pub fn get(self) -> u64 {
        self.0
    }

    /// The index part, without the storage tag bits.
    pub fn index(self) -> u64 {
        self.0 & ADDRESS_MASK
    }

    /// The address `num` bytes after this one, in the same region.
    pub fn offset(self, num: u64) -> SAddr {
        SAddr(self.0 + num)
    }
}

impl std::ops::Sub for SAddr {
    type Output = u64;

    fn sub(self, other: SAddr) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Debug for SAddr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.is_static() {
            "G"
        } else if self.is_automatic() {
            "S"
        } else {
            "H"
        };
        let int = if self.is_internal() { "i" } else { "" };
        write!(fmt, "{}{}#{}", tag, int, self.index())
    }
}

/// Allocates addresses within the [`SAddr`] domain.
///
/// The allocator maintains one monotonic pool per storage class; a given
/// allocator never hands out the same address twice, so freed memory stays
/// distinguishable in the graph via its `Free` label. The allocator is
/// cloned whenever an exploration branches, so that both branches allocate
/// the same addresses for the same program.
#[derive(Clone, Debug)]
pub struct SAddrAllocator {
    static_pool: u64,
    automatic_pool: u64,
    /// Starts past zero so that no heap allocation is the null address.
    heap_pool: u64,
}

impl Default for SAddrAllocator {
    fn default() -> Self {
        SAddrAllocator {
            static_pool: 0,
            automatic_pool: 0,
            heap_pool: 1,
        }
    }
}

fn allocate(pool: &mut u64, size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    let offset = alignment - 1;
    let old = *pool;
    *pool += offset + size;
    (old + offset) & !(alignment - 1)
}

impl SAddrAllocator {
    /// Creates a fresh allocator with empty pools.
    pub fn new() -> SAddrAllocator {
        SAddrAllocator::default()
    }

    /// Allocates a fresh static (global) address.
    pub fn alloc_static(&mut self, size: u64, alignment: u64, internal: bool) -> SAddr {
        SAddr::create(
            STATIC_MASK,
            allocate(&mut self.static_pool, size, alignment),
            internal,
        )
    }

    /// Allocates a fresh automatic (stack) address.
    pub fn alloc_automatic(&mut self, size: u64, alignment: u64, internal: bool) -> SAddr {
        SAddr::create(
            AUTOMATIC_MASK,
            allocate(&mut self.automatic_pool, size, alignment),
            internal,
        )
    }

    /// Allocates a fresh heap address.
    pub fn alloc_heap(&mut self, size: u64, alignment: u64, internal: bool) -> SAddr {
        SAddr::create(0, allocate(&mut self.heap_pool, size, alignment), internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_classes() {
        let mut alloc = SAddrAllocator::new();
        let g = alloc.alloc_static(8, 8, false);
        let s = alloc.alloc_automatic(4, 4, false);
        let h = alloc.alloc_heap(16, 8, false);
        assert!(g.is_static() && !g.is_heap());
        assert!(s.is_automatic() && s.is_dynamic());
        assert!(h.is_heap() && h.is_dynamic());
        assert!(!h.is_null());
    }

    #[test]
    fn addresses_are_fresh_and_ordered() {
        let mut alloc = SAddrAllocator::new();
        let a = alloc.alloc_heap(4, 4, false);
        let b = alloc.alloc_heap(4, 4, false);
        assert!(a < b);
        assert!(b - a >= 4);
    }

    #[test]
    fn alignment_is_respected() {
        let mut alloc = SAddrAllocator::new();
        let _ = alloc.alloc_heap(1, 1, false);
        let a = alloc.alloc_heap(8, 8, false);
        assert_eq!(a.index() % 8, 0);
    }

    #[test]
    fn internal_bit() {
        let mut alloc = SAddrAllocator::new();
        let e = alloc.alloc_static(4, 4, true);
        assert!(e.is_internal());
        assert!(!e.is_user());
    }

    #[test]
    fn cloned_allocators_replay_identically() {
        let mut a = SAddrAllocator::new();
        let _ = a.alloc_heap(4, 4, false);
        let mut b = a.clone();
        assert_eq!(a.alloc_heap(8, 8, false), b.alloc_heap(8, 8, false));
    }
}
