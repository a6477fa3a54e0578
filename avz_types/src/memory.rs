//! Guest memory descriptors
//!
//! The hypervisor never dereferences guest pointers directly. A hypercall
//! argument arrives as a [`GuestBuffer`] (address plus length as the guest
//! declared them) and must be checked against the [`GuestRegion`]s the
//! calling domain actually owns before any byte is read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous range of guest-physical memory owned by one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRegion {
    /// Base guest-physical address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

impl GuestRegion {
    /// Creates a region.
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Returns the first address past the end, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.size)
    }

    /// Returns whether the buffer lies entirely within this region.
    ///
    /// Overflowing address arithmetic is treated as "not contained", never
    /// wrapped.
    pub fn contains(&self, buffer: GuestBuffer) -> bool {
        let region_end = match self.end() {
            Some(end) => end,
            None => return false,
        };
        let buffer_end = match buffer.addr.checked_add(buffer.len) {
            Some(end) => end,
            None => return false,
        };
        buffer.addr >= self.base && buffer_end <= region_end
    }
}

impl fmt::Display for GuestRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}; {:#x})", self.base, self.base.wrapping_add(self.size))
    }
}

/// A guest-declared pointer/length pair naming a hypercall argument
/// structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestBuffer {
    /// Guest-physical address of the structure.
    pub addr: u64,
    /// Length of the structure in bytes.
    pub len: u64,
}

impl GuestBuffer {
    /// Creates a buffer descriptor.
    pub const fn new(addr: u64, len: u64) -> Self {
        Self { addr, len }
    }
}

impl fmt::Display for GuestBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.addr, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_inside_region() {
        let region = GuestRegion::new(0x1000, 0x1000);
        assert!(region.contains(GuestBuffer::new(0x1000, 0x10)));
        assert!(region.contains(GuestBuffer::new(0x1ff0, 0x10)));
        assert!(region.contains(GuestBuffer::new(0x1800, 0)));
    }

    #[test]
    fn test_buffer_outside_region() {
        let region = GuestRegion::new(0x1000, 0x1000);
        assert!(!region.contains(GuestBuffer::new(0xff0, 0x20)));
        assert!(!region.contains(GuestBuffer::new(0x1ff8, 0x10)));
        assert!(!region.contains(GuestBuffer::new(0x3000, 0x10)));
    }

    #[test]
    fn test_overflowing_buffer_is_rejected() {
        let region = GuestRegion::new(0x1000, 0x1000);
        assert!(!region.contains(GuestBuffer::new(u64::MAX - 4, 0x10)));
    }

    #[test]
    fn test_overflowing_region_contains_nothing() {
        let region = GuestRegion::new(u64::MAX - 4, 0x10);
        assert!(!region.contains(GuestBuffer::new(u64::MAX - 4, 2)));
    }
}
