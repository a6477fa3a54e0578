//! Physical page remapping abstraction

use thiserror::Error;

/// Errors from the remap service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RemapError {
    /// The physical range is not mappable on this platform.
    #[error("physical range {base:#x}+{size:#x} is not mappable")]
    Unmappable { base: u64, size: u64 },
    /// No virtual address space left for the mapping.
    #[error("virtual address space exhausted")]
    OutOfSpace,
}

/// Maps physical ranges into the hypervisor's address space.
///
/// Consumed when shared-info and vcpu-info pages are mapped at domain
/// construction time.
pub trait RemapService {
    /// Maps `size` bytes at physical `base`, returning the virtual address.
    fn remap(&mut self, base: u64, size: u64) -> Result<u64, RemapError>;
}
