//! # Guest-Visible ABI for AVZ
//!
//! This crate defines everything a guest kernel and the hypervisor must
//! agree on: hypercall numbers and payload structures, result codes, the
//! error taxonomy, and the layout of the shared status pages.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: the hypercall surface is a closed
//!   enumeration with typed payloads. Decoding an unknown number fails at
//!   one place instead of falling through a default branch somewhere deep
//!   in a dispatch table.
//! - **Contracts are code**: the `contract_tests` crate pins the numbers,
//!   payload shapes and shared-page fields so they cannot drift between
//!   hypervisor/guest version pairs that must interoperate.

pub mod domctl;
pub mod error;
pub mod evtchn;
pub mod hypercall;
pub mod payload;
pub mod shared;

pub use domctl::{CreateDomainParams, DomainLifecycle, DomainStatusReply, DomctlOp};
pub use error::{AvzError, AvzResult};
pub use evtchn::{
    AllocUnboundOp, BindInterdomainOp, BindVirqOp, CloseOp, EvtchnCmd, PortState, SendOp, StatusOp,
};
pub use hypercall::{Hypercall, RawHypercall, SchedOp};
pub use payload::AbiPayload;
pub use shared::{SharedInfo, VcpuInfo, VcpuTimeInfo, WallClock};

use serde::{Deserialize, Serialize};

/// ABI version shared between hypervisor and guest.
///
/// Same major version means the shared-page layout and hypercall payloads
/// interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
}

impl AbiVersion {
    /// Creates a version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Returns whether two versions interoperate.
    pub fn is_compatible_with(&self, other: &AbiVersion) -> bool {
        self.major == other.major
    }
}

/// The ABI version this crate describes.
pub const ABI_VERSION: AbiVersion = AbiVersion::new(1, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(ABI_VERSION.is_compatible_with(&AbiVersion::new(1, 3)));
        assert!(!ABI_VERSION.is_compatible_with(&AbiVersion::new(2, 0)));
    }
}
