//! `domctl` payload structures
//!
//! Domain management requests are issued by the Agency only. The payload
//! is one tagged operation; replies that carry data are written back into
//! the same guest buffer.

use avz_types::{CpuId, DomainHandle, DomainId, GuestRegion};
use serde::{Deserialize, Serialize};

/// Domain lifecycle states visible through `domctl` queries.
///
/// `Constructing → Runnable → Blocked ⇄ Running → Dying → Dead`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainLifecycle {
    /// Created but not yet marked runnable; VCPUs may still be attached.
    Constructing,
    /// At least one VCPU is eligible to run.
    Runnable,
    /// All VCPUs are blocked waiting for events.
    Blocked,
    /// At least one VCPU is running on a physical CPU.
    Running,
    /// Destruction requested; the reaper has not yet reclaimed it.
    Dying,
    /// Reaped. The slot may be reused.
    Dead,
}

/// Parameters for domain creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDomainParams {
    /// Stable identity, kept across migration.
    pub handle: DomainHandle,
    /// Maximum VCPUs this domain may attach.
    pub max_vcpus: u8,
    /// Pin every VCPU to one physical CPU (the Agency and its twin are
    /// pinned; Mobile Entities usually are not).
    pub pinned_cpu: Option<CpuId>,
    /// Shared-info regions (1, or 2 for the CPU-selected twin layout).
    pub shared_regions: u8,
    /// Guest-physical memory this domain owns; hypercall argument buffers
    /// are validated against these.
    pub memory: Vec<GuestRegion>,
}

/// One `domctl` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomctlOp {
    /// Create a domain in `Constructing` state.
    CreateDomain(CreateDomainParams),
    /// Attach a VCPU at the given index.
    CreateVcpu { domain: DomainId, index: u8 },
    /// Mark a constructed domain runnable.
    Unpause { domain: DomainId },
    /// Pause all VCPUs of a domain (pre-migration quiesce).
    Pause { domain: DomainId },
    /// Begin asynchronous destruction.
    DestroyDomain { domain: DomainId },
    /// Query lifecycle state; the reply is written back to the buffer.
    QueryDomain { domain: DomainId },
}

/// Reply to [`DomctlOp::QueryDomain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatusReply {
    pub domain: DomainId,
    pub handle: DomainHandle,
    pub lifecycle: DomainLifecycle,
    pub vcpu_count: u8,
    pub paused: bool,
}
