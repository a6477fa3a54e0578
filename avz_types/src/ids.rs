//! Unique identifiers for hypervisor entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for a physical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpuId(pub usize);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Identifier for a domain.
///
/// Domain ids come from a small bounded namespace and are stable for the
/// domain's lifetime. A slot may be reused after the domain is reaped;
/// the [`DomainHandle`] is the identity that never repeats.
///
/// Domain 0 is the Agency, the primary always-resident domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(u16);

impl DomainId {
    /// The Agency domain.
    pub const AGENCY: DomainId = DomainId(0);

    /// Creates a domain id from a slot index.
    pub const fn from_index(index: u16) -> Self {
        Self(index)
    }

    /// Returns the slot index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns true for the Agency domain.
    pub fn is_agency(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dom{}", self.0)
    }
}

/// Stable, globally unique identity of a domain.
///
/// Unlike [`DomainId`], the handle survives migration of a Mobile Entity
/// between hosts: the receiving host constructs a fresh domain slot but
/// keeps the handle from the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainHandle(Uuid);

impl DomainHandle {
    /// Creates a new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a handle from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DomainHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain:{}", self.0)
    }
}

/// Identifier for a VCPU: the owning domain plus the index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VcpuId {
    pub domain: DomainId,
    pub index: u8,
}

impl VcpuId {
    /// Creates a VCPU id.
    pub const fn new(domain: DomainId, index: u8) -> Self {
        Self { domain, index }
    }
}

impl fmt::Display for VcpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", self.domain, self.index)
    }
}

/// Event-channel port number, local to the owning domain's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvtchnPort(u32);

impl EvtchnPort {
    /// Creates a port from a table index.
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the table index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EvtchnPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// Virtual IRQ numbers deliverable through event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Virq {
    /// Per-VCPU virtual timer.
    Timer,
    /// Diagnostic console output became available.
    Console,
    /// A suspended domain image is ready for the transport layer.
    MigrationReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_id_display() {
        assert_eq!(DomainId::AGENCY.to_string(), "dom0");
        assert_eq!(DomainId::from_index(3).to_string(), "dom3");
        assert!(DomainId::AGENCY.is_agency());
        assert!(!DomainId::from_index(1).is_agency());
    }

    #[test]
    fn test_vcpu_id_display() {
        let vcpu = VcpuId::new(DomainId::from_index(2), 1);
        assert_eq!(vcpu.to_string(), "dom2.v1");
    }

    #[test]
    fn test_domain_handles_are_unique() {
        let a = DomainHandle::new();
        let b = DomainHandle::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_evtchn_port_round_trips_index() {
        let port = EvtchnPort::from_index(5);
        assert_eq!(port.index(), 5);
        assert_eq!(port.to_string(), "port5");
    }

    #[test]
    fn test_ids_serialize() {
        let vcpu = VcpuId::new(DomainId::from_index(1), 0);
        let json = serde_json::to_string(&vcpu).unwrap();
        let back: VcpuId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vcpu);
    }
}
