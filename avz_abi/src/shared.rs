//! Shared status pages (`shared_info` / `vcpu_info`)
//!
//! One `shared_info` per domain, one `vcpu_info` per VCPU, each mapped
//! into both address spaces so status flows without a hypercall.
//!
//! ## Single-writer-per-field discipline
//!
//! No field on these pages is ever written by both sides. The page types
//! enforce this by construction: mutation is only reachable through
//! [`SharedInfoHv`]/[`VcpuInfoHv`] (hypervisor side) or
//! [`SharedInfoGuest`]/[`VcpuInfoGuest`] (guest side), and each view
//! exposes only its own fields.
//!
//! Event pending bits use a parity scheme so acknowledgment never writes
//! a hypervisor-owned word: the hypervisor flips a bit in its `posted`
//! mask to deliver, the guest flips the same bit in its `acked` mask to
//! consume. A port is pending exactly when the two bits differ. Posting
//! an already-pending port is a no-op, which makes delivery idempotent.

use avz_types::{CpuId, EvtchnPort};
use serde::{Deserialize, Serialize};

/// Ports addressable per domain; one parity bit each in a 64-bit mask.
pub const MAX_PORTS: usize = 64;

/// Wall-clock snapshot published by the hypervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub sec: u64,
    pub nsec: u32,
}

/// Per-VCPU time fields, hypervisor-written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcpuTimeInfo {
    /// Monotonic system time adjusted by the domain's virtual offset.
    pub system_time_nanos: u64,
}

/// One region of a domain's `shared_info` page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SharedRegion {
    /// Hypervisor-written delivery parity bits, one per port.
    evtchn_posted: u64,
    /// Guest-written acknowledgment parity bits.
    evtchn_acked: u64,
    /// Hypervisor-written wall clock snapshot.
    wall_clock: WallClock,
    /// Hypervisor-written monotonic time snapshot.
    system_time_nanos: u64,
}

/// A domain's `shared_info` page.
///
/// The Agency carries two regions selected by current CPU id (the
/// "subdomain twin" layout); Mobile Entities carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInfo {
    regions: Vec<SharedRegion>,
}

impl SharedInfo {
    /// Allocates a zeroed page with the given region count (at least 1).
    pub fn zeroed(regions: usize) -> Self {
        Self {
            regions: vec![SharedRegion::default(); regions.max(1)],
        }
    }

    /// Returns the region count.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Selects the region a CPU reads and writes.
    pub fn region_for_cpu(&self, cpu: CpuId) -> usize {
        cpu.0 % self.regions.len()
    }

    /// Returns the pending mask of a region: one bit per port whose
    /// delivery has not been acknowledged.
    pub fn pending_mask(&self, region: usize) -> u64 {
        let r = &self.regions[region];
        r.evtchn_posted ^ r.evtchn_acked
    }

    /// Returns whether a port is pending in a region.
    pub fn is_pending(&self, region: usize, port: EvtchnPort) -> bool {
        port.index() < MAX_PORTS && self.pending_mask(region) & (1u64 << port.index()) != 0
    }

    /// Returns a region's wall-clock snapshot.
    pub fn wall_clock(&self, region: usize) -> WallClock {
        self.regions[region].wall_clock
    }

    /// Returns a region's system-time snapshot.
    pub fn system_time_nanos(&self, region: usize) -> u64 {
        self.regions[region].system_time_nanos
    }

    /// Hypervisor-side write surface.
    pub fn hypervisor(&mut self) -> SharedInfoHv<'_> {
        SharedInfoHv { page: self }
    }

    /// Guest-side write surface.
    pub fn guest(&mut self) -> SharedInfoGuest<'_> {
        SharedInfoGuest { page: self }
    }
}

/// Hypervisor-side writer for a `shared_info` page.
pub struct SharedInfoHv<'a> {
    page: &'a mut SharedInfo,
}

impl SharedInfoHv<'_> {
    /// Marks a port pending in a region.
    ///
    /// Returns true if the port became pending, false if it already was
    /// (or the port is out of range); re-delivery is a no-op.
    pub fn post_port(&mut self, region: usize, port: EvtchnPort) -> bool {
        if port.index() >= MAX_PORTS {
            return false;
        }
        let bit = 1u64 << port.index();
        if self.page.pending_mask(region) & bit != 0 {
            return false;
        }
        self.page.regions[region].evtchn_posted ^= bit;
        true
    }

    /// Publishes time snapshots to every region.
    pub fn publish_time(&mut self, wall_clock: WallClock, system_time_nanos: u64) {
        for region in &mut self.page.regions {
            region.wall_clock = wall_clock;
            region.system_time_nanos = system_time_nanos;
        }
    }
}

/// Guest-side writer for a `shared_info` page.
pub struct SharedInfoGuest<'a> {
    page: &'a mut SharedInfo,
}

impl SharedInfoGuest<'_> {
    /// Acknowledges a pending port. Returns true if a delivery was
    /// consumed.
    pub fn ack_port(&mut self, region: usize, port: EvtchnPort) -> bool {
        if port.index() >= MAX_PORTS {
            return false;
        }
        let bit = 1u64 << port.index();
        if self.page.pending_mask(region) & bit == 0 {
            return false;
        }
        self.page.regions[region].evtchn_acked ^= bit;
        true
    }
}

/// A VCPU's `vcpu_info` page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcpuInfo {
    /// Hypervisor-written delivery parity bits, one per port.
    evtchn_posted: u64,
    /// Guest-written acknowledgment parity bits.
    evtchn_acked: u64,
    /// Hypervisor-written count of upcalls delivered.
    upcall_delivered: u32,
    /// Guest-written count of upcalls handled.
    upcall_handled: u32,
    /// Guest-written: true while the VCPU does not want event delivery.
    upcall_masked: bool,
    /// Hypervisor-written time fields.
    time: VcpuTimeInfo,
}

impl VcpuInfo {
    /// Allocates a zeroed page.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Returns the pending mask: one bit per unacknowledged port.
    pub fn pending_mask(&self) -> u64 {
        self.evtchn_posted ^ self.evtchn_acked
    }

    /// Returns whether a port is pending.
    pub fn is_pending(&self, port: EvtchnPort) -> bool {
        port.index() < MAX_PORTS && self.pending_mask() & (1u64 << port.index()) != 0
    }

    /// Returns whether an upcall is outstanding.
    pub fn upcall_pending(&self) -> bool {
        self.upcall_delivered != self.upcall_handled
    }

    /// Returns whether the guest has masked event delivery.
    pub fn upcall_masked(&self) -> bool {
        self.upcall_masked
    }

    /// Returns the time fields.
    pub fn time(&self) -> VcpuTimeInfo {
        self.time
    }

    /// Hypervisor-side write surface.
    pub fn hypervisor(&mut self) -> VcpuInfoHv<'_> {
        VcpuInfoHv { page: self }
    }

    /// Guest-side write surface.
    pub fn guest(&mut self) -> VcpuInfoGuest<'_> {
        VcpuInfoGuest { page: self }
    }
}

/// Hypervisor-side writer for a `vcpu_info` page.
pub struct VcpuInfoHv<'a> {
    page: &'a mut VcpuInfo,
}

impl VcpuInfoHv<'_> {
    /// Marks a port pending. Idempotent while unacknowledged.
    pub fn post_port(&mut self, port: EvtchnPort) -> bool {
        if port.index() >= MAX_PORTS {
            return false;
        }
        let bit = 1u64 << port.index();
        if self.page.pending_mask() & bit != 0 {
            return false;
        }
        self.page.evtchn_posted ^= bit;
        true
    }

    /// Records one upcall delivery. The caller checks the mask first.
    pub fn deliver_upcall(&mut self) {
        self.page.upcall_delivered = self.page.upcall_delivered.wrapping_add(1);
    }

    /// Refreshes the time fields.
    pub fn write_time(&mut self, time: VcpuTimeInfo) {
        self.page.time = time;
    }
}

/// Guest-side writer for a `vcpu_info` page.
pub struct VcpuInfoGuest<'a> {
    page: &'a mut VcpuInfo,
}

impl VcpuInfoGuest<'_> {
    /// Sets or clears the upcall mask.
    pub fn set_upcall_mask(&mut self, masked: bool) {
        self.page.upcall_masked = masked;
    }

    /// Acknowledges a pending port. Returns true if a delivery was
    /// consumed.
    pub fn ack_port(&mut self, port: EvtchnPort) -> bool {
        if port.index() >= MAX_PORTS {
            return false;
        }
        let bit = 1u64 << port.index();
        if self.page.pending_mask() & bit == 0 {
            return false;
        }
        self.page.evtchn_acked ^= bit;
        true
    }

    /// Marks all delivered upcalls handled.
    pub fn complete_upcall(&mut self) {
        self.page.upcall_handled = self.page.upcall_delivered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(i: u32) -> EvtchnPort {
        EvtchnPort::from_index(i)
    }

    #[test]
    fn test_post_is_idempotent_until_acked() {
        let mut info = VcpuInfo::zeroed();
        assert!(info.hypervisor().post_port(port(5)));
        assert!(!info.hypervisor().post_port(port(5)));
        assert!(info.is_pending(port(5)));
        assert_eq!(info.pending_mask(), 1 << 5);
    }

    #[test]
    fn test_ack_consumes_and_rearms() {
        let mut info = VcpuInfo::zeroed();
        info.hypervisor().post_port(port(3));
        assert!(info.guest().ack_port(port(3)));
        assert!(!info.is_pending(port(3)));
        // Acking again consumes nothing.
        assert!(!info.guest().ack_port(port(3)));
        // A fresh post makes the port pending again.
        assert!(info.hypervisor().post_port(port(3)));
        assert!(info.is_pending(port(3)));
    }

    #[test]
    fn test_upcall_counters() {
        let mut info = VcpuInfo::zeroed();
        assert!(!info.upcall_pending());
        info.hypervisor().deliver_upcall();
        assert!(info.upcall_pending());
        info.guest().complete_upcall();
        assert!(!info.upcall_pending());
    }

    #[test]
    fn test_upcall_mask_is_guest_owned() {
        let mut info = VcpuInfo::zeroed();
        info.guest().set_upcall_mask(true);
        assert!(info.upcall_masked());
        info.guest().set_upcall_mask(false);
        assert!(!info.upcall_masked());
    }

    #[test]
    fn test_out_of_range_port_is_ignored() {
        let mut info = VcpuInfo::zeroed();
        assert!(!info.hypervisor().post_port(port(64)));
        assert_eq!(info.pending_mask(), 0);
    }

    #[test]
    fn test_shared_info_region_selection() {
        let shared = SharedInfo::zeroed(2);
        assert_eq!(shared.region_for_cpu(CpuId(0)), 0);
        assert_eq!(shared.region_for_cpu(CpuId(1)), 1);
        assert_eq!(shared.region_for_cpu(CpuId(2)), 0);

        let single = SharedInfo::zeroed(1);
        assert_eq!(single.region_for_cpu(CpuId(3)), 0);
    }

    #[test]
    fn test_shared_info_time_publishes_to_all_regions() {
        let mut shared = SharedInfo::zeroed(2);
        let wall = WallClock { sec: 10, nsec: 500 };
        shared.hypervisor().publish_time(wall, 42);
        assert_eq!(shared.wall_clock(0), wall);
        assert_eq!(shared.wall_clock(1), wall);
        assert_eq!(shared.system_time_nanos(1), 42);
    }

    #[test]
    fn test_shared_info_pending_per_region() {
        let mut shared = SharedInfo::zeroed(2);
        assert!(shared.hypervisor().post_port(1, port(7)));
        assert!(shared.is_pending(1, port(7)));
        assert!(!shared.is_pending(0, port(7)));
        assert!(shared.guest().ack_port(1, port(7)));
        assert!(!shared.is_pending(1, port(7)));
    }
}
