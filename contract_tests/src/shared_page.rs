//! Shared status-page contract tests
//!
//! These tests pin the observable behavior of the `shared_info` and
//! `vcpu_info` pages: the parity pending scheme, the idempotence of
//! posting, and the single-writer split between the two sides. Guest
//! kernels implement the other half of this protocol from these rules.

#[cfg(test)]
mod tests {
    use avz_abi::shared::MAX_PORTS;
    use avz_abi::{SharedInfo, VcpuInfo};
    use avz_types::{CpuId, EvtchnPort};

    fn port(i: u32) -> EvtchnPort {
        EvtchnPort::from_index(i)
    }

    #[test]
    fn test_port_capacity_is_pinned() {
        // One parity bit per port in a 64-bit mask.
        assert_eq!(MAX_PORTS, 64);
    }

    #[test]
    fn test_pending_is_parity_of_posted_and_acked() {
        let mut info = VcpuInfo::zeroed();
        assert_eq!(info.pending_mask(), 0);
        info.hypervisor().post_port(port(5));
        assert_eq!(info.pending_mask(), 1 << 5);
        info.guest().ack_port(port(5));
        assert_eq!(info.pending_mask(), 0);
    }

    #[test]
    fn test_posting_pending_port_is_noop() {
        let mut info = VcpuInfo::zeroed();
        assert!(info.hypervisor().post_port(port(7)));
        assert!(!info.hypervisor().post_port(port(7)));
        // One ack fully consumes however many posts coalesced.
        assert!(info.guest().ack_port(port(7)));
        assert!(!info.is_pending(port(7)));
    }

    #[test]
    fn test_upcall_counters_pair_up() {
        let mut info = VcpuInfo::zeroed();
        info.hypervisor().deliver_upcall();
        info.hypervisor().deliver_upcall();
        assert!(info.upcall_pending());
        info.guest().complete_upcall();
        assert!(!info.upcall_pending());
    }

    #[test]
    fn test_region_selection_is_cpu_modulo() {
        let twin = SharedInfo::zeroed(2);
        assert_eq!(twin.region_for_cpu(CpuId(0)), 0);
        assert_eq!(twin.region_for_cpu(CpuId(1)), 1);
        assert_eq!(twin.region_for_cpu(CpuId(2)), 0);
        assert_eq!(twin.region_for_cpu(CpuId(3)), 1);
    }

    #[test]
    fn test_regions_are_independent() {
        let mut shared = SharedInfo::zeroed(2);
        shared.hypervisor().post_port(0, port(4));
        assert!(shared.is_pending(0, port(4)));
        assert!(!shared.is_pending(1, port(4)));
    }

    #[test]
    fn test_shared_page_serializes_for_migration() {
        let mut shared = SharedInfo::zeroed(2);
        shared.hypervisor().post_port(1, port(9));
        let json = serde_json::to_string(&shared).unwrap();
        let back: SharedInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, shared);
    }
}
