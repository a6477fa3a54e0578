//! Boot-time configuration
//!
//! These values come from the platform (device tree, build constants) and
//! are consumed once at initialization; nothing re-validates them later.

use serde::{Deserialize, Serialize};

/// Boot-time configuration for the hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvzConfig {
    /// Maximum number of physical CPUs the platform may bring up.
    pub max_cpus: usize,
    /// Maximum number of simultaneously live domains.
    pub max_domains: usize,
    /// Maximum VCPUs per domain.
    pub max_vcpus_per_domain: usize,
    /// Event-channel ports per domain table (at most 64: one pending bit
    /// each in the shared-info bitmask).
    pub evtchn_ports_per_domain: usize,
    /// Shared-info regions for the Agency domain (1 or 2; the Agency may
    /// carry a CPU-selected twin region).
    pub agency_shared_regions: usize,
    /// Reaper passes allowed before a still-`Running` VCPU of a dying
    /// domain is treated as an invariant violation.
    pub reaper_retry_budget: u32,
    /// Handshake polls allowed before a secondary CPU is given up on.
    pub handshake_retry_budget: u32,
    /// UART base address for the diagnostic console, from the device tree.
    pub uart_base: u64,
}

impl Default for AvzConfig {
    fn default() -> Self {
        Self {
            max_cpus: 4,
            max_domains: 8,
            max_vcpus_per_domain: 4,
            evtchn_ports_per_domain: 32,
            agency_shared_regions: 2,
            reaper_retry_budget: 8,
            handshake_retry_budget: 16,
            uart_base: 0x0900_0000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_sane() {
        let config = AvzConfig::default();
        assert!(config.max_cpus >= 1);
        assert!(config.max_domains >= 2);
        assert!(config.evtchn_ports_per_domain <= 64);
        assert!(config.agency_shared_regions == 1 || config.agency_shared_regions == 2);
    }
}
