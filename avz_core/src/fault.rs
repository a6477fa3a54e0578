//! Fault injection for bring-up tests
//!
//! A [`FaultPlan`] describes which hardware misbehaves during a run.
//! Production boots use [`FaultPlan::none`]; tests build plans that make
//! secondary CPUs ignore their release.

use avz_types::CpuId;
use std::collections::HashSet;

/// Declarative hardware-fault script for a boot.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    unresponsive_cpus: HashSet<CpuId>,
}

impl FaultPlan {
    /// A plan with no faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Marks a secondary CPU as never announcing itself when released.
    pub fn with_unresponsive_cpu(mut self, cpu: CpuId) -> Self {
        self.unresponsive_cpus.insert(cpu);
        self
    }

    /// Returns whether a CPU ignores its pen release.
    pub fn is_unresponsive(&self, cpu: CpuId) -> bool {
        self.unresponsive_cpus.contains(&cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan_faults_nothing() {
        let plan = FaultPlan::none();
        assert!(!plan.is_unresponsive(CpuId(0)));
    }

    #[test]
    fn test_marked_cpu_is_unresponsive() {
        let plan = FaultPlan::none().with_unresponsive_cpu(CpuId(2));
        assert!(plan.is_unresponsive(CpuId(2)));
        assert!(!plan.is_unresponsive(CpuId(1)));
    }
}
