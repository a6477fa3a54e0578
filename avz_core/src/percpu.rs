//! Per-CPU storage
//!
//! Every per-CPU datum lives in one [`PerCpu`] registry indexed by
//! [`CpuId`]. There are no globals: accessors take an explicit CPU id and
//! range-check it, so accidental cross-CPU mutation cannot compile into
//! silent aliasing. Areas are installed exactly once, during that CPU's
//! bring-up, and live until shutdown.

use avz_abi::{AvzError, AvzResult};
use avz_types::{CpuId, VcpuId};

/// A registry of one `T` per physical CPU.
#[derive(Debug)]
pub struct PerCpu<T> {
    areas: Vec<Option<T>>,
}

impl<T> PerCpu<T> {
    /// Creates an empty registry for `max_cpus` slots.
    pub fn new(max_cpus: usize) -> Self {
        let mut areas = Vec::with_capacity(max_cpus);
        for _ in 0..max_cpus {
            areas.push(None);
        }
        Self { areas }
    }

    /// Returns the slot count.
    pub fn capacity(&self) -> usize {
        self.areas.len()
    }

    /// Installs a CPU's area. Fails if the slot is out of range or
    /// already populated.
    pub fn install(&mut self, cpu: CpuId, area: T) -> AvzResult<()> {
        let slot = self
            .areas
            .get_mut(cpu.0)
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} out of range")))?;
        if slot.is_some() {
            return Err(AvzError::InUse(format!("{cpu} percpu area already installed")));
        }
        *slot = Some(area);
        Ok(())
    }

    /// Returns whether a CPU's area is installed.
    pub fn is_installed(&self, cpu: CpuId) -> bool {
        matches!(self.areas.get(cpu.0), Some(Some(_)))
    }

    /// Returns a CPU's area.
    pub fn get(&self, cpu: CpuId) -> AvzResult<&T> {
        self.areas
            .get(cpu.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} has no percpu area")))
    }

    /// Returns a CPU's area mutably.
    pub fn get_mut(&mut self, cpu: CpuId) -> AvzResult<&mut T> {
        self.areas
            .get_mut(cpu.0)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} has no percpu area")))
    }

    /// Iterates over installed areas with their CPU ids.
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        self.areas
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|area| (CpuId(i), area)))
    }
}

/// The per-CPU context the hypervisor keeps for each physical CPU.
#[derive(Debug)]
pub struct CpuContext {
    pub cpu: CpuId,
    /// Admitted to the scheduler's set of runnable CPUs.
    pub online: bool,
    /// Scheduling on this core has been halted by an invariant violation.
    pub failed: bool,
    /// Pending softirq vectors, one bit each.
    pub softirq_pending: u32,
    /// The VCPU this CPU is currently holding in `Running`, if any.
    pub current_vcpu: Option<VcpuId>,
}

impl CpuContext {
    /// Creates a fresh offline context.
    pub fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            online: false,
            failed: false,
            softirq_pending: 0,
            current_vcpu: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_access() {
        let mut percpu: PerCpu<u32> = PerCpu::new(2);
        percpu.install(CpuId(0), 7).unwrap();
        assert_eq!(*percpu.get(CpuId(0)).unwrap(), 7);
        *percpu.get_mut(CpuId(0)).unwrap() = 9;
        assert_eq!(*percpu.get(CpuId(0)).unwrap(), 9);
    }

    #[test]
    fn test_double_install_is_in_use() {
        let mut percpu: PerCpu<u32> = PerCpu::new(2);
        percpu.install(CpuId(1), 1).unwrap();
        assert!(matches!(
            percpu.install(CpuId(1), 2),
            Err(AvzError::InUse(_))
        ));
    }

    #[test]
    fn test_out_of_range_cpu_is_rejected() {
        let mut percpu: PerCpu<u32> = PerCpu::new(2);
        assert!(matches!(
            percpu.install(CpuId(5), 1),
            Err(AvzError::InvalidArgument(_))
        ));
        assert!(percpu.get(CpuId(5)).is_err());
    }

    #[test]
    fn test_missing_area_is_reported() {
        let percpu: PerCpu<u32> = PerCpu::new(2);
        assert!(!percpu.is_installed(CpuId(0)));
        assert!(percpu.get(CpuId(0)).is_err());
    }

    #[test]
    fn test_iter_skips_uninstalled() {
        let mut percpu: PerCpu<u32> = PerCpu::new(3);
        percpu.install(CpuId(0), 10).unwrap();
        percpu.install(CpuId(2), 30).unwrap();
        let seen: Vec<_> = percpu.iter().map(|(cpu, v)| (cpu.0, *v)).collect();
        assert_eq!(seen, vec![(0, 10), (2, 30)]);
    }
}
