//! SMP bring-up
//!
//! The boot CPU brings up each secondary through a pen-release
//! rendezvous: the secondary parks until its CPU number appears in the
//! release cell, then announces itself by writing the same number to the
//! acknowledge cell. Release uses a store with `Release` ordering and
//! the announcement is read with `Acquire`, so everything the boot CPU
//! set up for the secondary (its percpu area, run queue) is visible
//! before the secondary runs.
//!
//! A secondary that never announces within the retry budget is left
//! behind: the hypervisor logs the failure and boots degraded with the
//! CPUs that did come up. Boot never hangs on dead silicon.

use crate::fault::FaultPlan;
use crate::percpu::CpuContext;
use crate::Hypervisor;
use avz_abi::{AvzError, AvzResult};
use avz_types::CpuId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel meaning "no CPU" in the rendezvous cells.
const NO_CPU: usize = usize::MAX;

/// The pen-release rendezvous cells shared between boot and secondary.
#[derive(Debug)]
pub struct Rendezvous {
    /// CPU number currently released from the pen.
    pen: AtomicUsize,
    /// CPU number of the last secondary to announce itself.
    ack: AtomicUsize,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            pen: AtomicUsize::new(NO_CPU),
            ack: AtomicUsize::new(NO_CPU),
        }
    }

    /// Boot side: releases one CPU from the pen. The `Release` store
    /// publishes all prior setup to the woken secondary.
    pub fn release(&self, cpu: CpuId) {
        self.ack.store(NO_CPU, Ordering::Relaxed);
        self.pen.store(cpu.0, Ordering::Release);
    }

    /// Secondary side: returns whether this CPU has been released.
    pub fn is_released(&self, cpu: CpuId) -> bool {
        self.pen.load(Ordering::Acquire) == cpu.0
    }

    /// Secondary side: announces this CPU as up.
    pub fn announce(&self, cpu: CpuId) {
        self.ack.store(cpu.0, Ordering::Release);
    }

    /// Boot side: returns whether the released CPU has announced.
    pub fn announced(&self, cpu: CpuId) -> bool {
        self.ack.load(Ordering::Acquire) == cpu.0
    }

    /// Closes the pen again after a successful handshake.
    pub fn reset(&self) {
        self.pen.store(NO_CPU, Ordering::Release);
        self.ack.store(NO_CPU, Ordering::Relaxed);
    }
}

/// SMP audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmpEvent {
    BootCpuOnline {
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    SecondaryReleased {
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    SecondaryOnline {
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    SecondaryLost {
        cpu: CpuId,
        retries: u32,
        timestamp_nanos: u64,
    },
}

/// Bring-up bookkeeping: which CPUs were admitted, and the boot log.
pub struct SmpCoordinator {
    rendezvous: Rendezvous,
    admitted: Vec<CpuId>,
    audit: Vec<SmpEvent>,
}

impl SmpCoordinator {
    pub fn new() -> Self {
        Self {
            rendezvous: Rendezvous::new(),
            admitted: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// CPUs admitted to scheduling, in bring-up order.
    pub fn admitted(&self) -> &[CpuId] {
        &self.admitted
    }

    /// Returns the audit log.
    pub fn audit_log(&self) -> &[SmpEvent] {
        &self.audit
    }
}

impl Default for SmpCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor {
    /// Brings the boot CPU online: installs its percpu area and admits
    /// it to scheduling. Everything else waits in the pen.
    pub fn prepare_cpus(&mut self) -> AvzResult<()> {
        let boot = CpuId(0);
        let now = self.now();
        self.percpu.install(boot, CpuContext::new(boot))?;
        self.percpu.get_mut(boot)?.online = true;
        self.smp.admitted.push(boot);
        self.smp.audit.push(SmpEvent::BootCpuOnline {
            cpu: boot,
            timestamp_nanos: now,
        });
        Ok(())
    }

    /// Releases one secondary and waits (bounded) for its announcement.
    ///
    /// An unresponsive CPU exhausts the handshake budget and is left
    /// behind with a `HardwareFault`; the pen closes again either way.
    pub fn boot_secondary(&mut self, cpu: CpuId, faults: &FaultPlan) -> AvzResult<()> {
        let now = self.now();
        if cpu == CpuId(0) || cpu.0 >= self.config.max_cpus {
            return Err(AvzError::InvalidArgument(format!(
                "{cpu} is not a secondary in range"
            )));
        }
        // Percpu area and run queue exist before the release publishes
        // them.
        self.percpu.install(cpu, CpuContext::new(cpu))?;
        self.smp.rendezvous.release(cpu);
        self.smp.audit.push(SmpEvent::SecondaryReleased {
            cpu,
            timestamp_nanos: now,
        });
        let mut retries = 0;
        let announced = loop {
            // The simulated secondary runs its init inline when polled.
            if !faults.is_unresponsive(cpu) && self.smp.rendezvous.is_released(cpu) {
                self.secondary_init(cpu)?;
            }
            if self.smp.rendezvous.announced(cpu) {
                break true;
            }
            retries += 1;
            if retries > self.config.handshake_retry_budget {
                break false;
            }
        };
        self.smp.rendezvous.reset();
        if !announced {
            self.smp.audit.push(SmpEvent::SecondaryLost {
                cpu,
                retries,
                timestamp_nanos: now,
            });
            self.console
                .put_str(&format!("AVZ: {cpu} failed to come online\n"));
            return Err(AvzError::HardwareFault(format!(
                "{cpu} did not announce within {retries} polls"
            )));
        }
        self.percpu.get_mut(cpu)?.online = true;
        self.smp.admitted.push(cpu);
        self.smp.audit.push(SmpEvent::SecondaryOnline {
            cpu,
            timestamp_nanos: now,
        });
        Ok(())
    }

    /// The secondary's side of the handshake: runs once released, sets
    /// up local interrupt routing, announces.
    pub fn secondary_init(&mut self, cpu: CpuId) -> AvzResult<()> {
        if !self.smp.rendezvous.is_released(cpu) {
            return Err(AvzError::InvalidArgument(format!(
                "{cpu} initialized without release"
            )));
        }
        // Route the scheduler IPI line to this core.
        self.ipi.set_affinity(0, cpu);
        self.smp.rendezvous.announce(cpu);
        Ok(())
    }

    /// Boots every configured secondary, continuing past failures.
    ///
    /// Returns the admitted CPU set; a partial set is a degraded but
    /// functional boot.
    pub fn boot_all(&mut self, faults: &FaultPlan) -> AvzResult<Vec<CpuId>> {
        for index in 1..self.config.max_cpus {
            match self.boot_secondary(CpuId(index), faults) {
                Ok(()) => {}
                Err(AvzError::HardwareFault(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(self.smp.admitted.clone())
    }

    /// Returns the SMP coordinator for inspection.
    pub fn smp(&self) -> &SmpCoordinator {
        &self.smp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rendezvous_handshake() {
        let rv = Rendezvous::new();
        assert!(!rv.is_released(CpuId(1)));
        rv.release(CpuId(1));
        assert!(rv.is_released(CpuId(1)));
        assert!(!rv.is_released(CpuId(2)));
        assert!(!rv.announced(CpuId(1)));
        rv.announce(CpuId(1));
        assert!(rv.announced(CpuId(1)));
        rv.reset();
        assert!(!rv.is_released(CpuId(1)));
    }

    #[test]
    fn test_release_publishes_across_threads() {
        let rv = Arc::new(Rendezvous::new());
        let secondary = {
            let rv = Arc::clone(&rv);
            thread::spawn(move || {
                while !rv.is_released(CpuId(3)) {
                    thread::yield_now();
                }
                rv.announce(CpuId(3));
            })
        };
        rv.release(CpuId(3));
        secondary.join().unwrap();
        assert!(rv.announced(CpuId(3)));
    }
}
