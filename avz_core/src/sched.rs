//! VCPU scheduler
//!
//! Cooperative round-robin over per-CPU run queues, with one twist: when
//! picking the next VCPU a core prefers the first queued VCPU belonging
//! to a different domain than the one it ran last, so no single chatty
//! domain monopolizes a core while others starve.
//!
//! The scheduler never migrates a VCPU on its own. Placement happens at
//! wake time: an affine VCPU goes to its preferred CPU, a migratable one
//! to the least-loaded online CPU. A CPU that has been failed by an
//! invariant violation refuses to schedule at all.

use crate::domain::VcpuState;
use crate::softirq::SoftirqVector;
use crate::Hypervisor;
use avz_abi::{AvzError, AvzResult};
use avz_types::{CpuId, DomainId, VcpuId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One physical CPU's run state.
#[derive(Debug, Default)]
pub struct CpuRunState {
    queue: VecDeque<VcpuId>,
    /// Domain of the VCPU this core ran last; the fairness tiebreak.
    last_domain: Option<DomainId>,
}

impl CpuRunState {
    /// Queue length; the load metric for wake-time placement.
    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn contains(&self, vcpu: VcpuId) -> bool {
        self.queue.contains(&vcpu)
    }
}

/// Scheduler audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedEvent {
    Enqueued {
        vcpu: VcpuId,
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    Switched {
        cpu: CpuId,
        from: Option<VcpuId>,
        to: VcpuId,
        timestamp_nanos: u64,
    },
    CpuIdle {
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    Blocked {
        vcpu: VcpuId,
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    Yielded {
        vcpu: VcpuId,
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    Woken {
        vcpu: VcpuId,
        cpu: CpuId,
        timestamp_nanos: u64,
    },
    CpuFailed {
        cpu: CpuId,
        reason: String,
        timestamp_nanos: u64,
    },
}

/// Per-CPU run queues plus the scheduler audit log.
pub struct Scheduler {
    cores: Vec<CpuRunState>,
    audit: Vec<SchedEvent>,
}

impl Scheduler {
    pub fn new(max_cpus: usize) -> Self {
        let mut cores = Vec::with_capacity(max_cpus);
        for _ in 0..max_cpus {
            cores.push(CpuRunState::default());
        }
        Self {
            cores,
            audit: Vec::new(),
        }
    }

    fn core(&self, cpu: CpuId) -> AvzResult<&CpuRunState> {
        self.cores
            .get(cpu.0)
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} out of range")))
    }

    fn core_mut(&mut self, cpu: CpuId) -> AvzResult<&mut CpuRunState> {
        self.cores
            .get_mut(cpu.0)
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} out of range")))
    }

    /// Returns a CPU's run state for inspection.
    pub fn run_state(&self, cpu: CpuId) -> AvzResult<&CpuRunState> {
        self.core(cpu)
    }

    /// Removes every queued VCPU of a domain from every queue.
    fn purge_domain(&mut self, domain: DomainId) {
        for core in &mut self.cores {
            core.queue.retain(|v| v.domain != domain);
        }
    }

    /// Pops the next VCPU for a core: the first queued VCPU of a domain
    /// other than `last_domain`, else the queue head.
    fn pop_next(&mut self, cpu: CpuId) -> AvzResult<Option<VcpuId>> {
        let core = self.core_mut(cpu)?;
        let pick = match core.last_domain {
            Some(last) => core
                .queue
                .iter()
                .position(|v| v.domain != last)
                .unwrap_or(0),
            None => 0,
        };
        if core.queue.is_empty() {
            return Ok(None);
        }
        Ok(core.queue.remove(pick))
    }

    /// Returns the audit log.
    pub fn audit_log(&self) -> &[SchedEvent] {
        &self.audit
    }
}

impl Hypervisor {
    /// Places a runnable VCPU on a run queue.
    ///
    /// An affine VCPU goes to its preferred CPU; a migratable one to the
    /// least-loaded online CPU. Queuing is idempotent.
    pub fn enqueue_vcpu(&mut self, acting: CpuId, vcpu: VcpuId) -> AvzResult<()> {
        let now = self.now();
        let affinity = self
            .registry
            .domain(vcpu.domain)?
            .vcpu(vcpu.index)?
            .affinity();
        let target = match affinity {
            Some(cpu) => cpu,
            None => self.least_loaded_cpu()?,
        };
        let core = self.sched.core_mut(target)?;
        if !core.contains(vcpu) {
            core.queue.push_back(vcpu);
            self.sched.audit.push(SchedEvent::Enqueued {
                vcpu,
                cpu: target,
                timestamp_nanos: now,
            });
        }
        if target != acting {
            self.raise_softirq(acting, target, SoftirqVector::Schedule)?;
        }
        Ok(())
    }

    /// The online CPU with the shallowest run queue.
    fn least_loaded_cpu(&self) -> AvzResult<CpuId> {
        self.percpu
            .iter()
            .filter(|(_, ctx)| ctx.online && !ctx.failed)
            .min_by_key(|(cpu, _)| self.sched.cores[cpu.0].depth())
            .map(|(cpu, _)| cpu)
            .ok_or_else(|| AvzError::HardwareFault("no online cpu to place vcpu".into()))
    }

    /// Picks and switches to the next VCPU on `cpu`.
    ///
    /// The outgoing VCPU (if still `Running`) goes back to `Runnable` at
    /// the tail of the queue. VCPUs of dying or paused domains are
    /// discarded rather than run. Returns the VCPU now running, or `None`
    /// if the core went idle.
    pub fn schedule(&mut self, cpu: CpuId) -> AvzResult<Option<VcpuId>> {
        let now = self.now();
        {
            let ctx = self.percpu.get(cpu)?;
            if ctx.failed {
                return Err(AvzError::InvariantViolation(format!(
                    "{cpu} is failed; scheduling halted"
                )));
            }
            if !ctx.online {
                return Err(AvzError::InvalidArgument(format!("{cpu} is offline")));
            }
        }
        // Preempt the incumbent back onto the queue. A VCPU of a dying or
        // paused domain is released (so the reaper can observe it
        // quiesced) but not requeued.
        let outgoing = self.percpu.get_mut(cpu)?.current_vcpu.take();
        if let Some(prev) = outgoing {
            let requeue = {
                let domain = self.registry.domain_mut(prev.domain)?;
                let eligible = !domain.is_dying() && !domain.is_paused();
                let vcpu = domain.vcpu_mut(prev.index)?;
                if vcpu.state() == VcpuState::Running {
                    vcpu.set_state(VcpuState::Runnable);
                    eligible
                } else {
                    false
                }
            };
            if requeue {
                self.sched.core_mut(cpu)?.queue.push_back(prev);
            }
            // Releasing the last running VCPU of a paused domain is the
            // quiescence point its migration announcement waits for.
            self.announce_if_quiesced(cpu, prev.domain)?;
        }
        // Pick, skipping entries that stopped being runnable while queued.
        let next = loop {
            match self.sched.pop_next(cpu)? {
                None => break None,
                Some(candidate) => {
                    let eligible = match self.registry.domain(candidate.domain) {
                        Ok(domain) => {
                            !domain.is_dying()
                                && !domain.is_paused()
                                && domain.vcpu(candidate.index)?.state() == VcpuState::Runnable
                        }
                        Err(_) => false,
                    };
                    if eligible {
                        break Some(candidate);
                    }
                }
            }
        };
        match next {
            Some(vcpu) => {
                self.registry
                    .domain_mut(vcpu.domain)?
                    .vcpu_mut(vcpu.index)?
                    .set_state(VcpuState::Running);
                let ctx = self.percpu.get_mut(cpu)?;
                ctx.current_vcpu = Some(vcpu);
                let core = self.sched.core_mut(cpu)?;
                core.last_domain = Some(vcpu.domain);
                self.sched.audit.push(SchedEvent::Switched {
                    cpu,
                    from: outgoing,
                    to: vcpu,
                    timestamp_nanos: now,
                });
                Ok(Some(vcpu))
            }
            None => {
                self.sched.audit.push(SchedEvent::CpuIdle {
                    cpu,
                    timestamp_nanos: now,
                });
                Ok(None)
            }
        }
    }

    /// The VCPU currently held `Running` by a CPU.
    pub fn current_vcpu(&self, cpu: CpuId) -> AvzResult<Option<VcpuId>> {
        Ok(self.percpu.get(cpu)?.current_vcpu)
    }

    /// Blocks the current VCPU on `cpu` until an event-channel delivery
    /// wakes it, then reschedules.
    pub fn block_current(&mut self, cpu: CpuId) -> AvzResult<Option<VcpuId>> {
        let now = self.now();
        let vcpu = self
            .percpu
            .get_mut(cpu)?
            .current_vcpu
            .take()
            .ok_or_else(|| AvzError::InvalidArgument(format!("{cpu} has no current vcpu")))?;
        // An already-pending upcall makes block a no-op: the event the
        // guest is about to wait for has in fact arrived.
        let pending = {
            let domain = self.registry.domain(vcpu.domain)?;
            domain.vcpu(vcpu.index)?.info().upcall_pending()
        };
        let state = if pending {
            VcpuState::Runnable
        } else {
            VcpuState::Blocked
        };
        self.registry
            .domain_mut(vcpu.domain)?
            .vcpu_mut(vcpu.index)?
            .set_state(state);
        if state == VcpuState::Runnable {
            self.sched.core_mut(cpu)?.queue.push_back(vcpu);
        } else {
            self.sched.audit.push(SchedEvent::Blocked {
                vcpu,
                cpu,
                timestamp_nanos: now,
            });
        }
        self.schedule(cpu)
    }

    /// Yields the current VCPU's slice and reschedules.
    pub fn yield_current(&mut self, cpu: CpuId) -> AvzResult<Option<VcpuId>> {
        let now = self.now();
        if let Some(vcpu) = self.percpu.get(cpu)?.current_vcpu {
            self.sched.audit.push(SchedEvent::Yielded {
                vcpu,
                cpu,
                timestamp_nanos: now,
            });
        }
        self.schedule(cpu)
    }

    /// Wakes a blocked VCPU and requests a reschedule on its target CPU.
    pub fn wake_vcpu(&mut self, acting: CpuId, vcpu: VcpuId) -> AvzResult<()> {
        let now = self.now();
        {
            let domain = self.registry.domain_mut(vcpu.domain)?;
            let v = domain.vcpu_mut(vcpu.index)?;
            if v.state() != VcpuState::Blocked {
                return Ok(());
            }
            v.set_state(VcpuState::Runnable);
        }
        self.enqueue_vcpu(acting, vcpu)?;
        let placed = self
            .sched
            .cores
            .iter()
            .position(|core| core.contains(vcpu))
            .map(CpuId);
        if let Some(cpu) = placed {
            self.sched.audit.push(SchedEvent::Woken {
                vcpu,
                cpu,
                timestamp_nanos: now,
            });
            self.raise_softirq(acting, cpu, SoftirqVector::Schedule)?;
        }
        Ok(())
    }

    /// Removes a domain's VCPUs from every run queue. Already-running
    /// VCPUs keep their core until its next reschedule point.
    pub(crate) fn deschedule_domain(&mut self, domain: DomainId) -> AvzResult<()> {
        self.sched.purge_domain(domain);
        Ok(())
    }

    /// Halts scheduling on a CPU after an invariant violation. The
    /// failure is confined to this core; the rest of the system runs on.
    pub(crate) fn fail_cpu(&mut self, cpu: CpuId, reason: &str) -> AvzResult<()> {
        let now = self.now();
        self.percpu.get_mut(cpu)?.failed = true;
        self.console.put_str(&format!("AVZ: {cpu} failed: {reason}\n"));
        self.sched.audit.push(SchedEvent::CpuFailed {
            cpu,
            reason: reason.to_string(),
            timestamp_nanos: now,
        });
        Ok(())
    }

    /// Returns the scheduler for inspection.
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }
}

/// The reschedule softirq handler; registered at boot.
pub(crate) fn schedule_softirq(hv: &mut Hypervisor, cpu: CpuId) {
    // A failed core refuses to schedule; the violation is already logged.
    let _ = hv.schedule(cpu);
}
