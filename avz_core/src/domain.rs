//! Domain and VCPU registry
//!
//! Owns the set of live domains, their VCPUs, shared pages, event-channel
//! tables and guest memory maps. Domain ids come from a bounded namespace
//! of reusable slots; the UUID handle is the identity that never repeats.
//!
//! Destruction is two-phase: `destroy` only flags the domain `Dying`,
//! because one of its VCPUs may be mid-execution on another physical CPU
//! at that very moment. Memory is reclaimed by a reaper pass that frees a
//! dying domain only after observing that no CPU holds any of its VCPUs
//! in `Running`. A reaper that keeps observing a `Running` VCPU past its
//! retry budget reports an invariant violation and halts scheduling on
//! the CPU holding the stuck VCPU.

use crate::evtchn::EvtchnTable;
use crate::Hypervisor;
use avz_abi::{
    AvzError, AvzResult, CreateDomainParams, DomainLifecycle, SharedInfo, VcpuInfo,
};
use avz_types::{
    CpuId, DomainHandle, DomainId, EvtchnPort, GuestBuffer, GuestRegion, VcpuId, Virq,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Synthetic guest-physical base where per-domain status pages live.
const STATUS_PAGE_PHYS_BASE: u64 = 0x8000_0000;

/// Run state of a VCPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VcpuState {
    /// Attached but not yet eligible to run.
    Offline,
    /// Eligible; sitting in or destined for a run queue.
    Runnable,
    /// Held by exactly one physical CPU.
    Running,
    /// Waiting for an event-channel delivery.
    Blocked,
}

/// One schedulable thread of execution.
#[derive(Debug)]
pub struct Vcpu {
    pub id: VcpuId,
    state: VcpuState,
    /// Preferred physical CPU; `None` means migratable.
    affinity: Option<CpuId>,
    /// Shared status page for this VCPU.
    info: VcpuInfo,
    /// Saved register/context blob; opaque to the control plane.
    context_blob: Vec<u8>,
    /// Hypervisor virtual address of the mapped `vcpu_info` page.
    info_va: u64,
}

impl Vcpu {
    fn new(id: VcpuId, affinity: Option<CpuId>, info_va: u64) -> Self {
        Self {
            id,
            state: VcpuState::Offline,
            affinity,
            info: VcpuInfo::zeroed(),
            context_blob: Vec::new(),
            info_va,
        }
    }

    pub fn state(&self) -> VcpuState {
        self.state
    }

    pub fn set_state(&mut self, state: VcpuState) {
        self.state = state;
    }

    pub fn affinity(&self) -> Option<CpuId> {
        self.affinity
    }

    pub fn info(&self) -> &VcpuInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut VcpuInfo {
        &mut self.info
    }

    pub fn info_va(&self) -> u64 {
        self.info_va
    }

    /// Saves the opaque register blob at a preemption point.
    pub fn save_context(&mut self, blob: Vec<u8>) {
        self.context_blob = blob;
    }

    pub fn context(&self) -> &[u8] {
        &self.context_blob
    }
}

/// A domain's guest-physical memory with simulated backing.
///
/// Hypercall argument buffers are validated against these regions; a
/// buffer that is not fully inside an owned region is never read.
#[derive(Debug, Default)]
pub struct GuestMemory {
    regions: Vec<(GuestRegion, Vec<u8>)>,
}

impl GuestMemory {
    /// Creates a memory map with zeroed backing for each region.
    pub fn new(regions: &[GuestRegion]) -> Self {
        Self {
            regions: regions
                .iter()
                .map(|r| (*r, vec![0u8; r.size as usize]))
                .collect(),
        }
    }

    /// Returns whether the buffer lies entirely in owned memory.
    pub fn owns(&self, buffer: GuestBuffer) -> bool {
        self.regions.iter().any(|(r, _)| r.contains(buffer))
    }

    /// Reads a buffer. `None` if any byte falls outside owned memory.
    pub fn read(&self, buffer: GuestBuffer) -> Option<Vec<u8>> {
        let (region, backing) = self.regions.iter().find(|(r, _)| r.contains(buffer))?;
        let start = (buffer.addr - region.base) as usize;
        let end = start + buffer.len as usize;
        Some(backing[start..end].to_vec())
    }

    /// Writes bytes at the start of a buffer. Fails if the buffer is not
    /// owned or the bytes do not fit.
    pub fn write(&mut self, buffer: GuestBuffer, bytes: &[u8]) -> bool {
        if bytes.len() as u64 > buffer.len {
            return false;
        }
        let Some((region, backing)) = self.regions.iter_mut().find(|(r, _)| r.contains(buffer))
        else {
            return false;
        };
        let start = (buffer.addr - region.base) as usize;
        backing[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }
}

/// An isolated execution context: the Agency or one Mobile Entity.
#[derive(Debug)]
pub struct Domain {
    pub id: DomainId,
    pub handle: DomainHandle,
    lifecycle: DomainLifecycle,
    paused: bool,
    shared: SharedInfo,
    /// Hypervisor virtual address of the mapped `shared_info` page.
    shared_va: u64,
    vcpus: Vec<Vcpu>,
    max_vcpus: usize,
    evtchn: EvtchnTable,
    memory: GuestMemory,
    /// Added to system time when refreshing this domain's VCPU clocks.
    virtual_time_offset_nanos: i64,
    pinned_cpu: Option<CpuId>,
    virq_bindings: HashMap<Virq, EvtchnPort>,
    reaper_retries: u32,
    /// A pause observed a still-`Running` VCPU; the migration
    /// announcement fires once the last one is released.
    migration_notify_pending: bool,
}

impl Domain {
    pub fn lifecycle(&self) -> DomainLifecycle {
        self.lifecycle
    }

    /// The lifecycle state as visible through `domctl`: `Running` and
    /// `Blocked` are derived from the VCPUs rather than stored.
    pub fn effective_lifecycle(&self) -> DomainLifecycle {
        match self.lifecycle {
            DomainLifecycle::Runnable => {
                if self.vcpus.iter().any(|v| v.state() == VcpuState::Running) {
                    DomainLifecycle::Running
                } else if !self.vcpus.is_empty()
                    && self.vcpus.iter().all(|v| v.state() == VcpuState::Blocked)
                {
                    DomainLifecycle::Blocked
                } else {
                    DomainLifecycle::Runnable
                }
            }
            other => other,
        }
    }

    pub fn is_dying(&self) -> bool {
        self.lifecycle == DomainLifecycle::Dying
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pinned_cpu(&self) -> Option<CpuId> {
        self.pinned_cpu
    }

    pub fn shared(&self) -> &SharedInfo {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut SharedInfo {
        &mut self.shared
    }

    pub fn shared_va(&self) -> u64 {
        self.shared_va
    }

    pub(crate) fn set_shared_va(&mut self, va: u64) {
        self.shared_va = va;
    }

    pub fn vcpu(&self, index: u8) -> AvzResult<&Vcpu> {
        self.vcpus
            .iter()
            .find(|v| v.id.index == index)
            .ok_or_else(|| {
                AvzError::InvalidArgument(format!("{} has no vcpu {index}", self.id))
            })
    }

    pub fn vcpu_mut(&mut self, index: u8) -> AvzResult<&mut Vcpu> {
        let id = self.id;
        self.vcpus
            .iter_mut()
            .find(|v| v.id.index == index)
            .ok_or_else(|| AvzError::InvalidArgument(format!("{id} has no vcpu {index}")))
    }

    pub fn vcpus(&self) -> &[Vcpu] {
        &self.vcpus
    }

    pub fn vcpus_mut(&mut self) -> &mut [Vcpu] {
        &mut self.vcpus
    }

    pub fn evtchn(&self) -> &EvtchnTable {
        &self.evtchn
    }

    pub fn evtchn_mut(&mut self) -> &mut EvtchnTable {
        &mut self.evtchn
    }

    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.memory
    }

    pub fn virtual_time_offset_nanos(&self) -> i64 {
        self.virtual_time_offset_nanos
    }

    pub fn set_virtual_time_offset_nanos(&mut self, offset: i64) {
        self.virtual_time_offset_nanos = offset;
    }

    pub fn migration_notify_pending(&self) -> bool {
        self.migration_notify_pending
    }

    pub(crate) fn set_migration_notify_pending(&mut self, pending: bool) {
        self.migration_notify_pending = pending;
    }

    pub fn virq_binding(&self, virq: Virq) -> Option<EvtchnPort> {
        self.virq_bindings.get(&virq).copied()
    }

    pub(crate) fn bind_virq_port(&mut self, virq: Virq, port: EvtchnPort) -> AvzResult<()> {
        if self.virq_bindings.contains_key(&virq) {
            return Err(AvzError::InUse(format!("{} already bound {virq:?}", self.id)));
        }
        self.virq_bindings.insert(virq, port);
        Ok(())
    }

    pub(crate) fn unbind_virq_port(&mut self, port: EvtchnPort) {
        self.virq_bindings.retain(|_, bound| *bound != port);
    }
}

/// Registry audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    DomainCreated {
        domain: DomainId,
        handle: DomainHandle,
        timestamp_nanos: u64,
    },
    VcpuCreated {
        vcpu: VcpuId,
        timestamp_nanos: u64,
    },
    DomainUnpaused {
        domain: DomainId,
        timestamp_nanos: u64,
    },
    DomainPaused {
        domain: DomainId,
        timestamp_nanos: u64,
    },
    DomainDying {
        domain: DomainId,
        timestamp_nanos: u64,
    },
    DomainReaped {
        domain: DomainId,
        timestamp_nanos: u64,
    },
    /// The reaper kept observing a `Running` VCPU of a dying domain past
    /// its retry budget. Logged with full context before the fatal
    /// per-core action.
    ReaperStalled {
        domain: DomainId,
        vcpu: VcpuId,
        vcpu_state: VcpuState,
        retries: u32,
        timestamp_nanos: u64,
    },
}

/// The domain/VCPU registry: a bounded arena of reusable slots.
pub struct DomainRegistry {
    slots: Vec<Option<Domain>>,
    max_vcpus_per_domain: usize,
    evtchn_ports_per_domain: usize,
    audit: Vec<RegistryEvent>,
}

impl DomainRegistry {
    /// Creates an empty registry.
    ///
    /// Port tables are capped at [`avz_abi::shared::MAX_PORTS`]: each port
    /// needs a pending bit in the shared-page bitmask, so anything beyond
    /// that could never be signalled to the guest.
    pub fn new(
        max_domains: usize,
        max_vcpus_per_domain: usize,
        evtchn_ports_per_domain: usize,
    ) -> Self {
        let mut slots = Vec::with_capacity(max_domains);
        for _ in 0..max_domains {
            slots.push(None);
        }
        Self {
            slots,
            max_vcpus_per_domain,
            evtchn_ports_per_domain: evtchn_ports_per_domain.min(avz_abi::shared::MAX_PORTS),
            audit: Vec::new(),
        }
    }

    /// Creates a domain in `Constructing` state with zeroed status pages.
    ///
    /// The caller attaches VCPUs and then unpauses; nothing is schedulable
    /// before that.
    pub fn create_domain(
        &mut self,
        params: &CreateDomainParams,
        shared_va: u64,
        now_nanos: u64,
    ) -> AvzResult<DomainId> {
        if params.shared_regions == 0 || params.shared_regions > 2 {
            return Err(AvzError::InvalidArgument(format!(
                "shared_regions must be 1 or 2, got {}",
                params.shared_regions
            )));
        }
        if params.max_vcpus == 0 || params.max_vcpus as usize > self.max_vcpus_per_domain {
            return Err(AvzError::InvalidArgument(format!(
                "max_vcpus must be 1..={}, got {}",
                self.max_vcpus_per_domain, params.max_vcpus
            )));
        }
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or_else(|| AvzError::Exhausted("no free domain id".into()))?;
        let id = DomainId::from_index(index as u16);
        let domain = Domain {
            id,
            handle: params.handle,
            lifecycle: DomainLifecycle::Constructing,
            paused: true,
            shared: SharedInfo::zeroed(params.shared_regions as usize),
            shared_va,
            vcpus: Vec::new(),
            max_vcpus: params.max_vcpus as usize,
            evtchn: EvtchnTable::new(self.evtchn_ports_per_domain),
            memory: GuestMemory::new(&params.memory),
            virtual_time_offset_nanos: 0,
            pinned_cpu: params.pinned_cpu,
            virq_bindings: HashMap::new(),
            reaper_retries: 0,
            migration_notify_pending: false,
        };
        self.slots[index] = Some(domain);
        self.audit.push(RegistryEvent::DomainCreated {
            domain: id,
            handle: params.handle,
            timestamp_nanos: now_nanos,
        });
        Ok(id)
    }

    /// Looks up a live domain.
    pub fn domain(&self, id: DomainId) -> AvzResult<&Domain> {
        self.slots
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{id} does not exist")))
    }

    /// Looks up a live domain mutably.
    pub fn domain_mut(&mut self, id: DomainId) -> AvzResult<&mut Domain> {
        self.slots
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{id} does not exist")))
    }

    /// Returns whether a slot holds a live domain.
    pub fn exists(&self, id: DomainId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    /// Iterates over live domains.
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Iterates over live domains mutably.
    pub fn domains_mut(&mut self) -> impl Iterator<Item = &mut Domain> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    /// Attaches a VCPU to a constructing domain.
    pub fn create_vcpu(
        &mut self,
        id: DomainId,
        index: u8,
        info_va: u64,
        now_nanos: u64,
    ) -> AvzResult<VcpuId> {
        let domain = self.domain_mut(id)?;
        if domain.lifecycle != DomainLifecycle::Constructing {
            return Err(AvzError::InvalidArgument(format!(
                "{id} is not constructing"
            )));
        }
        if domain.vcpus.len() >= domain.max_vcpus {
            return Err(AvzError::Exhausted(format!("{id} vcpu slots full")));
        }
        if domain.vcpus.iter().any(|v| v.id.index == index) {
            return Err(AvzError::InUse(format!("{id} vcpu {index} exists")));
        }
        let vcpu_id = VcpuId::new(id, index);
        let affinity = domain.pinned_cpu;
        domain.vcpus.push(Vcpu::new(vcpu_id, affinity, info_va));
        self.audit.push(RegistryEvent::VcpuCreated {
            vcpu: vcpu_id,
            timestamp_nanos: now_nanos,
        });
        Ok(vcpu_id)
    }

    /// Marks a constructed domain runnable. Requires at least one VCPU.
    pub fn unpause(&mut self, id: DomainId, now_nanos: u64) -> AvzResult<Vec<VcpuId>> {
        let domain = self.domain_mut(id)?;
        match domain.lifecycle {
            DomainLifecycle::Constructing => {
                if domain.vcpus.is_empty() {
                    return Err(AvzError::InvalidArgument(format!(
                        "{id} has no vcpus to run"
                    )));
                }
                domain.lifecycle = DomainLifecycle::Runnable;
            }
            DomainLifecycle::Runnable => {}
            other => {
                return Err(AvzError::InvalidArgument(format!(
                    "{id} cannot be unpaused from {other:?}"
                )))
            }
        }
        domain.paused = false;
        // Offline VCPUs come up runnable; VCPUs parked runnable while the
        // domain was paused go back to a queue (enqueueing is idempotent).
        // Blocked VCPUs stay blocked until an event wakes them.
        let woken: Vec<VcpuId> = domain
            .vcpus
            .iter_mut()
            .filter(|v| matches!(v.state(), VcpuState::Offline | VcpuState::Runnable))
            .map(|v| {
                v.set_state(VcpuState::Runnable);
                v.id
            })
            .collect();
        self.audit.push(RegistryEvent::DomainUnpaused {
            domain: id,
            timestamp_nanos: now_nanos,
        });
        Ok(woken)
    }

    /// Pauses a runnable domain (pre-migration quiesce).
    pub fn pause(&mut self, id: DomainId, now_nanos: u64) -> AvzResult<()> {
        let domain = self.domain_mut(id)?;
        if domain.lifecycle != DomainLifecycle::Runnable {
            return Err(AvzError::InvalidArgument(format!(
                "{id} cannot be paused from {:?}",
                domain.lifecycle
            )));
        }
        domain.paused = true;
        self.audit.push(RegistryEvent::DomainPaused {
            domain: id,
            timestamp_nanos: now_nanos,
        });
        Ok(())
    }

    /// Flags a domain `Dying`. The reaper frees it later.
    pub fn begin_destroy(&mut self, id: DomainId, now_nanos: u64) -> AvzResult<()> {
        let domain = self.domain_mut(id)?;
        if matches!(
            domain.lifecycle,
            DomainLifecycle::Dying | DomainLifecycle::Dead
        ) {
            return Ok(());
        }
        domain.lifecycle = DomainLifecycle::Dying;
        self.audit.push(RegistryEvent::DomainDying {
            domain: id,
            timestamp_nanos: now_nanos,
        });
        Ok(())
    }

    /// Frees a reaped domain's slot.
    pub(crate) fn release_slot(&mut self, id: DomainId, now_nanos: u64) {
        self.slots[id.index()] = None;
        self.audit.push(RegistryEvent::DomainReaped {
            domain: id,
            timestamp_nanos: now_nanos,
        });
    }

    pub(crate) fn note_reaper_stall(&mut self, event: RegistryEvent) {
        self.audit.push(event);
    }

    pub(crate) fn bump_reaper_retries(&mut self, id: DomainId) -> u32 {
        if let Ok(domain) = self.domain_mut(id) {
            domain.reaper_retries += 1;
            domain.reaper_retries
        } else {
            0
        }
    }

    /// Returns the audit log.
    pub fn audit_log(&self) -> &[RegistryEvent] {
        &self.audit
    }
}

impl Hypervisor {
    /// Creates a domain and maps its `shared_info` page.
    pub fn create_domain(&mut self, params: &CreateDomainParams) -> AvzResult<DomainId> {
        let now = self.now();
        let id = self.registry.create_domain(params, 0, now)?;
        // Status pages are carved from a per-slot synthetic physical
        // window; the remap service gives us the hypervisor-side mapping.
        let phys = STATUS_PAGE_PHYS_BASE + (id.index() as u64) * 0x10_0000;
        let shared_va = self
            .remap
            .remap(phys, crate::PAGE_SIZE)
            .map_err(|e| AvzError::HardwareFault(e.to_string()))?;
        self.registry.domain_mut(id)?.set_shared_va(shared_va);
        Ok(id)
    }

    /// Attaches a VCPU and maps its `vcpu_info` page.
    pub fn create_vcpu(&mut self, domain: DomainId, index: u8) -> AvzResult<VcpuId> {
        let now = self.now();
        let phys = STATUS_PAGE_PHYS_BASE
            + (domain.index() as u64) * 0x10_0000
            + crate::PAGE_SIZE * (1 + index as u64);
        let info_va = self
            .remap
            .remap(phys, crate::PAGE_SIZE)
            .map_err(|e| AvzError::HardwareFault(e.to_string()))?;
        self.registry.create_vcpu(domain, index, info_va, now)
    }

    /// Marks a domain runnable and enqueues its VCPUs.
    pub fn unpause_domain(&mut self, acting: CpuId, domain: DomainId) -> AvzResult<()> {
        let now = self.now();
        let woken = self.registry.unpause(domain, now)?;
        for vcpu in woken {
            self.enqueue_vcpu(acting, vcpu)?;
        }
        Ok(())
    }

    /// Pauses a domain and, once quiesced, tells the Agency its migration
    /// image can be picked up.
    ///
    /// A VCPU still running on another CPU defers the announcement to the
    /// reschedule point that releases it.
    pub fn pause_domain(&mut self, acting: CpuId, domain: DomainId) -> AvzResult<()> {
        let now = self.now();
        self.registry.pause(domain, now)?;
        self.deschedule_domain(domain)?;
        // The transport layer listens on the Agency's MigrationReady virq.
        if self.domain_has_running_vcpu(domain)? {
            self.registry
                .domain_mut(domain)?
                .set_migration_notify_pending(true);
        } else {
            self.raise_virq(acting, DomainId::AGENCY, Virq::MigrationReady)?;
        }
        Ok(())
    }

    /// Fires a deferred migration announcement once a paused domain has
    /// no `Running` VCPU left.
    pub(crate) fn announce_if_quiesced(
        &mut self,
        acting: CpuId,
        domain: DomainId,
    ) -> AvzResult<()> {
        let pending = match self.registry.domain(domain) {
            Ok(d) => d.is_paused() && !d.is_dying() && d.migration_notify_pending(),
            Err(_) => false,
        };
        if pending && !self.domain_has_running_vcpu(domain)? {
            self.registry
                .domain_mut(domain)?
                .set_migration_notify_pending(false);
            self.raise_virq(acting, DomainId::AGENCY, Virq::MigrationReady)?;
        }
        Ok(())
    }

    /// Begins asynchronous destruction: the domain goes `Dying`, its
    /// queued VCPUs are descheduled, and the reaper frees it once no CPU
    /// still holds one of its VCPUs.
    pub fn destroy_domain(&mut self, domain: DomainId) -> AvzResult<()> {
        let now = self.now();
        self.registry.begin_destroy(domain, now)?;
        self.deschedule_domain(domain)?;
        Ok(())
    }

    /// Returns whether any VCPU of a domain is observed `Running`.
    pub fn domain_has_running_vcpu(&self, domain: DomainId) -> AvzResult<bool> {
        let held_by_cpu = self
            .percpu
            .iter()
            .any(|(_, ctx)| matches!(ctx.current_vcpu, Some(v) if v.domain == domain));
        let marked_running = self
            .registry
            .domain(domain)?
            .vcpus()
            .iter()
            .any(|v| v.state() == VcpuState::Running);
        Ok(held_by_cpu || marked_running)
    }

    /// One reaper pass: frees every dying domain with no `Running` VCPU.
    ///
    /// A domain whose VCPU is still `Running` after the retry budget is
    /// an invariant violation: the event is logged with full context and
    /// the CPU holding the VCPU stops scheduling.
    pub fn reap(&mut self) -> AvzResult<usize> {
        let now = self.now();
        let dying: Vec<DomainId> = self
            .registry
            .domains()
            .filter(|d| d.is_dying())
            .map(|d| d.id)
            .collect();
        let mut reaped = 0;
        for id in dying {
            if !self.domain_has_running_vcpu(id)? {
                self.teardown_channels(id)?;
                self.registry.release_slot(id, now);
                reaped += 1;
                continue;
            }
            let retries = self.registry.bump_reaper_retries(id);
            if retries > self.config.reaper_retry_budget {
                let (stuck, state) = {
                    let domain = self.registry.domain(id)?;
                    let vcpu = domain
                        .vcpus()
                        .iter()
                        .find(|v| v.state() == VcpuState::Running)
                        .ok_or_else(|| {
                            AvzError::InvariantViolation(format!(
                                "{id} reaper stall without running vcpu"
                            ))
                        })?;
                    (vcpu.id, vcpu.state())
                };
                self.registry.note_reaper_stall(RegistryEvent::ReaperStalled {
                    domain: id,
                    vcpu: stuck,
                    vcpu_state: state,
                    retries,
                    timestamp_nanos: now,
                });
                let holder = self
                    .percpu
                    .iter()
                    .find(|(_, ctx)| ctx.current_vcpu == Some(stuck))
                    .map(|(cpu, _)| cpu);
                if let Some(cpu) = holder {
                    self.fail_cpu(
                        cpu,
                        &format!("{stuck} of dying {id} still running past reaper budget"),
                    )?;
                }
                return Err(AvzError::InvariantViolation(format!(
                    "{stuck} of {id} observed {state:?} after {retries} reaper passes"
                )));
            }
        }
        Ok(reaped)
    }

    /// Returns the registry (all state is inspectable, by design).
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// Mutable registry access for tests and guest-side page writes.
    pub fn registry_mut(&mut self) -> &mut DomainRegistry {
        &mut self.registry
    }
}
