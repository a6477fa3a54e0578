//! # AVZ Hypervisor Core
//!
//! The control plane of a thin type-1 hypervisor: domains and VCPUs, a
//! cooperative scheduler, the hypercall dispatcher, event channels,
//! shared status pages, per-CPU state, a softirq engine, the time
//! subsystem and SMP bring-up.
//!
//! ## Purpose
//!
//! This crate runs the whole control plane in-process, against simulated
//! hardware:
//! - Runs under `cargo test`
//! - Deterministic (explicit ticks, no real concurrency in the core)
//! - Inspectable (registry, run queues and audit logs are accessible)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Hypervisor code is usually untestable because it only exists entangled
//! with hardware. Here the hardware sits behind the `avz_hal` traits and
//! every subsystem keeps an audit log, so lifecycle races, lost-wakeup
//! bugs and bring-up failures can be reproduced in a unit test.
//!
//! The one exception to "no real concurrency" is the SMP pen-release
//! rendezvous, which uses real atomics with the orderings a bare-metal
//! port needs.

pub mod devices;
pub mod domain;
pub mod evtchn;
pub mod fault;
pub mod hypercall;
pub mod percpu;
pub mod sched;
pub mod smp;
pub mod softirq;
pub mod time;

use crate::devices::PlatformDevices;
use crate::domain::DomainRegistry;
use crate::evtchn::EvtchnEvent;
use crate::hypercall::HypercallEvent;
use crate::percpu::{CpuContext, PerCpu};
use crate::sched::Scheduler;
use crate::smp::SmpCoordinator;
use crate::softirq::{SoftirqEngine, SoftirqVector};
use crate::time::SystemClock;
use avz_abi::AvzResult;
use avz_hal::{ConsoleDevice, IpiController, RemapService};
use avz_types::AvzConfig;

/// Status pages are one page each.
pub const PAGE_SIZE: u64 = 4096;

/// Default tick frequency of the simulated platform timer.
const DEFAULT_TICK_HZ: u64 = 1_000_000;

/// The hypervisor control plane.
///
/// All state is owned here and directly accessible; nothing hides in
/// globals.
pub struct Hypervisor {
    pub(crate) config: AvzConfig,
    pub(crate) percpu: PerCpu<CpuContext>,
    pub(crate) softirq: SoftirqEngine,
    pub(crate) registry: DomainRegistry,
    pub(crate) sched: Scheduler,
    pub(crate) clock: SystemClock,
    pub(crate) smp: SmpCoordinator,
    pub(crate) console: Box<dyn ConsoleDevice>,
    pub(crate) ipi: Box<dyn IpiController>,
    pub(crate) remap: Box<dyn RemapService>,
    pub(crate) evtchn_audit: Vec<EvtchnEvent>,
    pub(crate) hypercall_audit: Vec<HypercallEvent>,
}

impl Hypervisor {
    /// Creates a hypervisor on the given platform devices and registers
    /// the boot-time softirq handlers.
    pub fn new(config: AvzConfig, devices: PlatformDevices) -> AvzResult<Self> {
        let mut hv = Self {
            percpu: PerCpu::new(config.max_cpus),
            softirq: SoftirqEngine::new(),
            registry: DomainRegistry::new(
                config.max_domains,
                config.max_vcpus_per_domain,
                config.evtchn_ports_per_domain,
            ),
            sched: Scheduler::new(config.max_cpus),
            clock: SystemClock::new(DEFAULT_TICK_HZ),
            smp: SmpCoordinator::new(),
            console: devices.console,
            ipi: devices.ipi,
            remap: devices.remap,
            evtchn_audit: Vec::new(),
            hypercall_audit: Vec::new(),
            config,
        };
        hv.open_softirq(SoftirqVector::Timer, time::timer_softirq)?;
        hv.open_softirq(SoftirqVector::Schedule, sched::schedule_softirq)?;
        Ok(hv)
    }

    /// A hypervisor on simulated devices with the default configuration,
    /// boot CPU online. The usual starting point for tests.
    pub fn simulated() -> AvzResult<Self> {
        let mut hv = Self::new(AvzConfig::default(), PlatformDevices::simulated())?;
        hv.prepare_cpus()?;
        Ok(hv)
    }

    /// Returns the boot-time configuration.
    pub fn config(&self) -> &AvzConfig {
        &self.config
    }
}
