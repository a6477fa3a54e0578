//! Scenario Test Utilities
//!
//! Shared helpers for the end-to-end hypervisor scenarios.
//!
//! ## Test Philosophy
//!
//! - **Whole-system paths**: scenarios drive the hypervisor through the
//!   hypercall surface and the public subsystem APIs, not internals
//! - **Deterministic faults**: hardware misbehavior is scripted via
//!   `FaultPlan` and reproducible
//! - **Inspect, don't trust**: every assertion reads real state back
//!   out of the registry, run queues, shared pages or audit logs

use avz_abi::{AbiPayload, AvzResult, CreateDomainParams};
use avz_core::devices::{PlatformDevices, SimConsole, SimIpiController, SimRemap};
use avz_core::Hypervisor;
use avz_types::{AvzConfig, CpuId, DomainHandle, DomainId, GuestBuffer, GuestRegion, VcpuId};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Base of the guest memory region every test domain owns.
pub const GUEST_RAM_BASE: u64 = 0x1000_0000;
/// Size of that region.
pub const GUEST_RAM_SIZE: u64 = 0x1_0000;

/// Handles into the simulated hardware for post-hoc inspection.
pub struct TestPlatform {
    pub console_output: Rc<RefCell<Vec<u8>>>,
    pub ipis: Rc<RefCell<Vec<CpuId>>>,
}

/// Boots a hypervisor on simulated devices, keeping inspection handles.
pub fn boot() -> (Hypervisor, TestPlatform) {
    let console = SimConsole::new();
    let ipi = SimIpiController::new();
    let platform = TestPlatform {
        console_output: console.output(),
        ipis: ipi.ipis(),
    };
    let devices = PlatformDevices {
        console: Box::new(console),
        ipi: Box::new(ipi),
        remap: Box::new(SimRemap::new()),
    };
    let mut hv = Hypervisor::new(AvzConfig::default(), devices).expect("boot failed");
    hv.prepare_cpus().expect("boot cpu failed");
    (hv, platform)
}

/// Standard creation parameters: one region of RAM, one VCPU slot.
pub fn domain_params(max_vcpus: u8, pinned_cpu: Option<CpuId>) -> CreateDomainParams {
    CreateDomainParams {
        handle: DomainHandle::new(),
        max_vcpus,
        pinned_cpu,
        shared_regions: 1,
        memory: vec![GuestRegion::new(GUEST_RAM_BASE, GUEST_RAM_SIZE)],
    }
}

/// Creates a domain with `vcpus` attached VCPUs, still constructing.
pub fn create_domain(hv: &mut Hypervisor, vcpus: u8, pinned: Option<CpuId>) -> AvzResult<DomainId> {
    let id = hv.create_domain(&domain_params(vcpus.max(1), pinned))?;
    for index in 0..vcpus {
        hv.create_vcpu(id, index)?;
    }
    Ok(id)
}

/// Creates a single-VCPU domain and unpauses it so it is schedulable.
pub fn create_runnable_domain(
    hv: &mut Hypervisor,
    acting: CpuId,
    pinned: Option<CpuId>,
) -> AvzResult<DomainId> {
    let id = create_domain(hv, 1, pinned)?;
    hv.unpause_domain(acting, id)?;
    Ok(id)
}

/// Serializes `value` into the domain's guest RAM at an offset and
/// returns the buffer to pass through a hypercall. `capacity` leaves
/// room for an in-place reply.
pub fn stage_payload<T: Serialize>(
    hv: &mut Hypervisor,
    domain: DomainId,
    offset: u64,
    capacity: u64,
    value: &T,
) -> GuestBuffer {
    let payload = AbiPayload::new(value).expect("payload failed to serialize");
    let len = (payload.len() as u64).max(capacity);
    let buffer = GuestBuffer::new(GUEST_RAM_BASE + offset, len);
    let written = hv
        .registry_mut()
        .domain_mut(domain)
        .expect("domain missing")
        .memory_mut()
        .write(buffer, payload.as_bytes());
    assert!(written, "payload did not fit guest RAM");
    buffer
}

/// Reads a reply the hypervisor wrote back into guest RAM.
pub fn read_reply<T: for<'de> serde::Deserialize<'de>>(
    hv: &Hypervisor,
    domain: DomainId,
    buffer: GuestBuffer,
) -> T {
    let bytes = hv
        .registry()
        .domain(domain)
        .expect("domain missing")
        .memory()
        .read(buffer)
        .expect("reply buffer unreadable");
    // Replies are JSON followed by whatever the guest left in the buffer.
    let mut de = serde_json::Deserializer::from_slice(&bytes);
    serde::Deserialize::deserialize(&mut de).expect("reply failed to decode")
}

/// Drives one VCPU of a domain onto a CPU: schedules until it runs.
pub fn run_vcpu(hv: &mut Hypervisor, cpu: CpuId, vcpu: VcpuId) {
    let running = hv.schedule(cpu).expect("schedule failed");
    assert_eq!(running, Some(vcpu), "expected {vcpu} to run on {cpu}");
}
