//! Domain lifecycle scenarios: creation, exhaustion, two-phase destroy
//! and the reaper's retry budget.

use avz_abi::{AvzError, DomainLifecycle};
use avz_core::domain::{RegistryEvent, VcpuState};
use avz_core::fault::FaultPlan;
use avz_types::{CpuId, VcpuId};
use tests_scenarios::{boot, create_domain, create_runnable_domain, domain_params, run_vcpu};

#[test]
fn test_created_domains_get_unique_ids_and_start_constructing() {
    let (mut hv, _platform) = boot();
    let a = create_domain(&mut hv, 1, None).unwrap();
    let b = create_domain(&mut hv, 1, None).unwrap();
    assert_ne!(a, b);
    for id in [a, b] {
        let domain = hv.registry().domain(id).unwrap();
        assert_eq!(domain.lifecycle(), DomainLifecycle::Constructing);
        assert!(domain.is_paused());
    }
    // Nothing is schedulable before unpause.
    assert_eq!(hv.schedule(CpuId(0)).unwrap(), None);
}

#[test]
fn test_domain_exhaustion_leaves_no_partial_state() {
    let (mut hv, _platform) = boot();
    let max = hv.config().max_domains;
    for _ in 0..max {
        create_domain(&mut hv, 1, None).unwrap();
    }
    let audit_before = hv.registry().audit_log().len();
    let result = hv.create_domain(&domain_params(1, None));
    assert!(matches!(result, Err(AvzError::Exhausted(_))));
    assert_eq!(hv.registry().domains().count(), max);
    assert_eq!(hv.registry().audit_log().len(), audit_before);
}

#[test]
fn test_destroy_while_running_defers_to_reaper() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let dom = create_runnable_domain(&mut hv, cpu, Some(cpu)).unwrap();
    run_vcpu(&mut hv, cpu, VcpuId::new(dom, 0));

    hv.destroy_domain(dom).unwrap();
    assert!(hv.registry().domain(dom).unwrap().is_dying());

    // The VCPU is still held by cpu0, so the reaper must not free yet.
    assert_eq!(hv.reap().unwrap(), 0);
    assert!(hv.registry().exists(dom));

    // The next reschedule point on cpu0 drops the dying VCPU.
    assert_eq!(hv.schedule(cpu).unwrap(), None);
    assert_eq!(hv.reap().unwrap(), 1);
    assert!(!hv.registry().exists(dom));
}

#[test]
fn test_reaper_budget_exhaustion_fails_only_the_holding_cpu() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let dom = create_runnable_domain(&mut hv, cpu, Some(cpu)).unwrap();
    run_vcpu(&mut hv, cpu, VcpuId::new(dom, 0));
    hv.destroy_domain(dom).unwrap();

    let budget = hv.config().reaper_retry_budget;
    for _ in 0..budget {
        assert_eq!(hv.reap().unwrap(), 0);
    }
    // One pass beyond the budget is an invariant violation.
    let result = hv.reap();
    assert!(matches!(result, Err(AvzError::InvariantViolation(_))));

    // The stall was logged with full context before the core was failed.
    let stalled = hv.registry().audit_log().iter().any(|e| {
        matches!(
            e,
            RegistryEvent::ReaperStalled {
                domain,
                vcpu_state: VcpuState::Running,
                ..
            } if *domain == dom
        )
    });
    assert!(stalled);

    // The holding CPU refuses to schedule; the hypervisor lives on.
    assert!(matches!(
        hv.schedule(cpu),
        Err(AvzError::InvariantViolation(_))
    ));
    assert!(hv.registry().exists(dom));
}

#[test]
fn test_pause_quiesces_and_notifies_the_agency() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    // The first domain is the Agency; it listens for migration images.
    let agency = create_runnable_domain(&mut hv, cpu, Some(cpu)).unwrap();
    assert!(agency.is_agency());
    let port = hv
        .evtchn_bind_virq(agency, avz_types::Virq::MigrationReady)
        .unwrap();

    let me = create_runnable_domain(&mut hv, cpu, None).unwrap();
    hv.pause_domain(cpu, me).unwrap();
    assert!(hv.registry().domain(me).unwrap().is_paused());

    // The quiesced image announcement landed on the Agency's virq port.
    let agency_dom = hv.registry().domain(agency).unwrap();
    assert!(agency_dom.vcpu(0).unwrap().info().is_pending(port));

    // A paused domain's VCPUs are never picked.
    assert_ne!(hv.schedule(cpu).unwrap(), Some(VcpuId::new(me, 0)));
}

#[test]
fn test_pause_with_a_vcpu_mid_run_announces_at_its_release() {
    let (mut hv, _platform) = boot();
    hv.boot_secondary(CpuId(1), &FaultPlan::none()).unwrap();
    let agency = create_runnable_domain(&mut hv, CpuId(0), Some(CpuId(0))).unwrap();
    let port = hv
        .evtchn_bind_virq(agency, avz_types::Virq::MigrationReady)
        .unwrap();

    // The paused domain's VCPU is current on cpu1 at pause time.
    let me = create_runnable_domain(&mut hv, CpuId(0), Some(CpuId(1))).unwrap();
    run_vcpu(&mut hv, CpuId(1), VcpuId::new(me, 0));
    hv.pause_domain(CpuId(0), me).unwrap();

    // The image is not ready while a VCPU is still mid-execution.
    let pending_early = hv
        .registry()
        .domain(agency)
        .unwrap()
        .vcpu(0)
        .unwrap()
        .info()
        .is_pending(port);
    assert!(!pending_early);

    // cpu1's reschedule releases the last running VCPU; the announcement
    // fires exactly then.
    assert_eq!(hv.schedule(CpuId(1)).unwrap(), None);
    let agency_dom = hv.registry().domain(agency).unwrap();
    assert!(agency_dom.vcpu(0).unwrap().info().is_pending(port));
}
