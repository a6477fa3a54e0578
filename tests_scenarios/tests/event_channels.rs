//! Event-channel scenarios: half-bound parking, the full interdomain
//! round trip, delivery/wakeup, close and destroy-time teardown.

use avz_abi::{AvzError, PortState};
use avz_core::domain::VcpuState;
use avz_core::evtchn::EvtchnEvent;
use avz_types::{CpuId, EvtchnPort, VcpuId};
use tests_scenarios::{boot, create_domain, create_runnable_domain, domain_params, run_vcpu};

#[test]
fn test_send_on_free_port_is_a_silent_noop() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let dom = create_runnable_domain(&mut hv, cpu, None).unwrap();
    hv.evtchn_send(cpu, dom, EvtchnPort::from_index(0)).unwrap();
    assert_eq!(
        hv.registry()
            .domain(dom)
            .unwrap()
            .vcpu(0)
            .unwrap()
            .info()
            .pending_mask(),
        0
    );
}

#[test]
fn test_send_on_half_bound_port_neither_delivers_nor_promotes() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();
    let b = create_runnable_domain(&mut hv, cpu, None).unwrap();

    // B's port 0 is Free, so A's bind parks half-bound.
    let a_port = hv
        .evtchn_bind_interdomain(a, b, EvtchnPort::from_index(0))
        .unwrap();
    assert_eq!(
        hv.evtchn_status(a, a_port).unwrap(),
        PortState::Unbound { remote_dom: b }
    );

    hv.evtchn_send(cpu, a, a_port).unwrap();
    // Still half-bound, nothing pending on either side.
    assert_eq!(
        hv.evtchn_status(a, a_port).unwrap(),
        PortState::Unbound { remote_dom: b }
    );
    let b_dom = hv.registry().domain(b).unwrap();
    assert_eq!(b_dom.vcpu(0).unwrap().info().pending_mask(), 0);
}

#[test]
fn test_interdomain_round_trip_and_close() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();
    let b = create_runnable_domain(&mut hv, cpu, None).unwrap();

    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    let a_port = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();

    assert_eq!(
        hv.evtchn_status(a, a_port).unwrap(),
        PortState::Interdomain {
            remote_dom: b,
            remote_port: b_port
        }
    );
    assert_eq!(
        hv.evtchn_status(b, b_port).unwrap(),
        PortState::Interdomain {
            remote_dom: a,
            remote_port: a_port
        }
    );

    // A send from A lands on B's end of the channel.
    hv.evtchn_send(cpu, a, a_port).unwrap();
    let b_info = hv.registry().domain(b).unwrap();
    assert!(b_info.vcpu(0).unwrap().info().is_pending(b_port));
    assert!(b_info.shared().is_pending(0, b_port));

    // Closing one end frees both.
    hv.evtchn_close(a, a_port).unwrap();
    assert_eq!(hv.evtchn_status(a, a_port).unwrap(), PortState::Free);
    assert_eq!(hv.evtchn_status(b, b_port).unwrap(), PortState::Free);

    // Closing an already-free port is an error the guest can see.
    assert!(matches!(
        hv.evtchn_close(a, a_port),
        Err(AvzError::NotBound(_))
    ));
}

#[test]
fn test_delivery_lands_on_the_expected_port_bit_and_wakes() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    // A only owns the sending end; it never needs to run.
    let a = create_domain(&mut hv, 1, None).unwrap();
    let b = create_runnable_domain(&mut hv, cpu, Some(cpu)).unwrap();

    // Burn ports 0..=4 on B so the bound channel lands on port 5.
    for _ in 0..5 {
        hv.evtchn_alloc_unbound(b, a).unwrap();
    }
    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    assert_eq!(b_port, EvtchnPort::from_index(5));
    let a_port = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();

    // B runs, then blocks waiting for the channel.
    run_vcpu(&mut hv, cpu, VcpuId::new(b, 0));
    hv.block_current(cpu).unwrap();
    assert_eq!(
        hv.registry()
            .domain(b)
            .unwrap()
            .vcpu(0)
            .unwrap()
            .state(),
        VcpuState::Blocked
    );

    hv.evtchn_send(cpu, a, a_port).unwrap();

    let b_dom = hv.registry().domain(b).unwrap();
    let info = b_dom.vcpu(0).unwrap().info();
    assert_eq!(info.pending_mask(), 1 << 5);
    assert!(info.upcall_pending());
    assert_eq!(b_dom.vcpu(0).unwrap().state(), VcpuState::Runnable);

    // The woken VCPU gets the CPU back.
    assert_eq!(hv.schedule(cpu).unwrap(), Some(VcpuId::new(b, 0)));
}

#[test]
fn test_delivery_targets_the_first_attached_vcpu() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();

    // B's only VCPU sits at a nonzero index.
    let b = hv.create_domain(&domain_params(2, None)).unwrap();
    hv.create_vcpu(b, 1).unwrap();
    hv.unpause_domain(cpu, b).unwrap();

    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    let a_port = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();
    hv.evtchn_send(cpu, a, a_port).unwrap();

    let b_dom = hv.registry().domain(b).unwrap();
    assert!(b_dom.vcpu(1).unwrap().info().is_pending(b_port));
    assert!(b_dom.shared().is_pending(0, b_port));
}

#[test]
fn test_send_toward_a_vcpuless_domain_is_dropped() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();
    // B exists but never attached a VCPU.
    let b = hv.create_domain(&domain_params(1, None)).unwrap();

    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    let a_port = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();
    // The sender sees success; the event is dropped and audited.
    hv.evtchn_send(cpu, a, a_port).unwrap();
    assert!(hv.evtchn_events().iter().any(|e| {
        matches!(
            e,
            EvtchnEvent::SendDropped { domain, port, .. }
                if *domain == b && *port == b_port
        )
    }));
}

#[test]
fn test_masked_vcpu_gets_pending_bit_but_no_upcall() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();
    let b = create_runnable_domain(&mut hv, cpu, None).unwrap();

    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    let a_port = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();

    // The guest masks upcalls on its side of the page.
    hv.registry_mut()
        .domain_mut(b)
        .unwrap()
        .vcpu_mut(0)
        .unwrap()
        .info_mut()
        .guest()
        .set_upcall_mask(true);

    hv.evtchn_send(cpu, a, a_port).unwrap();

    let info_pending = {
        let b_dom = hv.registry().domain(b).unwrap();
        let info = b_dom.vcpu(0).unwrap().info();
        assert!(info.is_pending(b_port));
        info.upcall_pending()
    };
    assert!(!info_pending);
}

#[test]
fn test_destroy_tears_down_both_bound_and_half_bound_channels() {
    let (mut hv, _platform) = boot();
    let cpu = CpuId(0);
    let a = create_runnable_domain(&mut hv, cpu, None).unwrap();
    let b = create_runnable_domain(&mut hv, cpu, None).unwrap();

    // One fully bound channel A<->B and one half-bound port on A
    // awaiting B.
    let b_port = hv.evtchn_alloc_unbound(b, a).unwrap();
    let a_bound = hv.evtchn_bind_interdomain(a, b, b_port).unwrap();
    let a_parked = hv.evtchn_alloc_unbound(a, b).unwrap();

    hv.destroy_domain(b).unwrap();
    assert_eq!(hv.reap().unwrap(), 1);

    assert_eq!(hv.evtchn_status(a, a_bound).unwrap(), PortState::Free);
    assert_eq!(hv.evtchn_status(a, a_parked).unwrap(), PortState::Free);
}
