//! Event-channel subsystem
//!
//! Bounded, integer-addressed notification endpoints between domains and
//! between a domain and the hypervisor. A port carries no payload, only a
//! pending bit: delivery is idempotent and consumers poll the full
//! pending bitmask rather than assuming any ordering between ports.
//!
//! Interdomain binding is split into independent single-domain phases —
//! allocate on the local table, inspect/complete on the remote table,
//! finalize on the local table — so no two channel tables are ever held
//! at once. A bind whose peer is not yet awaiting it parks as
//! `Unbound` (half-bound) until the peer completes its half; half-bound
//! ports are reclaimed when either domain is destroyed.

use crate::domain::VcpuState;
use crate::Hypervisor;
use avz_abi::{AvzError, AvzResult, PortState};
use avz_types::{CpuId, DomainId, EvtchnPort, VcpuId, Virq};
use serde::{Deserialize, Serialize};

/// One slot in a domain's event-channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortEntry {
    pub state: PortState,
    /// Hypervisor-side record of an undelivered notification.
    pub pending: bool,
}

impl PortEntry {
    fn free() -> Self {
        Self {
            state: PortState::Free,
            pending: false,
        }
    }
}

/// A domain's bounded port table.
#[derive(Debug)]
pub struct EvtchnTable {
    ports: Vec<PortEntry>,
}

impl EvtchnTable {
    /// Creates a table of `ports` free slots.
    pub fn new(ports: usize) -> Self {
        Self {
            ports: vec![PortEntry::free(); ports],
        }
    }

    /// Returns the table size.
    pub fn capacity(&self) -> usize {
        self.ports.len()
    }

    /// Returns the first `Free` port, if any.
    pub fn first_free(&self) -> Option<EvtchnPort> {
        self.ports
            .iter()
            .position(|entry| entry.state == PortState::Free)
            .map(|i| EvtchnPort::from_index(i as u32))
    }

    /// Returns a port entry.
    pub fn entry(&self, port: EvtchnPort) -> AvzResult<&PortEntry> {
        self.ports
            .get(port.index())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{port} out of range")))
    }

    /// Returns a port entry mutably.
    pub fn entry_mut(&mut self, port: EvtchnPort) -> AvzResult<&mut PortEntry> {
        self.ports
            .get_mut(port.index())
            .ok_or_else(|| AvzError::InvalidArgument(format!("{port} out of range")))
    }

    /// Iterates over all entries with their port numbers.
    pub fn entries(&self) -> impl Iterator<Item = (EvtchnPort, &PortEntry)> {
        self.ports
            .iter()
            .enumerate()
            .map(|(i, e)| (EvtchnPort::from_index(i as u32), e))
    }
}

/// Event-channel audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvtchnEvent {
    PortAllocated {
        domain: DomainId,
        port: EvtchnPort,
        timestamp_nanos: u64,
    },
    HalfBound {
        domain: DomainId,
        port: EvtchnPort,
        remote_dom: DomainId,
        timestamp_nanos: u64,
    },
    BindCompleted {
        domain: DomainId,
        port: EvtchnPort,
        remote_dom: DomainId,
        remote_port: EvtchnPort,
        timestamp_nanos: u64,
    },
    Delivered {
        domain: DomainId,
        port: EvtchnPort,
        vcpu: VcpuId,
        woke: bool,
        timestamp_nanos: u64,
    },
    SendDropped {
        domain: DomainId,
        port: EvtchnPort,
        timestamp_nanos: u64,
    },
    Closed {
        domain: DomainId,
        port: EvtchnPort,
        timestamp_nanos: u64,
    },
    PeerClosed {
        domain: DomainId,
        port: EvtchnPort,
        timestamp_nanos: u64,
    },
}

impl Hypervisor {
    /// Reserves a port awaiting an interdomain bind from `remote_dom`.
    pub fn evtchn_alloc_unbound(
        &mut self,
        local: DomainId,
        remote_dom: DomainId,
    ) -> AvzResult<EvtchnPort> {
        let now = self.now();
        if !self.registry.exists(remote_dom) {
            return Err(AvzError::InvalidArgument(format!(
                "{remote_dom} does not exist"
            )));
        }
        let domain = self.registry.domain_mut(local)?;
        let port = domain
            .evtchn()
            .first_free()
            .ok_or_else(|| AvzError::Exhausted(format!("{local} has no free event channel")))?;
        domain.evtchn_mut().entry_mut(port)?.state = PortState::Unbound { remote_dom };
        self.evtchn_audit.push(EvtchnEvent::PortAllocated {
            domain: local,
            port,
            timestamp_nanos: now,
        });
        Ok(port)
    }

    /// Binds a local port toward `remote_dom`'s `remote_port`.
    ///
    /// If the remote port is awaiting exactly this bind, both ends flip
    /// to fully bound and reference each other. Otherwise the local port
    /// parks half-bound until the peer completes its half.
    pub fn evtchn_bind_interdomain(
        &mut self,
        local: DomainId,
        remote_dom: DomainId,
        remote_port: EvtchnPort,
    ) -> AvzResult<EvtchnPort> {
        let now = self.now();
        if local == remote_dom {
            return Err(AvzError::InvalidArgument(format!(
                "{local} cannot interdomain-bind to itself"
            )));
        }
        if !self.registry.exists(remote_dom) {
            return Err(AvzError::InvalidArgument(format!(
                "{remote_dom} does not exist"
            )));
        }
        // Phase 1: local table only. The port parks half-bound.
        let local_port = {
            let domain = self.registry.domain_mut(local)?;
            let port = domain.evtchn().first_free().ok_or_else(|| {
                AvzError::Exhausted(format!("{local} has no free event channel"))
            })?;
            domain.evtchn_mut().entry_mut(port)?.state = PortState::Unbound { remote_dom };
            port
        };
        // Phase 2: remote table only. Complete the peer's half if it is
        // awaiting us.
        let completed = {
            let remote = self.registry.domain_mut(remote_dom)?;
            match remote.evtchn().entry(remote_port)?.state {
                PortState::Unbound { remote_dom: awaiting } if awaiting == local => {
                    remote.evtchn_mut().entry_mut(remote_port)?.state = PortState::Interdomain {
                        remote_dom: local,
                        remote_port: local_port,
                    };
                    true
                }
                _ => false,
            }
        };
        // Phase 3: local table again.
        if completed {
            let domain = self.registry.domain_mut(local)?;
            domain.evtchn_mut().entry_mut(local_port)?.state = PortState::Interdomain {
                remote_dom,
                remote_port,
            };
            self.evtchn_audit.push(EvtchnEvent::BindCompleted {
                domain: local,
                port: local_port,
                remote_dom,
                remote_port,
                timestamp_nanos: now,
            });
        } else {
            self.evtchn_audit.push(EvtchnEvent::HalfBound {
                domain: local,
                port: local_port,
                remote_dom,
                timestamp_nanos: now,
            });
        }
        Ok(local_port)
    }

    /// Binds a local port to a virtual IRQ.
    pub fn evtchn_bind_virq(&mut self, domain_id: DomainId, virq: Virq) -> AvzResult<EvtchnPort> {
        let now = self.now();
        let domain = self.registry.domain_mut(domain_id)?;
        if domain.virq_binding(virq).is_some() {
            return Err(AvzError::InUse(format!(
                "{domain_id} already bound {virq:?}"
            )));
        }
        let port = domain.evtchn().first_free().ok_or_else(|| {
            AvzError::Exhausted(format!("{domain_id} has no free event channel"))
        })?;
        domain.evtchn_mut().entry_mut(port)?.state = PortState::Virq(virq);
        domain.bind_virq_port(virq, port)?;
        self.evtchn_audit.push(EvtchnEvent::PortAllocated {
            domain: domain_id,
            port,
            timestamp_nanos: now,
        });
        Ok(port)
    }

    /// Sends a notification on a bound port.
    ///
    /// A send on a `Free` or half-bound port is a silent no-op: it never
    /// promotes a half-bound channel and is never fatal to the sender.
    pub fn evtchn_send(
        &mut self,
        acting: CpuId,
        domain_id: DomainId,
        port: EvtchnPort,
    ) -> AvzResult<()> {
        let now = self.now();
        let target = {
            let domain = self.registry.domain(domain_id)?;
            match domain.evtchn().entry(port)?.state {
                PortState::Interdomain {
                    remote_dom,
                    remote_port,
                } => Some((remote_dom, remote_port)),
                // Virq/IPI ports loop back to the owner.
                PortState::Virq(_) | PortState::Ipi(_) | PortState::PhysIrq(_) => {
                    Some((domain_id, port))
                }
                PortState::Free | PortState::Unbound { .. } => None,
            }
        };
        match target {
            Some((target_dom, target_port)) => {
                self.deliver_port(acting, target_dom, target_port)
            }
            None => {
                self.evtchn_audit.push(EvtchnEvent::SendDropped {
                    domain: domain_id,
                    port,
                    timestamp_nanos: now,
                });
                Ok(())
            }
        }
    }

    /// Marks a port pending on its owning domain and wakes the target
    /// VCPU if the guest's upcall mask permits delivery.
    pub(crate) fn deliver_port(
        &mut self,
        acting: CpuId,
        target_dom: DomainId,
        target_port: EvtchnPort,
    ) -> AvzResult<()> {
        let now = self.now();
        let delivery = {
            let domain = match self.registry.domain_mut(target_dom) {
                Ok(domain) => domain,
                // The peer vanished between bind and send: drop silently.
                Err(_) => {
                    self.evtchn_audit.push(EvtchnEvent::SendDropped {
                        domain: target_dom,
                        port: target_port,
                        timestamp_nanos: now,
                    });
                    return Ok(());
                }
            };
            if domain.is_dying() {
                self.evtchn_audit.push(EvtchnEvent::SendDropped {
                    domain: target_dom,
                    port: target_port,
                    timestamp_nanos: now,
                });
                return Ok(());
            }
            // Events land on the domain's first attached VCPU, which
            // need not sit at index zero.
            let vcpu_index = match domain.vcpus().first() {
                Some(vcpu) => vcpu.id.index,
                None => {
                    self.evtchn_audit.push(EvtchnEvent::SendDropped {
                        domain: target_dom,
                        port: target_port,
                        timestamp_nanos: now,
                    });
                    return Ok(());
                }
            };
            domain.evtchn_mut().entry_mut(target_port)?.pending = true;
            let pinned = domain.pinned_cpu();
            let target_cpu = {
                let vcpu = domain.vcpu(vcpu_index)?;
                vcpu.affinity().or(pinned).unwrap_or(CpuId(0))
            };
            let region = domain.shared().region_for_cpu(target_cpu);
            domain.shared_mut().hypervisor().post_port(region, target_port);
            let vcpu = domain.vcpu_mut(vcpu_index)?;
            vcpu.info_mut().hypervisor().post_port(target_port);
            let masked = vcpu.info().upcall_masked();
            if !masked {
                vcpu.info_mut().hypervisor().deliver_upcall();
            }
            let blocked = vcpu.state() == VcpuState::Blocked;
            (vcpu.id, masked, blocked)
        };
        let (vcpu_id, masked, blocked) = delivery;
        let woke = !masked && blocked;
        if woke {
            self.wake_vcpu(acting, vcpu_id)?;
        }
        self.evtchn_audit.push(EvtchnEvent::Delivered {
            domain: target_dom,
            port: target_port,
            vcpu: vcpu_id,
            woke,
            timestamp_nanos: now,
        });
        Ok(())
    }

    /// Raises the virtual IRQ bound by a domain, if any.
    pub fn raise_virq(
        &mut self,
        acting: CpuId,
        domain_id: DomainId,
        virq: Virq,
    ) -> AvzResult<()> {
        let port = match self.registry.domain(domain_id) {
            Ok(domain) => domain.virq_binding(virq),
            Err(_) => None,
        };
        match port {
            Some(port) => self.deliver_port(acting, domain_id, port),
            None => Ok(()),
        }
    }

    /// Closes a port: back to `Free`, peer notified for interdomain
    /// channels so it does not send into a closed channel.
    pub fn evtchn_close(&mut self, domain_id: DomainId, port: EvtchnPort) -> AvzResult<()> {
        let now = self.now();
        // Phase 1: local table.
        let state = {
            let domain = self.registry.domain_mut(domain_id)?;
            let entry = domain.evtchn_mut().entry_mut(port)?;
            if entry.state == PortState::Free {
                return Err(AvzError::NotBound(format!("{domain_id} {port} is free")));
            }
            let state = entry.state;
            *entry = PortEntry::free();
            domain.unbind_virq_port(port);
            state
        };
        self.evtchn_audit.push(EvtchnEvent::Closed {
            domain: domain_id,
            port,
            timestamp_nanos: now,
        });
        // Phase 2: the peer's table, if the channel was fully bound and
        // the peer still exists.
        if let PortState::Interdomain {
            remote_dom,
            remote_port,
        } = state
        {
            if let Ok(remote) = self.registry.domain_mut(remote_dom) {
                if let Ok(entry) = remote.evtchn_mut().entry_mut(remote_port) {
                    let points_back = matches!(
                        entry.state,
                        PortState::Interdomain { remote_dom: d, remote_port: p }
                            if d == domain_id && p == port
                    );
                    if points_back {
                        *entry = PortEntry::free();
                        self.evtchn_audit.push(EvtchnEvent::PeerClosed {
                            domain: remote_dom,
                            port: remote_port,
                            timestamp_nanos: now,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Queries a port's state.
    pub fn evtchn_status(&self, domain_id: DomainId, port: EvtchnPort) -> AvzResult<PortState> {
        Ok(self.registry.domain(domain_id)?.evtchn().entry(port)?.state)
    }

    /// Reclaims every channel touching a dying domain: peers of its fully
    /// bound ports are freed and notified, and half-bound ports parked on
    /// it anywhere are released.
    pub(crate) fn teardown_channels(&mut self, dying: DomainId) -> AvzResult<()> {
        let now = self.now();
        let peers: Vec<(DomainId, EvtchnPort)> = {
            let domain = self.registry.domain(dying)?;
            domain
                .evtchn()
                .entries()
                .filter_map(|(_, entry)| match entry.state {
                    PortState::Interdomain {
                        remote_dom,
                        remote_port,
                    } => Some((remote_dom, remote_port)),
                    _ => None,
                })
                .collect()
        };
        for (remote_dom, remote_port) in peers {
            if let Ok(remote) = self.registry.domain_mut(remote_dom) {
                if let Ok(entry) = remote.evtchn_mut().entry_mut(remote_port) {
                    let points_back = matches!(
                        entry.state,
                        PortState::Interdomain { remote_dom: d, .. } if d == dying
                    );
                    if points_back {
                        *entry = PortEntry::free();
                        self.evtchn_audit.push(EvtchnEvent::PeerClosed {
                            domain: remote_dom,
                            port: remote_port,
                            timestamp_nanos: now,
                        });
                    }
                }
            }
        }
        // Half-bound ports awaiting the dying domain are reclaimed too.
        let mut freed: Vec<(DomainId, EvtchnPort)> = Vec::new();
        for domain in self.registry.domains_mut() {
            if domain.id == dying {
                continue;
            }
            let stale: Vec<EvtchnPort> = domain
                .evtchn()
                .entries()
                .filter_map(|(port, entry)| match entry.state {
                    PortState::Unbound { remote_dom } if remote_dom == dying => Some(port),
                    _ => None,
                })
                .collect();
            for port in stale {
                if let Ok(entry) = domain.evtchn_mut().entry_mut(port) {
                    *entry = PortEntry::free();
                }
                freed.push((domain.id, port));
            }
        }
        for (domain, port) in freed {
            self.evtchn_audit.push(EvtchnEvent::Closed {
                domain,
                port,
                timestamp_nanos: now,
            });
        }
        Ok(())
    }

    /// Returns the event-channel audit log.
    pub fn evtchn_events(&self) -> &[EvtchnEvent] {
        &self.evtchn_audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_allocates_first_free() {
        let mut table = EvtchnTable::new(4);
        let p0 = table.first_free().unwrap();
        assert_eq!(p0.index(), 0);
        table.entry_mut(p0).unwrap().state = PortState::Virq(Virq::Timer);
        let p1 = table.first_free().unwrap();
        assert_eq!(p1.index(), 1);
    }

    #[test]
    fn test_table_full_has_no_free_port() {
        let mut table = EvtchnTable::new(2);
        for i in 0..2 {
            table
                .entry_mut(EvtchnPort::from_index(i))
                .unwrap()
                .state = PortState::Virq(Virq::Timer);
        }
        assert!(table.first_free().is_none());
    }

    #[test]
    fn test_out_of_range_port_is_invalid() {
        let table = EvtchnTable::new(2);
        assert!(table.entry(EvtchnPort::from_index(2)).is_err());
    }
}
