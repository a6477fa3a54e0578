//! Hypercall dispatcher
//!
//! The single entry point for guest requests. A trap frame arrives as a
//! raw number plus register arguments; decoding, buffer-ownership
//! validation and privilege checks all happen here, before any
//! subsystem sees the request.
//!
//! Ordering is strict: the caller's identity comes from the CPU's
//! current VCPU, the guest buffer is proven to lie inside memory that
//! domain owns, and only then is a single byte of payload decoded. A
//! buffer outside the caller's memory is never read, whatever the
//! payload might claim.
//!
//! Every error is flattened to a small negative result code for the
//! guest; the typed error stays in the audit log. `InvariantViolation`
//! is the one error that is not guest-reportable and propagates instead.

use crate::Hypervisor;
use avz_abi::{
    AbiPayload, AllocUnboundOp, AvzError, AvzResult, BindInterdomainOp, BindVirqOp, CloseOp,
    DomainStatusReply, DomctlOp, EvtchnCmd, Hypercall, RawHypercall, SchedOp, SendOp, StatusOp,
};
use avz_types::{CpuId, DomainId, GuestBuffer, VcpuId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hypercall audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HypercallEvent {
    Completed {
        caller: VcpuId,
        number: u32,
        result: i64,
        timestamp_nanos: u64,
    },
    Failed {
        caller: VcpuId,
        number: u32,
        error: String,
        result: i64,
        timestamp_nanos: u64,
    },
}

impl Hypervisor {
    /// Dispatches a raw trap frame from the VCPU currently running on
    /// `cpu`. Returns the register value handed back to the guest.
    ///
    /// Guest-reportable errors become negative result codes here; only
    /// `InvariantViolation` propagates as `Err`.
    pub fn do_hypercall_raw(&mut self, cpu: CpuId, raw: RawHypercall) -> AvzResult<i64> {
        match Hypercall::from_raw(raw) {
            Ok(call) => self.do_hypercall(cpu, call),
            Err(err) => {
                let now = self.now();
                let caller = self.caller(cpu)?;
                let code = err.result_code();
                self.hypercall_audit.push(HypercallEvent::Failed {
                    caller,
                    number: raw.number,
                    error: err.to_string(),
                    result: code,
                    timestamp_nanos: now,
                });
                Ok(code)
            }
        }
    }

    /// Dispatches a decoded hypercall from the VCPU currently running on
    /// `cpu`.
    pub fn do_hypercall(&mut self, cpu: CpuId, call: Hypercall) -> AvzResult<i64> {
        let caller = self.caller(cpu)?;
        let outcome = self.dispatch(cpu, caller, call);
        let now = self.now();
        match outcome {
            Ok(value) => {
                self.hypercall_audit.push(HypercallEvent::Completed {
                    caller,
                    number: call.number(),
                    result: value,
                    timestamp_nanos: now,
                });
                Ok(value)
            }
            Err(err) if err.is_guest_reportable() => {
                let code = err.result_code();
                self.hypercall_audit.push(HypercallEvent::Failed {
                    caller,
                    number: call.number(),
                    error: err.to_string(),
                    result: code,
                    timestamp_nanos: now,
                });
                Ok(code)
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// The identity of the caller: whatever VCPU `cpu` is running.
    fn caller(&self, cpu: CpuId) -> AvzResult<VcpuId> {
        self.percpu.get(cpu)?.current_vcpu.ok_or_else(|| {
            AvzError::InvalidArgument(format!("{cpu} has no current vcpu to issue hypercalls"))
        })
    }

    fn dispatch(&mut self, cpu: CpuId, caller: VcpuId, call: Hypercall) -> AvzResult<i64> {
        match call {
            Hypercall::Domctl { buffer } => {
                // Domain management is Agency-only.
                if !caller.domain.is_agency() {
                    return Err(AvzError::InvalidArgument(format!(
                        "{} may not issue domctl",
                        caller.domain
                    )));
                }
                let op: DomctlOp = self.read_payload(caller.domain, buffer)?;
                self.do_domctl(cpu, caller.domain, buffer, op)
            }
            Hypercall::EventChannelOp { cmd, buffer } => {
                self.do_event_channel_op(cpu, caller.domain, cmd, buffer)
            }
            Hypercall::SchedOp { op } => {
                match op {
                    SchedOp::Yield => self.yield_current(cpu)?,
                    SchedOp::Block => self.block_current(cpu)?,
                };
                Ok(0)
            }
            Hypercall::ConsoleIo { byte } => {
                self.console.put_byte(byte);
                Ok(0)
            }
        }
    }

    fn do_domctl(
        &mut self,
        cpu: CpuId,
        caller: DomainId,
        buffer: GuestBuffer,
        op: DomctlOp,
    ) -> AvzResult<i64> {
        match op {
            DomctlOp::CreateDomain(params) => {
                let id = self.create_domain(&params)?;
                Ok(id.index() as i64)
            }
            DomctlOp::CreateVcpu { domain, index } => {
                self.create_vcpu(domain, index)?;
                Ok(index as i64)
            }
            DomctlOp::Unpause { domain } => {
                self.unpause_domain(cpu, domain)?;
                Ok(0)
            }
            DomctlOp::Pause { domain } => {
                self.pause_domain(cpu, domain)?;
                Ok(0)
            }
            DomctlOp::DestroyDomain { domain } => {
                self.destroy_domain(domain)?;
                Ok(0)
            }
            DomctlOp::QueryDomain { domain } => {
                let reply = {
                    let d = self.registry.domain(domain)?;
                    DomainStatusReply {
                        domain: d.id,
                        handle: d.handle,
                        lifecycle: d.effective_lifecycle(),
                        vcpu_count: d.vcpus().len() as u8,
                        paused: d.is_paused(),
                    }
                };
                self.write_payload(caller, buffer, &reply)?;
                Ok(0)
            }
        }
    }

    fn do_event_channel_op(
        &mut self,
        cpu: CpuId,
        caller: DomainId,
        cmd: EvtchnCmd,
        buffer: GuestBuffer,
    ) -> AvzResult<i64> {
        match cmd {
            EvtchnCmd::AllocUnbound => {
                let op: AllocUnboundOp = self.read_payload(caller, buffer)?;
                let port = self.evtchn_alloc_unbound(caller, op.remote_dom)?;
                Ok(port.index() as i64)
            }
            EvtchnCmd::BindInterdomain => {
                let op: BindInterdomainOp = self.read_payload(caller, buffer)?;
                let port = self.evtchn_bind_interdomain(caller, op.remote_dom, op.remote_port)?;
                Ok(port.index() as i64)
            }
            EvtchnCmd::BindVirq => {
                let op: BindVirqOp = self.read_payload(caller, buffer)?;
                let port = self.evtchn_bind_virq(caller, op.virq)?;
                Ok(port.index() as i64)
            }
            EvtchnCmd::Send => {
                let op: SendOp = self.read_payload(caller, buffer)?;
                self.evtchn_send(cpu, caller, op.port)?;
                Ok(0)
            }
            EvtchnCmd::Close => {
                let op: CloseOp = self.read_payload(caller, buffer)?;
                self.evtchn_close(caller, op.port)?;
                Ok(0)
            }
            EvtchnCmd::Status => {
                let op: StatusOp = self.read_payload(caller, buffer)?;
                let state = self.evtchn_status(caller, op.port)?;
                self.write_payload(caller, buffer, &state)?;
                Ok(0)
            }
        }
    }

    /// Validates that `buffer` lies entirely inside `domain`'s memory,
    /// then reads and decodes it. Ownership is checked before any read.
    fn read_payload<T: DeserializeOwned>(
        &self,
        domain: DomainId,
        buffer: GuestBuffer,
    ) -> AvzResult<T> {
        let memory = self.registry.domain(domain)?.memory();
        if !memory.owns(buffer) {
            return Err(AvzError::InvalidArgument(format!(
                "{domain} buffer {:#x}+{:#x} outside owned memory",
                buffer.addr, buffer.len
            )));
        }
        let mut bytes = memory.read(buffer).ok_or_else(|| {
            AvzError::InvalidArgument(format!(
                "{domain} buffer {:#x}+{:#x} unreadable",
                buffer.addr, buffer.len
            ))
        })?;
        // The declared length is the buffer's capacity (replies reuse
        // it); the encoded request occupies a NUL-padded prefix.
        let encoded = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        bytes.truncate(encoded);
        AbiPayload::from_bytes(bytes)
            .deserialize()
            .map_err(|e| AvzError::InvalidArgument(format!("{domain} malformed payload: {e}")))
    }

    /// Serializes a reply into the caller's buffer.
    fn write_payload<T: Serialize>(
        &mut self,
        domain: DomainId,
        buffer: GuestBuffer,
        value: &T,
    ) -> AvzResult<()> {
        let payload = AbiPayload::new(value)
            .map_err(|e| AvzError::InvalidArgument(format!("unencodable reply: {e}")))?;
        let memory = self.registry.domain_mut(domain)?.memory_mut();
        if !memory.write(buffer, payload.as_bytes()) {
            return Err(AvzError::InvalidArgument(format!(
                "{domain} reply does not fit buffer {:#x}+{:#x}",
                buffer.addr, buffer.len
            )));
        }
        Ok(())
    }

    /// Returns the hypercall audit log.
    pub fn hypercall_events(&self) -> &[HypercallEvent] {
        &self.hypercall_audit
    }
}
