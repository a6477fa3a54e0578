//! `event_channel_op` payload structures

use crate::error::AvzError;
use avz_types::{CpuId, DomainId, EvtchnPort, Virq};
use serde::{Deserialize, Serialize};

/// Sub-command selector for `event_channel_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvtchnCmd {
    AllocUnbound,
    BindInterdomain,
    BindVirq,
    Send,
    Close,
    Status,
}

impl EvtchnCmd {
    /// Decodes the register-encoded sub-command.
    pub fn from_raw(raw: u64) -> Result<Self, AvzError> {
        match raw {
            0 => Ok(EvtchnCmd::AllocUnbound),
            1 => Ok(EvtchnCmd::BindInterdomain),
            2 => Ok(EvtchnCmd::BindVirq),
            3 => Ok(EvtchnCmd::Send),
            4 => Ok(EvtchnCmd::Close),
            5 => Ok(EvtchnCmd::Status),
            other => Err(AvzError::InvalidArgument(format!(
                "unknown event_channel_op command {other}"
            ))),
        }
    }

    /// Returns the register encoding.
    pub fn to_raw(self) -> u64 {
        match self {
            EvtchnCmd::AllocUnbound => 0,
            EvtchnCmd::BindInterdomain => 1,
            EvtchnCmd::BindVirq => 2,
            EvtchnCmd::Send => 3,
            EvtchnCmd::Close => 4,
            EvtchnCmd::Status => 5,
        }
    }
}

/// State of one event-channel port.
///
/// A port is always in exactly one state; the owning domain's table is
/// the only place transitions happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    /// Unallocated.
    Free,
    /// Half-bound: awaiting the named peer to complete an interdomain
    /// bind against this port.
    Unbound { remote_dom: DomainId },
    /// Fully bound to a peer domain's port.
    Interdomain {
        remote_dom: DomainId,
        remote_port: EvtchnPort,
    },
    /// Bound to a virtual IRQ.
    Virq(Virq),
    /// Bound to a per-CPU IPI.
    Ipi(CpuId),
    /// Bound to a physical IRQ line.
    PhysIrq(u32),
}

impl PortState {
    /// Returns whether a `send` on this port can deliver anywhere.
    pub fn is_fully_bound(&self) -> bool {
        matches!(
            self,
            PortState::Interdomain { .. }
                | PortState::Virq(_)
                | PortState::Ipi(_)
                | PortState::PhysIrq(_)
        )
    }
}

/// Reserve a port awaiting an interdomain bind from `remote_dom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocUnboundOp {
    pub remote_dom: DomainId,
}

/// Bind a local port to `remote_dom`'s `remote_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindInterdomainOp {
    pub remote_dom: DomainId,
    pub remote_port: EvtchnPort,
}

/// Bind a local port to a virtual IRQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindVirqOp {
    pub virq: Virq,
}

/// Notify the peer of a bound port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOp {
    pub port: EvtchnPort,
}

/// Close a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOp {
    pub port: EvtchnPort,
}

/// Query a port; the [`PortState`] reply is written back to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOp {
    pub port: EvtchnPort,
}
