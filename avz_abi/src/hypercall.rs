//! Hypercall numbers and the typed hypercall surface
//!
//! A hypercall trap delivers a number plus up to four register-width
//! arguments. [`Hypercall::from_raw`] is the single place where numbers
//! and register encodings are validated; everything past it works on the
//! closed [`Hypercall`] enumeration, so dispatch is exhaustive at compile
//! time.

use crate::error::AvzError;
use crate::evtchn::EvtchnCmd;
use avz_types::GuestBuffer;
use serde::{Deserialize, Serialize};

/// Hypercall number for `domctl`.
pub const HYPERCALL_DOMCTL: u32 = 1;
/// Hypercall number for `event_channel_op`.
pub const HYPERCALL_EVENT_CHANNEL_OP: u32 = 2;
/// Hypercall number for `sched_op`.
pub const HYPERCALL_SCHED_OP: u32 = 3;
/// Hypercall number for `console_io`.
pub const HYPERCALL_CONSOLE_IO: u32 = 4;

/// Raw trap-frame view of a hypercall: number plus register arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHypercall {
    pub number: u32,
    pub args: [u64; 4],
}

impl RawHypercall {
    /// Creates a raw hypercall.
    pub const fn new(number: u32, args: [u64; 4]) -> Self {
        Self { number, args }
    }
}

/// Scheduling requests a VCPU can make about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedOp {
    /// Give up the CPU but stay runnable.
    Yield,
    /// Block until an event channel delivery wakes the VCPU.
    Block,
}

/// The typed hypercall surface.
///
/// Payload-carrying calls keep the guest's pointer/length claim as a
/// [`GuestBuffer`]; the dispatcher must prove the buffer lies in memory
/// the calling domain owns before a single byte is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hypercall {
    /// Domain management: create/destroy/query/pause.
    Domctl { buffer: GuestBuffer },
    /// Event-channel operations.
    EventChannelOp { cmd: EvtchnCmd, buffer: GuestBuffer },
    /// Scheduling requests; no guest memory involved.
    SchedOp { op: SchedOp },
    /// One byte of diagnostic console output.
    ConsoleIo { byte: u8 },
}

impl Hypercall {
    /// Decodes a raw trap frame.
    ///
    /// Unknown numbers and malformed register encodings fail here with no
    /// side effects.
    pub fn from_raw(raw: RawHypercall) -> Result<Self, AvzError> {
        match raw.number {
            HYPERCALL_DOMCTL => Ok(Hypercall::Domctl {
                buffer: GuestBuffer::new(raw.args[0], raw.args[1]),
            }),
            HYPERCALL_EVENT_CHANNEL_OP => {
                let cmd = EvtchnCmd::from_raw(raw.args[0])?;
                Ok(Hypercall::EventChannelOp {
                    cmd,
                    buffer: GuestBuffer::new(raw.args[1], raw.args[2]),
                })
            }
            HYPERCALL_SCHED_OP => match raw.args[0] {
                0 => Ok(Hypercall::SchedOp { op: SchedOp::Yield }),
                1 => Ok(Hypercall::SchedOp { op: SchedOp::Block }),
                other => Err(AvzError::InvalidArgument(format!(
                    "unknown sched_op command {other}"
                ))),
            },
            HYPERCALL_CONSOLE_IO => {
                let byte = u8::try_from(raw.args[0]).map_err(|_| {
                    AvzError::InvalidArgument(format!(
                        "console_io byte {:#x} out of range",
                        raw.args[0]
                    ))
                })?;
                Ok(Hypercall::ConsoleIo { byte })
            }
            unknown => Err(AvzError::InvalidHypercall(unknown)),
        }
    }

    /// Returns the hypercall number for this call.
    pub fn number(&self) -> u32 {
        match self {
            Hypercall::Domctl { .. } => HYPERCALL_DOMCTL,
            Hypercall::EventChannelOp { .. } => HYPERCALL_EVENT_CHANNEL_OP,
            Hypercall::SchedOp { .. } => HYPERCALL_SCHED_OP,
            Hypercall::ConsoleIo { .. } => HYPERCALL_CONSOLE_IO,
        }
    }
}
