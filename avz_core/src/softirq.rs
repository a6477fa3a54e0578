//! Softirq engine
//!
//! A fixed, small set of deferred-work vectors serviced per CPU outside
//! interrupt context. Raising only sets a bit in the target CPU's pending
//! mask: there is no payload and no queue, so a vector fires at most once
//! per service pass no matter how often it was raised. A cross-CPU raise
//! additionally sends an IPI so the target services soon.
//!
//! Handlers are plain function pointers registered once at boot; vectors
//! are serviced in fixed priority order (timer before reschedule) so tick
//! processing is never delayed behind rescheduling.

use crate::Hypervisor;
use avz_abi::{AvzError, AvzResult};
use avz_types::CpuId;
use serde::{Deserialize, Serialize};

/// Deferred-work vectors, in service priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoftirqVector {
    /// Timer tick processing.
    Timer = 0,
    /// Reschedule request.
    Schedule = 1,
}

/// Number of softirq vectors.
pub const NR_SOFTIRQS: usize = 2;

/// All vectors in service priority order.
pub const SOFTIRQ_PRIORITY: [SoftirqVector; NR_SOFTIRQS] =
    [SoftirqVector::Timer, SoftirqVector::Schedule];

impl SoftirqVector {
    /// Returns the vector's bit in a pending mask.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// A softirq handler. Runs on the CPU that services the vector.
pub type SoftirqHandler = fn(&mut Hypervisor, CpuId);

/// Boot-time handler registration table.
#[derive(Default)]
pub struct SoftirqEngine {
    handlers: [Option<SoftirqHandler>; NR_SOFTIRQS],
}

impl SoftirqEngine {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a vector. Boot-time only; a vector cannot
    /// be re-registered.
    pub fn open(&mut self, vector: SoftirqVector, handler: SoftirqHandler) -> AvzResult<()> {
        let slot = &mut self.handlers[vector as usize];
        if slot.is_some() {
            return Err(AvzError::InUse(format!("softirq {vector:?} already registered")));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Returns the handler table (function pointers are `Copy`, so the
    /// service loop can walk a snapshot while handing `&mut Hypervisor`
    /// to handlers).
    pub fn handlers(&self) -> [Option<SoftirqHandler>; NR_SOFTIRQS] {
        self.handlers
    }
}

impl Hypervisor {
    /// Registers a softirq handler. Called during boot only.
    pub fn open_softirq(&mut self, vector: SoftirqVector, handler: SoftirqHandler) -> AvzResult<()> {
        self.softirq.open(vector, handler)
    }

    /// Raises a vector on `target`.
    ///
    /// Callable from any CPU; `acting` names the CPU doing the raise. A
    /// cross-CPU raise of a not-already-pending vector kicks the target
    /// with an IPI so it services soon (and wakes it if idle).
    pub fn raise_softirq(
        &mut self,
        acting: CpuId,
        target: CpuId,
        vector: SoftirqVector,
    ) -> AvzResult<()> {
        let ctx = self.percpu.get_mut(target)?;
        let newly_raised = ctx.softirq_pending & vector.bit() == 0;
        ctx.softirq_pending |= vector.bit();
        if newly_raised && acting != target {
            self.ipi.send_ipi(target);
        }
        Ok(())
    }

    /// Services all pending vectors on `cpu`, in priority order.
    ///
    /// Each registered handler runs at most once per call, on this CPU,
    /// regardless of how many times its vector was raised since the last
    /// pass. Returns the number of handlers invoked.
    pub fn service_softirqs(&mut self, cpu: CpuId) -> AvzResult<usize> {
        let pending = {
            let ctx = self.percpu.get_mut(cpu)?;
            std::mem::take(&mut ctx.softirq_pending)
        };
        let handlers = self.softirq.handlers();
        let mut invoked = 0;
        for vector in SOFTIRQ_PRIORITY {
            if pending & vector.bit() == 0 {
                continue;
            }
            if let Some(handler) = handlers[vector as usize] {
                handler(self, cpu);
                invoked += 1;
            }
        }
        Ok(invoked)
    }

    /// Returns the pending mask of a CPU. Test and introspection aid.
    pub fn softirq_pending(&self, cpu: CpuId) -> AvzResult<u32> {
        Ok(self.percpu.get(cpu)?.softirq_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_bits_are_distinct() {
        assert_ne!(SoftirqVector::Timer.bit(), SoftirqVector::Schedule.bit());
    }

    #[test]
    fn test_double_registration_fails() {
        fn noop(_: &mut Hypervisor, _: CpuId) {}
        let mut engine = SoftirqEngine::new();
        engine.open(SoftirqVector::Timer, noop).unwrap();
        assert!(matches!(
            engine.open(SoftirqVector::Timer, noop),
            Err(AvzError::InUse(_))
        ));
    }

    #[test]
    fn test_priority_order_is_timer_first() {
        assert_eq!(
            SOFTIRQ_PRIORITY,
            [SoftirqVector::Timer, SoftirqVector::Schedule]
        );
    }
}
