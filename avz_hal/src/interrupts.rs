//! IRQ controller abstraction

use avz_types::CpuId;

/// Inter-processor interrupt and IRQ affinity operations.
///
/// Different platforms have different interrupt controllers, but the
/// hypervisor core only needs these two operations: kicking another CPU
/// and steering a physical IRQ line.
pub trait IpiController {
    /// Sends an inter-processor interrupt to `cpu`.
    ///
    /// Used to prompt another CPU to service its pending softirqs, and to
    /// wake an idle CPU after a cross-CPU wakeup.
    fn send_ipi(&mut self, cpu: CpuId);

    /// Routes a physical IRQ line to `cpu`.
    fn set_affinity(&mut self, irq: u32, cpu: CpuId);
}
