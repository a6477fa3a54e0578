//! Time subsystem
//!
//! One monotonic system clock derived from a hardware tick counter, plus
//! a settable wall-clock anchor. System time never goes backwards: a
//! tick-rate recalibration folds the time accumulated at the old rate
//! into the base before switching, and wall-clock adjustments move only
//! the anchor, never the monotonic stream.
//!
//! Guests never read the clock through a hypercall. The hypervisor
//! pushes time into each domain's shared pages (wall clock in the
//! `shared_info` regions, per-VCPU system time in `vcpu_info`) and the
//! guest reads it from there.

use crate::domain::VcpuState;
use crate::softirq::SoftirqVector;
use crate::Hypervisor;
use avz_abi::{AvzResult, VcpuTimeInfo, WallClock};
use avz_hal::TickSource;
use avz_types::{CpuId, DomainId, Virq};

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// The monotonic system clock.
#[derive(Debug)]
pub struct SystemClock {
    /// Ticks observed so far.
    ticks: u64,
    /// System nanoseconds accumulated before `base_ticks`.
    base_nanos: u64,
    /// Tick count at which the current rate took effect.
    base_ticks: u64,
    nanos_per_tick: u64,
    /// Wall-clock anchor and the system time it was set at.
    wall_base: WallClock,
    wall_base_system_nanos: u64,
}

impl SystemClock {
    /// Creates a clock at system time zero running at `frequency_hz`.
    pub fn new(frequency_hz: u64) -> Self {
        let hz = frequency_hz.max(1);
        Self {
            ticks: 0,
            base_nanos: 0,
            base_ticks: 0,
            nanos_per_tick: NANOS_PER_SEC / hz,
            wall_base: WallClock { sec: 0, nsec: 0 },
            wall_base_system_nanos: 0,
        }
    }

    /// Current monotonic system time in nanoseconds.
    pub fn now_nanos(&self) -> u64 {
        self.base_nanos + (self.ticks - self.base_ticks) * self.nanos_per_tick
    }

    /// Advances the tick counter.
    pub fn advance_ticks(&mut self, ticks: u64) {
        self.ticks += ticks;
    }

    /// Sets the observed tick count to an absolute value; ignored if the
    /// counter would move backwards.
    pub fn observe_ticks(&mut self, ticks: u64) {
        if ticks > self.ticks {
            self.ticks = ticks;
        }
    }

    /// Recalibrates the tick rate. Time accumulated at the old rate is
    /// folded into the base so `now_nanos` never steps back.
    pub fn set_rate(&mut self, frequency_hz: u64) {
        let hz = frequency_hz.max(1);
        self.base_nanos = self.now_nanos();
        self.base_ticks = self.ticks;
        self.nanos_per_tick = NANOS_PER_SEC / hz;
    }

    /// Moves the wall-clock anchor to `wall` as of now.
    pub fn set_wall_clock(&mut self, wall: WallClock) {
        self.wall_base = wall;
        self.wall_base_system_nanos = self.now_nanos();
    }

    /// Wall-clock time at a given system time.
    pub fn wall_clock_at(&self, system_nanos: u64) -> WallClock {
        let elapsed = system_nanos.saturating_sub(self.wall_base_system_nanos);
        let total_nsec = self.wall_base.nsec as u64 + elapsed % NANOS_PER_SEC;
        WallClock {
            sec: self.wall_base.sec + elapsed / NANOS_PER_SEC + total_nsec / NANOS_PER_SEC,
            nsec: (total_nsec % NANOS_PER_SEC) as u32,
        }
    }

    /// Current wall-clock time.
    pub fn wall_clock(&self) -> WallClock {
        self.wall_clock_at(self.now_nanos())
    }
}

impl Hypervisor {
    /// Current monotonic system time in nanoseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Current wall-clock time.
    pub fn wall_clock(&self) -> WallClock {
        self.clock.wall_clock()
    }

    /// Moves the wall-clock anchor. Monotonic time is unaffected.
    pub fn set_wall_clock(&mut self, wall: WallClock) {
        self.clock.set_wall_clock(wall);
    }

    /// Recalibrates the clock rate without stepping time backwards.
    pub fn set_clock_rate(&mut self, frequency_hz: u64) {
        self.clock.set_rate(frequency_hz);
    }

    /// Advances time by `ticks` as observed on `cpu` and raises the
    /// timer softirq there for deferred tick processing.
    pub fn advance_time(&mut self, cpu: CpuId, ticks: u64) -> AvzResult<()> {
        self.clock.advance_ticks(ticks);
        self.raise_softirq(cpu, cpu, SoftirqVector::Timer)
    }

    /// Syncs the clock with a hardware tick source.
    pub fn sync_with(&mut self, source: &dyn TickSource) {
        self.clock.observe_ticks(source.poll_ticks());
        self.clock.set_rate(source.frequency_hz());
    }

    /// Pushes current time into every region of a domain's shared pages
    /// and into each VCPU's `vcpu_info`, applying the domain's virtual
    /// time offset.
    pub fn publish_time(&mut self, domain: DomainId) -> AvzResult<()> {
        let system = self.clock.now_nanos();
        let wall = self.clock.wall_clock_at(system);
        let d = self.registry.domain_mut(domain)?;
        let offset = d.virtual_time_offset_nanos();
        let virtual_nanos = if offset >= 0 {
            system.saturating_add(offset as u64)
        } else {
            system.saturating_sub(offset.unsigned_abs())
        };
        d.shared_mut().hypervisor().publish_time(wall, virtual_nanos);
        let time = VcpuTimeInfo {
            system_time_nanos: virtual_nanos,
        };
        for vcpu in d.vcpus_mut() {
            vcpu.info_mut().hypervisor().write_time(time);
        }
        Ok(())
    }

    /// Delivers a timer event to the domain whose VCPU `cpu` is running:
    /// refreshes its published time and raises its `Timer` virq.
    pub(crate) fn deliver_timer_event(&mut self, cpu: CpuId) -> AvzResult<()> {
        let current = self.percpu.get(cpu)?.current_vcpu;
        let Some(vcpu) = current else {
            return Ok(());
        };
        self.publish_time(vcpu.domain)?;
        self.raise_virq(cpu, vcpu.domain, Virq::Timer)
    }
}

/// The timer softirq handler; registered at boot.
pub(crate) fn timer_softirq(hv: &mut Hypervisor, cpu: CpuId) {
    let _ = hv.deliver_timer_event(cpu);
    // A timer tick is also a preemption point for the running VCPU.
    let running = hv
        .current_vcpu(cpu)
        .ok()
        .flatten()
        .and_then(|vcpu| hv.registry().domain(vcpu.domain).ok().map(|d| (d, vcpu)))
        .and_then(|(d, vcpu)| d.vcpu(vcpu.index).ok().map(|v| v.state()))
        == Some(VcpuState::Running);
    if running {
        let _ = hv.raise_softirq(cpu, cpu, SoftirqVector::Schedule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_tracks_ticks_at_rate() {
        let mut clock = SystemClock::new(1_000); // 1ms per tick
        clock.advance_ticks(5);
        assert_eq!(clock.now_nanos(), 5_000_000);
    }

    #[test]
    fn test_rate_change_never_steps_back() {
        let mut clock = SystemClock::new(1_000);
        clock.advance_ticks(10);
        let before = clock.now_nanos();
        clock.set_rate(1_000_000); // 1us per tick
        assert_eq!(clock.now_nanos(), before);
        clock.advance_ticks(3);
        assert_eq!(clock.now_nanos(), before + 3_000);
    }

    #[test]
    fn test_observe_ticks_is_monotonic() {
        let mut clock = SystemClock::new(1_000);
        clock.observe_ticks(100);
        clock.observe_ticks(50); // stale reading, ignored
        assert_eq!(clock.now_nanos(), 100_000_000);
    }

    #[test]
    fn test_wall_clock_follows_anchor() {
        let mut clock = SystemClock::new(1_000);
        clock.advance_ticks(1_000); // 1s
        clock.set_wall_clock(WallClock {
            sec: 1_000_000,
            nsec: 500_000_000,
        });
        clock.advance_ticks(700); // +0.7s
        let wall = clock.wall_clock();
        assert_eq!(wall.sec, 1_000_001);
        assert_eq!(wall.nsec, 200_000_000);
    }

    #[test]
    fn test_wall_clock_set_does_not_move_system_time() {
        let mut clock = SystemClock::new(1_000);
        clock.advance_ticks(42);
        let before = clock.now_nanos();
        clock.set_wall_clock(WallClock { sec: 7, nsec: 0 });
        assert_eq!(clock.now_nanos(), before);
    }
}
