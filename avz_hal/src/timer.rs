//! Timer tick source abstraction

/// A monotonic tick counter.
///
/// Real implementations read a hardware counter; the simulated one only
/// advances when explicitly told to, which keeps tests deterministic.
pub trait TickSource {
    /// Returns the current tick count.
    fn poll_ticks(&self) -> u64;

    /// Returns the nominal tick frequency in Hz.
    fn frequency_hz(&self) -> u64;
}
