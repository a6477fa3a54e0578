//! Hypervisor error taxonomy

use thiserror::Error;

/// Result alias used across the hypervisor.
pub type AvzResult<T> = Result<T, AvzError>;

/// Errors that cross the hypercall boundary or surface internally.
///
/// Every guest-triggered error is returned to the caller as a negative
/// result code and is never fatal to the hypervisor. Only
/// `InvariantViolation` is fatal, and then only to the scheduling loop of
/// the affected core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AvzError {
    /// Unknown or malformed hypercall number.
    #[error("unknown hypercall number {0}")]
    InvalidHypercall(u32),

    /// A bounds, alignment or ownership check failed on an argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free domain id, VCPU slot or event-channel port.
    #[error("resource exhausted: {0}")]
    Exhausted(String),

    /// The target slot or port is already occupied.
    #[error("already in use: {0}")]
    InUse(String),

    /// The event channel is not in a state that permits the operation.
    #[error("channel not bound: {0}")]
    NotBound(String),

    /// A secondary CPU failed its bring-up handshake.
    #[error("hardware fault: {0}")]
    HardwareFault(String),

    /// Internal state corruption. Fatal to the affected core.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl AvzError {
    /// Maps the error to its hypercall result code.
    ///
    /// Codes are part of the ABI and pinned by contract tests.
    pub fn result_code(&self) -> i64 {
        match self {
            AvzError::InvalidHypercall(_) => -1,
            AvzError::InvalidArgument(_) => -2,
            AvzError::Exhausted(_) => -3,
            AvzError::InUse(_) => -4,
            AvzError::NotBound(_) => -5,
            AvzError::HardwareFault(_) => -6,
            AvzError::InvariantViolation(_) => -7,
        }
    }

    /// Returns whether the error may be reported to a guest and recovered
    /// from, as opposed to halting the affected core.
    pub fn is_guest_reportable(&self) -> bool {
        !matches!(self, AvzError::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes_are_negative_and_distinct() {
        let errors = [
            AvzError::InvalidHypercall(99),
            AvzError::InvalidArgument("x".into()),
            AvzError::Exhausted("x".into()),
            AvzError::InUse("x".into()),
            AvzError::NotBound("x".into()),
            AvzError::HardwareFault("x".into()),
            AvzError::InvariantViolation("x".into()),
        ];
        let mut codes: Vec<i64> = errors.iter().map(|e| e.result_code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(AvzError::Exhausted("domains".into()).is_guest_reportable());
        assert!(!AvzError::InvariantViolation("stuck vcpu".into()).is_guest_reportable());
    }
}
