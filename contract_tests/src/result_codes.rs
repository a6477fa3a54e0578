//! Result-code contract tests
//!
//! Guests see every failure as a small negative integer in the return
//! register. The code assignments are ABI and can never be renumbered.
