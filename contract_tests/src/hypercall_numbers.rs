//! Hypercall number and register-encoding contract tests
//!
//! These tests pin the trap-frame encoding: the hypercall numbers, the
//! sub-command selectors and the register layout of each call. A guest
//! kernel hard-codes all of these.
