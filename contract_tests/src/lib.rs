//! # ABI Contract Tests
//!
//! This crate provides "golden" tests for the guest-visible ABI to
//! ensure it doesn't drift accidentally over time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: the ABI contract is written as code
//! - **Testability first**: contract tests fail when the surface changes
//! - **Mechanism not policy**: define what must be stable, not how to use it
//!
//! ## Structure
//!
//! Each piece of the ABI has a module with contract tests that verify:
//! - Hypercall numbers and register encodings
//! - Result codes handed back to guests
//! - Payload wire shapes
//! - Shared status-page behavior
//!
//! A hypervisor and a guest kernel built against the same major ABI
//! version must interoperate; these tests are the definition of what
//! that means.

pub mod hypercall_numbers;
pub mod payloads;
pub mod result_codes;
pub mod shared_page;

/// Common helpers for contract validation
pub mod test_helpers {
    use avz_abi::AbiPayload;
    use serde::Serialize;

    /// Serializes a payload and returns its JSON text for golden
    /// comparison.
    pub fn payload_json<T: Serialize>(value: &T) -> String {
        let payload = AbiPayload::new(value).expect("payload failed to serialize");
        String::from_utf8(payload.as_bytes().to_vec()).expect("payload is not utf-8")
    }
}
