//! # Hardware Abstraction Layer for AVZ
//!
//! This crate defines the hardware traits the hypervisor core consumes.
//!
//! ## Philosophy
//!
//! **Architecture must be fully abstracted and swappable.**
//!
//! The control plane never touches hardware directly: diagnostic output,
//! inter-processor interrupts, page remapping and tick sources all go
//! through these traits. Simulated implementations live next to the
//! hypervisor core and make the whole control plane testable under
//! `cargo test`.

pub mod console;
pub mod interrupts;
pub mod memory;
pub mod timer;

pub use console::ConsoleDevice;
pub use interrupts::IpiController;
pub use memory::{RemapError, RemapService};
pub use timer::TickSource;
