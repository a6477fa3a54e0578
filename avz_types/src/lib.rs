//! # Core Types for the AVZ Hypervisor
//!
//! This crate defines the fundamental identifier and configuration types
//! shared by every AVZ crate.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: CPUs, domains, VCPUs and event-channel
//!   ports are distinct newtypes that cannot be confused with each other
//!   or with raw integers.
//! - **Bounded namespaces**: domain ids and port numbers come from small,
//!   reusable namespaces; the stable cross-host identity of a domain is a
//!   separate UUID handle.
//! - **Deterministic behavior preserved in simulation**: nothing in this
//!   crate depends on wall-clock time or global state.

pub mod config;
pub mod ids;
pub mod memory;

pub use config::AvzConfig;
pub use ids::{CpuId, DomainHandle, DomainId, EvtchnPort, VcpuId, Virq};
pub use memory::{GuestBuffer, GuestRegion};
