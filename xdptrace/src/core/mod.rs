//! # Core
//!
//! Loading, attaching and releasing the XDP program and its tracers.

pub(crate) mod bpf;
pub(crate) mod errors;
pub(crate) mod pipeline;
pub(crate) mod symbol;
