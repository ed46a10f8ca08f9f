//! # BPF
//!
//! Handling of the embedded eBPF object: parsing its programs, loading them
//! and attaching them to their hooks.

pub(crate) mod info;
pub(crate) mod kernel;
pub(crate) use kernel::*;
pub(crate) mod libbpf_log;
pub(crate) mod objects;
pub(crate) use objects::*;
