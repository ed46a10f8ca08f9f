//! # Pipeline
//!
//! Drives the whole life of the programs: load the dummy XDP program, resolve
//! its symbol, load the tracers targeting it, attach everything, wait and
//! finally release all kernel resources in reverse acquisition order.

#[cfg(test)]
pub(crate) mod fake;

pub(crate) mod lifecycle;
pub(crate) use lifecycle::*;
pub(crate) mod stack;
