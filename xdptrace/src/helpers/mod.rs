//! # Helpers
//!
//! Process-wide helpers: logging, signal handling, network devices and system
//! prerequisites.

pub(crate) mod logger;
pub(crate) mod net;
pub(crate) mod signals;
pub(crate) mod system;
