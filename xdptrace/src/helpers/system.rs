//! # System
//!
//! Prerequisites to load and attach eBPF programs, checked before touching
//! the kernel so we can fail early with a meaningful message.

use std::io;

use anyhow::{bail, Result};
use caps::{CapSet, Capability};
use log::{debug, warn};

/// Lift the locked memory limit. Kernels older than 5.11 account eBPF
/// objects against it.
pub(crate) fn bump_memlock_rlimit() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!(
            "Could not lift RLIMIT_MEMLOCK: {}",
            io::Error::last_os_error()
        );
    }

    debug!("RLIMIT_MEMLOCK set to infinity");
    Ok(())
}

/// Check we have the capabilities needed to load and attach programs.
pub(crate) fn check_capabilities() -> Result<()> {
    let has = |cap| caps::has_cap(None, CapSet::Effective, cap);

    // CAP_SYS_ADMIN covers CAP_BPF on kernels predating it.
    if !has(Capability::CAP_BPF)? && !has(Capability::CAP_SYS_ADMIN)? {
        bail!("CAP_BPF (or CAP_SYS_ADMIN) is required to load eBPF programs.");
    }

    if !has(Capability::CAP_NET_ADMIN)? && !has(Capability::CAP_SYS_ADMIN)? {
        warn!("No CAP_NET_ADMIN: attaching the XDP program will likely fail.");
    }

    if !has(Capability::CAP_PERFMON)? && !has(Capability::CAP_SYS_ADMIN)? {
        warn!("No CAP_PERFMON: attaching the tracing programs will likely fail.");
    }

    Ok(())
}
