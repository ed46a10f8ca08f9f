//! # Kernel
//!
//! The Kernel trait is the interface used to load and attach programs. It is
//! implemented on top of libbpf-rs by LibbpfKernel; using a trait here allows
//! the attachment sequence to be driven without touching the kernel.

use std::{
    fmt,
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
    str::FromStr,
};

use libbpf_rs::{ProgramAttachType, Xdp, XdpFlags};
use log::debug;

use super::{
    info::ProgramInfo,
    libbpf_log,
    objects::{CollectionSpec, ProgramKind, DUMMY_PROG, FENTRY_PROG, FEXIT_PROG},
};
use crate::core::errors::{Error, Result};

/// Hook points we attach programs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Hook {
    /// The dummy program on the network device.
    Xdp,
    /// The entry of the dummy program.
    Fentry,
    /// The exit of the dummy program.
    Fexit,
}

impl Hook {
    /// Name of the program attached to this hook.
    pub(crate) fn program(&self) -> &'static str {
        match self {
            Hook::Xdp => DUMMY_PROG,
            Hook::Fentry => FENTRY_PROG,
            Hook::Fexit => FEXIT_PROG,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Xdp => write!(f, "XDP hook"),
            Hook::Fentry => write!(f, "fentry tracer"),
            Hook::Fexit => write!(f, "fexit tracer"),
        }
    }
}

/// How the XDP program is attached to the device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum XdpMode {
    /// BPF link; the kernel uses the native mode if the driver supports it,
    /// the generic one otherwise.
    #[default]
    Auto,
    /// Generic (skb) mode, using netlink.
    Generic,
    /// Native driver mode, using netlink.
    Driver,
    /// Hardware offload, using netlink.
    Offload,
}

impl XdpMode {
    /// Netlink flags for the mode, None when a BPF link is used.
    fn flags(&self) -> Option<XdpFlags> {
        match self {
            XdpMode::Auto => None,
            XdpMode::Generic => Some(XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::SKB_MODE),
            XdpMode::Driver => Some(XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::DRV_MODE),
            XdpMode::Offload => Some(XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::HW_MODE),
        }
    }
}

impl FromStr for XdpMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "auto" => XdpMode::Auto,
            "generic" => XdpMode::Generic,
            "driver" => XdpMode::Driver,
            "offload" => XdpMode::Offload,
            x => return Err(Error::Config(format!("unknown XDP mode '{x}'"))),
        })
    }
}

impl fmt::Display for XdpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            XdpMode::Auto => "auto",
            XdpMode::Generic => "generic",
            XdpMode::Driver => "driver",
            XdpMode::Offload => "offload",
        };
        write!(f, "{mode}")
    }
}

/// Kernel resource acquired while setting up the hooks.
pub(crate) enum Resource<K: Kernel> {
    /// The dummy program, loaded on its own.
    Program(K::Program),
    /// All the programs of the collection.
    Collection(K::Collection),
    /// A program attached to a hook.
    Link(Hook, K::Link),
}

impl<K: Kernel> fmt::Display for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Program(_) => write!(f, "{DUMMY_PROG} program"),
            Resource::Collection(_) => write!(f, "program collection"),
            Resource::Link(hook, _) => write!(f, "{hook} link"),
        }
    }
}

/// Operations used to load and attach programs.
pub(crate) trait Kernel: Sized {
    /// A program loaded on its own.
    type Program: AsRawFd;
    /// A set of programs loaded together.
    type Collection;
    /// A program attached to a hook.
    type Link;

    /// Load a single program of the collection, in isolation from the
    /// others.
    fn load_program(&mut self, spec: &CollectionSpec, name: &str) -> Result<Self::Program>;
    /// Retrieve information about a loaded program.
    fn program_info(&self, program: &Self::Program) -> Result<ProgramInfo>;
    /// Load all the programs of the collection in one go. Blueprints can't
    /// be modified afterwards.
    fn load_collection(&mut self, spec: CollectionSpec) -> Result<Self::Collection>;
    /// Attach the XDP program to a network device.
    fn attach_xdp(
        &mut self,
        program: &mut Self::Program,
        ifindex: u32,
        mode: XdpMode,
    ) -> Result<Self::Link>;
    /// Attach a tracing program of the collection to its target.
    fn attach_tracing(&mut self, collection: &mut Self::Collection, hook: Hook)
        -> Result<Self::Link>;
    /// Release a resource. Links must be released before the programs they
    /// use.
    fn release(&mut self, resource: Resource<Self>) -> Result<()>;
}

/// Program loaded on its own, alongside the object owning it.
pub(crate) struct StandaloneProgram {
    name: String,
    fd: RawFd,
    obj: libbpf_rs::Object,
}

impl AsRawFd for StandaloneProgram {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// XDP or tracing program attachment.
pub(crate) enum KernelLink {
    Link(libbpf_rs::Link),
    // Netlink attachments are not tied to a file descriptor and must be
    // removed explicitly.
    Netlink {
        prog_fd: RawFd,
        ifindex: i32,
        flags: XdpFlags,
    },
}

/// Kernel operations backed by libbpf.
pub(crate) struct LibbpfKernel;

impl LibbpfKernel {
    pub(crate) fn new() -> Self {
        libbpf_log::init();
        Self
    }

    fn open(spec: &CollectionSpec, what: &str) -> Result<libbpf_rs::OpenObject> {
        libbpf_rs::ObjectBuilder::default()
            .open_memory(spec.data())
            .map_err(|e| Error::Load {
                what: what.to_string(),
                reason: e.to_string(),
            })
    }

    fn load(open_obj: libbpf_rs::OpenObject, what: &str) -> Result<libbpf_rs::Object> {
        let (obj, output) = libbpf_log::capture(|| open_obj.load());
        obj.map_err(|e| libbpf_log::load_error(what, e, &output))
    }
}

impl Kernel for LibbpfKernel {
    type Program = StandaloneProgram;
    type Collection = libbpf_rs::Object;
    type Link = KernelLink;

    fn load_program(&mut self, spec: &CollectionSpec, name: &str) -> Result<StandaloneProgram> {
        let mut open_obj = Self::open(spec, name)?;

        let mut found = false;
        for mut prog in open_obj.progs_mut() {
            if prog.name() == name {
                found = true;
            } else {
                prog.set_autoload(false);
            }
        }
        if !found {
            return Err(Error::Load {
                what: name.to_string(),
                reason: "no such program in the collection".to_string(),
            });
        }

        let obj = Self::load(open_obj, name)?;
        let fd = obj
            .progs()
            .find(|p| p.name() == name)
            .map(|p| p.as_fd().as_raw_fd())
            .ok_or_else(|| Error::Load {
                what: name.to_string(),
                reason: "program not found after load".to_string(),
            })?;

        debug!("Loaded program {name} (fd {fd})");
        Ok(StandaloneProgram {
            name: name.to_string(),
            fd,
            obj,
        })
    }

    fn program_info(&self, program: &StandaloneProgram) -> Result<ProgramInfo> {
        ProgramInfo::query(&program.name, program.fd)
    }

    fn load_collection(&mut self, spec: CollectionSpec) -> Result<libbpf_rs::Object> {
        let what = "program collection";
        let mut open_obj = Self::open(&spec, what)?;

        for mut prog in open_obj.progs_mut() {
            let name = prog.name().to_string_lossy().into_owned();
            let Some(blueprint) = spec.program(&name) else {
                continue;
            };

            match blueprint.kind() {
                ProgramKind::Fentry => prog.set_attach_type(ProgramAttachType::TraceFentry),
                ProgramKind::Fexit => prog.set_attach_type(ProgramAttachType::TraceFexit),
                _ => (),
            }

            if let Some(target) = blueprint.attach_target() {
                debug!(
                    "Program {name} ({}, {} insns) targets {} (fd {})",
                    blueprint.section(),
                    blueprint.insn_cnt(),
                    target.symbol,
                    target.prog_fd
                );
                prog.set_attach_target(target.prog_fd, Some(target.symbol.clone()))
                    .map_err(|e| Error::Load {
                        what: name.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }

        Self::load(open_obj, what)
    }

    fn attach_xdp(
        &mut self,
        program: &mut StandaloneProgram,
        ifindex: u32,
        mode: XdpMode,
    ) -> Result<KernelLink> {
        let attach_err = |reason: String| Error::Attach {
            hook: Hook::Xdp,
            reason,
        };
        let ifindex = i32::try_from(ifindex).map_err(|e| attach_err(e.to_string()))?;

        match mode.flags() {
            None => {
                let prog = program
                    .obj
                    .progs_mut()
                    .find(|p| p.name() == program.name.as_str())
                    .ok_or_else(|| attach_err(format!("no program {}", program.name)))?;
                let link = prog
                    .attach_xdp(ifindex)
                    .map_err(|e| attach_err(e.to_string()))?;
                Ok(KernelLink::Link(link))
            }
            Some(flags) => {
                // Safety: the fd is owned by the program object, which
                // outlives this call.
                let fd = unsafe { BorrowedFd::borrow_raw(program.fd) };
                Xdp::new(fd)
                    .attach(ifindex, libbpf_rs::XdpFlags::from_bits_retain(flags.bits()))
                    .map_err(|e| attach_err(e.to_string()))?;
                Ok(KernelLink::Netlink {
                    prog_fd: program.fd,
                    ifindex,
                    flags,
                })
            }
        }
    }

    fn attach_tracing(
        &mut self,
        collection: &mut libbpf_rs::Object,
        hook: Hook,
    ) -> Result<KernelLink> {
        let prog = collection
            .progs_mut()
            .find(|p| p.name() == hook.program())
            .ok_or_else(|| Error::Attach {
                hook,
                reason: format!("no program {}", hook.program()),
            })?;

        prog.attach_trace()
            .map(KernelLink::Link)
            .map_err(|e| Error::Attach {
                hook,
                reason: e.to_string(),
            })
    }

    fn release(&mut self, resource: Resource<Self>) -> Result<()> {
        if let Resource::Link(
            hook,
            KernelLink::Netlink {
                prog_fd,
                ifindex,
                flags,
            },
        ) = resource
        {
            // Safety: links are released before the program they use, so
            // the fd is still valid.
            let fd = unsafe { BorrowedFd::borrow_raw(prog_fd) };
            return Xdp::new(fd)
                .detach(ifindex, flags.difference(XdpFlags::UPDATE_IF_NOEXIST))
                .map_err(|e| Error::Attach {
                    hook,
                    reason: format!("detach failed: {e}"),
                });
        }

        // Dropping links, programs and objects closes them.
        drop(resource);
        Ok(())
    }
}
