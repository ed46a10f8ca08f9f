//! # Program collection
//!
//! The eBPF object embedded in the binary holds the three programs we use: an
//! XDP program doing nothing (`dummy`) and two tracing programs attached to
//! its entry and exit. Its content is parsed here, without interacting with
//! the kernel, into a set of program blueprints which can be modified before
//! being loaded.

use std::{fmt, os::fd::RawFd};

use crate::core::errors::{Error, Result};

/// The embedded eBPF object, built from src/bpf/xdp.bpf.c.
pub(crate) static XDP_OBJ: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/xdp.bpf.o"));

pub(crate) const DUMMY_PROG: &str = "dummy";
pub(crate) const FENTRY_PROG: &str = "fentry_xdp";
pub(crate) const FEXIT_PROG: &str = "fexit_xdp";

/// Program kind, as declared by its ELF section.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ProgramKind {
    Xdp,
    Fentry,
    Fexit,
    Other,
}

impl ProgramKind {
    pub(crate) fn from_section(section: &str) -> Self {
        let prefix = section.split_once('/').map(|(p, _)| p).unwrap_or(section);
        match prefix {
            "xdp" | "xdp.frags" => ProgramKind::Xdp,
            "fentry" => ProgramKind::Fentry,
            "fexit" => ProgramKind::Fexit,
            _ => ProgramKind::Other,
        }
    }

    pub(crate) fn is_tracing(&self) -> bool {
        matches!(self, ProgramKind::Fentry | ProgramKind::Fexit)
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ProgramKind::Xdp => "xdp",
            ProgramKind::Fentry => "fentry",
            ProgramKind::Fexit => "fexit",
            ProgramKind::Other => "other",
        };
        write!(f, "{kind}")
    }
}

/// Attach target of a tracing program: a loaded program and the name of one
/// of its functions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AttachTarget {
    pub(crate) prog_fd: RawFd,
    pub(crate) symbol: String,
}

/// Description of a program found in the collection, not loaded yet.
#[derive(Clone, Debug)]
pub(crate) struct ProgramBlueprint {
    name: String,
    section: String,
    kind: ProgramKind,
    insn_cnt: usize,
    attach_target: Option<AttachTarget>,
}

impl ProgramBlueprint {
    pub(crate) fn new(name: &str, section: &str, insn_cnt: usize) -> Self {
        Self {
            name: name.to_string(),
            section: section.to_string(),
            kind: ProgramKind::from_section(section),
            insn_cnt,
            attach_target: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn section(&self) -> &str {
        &self.section
    }

    pub(crate) fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub(crate) fn insn_cnt(&self) -> usize {
        self.insn_cnt
    }

    pub(crate) fn attach_target(&self) -> Option<&AttachTarget> {
        self.attach_target.as_ref()
    }

    /// Set the program and function a tracing program will be attached to.
    /// The target can only be set once.
    pub(crate) fn set_attach_target(&mut self, prog_fd: RawFd, symbol: &str) -> Result<()> {
        if !self.kind.is_tracing() {
            return Err(Error::SpecLoad(format!(
                "program {} ({}) can't have an attach target",
                self.name, self.kind
            )));
        }
        if self.attach_target.is_some() {
            return Err(Error::TargetAlreadySet(self.name.clone()));
        }

        self.attach_target = Some(AttachTarget {
            prog_fd,
            symbol: symbol.to_string(),
        });
        Ok(())
    }
}

/// Set of program blueprints backed by an eBPF object. Loading it consumes
/// it, so blueprints can't be modified after the collection was loaded.
#[derive(Debug)]
pub(crate) struct CollectionSpec {
    data: &'static [u8],
    programs: Vec<ProgramBlueprint>,
}

impl CollectionSpec {
    /// Parse an eBPF object. No program is loaded.
    pub(crate) fn from_bytes(data: &'static [u8]) -> Result<Self> {
        let open_obj = libbpf_rs::ObjectBuilder::default()
            .open_memory(data)
            .map_err(|e| Error::SpecLoad(e.to_string()))?;

        let programs = open_obj
            .progs()
            .map(|p| {
                ProgramBlueprint::new(
                    &p.name().to_string_lossy(),
                    &p.section().to_string_lossy(),
                    p.insn_cnt(),
                )
            })
            .collect();

        Self::from_blueprints(data, programs)
    }

    /// Build a collection out of already parsed blueprints, checking all
    /// the programs we need are there and are of the expected kind.
    pub(crate) fn from_blueprints(
        data: &'static [u8],
        programs: Vec<ProgramBlueprint>,
    ) -> Result<Self> {
        for (name, kind) in [
            (DUMMY_PROG, ProgramKind::Xdp),
            (FENTRY_PROG, ProgramKind::Fentry),
            (FEXIT_PROG, ProgramKind::Fexit),
        ] {
            match programs.iter().find(|p| p.name == name) {
                None => return Err(Error::SpecLoad(format!("missing program {name}"))),
                Some(p) if p.kind != kind => {
                    return Err(Error::SpecLoad(format!(
                        "program {name} is of kind {} (expected {kind})",
                        p.kind
                    )))
                }
                Some(p) if p.insn_cnt == 0 => {
                    return Err(Error::SpecLoad(format!("program {name} is empty")))
                }
                _ => (),
            }
        }

        Ok(Self { data, programs })
    }

    /// Raw eBPF object.
    pub(crate) fn data(&self) -> &'static [u8] {
        self.data
    }

    pub(crate) fn programs(&self) -> impl Iterator<Item = &ProgramBlueprint> {
        self.programs.iter()
    }

    pub(crate) fn program(&self, name: &str) -> Option<&ProgramBlueprint> {
        self.programs.iter().find(|p| p.name == name)
    }

    pub(crate) fn program_mut(&mut self, name: &str) -> Result<&mut ProgramBlueprint> {
        self.programs
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::SpecLoad(format!("missing program {name}")))
    }
}
