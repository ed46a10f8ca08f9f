//! # Errors
//!
//! Errors reported while setting up the XDP hook and its tracers. All of them
//! are fatal: nothing is retried once the kernel has rejected a step.

use std::fmt;

use super::bpf::Hook;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("interface {0} not found")]
    InterfaceNotFound(String),
    #[error("could not resolve interface {name}: {reason}")]
    Interface { name: String, reason: String },
    #[error("invalid program collection: {0}")]
    SpecLoad(String),
    #[error("verifier rejected program {program}: {reason}")]
    Verifier {
        program: String,
        reason: String,
        log: String,
    },
    #[error("could not load {what}: {reason}")]
    Load { what: String, reason: String },
    #[error("program {0} does not have a BTF id")]
    MissingDebugInfo(String),
    #[error("no symbol found in program {0}")]
    SymbolNotFound(String),
    #[error("could not attach {hook}: {reason}")]
    Attach { hook: Hook, reason: String },
    #[error("attach target of program {0} is already set")]
    TargetAlreadySet(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Verifier log of the rejected program, if the kernel verifier is the
    /// one which failed the load.
    pub(crate) fn verifier_log(&self) -> Option<&str> {
        match self {
            Error::Verifier { log, .. } if !log.is_empty() => Some(log.as_str()),
            _ => None,
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Setup stages, in execution order. Used to report where the setup failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Stage {
    ResolveInterface,
    LoadSpec,
    LoadDummy,
    ResolveSymbol,
    LoadCollection,
    AttachXdp,
    AttachFentry,
    AttachFexit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Stage::*;
        let stage = match self {
            ResolveInterface => "interface resolution",
            LoadSpec => "program collection parsing",
            LoadDummy => "dummy program load",
            ResolveSymbol => "dummy symbol resolution",
            LoadCollection => "program collection load",
            AttachXdp => "XDP attachment",
            AttachFentry => "fentry attachment",
            AttachFexit => "fexit attachment",
        };
        write!(f, "{stage}")
    }
}

/// Error annotated with the setup stage it happened at.
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub(crate) struct PipelineError {
    pub(crate) stage: Stage,
    #[source]
    pub(crate) source: Error,
}
