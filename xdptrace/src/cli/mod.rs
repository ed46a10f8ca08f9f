//! # Cli

#[allow(clippy::module_inception)]
pub(crate) mod cli;
pub(crate) use cli::*;
