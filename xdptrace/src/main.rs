use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

mod cli;
mod core;
mod helpers;

use crate::{
    cli::{Config, XdpTraceCli},
    core::{
        bpf::{LibbpfKernel, XDP_OBJ},
        errors::PipelineError,
        pipeline::Pipeline,
    },
    helpers::{
        logger::Logger,
        signals::{Running, Termination},
        system,
    },
};

fn main() -> ExitCode {
    let cli = XdpTraceCli::parse();

    // The logger isn't set up yet, errors go to stderr directly.
    let config = match Config::from_env(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = Logger::init(config.log_level) {
        eprintln!("Error: could not set up the logger: {e}");
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(Termination::Signal(_)) => ExitCode::SUCCESS,
        Ok(reason @ Termination::Failure(_)) => {
            error!("{reason}");
            ExitCode::FAILURE
        }
        Err(e) => {
            match e
                .downcast_ref::<PipelineError>()
                .and_then(|e| e.source.verifier_log())
            {
                Some(log) => error!("{e}\nVerifier log:\n{log}"),
                None => error!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<Termination> {
    system::bump_memlock_rlimit()?;
    system::check_capabilities()?;

    // Handle signals early, so an interruption during the setup still goes
    // through the release of what was acquired.
    let running = Running::new()?;

    info!("Setting up {} ({} XDP mode)", config.device, config.xdp_mode);
    let termination =
        Pipeline::new(LibbpfKernel::new(), config.pipeline()).execute(XDP_OBJ, &running)?;
    if let Termination::Signal(_) = termination {
        info!("Terminated ({termination}), all programs detached");
    }
    Ok(termination)
}
