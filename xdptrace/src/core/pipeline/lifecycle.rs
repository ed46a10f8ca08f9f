//! # Lifecycle
//!
//! Stages of the attachment sequence and the states the pipeline goes
//! through, from the first load to the last release.

use std::os::fd::AsRawFd;

use log::{debug, info, warn};

use super::stack::ResourceStack;
use crate::{
    core::{
        bpf::{
            CollectionSpec, Hook, Kernel, Resource, XdpMode, DUMMY_PROG, FENTRY_PROG, FEXIT_PROG,
        },
        errors::{Error, PipelineError, Result, Stage},
        symbol::resolve_symbol,
    },
    helpers::{
        net::interface_index,
        signals::{Running, Termination},
    },
};

/// Lifecycle states. Transitions only go forward:
/// Starting -> Running -> ShuttingDown -> Stopped, Running being skipped when
/// the setup fails.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Debug)]
pub(crate) struct PipelineConfig {
    /// Network device the dummy program is attached to.
    pub(crate) device: String,
    pub(crate) xdp_mode: XdpMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: "lo".to_string(),
            xdp_mode: XdpMode::default(),
        }
    }
}

// Tag an error with the stage it happened at.
fn at<T>(stage: Stage, res: Result<T>) -> std::result::Result<T, PipelineError> {
    res.map_err(|source| PipelineError { stage, source })
}

pub(crate) struct Pipeline<K: Kernel> {
    kernel: K,
    config: PipelineConfig,
    stack: ResourceStack<K>,
    state: State,
}

impl<K: Kernel> Pipeline<K> {
    pub(crate) fn new(kernel: K, config: PipelineConfig) -> Self {
        Self {
            kernel,
            config,
            stack: ResourceStack::new(),
            state: State::Starting,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Number of programs currently attached.
    pub(crate) fn links(&self) -> usize {
        self.stack.links()
    }

    /// Set everything up, wait for a termination request and release all
    /// resources. Resources are released whatever the outcome of the setup.
    pub(crate) fn execute(
        mut self,
        object: &'static [u8],
        running: &Running,
    ) -> std::result::Result<Termination, PipelineError> {
        let ret = self.setup(object).map(|_| self.run(running));

        match (self.shutdown(), ret) {
            (0, ret) => ret,
            (failed, Ok(_)) => Ok(Termination::Failure(format!(
                "{failed} resource(s) could not be released, programs may still be attached"
            ))),
            // The setup error is the one to report.
            (_, Err(e)) => Err(e),
        }
    }

    /// Load and attach all programs. On error the resources acquired so far
    /// are kept, until `shutdown()` is called or the pipeline is dropped.
    pub(crate) fn setup(
        &mut self,
        object: &'static [u8],
    ) -> std::result::Result<(), PipelineError> {
        let ifindex = at(Stage::ResolveInterface, interface_index(&self.config.device))?;
        debug!("Interface {} has index {ifindex}", self.config.device);

        let mut spec = at(Stage::LoadSpec, CollectionSpec::from_bytes(object))?;
        spec.programs()
            .for_each(|p| debug!("Found program {} ({})", p.name(), p.kind()));

        let dummy = at(
            Stage::LoadDummy,
            self.kernel.load_program(&spec, DUMMY_PROG),
        )?;
        let dummy_fd = dummy.as_raw_fd();
        self.stack.push(Resource::Program(dummy));

        let symbol = at(Stage::ResolveSymbol, self.dummy_symbol())?;
        debug!("Program {DUMMY_PROG} runs function {symbol}");

        // Both tracers must target the dummy program before the collection
        // is loaded; blueprints are consumed by the load.
        for name in [FENTRY_PROG, FEXIT_PROG] {
            at(
                Stage::LoadCollection,
                spec.program_mut(name)
                    .and_then(|p| p.set_attach_target(dummy_fd, &symbol)),
            )?;
        }
        let collection = at(Stage::LoadCollection, self.kernel.load_collection(spec))?;
        self.stack.push(Resource::Collection(collection));

        self.attach_xdp(ifindex)?;
        self.attach_tracing(Hook::Fentry, Stage::AttachFentry)?;
        self.attach_tracing(Hook::Fexit, Stage::AttachFexit)?;

        debug!(
            "Attached {DUMMY_PROG} to {} and tracers to {symbol}",
            self.config.device
        );
        Ok(())
    }

    fn dummy_symbol(&self) -> Result<String> {
        let program = self.stack.program().ok_or_else(|| Error::Load {
            what: DUMMY_PROG.to_string(),
            reason: "program is not loaded".to_string(),
        })?;
        let info = self.kernel.program_info(program)?;
        resolve_symbol(DUMMY_PROG, &info)
    }

    fn attach_xdp(&mut self, ifindex: u32) -> std::result::Result<(), PipelineError> {
        let program = at(
            Stage::AttachXdp,
            self.stack.program_mut().ok_or_else(|| Error::Attach {
                hook: Hook::Xdp,
                reason: format!("{DUMMY_PROG} is not loaded"),
            }),
        )?;
        let link = at(
            Stage::AttachXdp,
            self.kernel
                .attach_xdp(program, ifindex, self.config.xdp_mode),
        )?;
        self.stack.push(Resource::Link(Hook::Xdp, link));
        Ok(())
    }

    fn attach_tracing(
        &mut self,
        hook: Hook,
        stage: Stage,
    ) -> std::result::Result<(), PipelineError> {
        let collection = at(
            stage,
            self.stack.collection_mut().ok_or_else(|| Error::Attach {
                hook,
                reason: "program collection is not loaded".to_string(),
            }),
        )?;
        let link = at(stage, self.kernel.attach_tracing(collection, hook))?;
        self.stack.push(Resource::Link(hook, link));
        Ok(())
    }

    /// Wait for a termination request. Only valid once all programs are
    /// attached.
    pub(crate) fn run(&mut self, running: &Running) -> Termination {
        if self.state != State::Starting || self.links() != 3 {
            return Termination::Failure(format!(
                "can't run with {} attached program(s) from state {:?}",
                self.links(),
                self.state
            ));
        }

        self.state = State::Running;
        info!(
            "Programs attached, send packets to {} and read /sys/kernel/debug/tracing/trace_pipe",
            self.config.device
        );

        running.wait()
    }

    /// Release all resources, in reverse acquisition order. Can be called
    /// multiple times. Returns the number of resources which could not be
    /// released.
    pub(crate) fn shutdown(&mut self) -> usize {
        if self.state == State::Stopped {
            return 0;
        }

        self.state = State::ShuttingDown;
        if !self.stack.is_empty() {
            debug!("Releasing {} resource(s)", self.stack.len());
        }

        let failed = self.stack.unwind(&mut self.kernel);
        if failed > 0 {
            warn!("{failed} resource(s) could not be released cleanly");
        }
        self.state = State::Stopped;
        failed
    }
}

impl<K: Kernel> Drop for Pipeline<K> {
    fn drop(&mut self) {
        // Failures were already logged.
        let _ = self.shutdown();
    }
}
