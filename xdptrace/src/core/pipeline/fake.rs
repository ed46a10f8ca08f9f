//! Kernel implementation recording the operations it is asked to perform,
//! without loading anything. Any step can be made to fail.

use std::{
    cell::RefCell,
    os::fd::{AsRawFd, RawFd},
    rc::Rc,
};

use crate::core::{
    bpf::{info::ProgramInfo, CollectionSpec, Hook, Kernel, Resource, XdpMode, DUMMY_PROG},
    errors::{Error, Result},
};

/// File descriptor of the fake dummy program.
pub(crate) const FAKE_FD: RawFd = 42;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Step {
    LoadDummy,
    ProgramInfo,
    LoadCollection,
    AttachXdp,
    AttachFentry,
    AttachFexit,
    Release,
}

pub(crate) struct FakeProgram(pub(crate) RawFd);

impl AsRawFd for FakeProgram {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

pub(crate) struct FakeKernel {
    events: Rc<RefCell<Vec<String>>>,
    fail_at: Option<Step>,
    info: ProgramInfo,
}

impl FakeKernel {
    pub(crate) fn new() -> Self {
        Self {
            events: Rc::new(RefCell::new(Vec::new())),
            fail_at: None,
            info: ProgramInfo::from_funcs(4, Some(1), &[(0, DUMMY_PROG.to_string())]),
        }
    }

    pub(crate) fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub(crate) fn with_info(mut self, info: ProgramInfo) -> Self {
        self.info = info;
        self
    }

    pub(crate) fn events(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.events)
    }

    fn step(&self, step: Step, event: String) -> Result<()> {
        if self.fail_at == Some(step) {
            let reason = "injected failure".to_string();
            return Err(match step {
                Step::AttachXdp => Error::Attach {
                    hook: Hook::Xdp,
                    reason,
                },
                Step::AttachFentry => Error::Attach {
                    hook: Hook::Fentry,
                    reason,
                },
                Step::AttachFexit => Error::Attach {
                    hook: Hook::Fexit,
                    reason,
                },
                _ => Error::Load {
                    what: format!("{step:?}"),
                    reason,
                },
            });
        }

        self.events.borrow_mut().push(event);
        Ok(())
    }
}

impl Kernel for FakeKernel {
    type Program = FakeProgram;
    type Collection = Vec<String>;
    type Link = Hook;

    fn load_program(&mut self, spec: &CollectionSpec, name: &str) -> Result<FakeProgram> {
        assert!(spec.program(name).is_some());
        self.step(Step::LoadDummy, format!("load {name}"))?;
        Ok(FakeProgram(FAKE_FD))
    }

    fn program_info(&self, program: &FakeProgram) -> Result<ProgramInfo> {
        self.step(Step::ProgramInfo, format!("info fd {}", program.0))?;
        Ok(self.info.clone())
    }

    fn load_collection(&mut self, spec: CollectionSpec) -> Result<Vec<String>> {
        let mut targets = spec
            .programs()
            .filter_map(|p| {
                p.attach_target()
                    .map(|t| format!("{}->{}@{}", p.name(), t.symbol, t.prog_fd))
            })
            .collect::<Vec<_>>();
        targets.sort();

        self.step(
            Step::LoadCollection,
            format!("load collection {}", targets.join(" ")),
        )?;
        Ok(spec.programs().map(|p| p.name().to_string()).collect())
    }

    fn attach_xdp(&mut self, program: &mut FakeProgram, _: u32, _: XdpMode) -> Result<Hook> {
        self.step(Step::AttachXdp, format!("attach {} fd {}", Hook::Xdp, program.0))?;
        Ok(Hook::Xdp)
    }

    fn attach_tracing(&mut self, collection: &mut Vec<String>, hook: Hook) -> Result<Hook> {
        assert!(collection.iter().any(|p| p == hook.program()));
        let step = match hook {
            Hook::Xdp => Step::AttachXdp,
            Hook::Fentry => Step::AttachFentry,
            Hook::Fexit => Step::AttachFexit,
        };
        self.step(step, format!("attach {hook}"))?;
        Ok(hook)
    }

    fn release(&mut self, resource: Resource<Self>) -> Result<()> {
        self.events.borrow_mut().push(format!("release {resource}"));
        match self.fail_at {
            Some(Step::Release) => Err(Error::Load {
                what: resource.to_string(),
                reason: "injected failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
