//! # Resource stack
//!
//! Resources are pushed in the order they are acquired and released in the
//! exact reverse order: links go away before the programs they use, and the
//! tracers before the XDP hook they trace.

use log::{debug, warn};

use crate::core::bpf::{Kernel, Resource};

pub(crate) struct ResourceStack<K: Kernel> {
    resources: Vec<Resource<K>>,
}

impl<K: Kernel> ResourceStack<K> {
    pub(crate) fn new() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, resource: Resource<K>) {
        debug!("Acquired {resource}");
        self.resources.push(resource);
    }

    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of programs attached to a hook.
    pub(crate) fn links(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| matches!(r, Resource::Link(..)))
            .count()
    }

    /// The program loaded on its own, if any.
    pub(crate) fn program(&self) -> Option<&K::Program> {
        self.resources.iter().find_map(|r| match r {
            Resource::Program(p) => Some(p),
            _ => None,
        })
    }

    pub(crate) fn program_mut(&mut self) -> Option<&mut K::Program> {
        self.resources.iter_mut().find_map(|r| match r {
            Resource::Program(p) => Some(p),
            _ => None,
        })
    }

    pub(crate) fn collection_mut(&mut self) -> Option<&mut K::Collection> {
        self.resources.iter_mut().find_map(|r| match r {
            Resource::Collection(c) => Some(c),
            _ => None,
        })
    }

    /// Release all resources, last acquired first. Failing to release one
    /// does not prevent the others from being released. Returns the number
    /// of resources which could not be released cleanly.
    pub(crate) fn unwind(&mut self, kernel: &mut K) -> usize {
        let mut failed = 0;

        while let Some(resource) = self.resources.pop() {
            let name = resource.to_string();
            match kernel.release(resource) {
                Ok(()) => debug!("Released {name}"),
                Err(e) => {
                    warn!("Could not release {name}: {e}");
                    failed += 1;
                }
            }
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        bpf::Hook,
        pipeline::fake::{FakeKernel, FakeProgram, Step},
    };

    fn filled() -> ResourceStack<FakeKernel> {
        let mut stack = ResourceStack::new();
        stack.push(Resource::Program(FakeProgram(3)));
        stack.push(Resource::Collection(vec!["fentry_xdp".to_string()]));
        stack.push(Resource::Link(Hook::Xdp, Hook::Xdp));
        stack.push(Resource::Link(Hook::Fentry, Hook::Fentry));
        stack
    }

    #[test]
    fn accessors() {
        let mut stack = filled();
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.links(), 2);
        assert_eq!(stack.program().map(|p| p.0), Some(3));
        assert_eq!(stack.collection_mut().map(|c| c.len()), Some(1));

        let mut empty = ResourceStack::<FakeKernel>::new();
        assert!(empty.is_empty());
        assert!(empty.program_mut().is_none());
        assert!(empty.collection_mut().is_none());
    }

    #[test]
    fn unwind_lifo() {
        let mut kernel = FakeKernel::new();
        let events = kernel.events();
        let mut stack = filled();

        assert_eq!(stack.unwind(&mut kernel), 0);
        assert!(stack.is_empty());
        assert_eq!(
            *events.borrow(),
            vec![
                "release fentry tracer link",
                "release XDP hook link",
                "release program collection",
                "release dummy program",
            ]
        );
    }

    #[test]
    fn unwind_continues_on_failure() {
        let mut kernel = FakeKernel::new().failing_at(Step::Release);
        let events = kernel.events();
        let mut stack = filled();

        assert_eq!(stack.unwind(&mut kernel), 4);
        assert!(stack.is_empty());
        assert_eq!(events.borrow().len(), 4);

        // Nothing left to release.
        assert_eq!(stack.unwind(&mut kernel), 0);
        assert_eq!(events.borrow().len(), 4);
    }
}
