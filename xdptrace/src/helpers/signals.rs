//! # Signals
//!
//! Waits for a termination signal (SIGINT, SIGTERM, ...) or for another part
//! of the program to request the termination.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
};

use anyhow::Result;
use log::info;
use signal_hook::{iterator::Signals, low_level::signal_name};

/// Reason the program was asked to terminate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Termination {
    /// A termination signal was received.
    Signal(i32),
    /// Something went wrong while running.
    Failure(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Signal(sig) => match signal_name(*sig) {
                Some(name) => write!(f, "received {name}"),
                None => write!(f, "received signal {sig}"),
            },
            Termination::Failure(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Running {
    // First termination reason, if any.
    state: Arc<(Mutex<Option<Termination>>, Condvar)>,
}

impl Running {
    // Create a new Running instance, terminating upon receiving one of the
    // termination signals (e.g. SIGTERM).
    pub(crate) fn new() -> Result<Running> {
        let mut sigs = Signals::new(signal_hook::consts::TERM_SIGNALS)?;

        let run = Self::ignore_signals();
        let handler = run.clone();

        thread::spawn(move || match sigs.forever().next() {
            Some(sig) => {
                info!("Received signal, terminating...");
                handler.terminate(Termination::Signal(sig));
            }
            None => handler.terminate(Termination::Failure(
                "signal handler stopped unexpectedly".to_string(),
            )),
        });

        Ok(run)
    }

    // Same as `new()` but without handling termination signals. Termination
    // *must* be manually handled here.
    pub(crate) fn ignore_signals() -> Running {
        Self {
            state: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    /// Request the termination. Only the first reason is kept.
    pub(crate) fn terminate(&self, reason: Termination) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_none() {
            *state = Some(reason);
            cvar.notify_all();
        }
    }

    /// Block until the termination is requested.
    pub(crate) fn wait(&self) -> Termination {
        let (lock, cvar) = &*self.state;
        let state = cvar
            .wait_while(
                lock.lock().unwrap_or_else(PoisonError::into_inner),
                |state| state.is_none(),
            )
            .unwrap_or_else(PoisonError::into_inner);

        state
            .clone()
            .unwrap_or_else(|| Termination::Failure("spurious wake up".to_string()))
    }
}
