//! # libbpf output
//!
//! Routes libbpf's own messages to our logger and allows capturing them while
//! loading programs, so verifier logs can be reported with the load error.

use std::sync::{Mutex, PoisonError};

use libbpf_rs::PrintLevel;
use log::{log, Level};
use once_cell::sync::Lazy;

use crate::core::errors::Error;

const LOG_BEGIN: &str = "-- BEGIN PROG LOAD LOG --";
const LOG_END: &str = "-- END PROG LOAD LOG --";

// Lines captured while a load is in progress. None when not capturing.
static CAPTURED: Lazy<Mutex<Option<Vec<String>>>> = Lazy::new(|| Mutex::new(None));

fn print(level: PrintLevel, msg: String) {
    let msg = msg.trim_end();

    if let Some(lines) = CAPTURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_mut()
    {
        lines.extend(msg.lines().map(String::from));
    }

    // Captured lines are logged too, loads can succeed with warnings.
    log!(log_level(level), "{msg}");
}

fn log_level(level: PrintLevel) -> Level {
    match level {
        PrintLevel::Warn => Level::Warn,
        PrintLevel::Info => Level::Debug,
        PrintLevel::Debug => Level::Trace,
    }
}

/// Install our print callback in libbpf.
pub(crate) fn init() {
    libbpf_rs::set_print(Some((PrintLevel::Debug, print)));
}

/// Run `f` while capturing libbpf's output, and return both.
pub(crate) fn capture<T, F>(f: F) -> (T, Vec<String>)
where
    F: FnOnce() -> T,
{
    *CAPTURED.lock().unwrap_or_else(PoisonError::into_inner) = Some(Vec::new());
    let ret = f();
    let lines = CAPTURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_default();

    (ret, lines)
}

/// Verifier log extracted from libbpf's output.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct VerifierLog {
    /// Name of the rejected program, if libbpf told us.
    pub(crate) program: Option<String>,
    pub(crate) log: String,
}

/// Look for a program load log in libbpf's output. libbpf only dumps it when
/// the verifier rejected a program.
pub(crate) fn verifier_log(lines: &[String]) -> Option<VerifierLog> {
    let start = lines.iter().position(|l| l.contains(LOG_BEGIN))?;

    let program = lines[start]
        .split_once("prog '")
        .and_then(|(_, rest)| rest.split_once('\''))
        .map(|(name, _)| name.to_string());

    let log = lines[start + 1..]
        .iter()
        .take_while(|l| !l.contains(LOG_END))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    Some(VerifierLog { program, log })
}

/// Convert a libbpf load error into our own, telling apart verifier
/// rejections.
pub(crate) fn load_error(what: &str, error: libbpf_rs::Error, lines: &[String]) -> Error {
    match verifier_log(lines) {
        Some(VerifierLog { program, log }) => Error::Verifier {
            program: program.unwrap_or_else(|| what.to_string()),
            reason: error.to_string(),
            log,
        },
        None => Error::Load {
            what: what.to_string(),
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use test_case::test_case;

    use super::*;

    fn lines(raw: &str) -> Vec<String> {
        raw.lines().map(String::from).collect()
    }

    #[test]
    fn extract_verifier_log() {
        let output = lines(
            "libbpf: prog 'fentry_xdp': BPF program load failed: Permission denied
libbpf: prog 'fentry_xdp': -- BEGIN PROG LOAD LOG --
reg type unsupported for arg#0 function fentry_xdp#5
0: R1=ctx() R10=fp0
; int BPF_PROG(fentry_xdp, struct xdp_buff *xdp)
0: (79) r1 = *(u64 *)(r1 +0)
invalid bpf_context access off=0 size=8
processed 1 insns (limit 1000000) max_states_per_insn 0 total_states 0 peak_states 0 mark_read 0
-- END PROG LOAD LOG --
libbpf: prog 'fentry_xdp': failed to load: -13
libbpf: failed to load object 'xdp'",
        );

        let log = verifier_log(&output).unwrap();
        assert_eq!(log.program.as_deref(), Some("fentry_xdp"));
        assert!(log.log.starts_with("reg type unsupported"));
        assert!(log.log.ends_with("mark_read 0"));
        assert!(!log.log.contains("END PROG LOAD LOG"));
    }

    #[test]
    fn no_verifier_log() {
        let output = lines(
            "libbpf: Error in bpf_object__probe_loading():Operation not permitted(1).
libbpf: failed to load object 'xdp'",
        );
        assert!(verifier_log(&output).is_none());
        assert!(verifier_log(&[]).is_none());
    }

    #[test]
    fn truncated_verifier_log() {
        let output = lines(
            "libbpf: prog 'dummy': -- BEGIN PROG LOAD LOG --
0: R1=ctx() R10=fp0",
        );

        let log = verifier_log(&output).unwrap();
        assert_eq!(log.program.as_deref(), Some("dummy"));
        assert_eq!(log.log, "0: R1=ctx() R10=fp0");
    }

    #[test_case(PrintLevel::Warn, Level::Warn ; "warn")]
    #[test_case(PrintLevel::Info, Level::Debug ; "info")]
    #[test_case(PrintLevel::Debug, Level::Trace ; "debug")]
    fn level_mapping(level: PrintLevel, expected: Level) {
        assert_eq!(log_level(level), expected);
    }

    #[test]
    #[serial(libbpf)]
    fn capture_output() {
        let (ret, captured) = capture(|| {
            print(PrintLevel::Warn, "libbpf: first\nlibbpf: second\n".to_string());
            42
        });
        assert_eq!(ret, 42);
        assert_eq!(captured, vec!["libbpf: first", "libbpf: second"]);

        // Not capturing anymore.
        print(PrintLevel::Warn, "libbpf: third".to_string());
        let (_, captured) = capture(|| ());
        assert!(captured.is_empty());
    }
}
