//! # Symbol resolution
//!
//! Tracing programs are attached to a function by name. The name of the
//! dummy program's function is only known once it is loaded, as the kernel
//! may rename it: it is found by scanning the loaded program's instructions.

use log::trace;

use crate::core::{
    bpf::info::ProgramInfo,
    errors::{Error, Result},
};

/// Find the name of the function a loaded program runs. The program must
/// have a BTF id; the last non-empty symbol found in its instruction stream
/// is returned.
pub(crate) fn resolve_symbol(program: &str, info: &ProgramInfo) -> Result<String> {
    if info.btf_id.is_none() {
        return Err(Error::MissingDebugInfo(program.to_string()));
    }

    let (offset, symbol) = info
        .insns
        .iter()
        .filter_map(|insn| insn.symbol.as_deref().map(|sym| (insn.offset, sym)))
        .filter(|(_, sym)| !sym.is_empty())
        .last()
        .ok_or_else(|| Error::SymbolNotFound(program.to_string()))?;

    trace!("Program {program}: using symbol {symbol} found at instruction {offset}");
    Ok(symbol.to_string())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::core::bpf::info::Instruction;

    fn info(btf_id: Option<u32>, symbols: &[Option<&str>]) -> ProgramInfo {
        ProgramInfo {
            btf_id,
            insns: symbols
                .iter()
                .enumerate()
                .map(|(offset, sym)| Instruction {
                    offset: offset as u32,
                    symbol: sym.map(String::from),
                })
                .collect(),
        }
    }

    #[test_case(&[Some("dummy"), None, None], "dummy" ; "single function")]
    #[test_case(&[Some("main"), None, Some("subprog"), None], "subprog" ; "last one wins")]
    #[test_case(&[Some("dummy"), Some(""), None], "dummy" ; "empty tags are skipped")]
    #[test_case(&[None, None, Some("late")], "late" ; "tag on last insn")]
    fn resolve(symbols: &[Option<&str>], expected: &str) {
        assert_eq!(resolve_symbol("dummy", &info(Some(1), symbols)).unwrap(), expected);
    }

    #[test]
    fn deterministic() {
        let info = info(Some(7), &[Some("a"), None, Some("b")]);
        assert_eq!(
            resolve_symbol("dummy", &info).unwrap(),
            resolve_symbol("dummy", &info).unwrap()
        );
    }

    #[test_case(&[Some("dummy")] ; "with symbols")]
    #[test_case(&[] ; "without instructions")]
    fn missing_debug_info(symbols: &[Option<&str>]) {
        assert!(matches!(
            resolve_symbol("dummy", &info(None, symbols)),
            Err(Error::MissingDebugInfo(_))
        ));
    }

    #[test_case(&[None, None] ; "no tags")]
    #[test_case(&[Some(""), None, Some("")] ; "empty tags")]
    #[test_case(&[] ; "no instructions")]
    fn symbol_not_found(symbols: &[Option<&str>]) {
        assert!(matches!(
            resolve_symbol("dummy", &info(Some(1), symbols)),
            Err(Error::SymbolNotFound(_))
        ));
    }
}
