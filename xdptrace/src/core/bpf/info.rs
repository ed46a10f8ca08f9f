//! # Program information
//!
//! Retrieves information about a loaded program from the kernel: its BTF id
//! and its (translated) instruction stream, where instructions starting a
//! function are tagged with the function name found in the program BTF.

use std::{io, mem, os::fd::RawFd, slice};

use btf_rs::{Btf, Type};

use crate::core::errors::{Error, Result};

/// Instruction of a loaded program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Instruction {
    /// Offset of the instruction in the program, in instructions.
    pub(crate) offset: u32,
    /// Name of the function starting at this instruction, if any.
    pub(crate) symbol: Option<String>,
}

/// Information about a loaded program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ProgramInfo {
    pub(crate) btf_id: Option<u32>,
    pub(crate) insns: Vec<Instruction>,
}

impl ProgramInfo {
    /// Build the instruction stream of a program of `insn_cnt` instructions,
    /// given its functions as (instruction offset, name) pairs.
    pub(crate) fn from_funcs(
        insn_cnt: usize,
        btf_id: Option<u32>,
        funcs: &[(u32, String)],
    ) -> Self {
        let mut insns: Vec<Instruction> = (0..insn_cnt as u32)
            .map(|offset| Instruction {
                offset,
                symbol: None,
            })
            .collect();

        funcs.iter().for_each(|(off, name)| {
            if let Some(insn) = insns.get_mut(*off as usize) {
                insn.symbol = Some(name.clone());
            }
        });

        Self { btf_id, insns }
    }

    /// Query the kernel for information about the program behind `fd`.
    pub(crate) fn query(name: &str, fd: RawFd) -> Result<Self> {
        let info_err = |e: io::Error| Error::Load {
            what: format!("{name} program info"),
            reason: e.to_string(),
        };

        let mut info = libbpf_sys::bpf_prog_info::default();
        prog_info(fd, &mut info).map_err(info_err)?;

        let insn_cnt = info.xlated_prog_len as usize / mem::size_of::<libbpf_sys::bpf_insn>();
        if info.btf_id == 0 {
            return Ok(Self::from_funcs(insn_cnt, None, &[]));
        }

        // Second pass to retrieve the func_info records, now that we know
        // how many of them there are.
        let rec_size = mem::size_of::<libbpf_sys::bpf_func_info>() as u32;
        let mut records = vec![libbpf_sys::bpf_func_info::default(); info.nr_func_info as usize];
        if !records.is_empty() {
            let mut func_info = libbpf_sys::bpf_prog_info {
                nr_func_info: info.nr_func_info,
                func_info_rec_size: rec_size,
                func_info: records.as_mut_ptr() as u64,
                ..Default::default()
            };
            prog_info(fd, &mut func_info).map_err(info_err)?;

            if func_info.func_info_rec_size != rec_size {
                return Err(Error::Load {
                    what: format!("{name} program info"),
                    reason: format!(
                        "unexpected func_info record size ({} != {rec_size})",
                        func_info.func_info_rec_size
                    ),
                });
            }
        }

        let btf = ProgramBtf::load(info.btf_id)?;
        let funcs = records
            .iter()
            .map(|r| Ok((r.insn_off, btf.func_name(r.type_id)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_funcs(insn_cnt, Some(info.btf_id), &funcs))
    }
}

fn prog_info(fd: RawFd, info: &mut libbpf_sys::bpf_prog_info) -> io::Result<()> {
    let mut len = mem::size_of::<libbpf_sys::bpf_prog_info>() as u32;

    // Safety: info is a valid bpf_prog_info of len bytes and any buffer it
    // points to was sized according to the counts it holds.
    let ret = unsafe { libbpf_sys::bpf_prog_get_info_by_fd(fd, info, &mut len) };
    if ret < 0 {
        return Err(io::Error::from_raw_os_error(-ret));
    }
    Ok(())
}

/// BTF of a loaded program.
pub(crate) struct ProgramBtf(Btf);

impl ProgramBtf {
    /// Retrieve a BTF object from the kernel, given its id.
    pub(crate) fn load(id: u32) -> Result<Self> {
        let err = |reason: String| Error::Load {
            what: format!("BTF object {id}"),
            reason,
        };

        // Safety: the returned object is checked for NULL and freed below.
        let btf = unsafe { libbpf_sys::btf__load_from_kernel_by_id(id) };
        if btf.is_null() {
            return Err(err(io::Error::last_os_error().to_string()));
        }

        let mut size = 0;
        // Safety: btf is a valid, non-NULL object.
        let data = unsafe { libbpf_sys::btf__raw_data(btf, &mut size) };
        let raw = match data.is_null() {
            true => None,
            // Safety: libbpf owns size bytes at data until btf is freed.
            false => {
                Some(unsafe { slice::from_raw_parts(data as *const u8, size as usize) }.to_vec())
            }
        };
        // Safety: btf is not used after this point, raw data was copied.
        unsafe { libbpf_sys::btf__free(btf) };

        Self::from_bytes(&raw.ok_or_else(|| err("no raw data".to_string()))?)
            .map_err(|e| err(e.to_string()))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Btf::from_bytes(bytes).map(Self).map_err(|e| Error::Load {
            what: "BTF".to_string(),
            reason: e.to_string(),
        })
    }

    /// Name of the function described by the BTF type `type_id`.
    pub(crate) fn func_name(&self, type_id: u32) -> Result<String> {
        let err = |reason: String| Error::Load {
            what: format!("BTF function {type_id}"),
            reason,
        };

        match self.0.resolve_type_by_id(type_id) {
            Ok(Type::Func(func)) => self.0.resolve_name(&func).map_err(|e| err(e.to_string())),
            Ok(_) => Err(err("not a function".to_string())),
            Err(e) => Err(err(e.to_string())),
        }
    }
}
