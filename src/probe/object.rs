//! Opaque in-kernel program blob (spec §3 "Probe descriptor: object").
//!
//! The core never inspects or generates probe bytecode — each probe ships as
//! a pre-compiled ELF object exposing a fixed symbol set (programs and
//! shared maps by name). This module wraps that object and the `aya`
//! loading/global-patching calls; everything past `aya::Ebpf::load` is
//! mechanical plumbing grounded in the teacher's loader idiom generalized
//! from ptrace to uprobes.

use std::collections::HashMap;

use anyhow::{Context, Result};
use aya::programs::UProbe;
use aya::{Ebpf, EbpfLoader};

use crate::probe::descriptor::ConstValue;

/// Raw bytes of a compiled probe object plus the name→symbol mapping for its
/// programs and shared tables (spec §3: "opaque in-kernel program blob plus
/// a mapping name → symbol for its programs and shared tables").
pub struct ProbeObject {
    bytes: Vec<u8>,
    pub program_names: Vec<String>,
    pub table_names: Vec<String>,
}

impl ProbeObject {
    pub fn from_bytes(bytes: Vec<u8>, program_names: Vec<String>, table_names: Vec<String>) -> Self {
        Self {
            bytes,
            program_names,
            table_names,
        }
    }

    /// Load the object into the kernel with `consts` patched into its global
    /// data section (spec §4.D "Constant patching"). Returns the live `Ebpf`
    /// handle; nothing is attached yet.
    pub fn load(&self, consts: &HashMap<String, ConstValue>) -> Result<Ebpf> {
        let mut loader = EbpfLoader::new();
        for (name, value) in consts {
            match value {
                ConstValue::Byte(b) => {
                    loader.set_global(name, b, true);
                }
                ConstValue::Bool(b) => {
                    loader.set_global(name, b, true);
                }
                ConstValue::Scalar(s) => {
                    loader.set_global(name, s, true);
                }
                ConstValue::Offset(o) => {
                    loader.set_global(name, o, true);
                }
                ConstValue::Allocation(alloc) => {
                    // Patched as three consecutive globals; the probe's
                    // section layout names them `<NAME>_START`,
                    // `<NAME>_LENGTH`, `<NAME>_CPUS`.
                    loader.set_global(format!("{name}_START"), &alloc.start_address, true);
                    loader.set_global(format!("{name}_LENGTH"), &alloc.length, true);
                    loader.set_global(format!("{name}_CPUS"), &alloc.cpu_count, true);
                }
            }
        }
        loader
            .load(&self.bytes)
            .context("failed to load probe object into the kernel")
    }
}

/// A single tracked attachment: which program, which link, so it can be
/// detached individually during rollback (spec §4.D "on partial failure,
/// everything attached so far is detached in reverse order").
pub struct Attached {
    pub program_name: String,
    pub link_id: aya::programs::uprobe::UProbeLinkId,
}

/// Attach a uprobe (entry) or uretprobe-style (return, attached once per
/// return site — spec §4.D step 2) program from a loaded object.
pub fn attach_uprobe(
    ebpf: &mut Ebpf,
    program_name: &str,
    target_exe: &str,
    offset: u64,
    pid: Option<i32>,
) -> Result<Attached> {
    let program: &mut UProbe = ebpf
        .program_mut(program_name)
        .with_context(|| format!("program {program_name} not found in probe object"))?
        .try_into()
        .with_context(|| format!("program {program_name} is not a uprobe"))?;
    program
        .load()
        .with_context(|| format!("failed to load program {program_name}"))?;
    let link_id = program
        .attach(None, offset, target_exe, pid)
        .with_context(|| format!("failed to attach {program_name} at offset {offset:#x}"))?;
    Ok(Attached {
        program_name: program_name.to_string(),
        link_id,
    })
}

/// Detach a previously attached program (rollback and normal unload, spec
/// §4.D / §4.H `close`).
pub fn detach_uprobe(ebpf: &mut Ebpf, attached: Attached) -> Result<()> {
    let program: &mut UProbe = ebpf
        .program_mut(&attached.program_name)
        .with_context(|| format!("program {} not found during detach", attached.program_name))?
        .try_into()
        .with_context(|| format!("program {} is not a uprobe", attached.program_name))?;
    program
        .detach(attached.link_id)
        .with_context(|| format!("failed to detach {}", attached.program_name))
}
