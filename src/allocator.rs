//! Scratch-memory allocator (spec §4.C): reserves an anonymous RW mapping
//! inside the target process for probes to stash per-CPU/per-GID state.
//!
//! The target never runs our code voluntarily, so the mapping has to be
//! created *for* it: attach with `ptrace`, point its instruction pointer at
//! a `syscall` instruction already present in its own text (so no bytes are
//! injected), populate registers for an `mmap(2)` call, single-step past
//! the syscall, read back the return value, then restore every register we
//! touched before detaching. This mirrors the attach/step/detach shape the
//! teacher's own syscall tracer uses for following a traced child, adapted
//! here from "observe every syscall" to "inject exactly one".

use std::fs;

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::target::Allocation;

#[cfg(target_arch = "x86_64")]
const SYS_MMAP: u64 = 9;
#[cfg(target_arch = "aarch64")]
const SYS_MMAP: u64 = 222;

#[cfg(target_arch = "x86_64")]
const SYS_MUNMAP: u64 = 11;
#[cfg(target_arch = "aarch64")]
const SYS_MUNMAP: u64 = 215;

const PROT_READ: u64 = 0x1;
const PROT_WRITE: u64 = 0x2;
const MAP_PRIVATE: u64 = 0x02;
const MAP_ANONYMOUS: u64 = 0x20;
const MAP_FAILED: u64 = u64::MAX - 4095; // (void*)-1 through -4095, errno range

/// Attaches to `pid`, points it at a `syscall`/`svc` instruction already
/// present in its own text, populates registers for one syscall, single
/// steps past it, and restores every register touched before detaching.
/// Shared by `allocate` (mmap) and `release` (munmap): both need exactly
/// the same attach/inject/restore dance, just a different syscall number
/// and argument list.
fn inject_syscall(pid: i32, syscall_number: u64, args: [u64; 6]) -> Result<u64, AgentError> {
    let target = Pid::from_raw(pid);

    ptrace::attach(target).map_err(|e| AgentError::AllocateFailed(format!("ptrace attach: {e}")))?;
    let result = (|| {
        match waitpid(target, None) {
            Ok(WaitStatus::Stopped(_, _)) => {}
            other => {
                return Err(AgentError::AllocateFailed(format!(
                    "unexpected wait status after attach: {other:?}"
                )))
            }
        }

        let saved_regs =
            ptrace::getregs(target).map_err(|e| AgentError::AllocateFailed(format!("getregs: {e}")))?;

        let syscall_site = find_syscall_instruction(pid)
            .map_err(|e| AgentError::AllocateFailed(format!("locating syscall gadget: {e}")))?;

        let mut regs = saved_regs;
        regs_set_number(&mut regs, syscall_number);
        set_syscall_args(&mut regs, syscall_site, args);

        ptrace::setregs(target, regs)
            .map_err(|e| AgentError::AllocateFailed(format!("setregs: {e}")))?;

        ptrace::step(target, None)
            .map_err(|e| AgentError::AllocateFailed(format!("single-step: {e}")))?;
        match waitpid(target, None) {
            Ok(WaitStatus::Stopped(_, _)) => {}
            other => {
                return Err(AgentError::AllocateFailed(format!(
                    "unexpected wait status after step: {other:?}"
                )))
            }
        }

        let after = ptrace::getregs(target)
            .map_err(|e| AgentError::AllocateFailed(format!("getregs after step: {e}")))?;
        let retval = return_value(&after);

        ptrace::setregs(target, saved_regs)
            .map_err(|e| AgentError::AllocateFailed(format!("restoring regs: {e}")))?;

        Ok(retval)
    })();

    if let Err(e) = ptrace::detach(target, None) {
        warn!(pid, error = %e, "ptrace detach failed after syscall injection");
    }
    result
}

/// Reserves `length` bytes of RW anonymous memory inside `pid` via a
/// ptrace-injected `mmap`, one allocation shared across `cpu_count` CPUs'
/// worth of probe-local scratch state.
pub fn allocate(pid: i32, length: u64, cpu_count: u32) -> Result<Allocation, AgentError> {
    let start_address = inject_syscall(
        pid,
        SYS_MMAP,
        [
            0, // addr: let the kernel choose
            length,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            u64::MAX, // fd: -1
            0,        // offset
        ],
    )?;

    if start_address >= MAP_FAILED {
        return Err(AgentError::AllocateFailed(format!(
            "remote mmap failed, errno-like return {start_address:#x}"
        )));
    }

    debug!(pid, start_address, length, "reserved scratch region in target");
    Ok(Allocation {
        start_address,
        length,
        cpu_count,
    })
}

/// Releases a previously reserved allocation via a ptrace-injected `munmap`
/// (spec §4.C: "the mapping persists until process exit or explicit
/// release"). Best-effort: the target may already be gone, in which case
/// the failure is not actionable and the caller (`Manager::close`) only
/// logs it.
pub fn release(pid: i32, allocation: Allocation) -> Result<(), AgentError> {
    let retval = inject_syscall(
        pid,
        SYS_MUNMAP,
        [allocation.start_address, allocation.length, 0, 0, 0, 0],
    )?;
    if retval >= MAP_FAILED {
        return Err(AgentError::AllocateFailed(format!(
            "remote munmap failed, errno-like return {retval:#x}"
        )));
    }
    debug!(pid, start_address = allocation.start_address, "released scratch region in target");
    Ok(())
}

/// Scans the target's own executable text for an existing `syscall`
/// instruction to reuse as the injection site, avoiding any write into the
/// target's address space.
#[cfg(target_arch = "x86_64")]
fn find_syscall_instruction(pid: i32) -> Result<u64, std::io::Error> {
    find_opcode_in_maps(pid, &[0x0F, 0x05])
}

#[cfg(target_arch = "aarch64")]
fn find_syscall_instruction(pid: i32) -> Result<u64, std::io::Error> {
    // `svc #0` little-endian encoding.
    find_opcode_in_maps(pid, &[0x01, 0x00, 0x00, 0xD4])
}

fn find_opcode_in_maps(pid: i32, opcode: &[u8]) -> Result<u64, std::io::Error> {
    let maps = fs::read_to_string(format!("/proc/{pid}/maps"))?;
    let mem_path = format!("/proc/{pid}/mem");
    let mem = fs::read(&mem_path).ok();

    for line in maps.lines() {
        if !line.contains("r-xp") && !line.contains("r-x") {
            continue;
        }
        let Some(range) = line.split_whitespace().next() else {
            continue;
        };
        let Some((start_s, end_s)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (
            u64::from_str_radix(start_s, 16),
            u64::from_str_radix(end_s, 16),
        ) else {
            continue;
        };

        if let Some(mem) = &mem {
            let lo = start as usize;
            let hi = (end as usize).min(mem.len());
            if lo >= mem.len() || lo >= hi {
                continue;
            }
            if let Some(pos) = mem[lo..hi].windows(opcode.len()).position(|w| w == opcode) {
                return Ok(start + pos as u64);
            }
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no syscall instruction found in target's executable mappings",
    ))
}

#[cfg(target_arch = "x86_64")]
fn regs_set_number(regs: &mut libc::user_regs_struct, number: u64) {
    regs.rax = number;
}

#[cfg(target_arch = "x86_64")]
fn set_syscall_args(regs: &mut libc::user_regs_struct, rip: u64, args: [u64; 6]) {
    regs.rip = rip;
    regs.rdi = args[0];
    regs.rsi = args[1];
    regs.rdx = args[2];
    regs.r10 = args[3];
    regs.r8 = args[4];
    regs.r9 = args[5];
}

#[cfg(target_arch = "x86_64")]
fn return_value(regs: &libc::user_regs_struct) -> u64 {
    regs.rax
}

#[cfg(target_arch = "aarch64")]
fn regs_set_number(regs: &mut libc::user_regs_struct, number: u64) {
    regs.regs[8] = number;
}

#[cfg(target_arch = "aarch64")]
fn set_syscall_args(regs: &mut libc::user_regs_struct, pc: u64, args: [u64; 6]) {
    regs.pc = pc;
    regs.regs[0] = args[0];
    regs.regs[1] = args[1];
    regs.regs[2] = args[2];
    regs.regs[3] = args[3];
    regs.regs[4] = args[4];
    regs.regs[5] = args[5];
}

#[cfg(target_arch = "aarch64")]
fn return_value(regs: &libc::user_regs_struct) -> u64 {
    regs.regs[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_syscall_gadget_in_own_executable() {
        let pid = std::process::id() as i32;
        let result = find_syscall_instruction(pid);
        assert!(result.is_ok(), "expected to find a syscall/svc opcode in our own text: {result:?}");
    }

    #[test]
    fn allocate_against_a_process_we_cannot_ptrace_reports_allocate_failed() {
        // pid 1 (init) is never ptrace-attachable from an unprivileged test
        // process; this exercises the error path without needing root.
        let result = allocate(1, 4096, 1);
        assert!(matches!(result, Err(AgentError::AllocateFailed(_))));
    }

    #[test]
    fn release_against_a_process_we_cannot_ptrace_reports_allocate_failed() {
        let allocation = Allocation {
            start_address: 0x1000,
            length: 4096,
            cpu_count: 1,
        };
        let result = release(1, allocation);
        assert!(matches!(result, Err(AgentError::AllocateFailed(_))));
    }
}
