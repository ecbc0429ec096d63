//! DWARF-backed source correlation (SPEC_FULL §2 "Source correlation
//! (optional)"): resolves an instruction pointer inside the target's
//! executable to a `file:line`, purely for `--log-level debug` diagnostics
//! when a probe attachment is skipped or fails. Never on the event hot
//! path — the demultiplexer and span assembler never call this.
//!
//! Degrades silently: a stripped binary (the spec's documented minimum —
//! symbol table only, no `.debug_line`) makes every lookup return `None`
//! rather than an error, the same way `addr2line::Context` itself reports
//! an empty line program instead of failing to construct.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use addr2line::gimli;
use anyhow::{Context as _, Result};
use memmap2::Mmap;

type Addr2LineContext = addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>;

/// One resolved instruction pointer (SPEC_FULL §2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub function: Option<String>,
}

/// Parsed DWARF debug info for one target executable. Built once in
/// `Analyzer::analyze`, reused for every lookup against that target.
pub struct DwarfContext {
    context: Addr2LineContext,
    cache: HashMap<u64, Option<SourceLocation>>,
}

impl DwarfContext {
    /// Parses `.debug_info`/`.debug_line` out of `binary_path`'s ELF. Not
    /// an error if the sections are absent or stripped — `lookup` simply
    /// returns `None` for every address in that case.
    pub fn load(binary_path: &Path) -> Result<Self> {
        if !binary_path.exists() {
            anyhow::bail!("binary does not exist: {}", binary_path.display());
        }

        let file = fs::File::open(binary_path)
            .with_context(|| format!("opening {}", binary_path.display()))?;
        // SAFETY: the file is only read, never mutated, for the lifetime of
        // this mapping; `object::File::parse` only reads through it too.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmapping {}", binary_path.display()))?;
        let object = object::File::parse(&*mmap)
            .with_context(|| format!("parsing {} as ELF", binary_path.display()))?;

        // `addr2line::Context::new` copies every DWARF section it needs
        // into its own `Rc`-backed buffers, so the resulting context
        // outlives this function's `mmap`/`object` borrows.
        let context = addr2line::Context::new(&object)
            .with_context(|| format!("parsing DWARF in {}", binary_path.display()))?;

        Ok(Self {
            context,
            cache: HashMap::new(),
        })
    }

    /// Resolves `ip` to a source location, memoizing the result — probe
    /// attach failures often repeat the same handful of addresses across a
    /// run.
    pub fn lookup(&mut self, ip: u64) -> Result<Option<SourceLocation>> {
        if let Some(cached) = self.cache.get(&ip) {
            return Ok(cached.clone());
        }

        let location = match self.context.find_location(ip)? {
            Some(loc) => Some(SourceLocation {
                file: loc.file.unwrap_or("<unknown>").to_string(),
                line: loc.line.unwrap_or(0),
                column: loc.column,
                function: self.nearest_function_name(ip)?,
            }),
            None => None,
        };

        self.cache.insert(ip, location.clone());
        Ok(location)
    }

    fn nearest_function_name(&self, ip: u64) -> Result<Option<String>> {
        let mut frames = self.context.find_frames(ip)?;
        let Some(frame) = frames.next()? else {
            return Ok(None);
        };
        Ok(frame
            .function
            .and_then(|f| f.demangle().ok().map(|s| s.into_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn compile_test_binary(debug: bool) -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let src_file = temp_dir.path().join("test.rs");
        let bin_file = temp_dir.path().join("test_bin");

        fs::write(&src_file, "fn main() { println!(\"test\"); }").unwrap();

        let mut cmd = Command::new("rustc");
        cmd.arg(&src_file).arg("-o").arg(&bin_file);
        if debug {
            cmd.arg("-g");
        } else {
            cmd.arg("-C").arg("strip=debuginfo");
        }
        cmd.status().unwrap();

        (temp_dir, bin_file)
    }

    #[test]
    fn loads_a_binary_with_debug_info() {
        let (_dir, bin_file) = compile_test_binary(true);
        let result = DwarfContext::load(&bin_file);
        assert!(result.is_ok());
    }

    #[test]
    fn lookup_on_an_address_with_no_line_program_returns_none() {
        let (_dir, bin_file) = compile_test_binary(true);
        let mut ctx = DwarfContext::load(&bin_file).unwrap();
        let result = ctx.lookup(1);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn stripped_binary_degrades_to_no_locations_rather_than_erroring() {
        let (_dir, bin_file) = compile_test_binary(false);
        let mut ctx = DwarfContext::load(&bin_file).expect("stripped binary still loads");
        let result = ctx.lookup(0x1000);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn load_rejects_a_nonexistent_path() {
        let result = DwarfContext::load(Path::new("/nonexistent/binary"));
        assert!(result.is_err());
    }
}
