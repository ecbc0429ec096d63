//! Target process data model (spec §3 "Function identity" / "Target details").

use semver::Version;
use std::collections::HashMap;
use std::fmt;

/// A function named by (module path, receiver type or empty, function name).
///
/// Stable across binary builds of a given library version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    pub module: String,
    pub receiver: Option<String>,
    pub name: String,
}

impl FunctionIdentity {
    pub fn new(module: impl Into<String>, receiver: Option<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            receiver,
            name: name.into(),
        }
    }

    /// The symbol name this identity resolves to in the target's symbol table:
    /// `module.[receiver.]name`.
    pub fn symbol_name(&self) -> String {
        match &self.receiver {
            Some(recv) => format!("{}.{}.{}", self.module, recv, self.name),
            None => format!("{}.{}", self.module, self.name),
        }
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol_name())
    }
}

/// Calling convention tag, derived from the target language's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    /// Arguments passed on the stack (older language runtimes).
    StackArgs,
    /// Arguments passed in registers (modern runtimes, from a version threshold).
    RegisterArgs,
}

impl Abi {
    /// Per-architecture version threshold at which the register-based
    /// calling convention becomes the default.
    pub fn for_language_version(arch: Architecture, version: &Version) -> Self {
        let threshold = match arch {
            Architecture::X86_64 => Version::new(1, 17, 0),
            Architecture::Aarch64 => Version::new(1, 18, 0),
        };
        if *version >= threshold {
            Abi::RegisterArgs
        } else {
            Abi::StackArgs
        }
    }
}

/// Target architecture, used to pick return-opcode decoding and ABI thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

/// `(start_address, length, cpu_count)` describing the reserved scratch region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub start_address: u64,
    pub length: u64,
    pub cpu_count: u32,
}

/// A function located in the target, with its entry offset and every
/// return-instruction offset within its byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub identity: FunctionIdentity,
    pub entry_offset: u64,
    pub return_offsets: Vec<u64>,
}

/// An immutable record built once per target (spec §3 "Target details").
#[derive(Debug, Clone)]
pub struct TargetDetails {
    pub pid: i32,
    pub language_version: Version,
    pub libraries: HashMap<String, Version>,
    pub functions: Vec<ResolvedFunction>,
    pub abi: Abi,
    pub allocation: Allocation,
    pub architecture: Architecture,
}

impl TargetDetails {
    /// Library version for `module`, including the target language itself
    /// (keyed under its own module path, e.g. `"go"` / `"runtime"`).
    pub fn library_version(&self, module: &str) -> Option<&Version> {
        self.libraries.get(module)
    }

    /// Look up a resolved function by identity.
    pub fn function(&self, identity: &FunctionIdentity) -> Option<&ResolvedFunction> {
        self.functions.iter().find(|f| &f.identity == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_name_without_receiver() {
        let id = FunctionIdentity::new("net/http", None, "Get");
        assert_eq!(id.symbol_name(), "net/http.Get");
    }

    #[test]
    fn symbol_name_with_receiver() {
        let id = FunctionIdentity::new("net/http", Some("Client".to_string()), "Do");
        assert_eq!(id.symbol_name(), "net/http.Client.Do");
    }

    #[test]
    fn abi_threshold_x86_64() {
        let old = Version::new(1, 16, 0);
        let new = Version::new(1, 17, 0);
        assert_eq!(
            Abi::for_language_version(Architecture::X86_64, &old),
            Abi::StackArgs
        );
        assert_eq!(
            Abi::for_language_version(Architecture::X86_64, &new),
            Abi::RegisterArgs
        );
    }
}
