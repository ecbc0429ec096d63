//! Probe Loader (spec §4.D): `load(probe, target) -> loaded_probe`, `unload()`.

use std::collections::HashMap;

use aya::maps::PerfEventArray;
use aya::Ebpf;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::offsets::OffsetsDatabase;
use crate::probe::descriptor::{ConstSpec, ConstValue, ProbeDescriptor};
use crate::probe::object::{attach_uprobe, detach_uprobe, Attached, ProbeObject};
use crate::propagation::pinned_path;
use crate::target::TargetDetails;

/// A probe successfully loaded and (partially or fully) attached. Held by
/// the Manager; dropping or calling `unload` tears down every attachment.
pub struct LoadedProbe {
    pub descriptor: ProbeDescriptor,
    ebpf: Ebpf,
    attached: Vec<Attached>,
}

impl LoadedProbe {
    /// Detach every attachment in reverse order and release kernel
    /// resources (spec §4.D ordering, §4.H `close`).
    pub fn unload(mut self) {
        while let Some(attached) = self.attached.pop() {
            if let Err(err) = detach_uprobe(&mut self.ebpf, attached) {
                warn!(error = %err, "failed to detach probe program during unload");
            }
        }
    }

    /// Takes ownership of the named perf event array out of the loaded
    /// object, converted for per-CPU buffer consumption by the event
    /// demultiplexer (spec §4.E). Each probe exposes exactly one such table,
    /// named in `descriptor.event_layout`'s owning probe.
    pub fn take_perf_array(&mut self, table_name: &str) -> Result<PerfEventArray<aya::maps::MapData>, AgentError> {
        let map = self
            .ebpf
            .take_map(table_name)
            .ok_or_else(|| AgentError::LoadFailed(format!("map {table_name} not found in probe object")))?;
        PerfEventArray::try_from(map)
            .map_err(|e| AgentError::LoadFailed(format!("map {table_name} is not a perf event array: {e}")))
    }
}

/// Resolves `probe.consts` against a target and the offsets database, loads
/// the object, and attaches every entry/return program (spec §4.D).
pub struct ProbeLoader<'a> {
    pub offsets: &'a OffsetsDatabase,
}

impl<'a> ProbeLoader<'a> {
    pub fn new(offsets: &'a OffsetsDatabase) -> Self {
        Self { offsets }
    }

    /// Resolve every `ConstSpec` to a concrete `ConstValue`. Fails with
    /// `MissingOffset` when a required struct-field offset is absent for the
    /// target's detected library version.
    fn resolve_consts(
        &self,
        descriptor: &ProbeDescriptor,
        target: &TargetDetails,
    ) -> Result<HashMap<String, ConstValue>, AgentError> {
        let library_version = target
            .library_version(&descriptor.id.instrumented_package)
            .cloned()
            .unwrap_or_else(|| target.language_version.clone());

        let mut resolved = HashMap::new();
        for (index, spec) in descriptor.consts.iter().enumerate() {
            let key = format!("CONST_{index}");
            let value = match spec {
                ConstSpec::Abi => ConstValue::Byte(match target.abi {
                    crate::target::Abi::StackArgs => 0,
                    crate::target::Abi::RegisterArgs => 1,
                }),
                ConstSpec::Allocation => ConstValue::Allocation(target.allocation),
                ConstSpec::StructFieldOffset { struct_name, field } => {
                    let offset = self
                        .offsets
                        .lookup(
                            &descriptor.id.instrumented_package,
                            struct_name,
                            field,
                            &library_version,
                        )
                        .map_err(|_| AgentError::MissingOffset {
                            module: descriptor.id.instrumented_package.clone(),
                            struct_name: struct_name.clone(),
                            field: field.clone(),
                            version: library_version.to_string(),
                        })?;
                    ConstValue::Offset(offset)
                }
                ConstSpec::FeatureFlag { env_var, default } => {
                    let enabled = std::env::var(env_var)
                        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                        .unwrap_or(*default);
                    ConstValue::Bool(enabled)
                }
                ConstSpec::FixedValue(v) => ConstValue::Scalar(*v),
            };
            resolved.insert(key, value);
        }
        Ok(resolved)
    }

    /// Load `object` per `descriptor` against `target`, then attach every
    /// entry program and every return-site copy of its return program.
    /// On partial failure, everything attached so far for this probe is
    /// detached in reverse order and the error is returned (the probe is
    /// reported but the Manager proceeds to the next one, spec §7).
    pub fn load(
        &self,
        descriptor: ProbeDescriptor,
        object: &ProbeObject,
        target: &TargetDetails,
        target_exe: &str,
    ) -> Result<LoadedProbe, AgentError> {
        let consts = self.resolve_consts(&descriptor, target)?;

        let mut ebpf = object
            .load(&consts)
            .map_err(|e| AgentError::LoadFailed(e.to_string()))?;

        debug!(
            target = target.pid,
            pinned = %pinned_path(target.pid).display(),
            "probe object loaded"
        );

        let mut attached = Vec::new();
        let attach_result = self.attach_all(&descriptor, &mut ebpf, target, target_exe, &mut attached);

        match attach_result {
            Ok(()) => Ok(LoadedProbe {
                descriptor,
                ebpf,
                attached,
            }),
            Err(err) => {
                while let Some(a) = attached.pop() {
                    let _ = detach_uprobe(&mut ebpf, a);
                }
                Err(err)
            }
        }
    }

    fn attach_all(
        &self,
        descriptor: &ProbeDescriptor,
        ebpf: &mut Ebpf,
        target: &TargetDetails,
        target_exe: &str,
        attached: &mut Vec<Attached>,
    ) -> Result<(), AgentError> {
        for attachment in &descriptor.attachments {
            let resolved = target.function(&attachment.function).ok_or_else(|| {
                AgentError::MissingSymbol(attachment.function.symbol_name())
            })?;

            let entry = attach_uprobe(
                ebpf,
                &attachment.entry_program,
                target_exe,
                resolved.entry_offset,
                Some(target.pid),
            )
            .map_err(|e| AgentError::AttachFailed(e.to_string()))?;
            attached.push(entry);

            if let Some(return_program) = &attachment.return_program {
                for &return_offset in &resolved.return_offsets {
                    let ret = attach_uprobe(
                        ebpf,
                        return_program,
                        target_exe,
                        return_offset,
                        Some(target.pid),
                    )
                    .map_err(|e| AgentError::AttachFailed(e.to_string()))?;
                    attached.push(ret);
                }
            }
        }
        Ok(())
    }
}
