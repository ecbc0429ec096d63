//! Offsets database: `(module, struct, field) -> offset` keyed by version (spec §4.A).
//!
//! Read-only on the data path. Deserialized once from a shipped JSON artifact
//! produced by the (external) offsets-tracker tool.

use semver::Version;
use serde::Deserialize;
use std::collections::HashMap;

/// One `(offset, since)` pair: `offset` applies from `since` onward, until a
/// later entry with a greater `since` supersedes it.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct VersionedOffset {
    pub offset: u64,
    pub since: Version,
}

#[derive(Debug, Deserialize)]
struct DataMember {
    #[serde(rename = "struct")]
    struct_name: String,
    field: String,
    offsets: Vec<VersionedOffset>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    name: String,
    data_members: Vec<DataMember>,
}

#[derive(Debug, Deserialize)]
struct OffsetsFile {
    data: Vec<ModuleEntry>,
}

/// Composite key identifying one field's offset history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FieldKey {
    module: String,
    struct_name: String,
    field: String,
}

/// Read-only mapping `(module, struct, field) -> ordered list of (semver, offset)`.
#[derive(Debug, Default, Clone)]
pub struct OffsetsDatabase {
    fields: HashMap<FieldKey, Vec<VersionedOffset>>,
}

/// Error returned by a failed lookup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no offset entry for {module}::{struct_name}.{field}")]
    NotFound {
        module: String,
        struct_name: String,
        field: String,
    },
    #[error("{module}::{struct_name}.{field} has no offset at or below version {version}")]
    VersionOutOfRange {
        module: String,
        struct_name: String,
        field: String,
        version: String,
    },
}

impl OffsetsDatabase {
    /// Parse the JSON artifact described in spec §4.A.
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let file: OffsetsFile = serde_json::from_slice(bytes)?;
        let mut fields = HashMap::new();
        for module in file.data {
            for mut member in module.data_members {
                member.offsets.sort_by(|a, b| a.since.cmp(&b.since));
                let key = FieldKey {
                    module: module.name.clone(),
                    struct_name: member.struct_name,
                    field: member.field,
                };
                fields.insert(key, member.offsets);
            }
        }
        Ok(Self { fields })
    }

    /// `lookup(module, struct, field, library_version) -> offset | not-found`.
    ///
    /// Returns the offset whose `since` is the greatest value `<= library_version`.
    pub fn lookup(
        &self,
        module: &str,
        struct_name: &str,
        field: &str,
        library_version: &Version,
    ) -> Result<u64, LookupError> {
        let key = FieldKey {
            module: module.to_string(),
            struct_name: struct_name.to_string(),
            field: field.to_string(),
        };
        let offsets = self.fields.get(&key).ok_or_else(|| LookupError::NotFound {
            module: module.to_string(),
            struct_name: struct_name.to_string(),
            field: field.to_string(),
        })?;

        offsets
            .iter()
            .rev()
            .find(|o| &o.since <= library_version)
            .map(|o| o.offset)
            .ok_or_else(|| LookupError::VersionOutOfRange {
                module: module.to_string(),
                struct_name: struct_name.to_string(),
                field: field.to_string(),
                version: library_version.to_string(),
            })
    }
}
