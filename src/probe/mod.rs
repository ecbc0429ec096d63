//! The probe catalog: descriptors, the opaque compiled object wrapper, the
//! loader, the decode/assemble trait, and the embedded-SDK wire format
//! (spec §3 "Probe descriptor", §4.D, §4.I, §9).

pub mod catalog;
pub mod descriptor;
pub mod embedded;
pub mod event;
pub mod loader;
pub mod object;
pub mod wire;

pub use catalog::{embedded_sdk_catalog, standard_catalog, CatalogEntry, Probe, ProbeKind};
pub use descriptor::ProbeDescriptor;
pub use loader::{LoadedProbe, ProbeLoader};
pub use object::ProbeObject;
