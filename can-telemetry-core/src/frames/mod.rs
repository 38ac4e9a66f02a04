//! Frame layouts
//!
//! Static descriptors for every frame identifier the vehicle emits.

pub mod catalog;
pub mod descriptor;

pub use catalog::{ais, ids, CatalogStats, FrameCatalog};
pub use descriptor::{FieldRange, FieldSpec, FrameDescriptor, FrameKind, Rounding};
