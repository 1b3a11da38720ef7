//! Storage declarations
//!
//! Named volumes and the mounts that bind them into services.

pub mod volume;

pub use volume::{MountKind, MountSpec, VolumeDriver, VolumeSpec};
