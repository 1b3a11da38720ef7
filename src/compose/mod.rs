//! Compose descriptor handling
//!
//! Parsing, variable substitution, validation and profile-aware resolution
//! of compose descriptors into a typed [`Project`].

pub mod config;
pub mod loader;
pub mod parser;
pub mod profile;
pub mod project;
pub mod validate;

pub use config::{ComposeConfig, ServiceConfig};
pub use loader::{load, load_project, DescriptorSource, LoadOptions, LoadedProject, Prepared};
pub use parser::ComposeParser;
pub use profile::Profiles;
pub use project::{OutputFormat, Project, RenderOptions};
pub use validate::{validate, Issue, Severity, ValidationReport};
