//! Network declarations
//!
//! Services discover each other by name on the networks they share.

pub mod config;

pub use config::{NetworkDriver, NetworkSpec};
