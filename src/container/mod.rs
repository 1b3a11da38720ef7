//! Service records
//!
//! Typed, fully resolved descriptions of the containers the descriptor asks
//! an orchestrator to run.

pub mod config;
pub mod health;
pub mod restart;

pub use config::{split_command, PortBinding, Protocol, ServiceSpec, Ulimit};
pub use health::{format_duration, parse_duration, HealthCheck, HealthTest};
pub use restart::RestartPolicy;
