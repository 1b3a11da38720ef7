//! ragstack - the RAGFlow base service stack as a typed descriptor
//!
//! ragstack loads the compose descriptor for RAGFlow's backing services
//! (Elasticsearch, Infinity, MySQL, MinIO and Valkey), resolves it against an
//! environment and checks it before any container engine sees it:
//!
//! - `.env` parsing and compose-style variable substitution
//! - Typed services, volumes and networks
//! - Validation of ports, references, health checks and restart policies
//! - Profile-aware activation and rendering
//! - Host port availability probing

pub mod compose;
pub mod container;
pub mod env;
pub mod error;
pub mod network;
pub mod probe;
pub mod stack;
pub mod storage;

pub use error::{Result, StackError};
