//! Compose descriptor types
//!
//! These mirror the raw document after variable substitution and before any
//! value is checked. [`crate::compose::Project`] turns them into typed
//! records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compose file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Compose file version (obsolete, accepted and ignored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Networks
    #[serde(default)]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    /// Volumes
    #[serde(default)]
    pub volumes: BTreeMap<String, Option<VolumeConfig>>,
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name
    #[serde(default)]
    pub image: Option<String>,
    /// Container name
    #[serde(default)]
    pub container_name: Option<String>,
    /// Command to run
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default)]
    pub entrypoint: Option<CommandConfig>,
    /// Environment variables
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    /// Environment file
    #[serde(default)]
    pub env_file: Option<EnvFileConfig>,
    /// Port mappings
    #[serde(default)]
    pub ports: Option<Vec<PortConfig>>,
    /// Volume mounts
    #[serde(default)]
    pub volumes: Option<Vec<VolumeMount>>,
    /// Networks to connect to
    #[serde(default)]
    pub networks: Option<NetworksConfig>,
    /// Service dependencies
    #[serde(default)]
    pub depends_on: Option<DependsOnConfig>,
    /// Healthcheck configuration
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Restart policy
    #[serde(default)]
    pub restart: Option<String>,
    /// Profiles
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
    /// Memory limit
    #[serde(default)]
    pub mem_limit: Option<ByteSize>,
    /// Ulimits
    #[serde(default)]
    pub ulimits: Option<BTreeMap<String, UlimitConfig>>,
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// A scalar that may be written unquoted in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::String(s) => write!(f, "{}", s),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(x) => write!(f, "{}", x),
            ScalarValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<ScalarValue>>),
}

/// Env file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileConfig {
    /// Single file
    Single(String),
    /// Multiple files
    Multiple(Vec<String>),
}

impl EnvFileConfig {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            EnvFileConfig::Single(path) => vec![path.as_str()],
            EnvFileConfig::Multiple(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Bare container port: `6379`
    Number(u16),
    /// Short syntax: "8080:80"
    Short(String),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u16,
    /// Published port on host
    pub published: Option<ScalarValue>,
    /// Host IP to bind to
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    pub protocol: Option<String>,
}

/// Volume mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMount {
    /// Short syntax: "source:target:mode"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type (volume, bind, tmpfs)
    #[serde(rename = "type")]
    pub mount_type: Option<String>,
    /// Source path or volume name
    pub source: Option<String>,
    /// Target path in container
    pub target: String,
    /// Read only
    pub read_only: Option<bool>,
}

/// Networks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworksConfig {
    /// Array of network names
    Array(Vec<String>),
    /// Map of network name to config
    Map(BTreeMap<String, Option<ServiceNetworkConfig>>),
}

impl NetworksConfig {
    pub fn names(&self) -> Vec<String> {
        match self {
            NetworksConfig::Array(arr) => arr.clone(),
            NetworksConfig::Map(map) => map.keys().cloned().collect(),
        }
    }
}

/// Service network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    /// Aliases
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

/// Depends on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, DependsOnCondition>),
}

impl DependsOnConfig {
    pub fn names(&self) -> Vec<String> {
        match self {
            DependsOnConfig::Array(arr) => arr.clone(),
            DependsOnConfig::Map(map) => map.keys().cloned().collect(),
        }
    }
}

/// Depends on condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    pub condition: String,
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Test command
    pub test: Option<HealthcheckTest>,
    /// Interval
    pub interval: Option<String>,
    /// Timeout
    pub timeout: Option<String>,
    /// Retries
    pub retries: Option<u32>,
    /// Start period
    pub start_period: Option<String>,
    /// Disable healthcheck
    pub disable: Option<bool>,
}

/// Healthcheck test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthcheckTest {
    /// Command string
    Command(String),
    /// Command array
    Array(Vec<String>),
}

/// Labels configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsConfig {
    /// Array of "key=value" strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, ScalarValue>),
}

/// Memory size, as bytes or with a unit suffix (`512m`, `2g`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Text(String),
}

/// Ulimit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UlimitConfig {
    /// Single value (same for soft and hard)
    Single(i64),
    /// Separate soft and hard limits
    SoftHard { soft: i64, hard: i64 },
}

/// Network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Driver
    pub driver: Option<String>,
    /// Driver options
    #[serde(default)]
    pub driver_opts: Option<BTreeMap<String, String>>,
    /// External network
    pub external: Option<ExternalConfig>,
    /// Internal network
    pub internal: Option<bool>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Enable IPv6
    pub enable_ipv6: Option<bool>,
}

/// Volume configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Driver
    pub driver: Option<String>,
    /// Driver options
    #[serde(default)]
    pub driver_opts: Option<BTreeMap<String, String>>,
    /// External volume
    pub external: Option<ExternalConfig>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
}

/// External resource configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    /// Boolean
    Bool(bool),
    /// With name
    Named { name: String },
}

impl ExternalConfig {
    pub fn is_external(&self) -> bool {
        match self {
            ExternalConfig::Bool(b) => *b,
            ExternalConfig::Named { .. } => true,
        }
    }
}
