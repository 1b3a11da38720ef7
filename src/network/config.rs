//! Network configuration

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Network driver types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NetworkDriver {
    /// Bridge network (default)
    #[default]
    Bridge,
    /// Host network
    Host,
    /// No networking
    None,
    /// Overlay network (for Swarm)
    Overlay,
    /// Macvlan network
    Macvlan,
    /// IPvlan network
    Ipvlan,
    /// Third-party driver
    Custom(String),
}

impl std::fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkDriver::Bridge => write!(f, "bridge"),
            NetworkDriver::Host => write!(f, "host"),
            NetworkDriver::None => write!(f, "none"),
            NetworkDriver::Overlay => write!(f, "overlay"),
            NetworkDriver::Macvlan => write!(f, "macvlan"),
            NetworkDriver::Ipvlan => write!(f, "ipvlan"),
            NetworkDriver::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for NetworkDriver {
    fn from(s: &str) -> Self {
        match s {
            "" | "bridge" => NetworkDriver::Bridge,
            "host" => NetworkDriver::Host,
            "none" => NetworkDriver::None,
            "overlay" => NetworkDriver::Overlay,
            "macvlan" => NetworkDriver::Macvlan,
            "ipvlan" => NetworkDriver::Ipvlan,
            other => NetworkDriver::Custom(other.to_string()),
        }
    }
}

impl Serialize for NetworkDriver {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A declared network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    /// Network name
    #[serde(skip)]
    pub name: String,
    /// Network driver
    pub driver: NetworkDriver,
    /// Driver options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_opts: BTreeMap<String, String>,
    /// Internal network (no external access)
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
    /// Created outside this project
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Enable IPv6
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub enable_ipv6: bool,
    /// Network labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl NetworkSpec {
    /// Create a new network declaration
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: NetworkDriver::default(),
            driver_opts: BTreeMap::new(),
            internal: false,
            external: false,
            enable_ipv6: false,
            labels: BTreeMap::new(),
        }
    }

    /// Name the orchestrator gives the network within a project
    pub fn qualified_name(&self, project: &str) -> String {
        if self.external {
            self.name.clone()
        } else {
            format!("{}_{}", project, self.name)
        }
    }
}
