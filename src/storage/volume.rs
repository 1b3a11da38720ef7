//! Volume declarations and service mounts

use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Volume driver types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VolumeDriver {
    /// Local filesystem driver
    #[default]
    Local,
    /// Custom driver
    Custom(String),
}

impl std::fmt::Display for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeDriver::Local => write!(f, "local"),
            VolumeDriver::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for VolumeDriver {
    fn from(s: &str) -> Self {
        match s {
            "" | "local" => VolumeDriver::Local,
            other => VolumeDriver::Custom(other.to_string()),
        }
    }
}

impl Serialize for VolumeDriver {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A named persistent volume.
///
/// Data outlives container recreation; only explicit volume deletion
/// removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSpec {
    /// Volume name
    #[serde(skip)]
    pub name: String,
    /// Volume driver
    pub driver: VolumeDriver,
    /// Driver options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_opts: BTreeMap<String, String>,
    /// Created outside this project
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl VolumeSpec {
    /// Create a local volume
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: VolumeDriver::Local,
            driver_opts: BTreeMap::new(),
            external: false,
            labels: BTreeMap::new(),
        }
    }

    /// Name the orchestrator gives the volume within a project
    pub fn qualified_name(&self, project: &str) -> String {
        if self.external {
            self.name.clone()
        } else {
            format!("{}_{}", project, self.name)
        }
    }
}

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Named volume
    Volume,
    /// Host path
    Bind,
    /// In-memory filesystem
    Tmpfs,
}

/// A volume mounted into a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    #[serde(rename = "type")]
    pub kind: MountKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

impl MountSpec {
    /// Parse the short syntax `SOURCE:TARGET[:MODE]` or a bare `TARGET`.
    ///
    /// Sources starting with `.`, `/` or `~` are host paths; anything else
    /// names a volume.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |why: &str| StackError::InvalidVolume(format!("'{}': {}", spec, why));
        let parts: Vec<&str> = spec.split(':').collect();

        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, mode] => (Some(*source), *target, Some(*mode)),
            _ => return Err(invalid("expected SOURCE:TARGET[:MODE]")),
        };

        if !target.starts_with('/') {
            return Err(invalid("target must be an absolute path"));
        }

        let read_only = match mode {
            None => false,
            Some(mode) => {
                let mut ro = false;
                for opt in mode.split(',') {
                    match opt {
                        "ro" => ro = true,
                        "rw" | "z" | "Z" | "cached" | "delegated" | "consistent" | "nocopy" => {}
                        other => return Err(invalid(&format!("unknown mode '{}'", other))),
                    }
                }
                ro
            }
        };

        let kind = match source {
            None => MountKind::Volume,
            Some("") => return Err(invalid("empty source")),
            Some(s) if is_host_path(s) => MountKind::Bind,
            Some(_) => MountKind::Volume,
        };

        Ok(Self {
            kind,
            source: source.map(str::to_string),
            target: target.to_string(),
            read_only,
        })
    }

    /// The named volume this mount refers to, if any.
    ///
    /// Anonymous volumes (no source) have no name.
    pub fn volume_name(&self) -> Option<&str> {
        match self.kind {
            MountKind::Volume => self.source.as_deref(),
            _ => None,
        }
    }
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('.') || source.starts_with('/') || source.starts_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_volume() {
        let mount = MountSpec::parse("mysql_data:/var/lib/mysql").unwrap();
        assert_eq!(mount.kind, MountKind::Volume);
        assert_eq!(mount.volume_name(), Some("mysql_data"));
        assert_eq!(mount.target, "/var/lib/mysql");
        assert!(!mount.read_only);
    }

    #[test]
    fn test_parse_bind_mount() {
        let mount = MountSpec::parse("./init.sql:/data/application/init.sql:ro").unwrap();
        assert_eq!(mount.kind, MountKind::Bind);
        assert_eq!(mount.volume_name(), None);
        assert!(mount.read_only);
    }

    #[test]
    fn test_parse_anonymous_volume() {
        let mount = MountSpec::parse("/var/cache").unwrap();
        assert_eq!(mount.kind, MountKind::Volume);
        assert_eq!(mount.volume_name(), None);
    }

    #[test]
    fn test_reject_bad_mounts() {
        for bad in ["data:relative", "a:/b:c:d", ":/data", "data:/data:bogus"] {
            assert!(MountSpec::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_volume_qualified_name() {
        let mut volume = VolumeSpec::new("esdata01");
        assert_eq!(volume.driver, VolumeDriver::from("local"));
        assert_eq!(volume.qualified_name("ragflow"), "ragflow_esdata01");

        volume.external = true;
        assert_eq!(volume.qualified_name("ragflow"), "esdata01");
        assert_eq!(VolumeDriver::from("nfs").to_string(), "nfs");
    }
}
