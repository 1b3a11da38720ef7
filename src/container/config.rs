//! Service records

use super::health::HealthCheck;
use super::restart::RestartPolicy;
use crate::error::{Result, StackError};
use crate::storage::MountSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// A fully resolved service: one runnable container and its runtime
/// configuration, after variable substitution.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSpec {
    /// Service name
    #[serde(skip)]
    pub name: String,
    /// Image reference
    pub image: String,
    /// Container name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Command arguments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Entrypoint override
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    /// Published ports
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortBinding>,
    /// Container environment
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Mounted volumes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<MountSpec>,
    /// Health check probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Joined networks
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Activation profiles
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    /// Services this one depends on
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Memory limit in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<u64>,
    /// Resource limits
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ulimits: BTreeMap<String, Ulimit>,
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Create a service record with only an image
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            container_name: None,
            command: Vec::new(),
            entrypoint: Vec::new(),
            ports: Vec::new(),
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            healthcheck: None,
            restart: RestartPolicy::default(),
            networks: Vec::new(),
            profiles: Vec::new(),
            depends_on: Vec::new(),
            mem_limit: None,
            ulimits: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Whether the service is gated behind at least one profile
    pub fn is_gated(&self) -> bool {
        !self.profiles.is_empty()
    }

    /// Names of the named volumes this service mounts
    pub fn volume_names(&self) -> impl Iterator<Item = &str> {
        self.volumes.iter().filter_map(|m| m.volume_name())
    }

    /// Host ports this service publishes
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter_map(|p| p.published)
    }
}

/// Network protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(StackError::InvalidPort(format!("unknown protocol '{}'", other))),
        }
    }
}

/// A container port published on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    /// Host interface, all interfaces when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<IpAddr>,
    /// Host port, an ephemeral one when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,
    /// Container port
    pub target: u16,
    /// Protocol
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(published: u16, target: u16) -> Self {
        Self {
            host_ip: None,
            published: Some(published),
            target,
            protocol: Protocol::Tcp,
        }
    }

    /// Parse the short syntax `[HOST_IP:]HOST:CONTAINER[/PROTOCOL]`.
    ///
    /// A bare container port is published on an ephemeral host port. Port
    /// ranges are not supported.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |why: &str| StackError::InvalidPort(format!("'{}': {}", spec, why));

        let (mapping, protocol) = match spec.rsplit_once('/') {
            Some((m, proto)) => (m, proto.parse::<Protocol>()?),
            None => (spec, Protocol::Tcp),
        };

        // IPv6 host addresses are bracketed: [::1]:8080:80
        let (host_ip, ports) = if let Some(rest) = mapping.strip_prefix('[') {
            let (ip, rest) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
            let ports = rest.strip_prefix(':').ok_or_else(|| invalid("missing host port"))?;
            let ip = ip.parse::<IpAddr>().map_err(|_| invalid("bad host address"))?;
            (Some(ip), ports)
        } else {
            match mapping.matches(':').count() {
                0 | 1 => (None, mapping),
                2 => {
                    let (ip, ports) = mapping.split_once(':').ok_or_else(|| invalid("bad mapping"))?;
                    let ip = ip.parse::<IpAddr>().map_err(|_| invalid("bad host address"))?;
                    (Some(ip), ports)
                }
                _ => return Err(invalid("too many ':' separators")),
            }
        };

        let (published, target) = match ports.split_once(':') {
            Some((host, container)) => (Some(parse_port(host, spec)?), parse_port(container, spec)?),
            None => (None, parse_port(ports, spec)?),
        };

        Ok(Self {
            host_ip,
            published,
            target,
            protocol,
        })
    }
}

impl std::fmt::Display for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.host_ip {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:", ip)?,
            Some(ip) => write!(f, "{}:", ip)?,
            None => {}
        }
        match self.published {
            Some(published) => write!(f, "{}:{}/{}", published, self.target, self.protocol),
            None => write!(f, "{}/{}", self.target, self.protocol),
        }
    }
}

fn parse_port(s: &str, spec: &str) -> Result<u16> {
    let s = s.trim();
    if s.contains('-') {
        return Err(StackError::InvalidPort(format!(
            "'{}': port ranges are not supported",
            spec
        )));
    }
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(StackError::InvalidPort(format!(
            "'{}': '{}' is not a port number",
            spec, s
        ))),
        Ok(port) => Ok(port),
    }
}

/// Soft/hard resource limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ulimit {
    pub soft: i64,
    pub hard: i64,
}

/// Split a shell-form command into arguments.
///
/// Whitespace separates words; single quotes are literal, double quotes
/// allow `\"` and `\\` escapes, and quotes may appear mid-word
/// (`--tls_version="TLSv1.2,TLSv1.3"`).
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(StackError::ComposeParse(format!(
                                "unterminated quote in command: {}",
                                command
                            )))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => break,
                        },
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(StackError::ComposeParse(format!(
                                "unterminated quote in command: {}",
                                command
                            )))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        args.push(current);
    }

    Ok(args)
}
