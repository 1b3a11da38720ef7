//! Structural validation of a compose descriptor

use super::config::{ComposeConfig, ServiceConfig};
use super::project::{
    convert_byte_size, convert_command, convert_healthcheck, convert_mount, convert_port,
    DEFAULT_NETWORK,
};
use crate::container::{PortBinding, Protocol, RestartPolicy};
use crate::storage::MountKind;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}: service '{}': {}", self.severity, service, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Result of validating a descriptor
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn error(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Error, service, message);
    }

    fn warning(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Warning, service, message);
    }

    fn push(&mut self, severity: Severity, service: Option<&str>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity,
            service: service.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A host port claim: conflicts need the same protocol and port, and either
/// the same address or a wildcard on one side.
#[derive(Debug, Clone)]
struct PortClaim {
    service: String,
    host_ip: Option<IpAddr>,
    port: u16,
    protocol: Protocol,
}

impl PortClaim {
    fn conflicts_with(&self, other: &PortClaim) -> bool {
        self.port == other.port
            && self.protocol == other.protocol
            && match (self.host_ip, other.host_ip) {
                (None, _) | (_, None) => true,
                (Some(a), Some(b)) => a == b,
            }
    }
}

static PROFILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("profile name pattern is valid")
});

/// Validate an interpolated descriptor.
///
/// `base_dir` enables checks against the filesystem (bind-mount sources).
/// Inactive, profile-gated services are validated like any other.
pub fn validate(config: &ComposeConfig, base_dir: Option<&Path>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut claims: Vec<PortClaim> = Vec::new();
    let mut container_names: BTreeMap<&str, &str> = BTreeMap::new();
    let mut used_volumes = BTreeSet::new();
    let mut used_networks = BTreeSet::new();

    if config.services.is_empty() {
        report.error(None, "descriptor declares no services");
    }

    for (name, service) in &config.services {
        let svc = Some(name.as_str());

        match service.image.as_deref() {
            Some(image) if !image.trim().is_empty() => {}
            _ => report.error(svc, "'image' must be specified"),
        }

        if let Some(container_name) = service.container_name.as_deref() {
            if let Some(other) = container_names.insert(container_name, name) {
                report.error(
                    svc,
                    format!(
                        "container name '{}' is already used by service '{}'",
                        container_name, other
                    ),
                );
            }
        }

        if let Some(cmd) = &service.command {
            if let Err(e) = convert_command(cmd) {
                report.error(svc, e.to_string());
            }
        }

        check_ports(&mut report, name, service, &mut claims);

        for mount in service.volumes.iter().flatten() {
            let mount = match convert_mount(mount) {
                Ok(m) => m,
                Err(e) => {
                    report.error(svc, e.to_string());
                    continue;
                }
            };
            if let Some(volume) = mount.volume_name() {
                used_volumes.insert(volume.to_string());
                if !config.volumes.contains_key(volume) {
                    report.error(svc, format!("references undeclared volume '{}'", volume));
                }
            }
            if mount.kind == MountKind::Bind {
                if let (Some(dir), Some(source)) = (base_dir, mount.source.as_deref()) {
                    if !source.starts_with('~') && !dir.join(source).exists() {
                        report.warning(
                            svc,
                            format!("bind mount source '{}' does not exist", source),
                        );
                    }
                }
            }
        }

        let networks = service
            .networks
            .as_ref()
            .map(|n| n.names())
            .unwrap_or_else(|| vec![DEFAULT_NETWORK.to_string()]);
        for network in networks {
            if network != DEFAULT_NETWORK && !config.networks.contains_key(&network) {
                report.error(svc, format!("references undeclared network '{}'", network));
            }
            used_networks.insert(network);
        }

        for dep in service.depends_on.iter().flat_map(|d| d.names()) {
            if &dep == name {
                report.error(svc, "depends on itself");
            } else if !config.services.contains_key(&dep) {
                report.error(svc, format!("depends on unknown service '{}'", dep));
            }
        }

        if let Some(restart) = &service.restart {
            if let Err(e) = restart.parse::<RestartPolicy>() {
                report.error(svc, e.to_string());
            }
        }

        match &service.healthcheck {
            Some(hc) => {
                if let Err(e) = convert_healthcheck(hc) {
                    report.error(svc, e.to_string());
                }
            }
            None => report.warning(svc, "no health check declared"),
        }

        for profile in service.profiles.iter().flatten() {
            if !PROFILE_NAME.is_match(profile) {
                report.error(svc, format!("invalid profile name '{}'", profile));
            }
        }

        if let Some(limit) = &service.mem_limit {
            if let Err(e) = convert_byte_size(limit) {
                report.error(svc, e.to_string());
            }
        }
    }

    for volume in config.volumes.keys() {
        if !used_volumes.contains(volume) {
            report.warning(None, format!("volume '{}' is declared but never mounted", volume));
        }
    }
    for network in config.networks.keys() {
        if !used_networks.contains(network) {
            report.warning(None, format!("network '{}' is declared but never joined", network));
        }
    }

    report
}

fn check_ports(
    report: &mut ValidationReport,
    name: &str,
    service: &ServiceConfig,
    claims: &mut Vec<PortClaim>,
) {
    for port in service.ports.iter().flatten() {
        let binding: PortBinding = match convert_port(port) {
            Ok(b) => b,
            Err(e) => {
                report.error(Some(name), e.to_string());
                continue;
            }
        };
        let Some(published) = binding.published else {
            continue;
        };

        let claim = PortClaim {
            service: name.to_string(),
            host_ip: binding.host_ip,
            port: published,
            protocol: binding.protocol,
        };

        if let Some(existing) = claims.iter().find(|c| c.conflicts_with(&claim)) {
            let owner = if existing.service == name {
                "this service".to_string()
            } else {
                format!("service '{}'", existing.service)
            };
            report.error(
                Some(name),
                format!(
                    "host port {}/{} is already published by {}",
                    published, binding.protocol, owner
                ),
            );
        }
        claims.push(claim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;

    fn report(yaml: &str) -> ValidationReport {
        validate(&ComposeParser::parse_str(yaml).unwrap(), None)
    }

    fn error_messages(report: &ValidationReport) -> Vec<String> {
        report.errors().map(|i| i.message.clone()).collect()
    }

    #[test]
    fn test_clean_descriptor() {
        let report = report(
            r#"
services:
  cache:
    image: valkey/valkey:8
    ports: ["6379:6379"]
    volumes: ["cache_data:/data"]
    networks: [backend]
    healthcheck:
      test: ["CMD", "redis-cli", "ping"]
volumes:
  cache_data:
networks:
  backend:
    driver: bridge
"#,
        );
        assert!(report.is_clean(), "{:?}", report.issues);
    }

    #[test]
    fn test_undeclared_references() {
        let report = report(
            r#"
services:
  db:
    image: mysql
    volumes: ["missing_data:/var/lib/mysql"]
    networks: [ghost]
    depends_on: [nobody]
    healthcheck: {test: ["CMD", "true"]}
"#,
        );
        let errors = error_messages(&report);
        assert!(errors.contains(&"references undeclared volume 'missing_data'".to_string()));
        assert!(errors.contains(&"references undeclared network 'ghost'".to_string()));
        assert!(errors.contains(&"depends on unknown service 'nobody'".to_string()));
    }

    #[test]
    fn test_duplicate_host_ports() {
        let report = report(
            r#"
services:
  a:
    image: a
    ports: ["9000:9000"]
    healthcheck: {test: ["CMD", "true"]}
  b:
    image: b
    ports: ["127.0.0.1:9000:80", "9001:81/udp", "9001:82"]
    healthcheck: {test: ["CMD", "true"]}
"#,
        );
        let errors: Vec<&Issue> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].service.as_deref(), Some("b"));
        assert!(errors[0].message.contains("service 'a'"));
    }

    #[test]
    fn test_gated_services_claim_host_ports() {
        let report = report(
            r#"
services:
  app:
    image: app
    ports: ["9200:9200"]
    healthcheck: {test: ["CMD", "true"]}
  search:
    image: elasticsearch:8.11.3
    profiles: [search]
    ports: ["9200:9200"]
    healthcheck: {test: ["CMD", "true"]}
"#,
        );
        let errors: Vec<&Issue> = report.errors().collect();
        assert_eq!(errors.len(), 1, "{:?}", report.issues);
        assert_eq!(errors[0].service.as_deref(), Some("search"));
        assert!(errors[0].message.contains("service 'app'"));
    }

    #[test]
    fn test_distinct_addresses_do_not_conflict() {
        let report = report(
            r#"
services:
  a:
    image: a
    ports: ["127.0.0.1:8080:80"]
    healthcheck: {test: ["CMD", "true"]}
  b:
    image: b
    ports: ["127.0.0.2:8080:80", "8081"]
    healthcheck: {test: ["CMD", "true"]}
"#,
        );
        assert!(!report.has_errors(), "{:?}", report.issues);
    }

    #[test]
    fn test_field_level_errors() {
        let report = report(
            r#"
services:
  broken:
    image: ""
    ports: ["nine:9200"]
    restart: sometimes
    profiles: ["-bad"]
    mem_limit: lots
    healthcheck:
      test: ["CMD", "true"]
      interval: soon
  twin1:
    image: x
    container_name: same
  twin2:
    image: x
    container_name: same
"#,
        );
        let broken = report
            .errors()
            .filter(|i| i.service.as_deref() == Some("broken"))
            .count();
        assert_eq!(broken, 6);
        assert!(report
            .errors()
            .any(|i| i.service.as_deref() == Some("twin2") && i.message.contains("container name")));
        assert_eq!(
            report.warnings().filter(|i| i.message == "no health check declared").count(),
            2
        );
    }

    #[test]
    fn test_unused_declarations_warn() {
        let report = report(
            r#"
services:
  a:
    image: a
    healthcheck: {test: ["CMD", "true"]}
volumes:
  orphan:
networks:
  lonely:
"#,
        );
        assert!(!report.has_errors());
        assert_eq!(report.warnings().count(), 2);
    }

    #[test]
    fn test_missing_bind_source_warns_with_base_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("present.sql"), "").unwrap();
        let config = ComposeParser::parse_str(
            r#"
services:
  db:
    image: mysql
    volumes:
      - ./present.sql:/a.sql
      - ./absent.sql:/b.sql
    healthcheck: {test: ["CMD", "true"]}
"#,
        )
        .unwrap();

        let report = validate(&config, Some(temp.path()));
        let warnings: Vec<&Issue> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("./absent.sql"));
    }
}
