//! Resolved compose project

use super::config::{
    ByteSize, CommandConfig, ComposeConfig, EnvironmentConfig, HealthcheckConfig, HealthcheckTest,
    LabelsConfig, PortConfig, ScalarValue, ServiceConfig, UlimitConfig, VolumeMount,
};
use super::profile::Profiles;
use crate::container::{
    parse_duration, split_command, HealthCheck, HealthTest, PortBinding, Protocol, RestartPolicy,
    ServiceSpec, Ulimit,
};
use crate::env::EnvFile;
use crate::error::{Result, StackError};
use crate::network::{NetworkDriver, NetworkSpec};
use crate::storage::{MountKind, MountSpec, VolumeDriver, VolumeSpec};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Network every service joins when it lists none
pub const DEFAULT_NETWORK: &str = "default";

/// Env file entries as read from disk (or from memory)
pub type EnvEntries = Vec<(String, String)>;

/// A loaded descriptor: typed services, volumes and networks
#[derive(Debug, Clone)]
pub struct Project {
    /// Project name
    pub name: String,
    /// Services, by name
    pub services: BTreeMap<String, ServiceSpec>,
    /// Declared volumes, by name
    pub volumes: BTreeMap<String, VolumeSpec>,
    /// Declared networks, by name
    pub networks: BTreeMap<String, NetworkSpec>,
    /// Directory relative paths are resolved against
    pub working_dir: Option<PathBuf>,
}

/// Output format for [`Project::render`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Options for [`Project::render`]
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub format: OutputFormat,
    /// Mask environment values whose keys look like secrets, and those
    /// values wherever else they appear in the service
    pub redact: bool,
}

const REDACTED: &str = "********";
const SECRET_MARKERS: &[&str] = &["PASSWORD", "SECRET", "TOKEN", "KEY"];

#[derive(Serialize)]
struct RenderedProject<'a> {
    name: &'a str,
    services: BTreeMap<&'a str, ServiceSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<&'a str, Qualified<'a, NetworkSpec>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<&'a str, Qualified<'a, VolumeSpec>>,
}

/// A declaration rendered with the name it gets within the project
#[derive(Serialize)]
struct Qualified<'a, T> {
    name: String,
    #[serde(flatten)]
    spec: &'a T,
}

impl Project {
    /// Build a project whose `env_file` entries are read relative to `dir`
    pub fn from_config_in(name: &str, config: &ComposeConfig, dir: &Path) -> Result<Self> {
        let mut project =
            Self::from_config(name, config, |path| EnvFile::load(&dir.join(path)))?;
        project.working_dir = Some(dir.to_path_buf());
        Ok(project)
    }

    /// Build a project from an interpolated descriptor.
    ///
    /// `read_env_file` supplies the entries of each `env_file` a service
    /// names; they are applied before the service's own `environment`.
    pub fn from_config<F>(name: &str, config: &ComposeConfig, read_env_file: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<EnvEntries>,
    {
        let mut env_files: BTreeMap<String, EnvEntries> = BTreeMap::new();
        let mut services = BTreeMap::new();

        for (service_name, service) in &config.services {
            if let Some(files) = &service.env_file {
                for path in files.paths() {
                    if !env_files.contains_key(path) {
                        env_files.insert(path.to_string(), read_env_file(path)?);
                    }
                }
            }
            let spec = convert_service(service_name, service, &env_files)?;
            services.insert(service_name.clone(), spec);
        }

        let mut volumes = BTreeMap::new();
        for (volume_name, volume) in &config.volumes {
            let mut spec = VolumeSpec::new(volume_name);
            if let Some(v) = volume {
                if let Some(driver) = &v.driver {
                    spec.driver = VolumeDriver::from(driver.as_str());
                }
                spec.driver_opts = v.driver_opts.clone().unwrap_or_default();
                spec.external = v.external.as_ref().is_some_and(|e| e.is_external());
                spec.labels = convert_labels(v.labels.as_ref());
            }
            volumes.insert(volume_name.clone(), spec);
        }

        let mut networks = BTreeMap::new();
        for (network_name, network) in &config.networks {
            let mut spec = NetworkSpec::new(network_name);
            if let Some(n) = network {
                if let Some(driver) = &n.driver {
                    spec.driver = NetworkDriver::from(driver.as_str());
                }
                spec.driver_opts = n.driver_opts.clone().unwrap_or_default();
                spec.internal = n.internal.unwrap_or(false);
                spec.external = n.external.as_ref().is_some_and(|e| e.is_external());
                spec.enable_ipv6 = n.enable_ipv6.unwrap_or(false);
                spec.labels = convert_labels(n.labels.as_ref());
            }
            networks.insert(network_name.clone(), spec);
        }

        let uses_default = services
            .values()
            .any(|s: &ServiceSpec| s.networks.iter().any(|n| n == DEFAULT_NETWORK));
        if uses_default && !networks.contains_key(DEFAULT_NETWORK) {
            networks.insert(DEFAULT_NETWORK.to_string(), NetworkSpec::new(DEFAULT_NETWORK));
        }

        tracing::debug!(
            "Built project {} with {} services, {} volumes, {} networks",
            name,
            services.len(),
            volumes.len(),
            networks.len()
        );

        Ok(Self {
            name: name.to_string(),
            services,
            volumes,
            networks,
            working_dir: None,
        })
    }

    /// Get a service by name
    pub fn service(&self, name: &str) -> Result<&ServiceSpec> {
        self.services
            .get(name)
            .ok_or_else(|| StackError::ServiceNotFound(name.to_string()))
    }

    /// Every profile some service declares
    pub fn declared_profiles(&self) -> BTreeSet<&str> {
        self.services
            .values()
            .flat_map(|s| s.profiles.iter().map(String::as_str))
            .collect()
    }

    /// Services instantiated under `selection`, in name order.
    ///
    /// Fails when a selected profile or service does not exist, or when an
    /// active service depends on an inactive one.
    pub fn active_services(&self, selection: &Profiles) -> Result<Vec<&ServiceSpec>> {
        let declared = self.declared_profiles();
        for profile in selection.profiles() {
            if profile != super::profile::ALL_PROFILES && !declared.contains(profile) {
                return Err(StackError::UnknownProfile(profile.to_string()));
            }
        }
        for name in selection.services() {
            self.service(name)?;
        }

        let active: Vec<&ServiceSpec> = self
            .services
            .values()
            .filter(|s| selection.activates(s))
            .collect();

        for service in &active {
            for dep in &service.depends_on {
                let target = self.service(dep)?;
                if !selection.activates(target) {
                    return Err(StackError::InvalidConfig(format!(
                        "service '{}' depends on '{}', which is gated behind profile(s) {}",
                        service.name,
                        dep,
                        target.profiles.join(", ")
                    )));
                }
            }
        }

        Ok(active)
    }

    /// Render the active part of the project as a compose document
    pub fn render(&self, selection: &Profiles, options: &RenderOptions) -> Result<String> {
        let active = self.active_services(selection)?;

        let mut rendered = RenderedProject {
            name: &self.name,
            services: BTreeMap::new(),
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
        };

        for service in active {
            for network in &service.networks {
                if let Some(spec) = self.networks.get(network) {
                    let name = spec.qualified_name(&self.name);
                    rendered.networks.insert(network, Qualified { name, spec });
                }
            }
            for volume in service.volume_names() {
                if let Some((key, spec)) = self.volumes.get_key_value(volume) {
                    let name = spec.qualified_name(&self.name);
                    rendered.volumes.insert(key, Qualified { name, spec });
                }
            }

            let mut resolved = service.clone();
            if options.redact {
                redact_service(&mut resolved);
            }
            rendered.services.insert(&service.name, resolved);
        }

        match options.format {
            OutputFormat::Yaml => Ok(serde_yaml::to_string(&rendered)?),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&rendered)?),
        }
    }

    /// SHA-256 of a service's canonical JSON form.
    ///
    /// Changes whenever any resolved setting of the service changes.
    pub fn config_hash(&self, service: &str) -> Result<String> {
        let spec = self.service(service)?;
        let canonical = serde_json::to_vec(spec)?;
        let digest = Sha256::digest(&canonical);
        Ok(format!("{:x}", digest))
    }

    /// Published host ports with the services that claim them
    pub fn host_ports(&self) -> Vec<(&ServiceSpec, &PortBinding)> {
        let mut ports: Vec<(&ServiceSpec, &PortBinding)> = self
            .services
            .values()
            .flat_map(|s| s.ports.iter().map(move |p| (s, p)))
            .filter(|(_, p)| p.published.is_some())
            .collect();
        ports.sort_by_key(|(_, p)| (p.published, p.protocol));
        ports
    }
}

/// Whether a variable name looks like it holds a credential
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

/// Mask a value when its key looks like a credential
pub fn redact_value<'a>(key: &str, value: &'a str) -> &'a str {
    if is_secret_key(key) && !value.is_empty() {
        REDACTED
    } else {
        value
    }
}

/// Mask credential-like environment values, and every occurrence of those
/// values in the environment, command, entrypoint and health check.
fn redact_service(service: &mut ServiceSpec) {
    let mut secrets: Vec<String> = service
        .environment
        .iter()
        .filter(|(key, value)| is_secret_key(key) && !value.is_empty())
        .map(|(_, value)| value.clone())
        .collect();
    secrets.sort();
    secrets.dedup();
    // longest first, so a secret containing another is masked whole
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mask = |text: &mut String| {
        for secret in &secrets {
            if text.contains(secret.as_str()) {
                *text = text.replace(secret.as_str(), REDACTED);
            }
        }
    };

    for (key, value) in service.environment.iter_mut() {
        if is_secret_key(key) && !value.is_empty() {
            *value = REDACTED.to_string();
        } else {
            mask(value);
        }
    }
    service
        .command
        .iter_mut()
        .chain(service.entrypoint.iter_mut())
        .for_each(|arg| mask(arg));
    if let Some(check) = &mut service.healthcheck {
        match &mut check.test {
            HealthTest::Cmd(args) => args.iter_mut().for_each(|arg| mask(arg)),
            HealthTest::CmdShell(command) => mask(command),
            HealthTest::None => {}
        }
    }
}

fn convert_service(
    name: &str,
    service: &ServiceConfig,
    env_files: &BTreeMap<String, EnvEntries>,
) -> Result<ServiceSpec> {
    let image = service
        .image
        .as_deref()
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| {
            StackError::ComposeParse(format!("Service '{}' must have 'image' specified", name))
        })?;

    let mut spec = ServiceSpec::new(name, image);
    spec.container_name = service.container_name.clone();

    if let Some(cmd) = &service.command {
        spec.command = convert_command(cmd)?;
    }
    if let Some(ep) = &service.entrypoint {
        spec.entrypoint = convert_command(ep)?;
    }

    if let Some(files) = &service.env_file {
        for path in files.paths() {
            if let Some(entries) = env_files.get(path) {
                for (key, value) in entries {
                    spec.environment.insert(key.clone(), value.clone());
                }
            }
        }
    }
    if let Some(environment) = &service.environment {
        apply_environment(&mut spec.environment, environment);
    }

    for port in service.ports.iter().flatten() {
        spec.ports.push(convert_port(port)?);
    }
    for mount in service.volumes.iter().flatten() {
        spec.volumes.push(convert_mount(mount)?);
    }

    spec.networks = match &service.networks {
        Some(networks) => networks.names(),
        None => vec![DEFAULT_NETWORK.to_string()],
    };

    if let Some(hc) = &service.healthcheck {
        spec.healthcheck = Some(convert_healthcheck(hc)?);
    }
    if let Some(restart) = &service.restart {
        spec.restart = restart.parse::<RestartPolicy>()?;
    }

    spec.profiles = service.profiles.clone().unwrap_or_default();
    spec.depends_on = service
        .depends_on
        .as_ref()
        .map(|d| d.names())
        .unwrap_or_default();

    if let Some(limit) = &service.mem_limit {
        spec.mem_limit = Some(convert_byte_size(limit)?);
    }
    if let Some(ulimits) = &service.ulimits {
        for (key, limit) in ulimits {
            let ulimit = match limit {
                UlimitConfig::Single(v) => Ulimit { soft: *v, hard: *v },
                UlimitConfig::SoftHard { soft, hard } => Ulimit {
                    soft: *soft,
                    hard: *hard,
                },
            };
            spec.ulimits.insert(key.clone(), ulimit);
        }
    }
    spec.labels = convert_labels(service.labels.as_ref());

    Ok(spec)
}

/// `KEY=value` entries set a value; a bare `KEY` (or a null map value) leaves
/// the key unset.
fn apply_environment(target: &mut BTreeMap<String, String>, environment: &EnvironmentConfig) {
    match environment {
        EnvironmentConfig::Array(arr) => {
            for item in arr {
                if let Some((key, value)) = item.split_once('=') {
                    target.insert(key.to_string(), value.to_string());
                }
            }
        }
        EnvironmentConfig::Map(map) => {
            for (key, value) in map {
                if let Some(v) = value {
                    target.insert(key.clone(), v.to_string());
                }
            }
        }
    }
}

fn convert_labels(labels: Option<&LabelsConfig>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match labels {
        Some(LabelsConfig::Array(arr)) => {
            for item in arr {
                match item.split_once('=') {
                    Some((k, v)) => out.insert(k.to_string(), v.to_string()),
                    None => out.insert(item.clone(), String::new()),
                };
            }
        }
        Some(LabelsConfig::Map(map)) => {
            for (k, v) in map {
                out.insert(k.clone(), v.to_string());
            }
        }
        None => {}
    }
    out
}

pub(crate) fn convert_command(cmd: &CommandConfig) -> Result<Vec<String>> {
    match cmd {
        CommandConfig::Shell(s) => split_command(s),
        CommandConfig::Exec(arr) => Ok(arr.clone()),
    }
}

pub(crate) fn convert_port(port: &PortConfig) -> Result<PortBinding> {
    match port {
        PortConfig::Number(p) => PortBinding::parse(&p.to_string()),
        PortConfig::Short(s) => PortBinding::parse(s),
        PortConfig::Long(long) => {
            let published = match &long.published {
                None => None,
                Some(ScalarValue::Int(n)) => Some(u16::try_from(*n).ok().filter(|p| *p > 0).ok_or_else(
                    || StackError::InvalidPort(format!("published port {} out of range", n)),
                )?),
                Some(ScalarValue::String(s)) => {
                    let parsed = PortBinding::parse(&format!("{}:{}", s, long.target))?;
                    parsed.published
                }
                Some(other) => {
                    return Err(StackError::InvalidPort(format!(
                        "published port must be a number, got {}",
                        other
                    )))
                }
            };
            let host_ip = long
                .host_ip
                .as_deref()
                .map(|ip| {
                    ip.parse::<IpAddr>()
                        .map_err(|_| StackError::InvalidPort(format!("bad host_ip '{}'", ip)))
                })
                .transpose()?;
            let protocol = match &long.protocol {
                Some(p) => p.parse::<Protocol>()?,
                None => Protocol::Tcp,
            };
            if long.target == 0 {
                return Err(StackError::InvalidPort("target port 0".to_string()));
            }
            Ok(PortBinding {
                host_ip,
                published,
                target: long.target,
                protocol,
            })
        }
    }
}

pub(crate) fn convert_mount(mount: &VolumeMount) -> Result<MountSpec> {
    match mount {
        VolumeMount::Short(s) => MountSpec::parse(s),
        VolumeMount::Long(long) => {
            if !long.target.starts_with('/') {
                return Err(StackError::InvalidVolume(format!(
                    "target '{}' must be an absolute path",
                    long.target
                )));
            }
            let kind = match long.mount_type.as_deref() {
                Some("volume") => MountKind::Volume,
                Some("bind") => MountKind::Bind,
                Some("tmpfs") => MountKind::Tmpfs,
                Some(other) => {
                    return Err(StackError::InvalidVolume(format!(
                        "unsupported mount type '{}'",
                        other
                    )))
                }
                None => match long.source.as_deref() {
                    Some(s) if s.starts_with('.') || s.starts_with('/') => MountKind::Bind,
                    _ => MountKind::Volume,
                },
            };
            if kind == MountKind::Bind && long.source.is_none() {
                return Err(StackError::InvalidVolume(format!(
                    "bind mount to '{}' needs a source",
                    long.target
                )));
            }
            Ok(MountSpec {
                kind,
                source: long.source.clone(),
                target: long.target.clone(),
                read_only: long.read_only.unwrap_or(false),
            })
        }
    }
}

pub(crate) fn convert_healthcheck(hc: &HealthcheckConfig) -> Result<HealthCheck> {
    if hc.disable == Some(true) {
        return Ok(HealthCheck::new(HealthTest::None));
    }

    let test = match &hc.test {
        Some(HealthcheckTest::Array(parts)) => HealthTest::from_parts(parts)?,
        Some(HealthcheckTest::Command(cmd)) => HealthTest::from_string(cmd)?,
        None => {
            return Err(StackError::InvalidHealthcheck(
                "test is required unless the check is disabled".to_string(),
            ))
        }
    };

    let mut check = HealthCheck::new(test);
    if let Some(interval) = &hc.interval {
        check.interval = parse_duration(interval)?;
    }
    if let Some(timeout) = &hc.timeout {
        check.timeout = parse_duration(timeout)?;
    }
    if let Some(retries) = hc.retries {
        check.retries = retries;
    }
    if let Some(start) = &hc.start_period {
        check.start_period = Some(parse_duration(start)?);
    }
    Ok(check)
}

pub(crate) fn convert_byte_size(size: &ByteSize) -> Result<u64> {
    match size {
        ByteSize::Bytes(n) => Ok(*n),
        ByteSize::Text(s) => parse_byte_size(s),
    }
}

/// Parse `8073741824`, `512m`, `2g`, `64kb` (binary multiples)
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let s = input.trim().to_ascii_lowercase();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let invalid = || StackError::InvalidConfig(format!("invalid memory size '{}'", input));

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return Err(invalid()),
    };
    value.checked_mul(multiplier).ok_or_else(invalid)
}
