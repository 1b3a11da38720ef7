//! Health check probes

use crate::error::{Result, StackError};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Default probe interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Default probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of consecutive failures before a service is unhealthy
pub const DEFAULT_RETRIES: u32 = 3;

/// Probe command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTest {
    /// Exec form, run without a shell
    Cmd(Vec<String>),
    /// Run through the container's shell
    CmdShell(String),
    /// Disable any health check inherited from the image
    None,
}

impl HealthTest {
    /// Parse the list form: `["CMD", ...]`, `["CMD-SHELL", "..."]` or `["NONE"]`
    pub fn from_parts(parts: &[String]) -> Result<Self> {
        let (kind, args) = parts
            .split_first()
            .ok_or_else(|| StackError::InvalidHealthcheck("test must not be empty".to_string()))?;

        match kind.as_str() {
            "NONE" => Ok(HealthTest::None),
            "CMD" => {
                if args.is_empty() {
                    return Err(StackError::InvalidHealthcheck(
                        "CMD requires a command".to_string(),
                    ));
                }
                Ok(HealthTest::Cmd(args.to_vec()))
            }
            "CMD-SHELL" => {
                if args.is_empty() {
                    return Err(StackError::InvalidHealthcheck(
                        "CMD-SHELL requires a command".to_string(),
                    ));
                }
                Ok(HealthTest::CmdShell(args.join(" ")))
            }
            other => Err(StackError::InvalidHealthcheck(format!(
                "test must start with CMD, CMD-SHELL or NONE, got '{}'",
                other
            ))),
        }
    }

    /// A bare string is run through the shell
    pub fn from_string(command: &str) -> Result<Self> {
        if command.trim().is_empty() {
            return Err(StackError::InvalidHealthcheck("test must not be empty".to_string()));
        }
        Ok(HealthTest::CmdShell(command.to_string()))
    }

    /// Compose list form of the probe
    pub fn to_parts(&self) -> Vec<String> {
        match self {
            HealthTest::Cmd(args) => std::iter::once("CMD".to_string())
                .chain(args.iter().cloned())
                .collect(),
            HealthTest::CmdShell(cmd) => vec!["CMD-SHELL".to_string(), cmd.clone()],
            HealthTest::None => vec!["NONE".to_string()],
        }
    }
}

/// Liveness probe declared by a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub test: HealthTest,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Option<Duration>,
    pub disabled: bool,
}

impl HealthCheck {
    pub fn new(test: HealthTest) -> Self {
        Self {
            disabled: test == HealthTest::None,
            test,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            start_period: None,
        }
    }
}

impl Serialize for HealthCheck {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.start_period.is_some() { 6 } else { 5 };
        let mut state = serializer.serialize_struct("HealthCheck", fields)?;
        state.serialize_field("test", &self.test.to_parts())?;
        state.serialize_field("interval", &format_duration(self.interval))?;
        state.serialize_field("timeout", &format_duration(self.timeout))?;
        state.serialize_field("retries", &self.retries)?;
        if let Some(start) = self.start_period {
            state.serialize_field("start_period", &format_duration(start))?;
        }
        state.serialize_field("disable", &self.disabled)?;
        state.end()
    }
}

/// Parse a duration such as `10s`, `1m30s`, `500ms` or `1.5h`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(StackError::InvalidDuration(input.to_string()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || StackError::InvalidDuration(input.to_string());
    let mut total_nanos: f64 = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_end == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..num_end].parse().map_err(|_| invalid())?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total_nanos += number * scale;
        rest = &rest[unit_end..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration the way compose prints it, e.g. `1m30s`
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let mut out = String::new();
    let total_secs = d.as_secs();
    let (h, m, s) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    let nanos = d.subsec_nanos();
    let (millis, micros, nanos) = (nanos / 1_000_000, (nanos / 1_000) % 1_000, nanos % 1_000);

    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    if micros > 0 {
        out.push_str(&format!("{}us", micros));
    }
    if nanos > 0 {
        out.push_str(&format!("{}ns", nanos));
    }
    out
}
