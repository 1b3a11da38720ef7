//! Restart policies

use crate::error::{Result, StackError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Restart policy handed to the orchestrator.
///
/// None of the policies carries a backoff; `on-failure` without a retry cap
/// restarts a crashing service forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart
    #[default]
    No,
    /// Always restart
    Always,
    /// Restart when the process exits non-zero
    OnFailure { max_retries: Option<u32> },
    /// Restart unless explicitly stopped
    UnlessStopped,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure { max_retries: None } => write!(f, "on-failure"),
            RestartPolicy::OnFailure {
                max_retries: Some(n),
            } => write!(f, "on-failure:{}", n),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "no" | "" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure { max_retries: None }),
            _ => {
                let retries = s
                    .strip_prefix("on-failure:")
                    .ok_or_else(|| StackError::InvalidRestartPolicy(s.to_string()))?;
                let n = retries
                    .parse::<u32>()
                    .map_err(|_| StackError::InvalidRestartPolicy(s.to_string()))?;
                Ok(RestartPolicy::OnFailure {
                    max_retries: Some(n),
                })
            }
        }
    }
}

impl Serialize for RestartPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RestartPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policies() {
        assert_eq!("no".parse::<RestartPolicy>().unwrap(), RestartPolicy::No);
        assert_eq!("always".parse::<RestartPolicy>().unwrap(), RestartPolicy::Always);
        assert_eq!(
            "on-failure".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure { max_retries: None }
        );
        assert_eq!(
            "on-failure:5".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure {
                max_retries: Some(5)
            }
        );
        assert_eq!(
            "unless-stopped".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::UnlessStopped
        );
    }

    #[test]
    fn test_reject_unknown_policy() {
        assert!("sometimes".parse::<RestartPolicy>().is_err());
        assert!("on-failure:many".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_display_matches_compose_syntax() {
        for text in ["no", "always", "on-failure", "on-failure:3", "unless-stopped"] {
            let policy: RestartPolicy = text.parse().unwrap();
            assert_eq!(policy.to_string(), text);
        }
    }
}
