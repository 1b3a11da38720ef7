//! Compose file parser

use super::config::ComposeConfig;
use crate::env::{Environment, Interpolator};
use crate::error::{Result, StackError};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
    "docker-compose-base.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        for name in DEFAULT_COMPOSE_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Read a compose file into an untyped YAML tree
    pub fn read_value(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StackError::ComposeParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_value_str(&content)
    }

    /// Parse YAML text into an untyped tree
    pub fn parse_value_str(content: &str) -> Result<Value> {
        let mut value: Value = serde_yaml::from_str(content)
            .map_err(|e| StackError::ComposeParse(format!("Failed to parse YAML: {}", e)))?;
        value
            .apply_merge()
            .map_err(|e| StackError::ComposeParse(format!("Failed to apply merge keys: {}", e)))?;

        match value {
            Value::Mapping(_) => Ok(value),
            Value::Null => Err(StackError::ComposeParse("compose file is empty".to_string())),
            _ => Err(StackError::ComposeParse(
                "top level of a compose file must be a mapping".to_string(),
            )),
        }
    }

    /// Parse compose file from path, without variable substitution
    pub fn parse_file(path: &Path) -> Result<ComposeConfig> {
        Self::parse_value(Self::read_value(path)?)
    }

    /// Parse compose file from string, without variable substitution
    pub fn parse_str(content: &str) -> Result<ComposeConfig> {
        Self::parse_value(Self::parse_value_str(content)?)
    }

    /// Type an (already interpolated) YAML tree
    pub fn parse_value(value: Value) -> Result<ComposeConfig> {
        serde_yaml::from_value(value)
            .map_err(|e| StackError::ComposeParse(format!("Invalid compose file: {}", e)))
    }

    /// Substitute variables throughout a YAML tree, then type it
    pub fn interpolate(mut value: Value, env: &Environment) -> Result<ComposeConfig> {
        Interpolator::new(env).interpolate_value(&mut value)?;
        Self::parse_value(value)
    }

    /// Merge two compose configurations.
    ///
    /// Scalars and lists set in the overlay replace the base value;
    /// top-level maps are merged by key.
    pub fn merge_configs(base: ComposeConfig, overlay: ComposeConfig) -> ComposeConfig {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }

        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            if let Some(existing) = result.services.get_mut(&name) {
                macro_rules! overlay_fields {
                    ($($field:ident),* $(,)?) => {
                        $(
                            if service.$field.is_some() {
                                existing.$field = service.$field;
                            }
                        )*
                    };
                }
                overlay_fields!(
                    image,
                    container_name,
                    command,
                    entrypoint,
                    environment,
                    env_file,
                    ports,
                    volumes,
                    networks,
                    depends_on,
                    healthcheck,
                    labels,
                    restart,
                    profiles,
                    mem_limit,
                    ulimits,
                );
            } else {
                result.services.insert(name, service);
            }
        }

        for (name, network) in overlay.networks {
            result.networks.insert(name, network);
        }

        for (name, volume) in overlay.volumes {
            result.volumes.insert(name, volume);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_compose() {
        let yaml = r#"
version: "3.8"
services:
  web:
    image: nginx:latest
    ports:
      - "80:80"
  db:
    image: postgres:13
    environment:
      POSTGRES_PASSWORD: secret
      POSTGRES_PORT: 5432
"#;

        let config = ComposeParser::parse_str(yaml).unwrap();
        assert_eq!(config.services.len(), 2);
        assert!(config.services.contains_key("web"));
        assert!(config.services.contains_key("db"));
    }

    #[test]
    fn test_reject_non_mapping_documents() {
        assert!(ComposeParser::parse_str("").is_err());
        assert!(ComposeParser::parse_str("- just\n- a list\n").is_err());
        assert!(ComposeParser::parse_str("services: [").is_err());
    }

    #[test]
    fn test_extension_fields_are_tolerated() {
        let yaml = r#"
x-common: &common
  restart: on-failure
services:
  cache:
    <<: *common
    image: valkey/valkey:8
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert_eq!(config.services["cache"].image.as_deref(), Some("valkey/valkey:8"));
        assert_eq!(config.services["cache"].restart.as_deref(), Some("on-failure"));
    }

    #[test]
    fn test_interpolate_then_type() {
        let env = Environment::from_pairs([("REDIS_PORT", "6379"), ("MEM_LIMIT", "1g")]);
        let value = ComposeParser::parse_value_str(
            r#"
services:
  redis:
    image: valkey/valkey:8
    ports:
      - ${REDIS_PORT}:6379
    mem_limit: ${MEM_LIMIT}
"#,
        )
        .unwrap();

        let config = ComposeParser::interpolate(value, &env).unwrap();
        let redis = &config.services["redis"];
        match redis.ports.as_ref().unwrap().first() {
            Some(crate::compose::config::PortConfig::Short(s)) => assert_eq!(s, "6379:6379"),
            other => panic!("unexpected port config: {:?}", other),
        }
        assert!(matches!(
            redis.mem_limit,
            Some(crate::compose::config::ByteSize::Text(ref s)) if s == "1g"
        ));
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = ComposeParser::parse_str(
            r#"
name: base
services:
  db:
    image: mysql:8.0.39
    restart: on-failure
volumes:
  db_data:
"#,
        )
        .unwrap();
        let overlay = ComposeParser::parse_str(
            r#"
services:
  db:
    image: mysql:8.4
  cache:
    image: valkey/valkey:8
volumes:
  cache_data:
"#,
        )
        .unwrap();

        let merged = ComposeParser::merge_configs(base, overlay);
        assert_eq!(merged.name.as_deref(), Some("base"));
        assert_eq!(merged.services["db"].image.as_deref(), Some("mysql:8.4"));
        assert_eq!(merged.services["db"].restart.as_deref(), Some("on-failure"));
        assert_eq!(merged.services.len(), 2);
        assert_eq!(merged.volumes.len(), 2);
    }

    #[test]
    fn test_find_compose_file() {
        let temp = tempfile::tempdir().unwrap();
        assert!(ComposeParser::find_compose_file(temp.path()).is_none());

        std::fs::write(temp.path().join("docker-compose-base.yml"), "services: {}\n").unwrap();
        std::fs::write(
            temp.path().join("compose.yaml"),
            "services:\n  cache:\n    image: valkey/valkey:8\n",
        )
        .unwrap();
        let found = ComposeParser::find_compose_file(temp.path());
        assert_eq!(found, Some(temp.path().join("compose.yaml")));

        let config = ComposeParser::parse_file(&found.unwrap()).unwrap();
        assert_eq!(config.services.len(), 1);
        assert!(ComposeParser::parse_file(&temp.path().join("absent.yaml")).is_err());
    }
}
