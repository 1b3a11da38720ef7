//! The shipped RAGFlow base stack
//!
//! The descriptor, its default `.env` and the MySQL bootstrap script are
//! compiled into the binary so the stack can be inspected or materialised
//! without a checkout.

use crate::compose::loader::{embedded_env_file, ensure_valid, normalize_project_name};
use crate::compose::{validate, ComposeParser, Profiles, Project};
use crate::env::{Environment, DEFAULT_ENV_FILE};
use crate::error::{Result, StackError};
use std::path::{Path, PathBuf};

/// File name of the shipped descriptor
pub const DESCRIPTOR_FILE: &str = "docker-compose-base.yml";
/// File name of the MySQL bootstrap script
pub const INIT_SQL_FILE: &str = "init.sql";

const BASE_DESCRIPTOR: &str = include_str!("../docker/docker-compose-base.yml");
const DEFAULT_ENV: &str = include_str!("../docker/.env");
const INIT_SQL: &str = include_str!("../docker/init.sql");

/// Project name used when the descriptor does not set one
const DEFAULT_PROJECT_NAME: &str = "ragflow";

/// The shipped descriptor text
pub fn base_descriptor() -> &'static str {
    BASE_DESCRIPTOR
}

/// The shipped `.env` text
pub fn default_env() -> &'static str {
    DEFAULT_ENV
}

/// Load the shipped descriptor against `env`.
///
/// Each service's `env_file: .env` resolves to the bindings in `env`.
/// Bind-mount sources are not checked on disk.
pub fn load_base(env: &Environment, profiles: &Profiles) -> Result<Project> {
    let value = ComposeParser::parse_value_str(BASE_DESCRIPTOR)?;
    let config = ComposeParser::interpolate(value, env)?;
    ensure_valid(&validate(&config, None))?;

    let name = normalize_project_name(config.name.as_deref().unwrap_or(DEFAULT_PROJECT_NAME))?;
    let entries: Vec<(String, String)> = env
        .iter()
        .map(|(key, binding)| (key.clone(), binding.value.clone()))
        .collect();
    let project = Project::from_config(&name, &config, |path| embedded_env_file(path, &entries))?;

    project.active_services(profiles)?;
    Ok(project)
}

/// Write the descriptor, `.env` and `init.sql` into `dir`.
///
/// Existing files are left alone unless `force` is set. Returns the paths
/// written.
pub fn write_to(dir: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let files = [
        (DESCRIPTOR_FILE, BASE_DESCRIPTOR),
        (DEFAULT_ENV_FILE, DEFAULT_ENV),
        (INIT_SQL_FILE, INIT_SQL),
    ];

    if !force {
        if let Some(existing) = files
            .iter()
            .map(|(name, _)| dir.join(name))
            .find(|path| path.exists())
        {
            return Err(StackError::InvalidConfig(format!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            )));
        }
    }

    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        tracing::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{OutputFormat, RenderOptions};
    use crate::container::{PortBinding, RestartPolicy};
    use crate::network::NetworkDriver;
    use crate::storage::VolumeDriver;
    use std::collections::BTreeSet;

    const FIXTURE: &str = "\
STACK_VERSION=8.11.3
ES_PORT=9200
ELASTIC_PASSWORD=infini_rag_flow
INFINITY_THRIFT_PORT=23817
INFINITY_HTTP_PORT=23820
INFINITY_PSQL_PORT=5432
MEM_LIMIT=8073741824
MYSQL_PASSWORD=infini_rag_flow
MYSQL_PORT=3306
MINIO_CONSOLE_PORT=9001
MINIO_PORT=9000
MINIO_USER=rag_flow
MINIO_PASSWORD=infini_rag_flow
REDIS_PORT=6379
REDIS_PASSWORD=infini_rag_flow
TIMEZONE='Asia/Shanghai'
";

    fn fixture_env() -> Environment {
        let mut env = Environment::new();
        env.load_embedded(FIXTURE).unwrap();
        env
    }

    fn base() -> Project {
        load_base(&fixture_env(), &Profiles::none()).unwrap()
    }

    fn active_names(project: &Project, profiles: &Profiles) -> Vec<String> {
        project
            .active_services(profiles)
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    #[test]
    fn test_five_services_with_ports_and_images() {
        let project = base();
        assert_eq!(project.name, "ragflow");
        assert_eq!(project.services.len(), 5);

        let expect = |name: &str, image: &str, ports: Vec<PortBinding>| {
            let service = project.service(name).unwrap();
            assert_eq!(service.image, image, "image of {}", name);
            assert_eq!(service.ports, ports, "ports of {}", name);
        };

        expect("es01", "elasticsearch:8.11.3", vec![PortBinding::new(9200, 9200)]);
        expect(
            "infinity",
            "infiniflow/infinity:v0.6.0-dev3",
            vec![
                PortBinding::new(23817, 23817),
                PortBinding::new(23820, 23820),
                PortBinding::new(5432, 5432),
            ],
        );
        expect("mysql", "mysql:8.0.39", vec![PortBinding::new(3306, 3306)]);
        expect(
            "minio",
            "quay.io/minio/minio:RELEASE.2023-12-20T01-00-02Z",
            vec![PortBinding::new(9000, 9000), PortBinding::new(9001, 9001)],
        );
        expect("redis", "valkey/valkey:8", vec![PortBinding::new(6379, 6379)]);
    }

    #[test]
    fn test_references_resolve_to_declarations() {
        let project = base();
        for service in project.services.values() {
            for volume in service.volume_names() {
                assert!(project.volumes.contains_key(volume), "volume {}", volume);
            }
            for network in &service.networks {
                assert!(project.networks.contains_key(network), "network {}", network);
            }
        }

        assert_eq!(project.volumes.len(), 5);
        assert!(project
            .volumes
            .values()
            .all(|v| v.driver == VolumeDriver::Local));
        assert_eq!(project.networks.len(), 1);
        assert_eq!(project.networks["ragflow"].driver, NetworkDriver::Bridge);
    }

    #[test]
    fn test_host_ports_are_distinct() {
        let project = base();
        let ports: Vec<u16> = project
            .services
            .values()
            .flat_map(|s| s.host_ports())
            .collect();
        let distinct: BTreeSet<u16> = ports.iter().copied().collect();
        assert_eq!(ports.len(), distinct.len());
        assert_eq!(ports.len(), 8);
    }

    #[test]
    fn test_every_service_restarts_on_failure_and_is_checked() {
        let project = base();
        for service in project.services.values() {
            assert_eq!(service.restart, RestartPolicy::OnFailure { max_retries: None });
            assert!(service.healthcheck.is_some(), "{} has no health check", service.name);
            assert_eq!(service.networks, vec!["ragflow"]);
        }
    }

    #[test]
    fn test_undefined_variable_fails_load() {
        let env = Environment::from_pairs([("STACK_VERSION", "8.11.3")]);
        match load_base(&env, &Profiles::none()) {
            Err(StackError::UndefinedVariables(names)) => {
                assert!(names.contains(&"ES_PORT".to_string()));
                assert!(names.contains(&"REDIS_PASSWORD".to_string()));
                assert!(!names.contains(&"STACK_VERSION".to_string()));
                let mut sorted = names.clone();
                sorted.sort();
                assert_eq!(names, sorted);
            }
            other => panic!("expected undefined variables, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_infinity_requires_its_profile() {
        let project = base();
        let default = active_names(&project, &Profiles::none());
        assert_eq!(default, vec!["es01", "minio", "mysql", "redis"]);

        let with_infinity = active_names(&project, &Profiles::new(["infinity"]));
        assert!(with_infinity.contains(&"infinity".to_string()));
        assert_eq!(with_infinity.len(), 5);
    }

    #[test]
    fn test_resolved_values() {
        let project = base();

        let mysql = project.service("mysql").unwrap();
        assert!(mysql
            .command
            .contains(&"--tls_version=TLSv1.2,TLSv1.3".to_string()));
        assert_eq!(mysql.environment["MYSQL_ROOT_PASSWORD"], "infini_rag_flow");
        assert_eq!(mysql.environment["TZ"], "Asia/Shanghai");

        let es = project.service("es01").unwrap();
        assert_eq!(es.mem_limit, Some(8_073_741_824));
        assert_eq!(es.ulimits["memlock"].soft, -1);

        let redis = project.service("redis").unwrap();
        let check = redis.healthcheck.as_ref().unwrap();
        assert_eq!(
            check.test.to_parts(),
            vec!["CMD-SHELL", "redis-cli -a ${REDIS_PASSWORD} ping | grep PONG"]
        );
        assert!(redis.command.contains(&"infini_rag_flow".to_string()));
    }

    #[test]
    fn test_redacted_render_hides_passwords() {
        let project = base();
        let rendered = project
            .render(
                &Profiles::all(),
                &RenderOptions {
                    format: OutputFormat::Yaml,
                    redact: true,
                },
            )
            .unwrap();

        assert!(!rendered.contains("infini_rag_flow"), "{}", rendered);
        assert!(rendered.contains("-p********"));
        assert!(rendered.contains("name: ragflow_esdata01"));
    }

    #[test]
    fn test_shipped_env_loads() {
        let mut env = Environment::new();
        env.load_embedded(default_env()).unwrap();
        let project = load_base(&env, &Profiles::all()).unwrap();
        assert_eq!(project.service("es01").unwrap().ports[0].published, Some(1200));
    }

    #[test]
    fn test_write_to() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("stack");

        let written = write_to(&dir, false).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(
            std::fs::read_to_string(dir.join(DESCRIPTOR_FILE)).unwrap(),
            base_descriptor()
        );
        assert!(dir.join(".env").is_file());

        assert!(write_to(&dir, false).is_err());
        assert!(write_to(&dir, true).is_ok());
    }
}
