//! Descriptor loading
//!
//! Locates the descriptor, layers the environment, substitutes variables,
//! merges overlays, validates and builds the typed [`Project`].

use super::config::ComposeConfig;
use super::parser::ComposeParser;
use super::profile::Profiles;
use super::project::{EnvEntries, Project};
use super::validate::{validate, ValidationReport};
use crate::env::{referenced_variables, EnvFile, Environment, Interpolator, DEFAULT_ENV_FILE};
use crate::error::{Result, StackError};
use crate::stack;
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Compose files to load, separated like `PATH`
pub const COMPOSE_FILE_VAR: &str = "COMPOSE_FILE";
/// Profiles to enable when none are given, comma-separated
pub const COMPOSE_PROFILES_VAR: &str = "COMPOSE_PROFILES";
/// Project name when none is given
pub const COMPOSE_PROJECT_NAME_VAR: &str = "COMPOSE_PROJECT_NAME";

/// How a descriptor should be located and resolved
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Explicit descriptor files; later files overlay earlier ones
    pub files: Vec<PathBuf>,
    /// Env file to use instead of `.env` next to the descriptor
    pub env_file: Option<PathBuf>,
    /// `KEY=VALUE` overrides, applied last
    pub env_overrides: Vec<String>,
    /// Profiles to enable
    pub profiles: Vec<String>,
    /// Services to activate regardless of their profiles
    pub services: Vec<String>,
    /// Project name override
    pub project_name: Option<String>,
    /// Consult the process environment
    pub use_process_env: bool,
    /// Directory to discover descriptors in (defaults to the current one)
    pub working_dir: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            env_file: None,
            env_overrides: Vec::new(),
            profiles: Vec::new(),
            services: Vec::new(),
            project_name: None,
            use_process_env: true,
            working_dir: None,
        }
    }
}

/// Where the descriptor came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSource {
    /// Files on disk, in overlay order
    Files(Vec<PathBuf>),
    /// The descriptor compiled into the binary
    Embedded,
}

impl std::fmt::Display for DescriptorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptorSource::Files(files) => {
                let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
                write!(f, "{}", names.join(", "))
            }
            DescriptorSource::Embedded => write!(f, "embedded descriptor"),
        }
    }
}

/// A descriptor read from disk with its environment assembled, before
/// substitution
#[derive(Debug, Clone)]
pub struct Prepared {
    pub source: DescriptorSource,
    /// Directory relative paths resolve against
    pub base_dir: PathBuf,
    pub environment: Environment,
    /// Every variable the descriptor refers to
    pub referenced: BTreeSet<String>,
    pub selection: Profiles,
    documents: Vec<Value>,
    dotenv: EnvEntries,
    project_name: Option<String>,
}

/// A fully resolved project with the context it was resolved in
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub project: Project,
    pub environment: Environment,
    pub selection: Profiles,
    pub report: ValidationReport,
    pub source: DescriptorSource,
}

/// Load and resolve a descriptor
#[instrument(skip(options), fields(files = options.files.len()))]
pub fn load(options: &LoadOptions) -> Result<Project> {
    Ok(load_project(options)?.project)
}

/// Load and resolve a descriptor, keeping the environment and validation
/// report it was resolved with
#[instrument(skip(options))]
pub fn load_project(options: &LoadOptions) -> Result<LoadedProject> {
    prepare(options)?.resolve()
}

/// Locate the descriptor and assemble its environment
pub fn prepare(options: &LoadOptions) -> Result<Prepared> {
    let working_dir = match &options.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    debug!("Step 1: Locating descriptor");
    let source = locate(options, &working_dir)?;
    let (documents, base_dir) = match &source {
        DescriptorSource::Files(files) => {
            let mut documents = Vec::with_capacity(files.len());
            for file in files {
                documents.push(ComposeParser::read_value(file)?);
            }
            let base_dir = files
                .first()
                .and_then(|f| f.parent())
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| working_dir.clone());
            (documents, base_dir)
        }
        DescriptorSource::Embedded => (
            vec![ComposeParser::parse_value_str(stack::base_descriptor())?],
            working_dir.clone(),
        ),
    };
    info!(source = %source, "Descriptor located");

    let mut referenced = BTreeSet::new();
    for document in &documents {
        referenced.extend(referenced_variables(document)?);
    }

    debug!("Step 2: Assembling environment");
    let mut environment = Environment::new();
    let env_file = options
        .env_file
        .as_deref()
        .map(|path| resolve_path(path, &working_dir));
    let dotenv = match (env_file, &source) {
        (Some(path), _) => environment.load_dotenv(&path)?,
        (None, DescriptorSource::Files(_)) => {
            let path = base_dir.join(DEFAULT_ENV_FILE);
            if path.is_file() {
                environment.load_dotenv(&path)?
            } else {
                debug!("No {} next to the descriptor", DEFAULT_ENV_FILE);
                Vec::new()
            }
        }
        (None, DescriptorSource::Embedded) => {
            environment.load_embedded(stack::default_env())?;
            EnvFile::parse_str(stack::default_env(), Path::new(DEFAULT_ENV_FILE))?
        }
    };

    if options.use_process_env {
        environment.overlay_process(
            referenced
                .iter()
                .map(String::as_str)
                .chain([COMPOSE_PROFILES_VAR, COMPOSE_PROJECT_NAME_VAR]),
        );
    }
    environment.apply_overrides(&options.env_overrides)?;

    let profiles = if options.profiles.is_empty() {
        match environment.get(COMPOSE_PROFILES_VAR) {
            Some(list) => {
                debug!("Using profiles from {}: {}", COMPOSE_PROFILES_VAR, list);
                Profiles::from_list(list)
            }
            None => Profiles::none(),
        }
    } else {
        Profiles::new(options.profiles.iter().cloned())
    };
    let selection = profiles.with_services(options.services.iter().cloned());

    let project_name = options
        .project_name
        .clone()
        .or_else(|| environment.get(COMPOSE_PROJECT_NAME_VAR).map(String::from))
        .filter(|n| !n.is_empty());

    Ok(Prepared {
        source,
        base_dir,
        environment,
        referenced,
        selection,
        documents,
        dotenv,
        project_name,
    })
}

/// Relative paths are taken from `working_dir`
fn resolve_path(path: &Path, working_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

fn locate(options: &LoadOptions, working_dir: &Path) -> Result<DescriptorSource> {
    let resolve = |path: &Path| resolve_path(path, working_dir);

    let mut files: Vec<PathBuf> = options.files.iter().map(|f| resolve(f.as_path())).collect();
    if files.is_empty() && options.use_process_env {
        if let Some(value) = std::env::var_os(COMPOSE_FILE_VAR).filter(|v| !v.is_empty()) {
            debug!("Using descriptor files from {}", COMPOSE_FILE_VAR);
            files = std::env::split_paths(&value).map(|f| resolve(f.as_path())).collect();
        }
    }

    if files.is_empty() {
        return Ok(match ComposeParser::find_compose_file(working_dir) {
            Some(found) => DescriptorSource::Files(vec![found]),
            None => {
                debug!(
                    "No compose file in {}, using the embedded descriptor",
                    working_dir.display()
                );
                DescriptorSource::Embedded
            }
        });
    }

    for file in &files {
        if !file.is_file() {
            return Err(StackError::ComposeFileNotFound(file.clone()));
        }
    }
    Ok(DescriptorSource::Files(files))
}

impl Prepared {
    /// Referenced variables with no binding, in name order.
    ///
    /// Some of these may still resolve through a `${NAME:-default}`.
    pub fn unset_variables(&self) -> Vec<&str> {
        self.referenced
            .iter()
            .filter(|name| !self.environment.contains(name))
            .map(String::as_str)
            .collect()
    }

    /// Substitute, merge, validate and build the project
    #[instrument(skip(self), fields(source = %self.source))]
    pub fn resolve(self) -> Result<LoadedProject> {
        debug!("Step 3: Substituting variables");
        let interpolator = Interpolator::new(&self.environment);
        let mut missing = BTreeSet::new();
        let mut config = ComposeConfig::default();
        for mut document in self.documents {
            match interpolator.interpolate_value(&mut document) {
                Ok(()) => {}
                Err(StackError::UndefinedVariables(names)) => {
                    missing.extend(names);
                    continue;
                }
                Err(e) => return Err(e),
            }
            if missing.is_empty() {
                config = ComposeParser::merge_configs(config, ComposeParser::parse_value(document)?);
            }
        }
        if !missing.is_empty() {
            return Err(StackError::UndefinedVariables(missing.into_iter().collect()));
        }

        debug!("Step 4: Validating");
        let on_disk = matches!(self.source, DescriptorSource::Files(_));
        let report = validate(&config, on_disk.then_some(self.base_dir.as_path()));
        ensure_valid(&report)?;

        let name = match self.project_name.as_deref().or(config.name.as_deref()) {
            Some(name) => normalize_project_name(name)?,
            None => normalize_project_name(&dir_name(&self.base_dir))?,
        };

        debug!("Step 5: Building project {}", name);
        let project = if on_disk {
            Project::from_config_in(&name, &config, &self.base_dir)?
        } else {
            let dotenv = self.dotenv;
            let mut project = Project::from_config(&name, &config, |path| {
                embedded_env_file(path, &dotenv)
            })?;
            project.working_dir = Some(self.base_dir.clone());
            project
        };

        let active = project.active_services(&self.selection)?.len();
        info!(
            project = %project.name,
            services = project.services.len(),
            active,
            "Project loaded successfully"
        );

        Ok(LoadedProject {
            project,
            environment: self.environment,
            selection: self.selection,
            report,
            source: self.source,
        })
    }
}

/// `env_file` lookups for a descriptor that has no directory of its own
pub(crate) fn embedded_env_file(path: &str, entries: &EnvEntries) -> Result<EnvEntries> {
    let requested = Path::new(path).file_name();
    if requested == Path::new(DEFAULT_ENV_FILE).file_name() {
        Ok(entries.clone())
    } else {
        Err(StackError::EnvFileNotFound(PathBuf::from(path)))
    }
}

/// Log warnings; turn errors into a single [`StackError::Validation`]
pub(crate) fn ensure_valid(report: &ValidationReport) -> Result<()> {
    for issue in report.warnings() {
        warn!("{}", issue);
    }
    if report.has_errors() {
        return Err(StackError::Validation(
            report.errors().map(|i| i.to_string()).collect(),
        ));
    }
    Ok(())
}

/// Lowercase and keep `[a-z0-9_-]`; the result must start with a letter or
/// digit.
pub fn normalize_project_name(name: &str) -> Result<String> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    let normalized = normalized.trim_start_matches(['_', '-']).to_string();

    if normalized.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "project name '{}' has no usable characters",
            name
        )));
    }
    Ok(normalized)
}

fn dir_name(dir: &Path) -> String {
    dir.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(dir)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("default")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Source;
    use std::fs;

    const COMPOSE: &str = r#"
services:
  cache:
    image: valkey/valkey:${VALKEY_TAG:-8}
    ports:
      - ${CACHE_PORT}:6379
    env_file: .env
    healthcheck:
      test: ["CMD", "redis-cli", "ping"]
  debug:
    image: busybox
    profiles: [debug]
    healthcheck:
      test: ["NONE"]
"#;

    fn options(dir: &Path) -> LoadOptions {
        LoadOptions {
            working_dir: Some(dir.to_path_buf()),
            use_process_env: false,
            ..LoadOptions::default()
        }
    }

    fn workspace(env: &str) -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("compose.yaml"), COMPOSE).unwrap();
        fs::write(temp.path().join(".env"), env).unwrap();
        temp
    }

    #[test]
    fn test_load_discovers_compose_and_dotenv() {
        let temp = workspace("CACHE_PORT=6380\n");
        let mut opts = options(temp.path());
        opts.project_name = Some("My Stack!".to_string());

        let project = load(&opts).unwrap();
        assert_eq!(project.name, "mystack");
        let cache = project.service("cache").unwrap();
        assert_eq!(cache.image, "valkey/valkey:8");
        assert_eq!(cache.ports[0].published, Some(6380));
        assert_eq!(cache.environment["CACHE_PORT"], "6380");
    }

    #[test]
    fn test_overrides_beat_dotenv() {
        let temp = workspace("CACHE_PORT=6380\n");
        let mut opts = options(temp.path());
        opts.env_overrides = vec!["CACHE_PORT=7000".to_string(), "VALKEY_TAG=7".to_string()];

        let project = load(&opts).unwrap();
        let cache = project.service("cache").unwrap();
        assert_eq!(cache.ports[0].published, Some(7000));
        assert_eq!(cache.image, "valkey/valkey:7");
    }

    #[test]
    fn test_missing_variables_are_reported() {
        let temp = workspace("UNRELATED=1\n");
        let opts = options(temp.path());

        let prepared = prepare(&opts).unwrap();
        assert_eq!(prepared.unset_variables(), vec!["CACHE_PORT", "VALKEY_TAG"]);

        match prepared.resolve() {
            Err(StackError::UndefinedVariables(names)) => assert_eq!(names, vec!["CACHE_PORT"]),
            other => panic!("expected undefined variables, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_profiles_from_dotenv_and_options() {
        let temp = workspace("CACHE_PORT=6380\nCOMPOSE_PROFILES=debug\n");
        let loaded = load_project(&options(temp.path())).unwrap();
        assert_eq!(
            loaded.project.active_services(&loaded.selection).unwrap().len(),
            2
        );

        let mut opts = options(temp.path());
        opts.profiles = vec!["nope".to_string()];
        assert!(matches!(load(&opts), Err(StackError::UnknownProfile(_))));
    }

    #[test]
    fn test_validation_errors_abort() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            "services:\n  a:\n    image: x\n    ports: [\"80:80\"]\n  b:\n    image: y\n    ports: [\"80:8080\"]\n",
        )
        .unwrap();

        match load(&options(temp.path())) {
            Err(StackError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_overlay_files_merge() {
        let temp = workspace("CACHE_PORT=6380\n");
        fs::write(
            temp.path().join("override.yaml"),
            "services:\n  cache:\n    image: valkey/valkey:9\n",
        )
        .unwrap();
        let mut opts = options(temp.path());
        opts.files = vec![PathBuf::from("compose.yaml"), PathBuf::from("override.yaml")];

        let loaded = load_project(&opts).unwrap();
        assert_eq!(
            loaded.source,
            DescriptorSource::Files(vec![
                temp.path().join("compose.yaml"),
                temp.path().join("override.yaml")
            ])
        );
        assert_eq!(loaded.project.service("cache").unwrap().image, "valkey/valkey:9");
    }

    #[test]
    fn test_explicit_env_file_is_relative_to_working_dir() {
        let temp = workspace("CACHE_PORT=6380\n");
        fs::write(temp.path().join("ci.env"), "CACHE_PORT=7100\n").unwrap();
        let mut opts = options(temp.path());
        opts.env_file = Some(PathBuf::from("ci.env"));

        let loaded = load_project(&opts).unwrap();
        assert_eq!(
            loaded.project.service("cache").unwrap().ports[0].published,
            Some(7100)
        );
        assert_eq!(
            loaded.environment.binding("CACHE_PORT").unwrap().source,
            Source::DotEnv(temp.path().join("ci.env"))
        );
    }

    #[test]
    fn test_missing_default_env_file_is_fine() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("compose.yaml"),
            "services:\n  app:\n    image: app:${TAG:-1}\n    healthcheck:\n      test: [\"NONE\"]\n",
        )
        .unwrap();

        let project = load(&options(temp.path())).unwrap();
        assert_eq!(project.service("app").unwrap().image, "app:1");
    }

    #[test]
    fn test_missing_explicit_env_file_is_an_error() {
        let temp = workspace("CACHE_PORT=6380\n");
        let mut opts = options(temp.path());
        opts.env_file = Some(PathBuf::from("absent.env"));

        match load(&opts) {
            Err(StackError::EnvFileNotFound(path)) => {
                assert_eq!(path, temp.path().join("absent.env"))
            }
            other => panic!("expected a missing env file, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut opts = options(temp.path());
        opts.files = vec![PathBuf::from("absent.yaml")];
        assert!(matches!(load(&opts), Err(StackError::ComposeFileNotFound(_))));
    }

    #[test]
    fn test_embedded_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let loaded = load_project(&options(temp.path())).unwrap();
        assert_eq!(loaded.source, DescriptorSource::Embedded);
        assert_eq!(loaded.project.name, "ragflow");
        assert_eq!(loaded.project.services.len(), 5);
        assert!(loaded.project.service("mysql").unwrap().environment.contains_key("MYSQL_PASSWORD"));
    }

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("RAGFlow").unwrap(), "ragflow");
        assert_eq!(normalize_project_name("_my.app-1").unwrap(), "myapp-1");
        assert!(normalize_project_name("!!!").is_err());
    }
}
