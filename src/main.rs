//! ragstack - inspect and validate the RAGFlow base service stack
//!
//! This is the main CLI entry point for ragstack.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ragstack::compose::loader::{self, LoadOptions};
use ragstack::compose::project::redact_value;
use ragstack::compose::{OutputFormat, RenderOptions};
use ragstack::container::format_duration;
use ragstack::probe::probe_ports;
use ragstack::{stack, StackError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ragstack - RAGFlow base stack descriptor tool
#[derive(Parser)]
#[command(name = "ragstack")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Load, validate and render the RAGFlow base service stack", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file (repeatable; later files overlay earlier ones)
    #[arg(short, long = "file", global = true)]
    file: Vec<PathBuf>,

    /// Env file to read instead of .env next to the descriptor
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Set a variable (KEY=VALUE), overriding .env and the process environment
    #[arg(short, long = "env", global = true)]
    env: Vec<String>,

    /// Enable a profile (repeatable, `*` for all)
    #[arg(long, global = true)]
    profile: Vec<String>,

    /// Project name
    #[arg(short, long, global = true)]
    project_name: Option<String>,

    /// Ignore the process environment
    #[arg(long, global = true)]
    no_process_env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the resolved descriptor
    Config {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
        /// Print active service names, one per line
        #[arg(long)]
        services: bool,
        /// Print volume names, one per line
        #[arg(long)]
        volumes: bool,
        /// Print declared profiles, one per line
        #[arg(long)]
        profiles: bool,
        /// Print the configuration hash of a service (`*` for every active one)
        #[arg(long, value_name = "SERVICE")]
        hash: Option<String>,
        /// Mask values of credential-like environment variables
        #[arg(long)]
        redact: bool,
        /// Services to activate regardless of their profiles
        service: Vec<String>,
    },
    /// Validate the descriptor
    Validate,
    /// List services
    Services,
    /// Show the variables the descriptor references
    Env {
        /// Only list variables that have no value
        #[arg(long)]
        missing: bool,
    },
    /// List published host ports
    Ports {
        /// Check whether each port can currently be bound
        #[arg(long)]
        probe: bool,
    },
    /// Write the shipped descriptor, .env and init.sql to a directory
    Init {
        /// Target directory
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Yaml => OutputFormat::Yaml,
            Format::Json => OutputFormat::Json,
        }
    }
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            files: self.file.clone(),
            env_file: self.env_file.clone(),
            env_overrides: self.env.clone(),
            profiles: self.profile.clone(),
            services: Vec::new(),
            project_name: self.project_name.clone(),
            use_process_env: !self.no_process_env,
            working_dir: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut options = cli.load_options();

    match cli.command {
        Commands::Config {
            format,
            services,
            volumes,
            profiles,
            hash,
            redact,
            service,
        } => {
            options.services = service;
            let loaded = loader::load_project(&options).context("failed to load descriptor")?;
            let project = &loaded.project;

            if services {
                for s in project.active_services(&loaded.selection)? {
                    println!("{}", s.name);
                }
            } else if volumes {
                for name in project.volumes.keys() {
                    println!("{}", name);
                }
            } else if profiles {
                for profile in project.declared_profiles() {
                    println!("{}", profile);
                }
            } else if let Some(target) = hash {
                let names: Vec<String> = if target == "*" {
                    project
                        .active_services(&loaded.selection)?
                        .iter()
                        .map(|s| s.name.clone())
                        .collect()
                } else {
                    target.split(',').map(|s| s.trim().to_string()).collect()
                };
                for name in names {
                    println!("{} {}", name, project.config_hash(&name)?);
                }
            } else {
                let rendered = project.render(
                    &loaded.selection,
                    &RenderOptions {
                        format: format.into(),
                        redact,
                    },
                )?;
                print!("{}", rendered);
                if !rendered.ends_with('\n') {
                    println!();
                }
            }
        }

        Commands::Validate => {
            let prepared = loader::prepare(&options).context("failed to read descriptor")?;
            match prepared.resolve() {
                Ok(loaded) => {
                    for issue in &loaded.report.issues {
                        println!("{}", issue);
                    }
                    println!(
                        "{} is valid ({} warning(s))",
                        loaded.source,
                        loaded.report.warnings().count()
                    );
                }
                Err(StackError::Validation(errors)) => {
                    for error in &errors {
                        println!("{}", error);
                    }
                    anyhow::bail!("descriptor failed validation with {} error(s)", errors.len());
                }
                Err(e) => return Err(e).context("failed to load descriptor"),
            }
        }

        Commands::Services => {
            let loaded = loader::load_project(&options).context("failed to load descriptor")?;
            let active: BTreeSet<String> = loaded
                .project
                .active_services(&loaded.selection)?
                .iter()
                .map(|s| s.name.clone())
                .collect();

            println!(
                "{:<12} {:<50} {:<28} {:<12} {:<10} {:<12}",
                "NAME", "IMAGE", "PORTS", "PROFILES", "HEALTH", "RESTART"
            );
            for s in loaded.project.services.values() {
                let ports: Vec<String> = s.ports.iter().map(|p| p.to_string()).collect();
                let profiles = if s.profiles.is_empty() {
                    "-".to_string()
                } else {
                    s.profiles.join(",")
                };
                let health = match &s.healthcheck {
                    Some(hc) if !hc.disabled => {
                        format!("{}x{}", format_duration(hc.interval), hc.retries)
                    }
                    _ => "-".to_string(),
                };
                let name = if active.contains(&s.name) {
                    s.name.clone()
                } else {
                    format!("({})", s.name)
                };
                println!(
                    "{:<12} {:<50} {:<28} {:<12} {:<10} {:<12}",
                    name,
                    s.image,
                    ports.join(","),
                    profiles,
                    health,
                    s.restart.to_string()
                );
            }
        }

        Commands::Env { missing } => {
            let prepared = loader::prepare(&options).context("failed to read descriptor")?;

            if missing {
                for name in prepared.unset_variables() {
                    println!("{}", name);
                }
            } else {
                println!("{:<24} {:<32} {}", "VARIABLE", "VALUE", "SOURCE");
                for name in &prepared.referenced {
                    match prepared.environment.binding(name) {
                        Some(binding) => println!(
                            "{:<24} {:<32} {}",
                            name,
                            redact_value(name, &binding.value),
                            binding.source
                        ),
                        None => println!("{:<24} {:<32} {}", name, "-", "unset"),
                    }
                }
            }
        }

        Commands::Ports { probe } => {
            let loaded = loader::load_project(&options).context("failed to load descriptor")?;
            let active: BTreeSet<String> = loaded
                .project
                .active_services(&loaded.selection)?
                .iter()
                .map(|s| s.name.clone())
                .collect();

            if probe {
                println!("{:<12} {:<24} {:<8} {}", "SERVICE", "BINDING", "PROTO", "STATE");
                for status in probe_ports(&loaded.project)
                    .await
                    .into_iter()
                    .filter(|s| active.contains(&s.service))
                {
                    println!(
                        "{:<12} {:<24} {:<8} {}",
                        status.service,
                        status.binding.to_string(),
                        status.binding.protocol.to_string(),
                        status.state
                    );
                }
            } else {
                println!("{:<12} {:<24} {:<8}", "SERVICE", "BINDING", "PROTO");
                for (service, binding) in loaded.project.host_ports() {
                    if active.contains(&service.name) {
                        println!(
                            "{:<12} {:<24} {:<8}",
                            service.name,
                            binding.to_string(),
                            binding.protocol.to_string()
                        );
                    }
                }
            }
        }

        Commands::Init { dir, force } => {
            let written = stack::write_to(&dir, force)
                .with_context(|| format!("failed to write stack files to {}", dir.display()))?;
            for path in written {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
