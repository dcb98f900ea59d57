//! Resolved runtime parameters for one extension invocation.

use std::collections::HashMap;
use std::path::Path;

use bollard::container::Config as DockerConfig;
use bollard::models::{HostConfig, PortBinding};

use crate::config::{Config, Extension, parse_cpu_limit, parse_memory_limit};
use crate::container::env::{CONTAINER_REPO_ROOT, ContainerEnv};

/// Label marking containers this CLI created.
pub const MANAGED_LABEL: &str = "r2r.managed";
/// Label carrying the extension name.
pub const EXTENSION_LABEL: &str = "r2r.extension";
/// Prefix of every managed container name.
pub const CONTAINER_NAME_PREFIX: &str = "r2r-";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Point-in-time parameters for one container. Created per run and discarded
/// once the container is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionConfig {
    pub extension: String,
    /// Container name.
    pub name: String,
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub env: Vec<String>,
    pub tty: bool,
    pub stdin: bool,
    pub binds: Vec<String>,
    /// `(host, container)` port pairs.
    pub ports: Vec<(i64, i64)>,
    pub memory: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub privileged: bool,
    pub network_mode: Option<String>,
    pub labels: HashMap<String, String>,
    pub auto_remove: bool,
}

/// Inputs that come from the host rather than the configuration.
#[derive(Debug, Clone, Copy)]
pub struct HostContext<'a> {
    pub repo_root: &'a Path,
    /// Host path of the Docker socket to pass through.
    pub docker_socket: &'a str,
    /// The image declares its own entrypoint.
    pub image_has_entrypoint: bool,
    /// Disable TTY and stdin entirely (`R2R_TESTING`).
    pub testing: bool,
}

impl ExtensionConfig {
    /// Resolve everything needed to create the container for `ext`.
    ///
    /// With arguments the container gets a TTY but no stdin; a bare
    /// invocation gets both.
    pub fn resolve(
        config: &Config,
        ext: &Extension,
        args: &[String],
        env: &ContainerEnv,
        host: HostContext<'_>,
    ) -> Self {
        let (tty, stdin) = if host.testing {
            (false, false)
        } else if args.is_empty() {
            (true, true)
        } else {
            (true, false)
        };

        let cmd: Vec<String> = ext.command.iter().chain(args.iter()).cloned().collect();

        let working_dir = if host.image_has_entrypoint {
            None
        } else if ext.working_dir.is_empty() {
            Some(CONTAINER_REPO_ROOT.to_string())
        } else {
            Some(ext.working_dir.clone())
        };

        let mut binds = vec![
            format!("{}:{}", host.repo_root.display(), CONTAINER_REPO_ROOT),
            format!("{}:{}", host.docker_socket, DOCKER_SOCKET),
        ];
        for volume in &ext.volumes {
            let host_path = if Path::new(&volume.host).is_absolute() {
                volume.host.clone()
            } else {
                host.repo_root.join(&volume.host).to_string_lossy().to_string()
            };
            let mut bind = format!("{}:{}", host_path, volume.container);
            if volume.readonly {
                bind.push_str(":ro");
            }
            binds.push(bind);
        }

        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (EXTENSION_LABEL.to_string(), ext.name.clone()),
        ]);

        Self {
            extension: ext.name.clone(),
            name: container_name(&ext.name),
            image: ext.image.clone(),
            entrypoint: (!ext.entrypoint.is_empty()).then(|| ext.entrypoint.clone()),
            cmd: (!cmd.is_empty()).then_some(cmd),
            working_dir,
            env: env.to_docker(),
            tty,
            stdin,
            binds,
            ports: ext.ports.iter().map(|p| (p.host, p.container)).collect(),
            memory: config.effective_memory_limit(ext).and_then(parse_memory_limit),
            nano_cpus: config.effective_cpu_limit(ext).and_then(parse_cpu_limit),
            privileged: ext.privileged(),
            network_mode: (!ext.network_mode.is_empty()).then(|| ext.network_mode.clone()),
            labels,
            auto_remove: true,
        }
    }
}

/// `r2r-<extension>-<8 hex>`, with characters Docker rejects replaced.
pub fn container_name(extension: &str) -> String {
    let safe: String = extension
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}-{}", CONTAINER_NAME_PREFIX, safe, &suffix[..8])
}

/// Host-level settings: mounts, ports, limits, auto-remove.
pub fn create_host_config(launch: &ExtensionConfig) -> HostConfig {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = launch
        .ports
        .iter()
        .map(|(host, container)| {
            (
                format!("{}/tcp", container),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(host.to_string()),
                }]),
            )
        })
        .collect();

    HostConfig {
        binds: Some(launch.binds.clone()),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        memory: launch.memory,
        nano_cpus: launch.nano_cpus,
        privileged: Some(launch.privileged),
        network_mode: launch.network_mode.clone(),
        auto_remove: Some(launch.auto_remove),
        ..Default::default()
    }
}

/// Container create body, including the host config.
pub fn create_container_config(launch: &ExtensionConfig) -> DockerConfig<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = launch
        .ports
        .iter()
        .map(|(_, container)| (format!("{}/tcp", container), HashMap::new()))
        .collect();

    DockerConfig {
        image: Some(launch.image.clone()),
        cmd: launch.cmd.clone(),
        entrypoint: launch.entrypoint.clone(),
        working_dir: launch.working_dir.clone(),
        env: Some(launch.env.clone()),
        tty: Some(launch.tty),
        open_stdin: Some(launch.stdin),
        stdin_once: Some(launch.stdin),
        attach_stdin: Some(launch.stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        labels: Some(launch.labels.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(create_host_config(launch)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, PortMapping, VolumeMount};

    fn host(entrypoint: bool) -> HostContext<'static> {
        HostContext {
            repo_root: Path::new("/work/repo"),
            docker_socket: "/var/run/docker.sock",
            image_has_entrypoint: entrypoint,
            testing: false,
        }
    }

    fn ext() -> Extension {
        let mut ext = Extension::new("go", "ghcr.io/org/go:v1");
        ext.volumes.push(VolumeMount {
            host: "cache".to_string(),
            container: "/cache".to_string(),
            readonly: true,
        });
        ext.ports.push(PortMapping {
            host: 8080,
            container: 80,
        });
        ext.memory_limit = "512MB".to_string();
        ext
    }

    #[test]
    fn test_tty_and_stdin_rules() {
        let config = Config::default();
        let env = ContainerEnv::default();

        let s = ExtensionConfig::resolve(&config, &ext(), &[], &env, host(false));
        assert!(s.tty && s.stdin);

        let args = vec!["build".to_string()];
        let s = ExtensionConfig::resolve(&config, &ext(), &args, &env, host(false));
        assert!(s.tty && !s.stdin);
        assert_eq!(s.cmd, Some(args));

        let mut testing = host(false);
        testing.testing = true;
        let s = ExtensionConfig::resolve(&config, &ext(), &[], &env, testing);
        assert!(!s.tty && !s.stdin);
    }

    #[test]
    fn test_working_dir_only_without_entrypoint() {
        let config = Config::default();
        let env = ContainerEnv::default();
        let s = ExtensionConfig::resolve(&config, &ext(), &[], &env, host(false));
        assert_eq!(s.working_dir.as_deref(), Some("/var/task"));
        let s = ExtensionConfig::resolve(&config, &ext(), &[], &env, host(true));
        assert_eq!(s.working_dir, None);
    }

    #[test]
    fn test_mounts_labels_and_limits() {
        let config = Config {
            defaults: Some(Defaults {
                cpu_limit: "2".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let s = ExtensionConfig::resolve(&config, &ext(), &[], &ContainerEnv::default(), host(false));

        assert_eq!(
            s.binds,
            vec![
                "/work/repo:/var/task".to_string(),
                "/var/run/docker.sock:/var/run/docker.sock".to_string(),
                "/work/repo/cache:/cache:ro".to_string(),
            ]
        );
        assert_eq!(s.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(s.labels.get(EXTENSION_LABEL).map(String::as_str), Some("go"));
        assert_eq!(s.memory, Some(512 * 1024 * 1024));
        assert_eq!(s.nano_cpus, Some(2_000_000_000));
        assert!(s.auto_remove);
        assert!(s.name.starts_with("r2r-go-"));
        assert_eq!(s.name.len(), "r2r-go-".len() + 8);
    }

    #[test]
    fn test_docker_config_shape() {
        let s = ExtensionConfig::resolve(&Config::default(), &ext(), &[], &ContainerEnv::default(), host(false));
        let c = create_container_config(&s);
        assert_eq!(c.tty, Some(true));
        assert_eq!(c.open_stdin, Some(true));
        assert!(c.exposed_ports.unwrap().contains_key("80/tcp"));
        let h = c.host_config.unwrap();
        assert_eq!(h.auto_remove, Some(true));
        let bindings = h.port_bindings.unwrap();
        let binding = bindings["80/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_container_name_sanitized() {
        let name = container_name("my ext/v2");
        assert!(name.starts_with("r2r-my-ext-v2-"));
    }
}
