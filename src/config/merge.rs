//! Deterministic merge of configuration layers.
//!
//! Rules, applied field by field:
//! - non-empty strings and non-zero numbers in the overlay replace the base;
//! - tri-state flags replace the base only when the overlay sets them;
//! - lists of volumes, ports, command and entrypoint replace wholesale when
//!   the overlay has any element;
//! - environment and secret lists merge by variable name, overlay value wins;
//! - extensions match by name, unmatched overlay extensions are appended.

use crate::config::{
    Config, Defaults, EnvVar, Environment, Extension, RegistryAuthentication, RegistrySettings,
    SecretMapping,
};

/// Merge `overlay` on top of `base`, returning the combined configuration.
pub fn merge_configs(base: &Config, overlay: &Config) -> Config {
    let mut merged = base.clone();

    merge_string(&mut merged.version, &overlay.version);

    if let Some(registry) = &overlay.registry {
        match merged.registry.as_mut() {
            Some(existing) => merge_registry(existing, registry),
            None => merged.registry = Some(registry.clone()),
        }
    }

    if let Some(defaults) = &overlay.defaults {
        match merged.defaults.as_mut() {
            Some(existing) => merge_defaults(existing, defaults),
            None => merged.defaults = Some(defaults.clone()),
        }
    }

    merge_environment(&mut merged.environment, &overlay.environment);

    for ext in &overlay.extensions {
        match merged.extensions.iter_mut().find(|e| e.name == ext.name) {
            Some(existing) => *existing = merge_extension(existing, ext),
            None => merged.extensions.push(ext.clone()),
        }
    }

    merge_flag(&mut merged.load_local, overlay.load_local);

    merged
}

/// Merge one extension definition onto another with the same name.
pub fn merge_extension(base: &Extension, overlay: &Extension) -> Extension {
    let mut merged = base.clone();

    merge_string(&mut merged.description, &overlay.description);
    merge_string(&mut merged.version, &overlay.version);
    merge_string(&mut merged.image, &overlay.image);
    merge_string(&mut merged.image_pull_policy, &overlay.image_pull_policy);
    merge_string(&mut merged.repo_url, &overlay.repo_url);
    merge_string(&mut merged.docs_url, &overlay.docs_url);
    merge_string(&mut merged.working_dir, &overlay.working_dir);
    merge_string(&mut merged.network_mode, &overlay.network_mode);
    merge_string(
        &mut merged.metadata_schema_version,
        &overlay.metadata_schema_version,
    );
    merge_string(&mut merged.memory_limit, &overlay.memory_limit);
    merge_string(&mut merged.cpu_limit, &overlay.cpu_limit);

    merge_flag(&mut merged.load_local, overlay.load_local);
    merge_flag(&mut merged.auto_remove_children, overlay.auto_remove_children);
    merge_flag(&mut merged.privileged, overlay.privileged);

    merge_env(&mut merged.env, &overlay.env);

    replace_list(&mut merged.volumes, &overlay.volumes);
    replace_list(&mut merged.ports, &overlay.ports);
    replace_list(&mut merged.entrypoint, &overlay.entrypoint);
    replace_list(&mut merged.command, &overlay.command);

    merged
}

fn merge_registry(base: &mut RegistrySettings, overlay: &RegistrySettings) {
    merge_string(&mut base.default, &overlay.default);
    merge_number(&mut base.timeout, overlay.timeout);
    merge_number(&mut base.retry_attempts, overlay.retry_attempts);
    merge_number(&mut base.ghcr_cache_seconds, overlay.ghcr_cache_seconds);

    if let Some(auth) = &overlay.authentication {
        match base.authentication.as_mut() {
            Some(existing) => merge_authentication(existing, auth),
            None => base.authentication = Some(auth.clone()),
        }
    }
}

fn merge_authentication(base: &mut RegistryAuthentication, overlay: &RegistryAuthentication) {
    merge_flag(&mut base.required, overlay.required);
    merge_string(&mut base.username_env, &overlay.username_env);
    merge_string(&mut base.token_env, &overlay.token_env);
}

fn merge_defaults(base: &mut Defaults, overlay: &Defaults) {
    merge_string(&mut base.registry, &overlay.registry);
    merge_string(&mut base.pull_policy, &overlay.pull_policy);
    merge_flag(&mut base.remove_after, overlay.remove_after);
    merge_number(&mut base.timeout, overlay.timeout);
    merge_string(&mut base.memory_limit, &overlay.memory_limit);
    merge_string(&mut base.cpu_limit, &overlay.cpu_limit);
    merge_env(&mut base.environment, &overlay.environment);
}

fn merge_environment(base: &mut Environment, overlay: &Environment) {
    merge_env(&mut base.global, &overlay.global);
    merge_secrets(&mut base.secrets, &overlay.secrets);
}

fn merge_string(base: &mut String, overlay: &str) {
    if !overlay.is_empty() {
        *base = overlay.to_string();
    }
}

fn merge_number<T: Copy + Default + PartialEq>(base: &mut T, overlay: T) {
    if overlay != T::default() {
        *base = overlay;
    }
}

fn merge_flag(base: &mut Option<bool>, overlay: Option<bool>) {
    if overlay.is_some() {
        *base = overlay;
    }
}

fn replace_list<T: Clone>(base: &mut Vec<T>, overlay: &[T]) {
    if !overlay.is_empty() {
        *base = overlay.to_vec();
    }
}

/// Key-wise merge by `name`, keeping the base order and appending new names.
fn merge_env(base: &mut Vec<EnvVar>, overlay: &[EnvVar]) {
    for var in overlay {
        match base.iter_mut().find(|v| v.name == var.name) {
            Some(existing) => existing.value = var.value.clone(),
            None => base.push(var.clone()),
        }
    }
}

fn merge_secrets(base: &mut Vec<SecretMapping>, overlay: &[SecretMapping]) {
    for secret in overlay {
        match base.iter_mut().find(|s| s.name == secret.name) {
            Some(existing) => existing.env = secret.env.clone(),
            None => base.push(secret.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortMapping, VolumeMount};
    use pretty_assertions::assert_eq;

    fn base_extension() -> Extension {
        Extension {
            name: "pwsh".to_string(),
            image: "ghcr.io/org/pwsh:v1.0.0".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            description: "PowerShell".to_string(),
            env: vec![EnvVar::new("A", "1"), EnvVar::new("B", "2")],
            volumes: vec![VolumeMount {
                host: "./a".to_string(),
                container: "/a".to_string(),
                readonly: false,
            }],
            command: vec!["pwsh".to_string()],
            privileged: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_local_override_keeps_image() {
        let base = Config {
            extensions: vec![base_extension()],
            ..Default::default()
        };
        let overlay = Config {
            extensions: vec![Extension {
                name: "pwsh".to_string(),
                load_local: Some(true),
                ..Default::default()
            }],
            ..Default::default()
        };

        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged.extensions.len(), 1);
        let ext = &merged.extensions[0];
        assert_eq!(ext.image, "ghcr.io/org/pwsh:v1.0.0");
        assert_eq!(ext.image_pull_policy, "IfNotPresent");
        assert_eq!(ext.load_local, Some(true));
    }

    #[test]
    fn test_present_fields_win_absent_fields_kept() {
        let base = base_extension();
        let overlay = Extension {
            name: "pwsh".to_string(),
            image: "ghcr.io/org/pwsh:v2.0.0".to_string(),
            cpu_limit: "2".to_string(),
            ..Default::default()
        };
        let merged = merge_extension(&base, &overlay);
        assert_eq!(merged.image, "ghcr.io/org/pwsh:v2.0.0");
        assert_eq!(merged.cpu_limit, "2");
        assert_eq!(merged.description, "PowerShell");
        assert_eq!(merged.command, vec!["pwsh"]);
        assert_eq!(merged.privileged, Some(true));
    }

    #[test]
    fn test_absent_flag_never_disables() {
        let base = base_extension();
        let overlay = Extension {
            name: "pwsh".to_string(),
            ..Default::default()
        };
        assert_eq!(merge_extension(&base, &overlay).privileged, Some(true));

        let explicit_off = Extension {
            name: "pwsh".to_string(),
            privileged: Some(false),
            ..Default::default()
        };
        assert_eq!(merge_extension(&base, &explicit_off).privileged, Some(false));
    }

    #[test]
    fn test_lists_replace_wholesale_and_idempotent() {
        let base = Config {
            extensions: vec![base_extension()],
            ..Default::default()
        };
        let overlay = Config {
            extensions: vec![Extension {
                name: "pwsh".to_string(),
                volumes: vec![VolumeMount {
                    host: "./b".to_string(),
                    container: "/b".to_string(),
                    readonly: true,
                }],
                ports: vec![PortMapping {
                    host: 8080,
                    container: 80,
                }],
                entrypoint: vec!["/bin/sh".to_string(), "-c".to_string()],
                command: vec!["echo".to_string(), "hi".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let once = merge_configs(&base, &overlay);
        let ext = &once.extensions[0];
        assert_eq!(ext.volumes.len(), 1);
        assert_eq!(ext.volumes[0].container, "/b");
        assert_eq!(ext.ports, vec![PortMapping { host: 8080, container: 80 }]);
        assert_eq!(ext.command, vec!["echo", "hi"]);

        let twice = merge_configs(&once, &overlay);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_env_merges_by_name() {
        let base = base_extension();
        let overlay = Extension {
            name: "pwsh".to_string(),
            env: vec![EnvVar::new("B", "override"), EnvVar::new("C", "3")],
            ..Default::default()
        };
        let merged = merge_extension(&base, &overlay);
        assert_eq!(
            merged.env,
            vec![
                EnvVar::new("A", "1"),
                EnvVar::new("B", "override"),
                EnvVar::new("C", "3"),
            ]
        );
    }

    #[test]
    fn test_unmatched_extensions_append_and_names_stay_unique() {
        let base = Config {
            extensions: vec![base_extension()],
            ..Default::default()
        };
        let overlay = Config {
            extensions: vec![
                Extension::new("go", "ghcr.io/org/go:v1"),
                Extension::new("pwsh", "ghcr.io/org/pwsh:v3"),
            ],
            ..Default::default()
        };
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged.extension_names(), vec!["pwsh", "go"]);
        assert_eq!(merged.extensions[0].image, "ghcr.io/org/pwsh:v3");
    }

    #[test]
    fn test_registry_and_defaults_sections() {
        let base = Config {
            registry: Some(RegistrySettings {
                default: "ghcr.io".to_string(),
                timeout: 30,
                retry_attempts: 3,
                authentication: Some(RegistryAuthentication {
                    required: Some(true),
                    username_env: "GITHUB_USERNAME".to_string(),
                    token_env: "GITHUB_TOKEN".to_string(),
                }),
                ..Default::default()
            }),
            defaults: Some(Defaults {
                remove_after: Some(true),
                ..Default::default()
            }),
            environment: Environment {
                secrets: vec![SecretMapping {
                    name: "NPM_TOKEN".to_string(),
                    env: "HOST_NPM".to_string(),
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let overlay = Config {
            registry: Some(RegistrySettings {
                timeout: 90,
                ghcr_cache_seconds: 60,
                authentication: Some(RegistryAuthentication {
                    token_env: "CI_TOKEN".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            defaults: Some(Defaults {
                pull_policy: "Never".to_string(),
                ..Default::default()
            }),
            environment: Environment {
                secrets: vec![SecretMapping {
                    name: "NPM_TOKEN".to_string(),
                    env: "OTHER_NPM".to_string(),
                }],
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = merge_configs(&base, &overlay);
        let registry = merged.registry.as_ref().unwrap();
        assert_eq!(registry.default, "ghcr.io");
        assert_eq!(registry.timeout, 90);
        assert_eq!(registry.retry_attempts, 3);
        assert_eq!(registry.ghcr_cache_seconds, 60);
        let auth = registry.authentication.as_ref().unwrap();
        assert_eq!(auth.required, Some(true));
        assert_eq!(auth.username_env, "GITHUB_USERNAME");
        assert_eq!(auth.token_env, "CI_TOKEN");

        let defaults = merged.defaults.as_ref().unwrap();
        assert_eq!(defaults.remove_after, Some(true));
        assert_eq!(defaults.pull_policy, "Never");

        assert_eq!(merged.environment.secrets.len(), 1);
        assert_eq!(merged.environment.secrets[0].env, "OTHER_NPM");
    }

    #[test]
    fn test_missing_sections_are_created() {
        let base = Config::default();
        let overlay = Config {
            registry: Some(RegistrySettings {
                default: "registry.example.com".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged.registry_host(), "registry.example.com");
    }
}
