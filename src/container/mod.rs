//! Docker-backed execution of extensions.

pub mod config;
pub mod detect;
pub mod docker;
pub mod env;
pub mod error;
pub mod host;
pub mod io;
pub mod metadata;
pub mod policy;

pub use crate::config::PullPolicy;
pub use config::{
    CONTAINER_NAME_PREFIX, EXTENSION_LABEL, ExtensionConfig, HostContext, MANAGED_LABEL,
    container_name, create_container_config, create_host_config,
};
pub use detect::{Unreachable, unreachable_hint};
pub use docker::{DOCKER_HOST_ENV, connect_docker};
pub use env::{ContainerEnv, EnvContext, build_env, is_ci};
pub use error::{ContainerError, Result};
pub use host::ContainerHost;
pub use metadata::{METADATA_COMMAND, MetadataTimeouts};
pub use policy::{ImageAction, LocalImage, PullAuth, PullDecision, pull_auth, resolve_pull};
