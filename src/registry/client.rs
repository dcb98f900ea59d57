//! Minimal OCI distribution client for tag lookups.
//!
//! Only what the pin check needs: a pull-scoped bearer token, the tag list,
//! and the digest currently behind `latest`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::registry::RegistryError;
use crate::registry::reference::ImageReference;

const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DOCKER_HUB_AUTH: &str = "https://auth.docker.io/token";
const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Tags and `latest` digest for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTags {
    pub tags: Vec<String>,
    /// Empty when the repository has no `latest` tag.
    pub latest_sha: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Basic credentials used for the token exchange.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

pub struct RegistryClient {
    http: reqwest::Client,
    default_registry: String,
    retry_attempts: u32,
    credentials: Option<BasicCredentials>,
}

impl RegistryClient {
    pub fn new(default_registry: &str, timeout: Duration, retry_attempts: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("r2r/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            default_registry: default_registry.to_string(),
            retry_attempts: retry_attempts.max(1),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<BasicCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Fetch the tag list and the `latest` digest for `image`.
    pub async fn fetch_tags(&self, image: &str) -> Result<ImageTags, RegistryError> {
        let reference = ImageReference::parse(image);
        let endpoints = self.endpoints(&reference);

        let token = self.pull_token(&endpoints).await?;

        let tags_url = format!(
            "https://{}/v2/{}/tags/list",
            endpoints.api_host, endpoints.repository
        );
        let response = self
            .send_with_retry(&tags_url, || {
                self.authorized(self.http.get(&tags_url), token.as_ref())
            })
            .await?;
        let list: TagList = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse {
                url: tags_url.clone(),
                reason: e.to_string(),
            })?;

        let manifest_url = format!(
            "https://{}/v2/{}/manifests/latest",
            endpoints.api_host, endpoints.repository
        );
        let latest_sha = match self
            .send_with_retry(&manifest_url, || {
                self.authorized(
                    self.http
                        .head(&manifest_url)
                        .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT),
                    token.as_ref(),
                )
            })
            .await
        {
            Ok(resp) => resp
                .headers()
                .get("docker-content-digest")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            Err(RegistryError::Status { status: 404, .. }) => String::new(),
            Err(e) => return Err(e),
        };

        Ok(ImageTags {
            tags: list.tags.unwrap_or_default(),
            latest_sha,
        })
    }

    fn endpoints(&self, reference: &ImageReference) -> Endpoints {
        let host = reference
            .registry
            .clone()
            .unwrap_or_else(|| self.default_registry.clone());

        if host == "docker.io" || host == DOCKER_HUB_API {
            let repository = if reference.repository.contains('/') {
                reference.repository.clone()
            } else {
                format!("library/{}", reference.repository)
            };
            return Endpoints {
                api_host: DOCKER_HUB_API.to_string(),
                token_url: DOCKER_HUB_AUTH.to_string(),
                service: DOCKER_HUB_SERVICE.to_string(),
                repository,
            };
        }

        Endpoints {
            token_url: format!("https://{}/token", host),
            service: host.clone(),
            api_host: host,
            repository: reference.repository.clone(),
        }
    }

    async fn pull_token(&self, endpoints: &Endpoints) -> Result<Option<SecretString>, RegistryError> {
        let scope = format!("repository:{}:pull", endpoints.repository);
        let url = endpoints.token_url.clone();
        let response = self
            .send_with_retry(&url, || {
                let mut request = self
                    .http
                    .get(&url)
                    .query(&[("scope", scope.as_str()), ("service", endpoints.service.as_str())]);
                if let Some(creds) = &self.credentials {
                    request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
                }
                request
            })
            .await;

        // Registries without a token service accept anonymous reads directly.
        let response = match response {
            Ok(r) => r,
            Err(RegistryError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(body.token.or(body.access_token).map(SecretString::from))
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        token: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(t) => request.bearer_auth(t.expose_secret()),
            None => request,
        }
    }

    /// Send, retrying connection failures and 5xx responses with a linear backoff.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<reqwest::Response, RegistryError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 1..=self.retry_attempts {
            match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = Some(RegistryError::Status {
                        url: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Ok(resp) => {
                    return Err(RegistryError::Status {
                        url: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) => {
                    last_error = Some(RegistryError::Request {
                        url: url.to_string(),
                        reason: request_failure_reason(&e),
                    });
                }
            }
            if attempt < self.retry_attempts {
                tracing::debug!("Registry request to {} failed, retrying ({}/{})", url, attempt, self.retry_attempts);
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
        }
        Err(last_error.unwrap_or_else(|| RegistryError::Request {
            url: url.to_string(),
            reason: "no attempts made".to_string(),
        }))
    }
}

struct Endpoints {
    api_host: String,
    token_url: String,
    service: String,
    repository: String,
}

fn request_failure_reason(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    }
}
