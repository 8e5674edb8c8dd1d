//! Docker-backed artifact backend
//!
//! Base artifacts are built with `docker build`. Incremental snapshots are
//! produced by running the snapshot command inside a container created from
//! the base image and committing that container. Remote presence is checked
//! through `docker manifest inspect` or the registry v2 HTTP API.

use crate::backend::{ArtifactBackend, BuildContext};
use crate::error::RegistryError;
use crate::{ArtifactKind, ArtifactLocation, ArtifactRef, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json";

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. `https://ghcr.io`
    pub registry_url: String,
    /// Namespace images are pushed under
    pub namespace: String,
    /// Bearer token for manifest lookups (optional for public registries)
    pub token: Option<String>,
    /// Whether to use the docker CLI or the HTTP API for remote lookups
    pub use_cli: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            registry_url: std::env::var("INCBUILD_REGISTRY")
                .unwrap_or_else(|_| "https://ghcr.io".to_string()),
            namespace: std::env::var("INCBUILD_REGISTRY_NAMESPACE")
                .unwrap_or_else(|_| "incbuild".to_string()),
            token: std::env::var("INCBUILD_REGISTRY_TOKEN").ok(),
            use_cli: true,
        }
    }
}

impl RegistryConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific registry
    pub fn new(registry_url: &str, namespace: &str) -> Self {
        RegistryConfig {
            registry_url: registry_url.to_string(),
            namespace: namespace.to_string(),
            token: None,
            use_cli: true,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Use the HTTP API instead of the CLI for remote lookups
    pub fn with_http(mut self) -> Self {
        self.use_cli = false;
        self
    }

    /// Registry host without scheme, e.g. `ghcr.io`
    pub fn host(&self) -> &str {
        self.registry_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }

    /// Fully-qualified image reference for an artifact.
    pub fn image(&self, artifact: &ArtifactRef) -> String {
        let repository = artifact.repository(&self.namespace);
        if self.host().is_empty() {
            format!("{}:{}", repository, artifact.kind.tag())
        } else {
            format!("{}/{}:{}", self.host(), repository, artifact.kind.tag())
        }
    }
}

/// Artifact backend driving the docker CLI
pub struct DockerBackend {
    config: RegistryConfig,
    http_client: reqwest::Client,
}

impl DockerBackend {
    /// Create a new docker backend
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("incbuild-artifact-registry/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(DockerBackend {
            config,
            http_client,
        })
    }

    /// Create backend from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::from_env())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    async fn docker(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, "docker");
        Command::new("docker").args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegistryError::DockerNotFound
            } else {
                RegistryError::Io(e)
            }
        })
    }

    /// Run docker and turn a non-zero exit into `CommandFailed`.
    async fn docker_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.docker(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RegistryError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn exists_locally(&self, image: &str) -> Result<bool> {
        let output = self.docker(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn exists_remotely(&self, artifact: &ArtifactRef, image: &str) -> Result<bool> {
        if self.config.use_cli {
            let output = self.docker(&["manifest", "inspect", image]).await?;
            Ok(output.status.success())
        } else {
            self.exists_remotely_http(artifact).await
        }
    }

    async fn exists_remotely_http(&self, artifact: &ArtifactRef) -> Result<bool> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.registry_url.trim_end_matches('/'),
            artifact.repository(&self.config.namespace),
            artifact.kind.tag()
        );

        let mut request = self.http_client.head(&url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(RegistryError::Http(format!("HEAD {} returned {}", url, s))),
        }
    }

    async fn build_base(&self, image: &str, ctx: &BuildContext) -> Result<()> {
        let context_dir = ctx.context_dir.to_string_lossy();
        self.docker_checked(&["build", "-t", image, context_dir.as_ref()])
            .await?;
        Ok(())
    }

    async fn build_snapshot(&self, artifact: &ArtifactRef, ctx: &BuildContext) -> Result<()> {
        let base = self.config.image(&ArtifactRef::new(
            artifact.project.clone(),
            ArtifactKind::Base,
        ));
        if !self.exists_locally(&base).await? {
            return Err(RegistryError::BuildFailed {
                artifact: artifact.to_string(),
                reason: format!("base image {} is not present locally", base),
            });
        }

        let image = self.config.image(artifact);
        let container = snapshot_container(artifact);
        let steps = snapshot_steps(&base, &image, &container, ctx);

        let result = async {
            for step in &steps {
                let args: Vec<&str> = step.args.iter().map(String::as_str).collect();
                if step.checked {
                    self.docker_checked(&args).await?;
                } else {
                    self.docker(&args).await?;
                }
            }
            Ok::<(), RegistryError>(())
        }
        .await;

        // The container is removed whether or not the snapshot succeeded.
        if let Err(e) = self.docker(&["rm", "-f", &container]).await {
            warn!(container = %container, error = %e, "failed to remove snapshot container");
        }

        result.map_err(|e| RegistryError::BuildFailed {
            artifact: artifact.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One docker invocation of a multi-step operation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DockerStep {
    args: Vec<String>,
    /// A non-zero exit aborts the operation.
    checked: bool,
}

impl DockerStep {
    fn must_succeed(args: Vec<String>) -> Self {
        Self { args, checked: true }
    }
}

fn snapshot_container(artifact: &ArtifactRef) -> String {
    format!(
        "incbuild-snapshot-{}",
        artifact.project.to_ascii_lowercase().replace('/', "-")
    )
}

/// Invocations that turn `base` into the committed snapshot `image`.
///
/// Starts by force-removing `container`, which an interrupted run may have
/// left behind and which would make `docker create` fail.
fn snapshot_steps(base: &str, image: &str, container: &str, ctx: &BuildContext) -> Vec<DockerStep> {
    let mut create: Vec<String> = vec!["create".to_string(), format!("--name={}", container)];
    for env in &ctx.snapshot_env {
        create.push(format!("--env={}", env));
    }
    create.push(format!("-v={}:/src/project", ctx.context_dir.to_string_lossy()));
    create.push(base.to_string());
    create.extend(ctx.snapshot_command.iter().cloned());

    vec![
        DockerStep {
            args: vec!["rm".to_string(), "-f".to_string(), container.to_string()],
            checked: false,
        },
        DockerStep::must_succeed(create),
        DockerStep::must_succeed(vec![
            "start".to_string(),
            "-a".to_string(),
            container.to_string(),
        ]),
        DockerStep::must_succeed(vec![
            "container".to_string(),
            "commit".to_string(),
            container.to_string(),
            image.to_string(),
        ]),
    ]
}

#[async_trait]
impl ArtifactBackend for DockerBackend {
    async fn locate(&self, artifact: &ArtifactRef) -> Result<ArtifactLocation> {
        let image = self.config.image(artifact);
        let local = self.exists_locally(&image).await?;
        let remote = self.exists_remotely(artifact, &image).await?;
        Ok(ArtifactLocation::from_presence(local, remote))
    }

    async fn build(&self, artifact: &ArtifactRef, ctx: &BuildContext) -> Result<()> {
        info!(artifact = %artifact, "Building artifact");
        match artifact.kind {
            ArtifactKind::Base => {
                let image = self.config.image(artifact);
                self.build_base(&image, ctx)
                    .await
                    .map_err(|e| RegistryError::BuildFailed {
                        artifact: artifact.to_string(),
                        reason: e.to_string(),
                    })
            }
            ArtifactKind::IncrementalSnapshot => self.build_snapshot(artifact, ctx).await,
        }
    }

    async fn push(&self, artifact: &ArtifactRef) -> Result<()> {
        let image = self.config.image(artifact);
        if !self.exists_locally(&image).await? {
            return Err(RegistryError::NothingToPush(artifact.to_string()));
        }

        info!(artifact = %artifact, image = %image, "Pushing artifact");
        self.docker_checked(&["push", &image])
            .await
            .map_err(|e| RegistryError::PushFailed {
                artifact: artifact.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_new() {
        let config = RegistryConfig::new("https://registry.example.com", "ci");
        assert_eq!(config.registry_url, "https://registry.example.com");
        assert_eq!(config.namespace, "ci");
        assert!(config.use_cli);
    }

    #[test]
    fn test_registry_config_with_token_and_http() {
        let config = RegistryConfig::new("https://r.example.com", "ci")
            .with_token("secret-token")
            .with_http();
        assert_eq!(config.token, Some("secret-token".to_string()));
        assert!(!config.use_cli);
    }

    #[test]
    fn test_image_reference() {
        let config = RegistryConfig::new("https://ghcr.io/", "acme");
        let base = ArtifactRef::new("oss/jvm/commons-lang", ArtifactKind::Base);
        let inc = ArtifactRef::new("oss/jvm/commons-lang", ArtifactKind::IncrementalSnapshot);
        assert_eq!(config.host(), "ghcr.io");
        assert_eq!(config.image(&base), "ghcr.io/acme/oss/jvm/commons-lang:base");
        assert_eq!(config.image(&inc), "ghcr.io/acme/oss/jvm/commons-lang:inc");
    }

    #[test]
    fn test_snapshot_steps_clear_stale_container_first() {
        let artifact = ArtifactRef::new("OSS/jvm/alpha", ArtifactKind::IncrementalSnapshot);
        let container = snapshot_container(&artifact);
        assert_eq!(container, "incbuild-snapshot-oss-jvm-alpha");

        let ctx = BuildContext::new("/src/alpha").with_snapshot_env(vec!["RTS_ON=1".to_string()]);
        let steps = snapshot_steps("r/alpha:base", "r/alpha:inc", &container, &ctx);
        let commands: Vec<&str> = steps.iter().map(|s| s.args[0].as_str()).collect();
        assert_eq!(commands, vec!["rm", "create", "start", "container"]);

        assert_eq!(steps[0].args, vec!["rm", "-f", "incbuild-snapshot-oss-jvm-alpha"]);
        assert!(!steps[0].checked);
        assert!(steps[1..].iter().all(|s| s.checked));
        assert_eq!(
            steps[1].args,
            vec![
                "create",
                "--name=incbuild-snapshot-oss-jvm-alpha",
                "--env=RTS_ON=1",
                "-v=/src/alpha:/src/project",
                "r/alpha:base",
                "compile",
            ]
        );
        assert_eq!(steps[3].args.last().map(String::as_str), Some("r/alpha:inc"));
    }

    #[test]
    fn test_image_reference_without_registry() {
        let config = RegistryConfig::new("", "");
        let base = ArtifactRef::new("a/b/c", ArtifactKind::Base);
        assert_eq!(config.image(&base), "a/b/c:base");
    }
}
