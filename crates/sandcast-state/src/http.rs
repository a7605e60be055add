//! HTTP control-plane client
//!
//! Implements [`BuildService`], [`TagRegistry`] and [`SandboxProvider`] over a
//! JSON REST API:
//!
//! | call | endpoint |
//! |---|---|
//! | upload copy source | `PUT /templates/files/{sha256}` (tar body) |
//! | submit build | `POST /templates/builds` |
//! | build events | `GET /templates/builds/{id}/events?cursor=N` |
//! | assign tags | `POST /templates/tags` |
//! | resolve ref | `GET /templates/refs/{reference}` |
//! | create sandbox | `POST /sandboxes` |
//! | run command | `POST /sandboxes/{id}/commands` |
//! | terminate | `DELETE /sandboxes/{id}` (404 = already gone) |

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::service_traits::*;

/// Control-plane connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    /// Base URL, e.g. `https://api.example.com`
    pub api_url: String,
    /// Bearer token (optional for local deployments)
    pub api_key: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Delay between build event polls when no new events are available
    pub poll_interval: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig {
            api_url: "http://localhost:8080".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl ControlPlaneConfig {
    /// Create config for a specific server
    pub fn new(api_url: &str) -> Self {
        ControlPlaneConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set authentication token
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }
}

/// Control-plane client
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    config: ControlPlaneConfig,
    client: reqwest::Client,
}

// -- wire types -------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStep<'a> {
    BaseImage { image: &'a str },
    PackageInstall { packages: &'a [String] },
    RunCommand { commands: &'a [String] },
    Copy { files_hash: String, remote_path: &'a str },
    SetWorkdir { path: &'a str },
}

#[derive(Debug, Serialize)]
struct SubmitBuildBody<'a> {
    template: &'a str,
    tag: Option<&'a str>,
    cpu_count: u32,
    memory_mb: u32,
    steps: Vec<WireStep<'a>>,
}

#[derive(Debug, Deserialize)]
struct SubmitBuildResponse {
    build_id: String,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    events: Vec<BuildEvent>,
    next_cursor: u64,
    done: bool,
}

#[derive(Debug, Serialize)]
struct AssignTagsBody<'a> {
    target: &'a str,
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    artifact: ArtifactRef,
}

#[derive(Debug, Serialize)]
struct CreateSandboxBody<'a> {
    template: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct RunCommandBody<'a> {
    command: &'a str,
}

// -- client -----------------------------------------------------------------

impl HttpControlPlane {
    /// Create a new control-plane client
    pub fn new(config: ControlPlaneConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sandcast/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(HttpControlPlane { config, client })
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Upload a copy source as a tar archive, returning its content hash.
    async fn upload_copy_source(&self, local_path: &Path) -> ServiceResult<String> {
        let path = local_path.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || archive_copy_source(&path))
            .await
            .map_err(|e| ServiceError::Unavailable(format!("archive task failed: {}", e)))??;

        let files_hash = hex::encode(Sha256::digest(&archive));
        debug!(path = %local_path.display(), files_hash = %files_hash, bytes = archive.len(), "uploading copy source");

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/templates/files/{}", files_hash),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(archive)
            .send()
            .await?;
        check_status(response, &local_path.display().to_string()).await?;
        Ok(files_hash)
    }
}

/// Pack a file or directory tree into an in-memory tar archive.
fn archive_copy_source(local_path: &Path) -> ServiceResult<Vec<u8>> {
    let metadata = std::fs::metadata(local_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ServiceError::NotFound {
                reference: local_path.display().to_string(),
            }
        } else {
            ServiceError::Io(e)
        }
    })?;

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    if metadata.is_dir() {
        builder.append_dir_all(".", local_path)?;
    } else {
        let name = local_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("file"));
        builder.append_path_with_name(local_path, name)?;
    }
    Ok(builder.into_inner()?)
}

/// Map non-success statuses onto [`ServiceError`].
async fn check_status(
    response: reqwest::Response,
    reference: &str,
) -> ServiceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(ServiceError::NotFound {
            reference: reference.to_string(),
        }),
        StatusCode::GONE => Err(ServiceError::SessionTerminated {
            session_id: reference.to_string(),
        }),
        s if s.is_server_error() => Err(ServiceError::Unavailable(format!(
            "{} returned {}: {}",
            reference, s, message
        ))),
        s => Err(ServiceError::Rejected {
            status: s.as_u16(),
            message,
        }),
    }
}

/// Polling state behind the build event stream.
struct EventPoller {
    plane: HttpControlPlane,
    build_id: String,
    cursor: u64,
    pending: VecDeque<BuildEvent>,
    done: bool,
}

impl EventPoller {
    async fn fetch(&mut self) -> ServiceResult<()> {
        let path = format!(
            "/templates/builds/{}/events?cursor={}",
            self.build_id, self.cursor
        );
        let response = self
            .plane
            .request(reqwest::Method::GET, &path)
            .send()
            .await?;
        let page: EventsPage = check_status(response, &self.build_id)
            .await?
            .json()
            .await?;

        let empty = page.events.is_empty();
        self.cursor = page.next_cursor;
        self.done = page.done;
        self.pending.extend(page.events);
        if empty && !self.done {
            tokio::time::sleep(self.plane.config.poll_interval).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BuildService for HttpControlPlane {
    async fn submit(&self, request: &BuildRequest) -> ServiceResult<BuildEventStream> {
        let mut steps = Vec::with_capacity(request.steps.len());
        for step in &request.steps {
            steps.push(match step {
                BuildStep::BaseImage { image } => WireStep::BaseImage { image },
                BuildStep::PackageInstall { packages } => WireStep::PackageInstall { packages },
                BuildStep::RunCommand { commands } => WireStep::RunCommand { commands },
                BuildStep::CopySource {
                    local_path,
                    remote_path,
                } => WireStep::Copy {
                    files_hash: self.upload_copy_source(local_path).await?,
                    remote_path,
                },
                BuildStep::SetWorkdir { path } => WireStep::SetWorkdir { path },
            });
        }

        let body = SubmitBuildBody {
            template: &request.template,
            tag: request.tag.as_deref(),
            cpu_count: request.cpu_count,
            memory_mb: request.memory_mb,
            steps,
        };
        let response = self
            .request(reqwest::Method::POST, "/templates/builds")
            .json(&body)
            .send()
            .await?;
        let submitted: SubmitBuildResponse = check_status(response, &request.target())
            .await?
            .json()
            .await?;
        info!(build_id = %submitted.build_id, target = %request.target(), "build submitted");

        let poller = EventPoller {
            plane: self.clone(),
            build_id: submitted.build_id,
            cursor: 0,
            pending: VecDeque::new(),
            done: false,
        };

        let events = stream::unfold(Some(poller), |state| async move {
            let mut poller = state?;
            loop {
                if let Some(event) = poller.pending.pop_front() {
                    let next = if event.is_terminal() { None } else { Some(poller) };
                    return Some((Ok(event), next));
                }
                if poller.done {
                    return None;
                }
                if let Err(e) = poller.fetch().await {
                    return Some((Err(e), None));
                }
            }
        });
        Ok(events.boxed())
    }
}

#[async_trait]
impl TagRegistry for HttpControlPlane {
    async fn assign_tags(&self, target: &str, tags: &[String]) -> ServiceResult<ArtifactRef> {
        let response = self
            .request(reqwest::Method::POST, "/templates/tags")
            .json(&AssignTagsBody { target, tags })
            .send()
            .await?;
        let assigned: ArtifactResponse = check_status(response, target).await?.json().await?;
        Ok(assigned.artifact)
    }

    async fn resolve(&self, reference: &str) -> ServiceResult<ArtifactRef> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/templates/refs/{}", reference),
            )
            .send()
            .await?;
        let resolved: ArtifactResponse = check_status(response, reference).await?.json().await?;
        Ok(resolved.artifact)
    }
}

#[async_trait]
impl SandboxProvider for HttpControlPlane {
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle> {
        let response = self
            .request(reqwest::Method::POST, "/sandboxes")
            .json(&CreateSandboxBody {
                template: template_ref,
                timeout_ms,
            })
            .send()
            .await?;
        let created: CreateSandboxResponse =
            check_status(response, template_ref).await?.json().await?;
        Ok(SessionHandle {
            session_id: created.session_id,
            template_ref: template_ref.to_string(),
        })
    }

    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/sandboxes/{}/commands", handle.session_id),
            )
            .json(&RunCommandBody { command })
            .send()
            .await?;
        let output: CommandOutput = check_status(response, &handle.session_id)
            .await?
            .json()
            .await?;
        Ok(output)
    }

    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/sandboxes/{}", handle.session_id),
            )
            .send()
            .await?;
        match check_status(response, &handle.session_id).await {
            Ok(_) => Ok(()),
            Err(ServiceError::NotFound { .. }) | Err(ServiceError::SessionTerminated { .. }) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = ControlPlaneConfig::new("https://plane.internal/").with_api_key("k");
        assert_eq!(config.api_url, "https://plane.internal");
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_archive_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cmd")).unwrap();
        std::fs::write(dir.path().join("cmd").join("main.go"), "package main").unwrap();

        let archive = archive_copy_source(dir.path()).unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("main.go")));
    }

    #[test]
    fn test_archive_missing_source_is_not_found() {
        let err = archive_copy_source(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[test]
    fn test_wire_copy_step_uses_files_hash() {
        let step = WireStep::Copy {
            files_hash: "abc".to_string(),
            remote_path: "/opt/src",
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "copy");
        assert_eq!(json["files_hash"], "abc");
    }
}
