//! ---
//! dcu_section: "02-runtime-driver"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "docker compose CLI adapter implementing the runtime capabilities."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use dcu_common::config::ComposeConfig;
use indexmap::IndexMap;
use path_absolutize::Absolutize;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::driver::{ContainerRuntime, ServiceManifest};
use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{
    ContainerDescriptor, ContainerRef, ImageIdentity, ImageReference, ImageSummary, ServiceName,
};

const UNAVAILABLE_MARKERS: [&str; 3] = [
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
];
const NOT_FOUND_MARKERS: [&str; 2] = ["no such container", "no such object"];

/// Drives `docker compose` (and plain `docker` for inspection) as subprocesses.
///
/// The parsed compose model is read once per instance; the manifest is treated
/// as immutable for the lifetime of a run.
#[derive(Debug)]
pub struct ComposeCli {
    docker: String,
    compose_file: String,
    working_dir: PathBuf,
    command_timeout: Option<Duration>,
    project: OnceCell<ComposeProject>,
}

impl ComposeCli {
    /// Build a driver for the compose file named in `config`. Commands run from the
    /// directory containing the file so relative paths inside it resolve.
    pub fn from_config(config: &ComposeConfig) -> RuntimeResult<Self> {
        let absolute = config
            .file
            .absolutize()
            .map_err(|err| RuntimeError::Io {
                command: format!("resolve {}", config.file.display()),
                message: err.to_string(),
            })?
            .into_owned();
        let compose_file = absolute
            .file_name()
            .ok_or_else(|| {
                RuntimeError::manifest(format!(
                    "compose file path {} has no file name",
                    config.file.display()
                ))
            })?
            .to_string_lossy()
            .into_owned();
        let working_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            docker: config.docker_binary.clone(),
            compose_file,
            working_dir,
            command_timeout: config.command_timeout,
            project: OnceCell::new(),
        })
    }

    /// Absolute path of the compose file this driver operates on.
    pub fn compose_file(&self) -> PathBuf {
        self.working_dir.join(&self.compose_file)
    }

    fn compose_args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_owned(),
            "-f".to_owned(),
            self.compose_file.clone(),
        ];
        args.extend(rest.iter().map(|arg| (*arg).to_owned()));
        args
    }

    async fn exec(&self, args: Vec<String>) -> RuntimeResult<String> {
        let rendered = format!("{} {}", self.docker, args.join(" "));
        debug!(command = %rendered, "running runtime command");

        let mut command = Command::new(&self.docker);
        command
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.command_timeout {
            Some(after) => match tokio::time::timeout(after, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(RuntimeError::Timeout {
                        command: rendered,
                        after,
                    })
                }
            },
            None => command.output().await,
        };

        let output = output.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                RuntimeError::unavailable(format!("`{}` executable not found", self.docker))
            } else {
                RuntimeError::Io {
                    command: rendered.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            trace!(command = %rendered, bytes = stdout.len(), "runtime command succeeded");
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        Err(classify_failure(rendered, output.status, stderr))
    }

    async fn project(&self) -> RuntimeResult<&ComposeProject> {
        self.project
            .get_or_try_init(|| async {
                let raw = self
                    .exec(self.compose_args(&["config", "--format", "json"]))
                    .await?;
                parse_compose_project(&raw)
            })
            .await
    }
}

#[async_trait]
impl ContainerRuntime for ComposeCli {
    async fn ping(&self) -> RuntimeResult<()> {
        let args = vec![
            "version".to_owned(),
            "--format".to_owned(),
            "{{.Server.Version}}".to_owned(),
        ];
        match self.exec(args).await {
            Ok(version) => {
                debug!(server_version = %version.trim(), "container runtime reachable");
                Ok(())
            }
            Err(err @ RuntimeError::Unavailable { .. }) => Err(err),
            Err(err) => Err(RuntimeError::unavailable(err.to_string())),
        }
    }

    async fn current_container_ref(
        &self,
        service: &ServiceName,
    ) -> RuntimeResult<Option<ContainerRef>> {
        let output = self
            .exec(self.compose_args(&["ps", "-q", service.as_str()]))
            .await?;
        Ok(parse_ps_output(&output))
    }

    async fn inspect_container(
        &self,
        container: &ContainerRef,
    ) -> RuntimeResult<ContainerDescriptor> {
        let args = vec![
            "container".to_owned(),
            "inspect".to_owned(),
            container.to_string(),
        ];
        let output = match self.exec(args).await {
            Err(RuntimeError::NotFound { .. }) => {
                return Err(RuntimeError::not_found(format!("container {container}")))
            }
            other => other?,
        };
        parse_container_inspect(container, &output)
    }

    async fn list_known_images(&self) -> RuntimeResult<Vec<ImageSummary>> {
        let args = vec![
            "image".to_owned(),
            "ls".to_owned(),
            "--no-trunc".to_owned(),
            "--format".to_owned(),
            "{{json .}}".to_owned(),
        ];
        let output = self.exec(args).await?;
        parse_image_rows(&output)
    }

    async fn pull(&self, service: &ServiceName, reference: &ImageReference) -> RuntimeResult<()> {
        debug!(%service, %reference, "pulling image");
        self.exec(self.compose_args(&["pull", service.as_str()]))
            .await
            .map(|_| ())
    }

    async fn stop(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.exec(self.compose_args(&["stop", service.as_str()]))
            .await
            .map(|_| ())
    }

    async fn remove(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.exec(self.compose_args(&["rm", "-f", service.as_str()]))
            .await
            .map(|_| ())
    }

    async fn start(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.exec(self.compose_args(&["up", "-d", service.as_str()]))
            .await
            .map(|_| ())
    }

    async fn build(&self, services: &[ServiceName]) -> RuntimeResult<()> {
        let mut args = self.compose_args(&["build", "--pull"]);
        args.extend(services.iter().map(|service| service.to_string()));
        self.exec(args).await.map(|_| ())
    }
}

#[async_trait]
impl ServiceManifest for ComposeCli {
    async fn service_names(&self) -> RuntimeResult<Vec<ServiceName>> {
        Ok(self.project().await?.service_names())
    }

    async fn declared_image_reference(
        &self,
        service: &ServiceName,
    ) -> RuntimeResult<ImageReference> {
        self.project().await?.declared_reference(service)
    }
}

fn classify_failure(command: String, status: ExitStatus, stderr: String) -> RuntimeError {
    let lowered = stderr.to_lowercase();
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return RuntimeError::unavailable(stderr);
    }
    if NOT_FOUND_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return RuntimeError::not_found(stderr);
    }
    let status = match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    };
    RuntimeError::CommandFailed {
        command,
        status,
        stderr,
    }
}

#[derive(Debug, Deserialize)]
struct ComposeProject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    services: IndexMap<String, ComposeService>,
}

#[derive(Debug, Deserialize)]
struct ComposeService {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    build: Option<serde_json::Value>,
}

impl ComposeProject {
    fn service_names(&self) -> Vec<ServiceName> {
        self.services
            .keys()
            .map(|name| ServiceName::from(name.as_str()))
            .collect()
    }

    fn declared_reference(&self, service: &ServiceName) -> RuntimeResult<ImageReference> {
        let Some(definition) = self.services.get(service.as_str()) else {
            return Err(RuntimeError::manifest(format!(
                "service '{service}' does not exist in the compose file"
            )));
        };
        if let Some(image) = definition.image.as_deref() {
            return ImageReference::parse(image).ok_or_else(|| {
                RuntimeError::manifest(format!("service '{service}' declares an empty image"))
            });
        }
        // Build-only services get the image name compose assigns: `<project>-<service>`.
        match (&definition.build, self.name.as_deref()) {
            (Some(_), Some(project)) => ImageReference::parse(&format!("{project}-{service}"))
                .ok_or_else(|| {
                    RuntimeError::manifest(format!("service '{service}' has no usable image name"))
                }),
            _ => Err(RuntimeError::manifest(format!(
                "could not find image for service '{service}'"
            ))),
        }
    }
}

fn parse_compose_project(raw: &str) -> RuntimeResult<ComposeProject> {
    serde_json::from_str(raw).map_err(|err| RuntimeError::parse("compose config", err))
}

fn parse_ps_output(raw: &str) -> Option<ContainerRef> {
    raw.lines().find_map(ContainerRef::parse)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    image: String,
}

fn parse_container_inspect(
    container: &ContainerRef,
    raw: &str,
) -> RuntimeResult<ContainerDescriptor> {
    let entries: Vec<InspectEntry> = serde_json::from_str(raw)
        .map_err(|err| RuntimeError::parse(format!("inspect output for {container}"), err))?;
    let Some(entry) = entries.into_iter().next() else {
        return Err(RuntimeError::not_found(format!("container {container}")));
    };
    Ok(ContainerDescriptor {
        id: ContainerRef::parse(&entry.id).unwrap_or_else(|| container.clone()),
        image: ImageIdentity::parse(&entry.image),
    })
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Repository", default)]
    repository: String,
    #[serde(rename = "Tag", default)]
    tag: String,
}

fn parse_image_rows(raw: &str) -> RuntimeResult<Vec<ImageSummary>> {
    let mut grouped: BTreeMap<ImageIdentity, BTreeSet<ImageReference>> = BTreeMap::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let row: ImageRow =
            serde_json::from_str(line).map_err(|err| RuntimeError::parse("image listing", err))?;
        let Some(identity) = ImageIdentity::parse(&row.id) else {
            continue;
        };
        let references = grouped.entry(identity).or_default();
        if let Some(reference) = ImageReference::from_repository_tag(&row.repository, &row.tag) {
            references.insert(reference);
        }
    }
    Ok(grouped
        .into_iter()
        .map(|(identity, references)| ImageSummary {
            identity,
            references,
        })
        .collect())
}
