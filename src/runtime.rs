use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::info;

use crate::error::RuntimeError;
use crate::models::{Architecture, Job};

/// Shared named volume the inference program reads inputs from and writes
/// artifacts into. Mounted read/write in every job container.
pub const DATA_VOLUME: &str = "ocelot-data";

/// Everything needed to provision one job container, derived deterministically
/// from the job payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub name: String,
    pub binds: Vec<String>,
}

impl ContainerSpec {
    /// Image and entry command per model architecture. Unrecognized
    /// architectures run on the test image; that is policy, not an error.
    /// Names carry the job id so two jobs never collide on the name slot.
    pub fn for_job(job: &Job) -> Self {
        let arch = job.data.model.architecture;
        let (image, program): (&str, &[&str]) = match arch {
            Architecture::Yolo => ("ocelot/detector-yolo:latest", &["python3", "detect.py"]),
            Architecture::Rcnn => ("ocelot/detector-rcnn:latest", &["python3", "detect.py"]),
            Architecture::Test | Architecture::Unknown => {
                ("ocelot/inference-test:latest", &["node", "main.js"])
            }
        };

        // The container receives the whole job payload as one argument.
        let payload = serde_json::to_string(&job.data).unwrap_or_default();
        let mut cmd: Vec<String> = program.iter().map(|s| s.to_string()).collect();
        cmd.push(payload);

        Self {
            image: image.to_string(),
            cmd,
            name: format!("ocelot-{}-{}", arch.slug(), job.id),
            binds: vec![format!("{}:/data:rw", DATA_VOLUME)],
        }
    }
}

/// Thin seam over the container engine: create, start, observe, destroy.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    /// Combined stdout/stderr in follow mode. The stream ends when the
    /// container exits or is removed.
    fn follow_logs(&self, name: &str) -> BoxStream<'static, Result<Vec<u8>, RuntimeError>>;
    /// Block until the container exits and return its exit code.
    async fn wait(&self, name: &str) -> Result<i64, RuntimeError>;
    /// Forced removal; kills the container if it is still running.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    async fn ensure_image(&self, image: &str) -> Result<(), bollard::errors::Error> {
        let image = if !image.contains(':') {
            format!("{}:latest", image)
        } else {
            image.to_string()
        };
        if self.docker.inspect_image(&image).await.is_ok() {
            return Ok(());
        }
        info!("Pulling image {}...", image);
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(_) = stream.try_next().await? {}
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let mut labels = HashMap::new();
        labels.insert("managed_by".to_string(), "ocelot".to_string());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                auto_remove: Some(false),
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    fn follow_logs(&self, name: &str) -> BoxStream<'static, Result<Vec<u8>, RuntimeError>> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "all".to_string(),
            ..Default::default()
        });
        self.docker
            .logs(name, options)
            .map(|item| match item {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => Ok(message.to_vec()),
                Ok(_) => Ok(Vec::new()),
                Err(e) => Err(RuntimeError::Engine(e)),
            })
            .boxed()
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        let mut wait_stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        match wait_stream.next().await {
            Some(Ok(body)) => Ok(body.status_code),
            // bollard reports a non-zero exit as a wait error; it is still an exit.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::Engine(e)),
            None => {
                // Wait stream closed without a status; fall back to inspect.
                let inspect = self.docker.inspect_container(name, None).await?;
                Ok(inspect.state.and_then(|s| s.exit_code).unwrap_or(-1))
            }
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobData};

    fn job(id: &str, arch: &str) -> Job {
        let data: JobData = serde_json::from_value(serde_json::json!({
            "userEmail": "a@b.com",
            "callCost": 5,
            "resultUUID": "u1",
            "model": { "architecture": arch },
            "images": [{ "id": "img-1" }]
        }))
        .unwrap();
        Job {
            id: id.to_string(),
            name: "inference".to_string(),
            data,
        }
    }

    #[test]
    fn architectures_map_to_their_images() {
        let spec = ContainerSpec::for_job(&job("j-1", "yolo"));
        assert_eq!(spec.image, "ocelot/detector-yolo:latest");
        assert_eq!(spec.cmd[0], "python3");

        let spec = ContainerSpec::for_job(&job("j-1", "rcnn"));
        assert_eq!(spec.image, "ocelot/detector-rcnn:latest");
    }

    #[test]
    fn unrecognized_architecture_falls_back_to_test_image() {
        let spec = ContainerSpec::for_job(&job("j-1", "resnet"));
        assert_eq!(spec.image, "ocelot/inference-test:latest");
        assert_eq!(spec.cmd[0], "node");
    }

    #[test]
    fn container_names_are_derived_per_job() {
        let a = ContainerSpec::for_job(&job("j-1", "yolo"));
        let b = ContainerSpec::for_job(&job("j-2", "yolo"));
        assert_ne!(a.name, b.name);
        assert!(a.name.contains("j-1"));
        assert!(b.name.contains("j-2"));
    }

    #[test]
    fn payload_travels_as_single_trailing_argument() {
        let source = job("j-1", "test");
        let spec = ContainerSpec::for_job(&source);
        let decoded: JobData = serde_json::from_str(spec.cmd.last().unwrap()).unwrap();
        assert_eq!(decoded.user_email, source.data.user_email);
        assert_eq!(decoded.result_request_id, source.data.result_request_id);
    }

    #[test]
    fn data_volume_is_bound_read_write() {
        let spec = ContainerSpec::for_job(&job("j-1", "yolo"));
        assert_eq!(spec.binds.len(), 1);
        assert!(spec.binds[0].starts_with(DATA_VOLUME));
        assert!(spec.binds[0].ends_with(":rw"));
    }
}
