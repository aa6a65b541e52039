// ABOUTME: Docker runtime implementation for disposable script sandboxes
// ABOUTME: Uses bollard to pull images and run, follow, wait on and remove containers

use super::{
    ContainerConfig, ContainerRuntime, OutputChunk, OutputStream, ProviderError, Result,
    StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions, WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::HostConfig,
    Docker,
};
use futures::StreamExt;
use scriptbox_config::settings::DEFAULT_PULL_TIMEOUT_SECS;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LABEL_PREFIX: &str = "scriptbox.sandbox";

pub struct DockerProvider {
    client: Docker,
    /// Timeout for image pull operations
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Create a new Docker provider with the default pull timeout
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS))
    }

    /// Create a new Docker provider with custom pull timeout
    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    /// Create with a specific Docker connection and custom timeout
    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            pull_timeout: timeout,
        }
    }

    pub fn pull_timeout(&self) -> Duration {
        self.pull_timeout
    }

    /// Convert our config to bollard config
    fn to_bollard_config(config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(format!("{}.managed", LABEL_PREFIX), "true".to_string());
        labels.insert(format!("{}.name", LABEL_PREFIX), config.name.clone());

        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|v| {
                format!(
                    "{}:{}:{}",
                    v.host_path,
                    v.container_path,
                    if v.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let mut env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        let host_config = HostConfig {
            binds: Some(binds),
            cap_drop: Some(vec!["ALL".to_string()]),
            privileged: Some(false),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: Some(config.command.clone()),
            // The image entrypoint must not wrap the composed command
            entrypoint: Some(vec![]),
            env: Some(env),
            working_dir: Some(config.working_dir.clone()),
            user: config.user.clone(),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(classify_client_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

/// Daemon-level failures are reported as unavailability, everything else as container errors
fn classify_client_error(err: BollardError) -> ProviderError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => ProviderError::ContainerError(format!("{} (status {})", message, status_code)),
        other => ProviderError::NotAvailable(format!(
            "{}. Is the Docker daemon running?",
            other
        )),
    }
}

#[async_trait]
impl ContainerRuntime for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }
        self.pull_image(image).await
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(config))
            .await
            .map_err(classify_client_error)?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", config.name, warning);
        }
        debug!("Created container: {}", container.id);

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify_client_error)
    }

    async fn stream_logs(&self, container_id: &str) -> Result<OutputStream> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };

        let logs = self.client.logs(container_id, Some(options));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stream = Box::pin(logs);
            while let Some(result) = stream.next().await {
                match result {
                    Ok(log) => {
                        let (stream_type, data) = match log {
                            LogOutput::StdOut { message } => (StreamType::Stdout, message.to_vec()),
                            LogOutput::StdErr { message } => (StreamType::Stderr, message.to_vec()),
                            LogOutput::Console { message } => {
                                (StreamType::Stdout, message.to_vec())
                            }
                            _ => continue,
                        };

                        let chunk = OutputChunk {
                            timestamp: chrono::Utc::now(),
                            stream: stream_type,
                            data,
                        };

                        if tx.send(chunk).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => {
                        error!("Error streaming logs: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(OutputStream { receiver: rx })
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };

        let mut stream = self.client.wait_container(container_id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(classify_client_error(e)),
            None => Err(ProviderError::ContainerError(format!(
                "Wait stream for container {} ended without a status",
                container_id
            ))),
        }
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        match self
            .client
            .stop_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            // Container already stopped is not an error
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(classify_client_error(e)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        info!("Removing container: {}", container_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true, // Remove anonymous volumes
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            // Container already removed is not an error
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(classify_client_error(e)),
        }
    }
}
