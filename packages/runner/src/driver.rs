// ABOUTME: Drives one disposable container through its lifecycle
// ABOUTME: Create, start, follow logs, wait, and always remove once the container exists

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::interrupt::InterruptSignal;
use crate::providers::{ContainerConfig, ContainerRuntime, OutputChunk, VolumeMount};
use crate::staging::StagingContext;
use crate::types::{SandboxRun, SANDBOX_WORKDIR};

/// Grace period given to a container being stopped after a timeout or interrupt
const STOP_GRACE_SECS: u64 = 5;

/// Callback receiving every log chunk as it arrives
pub type LogObserver = Arc<dyn Fn(&OutputChunk) + Send + Sync>;

enum StopReason {
    Timeout(Duration),
    Interrupted,
}

pub struct SandboxDriver {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Option<Duration>,
    interrupt: Option<InterruptSignal>,
    container_user: Option<String>,
    observer: Option<LogObserver>,
}

impl SandboxDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            timeout: None,
            interrupt: None,
            container_user: host_user(),
            observer: None,
        }
    }

    /// `None` waits for the container indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abandon the run once `signal` is raised, tearing down any container already created
    pub fn with_interrupt(mut self, signal: InterruptSignal) -> Self {
        self.interrupt = Some(signal);
        self
    }

    /// Override the `uid:gid` the container runs as
    pub fn with_container_user(mut self, user: Option<String>) -> Self {
        self.container_user = user;
        self
    }

    pub fn with_observer(mut self, observer: LogObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn container_user(&self) -> Option<&str> {
        self.container_user.as_deref()
    }

    /// Run `command` in a fresh container with `context` mounted as the workspace.
    ///
    /// Once the container has been created it is removed on every path.
    pub async fn run(
        &self,
        context: &StagingContext,
        command: Vec<String>,
        env_vars: HashMap<String, String>,
        image: &str,
    ) -> Result<SandboxRun> {
        // No container exists yet, so an interrupt here has nothing to tear down
        tokio::select! {
            biased;
            _ = interrupted(self.interrupt.as_ref()) => {
                warn!("Interrupted before a sandbox container was created");
                return Err(SandboxError::Interrupted {
                    logs: String::new(),
                });
            }
            prepared = self.prepare(image) => prepared?,
        }

        let config = ContainerConfig {
            image: image.to_string(),
            name: format!("scriptbox-{}", uuid::Uuid::new_v4().simple()),
            env_vars,
            volumes: vec![VolumeMount {
                host_path: context.path().to_string_lossy().into_owned(),
                container_path: SANDBOX_WORKDIR.to_string(),
                readonly: false,
            }],
            command,
            working_dir: SANDBOX_WORKDIR.to_string(),
            user: self.container_user.clone(),
            labels: HashMap::new(),
        };

        let container_id = self.runtime.create_container(&config).await?;
        debug!("Sandbox container {} created as {}", config.name, container_id);

        let mut buffer = Vec::new();
        let body = self.supervise(&container_id, &mut buffer).await;
        let logs = String::from_utf8_lossy(&buffer).into_owned();

        let removal = self.runtime.remove_container(&container_id).await;

        match (body, removal) {
            (Ok(exit_code), Ok(())) => {
                info!("Sandbox {} exited with code {}", config.name, exit_code);
                Ok(SandboxRun { exit_code, logs })
            }
            (Err(err), Ok(())) => Err(attach_logs(err, logs)),
            (body, Err(removal_err)) => {
                error!(
                    "Failed to remove sandbox container {}: {}",
                    container_id, removal_err
                );
                let mut cause = format!(
                    "failed to remove container {}: {}",
                    container_id, removal_err
                );
                if let Err(body_err) = body {
                    cause.push_str(&format!(" (after: {})", body_err));
                }
                Err(SandboxError::Unavailable {
                    cause,
                    logs: Some(logs),
                })
            }
        }
    }

    async fn prepare(&self, image: &str) -> Result<()> {
        if !self.runtime.is_available().await? {
            return Err(SandboxError::unavailable(
                "container runtime is not reachable. Is the Docker daemon running?",
            ));
        }
        self.runtime.ensure_image(image).await?;
        Ok(())
    }

    /// Run the container body, racing it against the time limit and the interrupt
    async fn supervise(&self, container_id: &str, buffer: &mut Vec<u8>) -> Result<i64> {
        let reason = {
            let body = self.execute(container_id, buffer);
            tokio::select! {
                result = body => return result,
                _ = deadline(self.timeout) => StopReason::Timeout(self.timeout.unwrap_or_default()),
                _ = interrupted(self.interrupt.as_ref()) => StopReason::Interrupted,
            }
        };

        if let Err(e) = self
            .runtime
            .stop_container(container_id, STOP_GRACE_SECS)
            .await
        {
            warn!("Failed to stop container {}: {}", container_id, e);
        }

        let logs = String::from_utf8_lossy(buffer).into_owned();
        Err(match reason {
            StopReason::Timeout(limit) => {
                warn!("Sandbox {} exceeded its {:?} limit", container_id, limit);
                SandboxError::Timeout { limit, logs }
            }
            StopReason::Interrupted => {
                warn!("Interrupted; tearing down sandbox {}", container_id);
                SandboxError::Interrupted { logs }
            }
        })
    }

    async fn execute(&self, container_id: &str, buffer: &mut Vec<u8>) -> Result<i64> {
        self.runtime.start_container(container_id).await?;

        let mut stream = self.runtime.stream_logs(container_id).await?;
        while let Some(chunk) = stream.receiver.recv().await {
            if let Some(observer) = &self.observer {
                observer(&chunk);
            }
            buffer.extend_from_slice(&chunk.data);
        }

        Ok(self.runtime.wait_container(container_id).await?)
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn interrupted(signal: Option<&InterruptSignal>) {
    match signal {
        Some(signal) => signal.raised().await,
        None => std::future::pending().await,
    }
}

fn attach_logs(err: SandboxError, collected: String) -> SandboxError {
    match err {
        SandboxError::Unavailable { cause, logs: None } if !collected.is_empty() => {
            SandboxError::Unavailable {
                cause,
                logs: Some(collected),
            }
        }
        other => other,
    }
}

/// Effective `uid:gid` of this process so sandbox output stays owned by the caller
#[cfg(unix)]
fn host_user() -> Option<String> {
    use nix::unistd::{getegid, geteuid};
    Some(format!("{}:{}", geteuid(), getegid()))
}

#[cfg(not(unix))]
fn host_user() -> Option<String> {
    None
}
