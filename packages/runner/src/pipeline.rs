// ABOUTME: End-to-end flow for one script invocation
// ABOUTME: Stage, compose phases, drive the sandbox, classify, then collect results on success
// ABOUTME: A raised interrupt ends the run at whichever stage it reaches, cleaning up as it unwinds

use scriptbox_config::RunnerSettings;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::collector::ResultCollector;
use crate::driver::{LogObserver, SandboxDriver};
use crate::error::{SandboxError, StageError};
use crate::interrupt::{interrupt_channel, InterruptSignal, InterruptTrigger};
use crate::outcome::{ExecutionOutcome, OutcomeClassifier};
use crate::phases::{PhaseExecutor, PhaseMarker};
use crate::providers::ContainerRuntime;
use crate::report::RunReport;
use crate::staging::ContextStager;
use crate::types::{ExecutionRequest, ImageSelector};

pub struct Pipeline {
    stager: ContextStager,
    executor: PhaseExecutor,
    driver: SandboxDriver,
    default_image: String,
    collector: ResultCollector,
    interrupt: Option<InterruptSignal>,
    ctrl_c: Option<InterruptTrigger>,
}

impl Pipeline {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: &RunnerSettings) -> Self {
        let timeout = match settings.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let mut driver = SandboxDriver::new(runtime).with_timeout(timeout);
        if let Some(user) = &settings.container_user {
            driver = driver.with_container_user(Some(user.clone()));
        }

        Self {
            stager: ContextStager::new(),
            executor: PhaseExecutor::new(),
            driver,
            default_image: settings.default_image.clone(),
            collector: ResultCollector::new(&settings.results_dir),
            interrupt: None,
            ctrl_c: None,
        }
    }

    pub fn with_observer(mut self, observer: LogObserver) -> Self {
        self.driver = self.driver.with_observer(observer);
        self
    }

    /// Treat Ctrl-C during `execute` as an interrupt instead of letting it kill the process
    pub fn with_interrupt_handling(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let (trigger, signal) = interrupt_channel();
        let mut pipeline = self.with_interrupt_signal(signal);
        pipeline.ctrl_c = Some(trigger);
        pipeline
    }

    /// Abandon runs once `signal` is raised
    pub fn with_interrupt_signal(mut self, signal: InterruptSignal) -> Self {
        self.driver = self.driver.with_interrupt(signal.clone());
        self.interrupt = Some(signal);
        self
    }

    /// Override the sandbox time limit from the settings
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.driver = self.driver.with_timeout(timeout);
        self
    }

    pub fn with_stager(mut self, stager: ContextStager) -> Self {
        self.stager = stager;
        self
    }

    pub fn results_dir(&self) -> &Path {
        self.collector.destination()
    }

    /// Image a request will run in
    pub fn image_for(&self, request: &ExecutionRequest) -> String {
        request
            .image
            .as_ref()
            .map(ImageSelector::resolve)
            .unwrap_or_else(|| self.default_image.clone())
    }

    /// Run one request to completion.
    ///
    /// Only staging errors are returned as `Err`; every later failure is an outcome.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<RunReport, StageError> {
        let listener = match &self.ctrl_c {
            Some(trigger) => Some(trigger.raise_on_ctrl_c().await),
            None => None,
        };

        let report = self.run(request).await;

        if let Some(listener) = listener {
            listener.abort();
        }
        report
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(InterruptSignal::is_raised)
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<RunReport, StageError> {
        let context = self.stager.stage(request)?;

        let marker = PhaseMarker::new();
        let command = self.executor.compose(
            &marker,
            context.script_name(),
            context.manifest_name(),
            request.script_args.as_deref(),
        );
        let image = self.image_for(request);
        info!("Running {} in {}", context.script_name(), image);

        let run = match self
            .driver
            .run(&context, command, self.executor.environment(), &image)
            .await
        {
            Ok(run) => run,
            Err(err) => return Ok(RunReport::new(sandbox_failure(err))),
        };

        if self.is_interrupted() {
            warn!("Interrupted before results were collected");
            return Ok(RunReport::new(sandbox_failure(SandboxError::Interrupted {
                logs: run.logs,
            })));
        }

        let outcome = OutcomeClassifier::new(marker).classify(run.exit_code, &run.logs);
        let mut diagnostic_files = Vec::new();

        let outcome = match outcome {
            ExecutionOutcome::Success { raw_logs, .. } => match self.collector.collect(&context) {
                Ok(captured) => ExecutionOutcome::Success { captured, raw_logs },
                Err(err) => ExecutionOutcome::InternalError {
                    cause: err.to_string(),
                    raw_logs: Some(raw_logs),
                },
            },
            failed @ ExecutionOutcome::ScriptExecutionFailed { .. } => {
                diagnostic_files = self.collector.new_files(&context).unwrap_or_else(|err| {
                    warn!("Could not list files left by the failed script: {}", err);
                    Vec::new()
                });
                failed
            }
            other => other,
        };

        // Collection is synchronous, so an interrupt arriving during it can only be reported
        if self.is_interrupted() {
            warn!("Interrupt arrived after the sandbox finished; reporting the completed run");
        }

        info!("{}", outcome.summary());
        Ok(RunReport {
            outcome,
            diagnostic_files,
        })
    }
}

fn sandbox_failure(err: SandboxError) -> ExecutionOutcome {
    let cause = match &err {
        // `summary` adds the "Sandbox unavailable" prefix itself
        SandboxError::Unavailable { cause, .. } => cause.clone(),
        other => other.to_string(),
    };
    match err {
        SandboxError::Unavailable { logs, .. } => ExecutionOutcome::SandboxUnavailable {
            cause,
            raw_logs: logs,
        },
        SandboxError::Timeout { logs, .. } | SandboxError::Interrupted { logs } => {
            ExecutionOutcome::InternalError {
                cause,
                raw_logs: (!logs.is_empty()).then_some(logs),
            }
        }
    }
}
