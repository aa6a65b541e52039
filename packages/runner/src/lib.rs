// ABOUTME: Runs a Python script with its requirements in a disposable Docker sandbox
// ABOUTME: Exposes the pipeline and its stages: staging, phases, driver, classifier and collector

pub mod collector;
pub mod driver;
pub mod error;
pub mod interrupt;
pub mod outcome;
pub mod phases;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod staging;
pub mod types;

pub use collector::{CollectError, ResultCollector};
pub use driver::{LogObserver, SandboxDriver};
pub use error::{SandboxError, StageError};
pub use interrupt::{interrupt_channel, InterruptSignal, InterruptTrigger};
pub use outcome::{ErrorKind, ExecutionOutcome, OutcomeClassifier};
pub use phases::{MarkerEvent, Phase, PhaseExecutor, PhaseMarker};
pub use pipeline::Pipeline;
pub use providers::{
    ContainerConfig, ContainerRuntime, DockerProvider, OutputChunk, OutputStream, ProviderError,
    StreamType, VolumeMount,
};
pub use report::{Invocation, ReportStatus, RunReport, StructuredReport};
pub use staging::{ContextStager, StagingContext};
pub use types::{CapturedFile, ExecutionRequest, ImageSelector, SandboxRun, SANDBOX_WORKDIR};

pub use scriptbox_config::{ExitCodePolicy, RunnerSettings};
