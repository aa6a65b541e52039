use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use scriptbox_cli::{init_tracing, render, Cli};
use scriptbox_config::RunnerSettings;
use scriptbox_runner::report::{self, Invocation};
use scriptbox_runner::{
    ContextStager, DockerProvider, ExecutionOutcome, Pipeline, RunReport,
};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = cli.apply_to(
        RunnerSettings::from_env().context("Invalid scriptbox environment configuration")?,
    );
    debug!("Effective settings: {:?}", settings);

    let request = cli.request();

    let invocation: Invocation =
        match DockerProvider::with_pull_timeout(Duration::from_secs(settings.pull_timeout_secs)) {
            Ok(provider) => {
                let mut pipeline =
                    Pipeline::new(Arc::new(provider), &settings).with_interrupt_handling(true);
                if !cli.json {
                    pipeline = pipeline.with_observer(render::stderr_streamer());
                }
                pipeline.execute(&request).await
            }
            // Missing files still take precedence over an unreachable daemon
            Err(e) => ContextStager::new().stage(&request).map(|_| {
                RunReport::new(ExecutionOutcome::SandboxUnavailable {
                    cause: e.to_string(),
                    raw_logs: None,
                })
            }),
        };

    if cli.json {
        println!(
            "{}",
            render::json(&invocation).context("Failed to serialize report")?
        );
    } else {
        println!("{}", render::human(&invocation));
    }

    Ok(report::exit_code(&invocation, settings.exit_code_policy))
}
