//! `confmount check` — one-shot publish with a JSON report.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use confmount_controller::ControllerConfig;
use confmount_writer::{AtomicWriter, PublishOutcome};

use super::SourceArgs;

/// Arguments for `confmount check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    kind: String,
    namespace: String,
    name: String,
    target: String,
    outcome: PublishOutcome,
    resource_version: String,
    files: Vec<String>,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        self.source.init_logging();

        let controller = self.source.controller(ControllerConfig::default())?;
        let target = self.source.mount_dir()?;
        let resource = controller.resource().clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let outcome = runtime
            .block_on(controller.initial_sync())
            .with_context(|| format!("failed to mount {resource}"))?;

        let files = AtomicWriter::new(&target)
            .current_files()
            .with_context(|| format!("failed to read back {}", target.display()))?
            .into_keys()
            .collect();
        let resource_version = controller
            .cached()
            .map(|snapshot| snapshot.resource_version)
            .unwrap_or_default();

        let report = CheckReport {
            kind: resource.kind.to_string(),
            namespace: resource.namespace,
            name: resource.name,
            target: target.display().to_string(),
            outcome,
            resource_version,
            files,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
