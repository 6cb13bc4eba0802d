//! `confmount run` — publish, then keep the mount in sync until signalled.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use confmount_controller::{start_blocking, ControllerConfig, HookRunner};

use super::SourceArgs;

/// Arguments for `confmount run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Shell command run after every update.
    #[arg(short = 'b', long)]
    pub boot_cmd: Option<String>,

    /// Seconds between full resyncs of the resource.
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub resync_interval: u64,

    /// Number of concurrent reconciliation workers.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        self.source.init_logging();

        let config = ControllerConfig {
            resync_interval: Duration::from_secs(self.resync_interval),
            workers: usize::from(self.workers),
            ..ControllerConfig::default()
        };
        let mut controller = self.source.controller(config)?;
        if let Some(cmd) = self.boot_cmd.as_deref().filter(|cmd| !cmd.trim().is_empty()) {
            controller = controller.with_hook(HookRunner::new(cmd));
        }

        let resource = controller.resource().to_string();
        let stats = start_blocking(controller)
            .with_context(|| format!("controller for {resource} failed"))?;
        println!("{}", serde_json::to_string(&stats)?);
        Ok(())
    }
}
