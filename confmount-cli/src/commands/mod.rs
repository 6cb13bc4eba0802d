pub mod check;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use confmount_controller::{
    init_tracing, Controller, ControllerConfig, FileSource, SnapshotSource,
};
use confmount_core::{namespace::resolve_namespace, ResourceKind, ResourceRef};
use confmount_writer::AtomicWriter;

/// Flags shared by every subcommand: which resource, where it is stored and
/// where it is mounted.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// ConfigMap to mount, as `<name>` or `<name>.<namespace>`.
    #[arg(short = 'c', long, conflicts_with = "secret", required_unless_present = "secret")]
    pub config_map: Option<String>,

    /// Secret to mount, as `<name>` or `<name>.<namespace>`.
    #[arg(short = 's', long, required_unless_present = "config_map")]
    pub secret: Option<String>,

    /// Directory the resource keys are projected into.
    #[arg(short = 'm', long)]
    pub mount_location: String,

    /// Root of the manifest store (`<root>/<namespace>/<name>.yaml`).
    #[arg(long)]
    pub store_dir: PathBuf,

    /// Permission bits of projected files, in octal.
    #[arg(long, default_value = "0777", value_parser = parse_file_mode)]
    pub file_mode: u32,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl SourceArgs {
    pub fn init_logging(&self) {
        init_tracing(self.log_json);
    }

    pub fn resource(&self) -> Result<ResourceRef> {
        let (kind, input) = match (&self.config_map, &self.secret) {
            (Some(name), None) => (ResourceKind::ConfigMap, name),
            (None, Some(name)) => (ResourceKind::Secret, name),
            _ => bail!("exactly one of --config-map or --secret is required"),
        };
        ResourceRef::parse(kind, input, resolve_namespace)
            .with_context(|| format!("invalid {kind} reference"))
    }

    /// Mount location without trailing slashes.
    pub fn mount_dir(&self) -> Result<PathBuf> {
        let trimmed = self.mount_location.trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("--mount-location must name a directory below the filesystem root");
        }
        Ok(PathBuf::from(trimmed))
    }

    pub fn controller(&self, config: ControllerConfig) -> Result<Controller> {
        let resource = self.resource()?;
        let source: Arc<dyn SnapshotSource> = Arc::new(FileSource::new(&self.store_dir));
        let writer = AtomicWriter::new(self.mount_dir()?);
        Ok(Controller::new(
            resource,
            source,
            writer,
            ControllerConfig {
                file_mode: self.file_mode,
                ..config
            },
        ))
    }
}

fn parse_file_mode(input: &str) -> Result<u32, String> {
    let digits = input.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|err| format!("'{input}' is not an octal mode: {err}"))?;
    if mode > 0o7777 {
        return Err(format!("'{input}' exceeds 0o7777"));
    }
    Ok(mode)
}
