use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use xs_core::engine::{probe_version, resolve_binary};

use crate::cli::{load_settings, output, Format};

#[derive(Args, Debug)]
pub struct EngineArgs {
    #[arg(long, value_enum, default_value = "human")]
    pub format: Format,
}

pub async fn run(config: Option<&PathBuf>, args: EngineArgs) -> Result<()> {
    let settings = load_settings(config)?;
    let binary = resolve_binary(settings.engine.binary.as_deref());
    let info = probe_version(&binary).await;

    output::emit(
        args.format,
        || match (&info.version, &info.error) {
            (Some(version), _) => {
                let mut out = format!("xray {version} at {}", binary.display());
                if let Some(commit) = &info.commit {
                    out.push_str(&format!(" ({commit})"));
                }
                if let (Some(go), Some(arch)) = (&info.go_version, &info.arch) {
                    out.push_str(&format!("\nbuilt with {go} for {arch}"));
                }
                out
            }
            (None, Some(error)) => format!("xray unavailable: {error}"),
            (None, None) => format!("xray at {} (version unknown)", binary.display()),
        },
        &info,
    );

    if !info.available {
        bail!("engine unavailable");
    }
    Ok(())
}
