//! List every output the duplication backend can see.

use anyhow::{Context, Result};
use snow_dupl::backend::default_backend;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let backend = default_backend().context("failed to create the duplication backend")?;
    let outputs = backend
        .enumerate_outputs()
        .context("failed to enumerate outputs")?;
    if outputs.is_empty() {
        println!("No outputs found");
        return Ok(());
    }
    for output in outputs {
        let bounds = output.desktop_bounds;
        println!(
            "#{} {} (adapter {}): {}x{} at ({}, {}), {:?}{}",
            output.index,
            output.name,
            output.adapter_index,
            bounds.width(),
            bounds.height(),
            bounds.left,
            bounds.top,
            output.rotation,
            if output.attached { "" } else { ", detached" }
        );
    }
    Ok(())
}
