//! Mirror an output into a window. Press Escape or close the window to quit.
//!
//! Usage: `cargo run --example mirror [output-index]`

use anyhow::Result;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(target_os = "windows")]
fn main() -> Result<()> {
    use anyhow::Context;
    use snow_dupl::{
        AppContext, CaptureLoop, CaptureLoopConfig, CaptureSession, FrameSink,
        MaterializeOptions, SwapChainPresenter, TickOutcome,
    };

    init_tracing();
    let output_index = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u32>()
            .with_context(|| format!("invalid output index {arg:?}"))?,
        None => 0,
    };

    let session = CaptureSession::open(output_index)
        .with_context(|| format!("failed to duplicate output {output_index}"))?;
    let descriptor = session.descriptor();
    let app = AppContext::new(
        "snow-dupl mirror (Esc to quit)",
        descriptor.width / 2,
        descriptor.height / 2,
    )
    .context("failed to create the mirror window")?;
    let presenter = SwapChainPresenter::new(&app).context("failed to create the swap chain")?;
    let config = CaptureLoopConfig {
        materialize: MaterializeOptions::default().with_cursor(),
        ..CaptureLoopConfig::default()
    };
    let mut capture = CaptureLoop::new(session, FrameSink::display(Box::new(presenter)), config)
        .with_stop_signal(app.stop_signal());

    loop {
        if app.pump().is_break() {
            break;
        }
        if let Some((width, height)) = app.take_resize() {
            if let FrameSink::Display(sink) = capture.sink_mut() {
                sink.resize(width, height)?;
            }
        }
        if let TickOutcome::Stopped = capture.tick()? {
            break;
        }
    }

    let stats = capture.stats().snapshot();
    println!(
        "Presented {} frames ({} sessions lost, {} recovered)",
        stats.frames_delivered, stats.sessions_lost, stats.recoveries
    );
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() -> Result<()> {
    init_tracing();
    anyhow::bail!("mirroring needs DXGI desktop duplication, which is only available on Windows")
}
