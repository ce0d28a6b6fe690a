//! Record the primary output to a WMV file until Escape is pressed or the
//! control window is closed.
//!
//! Usage: `cargo run --example record [output.wmv]`

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
    use std::path::PathBuf;
    use std::time::Instant;

    use anyhow::Context;
    use snow_dupl::{
        AppContext, CaptureLoop, CaptureLoopConfig, CaptureSession, FrameSink,
        MaterializeOptions, MediaFoundationWriter, VideoSinkConfig,
    };

    init_tracing();
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(snow_dupl::DEFAULT_VIDEO_PATH));

    let app = AppContext::new("snow-dupl record (Esc to stop)", 480, 120)
        .context("failed to create the control window")?;
    let session = CaptureSession::open(0).context("failed to duplicate output 0")?;
    let writer = MediaFoundationWriter::create(&path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;
    let sink = FrameSink::video(Box::new(writer), VideoSinkConfig::default());
    let config = CaptureLoopConfig {
        materialize: MaterializeOptions::default().with_cursor(),
        ..CaptureLoopConfig::default()
    };

    let mut capture = CaptureLoop::new(session, sink, config).with_stop_signal(app.stop_signal());
    let begin = Instant::now();
    let stats = capture.run(|| app.pump()).context("recording failed")?;
    let elapsed = begin.elapsed();

    println!(
        "Recorded {} frames to {} in {:.1} s ({} idle ticks, {} recoveries)",
        stats.frames_delivered,
        path.display(),
        elapsed.as_secs_f64(),
        stats.idle_ticks,
        stats.recoveries
    );
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() -> Result<()> {
    init_tracing();
    anyhow::bail!("recording needs DXGI desktop duplication, which is only available on Windows")
}
