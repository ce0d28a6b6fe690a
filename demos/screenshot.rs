//! Save one frame of the primary output, cursor included, as an image.
//! The container follows the file extension (PNG, BMP or JPEG).
//!
//! Usage: `cargo run --example screenshot [SCREENSHOT.PNG]`

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
        CaptureLoop, CaptureLoopConfig, CaptureSession, FrameAcquirerConfig, FrameSink,
        ImageContainer, MaterializeOptions, RetryPolicy,
    };

    init_tracing();
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(snow_dupl::DEFAULT_SCREENSHOT_PATH));
    let container = ImageContainer::from_path(&path);

    let begin = Instant::now();
    let session = CaptureSession::open(0).context("failed to duplicate output 0")?;
    println!(
        "Opened duplication in {:.3} ms",
        begin.elapsed().as_secs_f64() * 1000.0
    );

    // The first notifications after opening often carry no presented image.
    let config = CaptureLoopConfig {
        timeout_ms: 500,
        acquirer: FrameAcquirerConfig {
            retry: RetryPolicy {
                max_attempts: 10,
                ..RetryPolicy::acquire_timeouts()
            },
            require_present_time: true,
            ..FrameAcquirerConfig::default()
        },
        materialize: MaterializeOptions::default().with_cursor(),
        max_frames: Some(1),
        ..CaptureLoopConfig::default()
    };
    let mut capture = CaptureLoop::new(session, FrameSink::still(&path, container), config);

    let begin = Instant::now();
    let stats = capture
        .run(|| std::ops::ControlFlow::Continue(()))
        .context("screenshot failed")?;
    if stats.frames_delivered == 0 {
        anyhow::bail!("no frame was captured");
    }
    println!(
        "Saved {:?} screenshot to {} in {:.3} ms",
        container,
        path.display(),
        begin.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() -> Result<()> {
    init_tracing();
    anyhow::bail!("screenshots need DXGI desktop duplication, which is only available on Windows")
}
