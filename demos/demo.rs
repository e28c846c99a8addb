//! Drives a simulated camera in pull mode, then in push mode.
//!
//! Run with `RUST_LOG=debug` to see the lifecycle transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use framegrab::{
    CaptureConfig, CaptureError, FilledFrame, FnCallback, SimulatedBackend, VideoDevice,
};

fn main() -> anyhow::Result<()> {
    framegrab::init_logging();

    let device = VideoDevice::new("sim0", Arc::new(SimulatedBackend::new(30)));
    let config = CaptureConfig::low_latency().with_resolution(320, 240);
    let session = device
        .open_session(config)
        .context("failed to open capture session")?;

    log::info!(
        "Session open: {}x{}, {} buffers",
        session.width(),
        session.height(),
        session.buffer_count()
    );

    // ----------------------------------------
    // PULL MODE
    // ----------------------------------------

    session.start()?;
    for _ in 0..10 {
        let frame = session.next_frame()?;
        let checksum = frame.with_bytes(|bytes| bytes.iter().map(|&b| b as u64).sum::<u64>())?;
        log::info!(
            "Pulled frame {} at {} us ({} bytes, checksum {})",
            frame.sequence()?,
            frame.timestamp_us()?,
            frame.len()?,
            checksum
        );
    }
    session.stop()?;

    // ----------------------------------------
    // PUSH MODE
    // ----------------------------------------

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let callback = FnCallback::new(
        move |frame: FilledFrame| {
            counter.fetch_add(1, Ordering::Relaxed);
            if let Ok(sequence) = frame.sequence() {
                log::debug!("Pushed frame {}", sequence);
            }
        },
        |err: CaptureError| log::warn!("Capture error: {}", err),
    );

    session.set_push_mode(Some(Arc::new(callback)))?;
    session.start()?;
    thread::sleep(Duration::from_secs(1));
    session.stop()?;

    let stats = session.stats();
    log::info!(
        "Push mode received {} frames; totals: {} delivered, {} discarded, {} fill failures",
        received.load(Ordering::Relaxed),
        stats.frames_delivered,
        stats.frames_discarded,
        stats.fill_failures
    );

    device.release_session()?;
    device.release(false)?;
    Ok(())
}
