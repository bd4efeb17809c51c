//! Janus stereo/depth acquisition demo poller

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::Result;
use flume::bounded;
use janus::capture::{Device, DeviceMode, Frame, PixelFormat, SimSubsystem};
use tracing::{error, info};

/// Snapshot of one admitted frame, detached from the reused device buffer
struct FrameSnapshot {
    format: PixelFormat,
    frame_id: u32,
    data: Bytes,
}

fn snapshot(frame: &Frame) -> FrameSnapshot {
    // Raw depth frames leave valid_size untouched and span the whole buffer
    let payload = if frame.is_empty() {
        frame.storage()
    } else {
        frame.data()
    };
    FrameSnapshot {
        format: frame.format(),
        frame_id: frame.frame_id(),
        data: Bytes::copy_from_slice(payload),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("janus=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Janus launching...");

    // Load configuration
    let config = janus::Config::load()?;
    janus::CONFIG.store(Arc::new(config.clone()));

    let mode = DeviceMode::try_from(config.device.mode)?;

    // Build the device over the synthetic subsystem
    let mut device = Device::new(
        SimSubsystem::new(),
        config.device.color_streams.clone(),
        config.device.depth_streams.clone(),
    );
    device.set_color_stream_index(config.device.color_stream_index)?;
    device.set_depth_stream_index(config.device.depth_stream_index)?;
    device.set_transfer_mode(config.device.transfer_mode);
    device.set_depth_data_type(config.device.depth_data_type);
    device.set_interleave(config.device.interleave);

    let framerate = device.open(mode)?;
    info!(framerate, ?mode, "capture session open");

    // Set up tx/rx
    let (tx, rx) = bounded::<FrameSnapshot>(config.poll.channel_capacity);

    // Spawn polling task: both streams serialized on one task, since each
    // acquirer allows a single in-flight caller
    let poll_color = device.is_color_opened();
    let poll_depth = device.is_depth_opened();
    let backoff = Duration::from_millis(config.poll.idle_backoff_ms);

    let _poll_handle = tokio::spawn(async move {
        loop {
            let poll_start = Instant::now();
            let mut admitted = 0usize;

            if poll_color {
                if let Some(frame) = device.color_frame() {
                    metrics::counter!("color_frames_captured").increment(1);
                    if tx.send_async(snapshot(frame)).await.is_err() {
                        error!("frame sink closed, stopping poller");
                        break;
                    }
                    admitted += 1;
                }
            }

            if poll_depth {
                if let Some(frame) = device.depth_frame() {
                    metrics::counter!("depth_frames_captured").increment(1);
                    if tx.send_async(snapshot(frame)).await.is_err() {
                        error!("frame sink closed, stopping poller");
                        break;
                    }
                    admitted += 1;
                }
            }

            metrics::histogram!("poll_time_us").record(poll_start.elapsed().as_micros() as f64);

            if admitted == 0 {
                metrics::counter!("empty_polls").increment(1);
                tokio::time::sleep(backoff).await;
            }
        }
    });

    // Sink task: consume snapshots and log throughput
    let _sink_handle = tokio::spawn(async move {
        let mut received = 0u64;
        while let Ok(frame) = rx.recv_async().await {
            received += 1;
            if received % 64 == 0 {
                info!(
                    received,
                    format = ?frame.format,
                    frame_id = frame.frame_id,
                    bytes = frame.data.len(),
                    "frames flowing"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Janus shutting down");
    Ok(())
}
