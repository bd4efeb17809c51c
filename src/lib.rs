pub mod capture;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::capture::device::{InterleaveConfig, StreamInfo};
use crate::capture::frame::DepthTransferMode;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Raw device mode value, validated through `DeviceMode::try_from`
    pub mode: i32,
    pub color_streams: Vec<StreamInfo>,
    pub depth_streams: Vec<StreamInfo>,
    pub color_stream_index: usize,
    pub depth_stream_index: usize,
    pub transfer_mode: DepthTransferMode,
    pub depth_data_type: u32,
    pub interleave: InterleaveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub channel_capacity: usize,
    pub idle_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                mode: 2, // both streams
                color_streams: vec![
                    StreamInfo {
                        width: 640,
                        height: 480,
                        is_mjpeg: false,
                    },
                    StreamInfo {
                        width: 1280,
                        height: 720,
                        is_mjpeg: true,
                    },
                ],
                depth_streams: vec![StreamInfo {
                    width: 640,
                    height: 480,
                    is_mjpeg: false,
                }],
                color_stream_index: 0,
                depth_stream_index: 0,
                transfer_mode: DepthTransferMode::NonTransfer,
                depth_data_type: 0,
                interleave: InterleaveConfig::default(),
            },
            poll: PollConfig {
                channel_capacity: 8,
                idle_backoff_ms: 10,
            },
        }
    }
}

impl Config {
    /// Layered load: built-in defaults, then an optional `janus.toml`,
    /// then `JANUS_*` environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name("janus").required(false))
            .add_source(config::Environment::with_prefix("JANUS").separator("__"))
            .build()?
            .try_deserialize()
    }
}
