pub mod device;
pub mod frame;
pub mod sim;
pub mod subsystem;

pub use device::{Device, DeviceError, DeviceMode, InterleaveConfig, StreamInfo};
pub use frame::{DepthTransferMode, Frame, PixelFormat};
pub use sim::SimSubsystem;
pub use subsystem::{
    DepthConvert, FrameReport, ImagingSubsystem, PassThrough, SessionRequest, Status,
};
