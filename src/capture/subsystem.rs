//! Boundary to the vendor imaging subsystem.
//!
//! The transport that actually talks to the sensor (USB plumbing, raw
//! color/depth transfer primitives) lives behind [`ImagingSubsystem`]. The
//! acquisition core only depends on this trait; anything returning a non-OK
//! [`Status`] from a fetch is treated uniformly as "no frame this poll".

use std::fmt;

use super::frame::DepthTransferMode;

/// Raw status code returned by the imaging subsystem.
///
/// Only [`Status::OK`] is distinguished; every other code is opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub i32);

impl Status {
    /// The distinguished success code
    pub const OK: Status = Status(0);

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte count and serial number the subsystem reports for one fetched frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub bytes: usize,
    pub serial: u32,
}

/// Geometry and mode request for opening a capture session.
///
/// A stream that should stay closed is requested with zero dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub color_width: u32,
    pub color_height: u32,
    pub color_mjpeg: bool,
    pub depth_width: u32,
    pub depth_height: u32,
    pub transfer_mode: DepthTransferMode,
    pub rectify: bool,
}

/// The vendor imaging subsystem, reduced to the three calls the
/// acquisition core needs.
pub trait ImagingSubsystem {
    /// Open a capture session; returns the negotiated framerate on success
    /// and the subsystem's status code unchanged otherwise.
    fn open_session(&mut self, request: &SessionRequest) -> Result<u32, Status>;

    /// Fetch one color frame into `dest`. `interleave_index` selects the
    /// interleave pattern slot (always 0 here).
    fn fetch_color_frame(
        &mut self,
        dest: &mut [u8],
        interleave_index: u32,
    ) -> Result<FrameReport, Status>;

    /// Fetch one depth frame into `dest`, delivered in the representation
    /// selected by `depth_data_type`.
    fn fetch_depth_frame(
        &mut self,
        dest: &mut [u8],
        depth_data_type: u32,
    ) -> Result<FrameReport, Status>;
}

/// Depth representation conversion seam.
///
/// Runs between the scratch buffer and the destination buffer on the
/// non-raw depth path. The conversion math itself belongs to the vendor
/// library; this core only guarantees where the hook runs and what it sees.
pub trait DepthConvert {
    fn convert(
        &self,
        src: &[u8],
        dst: &mut [u8],
        width: u32,
        height: u32,
        colorful: bool,
        depth_data_type: u32,
    );
}

/// Verbatim byte copy standing in for the vendor conversion routine.
///
/// Frames produced through this converter carry unconverted depth bytes
/// under the converted-format label.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl DepthConvert for PassThrough {
    fn convert(
        &self,
        src: &[u8],
        dst: &mut [u8],
        _width: u32,
        _height: u32,
        _colorful: bool,
        _depth_data_type: u32,
    ) {
        dst[..src.len()].copy_from_slice(src);
    }
}
