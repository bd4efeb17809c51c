//! Per-frame acquisition and buffer lifecycle for one stereo/depth device.
//!
//! `Device` owns the session state (active stream entries, transfer mode,
//! interleave flags) and the reused frame buffers. Acquisition is a
//! synchronous hot path: one fetch from the subsystem per call, no
//! allocation after the first frame of a stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::frame::{DepthTransferMode, Frame, PixelFormat};
use super::subsystem::{DepthConvert, ImagingSubsystem, PassThrough, SessionRequest, Status};

/// One supported stream resolution entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Color streams only; depth entries leave this false
    pub is_mjpeg: bool,
}

/// Which streams a capture session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Color,
    Depth,
    All,
}

impl TryFrom<i32> for DeviceMode {
    type Error = DeviceError;

    /// Raw configuration values enter here; anything out of range is a
    /// fatal configuration error and never reaches the subsystem.
    fn try_from(value: i32) -> Result<Self, DeviceError> {
        match value {
            0 => Ok(DeviceMode::Color),
            1 => Ok(DeviceMode::Depth),
            2 => Ok(DeviceMode::All),
            other => Err(DeviceError::UnknownMode(other)),
        }
    }
}

/// Parity admission flags for interleaved IR capture.
///
/// When `ir_enabled` is set, IR-illuminated and plain frames alternate on
/// the physical stream and are told apart by serial-number parity:
/// `color_even`/`depth_even` name the parity bucket that stream keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveConfig {
    pub ir_enabled: bool,
    pub color_even: bool,
    pub depth_even: bool,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device mode {0} is unknown")]
    UnknownMode(i32),
    #[error("open session failed with subsystem status {0}")]
    Open(Status),
    #[error("stream index {index} out of range ({len} streams)")]
    InvalidStreamIndex { index: usize, len: usize },
}

/// Acquisition session over one imaging subsystem.
///
/// Every acquisition call takes `&mut self`: the reused buffers and mode
/// flags are mutated in place, so each stream has at most one in-flight
/// caller at a time. A returned frame borrow is only valid until the next
/// acquisition call.
pub struct Device<S> {
    subsystem: S,
    converter: Box<dyn DepthConvert + Send>,
    color_streams: Vec<StreamInfo>,
    depth_streams: Vec<StreamInfo>,
    color_res_index: usize,
    depth_res_index: usize,
    transfer_mode: DepthTransferMode,
    depth_data_type: u32,
    interleave: InterleaveConfig,
    color_opened: bool,
    depth_opened: bool,
    framerate: u32,
    color_buf: Option<Frame>,
    depth_buf: Option<Frame>,
    scratch: Option<Vec<u8>>,
}

impl<S: ImagingSubsystem> Device<S> {
    pub fn new(subsystem: S, color_streams: Vec<StreamInfo>, depth_streams: Vec<StreamInfo>) -> Self {
        Self {
            subsystem,
            converter: Box::new(PassThrough),
            color_streams,
            depth_streams,
            color_res_index: 0,
            depth_res_index: 0,
            transfer_mode: DepthTransferMode::default(),
            depth_data_type: 0,
            interleave: InterleaveConfig::default(),
            color_opened: false,
            depth_opened: false,
            framerate: 0,
            color_buf: None,
            depth_buf: None,
            scratch: None,
        }
    }

    /// Open the capture session for the streams `mode` selects.
    ///
    /// Propagates the subsystem's open status unchanged inside
    /// [`DeviceError::Open`]; on success returns the negotiated framerate.
    pub fn open(&mut self, mode: DeviceMode) -> Result<u32, DeviceError> {
        let request = match mode {
            DeviceMode::Color => {
                self.color_opened = true;
                self.depth_opened = false;

                let color = self.color_streams[self.color_res_index];
                SessionRequest {
                    color_width: color.width,
                    color_height: color.height,
                    color_mjpeg: color.is_mjpeg,
                    depth_width: 0,
                    depth_height: 0,
                    transfer_mode: self.transfer_mode,
                    rectify: false,
                }
            }
            DeviceMode::Depth => {
                self.color_opened = false;
                self.depth_opened = true;

                let depth = self.depth_streams[self.depth_res_index];
                SessionRequest {
                    color_width: 0,
                    color_height: 0,
                    color_mjpeg: false,
                    depth_width: depth.width,
                    depth_height: depth.height,
                    transfer_mode: self.transfer_mode,
                    rectify: false,
                }
            }
            DeviceMode::All => {
                self.color_opened = true;
                self.depth_opened = true;

                let color = self.color_streams[self.color_res_index];
                let depth = self.depth_streams[self.depth_res_index];
                SessionRequest {
                    color_width: color.width,
                    color_height: color.height,
                    color_mjpeg: color.is_mjpeg,
                    depth_width: depth.width,
                    depth_height: depth.height,
                    transfer_mode: self.transfer_mode,
                    rectify: false,
                }
            }
        };

        self.framerate = self
            .subsystem
            .open_session(&request)
            .map_err(DeviceError::Open)?;
        Ok(self.framerate)
    }

    /// Acquire one color frame, or `None` when no frame is available this
    /// poll (fetch failure or interleave rejection).
    pub fn color_frame(&mut self) -> Option<&Frame> {
        let Self {
            subsystem,
            color_streams,
            color_res_index,
            interleave,
            color_buf,
            ..
        } = self;

        let info = color_streams[*color_res_index];
        let format = if info.is_mjpeg {
            PixelFormat::ColorMjpeg
        } else {
            PixelFormat::ColorYuyv
        };

        if let Some(buf) = color_buf.as_mut() {
            buf.reset();
        }
        let buf = color_buf.get_or_insert_with(|| Frame::new(format, info.width, info.height));

        let report = match subsystem.fetch_color_frame(buf.storage_mut(), 0) {
            Ok(report) => report,
            Err(status) => {
                debug!(%status, "color fetch returned no frame");
                return None;
            }
        };

        if rejected_by_interleave(interleave.ir_enabled, interleave.color_even, report.serial) {
            debug!(serial = report.serial, "color frame rejected by interleave parity");
            return None;
        }

        buf.set_valid_size(report.bytes);
        buf.set_frame_id(report.serial);

        Some(buf)
    }

    /// Acquire one depth frame, or `None` when no frame is available this
    /// poll.
    ///
    /// In [`DepthTransferMode::NonTransfer`] the subsystem writes straight
    /// into the destination buffer, which then spans its full storage. The
    /// other modes fetch into the scratch buffer and run the configured
    /// [`DepthConvert`] into the destination.
    pub fn depth_frame(&mut self) -> Option<&Frame> {
        let Self {
            subsystem,
            converter,
            depth_streams,
            depth_res_index,
            transfer_mode,
            depth_data_type,
            interleave,
            depth_buf,
            scratch,
            ..
        } = self;

        let info = depth_streams[*depth_res_index];
        let mode = *transfer_mode;
        let depth_raw = mode == DepthTransferMode::NonTransfer;
        let format = match mode {
            DepthTransferMode::NonTransfer => PixelFormat::DepthRaw,
            DepthTransferMode::Colorful => PixelFormat::DepthRgb,
            DepthTransferMode::Gray => PixelFormat::DepthGray24,
        };

        if let Some(buf) = depth_buf.as_mut() {
            buf.reset();
        }
        let buf = depth_buf.get_or_insert_with(|| Frame::new(format, info.width, info.height));

        if depth_raw {
            let report = match subsystem.fetch_depth_frame(buf.storage_mut(), *depth_data_type) {
                Ok(report) => report,
                Err(status) => {
                    debug!(%status, "depth fetch returned no frame");
                    return None;
                }
            };

            if rejected_by_interleave(interleave.ir_enabled, interleave.depth_even, report.serial) {
                debug!(serial = report.serial, "depth frame rejected by interleave parity");
                return None;
            }

            buf.set_frame_id(report.serial);
            Some(buf)
        } else {
            // Worst-case expansion before conversion
            let scratch_buf = scratch.get_or_insert_with(|| {
                vec![0u8; info.width as usize * 2 * info.height as usize * 3]
            });

            let report = match subsystem.fetch_depth_frame(scratch_buf, *depth_data_type) {
                Ok(report) => report,
                Err(status) => {
                    debug!(%status, "depth fetch returned no frame");
                    return None;
                }
            };

            if rejected_by_interleave(interleave.ir_enabled, interleave.depth_even, report.serial) {
                debug!(serial = report.serial, "depth frame rejected by interleave parity");
                return None;
            }

            buf.set_frame_id(report.serial);
            buf.set_valid_size(report.bytes);
            converter.convert(
                &scratch_buf[..report.bytes],
                buf.storage_mut(),
                info.width,
                info.height,
                mode == DepthTransferMode::Colorful,
                *depth_data_type,
            );
            Some(buf)
        }
    }

    pub fn set_color_stream_index(&mut self, index: usize) -> Result<(), DeviceError> {
        if index >= self.color_streams.len() {
            return Err(DeviceError::InvalidStreamIndex {
                index,
                len: self.color_streams.len(),
            });
        }
        if index != self.color_res_index {
            self.color_res_index = index;
            self.color_buf = None;
        }
        Ok(())
    }

    pub fn set_depth_stream_index(&mut self, index: usize) -> Result<(), DeviceError> {
        if index >= self.depth_streams.len() {
            return Err(DeviceError::InvalidStreamIndex {
                index,
                len: self.depth_streams.len(),
            });
        }
        if index != self.depth_res_index {
            self.depth_res_index = index;
            self.depth_buf = None;
            self.scratch = None;
        }
        Ok(())
    }

    /// Switch the depth representation. The destination buffer is dropped
    /// (its format differs per mode); the scratch buffer is allocated
    /// lazily the first time a non-raw mode acquires.
    pub fn set_transfer_mode(&mut self, mode: DepthTransferMode) {
        if mode != self.transfer_mode {
            self.transfer_mode = mode;
            self.depth_buf = None;
        }
    }

    pub fn set_depth_data_type(&mut self, token: u32) {
        self.depth_data_type = token;
    }

    pub fn set_interleave(&mut self, config: InterleaveConfig) {
        self.interleave = config;
    }

    pub fn set_depth_converter(&mut self, converter: Box<dyn DepthConvert + Send>) {
        self.converter = converter;
    }

    pub fn is_color_opened(&self) -> bool {
        self.color_opened
    }

    pub fn is_depth_opened(&self) -> bool {
        self.depth_opened
    }

    pub fn framerate(&self) -> u32 {
        self.framerate
    }

    pub fn transfer_mode(&self) -> DepthTransferMode {
        self.transfer_mode
    }

    pub fn interleave(&self) -> InterleaveConfig {
        self.interleave
    }

    pub fn subsystem(&self) -> &S {
        &self.subsystem
    }

    pub fn subsystem_mut(&mut self) -> &mut S {
        &mut self.subsystem
    }
}

/// Parity gate for interleaved IR capture: the stream keeps even serials
/// when its bucket flag is set, odd serials otherwise.
fn rejected_by_interleave(ir_enabled: bool, even_bucket: bool, serial: u32) -> bool {
    if !ir_enabled {
        return false;
    }
    if even_bucket {
        serial % 2 > 0
    } else {
        serial % 2 == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::capture::subsystem::FrameReport;

    /// Scripted subsystem: plays back queued fetch results and records
    /// every open request.
    struct Scripted {
        open_requests: Vec<SessionRequest>,
        open_result: Result<u32, Status>,
        color: VecDeque<Result<FrameReport, Status>>,
        depth: VecDeque<Result<FrameReport, Status>>,
        /// Byte written at dest[i] is (i + fill) for fetches that succeed
        fill: u8,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                open_requests: Vec::new(),
                open_result: Ok(30),
                color: VecDeque::new(),
                depth: VecDeque::new(),
                fill: 0,
            }
        }

        fn push_color(&mut self, result: Result<FrameReport, Status>) -> &mut Self {
            self.color.push_back(result);
            self
        }

        fn push_depth(&mut self, result: Result<FrameReport, Status>) -> &mut Self {
            self.depth.push_back(result);
            self
        }
    }

    impl ImagingSubsystem for Scripted {
        fn open_session(&mut self, request: &SessionRequest) -> Result<u32, Status> {
            self.open_requests.push(request.clone());
            self.open_result
        }

        fn fetch_color_frame(
            &mut self,
            dest: &mut [u8],
            _interleave_index: u32,
        ) -> Result<FrameReport, Status> {
            let report = self.color.pop_front().unwrap_or(Err(Status(-1)))?;
            for (i, byte) in dest[..report.bytes].iter_mut().enumerate() {
                *byte = (i as u8).wrapping_add(self.fill);
            }
            Ok(report)
        }

        fn fetch_depth_frame(
            &mut self,
            dest: &mut [u8],
            _depth_data_type: u32,
        ) -> Result<FrameReport, Status> {
            let report = self.depth.pop_front().unwrap_or(Err(Status(-1)))?;
            for (i, byte) in dest[..report.bytes].iter_mut().enumerate() {
                *byte = (i as u8).wrapping_add(self.fill);
            }
            Ok(report)
        }
    }

    fn streams() -> (Vec<StreamInfo>, Vec<StreamInfo>) {
        let color = vec![
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
        ];
        let depth = vec![StreamInfo {
            width: 320,
            height: 240,
            is_mjpeg: false,
        }];
        (color, depth)
    }

    fn device() -> Device<Scripted> {
        let (color, depth) = streams();
        Device::new(Scripted::new(), color, depth)
    }

    fn ok_report(bytes: usize, serial: u32) -> Result<FrameReport, Status> {
        Ok(FrameReport { bytes, serial })
    }

    #[test]
    fn yuyv_scenario_sets_format_serial_and_size() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.subsystem_mut().push_color(ok_report(614_400, 7));

        let frame = dev.color_frame().expect("frame admitted");
        assert_eq!(frame.format(), PixelFormat::ColorYuyv);
        assert_eq!(frame.frame_id(), 7);
        assert_eq!(frame.valid_size(), 614_400);
        assert!(frame.valid_size() <= frame.capacity());
    }

    #[test]
    fn mjpeg_stream_entry_selects_mjpeg_format() {
        let mut dev = device();
        dev.set_color_stream_index(1).unwrap();
        dev.open(DeviceMode::Color).unwrap();
        dev.subsystem_mut().push_color(ok_report(100_000, 2));

        let frame = dev.color_frame().expect("frame admitted");
        assert_eq!(frame.format(), PixelFormat::ColorMjpeg);
        assert_eq!(frame.width(), 1280);
        assert_eq!(frame.height(), 720);
    }

    #[test]
    fn fetch_failure_is_no_frame_not_error() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.subsystem_mut().push_color(Err(Status(-5)));
        assert!(dev.color_frame().is_none());

        // next poll recovers
        dev.subsystem_mut().push_color(ok_report(100, 1));
        assert!(dev.color_frame().is_some());
    }

    #[test]
    fn color_buffer_identity_is_stable() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.subsystem_mut().push_color(ok_report(128, 1));
        dev.subsystem_mut().push_color(ok_report(256, 2));

        let first = dev.color_frame().unwrap().storage().as_ptr();
        let second = dev.color_frame().unwrap().storage().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn color_parity_even_bucket() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.set_interleave(InterleaveConfig {
            ir_enabled: true,
            color_even: true,
            depth_even: false,
        });

        dev.subsystem_mut().push_color(ok_report(64, 8));
        assert!(dev.color_frame().is_some(), "even serial admitted");

        dev.subsystem_mut().push_color(ok_report(64, 9));
        assert!(dev.color_frame().is_none(), "odd serial rejected");
    }

    #[test]
    fn color_parity_odd_bucket() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.set_interleave(InterleaveConfig {
            ir_enabled: true,
            color_even: false,
            depth_even: false,
        });

        dev.subsystem_mut().push_color(ok_report(64, 8));
        assert!(dev.color_frame().is_none(), "even serial rejected");

        dev.subsystem_mut().push_color(ok_report(64, 9));
        assert!(dev.color_frame().is_some(), "odd serial admitted");
    }

    #[test]
    fn interleave_disabled_admits_both_parities() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();
        dev.subsystem_mut().push_color(ok_report(64, 8));
        dev.subsystem_mut().push_color(ok_report(64, 9));
        assert!(dev.color_frame().is_some());
        assert!(dev.color_frame().is_some());
    }

    #[test]
    fn depth_parity_follows_depth_bucket() {
        let mut dev = device();
        dev.open(DeviceMode::Depth).unwrap();
        dev.set_interleave(InterleaveConfig {
            ir_enabled: true,
            color_even: false,
            depth_even: true,
        });

        dev.subsystem_mut().push_depth(ok_report(64, 3));
        assert!(dev.depth_frame().is_none(), "odd serial rejected");

        dev.subsystem_mut().push_depth(ok_report(64, 4));
        assert!(dev.depth_frame().is_some(), "even serial admitted");
    }

    #[test]
    fn open_color_only_requests_zero_depth_geometry() {
        let mut dev = device();
        dev.open(DeviceMode::Color).unwrap();

        assert!(dev.is_color_opened());
        assert!(!dev.is_depth_opened());

        let request = &dev.subsystem().open_requests[0];
        assert_eq!(
            request,
            &SessionRequest {
                color_width: 640,
                color_height: 480,
                color_mjpeg: false,
                depth_width: 0,
                depth_height: 0,
                transfer_mode: DepthTransferMode::NonTransfer,
                rectify: false,
            }
        );
    }

    #[test]
    fn open_depth_only_is_the_mirror_image() {
        let mut dev = device();
        dev.open(DeviceMode::Depth).unwrap();

        assert!(!dev.is_color_opened());
        assert!(dev.is_depth_opened());

        let request = &dev.subsystem().open_requests[0];
        assert_eq!((request.color_width, request.color_height), (0, 0));
        assert!(!request.color_mjpeg);
        assert_eq!((request.depth_width, request.depth_height), (320, 240));
    }

    #[test]
    fn open_all_requests_both_geometries() {
        let mut dev = device();
        dev.set_transfer_mode(DepthTransferMode::Gray);
        let fps = dev.open(DeviceMode::All).unwrap();
        assert_eq!(fps, 30);
        assert_eq!(dev.framerate(), 30);

        assert!(dev.is_color_opened());
        assert!(dev.is_depth_opened());

        let request = &dev.subsystem().open_requests[0];
        assert_eq!((request.color_width, request.color_height), (640, 480));
        assert_eq!((request.depth_width, request.depth_height), (320, 240));
        assert_eq!(request.transfer_mode, DepthTransferMode::Gray);
    }

    #[test]
    fn open_propagates_subsystem_status() {
        let mut dev = device();
        dev.subsystem_mut().open_result = Err(Status(-70));
        match dev.open(DeviceMode::All) {
            Err(DeviceError::Open(status)) => assert_eq!(status, Status(-70)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_raw_mode_is_fatal_before_any_open() {
        let dev = device();
        assert!(matches!(
            DeviceMode::try_from(3),
            Err(DeviceError::UnknownMode(3))
        ));
        assert!(matches!(
            DeviceMode::try_from(-1),
            Err(DeviceError::UnknownMode(-1))
        ));
        assert!(dev.subsystem().open_requests.is_empty());
    }

    #[test]
    fn non_transfer_never_touches_scratch() {
        let mut dev = device();
        dev.open(DeviceMode::Depth).unwrap();
        dev.subsystem_mut().push_depth(ok_report(1024, 2));

        let frame = dev.depth_frame().expect("frame admitted");
        assert_eq!(frame.format(), PixelFormat::DepthRaw);
        assert_eq!(frame.frame_id(), 2);
        assert!(dev.scratch.is_none());
    }

    #[test]
    fn colorful_transfer_copies_scratch_bytes_verbatim() {
        let mut dev = device();
        dev.set_transfer_mode(DepthTransferMode::Colorful);
        dev.open(DeviceMode::Depth).unwrap();
        dev.subsystem_mut().fill = 11;
        dev.subsystem_mut().push_depth(ok_report(500, 4));

        let frame = dev.depth_frame().expect("frame admitted");
        assert_eq!(frame.format(), PixelFormat::DepthRgb);
        assert_eq!(frame.valid_size(), 500);

        let expected: Vec<u8> = (0..500u32).map(|i| (i as u8).wrapping_add(11)).collect();
        assert_eq!(frame.data(), expected.as_slice());

        // scratch sized 2 * w * 3 * h
        assert_eq!(dev.scratch.as_ref().unwrap().len(), 320 * 2 * 240 * 3);
    }

    #[test]
    fn gray_transfer_selects_gray_format() {
        let mut dev = device();
        dev.set_transfer_mode(DepthTransferMode::Gray);
        dev.open(DeviceMode::Depth).unwrap();
        dev.subsystem_mut().push_depth(ok_report(100, 6));

        let frame = dev.depth_frame().expect("frame admitted");
        assert_eq!(frame.format(), PixelFormat::DepthGray24);
    }

    #[test]
    fn transfer_mode_switch_recreates_destination_buffer() {
        let mut dev = device();
        dev.open(DeviceMode::Depth).unwrap();
        dev.subsystem_mut().push_depth(ok_report(64, 2));
        let raw_capacity = dev.depth_frame().unwrap().capacity();
        assert_eq!(raw_capacity, 320 * 240 * 2);

        dev.set_transfer_mode(DepthTransferMode::Colorful);
        dev.subsystem_mut().push_depth(ok_report(64, 4));
        let frame = dev.depth_frame().unwrap();
        assert_eq!(frame.format(), PixelFormat::DepthRgb);
        assert_eq!(frame.capacity(), 320 * 240 * 3);
    }

    #[test]
    fn stream_index_out_of_range_is_rejected() {
        let mut dev = device();
        assert!(matches!(
            dev.set_color_stream_index(2),
            Err(DeviceError::InvalidStreamIndex { index: 2, len: 2 })
        ));
        assert!(dev.set_depth_stream_index(0).is_ok());
    }
}
