//! Deterministic stand-in for the vendor imaging subsystem.
//!
//! Produces synthetic payloads with monotonic serial numbers so the
//! acquisition core can be exercised without hardware. A failure period can
//! be configured to rehearse the transient no-frame path.

use super::frame::DepthTransferMode;
use super::subsystem::{FrameReport, ImagingSubsystem, SessionRequest, Status};

const STATUS_NOT_OPEN: Status = Status(-1);
const STATUS_NOT_READY: Status = Status(-2);

#[derive(Debug, Clone, Copy)]
struct SessionGeometry {
    color_bytes: usize,
    depth_bytes: usize,
}

/// Synthetic imaging subsystem with scriptable failure cadence
#[derive(Debug, Default)]
pub struct SimSubsystem {
    session: Option<SessionGeometry>,
    color_serial: u32,
    depth_serial: u32,
    color_polls: u32,
    depth_polls: u32,
    /// Every n-th poll reports "not ready"; 0 disables
    fail_period: u32,
}

impl SimSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `STATUS_NOT_READY` on every `period`-th fetch of each stream
    pub fn with_failure_period(period: u32) -> Self {
        Self {
            fail_period: period,
            ..Self::default()
        }
    }

    fn fill(dest: &mut [u8], serial: u32) {
        for (i, byte) in dest.iter_mut().enumerate() {
            *byte = (i as u8) ^ (serial as u8);
        }
    }
}

impl ImagingSubsystem for SimSubsystem {
    fn open_session(&mut self, request: &SessionRequest) -> Result<u32, Status> {
        let color_bytes = request.color_width as usize * request.color_height as usize * 2;
        let depth_bytes = match request.transfer_mode {
            DepthTransferMode::NonTransfer => {
                request.depth_width as usize * request.depth_height as usize * 2
            }
            // converted representations arrive pre-expanded
            DepthTransferMode::Colorful | DepthTransferMode::Gray => {
                request.depth_width as usize * request.depth_height as usize * 3
            }
        };

        self.session = Some(SessionGeometry {
            color_bytes,
            depth_bytes,
        });
        self.color_serial = 0;
        self.depth_serial = 0;
        Ok(30)
    }

    fn fetch_color_frame(
        &mut self,
        dest: &mut [u8],
        _interleave_index: u32,
    ) -> Result<FrameReport, Status> {
        let session = self.session.ok_or(STATUS_NOT_OPEN)?;

        self.color_polls += 1;
        if self.fail_period > 0 && self.color_polls % self.fail_period == 0 {
            return Err(STATUS_NOT_READY);
        }

        self.color_serial += 1;
        let bytes = session.color_bytes.min(dest.len());
        Self::fill(&mut dest[..bytes], self.color_serial);

        Ok(FrameReport {
            bytes,
            serial: self.color_serial,
        })
    }

    fn fetch_depth_frame(
        &mut self,
        dest: &mut [u8],
        _depth_data_type: u32,
    ) -> Result<FrameReport, Status> {
        let session = self.session.ok_or(STATUS_NOT_OPEN)?;

        self.depth_polls += 1;
        if self.fail_period > 0 && self.depth_polls % self.fail_period == 0 {
            return Err(STATUS_NOT_READY);
        }

        self.depth_serial += 1;
        let bytes = session.depth_bytes.min(dest.len());
        Self::fill(&mut dest[..bytes], self.depth_serial);

        Ok(FrameReport {
            bytes,
            serial: self.depth_serial,
        })
    }
}
