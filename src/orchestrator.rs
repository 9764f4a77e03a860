//! Multi-camera orchestration: one-shot snapshots, continuous watching, and
//! logical-camera streaming.
//!
//! All three modes run on the same session machinery ([`CaptureEngine`]);
//! they differ only in target-size policy and in how frames are handed to
//! the caller.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::CaptureEngine;
use crate::frame::{RgbFrame, Size};
use crate::hal::{CameraHal, DeviceAccessError, Facing, SessionError};
use crate::session::SessionState;

/// Per-device deadline for one-shot capture.
pub const DEFAULT_SNAPSHOT_DEADLINE: Duration = Duration::from_millis(3000);

/// Platform-owned buffer slots requested per pipeline.
pub const DEFAULT_BUFFER_SLOTS: usize = 2;

/// One bounded snapshot across every attached camera.
///
/// Devices are processed sequentially in enumeration order: each gets its own
/// session, the first advertised output size, and up to the deadline to
/// deliver a first frame. A device that fails or misses its deadline is
/// skipped, never letting it corrupt its siblings; worst-case latency is
/// device count times the deadline.
pub struct SnapshotCapture {
    engine: CaptureEngine,
    deadline: Duration,
    buffer_slots: usize,
    skipped: Vec<String>,
}

impl SnapshotCapture {
    pub fn new(hal: Arc<dyn CameraHal>) -> Self {
        Self {
            engine: CaptureEngine::new(hal),
            deadline: DEFAULT_SNAPSHOT_DEADLINE,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
            skipped: Vec::new(),
        }
    }

    /// Override the per-device deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the per-pipeline buffer slot count.
    pub fn with_buffer_slots(mut self, buffer_slots: usize) -> Self {
        self.buffer_slots = buffer_slots;
        self
    }

    /// Capture one frame per device, in enumeration order.
    ///
    /// Devices that produced no frame in time are silently omitted from the
    /// result; only an enumeration failure is an error. The omissions stay
    /// observable through [`SnapshotCapture::skipped_devices`] and
    /// [`SnapshotCapture::last_error`].
    pub fn run(&mut self) -> Result<Vec<Arc<RgbFrame>>, DeviceAccessError> {
        let devices = self.engine.hal().enumerate_devices()?;
        self.skipped.clear();
        let mut frames = Vec::new();

        for descriptor in &devices {
            let Some(target) = descriptor.first_size() else {
                log::warn!("camera {}: no advertised output sizes, skipping", descriptor.id);
                self.skipped.push(descriptor.id.clone());
                continue;
            };

            self.engine.open_session(&descriptor.id, target, self.buffer_slots);
            match self.engine.store().wait_for(&descriptor.id, self.deadline) {
                Some(frame) => frames.push(frame),
                None => {
                    match self.engine.last_error(&descriptor.id) {
                        Some(error) => {
                            log::warn!("camera {}: skipped ({error})", descriptor.id)
                        }
                        None => log::warn!(
                            "camera {}: no frame within {:?}, skipped",
                            descriptor.id,
                            self.deadline
                        ),
                    }
                    self.skipped.push(descriptor.id.clone());
                }
            }
            self.engine.stop_session(&descriptor.id);
        }

        log::info!(
            "snapshot complete: {} of {} cameras delivered",
            frames.len(),
            devices.len()
        );
        Ok(frames)
    }

    /// Device ids the last [`SnapshotCapture::run`] omitted, in enumeration
    /// order.
    pub fn skipped_devices(&self) -> &[String] {
        &self.skipped
    }

    /// The failure recorded for a device during the last run, if any. A
    /// plain deadline miss records no error.
    pub fn last_error(&self, device_id: &str) -> Option<SessionError> {
        self.engine.last_error(device_id)
    }
}

/// Continuously refreshed latest-frame access across all cameras.
///
/// Construction opens a streaming session for every enumerated device at its
/// smallest advertised size (bandwidth over resolution); the store then
/// refreshes at whatever cadence each device delivers. Reads never block and
/// tolerate partial readiness.
pub struct MultiCamWatcher {
    engine: CaptureEngine,
    device_ids: Vec<String>,
}

impl MultiCamWatcher {
    pub fn new(hal: Arc<dyn CameraHal>) -> Result<Self, DeviceAccessError> {
        Self::with_buffer_slots(hal, DEFAULT_BUFFER_SLOTS)
    }

    pub fn with_buffer_slots(
        hal: Arc<dyn CameraHal>,
        buffer_slots: usize,
    ) -> Result<Self, DeviceAccessError> {
        let devices = hal.enumerate_devices()?;
        let engine = CaptureEngine::new(hal);

        let mut device_ids = Vec::with_capacity(devices.len());
        for descriptor in &devices {
            device_ids.push(descriptor.id.clone());
            match descriptor.smallest_size() {
                Some(target) => engine.open_session(&descriptor.id, target, buffer_slots),
                None => {
                    log::warn!("camera {}: no advertised output sizes", descriptor.id)
                }
            }
        }

        Ok(Self { engine, device_ids })
    }

    /// Device ids in the order of the construction-time enumeration. Read
    /// positions are aligned to this.
    pub fn device_ids(&self) -> &[String] {
        &self.device_ids
    }

    /// Latest frame for the device at `index`, or `None` if the index is out
    /// of range or the device has not delivered yet. Never blocks.
    pub fn frame_at(&self, index: usize) -> Option<Arc<RgbFrame>> {
        let id = self.device_ids.get(index)?;
        self.engine.store().latest(id)
    }

    /// One entry per enumerated device, position-aligned; absent frames are
    /// explicit `None`s, never omitted. Never blocks.
    pub fn all_frames(&self) -> Vec<Option<Arc<RgbFrame>>> {
        self.device_ids
            .iter()
            .map(|id| self.engine.store().latest(id))
            .collect()
    }

    pub fn session_state(&self, device_id: &str) -> Option<SessionState> {
        self.engine.session_state(device_id)
    }

    /// The failure recorded for a device, if any. The device's last good
    /// frame, when one exists, remains readable.
    pub fn last_error(&self, device_id: &str) -> Option<SessionError> {
        self.engine.last_error(device_id)
    }

    /// Stop every session. Idempotent; dropping the watcher stops as well.
    pub fn stop(&mut self) {
        self.engine.stop_all();
    }
}

/// Operating mode selector for [`capture_all`].
#[derive(Debug, Clone, Copy)]
pub enum CaptureMode {
    /// Bounded snapshot: block up to `deadline` per device, sequentially.
    OneShot { deadline: Duration },
    /// Continuous watch: stream all devices, serve non-blocking reads.
    Watch,
}

/// Orchestrator handle produced by [`capture_all`].
pub enum Orchestrator {
    OneShot(SnapshotCapture),
    Watch(MultiCamWatcher),
}

/// Build an orchestrator in the requested mode against the injected platform
/// capability. Watch mode enumerates (and starts streaming) immediately, so
/// only it can fail here; one-shot mode enumerates on
/// [`SnapshotCapture::run`].
pub fn capture_all(
    hal: Arc<dyn CameraHal>,
    mode: CaptureMode,
) -> Result<Orchestrator, DeviceAccessError> {
    match mode {
        CaptureMode::OneShot { deadline } => Ok(Orchestrator::OneShot(
            SnapshotCapture::new(hal).with_deadline(deadline),
        )),
        CaptureMode::Watch => Ok(Orchestrator::Watch(MultiCamWatcher::new(hal)?)),
    }
}

/// Failure opening a logical-camera stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Access(#[from] DeviceAccessError),
    #[error("no logical multi-camera device facing {0}")]
    NoLogicalCamera(Facing),
}

/// Stream every decoded frame from one logical multi-camera device.
///
/// Selects the first enumerated device that matches the facing filter and
/// advertises the logical multi-camera capability, then delivers each
/// converted frame to the subscriber channel in arrival order.
pub struct LogicalCameraStream {
    engine: CaptureEngine,
    device_id: String,
    frames: Receiver<Arc<RgbFrame>>,
}

impl LogicalCameraStream {
    /// Open the stream at a caller-chosen output size.
    pub fn open(
        hal: Arc<dyn CameraHal>,
        facing: Facing,
        target: Size,
    ) -> Result<Self, StreamError> {
        let devices = hal.enumerate_devices().map_err(StreamError::Access)?;
        let descriptor = devices
            .iter()
            .find(|descriptor| descriptor.facing == facing && descriptor.logical_multi_camera)
            .ok_or(StreamError::NoLogicalCamera(facing))?;
        let device_id = descriptor.id.clone();
        log::info!(
            "logical camera {device_id}: streaming {} physical sensors at {target}",
            descriptor.physical_ids.len()
        );

        let engine = CaptureEngine::new(hal);
        let frames = engine.subscribe(&device_id);
        engine.open_session(&device_id, target, DEFAULT_BUFFER_SLOTS);

        Ok(Self {
            engine,
            device_id,
            frames,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Next decoded frame, or `None` if nothing arrives within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<RgbFrame>> {
        self.frames.recv_timeout(timeout).ok()
    }

    /// Most recent frame without waiting for a new delivery.
    pub fn latest(&self) -> Option<Arc<RgbFrame>> {
        self.engine.store().latest(&self.device_id)
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.engine.last_error(&self.device_id)
    }

    /// Stop the stream. Idempotent; dropping the stream stops as well.
    pub fn stop(&mut self) {
        self.engine.stop_all();
    }
}
