//! Platform capability contracts for camera hardware access.
//!
//! The orchestration core never touches camera hardware directly: device
//! enumeration, open/configure/stream primitives and buffer recycling are all
//! reached through the [`CameraHal`] trait, injected as `Arc<dyn CameraHal>`.
//! Lifecycle outcomes are asynchronous and arrive through the event sinks
//! handed over at call time.

use std::fmt;

use crate::frame::{RawPlanarBuffer, Size};

/// Lens direction the platform reports for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Front,
    Back,
    External,
    Unknown,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
            Facing::External => write!(f, "external"),
            Facing::Unknown => write!(f, "unknown"),
        }
    }
}

/// Immutable description of one enumerated camera device.
///
/// Sourced from the platform; the core only reads it. Identifiers are opaque
/// strings and must never be parsed for meaning.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: String,
    pub facing: Facing,
    /// Output sizes the device can deliver, in the platform's advertised
    /// order.
    pub sizes: Vec<Size>,
    /// Whether this id is a logical grouping of several physical sensors.
    pub logical_multi_camera: bool,
    /// Physical sensor ids behind a logical device; empty otherwise.
    pub physical_ids: Vec<String>,
}

impl DeviceDescriptor {
    /// First advertised size, the one-shot capture target policy.
    pub fn first_size(&self) -> Option<Size> {
        self.sizes.first().copied()
    }

    /// Smallest advertised size by area, the watch-mode target policy.
    pub fn smallest_size(&self) -> Option<Size> {
        self.sizes.iter().copied().min_by_key(Size::area)
    }
}

/// Opaque token for an opened device, minted by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque token for a configured capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u64);

impl PipelineHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Asynchronous device lifecycle signals.
#[derive(Debug, Clone, Copy)]
pub enum DeviceEvent {
    Opened(DeviceHandle),
    Disconnected,
    Error(i32),
}

/// Asynchronous capture pipeline signals. After `Configured`, the platform
/// sends `BufferReady` for every delivered sensor buffer.
#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent {
    Configured(PipelineHandle),
    ConfigureFailed,
    BufferReady,
}

/// Sink for [`DeviceEvent`]s. Implementations of [`CameraHal`] may invoke it
/// from any thread; it must never block on core state.
pub type DeviceEventSink = Box<dyn FnMut(DeviceEvent) + Send>;

/// Sink for [`PipelineEvent`]s, same delivery rules as [`DeviceEventSink`].
pub type PipelineEventSink = Box<dyn FnMut(PipelineEvent) + Send>;

/// The platform camera subsystem is unavailable. This is the only failure
/// that surfaces to orchestrator callers; everything else stays per-device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("camera subsystem unavailable: {0}")]
pub struct DeviceAccessError(pub String);

/// A repeating capture request was rejected by the platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("capture request rejected: {0}")]
pub struct CaptureRequestError(pub String);

/// Per-device failure recorded on its capture session. Never fatal to
/// sibling devices; callers observe it only as frame absence unless they ask
/// for the session's last error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("device open failed: {0}")]
    OpenFailed(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("device reported error code {0}")]
    Device(i32),
    #[error("capture pipeline configuration failed")]
    ConfigureFailed,
    #[error("repeating capture request rejected: {0}")]
    CaptureRequest(String),
}

/// Platform camera capability injected into the orchestration core.
///
/// `open_device` and `create_capture_pipeline` are asynchronous: they return
/// immediately and report their outcome through the given sink. The `close_*`
/// calls are idempotent.
pub trait CameraHal: Send + Sync {
    /// Enumerate attached devices, in platform order.
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceAccessError>;

    /// Sets of device ids the platform can stream simultaneously.
    fn concurrent_combinations(&self) -> Result<Vec<Vec<String>>, DeviceAccessError>;

    /// Begin opening a device. The outcome (`Opened`, `Disconnected`,
    /// `Error`) arrives on `events`; an unknown id is reported the same way.
    fn open_device(&self, id: &str, events: DeviceEventSink);

    /// Request a capture pipeline bound to `target`, backed by
    /// `buffer_slots` platform-owned buffers. Configuration outcome and
    /// subsequent buffer-ready signals arrive on `events`.
    fn create_capture_pipeline(
        &self,
        device: DeviceHandle,
        target: Size,
        buffer_slots: usize,
        events: PipelineEventSink,
    );

    /// Start the repeating capture request on a configured pipeline.
    fn start_repeating_capture(&self, pipeline: PipelineHandle) -> Result<(), CaptureRequestError>;

    /// Take the most recently delivered buffer, if one is pending. The
    /// caller must hand the buffer back with [`CameraHal::release_buffer`]
    /// immediately after reading it.
    fn acquire_latest_buffer(&self, pipeline: PipelineHandle) -> Option<RawPlanarBuffer>;

    /// Return plane memory to the platform pool.
    fn release_buffer(&self, pipeline: PipelineHandle, buffer: RawPlanarBuffer);

    /// Close an opened device. Idempotent.
    fn close_device(&self, device: DeviceHandle);

    /// Close a pipeline together with its buffer source. Idempotent.
    fn close_pipeline(&self, pipeline: PipelineHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(sizes: &[(u32, u32)]) -> DeviceDescriptor {
        DeviceDescriptor {
            id: "cam0".to_string(),
            facing: Facing::Back,
            sizes: sizes.iter().map(|&(w, h)| Size::new(w, h)).collect(),
            logical_multi_camera: false,
            physical_ids: Vec::new(),
        }
    }

    #[test]
    fn test_first_size_follows_advertised_order() {
        let d = descriptor(&[(1280, 720), (320, 240), (640, 480)]);
        assert_eq!(d.first_size(), Some(Size::new(1280, 720)));
    }

    #[test]
    fn test_smallest_size_is_by_area() {
        let d = descriptor(&[(1280, 720), (320, 240), (640, 480)]);
        assert_eq!(d.smallest_size(), Some(Size::new(320, 240)));
    }

    #[test]
    fn test_no_sizes_means_no_target() {
        let d = descriptor(&[]);
        assert_eq!(d.first_size(), None);
        assert_eq!(d.smallest_size(), None);
    }

    #[test]
    fn test_error_display() {
        let err = DeviceAccessError("service down".to_string());
        assert_eq!(
            format!("{}", err),
            "camera subsystem unavailable: service down"
        );

        let err = SessionError::Device(3);
        assert_eq!(format!("{}", err), "device reported error code 3");
    }
}
