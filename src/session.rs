//! Per-device capture session state machine.
//!
//! A session walks `Closed -> Opening -> Configuring -> Streaming`, driven by
//! the asynchronous signals the platform delivers for its device. `Error` is
//! reachable from any non-terminal state and `Closed` from anywhere via
//! explicit teardown. All transitions run on the engine's dispatcher thread,
//! under the session registry lock.

use std::sync::Arc;

use crate::convert;
use crate::frame::{RgbFrame, Size};
use crate::hal::{
    CameraHal, DeviceEvent, DeviceHandle, PipelineEvent, PipelineEventSink, PipelineHandle,
    SessionError,
};
use crate::store::FrameStore;

/// Lifecycle states of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Configuring,
    Streaming,
    Error,
}

/// One device's capture lifecycle: open, configure, stream, teardown.
///
/// The session exclusively owns its device and pipeline handles; failures are
/// recorded on `last_error` and never propagate to sibling sessions.
pub struct CaptureSession {
    device_id: String,
    target: Size,
    buffer_slots: usize,
    state: SessionState,
    device: Option<DeviceHandle>,
    pipeline: Option<PipelineHandle>,
    last_error: Option<SessionError>,
}

impl CaptureSession {
    pub fn new(device_id: &str, target: Size, buffer_slots: usize) -> Self {
        Self {
            device_id: device_id.to_string(),
            target,
            buffer_slots,
            state: SessionState::Closed,
            device: None,
            pipeline: None,
            last_error: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn target(&self) -> Size {
        self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failure recorded by the most recent `Error` transition, retained
    /// across teardown for observability.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// `Closed -> Opening`: the orchestrator has requested this device. The
    /// caller issues the platform open right after this transition.
    pub fn begin_open(&mut self) {
        self.state = SessionState::Opening;
        self.last_error = None;
    }

    /// Apply an asynchronous device signal. `pipeline_sink` is invoked only
    /// on the `Opening -> Configuring` transition, to wire the new pipeline's
    /// events back to the dispatcher.
    pub fn handle_device_event(
        &mut self,
        hal: &dyn CameraHal,
        event: DeviceEvent,
        pipeline_sink: impl FnOnce() -> PipelineEventSink,
    ) {
        match event {
            DeviceEvent::Opened(handle) => {
                if self.state != SessionState::Opening {
                    // Stale open from a torn-down session; the handle is not
                    // ours to keep.
                    hal.close_device(handle);
                    return;
                }
                self.device = Some(handle);
                self.state = SessionState::Configuring;
                hal.create_capture_pipeline(handle, self.target, self.buffer_slots, pipeline_sink());
            }
            DeviceEvent::Disconnected => {
                self.fail(hal, SessionError::Disconnected);
            }
            DeviceEvent::Error(code) => {
                let error = if self.state == SessionState::Opening {
                    SessionError::OpenFailed(format!("error code {code}"))
                } else {
                    SessionError::Device(code)
                };
                self.fail(hal, error);
            }
        }
    }

    /// Apply an asynchronous pipeline signal. Returns the frame published to
    /// `store` when the signal was a buffer delivery that decoded.
    pub fn handle_pipeline_event(
        &mut self,
        hal: &dyn CameraHal,
        store: &FrameStore,
        event: PipelineEvent,
    ) -> Option<Arc<RgbFrame>> {
        match event {
            PipelineEvent::Configured(handle) => {
                if self.state != SessionState::Configuring {
                    hal.close_pipeline(handle);
                    return None;
                }
                self.pipeline = Some(handle);
                if let Err(error) = hal.start_repeating_capture(handle) {
                    self.fail(hal, SessionError::CaptureRequest(error.to_string()));
                    return None;
                }
                self.state = SessionState::Streaming;
                log::debug!("camera {}: streaming at {}", self.device_id, self.target);
                None
            }
            PipelineEvent::ConfigureFailed => {
                self.fail(hal, SessionError::ConfigureFailed);
                None
            }
            PipelineEvent::BufferReady => {
                if self.state != SessionState::Streaming {
                    return None;
                }
                let pipeline = self.pipeline?;
                // Take the newest buffer, decode it, and hand the plane
                // memory straight back to the platform pool.
                let buffer = hal.acquire_latest_buffer(pipeline)?;
                let frame = convert::yuv420_to_rgb(&buffer);
                hal.release_buffer(pipeline, buffer);
                Some(store.publish(&self.device_id, frame))
            }
        }
    }

    /// Explicit teardown: close the pipeline (with its buffer source), then
    /// the device. Safe to call in any state and more than once.
    pub fn close(&mut self, hal: &dyn CameraHal) {
        self.release_handles(hal);
        self.state = SessionState::Closed;
    }

    /// `Any -> Error`: release handles, record the reason. No further frame
    /// writes happen for this device until a fresh `begin_open`.
    fn fail(&mut self, hal: &dyn CameraHal, error: SessionError) {
        if self.state == SessionState::Closed {
            return;
        }
        log::warn!("camera {}: {}", self.device_id, error);
        self.release_handles(hal);
        self.last_error = Some(error);
        self.state = SessionState::Error;
    }

    /// Close pipeline before device; both closes are idempotent on the
    /// platform side and the handles are dropped here, so a second call is a
    /// no-op.
    fn release_handles(&mut self, hal: &dyn CameraHal) {
        if let Some(pipeline) = self.pipeline.take() {
            hal.close_pipeline(pipeline);
        }
        if let Some(device) = self.device.take() {
            hal.close_device(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawPlanarBuffer;
    use crate::hal::{CaptureRequestError, DeviceAccessError, DeviceDescriptor, DeviceEventSink};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records platform calls so transitions can be asserted without any
    /// threads involved.
    #[derive(Default)]
    struct RecordingHal {
        next_handle: AtomicU64,
        pipelines_created: AtomicUsize,
        captures_started: AtomicUsize,
        closed_pipelines: Mutex<Vec<u64>>,
        closed_devices: Mutex<Vec<u64>>,
        reject_capture: bool,
        pending_buffer: Mutex<Option<RawPlanarBuffer>>,
        released: AtomicUsize,
    }

    impl RecordingHal {
        fn mint(&self) -> u64 {
            self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn stage_buffer(&self) {
            let buffer = RawPlanarBuffer {
                width: 2,
                height: 2,
                luma: vec![128; 4],
                chroma_u: vec![128; 1],
                chroma_v: vec![128; 1],
                luma_row_stride: 2,
                chroma_row_stride: 1,
                chroma_pixel_stride: 1,
            };
            *self.pending_buffer.lock().unwrap() = Some(buffer);
        }
    }

    impl CameraHal for RecordingHal {
        fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceAccessError> {
            Ok(Vec::new())
        }

        fn concurrent_combinations(&self) -> Result<Vec<Vec<String>>, DeviceAccessError> {
            Ok(Vec::new())
        }

        fn open_device(&self, _id: &str, _events: DeviceEventSink) {}

        fn create_capture_pipeline(
            &self,
            _device: DeviceHandle,
            _target: Size,
            _buffer_slots: usize,
            _events: PipelineEventSink,
        ) {
            self.pipelines_created.fetch_add(1, Ordering::SeqCst);
        }

        fn start_repeating_capture(
            &self,
            _pipeline: PipelineHandle,
        ) -> Result<(), CaptureRequestError> {
            if self.reject_capture {
                return Err(CaptureRequestError("scripted rejection".to_string()));
            }
            self.captures_started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn acquire_latest_buffer(&self, _pipeline: PipelineHandle) -> Option<RawPlanarBuffer> {
            self.pending_buffer.lock().unwrap().take()
        }

        fn release_buffer(&self, _pipeline: PipelineHandle, _buffer: RawPlanarBuffer) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        fn close_device(&self, device: DeviceHandle) {
            self.closed_devices.lock().unwrap().push(device.raw());
        }

        fn close_pipeline(&self, pipeline: PipelineHandle) {
            self.closed_pipelines.lock().unwrap().push(pipeline.raw());
        }
    }

    fn noop_pipeline_sink() -> PipelineEventSink {
        Box::new(|_| {})
    }

    fn streaming_session(hal: &RecordingHal) -> CaptureSession {
        let mut session = CaptureSession::new("cam0", Size::new(2, 2), 2);
        session.begin_open();
        session.handle_device_event(
            hal,
            DeviceEvent::Opened(DeviceHandle::new(hal.mint())),
            noop_pipeline_sink,
        );
        let pipeline = PipelineHandle::new(hal.mint());
        let store = FrameStore::new();
        session.handle_pipeline_event(hal, &store, PipelineEvent::Configured(pipeline));
        assert_eq!(session.state(), SessionState::Streaming);
        session
    }

    #[test]
    fn test_happy_path_reaches_streaming() {
        let hal = RecordingHal::default();
        let session = streaming_session(&hal);
        assert_eq!(hal.pipelines_created.load(Ordering::SeqCst), 1);
        assert_eq!(hal.captures_started.load(Ordering::SeqCst), 1);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_buffer_ready_publishes_frame() {
        let hal = RecordingHal::default();
        let mut session = streaming_session(&hal);
        let store = FrameStore::new();

        hal.stage_buffer();
        let frame = session.handle_pipeline_event(&hal, &store, PipelineEvent::BufferReady);
        assert!(frame.is_some(), "a staged buffer should decode and publish");
        assert!(store.latest("cam0").is_some());
        assert_eq!(
            hal.released.load(Ordering::SeqCst),
            1,
            "buffer must go back to the pool right after conversion"
        );
    }

    #[test]
    fn test_buffer_ready_without_pending_buffer_is_harmless() {
        let hal = RecordingHal::default();
        let mut session = streaming_session(&hal);
        let store = FrameStore::new();
        let frame = session.handle_pipeline_event(&hal, &store, PipelineEvent::BufferReady);
        assert!(frame.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_disconnect_releases_handles_and_blocks_writes() {
        let hal = RecordingHal::default();
        let mut session = streaming_session(&hal);
        let store = FrameStore::new();

        session.handle_device_event(&hal, DeviceEvent::Disconnected, noop_pipeline_sink);
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error(), Some(&SessionError::Disconnected));
        assert_eq!(hal.closed_pipelines.lock().unwrap().len(), 1);
        assert_eq!(hal.closed_devices.lock().unwrap().len(), 1);

        // A buffer signal racing teardown must be dropped by the state check.
        hal.stage_buffer();
        let frame = session.handle_pipeline_event(&hal, &store, PipelineEvent::BufferReady);
        assert!(frame.is_none());
        assert!(store.is_empty(), "no writes after the error transition");
    }

    #[test]
    fn test_error_while_opening_records_open_failure() {
        let hal = RecordingHal::default();
        let mut session = CaptureSession::new("cam0", Size::new(2, 2), 2);
        session.begin_open();
        session.handle_device_event(&hal, DeviceEvent::Error(4), noop_pipeline_sink);
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.last_error(),
            Some(SessionError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_error_while_streaming_records_device_error() {
        let hal = RecordingHal::default();
        let mut session = streaming_session(&hal);
        session.handle_device_event(&hal, DeviceEvent::Error(2), noop_pipeline_sink);
        assert_eq!(session.last_error(), Some(&SessionError::Device(2)));
    }

    #[test]
    fn test_configure_failed() {
        let hal = RecordingHal::default();
        let mut session = CaptureSession::new("cam0", Size::new(2, 2), 2);
        let store = FrameStore::new();
        session.begin_open();
        session.handle_device_event(
            &hal,
            DeviceEvent::Opened(DeviceHandle::new(hal.mint())),
            noop_pipeline_sink,
        );
        session.handle_pipeline_event(&hal, &store, PipelineEvent::ConfigureFailed);
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error(), Some(&SessionError::ConfigureFailed));
        assert_eq!(
            hal.closed_devices.lock().unwrap().len(),
            1,
            "the opened device must be released on configure failure"
        );
    }

    #[test]
    fn test_rejected_capture_request_fails_session() {
        let hal = RecordingHal {
            reject_capture: true,
            ..RecordingHal::default()
        };
        let mut session = CaptureSession::new("cam0", Size::new(2, 2), 2);
        let store = FrameStore::new();
        session.begin_open();
        session.handle_device_event(
            &hal,
            DeviceEvent::Opened(DeviceHandle::new(hal.mint())),
            noop_pipeline_sink,
        );
        session.handle_pipeline_event(
            &hal,
            &store,
            PipelineEvent::Configured(PipelineHandle::new(hal.mint())),
        );
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.last_error(),
            Some(SessionError::CaptureRequest(_))
        ));
    }

    #[test]
    fn test_stale_open_after_close_releases_handle() {
        let hal = RecordingHal::default();
        let mut session = CaptureSession::new("cam0", Size::new(2, 2), 2);
        session.begin_open();
        session.close(&hal);
        session.handle_device_event(
            &hal,
            DeviceEvent::Opened(DeviceHandle::new(hal.mint())),
            noop_pipeline_sink,
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            hal.closed_devices.lock().unwrap().len(),
            1,
            "a stale open must be closed back, not adopted"
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let hal = RecordingHal::default();
        let mut session = streaming_session(&hal);
        session.close(&hal);
        session.close(&hal);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            hal.closed_pipelines.lock().unwrap().len(),
            1,
            "double close must not release the pipeline twice"
        );
        assert_eq!(hal.closed_devices.lock().unwrap().len(), 1);
    }
}
