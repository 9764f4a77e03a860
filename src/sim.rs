//! Simulated camera rig: an in-process [`CameraHal`] implementation.
//!
//! Each scripted camera runs its open/configure latencies and frame cadence
//! on its own thread, delivering events through the injected sinks exactly
//! like a hardware backend would. Buffers are synthetic 4:2:0 gradients with
//! padded strides, so stride handling is exercised end to end. The rig keeps
//! acquire/release accounting so tests can assert the buffer discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::frame::{RawPlanarBuffer, Size};
use crate::hal::{
    CameraHal, CaptureRequestError, DeviceAccessError, DeviceDescriptor, DeviceEvent,
    DeviceEventSink, DeviceHandle, Facing, PipelineEvent, PipelineEventSink, PipelineHandle,
};

/// Error code the rig reports for a scripted open failure.
pub const SIM_ERROR_OPEN: i32 = 1;
/// Error code the rig reports when asked to open an id it does not know.
pub const SIM_ERROR_UNKNOWN_DEVICE: i32 = 2;

const LUMA_ROW_PAD: usize = 16;
const CHROMA_ROW_PAD: usize = 8;
const CHROMA_PIXEL_STRIDE: usize = 2;

/// Scripted misbehavior for one simulated camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The device reports an error instead of opening.
    FailOpen,
    /// The pipeline reports `ConfigureFailed`.
    FailConfigure,
    /// `start_repeating_capture` is rejected.
    RejectRequest,
    /// The pipeline configures but never delivers a buffer.
    NeverDeliver,
}

/// Script for one simulated camera device.
#[derive(Debug, Clone)]
pub struct SimCamera {
    id: String,
    facing: Facing,
    sizes: Vec<Size>,
    logical: bool,
    physical_ids: Vec<String>,
    open_after: Duration,
    configure_after: Duration,
    frame_interval: Duration,
    fault: Option<Fault>,
    disconnect_after: Option<u64>,
}

impl SimCamera {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            facing: Facing::Unknown,
            sizes: vec![Size::new(640, 480), Size::new(320, 240)],
            logical: false,
            physical_ids: Vec::new(),
            open_after: Duration::from_millis(1),
            configure_after: Duration::from_millis(1),
            frame_interval: Duration::from_millis(10),
            fault: None,
            disconnect_after: None,
        }
    }

    pub fn facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    /// Advertised output sizes, in order. Dimensions must be even.
    pub fn sizes(mut self, sizes: &[(u32, u32)]) -> Self {
        self.sizes = sizes.iter().map(|&(w, h)| Size::new(w, h)).collect();
        self
    }

    /// Mark this device as a logical grouping of the given physical sensors.
    pub fn logical(mut self, physical_ids: &[&str]) -> Self {
        self.logical = true;
        self.physical_ids = physical_ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn open_after(mut self, delay: Duration) -> Self {
        self.open_after = delay;
        self
    }

    pub fn configure_after(mut self, delay: Duration) -> Self {
        self.configure_after = delay;
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Deliver this many buffers, then report the device disconnected.
    pub fn disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: self.id.clone(),
            facing: self.facing,
            sizes: self.sizes.clone(),
            logical_multi_camera: self.logical,
            physical_ids: self.physical_ids.clone(),
        }
    }
}

struct OpenDevice {
    id: String,
    sink: DeviceEventSink,
}

struct OpenPipeline {
    device: DeviceHandle,
    repeating: bool,
    latest: Option<RawPlanarBuffer>,
}

struct RigInner {
    cameras: Vec<SimCamera>,
    combinations: Vec<Vec<String>>,
    unavailable: bool,
    devices: Mutex<HashMap<u64, OpenDevice>>,
    pipelines: Mutex<HashMap<u64, OpenPipeline>>,
    next_handle: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl RigInner {
    fn mint_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn script_for_device(&self, device: DeviceHandle) -> Option<SimCamera> {
        let devices = self.devices.lock().ok()?;
        let record = devices.get(&device.raw())?;
        let id = record.id.clone();
        drop(devices);
        self.cameras.iter().find(|camera| camera.id == id).cloned()
    }

    /// Report a disconnect on the device's own event sink, if it is still
    /// open.
    fn notify_disconnect(&self, device: DeviceHandle) {
        if let Ok(mut devices) = self.devices.lock() {
            if let Some(record) = devices.get_mut(&device.raw()) {
                log::debug!("sim camera {}: disconnecting", record.id);
                (record.sink)(DeviceEvent::Disconnected);
            }
        }
    }
}

/// Simulated multi-camera rig. Cheap to clone; clones share the same rig
/// state, so a test can keep one handle for assertions while the engine owns
/// another as its `CameraHal`.
#[derive(Clone)]
pub struct SimulatedRig {
    inner: Arc<RigInner>,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRig {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RigInner {
                cameras: Vec::new(),
                combinations: Vec::new(),
                unavailable: false,
                devices: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(0),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Add a scripted camera. Enumeration order follows insertion order.
    pub fn with_camera(self, camera: SimCamera) -> Self {
        self.update(|inner| inner.cameras.push(camera))
    }

    /// Declare a set of device ids that may stream simultaneously.
    pub fn with_combination(self, ids: &[&str]) -> Self {
        self.update(|inner| {
            inner
                .combinations
                .push(ids.iter().map(|id| id.to_string()).collect())
        })
    }

    /// Make the whole camera subsystem report as unavailable.
    pub fn unavailable(self) -> Self {
        self.update(|inner| inner.unavailable = true)
    }

    /// Builder-time mutation; only valid before the rig is shared.
    fn update(mut self, mutate: impl FnOnce(&mut RigInner)) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            mutate(inner);
        }
        self
    }

    /// This rig as the injectable platform capability.
    pub fn hal(&self) -> Arc<dyn CameraHal> {
        Arc::new(self.clone())
    }

    /// Buffers handed out and not yet returned to the pool.
    pub fn outstanding_buffers(&self) -> usize {
        let acquired = self.inner.acquired.load(Ordering::SeqCst);
        let released = self.inner.released.load(Ordering::SeqCst);
        acquired.saturating_sub(released)
    }

    pub fn acquired_buffers(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Devices currently open (opened and not yet closed).
    pub fn open_device_count(&self) -> usize {
        self.inner.devices.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Pipelines currently open.
    pub fn open_pipeline_count(&self) -> usize {
        self.inner.pipelines.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl CameraHal for SimulatedRig {
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceAccessError> {
        if self.inner.unavailable {
            return Err(DeviceAccessError("simulated outage".to_string()));
        }
        Ok(self.inner.cameras.iter().map(SimCamera::descriptor).collect())
    }

    fn concurrent_combinations(&self) -> Result<Vec<Vec<String>>, DeviceAccessError> {
        if self.inner.unavailable {
            return Err(DeviceAccessError("simulated outage".to_string()));
        }
        Ok(self.inner.combinations.clone())
    }

    fn open_device(&self, id: &str, mut events: DeviceEventSink) {
        let script = self.inner.cameras.iter().find(|camera| camera.id == id).cloned();
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let Some(script) = script else {
                events(DeviceEvent::Error(SIM_ERROR_UNKNOWN_DEVICE));
                return;
            };
            thread::sleep(script.open_after);
            if script.fault == Some(Fault::FailOpen) {
                events(DeviceEvent::Error(SIM_ERROR_OPEN));
                return;
            }
            let handle = DeviceHandle::new(inner.mint_handle());
            // Register the device before announcing it, so a pipeline request
            // arriving right after `Opened` already finds the record.
            if let Ok(mut devices) = inner.devices.lock() {
                let record = devices.entry(handle.raw()).or_insert(OpenDevice {
                    id: script.id,
                    sink: events,
                });
                (record.sink)(DeviceEvent::Opened(handle));
            }
        });
    }

    fn create_capture_pipeline(
        &self,
        device: DeviceHandle,
        target: Size,
        _buffer_slots: usize,
        mut events: PipelineEventSink,
    ) {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let Some(script) = inner.script_for_device(device) else {
                // The device was closed before the pipeline came up.
                events(PipelineEvent::ConfigureFailed);
                return;
            };
            thread::sleep(script.configure_after);
            if script.fault == Some(Fault::FailConfigure) {
                events(PipelineEvent::ConfigureFailed);
                return;
            }

            let pipeline = PipelineHandle::new(inner.mint_handle());
            if let Ok(mut pipelines) = inner.pipelines.lock() {
                pipelines.insert(
                    pipeline.raw(),
                    OpenPipeline {
                        device,
                        repeating: false,
                        latest: None,
                    },
                );
            }
            events(PipelineEvent::Configured(pipeline));

            if script.fault == Some(Fault::NeverDeliver) {
                return;
            }
            run_frame_loop(&inner, &script, device, pipeline, target, &mut events);
        });
    }

    fn start_repeating_capture(&self, pipeline: PipelineHandle) -> Result<(), CaptureRequestError> {
        let Ok(mut pipelines) = self.inner.pipelines.lock() else {
            return Err(CaptureRequestError("rig state poisoned".to_string()));
        };
        let Some(record) = pipelines.get_mut(&pipeline.raw()) else {
            return Err(CaptureRequestError("unknown pipeline".to_string()));
        };
        let script = self.inner.script_for_device(record.device);
        if script.as_ref().and_then(|s| s.fault) == Some(Fault::RejectRequest) {
            return Err(CaptureRequestError("rejected by script".to_string()));
        }
        record.repeating = true;
        Ok(())
    }

    fn acquire_latest_buffer(&self, pipeline: PipelineHandle) -> Option<RawPlanarBuffer> {
        let mut pipelines = self.inner.pipelines.lock().ok()?;
        let buffer = pipelines.get_mut(&pipeline.raw())?.latest.take()?;
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Some(buffer)
    }

    fn release_buffer(&self, _pipeline: PipelineHandle, buffer: RawPlanarBuffer) {
        drop(buffer);
        self.inner.released.fetch_add(1, Ordering::SeqCst);
    }

    fn close_device(&self, device: DeviceHandle) {
        if let Ok(mut devices) = self.inner.devices.lock() {
            devices.remove(&device.raw());
        }
    }

    fn close_pipeline(&self, pipeline: PipelineHandle) {
        if let Ok(mut pipelines) = self.inner.pipelines.lock() {
            pipelines.remove(&pipeline.raw());
        }
    }
}

enum FrameStep {
    Stop,
    Idle,
    Deliver,
    Disconnect,
}

/// Deliver buffers at the scripted cadence until the pipeline is closed or
/// the script disconnects the device.
fn run_frame_loop(
    inner: &Arc<RigInner>,
    script: &SimCamera,
    device: DeviceHandle,
    pipeline: PipelineHandle,
    target: Size,
    events: &mut PipelineEventSink,
) {
    let mut delivered: u64 = 0;
    loop {
        thread::sleep(script.frame_interval);
        let step = {
            let Ok(mut pipelines) = inner.pipelines.lock() else {
                break;
            };
            match pipelines.get_mut(&pipeline.raw()) {
                None => FrameStep::Stop,
                Some(record) if !record.repeating => FrameStep::Idle,
                Some(record) => {
                    if script.disconnect_after == Some(delivered) {
                        FrameStep::Disconnect
                    } else {
                        // Replacing an unacquired buffer recycles it, like a
                        // bounded platform queue dropping its oldest entry.
                        record.latest = Some(synth_buffer(target, delivered));
                        FrameStep::Deliver
                    }
                }
            }
        };
        match step {
            FrameStep::Stop => break,
            FrameStep::Idle => continue,
            FrameStep::Deliver => {
                events(PipelineEvent::BufferReady);
                delivered += 1;
            }
            FrameStep::Disconnect => {
                inner.notify_disconnect(device);
                break;
            }
        }
    }
}

/// Synthetic 4:2:0 gradient buffer. The pattern shifts with `seq` so
/// consecutive frames differ, and every plane carries row padding plus a
/// chroma pixel stride of 2 to exercise stride handling.
fn synth_buffer(target: Size, seq: u64) -> RawPlanarBuffer {
    let width = target.width as usize;
    let height = target.height as usize;
    let luma_row_stride = width + LUMA_ROW_PAD;
    let chroma_row_stride = (width / 2) * CHROMA_PIXEL_STRIDE + CHROMA_ROW_PAD;
    let chroma_rows = height / 2;

    let mut luma = vec![0u8; luma_row_stride * height];
    let mut chroma_u = vec![0u8; chroma_row_stride * chroma_rows];
    let mut chroma_v = vec![0u8; chroma_row_stride * chroma_rows];

    let shift = (seq % 256) as usize * 7;
    for y in 0..height {
        for x in 0..width {
            luma[y * luma_row_stride + x] = ((x + y + shift) % 256) as u8;
        }
    }
    for y in 0..chroma_rows {
        for x in 0..width / 2 {
            let index = y * chroma_row_stride + x * CHROMA_PIXEL_STRIDE;
            chroma_u[index] = (128 + (x + shift) % 32) as u8;
            chroma_v[index] = 128u8.wrapping_sub(((y + shift) % 32) as u8);
        }
    }

    RawPlanarBuffer {
        width: target.width,
        height: target.height,
        luma,
        chroma_u,
        chroma_v,
        luma_row_stride,
        chroma_row_stride,
        chroma_pixel_stride: CHROMA_PIXEL_STRIDE,
    }
}
