//! Shared capture machinery: event dispatch, session registry, teardown.
//!
//! Both orchestration modes are built on a [`CaptureEngine`]. The engine owns
//! the dispatcher worker that every platform callback is funneled into over
//! an mpsc channel, the session registry, and the frame store. Sessions are
//! only mutated on the dispatcher (and from the `stop_*` calls, under the
//! same registry lock), so a stop naturally waits for any in-flight callback
//! to finish before tearing down.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::frame::{RgbFrame, Size};
use crate::hal::{
    CameraHal, DeviceEvent, DeviceEventSink, PipelineEvent, PipelineEventSink, SessionError,
};
use crate::session::{CaptureSession, SessionState};
use crate::store::FrameStore;

/// Platform signals funneled into the dispatcher, tagged by device id.
enum EngineEvent {
    Device(String, DeviceEvent),
    Pipeline(String, PipelineEvent),
    Shutdown,
}

type SessionRegistry = Arc<Mutex<HashMap<String, CaptureSession>>>;
type SubscriberList = Arc<Mutex<Vec<(String, Sender<Arc<RgbFrame>>)>>>;

/// Session machinery shared by one-shot, watch, and logical-stream modes.
pub struct CaptureEngine {
    hal: Arc<dyn CameraHal>,
    store: Arc<FrameStore>,
    sessions: SessionRegistry,
    subscribers: SubscriberList,
    events: Sender<EngineEvent>,
    dispatcher: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Build an engine around the injected platform capability and start its
    /// dispatcher worker. The worker's lifetime is tied to the engine: it is
    /// joined on drop, never left as ambient global state.
    pub fn new(hal: Arc<dyn CameraHal>) -> Self {
        let (events, receiver) = mpsc::channel();
        let store = Arc::new(FrameStore::new());
        let sessions: SessionRegistry = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: SubscriberList = Arc::new(Mutex::new(Vec::new()));

        let dispatcher = {
            let hal = Arc::clone(&hal);
            let store = Arc::clone(&store);
            let sessions = Arc::clone(&sessions);
            let subscribers = Arc::clone(&subscribers);
            let events = events.clone();
            thread::spawn(move || {
                run_dispatcher(receiver, hal, store, sessions, subscribers, events);
            })
        };

        Self {
            hal,
            store,
            sessions,
            subscribers,
            events,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn hal(&self) -> &Arc<dyn CameraHal> {
        &self.hal
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Open a fresh session for `id` at `target` and begin the platform open.
    /// Any previous session for the same id is closed first, and the device's
    /// store slot is emptied so waiters see only frames from this session.
    pub fn open_session(&self, id: &str, target: Size, buffer_slots: usize) {
        {
            let Ok(mut registry) = self.sessions.lock() else {
                return;
            };
            if let Some(existing) = registry.get_mut(id) {
                existing.close(self.hal.as_ref());
            }
            let mut session = CaptureSession::new(id, target, buffer_slots);
            session.begin_open();
            registry.insert(id.to_string(), session);
        }
        self.store.remove(id);
        log::debug!("camera {id}: opening at {target}");
        self.hal
            .open_device(id, device_sink(id.to_string(), self.events.clone()));
    }

    /// Tear down `id`'s session. The session entry is kept so its last error
    /// stays queryable; a second stop is a no-op.
    pub fn stop_session(&self, id: &str) {
        if let Ok(mut registry) = self.sessions.lock() {
            if let Some(session) = registry.get_mut(id) {
                session.close(self.hal.as_ref());
            }
        }
    }

    /// Tear down every session. Idempotent; also runs on drop.
    pub fn stop_all(&self) {
        if let Ok(mut registry) = self.sessions.lock() {
            for session in registry.values_mut() {
                session.close(self.hal.as_ref());
            }
        }
    }

    pub fn session_state(&self, id: &str) -> Option<SessionState> {
        let registry = self.sessions.lock().ok()?;
        registry.get(id).map(|session| session.state())
    }

    /// The failure last recorded on `id`'s session, if any.
    pub fn last_error(&self, id: &str) -> Option<SessionError> {
        let registry = self.sessions.lock().ok()?;
        registry.get(id).and_then(|session| session.last_error().cloned())
    }

    /// Receive every frame published for `id` from now on, in delivery
    /// order. The subscription ends when the receiver is dropped.
    pub fn subscribe(&self, id: &str) -> Receiver<Arc<RgbFrame>> {
        let (sender, receiver) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((id.to_string(), sender));
        }
        receiver
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop_all();
        let _ = self.events.send(EngineEvent::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

/// Wrap the engine channel as a device event sink for the platform layer.
fn device_sink(id: String, events: Sender<EngineEvent>) -> DeviceEventSink {
    Box::new(move |event| {
        // A failed send just means the engine is gone; the platform side has
        // nothing useful to do about it.
        let _ = events.send(EngineEvent::Device(id.clone(), event));
    })
}

/// Wrap the engine channel as a pipeline event sink for the platform layer.
fn pipeline_sink(id: String, events: Sender<EngineEvent>) -> PipelineEventSink {
    Box::new(move |event| {
        let _ = events.send(EngineEvent::Pipeline(id.clone(), event));
    })
}

fn run_dispatcher(
    receiver: Receiver<EngineEvent>,
    hal: Arc<dyn CameraHal>,
    store: Arc<FrameStore>,
    sessions: SessionRegistry,
    subscribers: SubscriberList,
    events: Sender<EngineEvent>,
) {
    while let Ok(event) = receiver.recv() {
        match event {
            EngineEvent::Shutdown => break,
            EngineEvent::Device(id, device_event) => {
                let Ok(mut registry) = sessions.lock() else {
                    break;
                };
                if let Some(session) = registry.get_mut(&id) {
                    let sink_id = id.clone();
                    let sink_events = events.clone();
                    session.handle_device_event(hal.as_ref(), device_event, move || {
                        pipeline_sink(sink_id, sink_events)
                    });
                }
            }
            EngineEvent::Pipeline(id, pipeline_event) => {
                let published = {
                    let Ok(mut registry) = sessions.lock() else {
                        break;
                    };
                    match registry.get_mut(&id) {
                        Some(session) => {
                            session.handle_pipeline_event(hal.as_ref(), &store, pipeline_event)
                        }
                        None => None,
                    }
                };
                // Fan out to subscribers outside the registry lock.
                if let Some(frame) = published {
                    forward_frame(&subscribers, &id, &frame);
                }
            }
        }
    }
}

/// Deliver `frame` to every live subscriber for `id`, pruning closed ones.
fn forward_frame(subscribers: &SubscriberList, id: &str, frame: &Arc<RgbFrame>) {
    if let Ok(mut subscribers) = subscribers.lock() {
        subscribers.retain(|(subscriber_id, sender)| {
            subscriber_id != id || sender.send(Arc::clone(frame)).is_ok()
        });
    }
}
