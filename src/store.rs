//! Latest-frame storage shared between capture callbacks and readers.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::frame::RgbFrame;

/// Concurrency-safe map from device id to that device's most recent decoded
/// frame.
///
/// Writers replace the whole frame under the lock, so readers always observe
/// either the previous frame or the new one, never a partial grid. A missing
/// entry means the device has not delivered a frame yet; that is an expected
/// state, not an error.
#[derive(Default)]
pub struct FrameStore {
    frames: Mutex<HashMap<String, Arc<RgbFrame>>>,
    delivered: Condvar,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `id`'s frame and wake any bounded waiter.
    pub fn publish(&self, id: &str, frame: RgbFrame) -> Arc<RgbFrame> {
        let frame = Arc::new(frame);
        if let Ok(mut frames) = self.frames.lock() {
            frames.insert(id.to_string(), frame.clone());
            self.delivered.notify_all();
        }
        frame
    }

    /// Fetch `id`'s most recent frame without blocking.
    pub fn latest(&self, id: &str) -> Option<Arc<RgbFrame>> {
        let frames = self.frames.lock().ok()?;
        frames.get(id).cloned()
    }

    /// Block until `id` holds a frame or `deadline` elapses.
    ///
    /// Wakes as soon as the first frame for `id` is published and otherwise
    /// returns `None` on deadline expiry. This is the only suspension point
    /// in the crate: one-shot capture waits here, watch-mode reads go through
    /// [`FrameStore::latest`] and never block.
    pub fn wait_for(&self, id: &str, deadline: Duration) -> Option<Arc<RgbFrame>> {
        let guard = self.frames.lock().ok()?;
        let (guard, _timeout) = self
            .delivered
            .wait_timeout_while(guard, deadline, |frames| !frames.contains_key(id))
            .ok()?;
        guard.get(id).cloned()
    }

    /// Drop `id`'s entry so a fresh session starts with an empty slot.
    pub fn remove(&self, id: &str) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.remove(id);
        }
    }

    /// Ids that currently hold a frame, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        match self.frames.lock() {
            Ok(frames) => frames.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
