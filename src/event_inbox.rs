//! The GUI-thread-to-audio-thread event inbox.
//!
//! A small mutex-protected queue. The GUI thread (producer) takes a
//! blocking lock since it is infrequent and never realtime. The audio
//! thread (consumer) uses `try_lock` and swaps the queue out for an empty
//! one to minimize lock hold time; if the lock can't be acquired on a
//! given tick the events simply wait for the next one.

use std::sync::Mutex;

use crate::backend::{MidiEvent, SysexEvent};

/// A plugin-originated event captured from the GUI thread.
#[derive(Debug, Clone)]
pub enum InboxEvent {
    ParamAutomated { index: i32, value: f32 },
    Midi(MidiEvent),
    Sysex(SysexEvent),
}

#[derive(Default)]
struct Inner {
    events: Vec<InboxEvent>,
}

pub struct EventInbox {
    inner: Mutex<Inner>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// GUI-thread producer side: blocking lock, push, release.
    pub fn push(&self, event: InboxEvent) {
        let mut inner = self.inner.lock().expect("event inbox mutex poisoned");
        inner.events.push(event);
    }

    /// Audio-thread consumer side: non-blocking. Returns `None` if the
    /// lock could not be acquired this tick (tolerated by the caller; the
    /// events remain enqueued for a future tick). Returns `Some(vec![])`
    /// when the lock was acquired but nothing was pending.
    pub fn try_drain(&self) -> Option<Vec<InboxEvent>> {
        let mut inner = self.inner.try_lock().ok()?;
        Some(std::mem::take(&mut inner.events))
    }
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new()
    }
}
