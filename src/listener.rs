//! The listener adapter: routes each backend callback to whichever
//! thread it actually originated on. Not a subclassed object — a
//! function-like handle bound to the instance, with thread identity
//! carried as explicit state rather than a polymorphic method override.

use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use crossbeam_channel::Sender;

use crate::backend::{BackendListener, MidiEvent, SysexEvent};
use crate::event_inbox::{EventInbox, InboxEvent};
use crate::thread_id::SharedThreadIds;

/// What the listener hands the audio thread when a callback arrives from
/// the worker thread and must be replayed inline on the next tick.
pub enum DeferredCallback {
    ParamAutomated { index: i32, value: f32 },
}

pub(crate) struct ListenerAdapter {
    thread_ids: SharedThreadIds,
    inbox: Arc<EventInbox>,
    to_audio: Sender<DeferredCallback>,
    /// Automation callbacks the backend fired synchronously from inside
    /// its own `process()` call, i.e. on the audio thread itself. Buffered
    /// here (rather than requiring the caller thread a `&mut Vec` into the
    /// backend call) since `set_listener` hands the backend a type-erased
    /// `Arc<dyn BackendListener>` with no route back to the current tick's
    /// reply buffer; `next()` drains this right after `process_f32` in the
    /// same tick.
    inline_automation: AtomicRefCell<Vec<(i32, f32)>>,
    /// Same idea as `inline_automation`, for MIDI/sysex a backend emits
    /// synchronously from inside its own `process()` call.
    inline_midi: AtomicRefCell<Vec<MidiEvent>>,
    inline_sysex: AtomicRefCell<Vec<SysexEvent>>,
}

impl ListenerAdapter {
    pub fn new(thread_ids: SharedThreadIds, inbox: Arc<EventInbox>, to_audio: Sender<DeferredCallback>) -> Self {
        Self {
            thread_ids,
            inbox,
            to_audio,
            inline_automation: AtomicRefCell::new(Vec::new()),
            inline_midi: AtomicRefCell::new(Vec::new()),
            inline_sysex: AtomicRefCell::new(Vec::new()),
        }
    }

    /// Take whatever inline (audio-thread-originated) automation arrived
    /// since the last call. Only ever called from the audio thread, which
    /// is also the only thread that ever pushes into this buffer.
    pub(crate) fn take_inline_automation(&self) -> Vec<(i32, f32)> {
        std::mem::take(&mut *self.inline_automation.borrow_mut())
    }

    pub(crate) fn take_inline_midi(&self) -> Vec<MidiEvent> {
        std::mem::take(&mut *self.inline_midi.borrow_mut())
    }

    pub(crate) fn take_inline_sysex(&self) -> Vec<SysexEvent> {
        std::mem::take(&mut *self.inline_sysex.borrow_mut())
    }
}

/// Where a callback was routed, so the audio thread's `next()` knows
/// whether it already has the reply in hand or needs to check the deferred
/// channel / inbox.
#[derive(Debug, PartialEq, Eq)]
pub enum RoutedTo {
    /// Delivered inline; the caller should emit the reply immediately.
    Inline,
    /// Posted to the worker->audio deferred channel for next-tick delivery.
    DeferredFromWorker,
    /// Pushed onto the mutex-protected event inbox for next-tick delivery.
    GuiInbox,
}

impl BackendListener for ListenerAdapter {
    fn parameter_automated(&self, index: i32, value: f32) {
        if self.thread_ids.is_audio_thread() {
            self.inline_automation.borrow_mut().push((index, value));
        } else if self.thread_ids.is_worker_thread() {
            let _ = self.to_audio.send(DeferredCallback::ParamAutomated { index, value });
        } else {
            // GUI thread (or any other caller): blocking lock, rare.
            self.inbox.push(InboxEvent::ParamAutomated { index, value });
        }
    }

    fn midi_event(&self, event: MidiEvent) {
        if self.thread_ids.is_audio_thread() {
            self.inline_midi.borrow_mut().push(event);
        } else if self.thread_ids.is_worker_thread() {
            // Plugins never emit MIDI from the worker thread; ignored.
            log::warn!("ignoring MIDI event emitted from the worker thread");
        } else {
            self.inbox.push(InboxEvent::Midi(event));
        }
    }

    fn sysex_event(&self, event: SysexEvent) {
        if self.thread_ids.is_audio_thread() {
            self.inline_sysex.borrow_mut().push(event);
        } else if self.thread_ids.is_worker_thread() {
            log::warn!("ignoring sysex event emitted from the worker thread");
        } else {
            self.inbox.push(InboxEvent::Sysex(event));
        }
    }
}

impl ListenerAdapter {
    /// Classify which route a callback invoked *right now* (i.e. on the
    /// calling thread) would take, without actually delivering it. Used by
    /// tests and by callers that want to log the routing decision.
    pub fn route_for_current_thread(&self) -> RoutedTo {
        if self.thread_ids.is_audio_thread() {
            RoutedTo::Inline
        } else if self.thread_ids.is_worker_thread() {
            RoutedTo::DeferredFromWorker
        } else {
            RoutedTo::GuiInbox
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_adapter() -> (ListenerAdapter, crossbeam_channel::Receiver<DeferredCallback>, Arc<EventInbox>) {
        let collector = basedrop::Collector::new();
        let thread_ids = SharedThreadIds::new(&collector.handle());
        thread_ids.set_audio_thread_id(std::thread::current().id(), &collector.handle());
        let inbox = Arc::new(EventInbox::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        (ListenerAdapter::new(thread_ids, Arc::clone(&inbox), tx), rx, inbox)
    }

    #[test]
    fn audio_thread_callback_routes_inline() {
        let (adapter, _rx, _inbox) = new_adapter();
        assert_eq!(adapter.route_for_current_thread(), RoutedTo::Inline);
    }

    #[test]
    fn audio_thread_callback_buffers_inline_automation() {
        let (adapter, _rx, _inbox) = new_adapter();
        adapter.parameter_automated(2, 0.5);
        assert_eq!(adapter.take_inline_automation(), vec![(2, 0.5)]);
        // Draining empties the buffer until the next callback.
        assert!(adapter.take_inline_automation().is_empty());
    }

    #[test]
    fn worker_thread_callback_posts_to_deferred_channel() {
        let collector = basedrop::Collector::new();
        let thread_ids = SharedThreadIds::new(&collector.handle());
        thread_ids.set_worker_thread_id(std::thread::current().id(), &collector.handle());
        let inbox = Arc::new(EventInbox::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let adapter = ListenerAdapter::new(thread_ids, inbox, tx);

        adapter.parameter_automated(1, 0.3);

        match rx.try_recv().unwrap() {
            DeferredCallback::ParamAutomated { index: 1, value } => assert_eq!(value, 0.3),
        }
    }

    #[test]
    fn gui_thread_callback_pushes_to_inbox() {
        let (adapter, _rx, inbox) = new_adapter();
        std::thread::spawn(move || {
            adapter.parameter_automated(5, 0.75);
        })
        .join()
        .unwrap();

        let drained = inbox.try_drain().unwrap();
        assert_eq!(drained.len(), 1);
        match drained[0] {
            InboxEvent::ParamAutomated { index: 5, value } => assert_eq!(value, 0.75),
            _ => panic!("wrong event kind"),
        }
    }
}
