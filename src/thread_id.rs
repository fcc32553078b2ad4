use basedrop::{Shared, SharedCell};
use std::thread::ThreadId;

/// Tracks the identities of the audio and worker threads so the
/// [`crate::listener::ListenerAdapter`] can tell which thread a backend
/// callback originated on. Recorded once at construction/handshake time and
/// read from every thread thereafter.
pub(crate) struct SharedThreadIds {
    audio_thread_id: Shared<SharedCell<Option<ThreadId>>>,
    worker_thread_id: Shared<SharedCell<Option<ThreadId>>>,
}

impl Clone for SharedThreadIds {
    fn clone(&self) -> Self {
        Self {
            audio_thread_id: Shared::clone(&self.audio_thread_id),
            worker_thread_id: Shared::clone(&self.worker_thread_id),
        }
    }
}

impl SharedThreadIds {
    pub fn new(coll_handle: &basedrop::Handle) -> Self {
        Self {
            audio_thread_id: Shared::new(coll_handle, SharedCell::new(Shared::new(coll_handle, None))),
            worker_thread_id: Shared::new(coll_handle, SharedCell::new(Shared::new(coll_handle, None))),
        }
    }

    pub fn audio_thread_id(&self) -> Option<ThreadId> {
        *self.audio_thread_id.get()
    }

    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        *self.worker_thread_id.get()
    }

    pub fn set_audio_thread_id(&self, id: ThreadId, coll_handle: &basedrop::Handle) {
        self.audio_thread_id.set(Shared::new(coll_handle, Some(id)));
    }

    pub fn set_worker_thread_id(&self, id: ThreadId, coll_handle: &basedrop::Handle) {
        self.worker_thread_id.set(Shared::new(coll_handle, Some(id)));
    }

    /// Record the calling thread as the audio thread, unless it already is
    /// one. Called from [`crate::host_instance::PluginHostInstance::next`]
    /// so thread identification works without the embedding engine having
    /// to perform a separate handshake; the write (and its one allocation)
    /// only happens once, on the first tick.
    pub fn ensure_audio_thread_id(&self, coll_handle: &basedrop::Handle) {
        let current = std::thread::current().id();
        if self.audio_thread_id() != Some(current) {
            self.set_audio_thread_id(current, coll_handle);
        }
    }

    pub fn is_audio_thread(&self) -> bool {
        self.audio_thread_id() == Some(std::thread::current().id())
    }

    pub fn is_worker_thread(&self) -> bool {
        self.worker_thread_id() == Some(std::thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_ids_never_match_current_thread() {
        let collector = basedrop::Collector::new();
        let ids = SharedThreadIds::new(&collector.handle());
        assert!(!ids.is_audio_thread());
        assert!(!ids.is_worker_thread());
    }

    #[test]
    fn set_id_matches_only_recording_thread() {
        let collector = basedrop::Collector::new();
        let ids = SharedThreadIds::new(&collector.handle());
        ids.set_audio_thread_id(std::thread::current().id(), &collector.handle());
        assert!(ids.is_audio_thread());
        assert!(!ids.is_worker_thread());
    }
}
