//! The windowing backend trait boundary and the editor window handle that
//! a [`crate::command::ClosePayload`] moves between threads.
//!
//! Per-OS window creation and event-loop plumbing are out of scope; this
//! module only defines the trait boundary the worker/GUI threads drive and
//! the handle the host keeps around for the editor's lifetime.

use crate::backend::EditorRect;

/// A live editor window. Owned by the GUI thread for its lifetime;
/// created and destroyed there because many backends require same-thread
/// creation and destruction.
pub struct WindowHandle {
    window: Box<dyn Window>,
}

impl WindowHandle {
    pub fn new(window: Box<dyn Window>) -> Self {
        Self { window }
    }

    pub fn as_mut(&mut self) -> &mut dyn Window {
        self.window.as_mut()
    }

    /// The raw handle backends use as the parent for their own native
    /// editor window (passed to [`crate::backend::PluginBackend::editor_open`]).
    pub fn raw_window_handle(&self) -> raw_window_handle::RawWindowHandle {
        self.window.raw_window_handle()
    }
}

// SAFETY: a `WindowHandle` only ever changes hands as part of a `Close`
// command's payload; the sending thread clears its own reference at
// submission time and the window is never touched concurrently from two
// threads.
unsafe impl Send for WindowHandle {}

pub trait Window: Send {
    fn set_title(&mut self, title: &str);
    fn set_geometry(&mut self, rect: EditorRect);
    fn show(&mut self);
    fn hide(&mut self);
    fn bring_to_top(&mut self);
    fn raw_window_handle(&self) -> raw_window_handle::RawWindowHandle;
}

/// Per-OS window creation, supplied by the embedding engine.
pub trait WindowBackend: Send + Sync {
    /// Create a window suitable for hosting the given plugin's editor.
    /// Called on the GUI thread in [`crate::config::GuiThreadMode::Dedicated`]
    /// mode, or on whatever thread drives `open`'s worker stage in
    /// [`crate::config::GuiThreadMode::PumpedByHost`] mode.
    fn create(&self) -> Box<dyn Window>;

    /// Run the GUI event loop until `quit` is called. Only used in
    /// `Dedicated` mode.
    fn run(&self);

    /// Ask a running event loop (`run`) to return.
    fn quit(&self);

    /// Pump pending GUI events once. Only used in `PumpedByHost` mode,
    /// where there is no dedicated GUI thread.
    fn poll(&self);
}
