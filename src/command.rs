//! The async command path between the audio thread and the worker thread.
//! A per-engine SPSC ring carries [`Command`]s from the audio
//! thread (the sole producer) to the worker thread (the sole consumer);
//! each `Command` carries a one-shot reply channel the worker uses to hand
//! its result back to the exact instance that submitted it, which the
//! audio thread then applies on a later `next()` tick.
//!
//! Ordering guarantee: commands are pulled off the ring in submission
//! order, so within one [`crate::host_instance::PluginHostInstance`]
//! effects are observed strictly FIFO. There is no cancellation; pending
//! commands drain naturally at engine teardown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::backend::{Backend, BackendFactory, BackendListener, PluginInfo};
use crate::config::HostConfig;
use crate::thread_id::SharedThreadIds;
use crate::window::{WindowBackend, WindowHandle};

/// Opaque identity of a [`crate::host_instance::PluginHostInstance`],
/// stable for the instance's lifetime. Used to label commands and replies
/// so a shared, per-engine queue can carry traffic for many instances at
/// once without their replies crossing wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginInstanceId(u64);

impl PluginInstanceId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything beyond the backend that a `Close` command moves off of the
/// instance so the caller can null its own fields immediately and be
/// safely reopened. The backend itself travels in [`Command::backend`],
/// alongside every other command that needs to touch it.
pub struct ClosePayload {
    pub editor_window: Option<WindowHandle>,
    pub gui_join_handle: Option<std::thread::JoinHandle<()>>,
    /// Needed to ask a dedicated GUI thread's event loop to return before
    /// joining it.
    pub window_backend: Option<Arc<dyn WindowBackend>>,
}

pub enum CommandPayload {
    /// Carries everything the worker needs to create a backend from
    /// scratch: there is no live instance context to check out yet, so
    /// the factory, window backend, config, and listener all travel with
    /// the command itself.
    Open {
        path: PathBuf,
        with_editor: bool,
        factory: Arc<dyn BackendFactory>,
        window_backend: Option<Arc<dyn WindowBackend>>,
        config: HostConfig,
        listener: Arc<dyn BackendListener>,
    },
    Close(ClosePayload),
    ResetAsync,
    /// The editor window, checked out for the round trip the same way
    /// `Close` checks it out.
    ShowEditor { show: bool, editor_window: Option<WindowHandle> },
    SetParamFloat { index: i32, value: f32 },
    SetParamString { index: i32, text: String },
    /// Block `setn`: a contiguous run of parameters starting at `index`,
    /// one worker round trip for the whole run rather than one per value.
    SetParamBlock { index: i32, values: Vec<f32> },
    SetProgram { index: i32 },
    QueryPrograms { onset: i32, count: i32 },
    SetProgramName { name: String },
    ReadProgram { path: PathBuf },
    WriteProgram { path: PathBuf, info: PluginInfo },
    ReadBank { path: PathBuf },
    WriteBank { path: PathBuf, info: PluginInfo },
    SetProgramData { bytes: Vec<u8>, info: PluginInfo },
    SetBankData { bytes: Vec<u8>, info: PluginInfo },
    GetProgramData { info: PluginInfo },
    GetBankData { info: PluginInfo },
    CanDo { key: String },
    VendorSpecific { index: i32, value: isize, opt: f32 },
}

/// A Command as it travels through the ring: the target instance, the
/// payload, the plugin backend itself (moved out of the instance for the
/// command's duration so the audio thread and the worker thread never
/// touch it at once), the instance's thread
/// identity tracker (so the worker can record its own id the first time it
/// touches a given instance), and a one-shot reply channel for the
/// worker's result.
pub struct Command {
    pub instance: PluginInstanceId,
    pub payload: CommandPayload,
    pub backend: Option<Backend>,
    pub(crate) thread_ids: SharedThreadIds,
    pub(crate) coll_handle: basedrop::Handle,
    pub(crate) reply_tx: Sender<CommandReply>,
}

/// What travels back on a command's reply channel: the worker's result and
/// the backend, handed back so the instance can restore it before the next
/// `next()` tick.
pub struct CommandReply {
    pub result: WorkerResult,
    pub backend: Option<Backend>,
}

/// What the worker hands back after running a command's `nrt` stage; the
/// instance applies this on the audio thread as the command's `rt` stage.
pub enum WorkerResult {
    Opened {
        editor_window: Option<WindowHandle>,
        gui_join_handle: Option<std::thread::JoinHandle<()>>,
        ok: bool,
        has_editor: bool,
        info: Option<Box<PluginInfo>>,
    },
    Closed,
    ResetDone,
    EditorShown { editor_window: Option<WindowHandle> },
    ParamSet { index: i32, value: f32, display: String },
    ParamBlockSet { entries: Vec<(i32, f32, String)> },
    ProgramSet { ok: bool, index: i32, name: String },
    ProgramsQueried { names: Vec<(i32, String)> },
    ProgramNamed,
    ProgramRead { ok: bool, name: Option<String> },
    ProgramWritten { ok: bool },
    BankRead { ok: bool, program_index: i32 },
    BankWritten { ok: bool },
    ProgramDataSet,
    BankDataSet,
    ProgramDataGot { total: usize, bytes: Vec<u8> },
    BankDataGot { total: usize, bytes: Vec<u8> },
    CanDoResult { result: i32 },
    VendorResult { result: isize },
}

/// The audio-thread (producer) end of the per-engine command ring.
pub struct CommandProducer {
    tx: rtrb::Producer<Command>,
}

/// The worker-thread (consumer) end of the per-engine command ring.
pub struct CommandConsumer {
    rx: rtrb::Consumer<Command>,
}

/// Create a bounded SPSC command ring. `capacity` should comfortably
/// exceed the number of commands that can be in flight at once; a full
/// ring causes `submit` to reject the command rather than block.
pub fn command_queue(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    (CommandProducer { tx }, CommandConsumer { rx })
}

impl CommandProducer {
    /// Submit a command for a reply the caller will later poll with the
    /// returned [`Receiver`]. Returns `Err(command)` if the ring is full
    /// (surfaced by the caller as an `AllocationFailure`).
    pub fn submit(
        &mut self,
        instance: PluginInstanceId,
        payload: CommandPayload,
        backend: Option<Backend>,
        thread_ids: SharedThreadIds,
        coll_handle: basedrop::Handle,
    ) -> Result<Receiver<CommandReply>, CommandPayload> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        match self.tx.push(Command { instance, payload, backend, thread_ids, coll_handle, reply_tx }) {
            Ok(()) => Ok(reply_rx),
            Err(rtrb::PushError::Full(cmd)) => Err(cmd.payload),
        }
    }
}

impl CommandConsumer {
    /// Pop the next command, if any, without blocking.
    pub fn try_pop(&mut self) -> Option<Command> {
        self.rx.pop().ok()
    }

    /// Block (parking briefly) until a command is available or `run`
    /// becomes false. Used by the worker thread's main loop.
    pub fn pop_blocking(&mut self, run: &std::sync::atomic::AtomicBool) -> Option<Command> {
        loop {
            if let Some(cmd) = self.try_pop() {
                return Some(cmd);
            }
            if !run.load(Ordering::Relaxed) {
                return None;
            }
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
    }
}

impl Command {
    /// Deliver this command's result, and whatever backend it carried back
    /// in, to the submitting instance. Never blocks: the channel is bounded
    /// to exactly one slot and nothing else writes to it.
    pub fn reply(self, result: WorkerResult, backend: Option<Backend>) {
        let _ = self.reply_tx.send(CommandReply { result, backend });
    }
}
