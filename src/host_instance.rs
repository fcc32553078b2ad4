//! The central per-plugin state machine: owns the parameter table,
//! the plugin backend (when not checked out to the worker thread for a
//! command), the editor window, and the audio-thread `next()` algorithm.
//!
//! Every operation beyond the handful documented as RT-safe passthroughs
//! goes through the command queue: the instance moves its backend into the
//! command (so the worker thread and the audio thread never touch it at
//! once), and gets it back alongside the command's result on a later
//! `next()` tick. While a command is in flight, `next()` treats the
//! instance as though it were bypassed (see `never_loaded`/`next` below).

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::backend::{Backend, BackendFactory, BackendListener, MidiEvent, PluginInfo, SysexEvent};
use crate::command::{ClosePayload, CommandPayload, CommandProducer, CommandReply, PluginInstanceId, WorkerResult};
use crate::config::{GuiThreadMode, HostConfig};
use crate::error::HostError;
use crate::event_inbox::{EventInbox, InboxEvent};
use crate::listener::{DeferredCallback, ListenerAdapter};
use crate::parameter_state::ParameterTable;
use crate::reply::OutgoingReply;
use crate::thread_id::SharedThreadIds;
use crate::window::{WindowBackend, WindowHandle};

/// The host instance's five-state lifecycle. Processing (the full step 4
/// path) only runs in `Ready`; `Bypassed` takes the passthrough path instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Empty,
    Loading,
    Ready,
    Bypassed,
    Closing,
}

/// Bytes accumulated from a `sendProgramData`/`sendBankData` stream until
/// the declared total has arrived.
struct UploadAssembly {
    total: usize,
    bytes: Vec<u8>,
    received: usize,
}

/// Bytes captured from the backend by a `GetProgramData`/`GetBankData`
/// command, doled out to the caller in `receiveProgramData`-sized packets.
struct DownloadAssembly {
    total: usize,
    bytes: Vec<u8>,
    onset: usize,
}

/// One loaded (or loading, or closing) plugin instance.
pub struct PluginHostInstance {
    id: PluginInstanceId,
    config: HostConfig,
    factory: Arc<dyn BackendFactory>,
    window_backend: Option<Arc<dyn WindowBackend>>,
    coll_handle: basedrop::Handle,
    thread_ids: SharedThreadIds,

    state: HostState,
    backend: Option<Backend>,
    info: Option<PluginInfo>,
    parameters: ParameterTable,

    editor_window: Option<WindowHandle>,
    gui_join_handle: Option<std::thread::JoinHandle<()>>,

    inbox: Arc<EventInbox>,
    listener: Arc<ListenerAdapter>,
    deferred_rx: Receiver<DeferredCallback>,

    /// At most one command is ever in flight: issuing a new one requires
    /// the backend in hand, and the backend is checked out for exactly the
    /// duration of the in-flight command.
    pending: Option<Receiver<CommandReply>>,

    program_upload: Option<UploadAssembly>,
    bank_upload: Option<UploadAssembly>,
    program_download: Option<DownloadAssembly>,
    bank_download: Option<DownloadAssembly>,
}

impl PluginHostInstance {
    pub fn new(
        config: HostConfig,
        factory: Arc<dyn BackendFactory>,
        window_backend: Option<Arc<dyn WindowBackend>>,
        coll_handle: basedrop::Handle,
    ) -> Self {
        let thread_ids = SharedThreadIds::new(&coll_handle);
        let inbox = Arc::new(EventInbox::new());
        let (deferred_tx, deferred_rx) = crossbeam_channel::unbounded();
        let listener = Arc::new(ListenerAdapter::new(thread_ids.clone(), Arc::clone(&inbox), deferred_tx));

        Self {
            id: PluginInstanceId::next(),
            config,
            factory,
            window_backend,
            coll_handle,
            thread_ids,
            state: HostState::Empty,
            backend: None,
            info: None,
            parameters: ParameterTable::new(0),
            editor_window: None,
            gui_join_handle: None,
            inbox,
            listener,
            deferred_rx,
            pending: None,
            program_upload: None,
            bank_upload: None,
            program_download: None,
            bank_download: None,
        }
    }

    pub fn id(&self) -> PluginInstanceId {
        self.id
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.parameters
    }

    fn busy_with_command(&self) -> bool {
        self.pending.is_some()
    }

    /// True before a backend has ever been successfully loaded (or after
    /// it has been torn down): `Empty` (never opened, or closed),
    /// `Loading` (open in flight, no backend handed back yet), `Closing`
    /// (backend already checked out to the worker for teardown). `next()`
    /// hard-silences only in this case; once `Ready` has been reached, a
    /// backend checked out for an in-flight command (e.g. `setParam`) takes
    /// the passthrough path instead, the same as an explicit `Bypassed`.
    fn never_loaded(&self) -> bool {
        matches!(self.state, HostState::Empty | HostState::Loading | HostState::Closing)
    }

    // ---- lifecycle -----------------------------------------------------

    /// `open(path, withEditor)`: `Empty -> Loading`. The worker stage loads
    /// the backend via the configured [`BackendFactory`], negotiates a
    /// sample rate/block size, and (in [`GuiThreadMode::Dedicated`]) spawns
    /// the editor's GUI thread before replying.
    pub fn open(&mut self, path: PathBuf, with_editor: bool, queue: &mut CommandProducer) -> Result<(), HostError> {
        if self.state != HostState::Empty {
            return Err(HostError::PreconditionViolation("open called while not Empty"));
        }
        self.state = HostState::Loading;
        let payload = CommandPayload::Open {
            path,
            with_editor,
            factory: Arc::clone(&self.factory),
            window_backend: self.window_backend.clone(),
            config: self.config,
            listener: self.listener(),
        };
        let reply_rx = queue
            .submit(self.id, payload, None, self.thread_ids.clone(), self.coll_handle.clone())
            .map_err(|_| HostError::PreconditionViolation("command ring is full"))?;
        self.pending = Some(reply_rx);
        Ok(())
    }

    /// `close()`: moves the backend, editor window, and GUI thread handle
    /// off the instance and onto the worker thread for teardown, then
    /// resets every field so the instance is immediately reusable for a
    /// fresh `open` once `Closed` comes back.
    pub fn close(&mut self, queue: &mut CommandProducer) -> Result<(), HostError> {
        if matches!(self.state, HostState::Empty | HostState::Closing) {
            return Err(HostError::PreconditionViolation("close called while Empty or already Closing"));
        }
        if self.busy_with_command() {
            return Err(HostError::PreconditionViolation("another command is already in flight"));
        }
        let backend = self.backend.take();
        let payload = CommandPayload::Close(ClosePayload {
            editor_window: self.editor_window.take(),
            gui_join_handle: self.gui_join_handle.take(),
            window_backend: self.window_backend.clone(),
        });
        self.state = HostState::Closing;
        let reply_rx = queue
            .submit(self.id, payload, backend, self.thread_ids.clone(), self.coll_handle.clone())
            .map_err(|_| HostError::PreconditionViolation("command ring is full"))?;
        self.pending = Some(reply_rx);
        Ok(())
    }

    /// `reset(async)`: re-run the backend's suspend/resume handshake
    /// without tearing the instance down. When `async` is true this is
    /// dispatched to the worker thread like every other backend-touching
    /// operation; when false it runs inline, right here on the audio
    /// thread, since the caller is asserting the backend is RT-safe to
    /// suspend/resume directly.
    pub fn reset(&mut self, async_: bool, queue: &mut CommandProducer) -> Result<(), HostError> {
        if async_ {
            self.dispatch(CommandPayload::ResetAsync, queue)
        } else {
            if self.state != HostState::Ready && self.state != HostState::Bypassed {
                return Err(HostError::PreconditionViolation("no plugin loaded or instance is mid-transition"));
            }
            if self.busy_with_command() {
                return Err(HostError::PreconditionViolation("another command is already in flight"));
            }
            let backend = self.backend.as_mut().expect("state check above verified a backend is loaded");
            backend.as_mut().suspend();
            backend.as_mut().resume();
            Ok(())
        }
    }

    /// `showEditor(show)`: create (or destroy) the native editor window.
    /// Bespoke rather than [`Self::dispatch`] since the window, not the
    /// backend, is what needs to be checked out for the round trip.
    pub fn show_editor(&mut self, show: bool, queue: &mut CommandProducer) -> Result<(), HostError> {
        if self.state != HostState::Ready && self.state != HostState::Bypassed {
            return Err(HostError::PreconditionViolation("no plugin loaded or instance is mid-transition"));
        }
        if self.busy_with_command() {
            return Err(HostError::PreconditionViolation("another command is already in flight"));
        }
        let payload = CommandPayload::ShowEditor { show, editor_window: self.editor_window.take() };
        let reply_rx = queue
            .submit(self.id, payload, None, self.thread_ids.clone(), self.coll_handle.clone())
            .map_err(|_| HostError::PreconditionViolation("command ring is full"))?;
        self.pending = Some(reply_rx);
        Ok(())
    }

    /// Generic helper for every remaining worker-dispatched operation:
    /// check the instance is `Ready`, check out the backend, submit.
    fn dispatch(&mut self, payload: CommandPayload, queue: &mut CommandProducer) -> Result<(), HostError> {
        if self.state != HostState::Ready && self.state != HostState::Bypassed {
            return Err(HostError::PreconditionViolation("no plugin loaded or instance is mid-transition"));
        }
        if self.busy_with_command() {
            return Err(HostError::PreconditionViolation("another command is already in flight"));
        }
        let backend = self.backend.take();
        let reply_rx = queue
            .submit(self.id, payload, backend, self.thread_ids.clone(), self.coll_handle.clone())
            .map_err(|_| HostError::PreconditionViolation("command ring is full"))?;
        self.pending = Some(reply_rx);
        Ok(())
    }

    // ---- parameters ------------------------------------------------------

    /// `setParam(i, f)`: range-checked, then dispatched so the worker can
    /// also fetch the backend's display string for the `/param` reply.
    pub fn set_param(&mut self, index: i32, value: f32, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.check_param_index(index)?;
        self.dispatch(CommandPayload::SetParamFloat { index, value }, queue)
    }

    /// `setParam(i, string)`.
    pub fn set_param_string(&mut self, index: i32, text: String, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.check_param_index(index)?;
        self.dispatch(CommandPayload::SetParamString { index, text }, queue)
    }

    /// `setn(index, count, values)`: a contiguous run, one worker round
    /// trip for the whole block.
    pub fn set_param_block(&mut self, index: i32, values: Vec<f32>, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::SetParamBlock { index, values }, queue)
    }

    /// `param_query(onset, count)`: a synchronous audio-thread read of the
    /// current value and display string for each in-range parameter in
    /// `[onset, onset + count)`, replied as one `/param` per parameter.
    /// No worker round trip: `getParameter`/`getParameterDisplay`
    /// are the same RT-safe backend reads `next()` already calls inline
    /// for automation replies.
    pub fn param_query(&self, onset: i32, count: i32) -> Result<Vec<OutgoingReply>, HostError> {
        let backend = self.backend.as_ref().ok_or(HostError::NotLoaded)?.as_ref();
        let mut replies = Vec::new();
        for index in onset..onset.saturating_add(count.max(0)) {
            if index < 0 || index as usize >= self.parameters.len() {
                continue;
            }
            let value = backend.get_parameter(index);
            let display = backend.get_parameter_display(index);
            replies.push(OutgoingReply::Param { index, value, display });
        }
        Ok(replies)
    }

    /// `get(index)`: a single parameter's current value, replied as `/set`.
    pub fn get_param(&self, index: i32) -> Result<OutgoingReply, HostError> {
        self.check_param_index(index)?;
        let backend = self.backend.as_ref().ok_or(HostError::NotLoaded)?.as_ref();
        Ok(OutgoingReply::Set { value: backend.get_parameter(index) })
    }

    /// `getn(index, count)`: `count` consecutive parameter values starting
    /// at `index`, replied as a single `/setn`. Out-of-range indices are
    /// skipped rather than failing the whole read.
    pub fn get_param_n(&self, index: i32, count: i32) -> Result<OutgoingReply, HostError> {
        let backend = self.backend.as_ref().ok_or(HostError::NotLoaded)?.as_ref();
        let mut values = Vec::new();
        for i in index..index.saturating_add(count.max(0)) {
            if i < 0 || i as usize >= self.parameters.len() {
                continue;
            }
            values.push(backend.get_parameter(i));
        }
        Ok(OutgoingReply::SetN { values })
    }

    fn check_param_index(&self, index: i32) -> Result<(), HostError> {
        let count = self.parameters.len();
        if index < 0 || index as usize >= count {
            return Err(HostError::IndexOutOfRange { index, count });
        }
        Ok(())
    }

    /// `mapParam(i, bus)`: a pure audio-thread table write, no worker
    /// round trip.
    pub fn map_param(&mut self, index: i32, bus: i32) -> Result<(), HostError> {
        if self.parameters.map(index as usize, bus) {
            Ok(())
        } else {
            Err(HostError::IndexOutOfRange { index, count: self.parameters.len() })
        }
    }

    /// `unmapParam(i)`.
    pub fn unmap_param(&mut self, index: i32) -> Result<(), HostError> {
        if self.parameters.unmap(index as usize) {
            Ok(())
        } else {
            Err(HostError::IndexOutOfRange { index, count: self.parameters.len() })
        }
    }

    // ---- programs --------------------------------------------------------

    pub fn set_program(&mut self, index: i32, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::SetProgram { index }, queue)
    }

    pub fn query_programs(&mut self, onset: i32, count: i32, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::QueryPrograms { onset, count }, queue)
    }

    pub fn set_program_name(&mut self, name: String, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::SetProgramName { name }, queue)
    }

    pub fn read_program(&mut self, path: PathBuf, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::ReadProgram { path }, queue)
    }

    pub fn write_program(&mut self, path: PathBuf, queue: &mut CommandProducer) -> Result<(), HostError> {
        let info = self.info.clone().ok_or(HostError::NotLoaded)?;
        self.dispatch(CommandPayload::WriteProgram { path, info }, queue)
    }

    pub fn read_bank(&mut self, path: PathBuf, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::ReadBank { path }, queue)
    }

    pub fn write_bank(&mut self, path: PathBuf, queue: &mut CommandProducer) -> Result<(), HostError> {
        let info = self.info.clone().ok_or(HostError::NotLoaded)?;
        self.dispatch(CommandPayload::WriteBank { path, info }, queue)
    }

    // ---- streamed preset/bank transfer ------------------------------------

    /// `sendProgramData(total, onset, bytes)`: accumulate a chunk into the
    /// upload buffer; once `onset + bytes.len() == total`, dispatch
    /// `SetProgramData` with the assembled buffer.
    pub fn send_program_data(&mut self, total: usize, onset: usize, chunk: &[u8], queue: &mut CommandProducer) -> Result<(), HostError> {
        let done = Self::accumulate(&mut self.program_upload, total, onset, chunk)?;
        if done {
            let bytes = self.program_upload.take().expect("checked Some by accumulate").bytes;
            let info = self.info.clone().ok_or(HostError::NotLoaded)?;
            self.dispatch(CommandPayload::SetProgramData { bytes, info }, queue)?;
        }
        Ok(())
    }

    /// `sendBankData(total, onset, bytes)`.
    pub fn send_bank_data(&mut self, total: usize, onset: usize, chunk: &[u8], queue: &mut CommandProducer) -> Result<(), HostError> {
        let done = Self::accumulate(&mut self.bank_upload, total, onset, chunk)?;
        if done {
            let bytes = self.bank_upload.take().expect("checked Some by accumulate").bytes;
            let info = self.info.clone().ok_or(HostError::NotLoaded)?;
            self.dispatch(CommandPayload::SetBankData { bytes, info }, queue)?;
        }
        Ok(())
    }

    fn accumulate(slot: &mut Option<UploadAssembly>, total: usize, onset: usize, chunk: &[u8]) -> Result<bool, HostError> {
        if onset == 0 {
            *slot = Some(UploadAssembly { total, bytes: vec![0u8; total], received: 0 });
        }
        let assembly = slot.as_mut().ok_or(HostError::PreconditionViolation("data stream did not start at onset 0"))?;
        if onset + chunk.len() > assembly.total {
            return Err(HostError::PreconditionViolation("streamed chunk exceeds declared total"));
        }
        assembly.bytes[onset..onset + chunk.len()].copy_from_slice(chunk);
        assembly.received += chunk.len();
        Ok(assembly.received >= assembly.total)
    }

    /// `receiveProgramData(packetBudget)`: on the first call, kick off a
    /// `GetProgramData` worker command to capture the backend's current
    /// encoded preset; once it lands (polled via [`Self::poll`]), every
    /// subsequent call slices off up to `packet_budget` bytes until
    /// exhausted. Returns the next packet to send, if any is ready yet.
    pub fn receive_program_data(&mut self, packet_budget: usize, queue: &mut CommandProducer) -> Result<Option<OutgoingReply>, HostError> {
        let info = self.info.clone().ok_or(HostError::NotLoaded)?;
        self.receive(packet_budget, CommandPayload::GetProgramData { info }, queue, true)
    }

    pub fn receive_bank_data(&mut self, packet_budget: usize, queue: &mut CommandProducer) -> Result<Option<OutgoingReply>, HostError> {
        let info = self.info.clone().ok_or(HostError::NotLoaded)?;
        self.receive(packet_budget, CommandPayload::GetBankData { info }, queue, false)
    }

    fn receive(
        &mut self,
        packet_budget: usize,
        payload: CommandPayload,
        queue: &mut CommandProducer,
        is_program: bool,
    ) -> Result<Option<OutgoingReply>, HostError> {
        let has_download = if is_program { self.program_download.is_some() } else { self.bank_download.is_some() };
        if !has_download {
            self.dispatch(payload, queue)?;
            return Ok(None);
        }

        let download = if is_program { self.program_download.as_mut() } else { self.bank_download.as_mut() }
            .expect("checked Some above");

        let remaining = download.total - download.onset;
        let take = remaining.min(packet_budget);
        let bytes = download.bytes[download.onset..download.onset + take].to_vec();
        let onset = download.onset;
        let total = download.total;
        download.onset += take;
        let exhausted = download.onset >= download.total;
        if exhausted {
            if is_program {
                self.program_download = None;
            } else {
                self.bank_download = None;
            }
        }

        let reply = if is_program { OutgoingReply::ProgramData { total, onset, bytes } } else { OutgoingReply::BankData { total, onset, bytes } };
        Ok(Some(reply))
    }

    // ---- RT-safe passthroughs (no command queue) --------------------------

    pub fn send_midi(&mut self, event: MidiEvent) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().send_midi(event);
        Ok(())
    }

    pub fn send_sysex(&mut self, event: SysexEvent) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().send_sysex(event);
        Ok(())
    }

    pub fn set_tempo_bpm(&mut self, bpm: f64) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().set_tempo_bpm(bpm);
        Ok(())
    }

    pub fn set_time_signature(&mut self, numerator: i32, denominator: i32) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().set_time_signature(numerator, denominator);
        Ok(())
    }

    pub fn set_transport_playing(&mut self, playing: bool) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().set_transport_playing(playing);
        Ok(())
    }

    pub fn set_transport_position(&mut self, beats: f64) -> Result<(), HostError> {
        self.backend.as_mut().ok_or(HostError::NotLoaded)?.as_mut().set_transport_position(beats);
        Ok(())
    }

    /// `transport_get`: replied as `/transport {pos}`, consistent
    /// with the other audio-thread-only reads above.
    pub fn get_transport_position(&self) -> Result<OutgoingReply, HostError> {
        let pos = self.backend.as_ref().ok_or(HostError::NotLoaded)?.as_ref().get_transport_position();
        Ok(OutgoingReply::Transport { pos })
    }

    // ---- worker-dispatched vendor surface ----------------------------------

    pub fn can_do(&mut self, key: String, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::CanDo { key }, queue)
    }

    pub fn vendor_specific(&mut self, index: i32, value: isize, opt: f32, queue: &mut CommandProducer) -> Result<(), HostError> {
        self.dispatch(CommandPayload::VendorSpecific { index, value, opt }, queue)
    }

    // ---- audio thread ------------------------------------------------------

    /// The audio-thread algorithm, run once per audio callback.
    /// `replies_out` collects everything this tick produced, in order:
    /// first the command reply (if one just landed), then deferred
    /// worker-thread callbacks, then drained GUI-inbox events.
    pub fn next(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        num_frames: usize,
        bypass: bool,
        control_buses: &[f32],
        ugen_params: &[(i32, f32)],
        replies_out: &mut Vec<OutgoingReply>,
    ) {
        // The audio thread's id is recorded once, on the first tick,
        // so the listener adapter can tell audio-thread callbacks apart
        // from worker/GUI ones. A no-op read on every later tick.
        self.thread_ids.ensure_audio_thread_id(&self.coll_handle);

        self.poll_command_reply(replies_out);
        self.poll_deferred(replies_out);

        // Step 1: no buffer ever allocated (nothing loaded yet, or torn
        // down). A backend checked out for an in-flight command on an
        // otherwise-`Ready` instance does *not* land here — see
        // `never_loaded`'s doc comment.
        if self.never_loaded() {
            Self::silence(outputs, num_frames);
            return;
        }

        // Step 2: bypass control. Transitions never auto-reset the plugin.
        self.apply_bypass_transition(bypass);

        if self.state == HostState::Ready && self.backend.is_some() {
            // Step 4a: bus-mapped parameters. Collected up front since the
            // borrow backing the iterator can't coexist with the `get_mut`
            // writes below.
            let mapped: smallvec::SmallVec<[(usize, i32); 16]> = self.parameters.bus_mapped().collect();
            for (index, bus) in mapped {
                let Some(&value) = control_buses.get(bus as usize) else { continue };
                if let Some(slot) = self.parameters.get_mut(index) {
                    if slot.changed(value) {
                        slot.record_bus_mirror(value);
                        self.backend.as_mut().expect("state == Ready and backend.is_some() checked above").as_mut().set_parameter(index as i32, value);
                    }
                }
            }

            // Step 4b: explicit (UGen-style) per-block parameter writes.
            for &(index, value) in ugen_params {
                if index < 0 || index as usize >= self.parameters.len() {
                    continue;
                }
                if let Some(slot) = self.parameters.get_mut(index as usize) {
                    if slot.is_bus_mapped() {
                        continue;
                    }
                    if slot.changed(value) {
                        slot.record_explicit_set(value);
                        self.backend.as_mut().expect("state == Ready and backend.is_some() checked above").as_mut().set_parameter(index, value);
                    }
                }
            }

            // Step 4c.
            self.backend.as_mut().expect("state == Ready and backend.is_some() checked above").as_mut().process_f32(inputs, outputs, num_frames);

            // Step 4c(i): automation/MIDI/sysex the backend fired
            // synchronously, on the audio thread, from inside that very
            // `process_f32` call, get delivered inline here rather than
            // routed through the worker thread.
            self.drain_inline_listener_events(replies_out);

            // Step 4d: non-blocking event inbox swap.
            if self.editor_window.is_some() {
                if let Some(events) = self.inbox.try_drain() {
                    for event in events {
                        self.push_inbox_event_replies(event, replies_out);
                    }
                }
            }
        } else {
            // Step 5: passthrough. Covers both explicit `Bypassed` and a
            // `Ready` instance whose backend is momentarily checked out to
            // the worker thread for an in-flight command (e.g. `setParam`,
            // `setProgram`): audio keeps flowing through while the worker
            // round trip is in progress rather than going silent.
            let channels = inputs.len().min(outputs.len());
            for ch in 0..channels {
                outputs[ch][..num_frames].copy_from_slice(&inputs[ch][..num_frames]);
            }
            // Step 6: zero anything beyond what was copied.
            for out in outputs.iter_mut().skip(channels) {
                out[..num_frames].fill(0.0);
            }
        }
    }

    fn silence(outputs: &mut [&mut [f32]], num_frames: usize) {
        for out in outputs.iter_mut() {
            out[..num_frames].fill(0.0);
        }
    }

    fn apply_bypass_transition(&mut self, bypass: bool) {
        match (self.state, bypass) {
            (HostState::Ready, true) => self.state = HostState::Bypassed,
            (HostState::Bypassed, false) => self.state = HostState::Ready,
            _ => {}
        }
    }

    /// The `/param` display string for an automation event: best-effort,
    /// since the backend may be checked out to the worker thread at the
    /// moment a deferred callback lands.
    fn automation_display(&self, index: i32) -> String {
        self.backend.as_ref().map(|b| b.as_ref().get_parameter_display(index)).unwrap_or_default()
    }

    /// An inbox event turns into replies: parameter automation produces
    /// `/param` + `/auto`; MIDI produces `/midi`; sysex produces `/sysex`.
    fn push_inbox_event_replies(&mut self, event: InboxEvent, replies_out: &mut Vec<OutgoingReply>) {
        match event {
            InboxEvent::ParamAutomated { index, value } => {
                if let Some(slot) = self.parameters.get_mut(index as usize) {
                    slot.record_bus_mirror(value);
                }
                let display = self.automation_display(index);
                replies_out.push(OutgoingReply::Param { index, value, display });
                replies_out.push(OutgoingReply::Auto { index, value });
            }
            InboxEvent::Midi(event) => replies_out.push(OutgoingReply::Midi(event)),
            InboxEvent::Sysex(event) => replies_out.push(OutgoingReply::Sysex(event)),
        }
    }

    /// Drain any deferred callbacks the worker thread posted since the
    /// last tick and turn each into its automation reply.
    fn poll_deferred(&mut self, replies_out: &mut Vec<OutgoingReply>) {
        while let Ok(callback) = self.deferred_rx.try_recv() {
            match callback {
                DeferredCallback::ParamAutomated { index, value } => {
                    if let Some(slot) = self.parameters.get_mut(index as usize) {
                        slot.record_bus_mirror(value);
                    }
                    let display = self.automation_display(index);
                    replies_out.push(OutgoingReply::Param { index, value, display });
                    replies_out.push(OutgoingReply::Auto { index, value });
                }
            }
        }
    }

    /// Drain automation/MIDI/sysex the listener buffered from an
    /// audio-thread-originated backend callback this tick.
    fn drain_inline_listener_events(&mut self, replies_out: &mut Vec<OutgoingReply>) {
        for (index, value) in self.listener.take_inline_automation() {
            if let Some(slot) = self.parameters.get_mut(index as usize) {
                slot.record_bus_mirror(value);
            }
            let display = self.automation_display(index);
            replies_out.push(OutgoingReply::Param { index, value, display });
            replies_out.push(OutgoingReply::Auto { index, value });
        }
        for event in self.listener.take_inline_midi() {
            replies_out.push(OutgoingReply::Midi(event));
        }
        for event in self.listener.take_inline_sysex() {
            replies_out.push(OutgoingReply::Sysex(event));
        }
    }

    /// Non-blocking check for the single in-flight command's reply. If it
    /// has landed, restores the backend (ending the checkout), applies
    /// whatever state update the result implies, and emits the
    /// corresponding reply.
    fn poll_command_reply(&mut self, replies_out: &mut Vec<OutgoingReply>) {
        let Some(rx) = &self.pending else { return };
        let Ok(reply) = rx.try_recv() else { return };
        self.pending = None;
        self.backend = reply.backend;
        self.apply_worker_result(reply.result, replies_out);
    }

    fn apply_worker_result(&mut self, result: WorkerResult, replies_out: &mut Vec<OutgoingReply>) {
        match result {
            WorkerResult::Opened { editor_window, gui_join_handle, ok, has_editor, info } => {
                if ok {
                    if let Some(info) = info {
                        self.parameters = ParameterTable::new(info.num_parameters);
                        self.info = Some(*info);
                    }
                    self.editor_window = editor_window;
                    self.gui_join_handle = gui_join_handle;
                    self.state = HostState::Ready;
                } else {
                    self.state = HostState::Empty;
                }
                replies_out.push(OutgoingReply::Open { ok, has_editor });
            }
            WorkerResult::Closed => {
                self.info = None;
                self.parameters = ParameterTable::new(0);
                self.state = HostState::Empty;
            }
            WorkerResult::ResetDone => {}
            WorkerResult::EditorShown { editor_window } => {
                self.editor_window = editor_window;
            }
            WorkerResult::ParamSet { index, value, display } => {
                if let Some(slot) = self.parameters.get_mut(index as usize) {
                    slot.record_explicit_set(value);
                }
                replies_out.push(OutgoingReply::Param { index, value, display });
            }
            WorkerResult::ParamBlockSet { entries } => {
                for (index, value, display) in entries {
                    if let Some(slot) = self.parameters.get_mut(index as usize) {
                        slot.record_explicit_set(value);
                    }
                    replies_out.push(OutgoingReply::Param { index, value, display });
                }
            }
            WorkerResult::ProgramSet { ok: _, index, name } => {
                replies_out.push(OutgoingReply::ProgramIndex { index });
                replies_out.push(OutgoingReply::ProgramName { index, name });
            }
            WorkerResult::ProgramsQueried { names } => {
                for (index, name) in names {
                    replies_out.push(OutgoingReply::ProgramName { index, name });
                }
            }
            WorkerResult::ProgramNamed => {}
            WorkerResult::ProgramRead { ok, .. } => replies_out.push(OutgoingReply::ProgramRead { ok }),
            WorkerResult::ProgramWritten { ok } => replies_out.push(OutgoingReply::ProgramWrite { ok }),
            WorkerResult::BankRead { ok, program_index } => {
                replies_out.push(OutgoingReply::BankRead { ok });
                if ok {
                    replies_out.push(OutgoingReply::ProgramIndex { index: program_index });
                }
            }
            WorkerResult::BankWritten { ok } => replies_out.push(OutgoingReply::BankWrite { ok }),
            WorkerResult::ProgramDataSet => {}
            WorkerResult::BankDataSet => {}
            WorkerResult::ProgramDataGot { total, bytes } => {
                self.program_download = Some(DownloadAssembly { total, bytes, onset: 0 });
            }
            WorkerResult::BankDataGot { total, bytes } => {
                self.bank_download = Some(DownloadAssembly { total, bytes, onset: 0 });
            }
            WorkerResult::CanDoResult { result } => replies_out.push(OutgoingReply::CanDo { result }),
            WorkerResult::VendorResult { result } => replies_out.push(OutgoingReply::VendorMethod { result }),
        }
    }

    /// Pump the GUI event loop once. Only meaningful in
    /// [`GuiThreadMode::PumpedByHost`]; a no-op otherwise since the
    /// dedicated GUI thread drives its own loop.
    pub fn poll_gui(&self) {
        if self.config.gui_thread_mode == GuiThreadMode::PumpedByHost {
            if let Some(backend) = &self.window_backend {
                backend.poll();
            }
        }
    }

    pub fn listener(&self) -> Arc<dyn BackendListener> {
        Arc::clone(&self.listener) as Arc<dyn BackendListener>
    }

    pub fn thread_ids(&self) -> &SharedThreadIds {
        &self.thread_ids
    }

    pub fn collector_handle(&self) -> &basedrop::Handle {
        &self.coll_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackendFactory;
    use crate::command::command_queue;

    fn new_instance(num_params: usize) -> PluginHostInstance {
        let collector = basedrop::Collector::new();
        let factory = Arc::new(MockBackendFactory { num_params, num_programs: 2, fail: false });
        PluginHostInstance::new(HostConfig::default(), factory, None, collector.handle())
    }

    #[test]
    fn next_outputs_silence_before_open() {
        let mut instance = new_instance(2);
        let input = [0.5f32; 4];
        let mut out_l = [1.0f32; 4];
        let mut out_r = [1.0f32; 4];
        let inputs: [&[f32]; 1] = [&input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out_l, &mut out_r];
        instance.next(&inputs, &mut outputs, 4, false, &[], &[], &mut Vec::new());
        assert_eq!(out_l, [0.0; 4]);
        assert_eq!(out_r, [0.0; 4]);
    }

    #[test]
    fn open_transitions_to_loading() {
        let mut instance = new_instance(3);
        let (mut producer, _consumer) = command_queue(16);

        instance.open(PathBuf::from("/dev/null"), false, &mut producer).unwrap();
        assert_eq!(instance.state(), HostState::Loading);
    }

    #[test]
    fn set_param_rejects_out_of_range_index() {
        let mut instance = new_instance(2);
        let (mut producer, _consumer) = command_queue(4);
        instance.state = HostState::Ready;
        let err = instance.set_param(5, 0.5, &mut producer).unwrap_err();
        assert!(matches!(err, HostError::IndexOutOfRange { index: 5, count: 2 }));
    }

    #[test]
    fn bypass_passthrough_copies_input_to_output() {
        let mut instance = new_instance(1);
        instance.state = HostState::Bypassed;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(1))));

        let input = [0.25f32; 4];
        let mut out = [0.0f32; 4];
        let inputs: [&[f32]; 1] = [&input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        instance.next(&inputs, &mut outputs, 4, false, &[], &[], &mut Vec::new());
        assert_eq!(out, [0.25; 4]);
    }

    /// A `Ready` instance with its backend checked out for an in-flight
    /// worker command (the state `dispatch()` leaves behind for the
    /// duration of e.g. `setParam`) must pass audio through rather than
    /// silence it — only `Empty`/`Loading`/`Closing` hard-silence.
    #[test]
    fn ready_instance_with_command_in_flight_passes_audio_through() {
        let mut instance = new_instance(1);
        let (mut producer, _consumer) = command_queue(4);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(1))));

        instance.set_param(0, 0.5, &mut producer).unwrap();
        assert!(instance.backend.is_none(), "dispatch() should have checked the backend out");
        assert!(instance.busy_with_command());

        let input = [0.25f32; 4];
        let mut out = [0.0f32; 4];
        let inputs: [&[f32]; 1] = [&input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        instance.next(&inputs, &mut outputs, 4, false, &[], &[], &mut Vec::new());

        assert_eq!(out, [0.25; 4], "audio should pass through while the backend is checked out, not be silenced");
    }

    #[test]
    fn get_transport_position_replies_with_current_pos() {
        let mut instance = new_instance(1);
        instance.state = HostState::Ready;
        let mut backend = crate::backend::mock::MockBackend::new(1);
        backend.set_transport_position(3.5);
        instance.backend = Some(Backend::V2(Box::new(backend)));

        match instance.get_transport_position().unwrap() {
            OutgoingReply::Transport { pos } => assert_eq!(pos, 3.5),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn reset_async_dispatches_a_worker_command() {
        let mut instance = new_instance(1);
        let (mut producer, mut consumer) = command_queue(4);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(1))));

        instance.reset(true, &mut producer).unwrap();
        assert!(matches!(consumer.try_pop().unwrap().payload, CommandPayload::ResetAsync));
        assert!(instance.busy_with_command());
    }

    #[test]
    fn reset_inline_runs_without_touching_the_queue() {
        let mut instance = new_instance(1);
        let (mut producer, mut consumer) = command_queue(4);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(1))));

        instance.reset(false, &mut producer).unwrap();
        assert!(consumer.try_pop().is_none());
        assert!(!instance.busy_with_command());
    }

    #[test]
    fn get_param_reads_a_loaded_backend_value() {
        let mut instance = new_instance(2);
        instance.state = HostState::Ready;
        let mut backend = crate::backend::mock::MockBackend::new(2);
        backend.set_parameter(1, 0.6);
        instance.backend = Some(Backend::V2(Box::new(backend)));

        match instance.get_param(1).unwrap() {
            OutgoingReply::Set { value } => assert_eq!(value, 0.6),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn get_param_rejects_out_of_range_index() {
        let mut instance = new_instance(2);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(2))));
        assert!(matches!(instance.get_param(5), Err(HostError::IndexOutOfRange { index: 5, count: 2 })));
    }

    #[test]
    fn get_param_n_skips_out_of_range_tail() {
        let mut instance = new_instance(2);
        instance.state = HostState::Ready;
        let mut backend = crate::backend::mock::MockBackend::new(2);
        backend.set_parameter(0, 0.1);
        backend.set_parameter(1, 0.2);
        instance.backend = Some(Backend::V2(Box::new(backend)));

        match instance.get_param_n(0, 5).unwrap() {
            OutgoingReply::SetN { values } => assert_eq!(values, vec![0.1, 0.2]),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn param_query_emits_one_param_reply_per_index() {
        let mut instance = new_instance(3);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(3))));

        let replies = instance.param_query(1, 2).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], OutgoingReply::Param { index: 1, .. }));
        assert!(matches!(replies[1], OutgoingReply::Param { index: 2, .. }));
    }

    #[test]
    fn set_param_block_dispatches_a_single_command() {
        let mut instance = new_instance(4);
        let (mut producer, mut consumer) = command_queue(4);
        instance.state = HostState::Ready;
        instance.backend = Some(Backend::V2(Box::new(crate::backend::mock::MockBackend::new(4))));

        instance.set_param_block(1, vec![0.1, 0.2, 0.3], &mut producer).unwrap();
        let cmd = consumer.try_pop().unwrap();
        assert!(matches!(cmd.payload, CommandPayload::SetParamBlock { index: 1, .. }));
    }

    #[test]
    fn map_then_unmap_round_trips() {
        let mut instance = new_instance(2);
        instance.map_param(0, 3).unwrap();
        assert!(instance.parameters().get(0).unwrap().is_bus_mapped());
        instance.unmap_param(0).unwrap();
        assert!(!instance.parameters().get(0).unwrap().is_bus_mapped());
    }

    /// A backend that calls back into its own listener from inside
    /// `process_f32`, simulating a plugin that automates one of its own
    /// parameters on the audio thread — the audio-thread variant of the
    /// GUI-thread case above.
    struct SelfAutomatingBackend {
        inner: crate::backend::mock::MockBackend,
        listener: Option<Arc<dyn BackendListener>>,
    }

    impl crate::backend::PluginBackend for SelfAutomatingBackend {
        fn set_sample_rate(&mut self, rate: f64) {
            self.inner.set_sample_rate(rate)
        }
        fn set_block_size(&mut self, frames: usize) {
            self.inner.set_block_size(frames)
        }
        fn set_precision_double(&mut self, double: bool) -> bool {
            self.inner.set_precision_double(double)
        }
        fn suspend(&mut self) {
            self.inner.suspend()
        }
        fn resume(&mut self) {
            self.inner.resume()
        }
        fn process_f32(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
            self.inner.process_f32(inputs, outputs, frames);
            if let Some(listener) = &self.listener {
                listener.parameter_automated(0, 0.42);
            }
        }
        fn process_f64(&mut self, inputs: &[&[f64]], outputs: &mut [&mut [f64]], frames: usize) {
            self.inner.process_f64(inputs, outputs, frames)
        }
        fn set_parameter(&mut self, index: i32, value: f32) {
            self.inner.set_parameter(index, value)
        }
        fn set_parameter_string(&mut self, index: i32, text: &str) -> bool {
            self.inner.set_parameter_string(index, text)
        }
        fn get_parameter(&self, index: i32) -> f32 {
            self.inner.get_parameter(index)
        }
        fn get_parameter_display(&self, index: i32) -> String {
            self.inner.get_parameter_display(index)
        }
        fn set_program(&mut self, index: i32) {
            self.inner.set_program(index)
        }
        fn get_program(&self) -> i32 {
            self.inner.get_program()
        }
        fn get_program_name(&self) -> String {
            self.inner.get_program_name()
        }
        fn get_program_name_indexed(&self, index: i32) -> String {
            self.inner.get_program_name_indexed(index)
        }
        fn set_program_name(&mut self, name: &str) {
            self.inner.set_program_name(name)
        }
        fn has_chunk_data(&self) -> bool {
            self.inner.has_chunk_data()
        }
        fn get_chunk(&mut self, is_bank: bool) -> Vec<u8> {
            self.inner.get_chunk(is_bank)
        }
        fn set_chunk(&mut self, data: &[u8], is_bank: bool) -> bool {
            self.inner.set_chunk(data, is_bank)
        }
        fn send_midi(&mut self, event: MidiEvent) {
            self.inner.send_midi(event)
        }
        fn send_sysex(&mut self, event: SysexEvent) {
            self.inner.send_sysex(event)
        }
        fn set_tempo_bpm(&mut self, bpm: f64) {
            self.inner.set_tempo_bpm(bpm)
        }
        fn set_time_signature(&mut self, numerator: i32, denominator: i32) {
            self.inner.set_time_signature(numerator, denominator)
        }
        fn set_transport_playing(&mut self, playing: bool) {
            self.inner.set_transport_playing(playing)
        }
        fn set_transport_position(&mut self, beats: f64) {
            self.inner.set_transport_position(beats)
        }
        fn get_transport_position(&self) -> f64 {
            self.inner.get_transport_position()
        }
        fn can_do(&self, key: &str) -> i32 {
            self.inner.can_do(key)
        }
        fn vendor_specific(&mut self, index: i32, value: isize, ptr: *mut std::ffi::c_void, opt: f32) -> isize {
            self.inner.vendor_specific(index, value, ptr, opt)
        }
        fn editor_open(&mut self, parent: Option<raw_window_handle::RawWindowHandle>) -> bool {
            self.inner.editor_open(parent)
        }
        fn editor_close(&mut self) {
            self.inner.editor_close()
        }
        fn editor_rect(&self) -> Option<crate::backend::EditorRect> {
            self.inner.editor_rect()
        }
        fn set_listener(&mut self, listener: Arc<dyn BackendListener>) {
            self.listener = Some(listener);
        }
    }

    #[test]
    fn audio_thread_automation_delivers_param_and_auto_inline() {
        let mut instance = new_instance(1);
        let mut backend = SelfAutomatingBackend { inner: crate::backend::mock::MockBackend::new(1), listener: None };
        backend.set_listener(instance.listener());
        instance.backend = Some(Backend::V2(Box::new(backend)));
        instance.state = HostState::Ready;

        let input = [0.0f32; 4];
        let mut out = [0.0f32; 4];
        let inputs: [&[f32]; 1] = [&input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out];
        let mut replies = Vec::new();

        instance.next(&inputs, &mut outputs, 4, false, &[], &[], &mut replies);

        let has_param = replies.iter().any(|r| matches!(r, OutgoingReply::Param { index: 0, value, .. } if *value == 0.42));
        let has_auto = replies.iter().any(|r| matches!(r, OutgoingReply::Auto { index: 0, value } if *value == 0.42));
        assert!(has_param, "expected a /param reply, got {replies:?}");
        assert!(has_auto, "expected an /auto reply, got {replies:?}");
    }
}
