//! The non-realtime worker thread: drains the shared
//! command ring and actually runs every side-effectful or blocking
//! operation the audio thread dispatched — loading a backend, preset
//! file I/O, program changes, the vendor surface — then hands the result
//! (and the backend, checked back in) to the submitting instance over its
//! reply channel for the audio thread to apply on a later `next()` tick.
//!
//! One worker thread serves an entire engine, not one per instance: it
//! pulls commands for whichever instance submitted next and runs them to
//! completion before moving to the next command.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::backend::{Backend, BackendKind, PluginBackend, PluginInfo, PluginUid};
use crate::command::{Command, CommandConsumer, CommandPayload, CommandReply, WorkerResult};
use crate::config::GuiThreadMode;
use crate::error::IoError;
use crate::preset::{self, v2, v3};

/// `std::fs::read`, wrapped so a failure becomes the documented
/// `BackendIOFailure` shape (`IoError`) rather than a bare `std::io::Error`;
/// callers log its `Display` and fold it down to the `ok: false` reply
/// status the control surface's file-I/O commands use.
fn read_file(path: &Path) -> Result<Vec<u8>, IoError> {
    std::fs::read(path).map_err(|source| IoError { path: path.to_path_buf(), source })
}

/// `std::fs::write`, wrapped the same way as [`read_file`].
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    std::fs::write(path, bytes).map_err(|source| IoError { path: path.to_path_buf(), source })
}

/// Run the worker loop on a dedicated thread until `run` is cleared.
/// Mirrors [`crate::garbage_collector::run_garbage_collector_thread`]'s
/// shape (a named background thread polling a stop flag) but blocks on
/// the command ring instead of sleeping on a fixed interval, since
/// commands are not purely diagnostic work.
pub fn run_worker_thread(mut consumer: CommandConsumer, run: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("vstbridge-worker".into())
        .spawn(move || {
            while let Some(cmd) = consumer.pop_blocking(&run) {
                run_command(cmd);
            }
        })
        .expect("failed to spawn vstbridge worker thread")
}

fn numeric_version(info: &PluginInfo) -> i32 {
    info.version.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn plugin_id_v2(info: &PluginInfo) -> u32 {
    match info.unique_id {
        PluginUid::V2(id) => id,
        PluginUid::V3(_) => 0,
    }
}

fn class_id_v3(info: &PluginInfo) -> [u8; 32] {
    let mut class_id = [0u8; 32];
    if let PluginUid::V3(uid) = info.unique_id {
        class_id[..16].copy_from_slice(&uid.to_be_bytes());
    }
    class_id
}

fn run_command(cmd: Command) {
    let Command { instance: _, payload, backend, thread_ids, coll_handle, reply_tx } = cmd;
    thread_ids.set_worker_thread_id(std::thread::current().id(), &coll_handle);

    let (result, backend) = match payload {
        CommandPayload::Open { path, with_editor, factory, window_backend, config, listener } => {
            run_open(path, with_editor, factory.as_ref(), window_backend, config.gui_thread_mode, config.sample_rate, config.max_block_size, listener)
        }
        CommandPayload::Close(close) => run_close(backend, close),
        CommandPayload::ResetAsync => run_reset(backend),
        CommandPayload::ShowEditor { show, editor_window } => run_show_editor(show, editor_window, backend),
        CommandPayload::SetParamFloat { index, value } => run_set_param_float(backend, index, value),
        CommandPayload::SetParamString { index, text } => run_set_param_string(backend, index, &text),
        CommandPayload::SetParamBlock { index, values } => run_set_param_block(backend, index, &values),
        CommandPayload::SetProgram { index } => run_set_program(backend, index),
        CommandPayload::QueryPrograms { onset, count } => run_query_programs(backend, onset, count),
        CommandPayload::SetProgramName { name } => run_set_program_name(backend, &name),
        CommandPayload::ReadProgram { path } => run_read_program(backend, &path),
        CommandPayload::WriteProgram { path, info } => run_write_program(backend, &path, &info),
        CommandPayload::ReadBank { path } => run_read_bank(backend, &path),
        CommandPayload::WriteBank { path, info } => run_write_bank(backend, &path, &info),
        CommandPayload::SetProgramData { bytes, info } => run_set_program_data(backend, &bytes, &info),
        CommandPayload::SetBankData { bytes, info } => run_set_bank_data(backend, &bytes, &info),
        CommandPayload::GetProgramData { info } => run_get_program_data(backend, &info),
        CommandPayload::GetBankData { info } => run_get_bank_data(backend, &info),
        CommandPayload::CanDo { key } => run_can_do(backend, &key),
        CommandPayload::VendorSpecific { index, value, opt } => run_vendor_specific(backend, index, value, opt),
    };

    let _ = reply_tx.send(CommandReply { result, backend });
}

/// `open`: load the backend via the configured factory, negotiate
/// sample rate/block size/precision, and — if an editor was requested and
/// the plugin declares one — create its window (the worker blocks on the
/// GUI thread's future in `Dedicated` mode).
#[allow(clippy::too_many_arguments)]
fn run_open(
    path: std::path::PathBuf,
    with_editor: bool,
    factory: &dyn crate::backend::BackendFactory,
    window_backend: Option<Arc<dyn crate::window::WindowBackend>>,
    gui_thread_mode: GuiThreadMode,
    sample_rate: f64,
    max_block_size: usize,
    listener: Arc<dyn crate::backend::BackendListener>,
) -> (WorkerResult, Option<Backend>) {
    let (mut backend, info) = match factory.create(&path, with_editor) {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("failed to open plugin at {}: {}", path.display(), e);
            return (
                WorkerResult::Opened { editor_window: None, gui_join_handle: None, ok: false, has_editor: false, info: None },
                None,
            );
        }
    };

    backend.as_mut().set_sample_rate(sample_rate);
    backend.as_mut().set_block_size(max_block_size);
    backend.as_mut().set_precision_double(false);
    backend.as_mut().set_listener(listener);

    let want_editor = with_editor && info.capabilities.contains(crate::backend::CapabilityFlags::HAS_EDITOR);
    let (editor_window, gui_join_handle, has_editor) = if want_editor {
        match window_backend {
            Some(window_backend) => open_editor(backend.as_mut(), window_backend, gui_thread_mode),
            None => (None, None, false),
        }
    } else {
        (None, None, false)
    };

    (
        WorkerResult::Opened { editor_window, gui_join_handle, ok: true, has_editor, info: Some(Box::new(info)) },
        Some(backend),
    )
}

/// Create the editor's window and attach the backend's native editor to
/// it. In [`GuiThreadMode::Dedicated`], window creation happens on a
/// freshly spawned GUI thread and the result crosses back over a
/// one-shot channel, after which that thread blocks pumping the shared
/// event loop until `Close` asks it to quit. In
/// [`GuiThreadMode::PumpedByHost`] the window is created inline and the
/// embedding engine is expected to call
/// [`crate::host_instance::PluginHostInstance::poll_gui`] periodically.
fn open_editor(
    backend: &mut dyn PluginBackend,
    window_backend: Arc<dyn crate::window::WindowBackend>,
    gui_thread_mode: GuiThreadMode,
) -> (Option<crate::window::WindowHandle>, Option<std::thread::JoinHandle<()>>, bool) {
    match gui_thread_mode {
        GuiThreadMode::Dedicated => {
            let (window_tx, window_rx) = crossbeam_channel::bounded(1);
            let spawned_backend = Arc::clone(&window_backend);
            let join_handle = std::thread::Builder::new()
                .name("vstbridge-gui".into())
                .spawn(move || {
                    let window = spawned_backend.create();
                    let _ = window_tx.send(window);
                    spawned_backend.run();
                })
                .expect("failed to spawn plugin editor GUI thread");

            // Blocks indefinitely: open has no timeout of its own.
            let Ok(window) = window_rx.recv() else {
                return (None, Some(join_handle), false);
            };
            let raw_handle = window.raw_window_handle();
            let has_editor = backend.editor_open(Some(raw_handle));
            let mut handle = crate::window::WindowHandle::new(window);
            handle.as_mut().show();
            (Some(handle), Some(join_handle), has_editor)
        }
        GuiThreadMode::PumpedByHost => {
            let mut window = window_backend.create();
            let raw_handle = window.raw_window_handle();
            let has_editor = backend.editor_open(Some(raw_handle));
            window.show();
            (Some(crate::window::WindowHandle::new(window)), None, has_editor)
        }
    }
}

/// `close`: suspend the backend, tear down the editor (asking a
/// dedicated GUI thread's event loop to return and joining it), then drop
/// the backend entirely — the instance observes `Closed` and is
/// immediately reusable for a fresh `open`.
fn run_close(backend: Option<Backend>, close: crate::command::ClosePayload) -> (WorkerResult, Option<Backend>) {
    let crate::command::ClosePayload { editor_window, gui_join_handle, window_backend } = close;

    if let Some(mut backend) = backend {
        backend.as_mut().suspend();
        if editor_window.is_some() {
            backend.as_mut().editor_close();
        }
    }

    if let Some(window_backend) = window_backend {
        window_backend.quit();
    }
    if let Some(join_handle) = gui_join_handle {
        let _ = join_handle.join();
    }
    drop(editor_window);

    (WorkerResult::Closed, None)
}

fn run_reset(backend: Option<Backend>) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("reset requires a checked-out backend");
    backend.as_mut().suspend();
    backend.as_mut().resume();
    (WorkerResult::ResetDone, Some(backend))
}

fn run_show_editor(
    show: bool,
    mut editor_window: Option<crate::window::WindowHandle>,
    backend: Option<Backend>,
) -> (WorkerResult, Option<Backend>) {
    if let Some(window) = editor_window.as_mut() {
        if show {
            window.as_mut().show();
            window.as_mut().bring_to_top();
        } else {
            window.as_mut().hide();
        }
    }
    (WorkerResult::EditorShown { editor_window }, backend)
}

fn run_set_param_float(backend: Option<Backend>, index: i32, value: f32) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setParam requires a checked-out backend");
    backend.as_mut().set_parameter(index, value);
    let display = backend.as_ref().get_parameter_display(index);
    (WorkerResult::ParamSet { index, value, display }, Some(backend))
}

fn run_set_param_string(backend: Option<Backend>, index: i32, text: &str) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setParam requires a checked-out backend");
    if !backend.as_mut().set_parameter_string(index, text) {
        log::warn!("plugin rejected string value {:?} for parameter {}", text, index);
    }
    let value = backend.as_ref().get_parameter(index);
    let display = backend.as_ref().get_parameter_display(index);
    (WorkerResult::ParamSet { index, value, display }, Some(backend))
}

/// `setn`: a contiguous run of parameters set in one worker round trip.
/// Indices that land outside the plugin's declared parameter count
/// are skipped rather than failing the whole block.
fn run_set_param_block(backend: Option<Backend>, index: i32, values: &[f32]) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setn requires a checked-out backend");
    let mut entries = Vec::with_capacity(values.len());
    for (offset, &value) in values.iter().enumerate() {
        let Some(i) = index.checked_add(offset as i32) else { continue };
        backend.as_mut().set_parameter(i, value);
        let display = backend.as_ref().get_parameter_display(i);
        entries.push((i, value, display));
    }
    (WorkerResult::ParamBlockSet { entries }, Some(backend))
}

fn run_set_program(backend: Option<Backend>, index: i32) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setProgram requires a checked-out backend");
    backend.as_mut().set_program(index);
    let name = backend.as_ref().get_program_name();
    (WorkerResult::ProgramSet { ok: true, index, name }, Some(backend))
}

fn run_query_programs(backend: Option<Backend>, onset: i32, count: i32) -> (WorkerResult, Option<Backend>) {
    let backend = backend.expect("queryPrograms requires a checked-out backend");
    let names = (onset..onset + count).map(|i| (i, backend.as_ref().get_program_name_indexed(i))).collect();
    (WorkerResult::ProgramsQueried { names }, Some(backend))
}

fn run_set_program_name(backend: Option<Backend>, name: &str) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setProgramName requires a checked-out backend");
    backend.as_mut().set_program_name(name);
    (WorkerResult::ProgramNamed, Some(backend))
}

fn run_read_program(backend: Option<Backend>, path: &Path) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("readProgram requires a checked-out backend");
    let result = match read_file(path) {
        Ok(bytes) => {
            let expects_chunk = backend.as_ref().has_chunk_data();
            match v2::decode_program(&bytes, expects_chunk) {
                Ok(preset) => {
                    preset::apply_program_v2(backend.as_mut(), &preset);
                    WorkerResult::ProgramRead { ok: true, name: Some(preset.name) }
                }
                Err(e) => {
                    log::warn!("rejected program file {}: {}", path.display(), e);
                    WorkerResult::ProgramRead { ok: false, name: None }
                }
            }
        }
        Err(e) => {
            log::warn!("{}", e);
            WorkerResult::ProgramRead { ok: false, name: None }
        }
    };
    (result, Some(backend))
}

fn run_write_program(backend: Option<Backend>, path: &Path, info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("writeProgram requires a checked-out backend");
    let preset = preset::capture_program_v2(backend.as_mut(), plugin_id_v2(info), numeric_version(info), info.num_parameters, info.has_chunk_data());
    let ok = write_file(path, &v2::encode_program(&preset)).map_err(|e| log::warn!("{}", e)).is_ok();
    (WorkerResult::ProgramWritten { ok }, Some(backend))
}

fn run_read_bank(backend: Option<Backend>, path: &Path) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("readBank requires a checked-out backend");
    let result = match backend.kind() {
        BackendKind::V3 => {
            log::warn!("bank read is not implemented for V3 backends");
            WorkerResult::BankRead { ok: false, program_index: 0 }
        }
        BackendKind::V2 => match read_file(path) {
            Ok(bytes) => {
                let expects_chunk = backend.as_ref().has_chunk_data();
                match v2::decode_bank(&bytes, expects_chunk) {
                    Ok(bank) => {
                        let program_index = bank.current_program;
                        preset::apply_bank_v2(backend.as_mut(), &bank);
                        WorkerResult::BankRead { ok: true, program_index }
                    }
                    Err(e) => {
                        log::warn!("rejected bank file {}: {}", path.display(), e);
                        WorkerResult::BankRead { ok: false, program_index: 0 }
                    }
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                WorkerResult::BankRead { ok: false, program_index: 0 }
            }
        },
    };
    (result, Some(backend))
}

fn run_write_bank(backend: Option<Backend>, path: &Path, info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("writeBank requires a checked-out backend");
    let ok = match backend.kind() {
        BackendKind::V3 => {
            log::warn!("bank write is not implemented for V3 backends");
            false
        }
        BackendKind::V2 => {
            let bank = preset::capture_bank_v2(
                backend.as_mut(),
                plugin_id_v2(info),
                numeric_version(info),
                info.num_programs,
                info.num_parameters,
                info.has_chunk_data(),
            );
            write_file(path, &v2::encode_bank(&bank)).map_err(|e| log::warn!("{}", e)).is_ok()
        }
    };
    (WorkerResult::BankWritten { ok }, Some(backend))
}

fn run_set_program_data(backend: Option<Backend>, bytes: &[u8], info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setProgramData requires a checked-out backend");
    match backend.kind() {
        BackendKind::V2 => match v2::decode_program(bytes, backend.as_ref().has_chunk_data()) {
            Ok(preset) => preset::apply_program_v2(backend.as_mut(), &preset),
            Err(e) => log::warn!("rejected streamed program data: {}", e),
        },
        BackendKind::V3 => match v3::decode(bytes, &class_id_v3(info)) {
            Ok(module) => {
                if let Err(e) = preset::apply_module_v3(backend.as_mut(), &module, &info.unique_id) {
                    log::warn!("rejected streamed program data: {}", e);
                }
            }
            Err(e) => log::warn!("rejected streamed program data: {}", e),
        },
    }
    (WorkerResult::ProgramDataSet, Some(backend))
}

fn run_set_bank_data(backend: Option<Backend>, bytes: &[u8], info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("setBankData requires a checked-out backend");
    match backend.kind() {
        BackendKind::V2 => match v2::decode_bank(bytes, backend.as_ref().has_chunk_data()) {
            Ok(bank) => preset::apply_bank_v2(backend.as_mut(), &bank),
            Err(e) => log::warn!("rejected streamed bank data: {}", e),
        },
        BackendKind::V3 => {
            let _ = info;
            log::warn!("bank data is not implemented for V3 backends");
        }
    }
    (WorkerResult::BankDataSet, Some(backend))
}

fn run_get_program_data(backend: Option<Backend>, info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("getProgramData requires a checked-out backend");
    let bytes = match backend.kind() {
        BackendKind::V2 => {
            let preset = preset::capture_program_v2(backend.as_mut(), plugin_id_v2(info), numeric_version(info), info.num_parameters, info.has_chunk_data());
            v2::encode_program(&preset)
        }
        BackendKind::V3 => {
            let module = preset::capture_module_v3(backend.as_mut(), class_id_v3(info), true);
            v3::encode(&module)
        }
    };
    (WorkerResult::ProgramDataGot { total: bytes.len(), bytes }, Some(backend))
}

fn run_get_bank_data(backend: Option<Backend>, info: &PluginInfo) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("getBankData requires a checked-out backend");
    let bytes = match backend.kind() {
        BackendKind::V2 => {
            let bank = preset::capture_bank_v2(
                backend.as_mut(),
                plugin_id_v2(info),
                numeric_version(info),
                info.num_programs,
                info.num_parameters,
                info.has_chunk_data(),
            );
            v2::encode_bank(&bank)
        }
        BackendKind::V3 => {
            log::warn!("bank data is not implemented for V3 backends");
            Vec::new()
        }
    };
    (WorkerResult::BankDataGot { total: bytes.len(), bytes }, Some(backend))
}

fn run_can_do(backend: Option<Backend>, key: &str) -> (WorkerResult, Option<Backend>) {
    let backend = backend.expect("canDo requires a checked-out backend");
    let result = backend.as_ref().can_do(key);
    (WorkerResult::CanDoResult { result }, Some(backend))
}

fn run_vendor_specific(backend: Option<Backend>, index: i32, value: isize, opt: f32) -> (WorkerResult, Option<Backend>) {
    let mut backend = backend.expect("vendorSpecific requires a checked-out backend");
    let result = backend.as_mut().vendor_specific(index, value, std::ptr::null_mut(), opt);
    (WorkerResult::VendorResult { result }, Some(backend))
}
