//! The capability set exposed by a loaded plugin backend.
//!
//! The two plugin ABIs (V2 dispatcher/process pointers, V3
//! component/controller/processor interfaces) are out of scope: this module
//! only defines the polymorphic capability set a backend must expose and the
//! tagged enum the host uses to pick the matching preset codec. A concrete
//! backend is supplied by whatever crate bridges to the real plugin ABI.

use bitflags::bitflags;

bitflags! {
    /// Capability flags reported by a probed plugin.
    pub struct CapabilityFlags: u32 {
        const HAS_EDITOR        = 1 << 0;
        const IS_SYNTH          = 1 << 1;
        const SINGLE_PRECISION  = 1 << 2;
        const DOUBLE_PRECISION  = 1 << 3;
        const MIDI_INPUT        = 1 << 4;
        const MIDI_OUTPUT       = 1 << 5;
        const SYSEX_INPUT       = 1 << 6;
        const SYSEX_OUTPUT      = 1 << 7;
        const HAS_CHUNK_DATA    = 1 << 8;
    }
}

/// Which of the two plugin ABIs a backend was negotiated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    V2,
    V3,
}

/// A unique plugin identity: 32-bit for V2, 128-bit for V3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginUid {
    V2(u32),
    V3(u128),
}

#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: i32,
    pub name: String,
    pub label: String,
}

/// Immutable plugin metadata produced by probing (out of scope) and
/// consumed read-only by the host.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub path: std::path::PathBuf,
    pub display_name: String,
    pub vendor: String,
    pub category: String,
    pub version: String,
    pub backend_kind: BackendKind,
    pub unique_id: PluginUid,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub num_parameters: usize,
    pub num_programs: usize,
    pub capabilities: CapabilityFlags,
    pub parameters: Vec<ParameterDescriptor>,
    pub initial_program_names: Vec<String>,
}

impl PluginInfo {
    pub fn has_chunk_data(&self) -> bool {
        self.capabilities.contains(CapabilityFlags::HAS_CHUNK_DATA)
    }
}

/// A single MIDI-out or input event, `delta` is a frame offset within the
/// current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub delta_frames: u32,
}

/// A sysex-out event. `delta` is a frame offset within the current block.
#[derive(Debug, Clone)]
pub struct SysexEvent {
    pub bytes: Vec<u8>,
    pub delta_frames: u32,
}

/// Rect of a native editor window, in screen-independent units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Callbacks the backend invokes on whatever thread they originate from;
/// routing to the correct host thread is the [`crate::listener::ListenerAdapter`]'s
/// job, not the backend's.
pub trait BackendListener: Send + Sync {
    fn parameter_automated(&self, index: i32, value: f32);
    fn midi_event(&self, event: MidiEvent);
    fn sysex_event(&self, event: SysexEvent);
}

/// The fixed capability set every plugin backend (V2 or V3) must expose.
/// Implemented by the out-of-scope ABI bridge; the host only ever
/// calls through this trait.
pub trait PluginBackend: Send {
    fn set_sample_rate(&mut self, rate: f64);
    fn set_block_size(&mut self, frames: usize);
    fn set_precision_double(&mut self, double: bool) -> bool;

    fn suspend(&mut self);
    fn resume(&mut self);

    fn process_f32(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);
    fn process_f64(&mut self, inputs: &[&[f64]], outputs: &mut [&mut [f64]], frames: usize);

    fn set_parameter(&mut self, index: i32, value: f32);
    fn set_parameter_string(&mut self, index: i32, text: &str) -> bool;
    fn get_parameter(&self, index: i32) -> f32;
    fn get_parameter_display(&self, index: i32) -> String;

    fn set_program(&mut self, index: i32);
    fn get_program(&self) -> i32;
    fn get_program_name(&self) -> String;
    fn get_program_name_indexed(&self, index: i32) -> String;
    fn set_program_name(&mut self, name: &str);

    fn has_chunk_data(&self) -> bool;
    fn get_chunk(&mut self, is_bank: bool) -> Vec<u8>;
    fn set_chunk(&mut self, data: &[u8], is_bank: bool) -> bool;

    fn send_midi(&mut self, event: MidiEvent);
    fn send_sysex(&mut self, event: SysexEvent);

    fn set_tempo_bpm(&mut self, bpm: f64);
    fn set_time_signature(&mut self, numerator: i32, denominator: i32);
    fn set_transport_playing(&mut self, playing: bool);
    fn set_transport_position(&mut self, beats: f64);
    fn get_transport_position(&self) -> f64;

    fn can_do(&self, key: &str) -> i32;
    fn vendor_specific(&mut self, index: i32, value: isize, ptr: *mut std::ffi::c_void, opt: f32) -> isize;

    fn editor_open(&mut self, parent: Option<raw_window_handle::RawWindowHandle>) -> bool;
    fn editor_close(&mut self);
    fn editor_rect(&self) -> Option<EditorRect>;

    fn set_listener(&mut self, listener: std::sync::Arc<dyn BackendListener>);
}

/// Loads a plugin module from disk and negotiates it into a [`Backend`]
/// plus its probed [`PluginInfo`]. Probing and module loading are out of
/// scope; this trait is the seam the embedding engine fills in with a
/// real V2/V3 loader. Runs on the worker thread.
pub trait BackendFactory: Send + Sync {
    fn create(&self, path: &std::path::Path, with_editor: bool) -> Result<(Backend, PluginInfo), crate::error::ActivateError>;
}

/// The polymorphic plugin backend: a tagged variant rather than a
/// heap-allocated vtable hierarchy.
pub enum Backend {
    V2(Box<dyn PluginBackend>),
    V3(Box<dyn PluginBackend>),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::V2(_) => BackendKind::V2,
            Backend::V3(_) => BackendKind::V3,
        }
    }

    pub fn as_mut(&mut self) -> &mut dyn PluginBackend {
        match self {
            Backend::V2(b) => b.as_mut(),
            Backend::V3(b) => b.as_mut(),
        }
    }

    pub fn as_ref(&self) -> &dyn PluginBackend {
        match self {
            Backend::V2(b) => b.as_ref(),
            Backend::V3(b) => b.as_ref(),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A trait-object test double, used by the host instance and preset
    //! codec tests instead of a real plugin ABI.
    use super::*;
    use std::sync::Arc;

    pub struct MockBackend {
        pub params: Vec<f32>,
        pub chunk: Option<Vec<u8>>,
        pub program: i32,
        pub program_names: Vec<String>,
        pub double_precision: bool,
        pub last_midi: Option<MidiEvent>,
        pub last_sysex: Option<SysexEvent>,
        pub transport_playing: bool,
        pub transport_pos: f64,
        pub tempo: f64,
        pub listener: Option<Arc<dyn BackendListener>>,
    }

    impl MockBackend {
        pub fn new(num_params: usize) -> Self {
            Self {
                params: vec![0.0; num_params],
                chunk: None,
                program: 0,
                program_names: vec!["Init".to_string()],
                double_precision: false,
                last_midi: None,
                last_sysex: None,
                transport_playing: false,
                transport_pos: 0.0,
                tempo: 120.0,
                listener: None,
            }
        }
    }

    impl PluginBackend for MockBackend {
        fn set_sample_rate(&mut self, _rate: f64) {}
        fn set_block_size(&mut self, _frames: usize) {}
        fn set_precision_double(&mut self, double: bool) -> bool {
            self.double_precision = double;
            true
        }

        fn suspend(&mut self) {}
        fn resume(&mut self) {}

        fn process_f32(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
            for (ch, out) in outputs.iter_mut().enumerate() {
                if let Some(input) = inputs.get(ch) {
                    out[..frames].copy_from_slice(&input[..frames]);
                } else {
                    out[..frames].fill(0.0);
                }
            }
        }

        fn process_f64(&mut self, _inputs: &[&[f64]], outputs: &mut [&mut [f64]], frames: usize) {
            for out in outputs.iter_mut() {
                out[..frames].fill(0.0);
            }
        }

        fn set_parameter(&mut self, index: i32, value: f32) {
            if let Some(slot) = self.params.get_mut(index as usize) {
                *slot = value;
            }
        }
        fn set_parameter_string(&mut self, index: i32, text: &str) -> bool {
            if let (Some(slot), Ok(v)) = (self.params.get_mut(index as usize), text.parse()) {
                *slot = v;
                true
            } else {
                false
            }
        }
        fn get_parameter(&self, index: i32) -> f32 {
            self.params.get(index as usize).copied().unwrap_or(0.0)
        }
        fn get_parameter_display(&self, index: i32) -> String {
            format!("{:.3}", self.get_parameter(index))
        }

        fn set_program(&mut self, index: i32) {
            self.program = index;
        }
        fn get_program(&self) -> i32 {
            self.program
        }
        fn get_program_name(&self) -> String {
            self.program_names.get(self.program as usize).cloned().unwrap_or_default()
        }
        fn get_program_name_indexed(&self, index: i32) -> String {
            self.program_names.get(index as usize).cloned().unwrap_or_default()
        }
        fn set_program_name(&mut self, name: &str) {
            if let Some(slot) = self.program_names.get_mut(self.program as usize) {
                *slot = name.to_string();
            }
        }

        fn has_chunk_data(&self) -> bool {
            self.chunk.is_some()
        }
        fn get_chunk(&mut self, _is_bank: bool) -> Vec<u8> {
            self.chunk.clone().unwrap_or_default()
        }
        fn set_chunk(&mut self, data: &[u8], _is_bank: bool) -> bool {
            self.chunk = Some(data.to_vec());
            true
        }

        fn send_midi(&mut self, event: MidiEvent) {
            self.last_midi = Some(event);
        }
        fn send_sysex(&mut self, event: SysexEvent) {
            self.last_sysex = Some(event);
        }

        fn set_tempo_bpm(&mut self, bpm: f64) {
            self.tempo = bpm;
        }
        fn set_time_signature(&mut self, _numerator: i32, _denominator: i32) {}
        fn set_transport_playing(&mut self, playing: bool) {
            self.transport_playing = playing;
        }
        fn set_transport_position(&mut self, beats: f64) {
            self.transport_pos = beats;
        }
        fn get_transport_position(&self) -> f64 {
            self.transport_pos
        }

        fn can_do(&self, _key: &str) -> i32 {
            0
        }
        fn vendor_specific(&mut self, _index: i32, _value: isize, _ptr: *mut std::ffi::c_void, _opt: f32) -> isize {
            0
        }

        fn editor_open(&mut self, _parent: Option<raw_window_handle::RawWindowHandle>) -> bool {
            true
        }
        fn editor_close(&mut self) {}
        fn editor_rect(&self) -> Option<EditorRect> {
            None
        }

        fn set_listener(&mut self, listener: Arc<dyn BackendListener>) {
            self.listener = Some(listener);
        }
    }

    /// A factory that always succeeds and hands back a fresh [`MockBackend`]
    /// with `num_params` parameters, bypassing real module loading entirely.
    pub struct MockBackendFactory {
        pub num_params: usize,
        pub num_programs: usize,
        pub fail: bool,
    }

    impl BackendFactory for MockBackendFactory {
        fn create(&self, path: &std::path::Path, _with_editor: bool) -> Result<(Backend, PluginInfo), crate::error::ActivateError> {
            if self.fail {
                return Err(crate::error::ActivateError::BackendLoadFailure("mock factory configured to fail".into()));
            }
            let mut backend = MockBackend::new(self.num_params);
            backend.program_names = (0..self.num_programs.max(1)).map(|i| format!("Program {}", i)).collect();

            let info = PluginInfo {
                path: path.to_path_buf(),
                display_name: "Mock Plugin".into(),
                vendor: "Test Vendor".into(),
                category: "Fx".into(),
                version: "1.0".into(),
                backend_kind: BackendKind::V2,
                unique_id: PluginUid::V2(0x4d6f636b),
                num_inputs: 2,
                num_outputs: 2,
                num_parameters: self.num_params,
                num_programs: self.num_programs.max(1),
                capabilities: CapabilityFlags::HAS_EDITOR | CapabilityFlags::SINGLE_PRECISION,
                parameters: (0..self.num_params)
                    .map(|i| ParameterDescriptor { id: i as i32, name: format!("Param {}", i), label: String::new() })
                    .collect(),
                initial_program_names: backend.program_names.clone(),
            };

            Ok((Backend::V2(Box::new(backend)), info))
        }
    }
}
