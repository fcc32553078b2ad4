//! Binary preset/bank codecs for both V2 and V3 formats, plus the glue
//! that applies a decoded preset to a backend or captures one from it.
//! The codecs themselves are pure functions with no backend dependency.

pub mod v2;
pub mod v3;

use crate::backend::{BackendKind, PluginBackend, PluginUid};
use crate::error::CodecError;

/// Snapshot a backend's current program into a V2 [`v2::ProgramPreset`].
pub fn capture_program_v2(backend: &mut dyn PluginBackend, plugin_id: u32, plugin_version: i32, num_params: usize, has_chunk: bool) -> v2::ProgramPreset {
    let payload = if has_chunk {
        v2::ProgramPayload::Chunk(backend.get_chunk(false))
    } else {
        v2::ProgramPayload::Params((0..num_params as i32).map(|i| backend.get_parameter(i)).collect())
    };

    v2::ProgramPreset { plugin_id, plugin_version, name: backend.get_program_name(), payload }
}

/// Apply a decoded V2 program preset to a backend: set the name first,
/// then each parameter (or the opaque chunk).
pub fn apply_program_v2(backend: &mut dyn PluginBackend, preset: &v2::ProgramPreset) {
    backend.set_program_name(&preset.name);
    match &preset.payload {
        v2::ProgramPayload::Params(values) => {
            for (i, v) in values.iter().enumerate() {
                backend.set_parameter(i as i32, *v);
            }
        }
        v2::ProgramPayload::Chunk(bytes) => {
            backend.set_chunk(bytes, false);
        }
    }
}

/// Snapshot every program in a backend into a V2 bank, restoring the
/// originally active program once done.
pub fn capture_bank_v2(
    backend: &mut dyn PluginBackend,
    plugin_id: u32,
    plugin_version: i32,
    num_programs: usize,
    num_params: usize,
    has_chunk: bool,
) -> v2::BankPreset {
    let current_program = backend.get_program();

    let payload = if has_chunk {
        v2::BankPayload::Chunk(backend.get_chunk(true))
    } else {
        let mut programs = Vec::with_capacity(num_programs);
        for program_index in 0..num_programs as i32 {
            backend.set_program(program_index);
            programs.push(capture_program_v2(backend, plugin_id, plugin_version, num_params, false));
        }
        backend.set_program(current_program);
        v2::BankPayload::Programs(programs)
    };

    v2::BankPreset { plugin_id, plugin_version, current_program, payload }
}

/// Apply a decoded V2 bank to a backend.
pub fn apply_bank_v2(backend: &mut dyn PluginBackend, bank: &v2::BankPreset) {
    match &bank.payload {
        v2::BankPayload::Programs(programs) => {
            for (i, program) in programs.iter().enumerate() {
                backend.set_program(i as i32);
                apply_program_v2(backend, program);
            }
            backend.set_program(bank.current_program);
        }
        v2::BankPayload::Chunk(bytes) => {
            backend.set_chunk(bytes, true);
        }
    }
}

/// Snapshot a V3 backend's component (and, if present, controller) state.
pub fn capture_module_v3(backend: &mut dyn PluginBackend, class_id: [u8; 32], has_controller: bool) -> v3::ModulePreset {
    let component_state = backend.get_chunk(false);
    let controller_state = if has_controller { Some(backend.get_chunk(true)) } else { None };
    v3::ModulePreset { class_id, component_state, controller_state }
}

/// Apply a decoded V3 module preset to a backend. `expected_class_id`
/// must equal the plugin's unique id (checked by [`v3::decode`] already;
/// re-validated here so callers can apply a preset captured elsewhere).
pub fn apply_module_v3(backend: &mut dyn PluginBackend, preset: &v3::ModulePreset, expected_uid: &PluginUid) -> Result<(), CodecError> {
    if let PluginUid::V3(uid) = expected_uid {
        let expected_bytes = uid.to_be_bytes();
        if preset.class_id[..16] != expected_bytes[..] {
            return Err(CodecError::ClassIdMismatch);
        }
    }

    backend.set_chunk(&preset.component_state, false);
    if let Some(controller_state) = &preset.controller_state {
        backend.set_chunk(controller_state, true);
    }
    Ok(())
}

/// Which codec a plugin's backend kind requires.
pub fn codec_for(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::V2 => "fxp/fxb",
        BackendKind::V3 => "vst3-chunk-list",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn capture_then_apply_round_trips_parameters() {
        let mut backend = MockBackend::new(4);
        backend.set_parameter(0, 0.1);
        backend.set_parameter(1, 0.2);
        backend.set_parameter(2, 0.3);
        backend.set_parameter(3, 0.4);
        backend.set_program_name("Init ");

        let preset = capture_program_v2(&mut backend, 1, 1, 4, false);

        let mut fresh = MockBackend::new(4);
        apply_program_v2(&mut fresh, &preset);

        assert_eq!(fresh.get_parameter(0), 0.1);
        assert_eq!(fresh.get_parameter(3), 0.4);
        assert_eq!(fresh.get_program_name(), "Init ");
    }

    #[test]
    fn capture_bank_restores_active_program() {
        let mut backend = MockBackend::new(2);
        backend.program_names = vec!["A".into(), "B".into(), "C".into()];
        backend.set_program(1);

        let bank = capture_bank_v2(&mut backend, 1, 1, 3, 2, false);

        assert_eq!(backend.get_program(), 1);
        assert_eq!(bank.current_program, 1);
    }
}
