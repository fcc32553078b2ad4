//! The reply surface emitted by a [`crate::host_instance::PluginHostInstance`]
//! back to the embedding engine. OSC/byte framing is the embedding
//! engine's concern; this crate only produces typed values.

use crate::backend::{MidiEvent, SysexEvent};

#[derive(Debug, Clone)]
pub enum OutgoingReply {
    /// `/open {ok, hasEditor}`
    Open { ok: bool, has_editor: bool },
    /// `/param {index, value, display}`
    Param { index: i32, value: f32, display: String },
    /// `/auto {index, value}`
    Auto { index: i32, value: f32 },
    /// `/set {value}`
    Set { value: f32 },
    /// `/setn {count, values...}`
    SetN { values: Vec<f32> },
    /// `/program_index {i}`
    ProgramIndex { index: i32 },
    /// `/program_name {i, name}`
    ProgramName { index: i32, name: String },
    /// `/program_read {ok}`
    ProgramRead { ok: bool },
    /// `/program_write {ok}`
    ProgramWrite { ok: bool },
    /// `/program_data {total, onset, size, bytes...}`
    ProgramData { total: usize, onset: usize, bytes: Vec<u8> },
    /// `/bank_read {ok}`
    BankRead { ok: bool },
    /// `/bank_write {ok}`
    BankWrite { ok: bool },
    /// `/bank_data {total, onset, size, bytes...}`
    BankData { total: usize, onset: usize, bytes: Vec<u8> },
    /// `/midi {s, d1, d2}`
    Midi(MidiEvent),
    /// `/sysex {bytes...}`
    Sysex(SysexEvent),
    /// `/transport {pos}`
    Transport { pos: f64 },
    /// `/can_do {int}`
    CanDo { result: i32 },
    /// `/vendor_method {int}`
    VendorMethod { result: isize },
}
