//! A realtime-safe host engine for V2- and V3-style plugin backends: an
//! audio-thread state machine ([`host_instance::PluginHostInstance`]) paired
//! with a worker thread that services every blocking operation — backend
//! activation, preset/bank I/O, the vendor surface — behind a lock-free
//! command queue.

mod backend;
mod command;
mod config;
mod error;
mod event_inbox;
mod garbage_collector;
mod host_instance;
mod listener;
mod parameter_state;
mod preset;
mod reply;
mod thread_id;
mod window;
mod worker;

pub use backend::{
 Backend, BackendFactory, BackendKind, BackendListener, CapabilityFlags, EditorRect, MidiEvent, ParameterDescriptor, PluginBackend, PluginInfo,
 PluginUid, SysexEvent,
};
pub use command::{command_queue, CommandConsumer, CommandProducer, PluginInstanceId};
pub use config::{GuiThreadMode, HostConfig};
pub use error::{ActivateError, CodecError, HostError, IoError};
pub use garbage_collector::run_garbage_collector_thread;
pub use host_instance::{HostState, PluginHostInstance};
pub use parameter_state::ParameterTable;
pub use preset::{v2, v3};
pub use reply::OutgoingReply;
pub use window::{Window, WindowBackend, WindowHandle};
pub use worker::run_worker_thread;
