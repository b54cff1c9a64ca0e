//! OBS-side IPC shim core for the Aegis dock.
//!
//! Mediates between the host application and the external core service over
//! two named, length-prefixed MessagePack channels, and between the embedded
//! dock UI and the core via JSON dock actions and replayed state.

pub mod channel;
pub mod codec;
pub mod config;
pub mod dock;
pub mod protocol;
pub mod pump;
pub mod queues;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod theme;

pub use config::ShimConfig;
pub use runtime::{FrontendEvent, HostFrontend, JsExecuteFn, ShimCore};
pub use session::{IpcCallbacks, IpcClient};
