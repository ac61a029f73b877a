//! Win32 bindings: low-level input hooks, synthetic input, window and
//! monitor operations. Everything OS-specific lives under this module so
//! the engines above stay host-neutral.

pub mod hook;
pub mod input;
pub mod monitor;
pub mod virtdesk;
pub mod window;
pub mod window_system;

pub use window_system::Win32WindowSystem;
