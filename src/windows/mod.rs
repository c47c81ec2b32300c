//! Windows ConPTY backend and its process-creation helpers
//!
//! The string helpers (`env`, `path`, `cmdline`) build everywhere so their
//! rules can be exercised on any host. The Win32 plumbing only builds on
//! Windows.

pub mod cmdline;
pub mod conpty;
pub mod env;
pub mod path;

#[cfg(windows)]
mod handles;
#[cfg(windows)]
mod spawn;

pub use conpty::{ConPty, CONPTY_NAME};
