//! Cross-platform pseudoterminals
//!
//! One handle type over two very different OS facilities:
//!
//! - `unix`: a master/slave device pair from `openpty(3)`
//! - `windows`: a ConPTY session (two pipes, a pseudo console and the
//!   attribute list that attaches it to a new process), plus the
//!   environment, path and command-line rules `CreateProcessW` needs
//! - `pty`: the `Pty` facade choosing the host's backend
//! - `wait`: waiting on a started child with cancellation and deadlines
//!
//! ```no_run
//! use crosspty::{wait, Command, Context, Pty, WindowSize};
//!
//! let mut pty = Pty::open(WindowSize::new(80, 24))?;
//! let mut cmd = Command::new("sh").args(["-c", "echo hello"]);
//! pty.start(&mut cmd)?;
//! pty.close_slave()?;
//!
//! let mut buf = [0u8; 64];
//! let n = pty.read(&mut buf)?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! let state = wait(&Context::background(), &mut cmd)?;
//! println!("{}", state);
//! pty.close()?;
//! # Ok::<(), crosspty::Error>(())
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod pty;
pub mod size;
pub mod unix;
pub mod wait;
pub mod windows;

pub use command::{Command, ProcAttr, SecurityAttrs, SpawnAttrs};
pub use config::{CliArgs, ConfigError, PtyConfig};
pub use error::{Error, Result};
pub use process::{ExitState, Process};
pub use pty::Pty;
pub use size::WindowSize;
pub use unix::UnixPty;
pub use wait::{wait, wait_process, Context};
pub use windows::ConPty;
