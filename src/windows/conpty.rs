//! Windows pseudo console backend
//!
//! A ConPTY session owns two anonymous pipes, the pseudo console that sits
//! between them, and the attribute list that attaches the console to a new
//! process. The console reads keystrokes from `input_read` and renders into
//! `output_write`; callers use the opposite ends.
//!
//! On other platforms `ConPty` still exists, but every operation returns
//! `Error::Unsupported`.

use std::fs::File;
use std::io::{self, Read, Write};

use crate::command::{Command, ProcAttr};
use crate::error::{Error, Result};
use crate::process::Process;
use crate::size::WindowSize;

/// Name reported for every ConPTY session
pub const CONPTY_NAME: &str = "windows-pty";

#[cfg(windows)]
pub use imp::ConPty;

#[cfg(not(windows))]
pub use stub::ConPty;

#[cfg(windows)]
mod imp {
    use std::os::windows::io::OwnedHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    use super::super::handles::{
        close_file, create_pipe, security_attributes, ProcThreadAttributeList, PseudoConsole,
    };
    use super::super::spawn::spawn;
    use super::*;
    use crate::command::SecurityAttrs;

    /// A Windows pseudo console session
    pub struct ConPty {
        /// Console side of the input pipe
        input_read: Option<OwnedHandle>,
        /// Caller side of the input pipe
        input_write: Option<File>,
        /// Caller side of the output pipe
        output_read: Option<File>,
        /// Console side of the output pipe
        output_write: Option<OwnedHandle>,
        /// Attribute list binding new processes to `console`
        attrs: Option<ProcThreadAttributeList>,
        console: Option<PseudoConsole>,
        /// Last size the console accepted
        size: Mutex<WindowSize>,
        closed: AtomicBool,
    }

    impl std::fmt::Debug for ConPty {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ConPty")
                .field("size", &*self.size.lock().unwrap_or_else(PoisonError::into_inner))
                .field("closed", &self.closed.load(Ordering::Acquire))
                .finish()
        }
    }

    impl ConPty {
        /// Create a session with the given size
        pub fn open(size: WindowSize) -> Result<Self> {
            Self::open_with_flags(size, 0)
        }

        /// Create a session passing `flags` to `CreatePseudoConsole`
        pub fn open_with_flags(size: WindowSize, flags: u32) -> Result<Self> {
            let size = size.normalized();
            let sa = security_attributes(SecurityAttrs {
                inherit_handle: false,
                security_descriptor: 0,
            });

            // Anything acquired before a failure is released as it drops.
            let input = create_pipe(&sa).map_err(Error::CreatePipe)?;
            let output = create_pipe(&sa).map_err(Error::CreatePipe)?;
            let console = PseudoConsole::new(size, &input.read, &output.write, flags)
                .map_err(Error::CreatePseudoConsole)?;
            let mut attrs = ProcThreadAttributeList::with_capacity(1).map_err(Error::AttributeList)?;
            attrs
                .set_pseudo_console(&console)
                .map_err(Error::UpdateAttribute)?;

            tracing::debug!(cols = size.cols, rows = size.rows, "opened pseudo console");
            Ok(ConPty {
                input_read: Some(input.read),
                input_write: Some(File::from(input.write)),
                output_read: Some(File::from(output.read)),
                output_write: Some(output.write),
                attrs: Some(attrs),
                console: Some(console),
                size: Mutex::new(size),
                closed: AtomicBool::new(false),
            })
        }

        pub fn name(&self) -> &str {
            CONPTY_NAME
        }

        /// Resize the console; a zero dimension is replaced by its default
        pub fn resize(&self, size: WindowSize) -> Result<()> {
            let size = size.normalized();
            let console = self.console.as_ref().ok_or(Error::Closed)?;
            console.resize(size).map_err(Error::Resize)?;
            *self.size.lock().unwrap_or_else(PoisonError::into_inner) = size;
            Ok(())
        }

        /// The last size applied successfully
        pub fn size(&self) -> Result<WindowSize> {
            if self.console.is_none() {
                return Err(Error::Closed);
            }
            Ok(*self.size.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Read rendered console output
        pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut out = self.output_read.as_ref().ok_or(Error::Closed)?;
            Ok(out.read(buf)?)
        }

        /// Send input to the console
        pub fn write(&self, buf: &[u8]) -> Result<usize> {
            let mut input = self.input_write.as_ref().ok_or(Error::Closed)?;
            Ok(input.write(buf)?)
        }

        /// Independent handle onto the output pipe
        pub fn try_clone_reader(&self) -> Result<File> {
            let out = self.output_read.as_ref().ok_or(Error::Closed)?;
            Ok(out.try_clone()?)
        }

        /// Independent handle onto the input pipe
        pub fn try_clone_writer(&self) -> Result<File> {
            let input = self.input_write.as_ref().ok_or(Error::Closed)?;
            Ok(input.try_clone()?)
        }

        /// Create a process attached to this console.
        ///
        /// `args` holds the full argv, program first.
        pub fn spawn(&self, path: &str, args: &[String], attr: &ProcAttr) -> Result<Process> {
            let attrs = self.attrs.as_ref().ok_or(Error::Closed)?;
            spawn(attrs, path, args, attr)
        }

        /// Start `cmd` on this console and record its process on it
        pub fn start(&self, cmd: &mut Command) -> Result<()> {
            let process = self.spawn(cmd.get_program(), &cmd.argv(), &cmd.proc_attr())?;
            cmd.set_process(process);
            Ok(())
        }

        /// Tear the session down.
        ///
        /// The console-side pipe ends go first so the console sees EOF, then
        /// the attribute list and the console itself, then the caller-side
        /// ends. Only failures closing the caller-side ends are reported.
        pub fn close(&mut self) -> Result<()> {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }

            drop(self.input_read.take());
            drop(self.output_write.take());
            drop(self.attrs.take());
            drop(self.console.take());

            let mut errors = Vec::new();
            for end in [self.input_write.take(), self.output_read.take()]
                .into_iter()
                .flatten()
            {
                if let Err(e) = close_file(end) {
                    errors.push(Error::Io(e));
                }
            }

            tracing::debug!(failed = errors.len(), "closed pseudo console");
            match Error::join(errors) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    impl Drop for ConPty {
        fn drop(&mut self) {
            if let Err(e) = self.close() {
                tracing::warn!("error closing pseudo console: {}", e);
            }
        }
    }
}

#[cfg(not(windows))]
mod stub {
    use super::*;

    /// Placeholder for the Windows pseudo console on other platforms
    #[derive(Debug)]
    pub struct ConPty {
        _private: (),
    }

    impl ConPty {
        pub fn open(_size: WindowSize) -> Result<Self> {
            Err(Error::Unsupported)
        }

        pub fn open_with_flags(_size: WindowSize, _flags: u32) -> Result<Self> {
            Err(Error::Unsupported)
        }

        pub fn name(&self) -> &str {
            CONPTY_NAME
        }

        pub fn resize(&self, _size: WindowSize) -> Result<()> {
            Err(Error::Unsupported)
        }

        pub fn size(&self) -> Result<WindowSize> {
            Err(Error::Unsupported)
        }

        pub fn read(&self, _buf: &mut [u8]) -> Result<usize> {
            Err(Error::Unsupported)
        }

        pub fn write(&self, _buf: &[u8]) -> Result<usize> {
            Err(Error::Unsupported)
        }

        pub fn try_clone_reader(&self) -> Result<File> {
            Err(Error::Unsupported)
        }

        pub fn try_clone_writer(&self) -> Result<File> {
            Err(Error::Unsupported)
        }

        pub fn spawn(&self, _path: &str, _args: &[String], _attr: &ProcAttr) -> Result<Process> {
            Err(Error::Unsupported)
        }

        pub fn start(&self, _cmd: &mut Command) -> Result<()> {
            Err(Error::Unsupported)
        }

        pub fn close(&mut self) -> Result<()> {
            Err(Error::Unsupported)
        }

        pub fn is_closed(&self) -> bool {
            true
        }
    }
}

impl Read for &ConPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ConPty::read(self, buf).map_err(Into::into)
    }
}

impl Write for &ConPty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ConPty::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_open_unsupported_off_windows() {
        let err = ConPty::open(WindowSize::new(80, 24)).unwrap_err();
        assert!(err.is_unsupported());
        let err = ConPty::open_with_flags(WindowSize::new(80, 24), 0).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[cfg(windows)]
    #[test]
    fn test_resize_is_cached() {
        let pty = ConPty::open(WindowSize::new(80, 24)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::new(80, 24));
        pty.resize(WindowSize::new(100, 30)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::new(100, 30));
        assert_eq!(pty.name(), CONPTY_NAME);
    }

    #[cfg(windows)]
    #[test]
    fn test_zero_size_uses_defaults() {
        let pty = ConPty::open(WindowSize::new(0, 0)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::default());
        pty.resize(WindowSize::new(0, 50)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::new(80, 50));
    }

    #[cfg(windows)]
    #[test]
    fn test_close_twice_then_io_fails() {
        let mut pty = ConPty::open(WindowSize::new(80, 24)).unwrap();
        pty.close().unwrap();
        pty.close().unwrap();
        assert!(pty.is_closed());
        assert!(pty.read(&mut [0u8; 8]).unwrap_err().is_closed());
        assert!(pty.write(b"x").unwrap_err().is_closed());
        assert!(pty.resize(WindowSize::new(10, 10)).unwrap_err().is_closed());
        assert!(pty.size().unwrap_err().is_closed());
    }

    #[cfg(windows)]
    #[test]
    fn test_spawn_cmd_echo() {
        use crate::wait::{wait, Context};

        let pty = ConPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("cmd.exe").args(["/c", "exit 4"]);
        pty.start(&mut cmd).unwrap();
        let state = wait(&Context::background(), &mut cmd).unwrap();
        assert_eq!(state.code(), Some(4));
    }
}
