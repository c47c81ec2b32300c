//! Platform-independent PTY handle
//!
//! `Pty` wraps whichever backend the host supports: a Unix master/slave
//! pair or a Windows pseudo console. Both backends exist on every platform;
//! the one that does not match the host fails with `Error::Unsupported`.

use std::fs::File;
use std::io::{self, Read, Write};

use crate::command::Command;
use crate::config::PtyConfig;
use crate::error::Result;
use crate::size::WindowSize;
use crate::unix::UnixPty;
use crate::windows::ConPty;

/// A pseudoterminal
#[derive(Debug)]
pub enum Pty {
    Unix(UnixPty),
    ConPty(ConPty),
}

impl Pty {
    /// Open the host's PTY backend with the given size.
    ///
    /// A zero dimension is replaced by its default.
    pub fn open(size: WindowSize) -> Result<Self> {
        #[cfg(windows)]
        {
            ConPty::open(size).map(Pty::ConPty)
        }
        #[cfg(not(windows))]
        {
            UnixPty::open(size).map(Pty::Unix)
        }
    }

    /// Open a PTY sized by `config`
    pub fn open_with_config(config: &PtyConfig) -> Result<Self> {
        Self::open(config.size())
    }

    /// Open a PTY and start the command `config` describes on it
    pub fn spawn(config: &PtyConfig) -> Result<(Self, Command)> {
        let pty = Self::open_with_config(config)?;
        let mut cmd = config.command();
        pty.start(&mut cmd)?;
        Ok((pty, cmd))
    }

    /// Device name: the slave path on Unix, a fixed label on Windows
    pub fn name(&self) -> &str {
        match self {
            Pty::Unix(pty) => pty.name(),
            Pty::ConPty(pty) => pty.name(),
        }
    }

    pub fn resize(&self, size: WindowSize) -> Result<()> {
        match self {
            Pty::Unix(pty) => pty.resize(size),
            Pty::ConPty(pty) => pty.resize(size),
        }
    }

    /// Current window size.
    ///
    /// Unix asks the kernel; Windows reports the last size applied.
    pub fn size(&self) -> Result<WindowSize> {
        match self {
            Pty::Unix(pty) => pty.size(),
            Pty::ConPty(pty) => pty.size(),
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Pty::Unix(pty) => pty.read(buf),
            Pty::ConPty(pty) => pty.read(buf),
        }
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            Pty::Unix(pty) => pty.write(buf),
            Pty::ConPty(pty) => pty.write(buf),
        }
    }

    /// Start `cmd` on this PTY; the process is stored on `cmd`
    pub fn start(&self, cmd: &mut Command) -> Result<()> {
        match self {
            Pty::Unix(pty) => pty.start(cmd),
            Pty::ConPty(pty) => pty.start(cmd),
        }
    }

    /// Drop the parent's copy of the child-side device.
    ///
    /// Only the Unix backend holds one; elsewhere this does nothing.
    pub fn close_slave(&mut self) -> Result<()> {
        match self {
            Pty::Unix(pty) => pty.close_slave(),
            Pty::ConPty(_) => Ok(()),
        }
    }

    pub fn try_clone_reader(&self) -> Result<File> {
        match self {
            Pty::Unix(pty) => pty.try_clone_reader(),
            Pty::ConPty(pty) => pty.try_clone_reader(),
        }
    }

    pub fn try_clone_writer(&self) -> Result<File> {
        match self {
            Pty::Unix(pty) => pty.try_clone_writer(),
            Pty::ConPty(pty) => pty.try_clone_writer(),
        }
    }

    /// Release every resource the PTY owns. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Pty::Unix(pty) => pty.close(),
            Pty::ConPty(pty) => pty.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Pty::Unix(pty) => pty.is_closed(),
            Pty::ConPty(pty) => pty.is_closed(),
        }
    }
}

impl From<UnixPty> for Pty {
    fn from(pty: UnixPty) -> Self {
        Pty::Unix(pty)
    }
}

impl From<ConPty> for Pty {
    fn from(pty: ConPty) -> Self {
        Pty::ConPty(pty)
    }
}

impl Read for &Pty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pty::read(self, buf).map_err(Into::into)
    }
}

impl Write for &Pty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pty::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
