//! Unix PTY backend
//!
//! Allocates a master/slave pair with `openpty(3)`. The master is the
//! caller's endpoint; the slave becomes the child's terminal.
//!
//! # References
//!
//! - openpty(3): https://man7.org/linux/man-pages/man3/openpty.3.html
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

use std::fs::File;
use std::io::{self, Read, Write};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::size::WindowSize;

#[cfg(unix)]
pub use imp::UnixPty;

#[cfg(not(unix))]
pub use stub::UnixPty;

#[cfg(unix)]
mod imp {
    use std::ffi::CStr;
    use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
    use std::os::unix::process::CommandExt;
    use std::process::{self, Stdio};
    use std::sync::atomic::{AtomicBool, Ordering};

    use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
    use nix::libc;
    use nix::pty::{openpty, Winsize};
    use nix::sys::termios::Termios;
    use nix::unistd::close;

    use super::*;
    use crate::process::Process;

    /// A pseudoterminal master/slave pair
    #[derive(Debug)]
    pub struct UnixPty {
        /// Caller-facing end
        master: Option<File>,
        /// Child-facing end; may be released early with `close_slave`
        slave: Option<File>,
        /// Path of the slave device, e.g. `/dev/pts/3`
        name: String,
        closed: AtomicBool,
    }

    impl UnixPty {
        /// Allocate a PTY pair and apply `size`.
        ///
        /// A zero dimension is replaced by its default.
        pub fn open(size: WindowSize) -> Result<Self> {
            let pair = openpty(None::<&Winsize>, None::<&Termios>)
                .map_err(|e| Error::OpenPty(e.into()))?;
            let master = File::from(pair.master);
            let slave = File::from(pair.slave);

            for fd in [master.as_raw_fd(), slave.as_raw_fd()] {
                fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                    .map_err(|e| Error::OpenPty(e.into()))?;
            }
            let name = tty_name(slave.as_raw_fd()).map_err(Error::OpenPty)?;

            // Dropping `pty` on a failed resize releases both ends.
            let pty = UnixPty {
                master: Some(master),
                slave: Some(slave),
                name,
                closed: AtomicBool::new(false),
            };
            pty.resize(size)?;

            tracing::debug!(name = %pty.name, cols = size.cols, rows = size.rows, "opened pty");
            Ok(pty)
        }

        /// Path of the slave device
        pub fn name(&self) -> &str {
            &self.name
        }

        fn master(&self) -> Result<&File> {
            self.master.as_ref().ok_or(Error::Closed)
        }

        /// Raw master descriptor, while open
        pub fn master_fd(&self) -> Option<RawFd> {
            self.master.as_ref().map(AsRawFd::as_raw_fd)
        }

        /// Raw slave descriptor, while held
        pub fn slave_fd(&self) -> Option<RawFd> {
            self.slave.as_ref().map(AsRawFd::as_raw_fd)
        }

        /// Set the window size; a zero dimension is replaced by its default
        pub fn resize(&self, size: WindowSize) -> Result<()> {
            let ws = size.normalized().to_winsize();
            let fd = self.master()?.as_raw_fd();
            // SAFETY: TIOCSWINSZ reads one winsize from a valid pointer.
            if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &ws) } < 0 {
                return Err(Error::Resize(io::Error::last_os_error()));
            }
            Ok(())
        }

        /// Current window size as the kernel reports it
        pub fn size(&self) -> Result<WindowSize> {
            let fd = self.master()?.as_raw_fd();
            let mut ws = WindowSize::default().to_winsize();
            // SAFETY: TIOCGWINSZ writes one winsize to a valid pointer.
            if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut ws) } < 0 {
                return Err(Error::WindowSize(io::Error::last_os_error()));
            }
            Ok(WindowSize::from(ws))
        }

        /// Read child output from the master
        pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut master = self.master()?;
            Ok(master.read(buf)?)
        }

        /// Send input to the child through the master
        pub fn write(&self, buf: &[u8]) -> Result<usize> {
            let mut master = self.master()?;
            Ok(master.write(buf)?)
        }

        /// Switch the master between blocking and non-blocking mode
        pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
            let fd = self.master()?.as_raw_fd();
            let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
            let flags = if nonblocking {
                flags | OFlag::O_NONBLOCK
            } else {
                flags - OFlag::O_NONBLOCK
            };
            fcntl(fd, FcntlArg::F_SETFL(flags))?;
            Ok(())
        }

        /// Independent handle onto the master for a reader thread
        pub fn try_clone_reader(&self) -> Result<File> {
            Ok(self.master()?.try_clone()?)
        }

        /// Independent handle onto the master for a writer thread
        pub fn try_clone_writer(&self) -> Result<File> {
            Ok(self.master()?.try_clone()?)
        }

        /// Start `cmd` with the slave as its terminal.
        ///
        /// Stdio streams the command does not set are bound to the slave.
        /// When stdin is the slave, the child also gets a new session with
        /// the slave as its controlling terminal.
        pub fn start(&self, cmd: &mut Command) -> Result<()> {
            let slave = self.slave.as_ref().ok_or(Error::Closed)?;
            let (stdin, stdout, stderr) = cmd.take_stdio();
            let controlling = stdin.is_none();

            let mut child = process::Command::new(cmd.get_program());
            child.args(cmd.get_args());
            let (base, vars) = cmd.env_parts();
            if let Some(base) = base {
                child.env_clear();
                child.envs(base.iter().filter_map(|kv| kv.split_once('=')));
            }
            // Inherited values pass through as raw bytes.
            child.envs(vars.iter().filter_map(|kv| kv.split_once('=')));
            if let Some(dir) = cmd.get_current_dir() {
                child.current_dir(dir);
            }
            child.stdin(bind(stdin, slave)?);
            child.stdout(bind(stdout, slave)?);
            child.stderr(bind(stderr, slave)?);

            if controlling {
                // SAFETY: the closure only makes async-signal-safe calls.
                unsafe {
                    child.pre_exec(|| {
                        if libc::setsid() < 0 {
                            return Err(io::Error::last_os_error());
                        }
                        if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) < 0 {
                            return Err(io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }
            }

            let spawned = child.spawn().map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound(cmd.get_program().to_string()),
                _ => Error::Spawn(e),
            })?;
            tracing::debug!(
                pid = spawned.id(),
                program = cmd.get_program(),
                tty = %self.name,
                "started child"
            );
            cmd.set_process(Process::from_child(spawned));
            Ok(())
        }

        /// Release the slave once the child holds its own copy.
        ///
        /// Afterwards the master reports EOF (or EIO) when the child exits.
        pub fn close_slave(&mut self) -> Result<()> {
            match self.slave.take() {
                Some(slave) => Ok(close(slave.into_raw_fd())?),
                None => Ok(()),
            }
        }

        /// Close the slave, then the master.
        ///
        /// Both are always attempted; later calls do nothing.
        pub fn close(&mut self) -> Result<()> {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }

            let mut errors = Vec::new();
            for end in [self.slave.take(), self.master.take()].into_iter().flatten() {
                if let Err(e) = close(end.into_raw_fd()) {
                    errors.push(Error::Nix(e));
                }
            }

            tracing::debug!(name = %self.name, failed = errors.len(), "closed pty");
            match Error::join(errors) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    impl Drop for UnixPty {
        fn drop(&mut self) {
            if let Err(e) = self.close() {
                tracing::warn!("error closing pty: {}", e);
            }
        }
    }

    fn bind(requested: Option<Stdio>, slave: &File) -> Result<Stdio> {
        match requested {
            Some(stdio) => Ok(stdio),
            None => Ok(Stdio::from(slave.try_clone()?)),
        }
    }

    fn tty_name(fd: RawFd) -> io::Result<String> {
        let mut buf = [0 as libc::c_char; 256];
        // SAFETY: `buf` is writable for its full length.
        let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        // SAFETY: ttyname_r NUL-terminated the name on success.
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }
}

#[cfg(not(unix))]
mod stub {
    use super::*;

    /// Placeholder for the Unix PTY on other platforms
    #[derive(Debug)]
    pub struct UnixPty {
        _private: (),
    }

    impl UnixPty {
        pub fn open(_size: WindowSize) -> Result<Self> {
            Err(Error::Unsupported)
        }

        pub fn name(&self) -> &str {
            ""
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

        pub fn set_nonblocking(&self, _nonblocking: bool) -> Result<()> {
            Err(Error::Unsupported)
        }

        pub fn try_clone_reader(&self) -> Result<File> {
            Err(Error::Unsupported)
        }

        pub fn try_clone_writer(&self) -> Result<File> {
            Err(Error::Unsupported)
        }

        pub fn start(&self, _cmd: &mut Command) -> Result<()> {
            Err(Error::Unsupported)
        }

        pub fn close_slave(&mut self) -> Result<()> {
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

impl Read for &UnixPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UnixPty::read(self, buf).map_err(Into::into)
    }
}

impl Write for &UnixPty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        UnixPty::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::ExitState;
    use crate::wait::{wait, Context};

    /// Read until `needle` shows up or the master reports EOF/EIO
    fn read_until(pty: &UnixPty, needle: &str) -> String {
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&output).contains(needle) {
            match pty.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_open_names_slave_device() {
        let pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        assert!(pty.name().starts_with("/dev/"), "name: {}", pty.name());
        assert!(pty.master_fd().is_some());
        assert!(pty.slave_fd().is_some());
    }

    #[test]
    fn test_resize_round_trips_through_kernel() {
        let pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::new(80, 24));

        pty.resize(WindowSize::new(120, 40)).unwrap();
        let size = pty.size().unwrap();
        assert_eq!((size.cols, size.rows), (120, 40));
    }

    #[test]
    fn test_zero_size_substitutes_defaults() {
        let pty = UnixPty::open(WindowSize::new(0, 0)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::default());

        pty.resize(WindowSize::new(0, 50)).unwrap();
        let size = pty.size().unwrap();
        assert_eq!((size.cols, size.rows), (80, 50));
    }

    #[test]
    fn test_resize_keeps_pixels() {
        let pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        pty.resize(WindowSize::with_pixels(100, 30, 800, 600)).unwrap();
        assert_eq!(pty.size().unwrap(), WindowSize::with_pixels(100, 30, 800, 600));
    }

    #[test]
    fn test_start_echo() {
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("/bin/echo").arg("hello");
        pty.start(&mut cmd).unwrap();
        pty.close_slave().unwrap();

        let output = read_until(&pty, "hello");
        assert!(output.contains("hello"), "output: {:?}", output);

        let state = wait(&Context::background(), &mut cmd).unwrap();
        assert_eq!(state, ExitState::Exited(0));
    }

    #[test]
    fn test_start_sees_tty_size() {
        let mut pty = UnixPty::open(WindowSize::new(91, 33)).unwrap();
        let mut cmd = Command::new("sh").args(["-c", "stty size"]);
        pty.start(&mut cmd).unwrap();
        pty.close_slave().unwrap();

        let output = read_until(&pty, "33 91");
        assert!(output.contains("33 91"), "output: {:?}", output);
        wait(&Context::background(), &mut cmd).unwrap();
    }

    #[test]
    fn test_start_passes_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("sh")
            .args(["-c", "echo \"$CROSSPTY_MARK:$(pwd)\""])
            .env("CROSSPTY_MARK", "marked")
            .current_dir(dir.path());
        pty.start(&mut cmd).unwrap();
        pty.close_slave().unwrap();

        let output = read_until(&pty, "marked:");
        wait(&Context::background(), &mut cmd).unwrap();
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(output.contains("marked:"), "output: {:?}", output);
        assert!(output.contains(&dir_name), "output: {:?}", output);
    }

    #[test]
    fn test_start_keeps_raw_inherited_env() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var("CROSSPTY_RAW_VALUE", OsStr::from_bytes(b"a\xffb"));
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("sh")
            .args(["-c", "printf '%s' \"$CROSSPTY_RAW_VALUE\" | od -An -tx1"])
            .env("CROSSPTY_OTHER", "1");
        pty.start(&mut cmd).unwrap();
        pty.close_slave().unwrap();

        let output = read_until(&pty, "62");
        wait(&Context::background(), &mut cmd).unwrap();
        std::env::remove_var("CROSSPTY_RAW_VALUE");
        assert!(output.contains("61 ff 62"), "output: {:?}", output);
    }

    #[test]
    fn test_start_missing_program() {
        let pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("/nonexistent/crosspty-no-such-program");
        let err = pty.start(&mut cmd).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "err: {}", err);
        assert!(cmd.process().is_none());
    }

    #[test]
    fn test_write_reaches_child() {
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        let mut cmd = Command::new("cat");
        pty.start(&mut cmd).unwrap();
        pty.close_slave().unwrap();

        (&pty).write_all(b"ping\n").unwrap();
        let output = read_until(&pty, "ping");
        assert!(output.contains("ping"), "output: {:?}", output);

        cmd.process_mut().unwrap().kill().unwrap();
        wait(&Context::background(), &mut cmd).unwrap();
    }

    #[test]
    fn test_close_twice() {
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        pty.close().unwrap();
        pty.close().unwrap();
        assert!(pty.is_closed());
    }

    #[test]
    fn test_operations_after_close() {
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        pty.close().unwrap();

        let mut buf = [0u8; 16];
        assert!(pty.read(&mut buf).unwrap_err().is_closed());
        assert!(pty.write(b"x").unwrap_err().is_closed());
        assert!(pty.resize(WindowSize::new(10, 10)).unwrap_err().is_closed());
        assert!(pty.size().unwrap_err().is_closed());
        assert!(pty.start(&mut Command::new("true")).unwrap_err().is_closed());

        let io_err = Read::read(&mut &pty, &mut buf).unwrap_err();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_close_slave_is_idempotent() {
        let mut pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        pty.close_slave().unwrap();
        pty.close_slave().unwrap();
        assert!(pty.slave_fd().is_none());
        pty.close().unwrap();
    }

    #[test]
    fn test_set_nonblocking_read_would_block() {
        let pty = UnixPty::open(WindowSize::new(80, 24)).unwrap();
        pty.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        match pty.read(&mut buf) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            other => panic!("expected WouldBlock, got {:?}", other),
        }
        pty.set_nonblocking(false).unwrap();
    }
}
