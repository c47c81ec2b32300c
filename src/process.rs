//! Spawned child processes
//!
//! A `Process` is the descriptor returned by a successful spawn. The PTY
//! never tracks or reaps it; whoever owns the `Process` does.

use std::fmt;
use std::io;
#[cfg(unix)]
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(windows)]
use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitStatus};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::Result;

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited normally with the given code
    Exited(i32),
    /// Terminated by the given signal (Unix only)
    Signaled(i32),
}

impl ExitState {
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Exited(0))
    }

    /// Exit code, if the process exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => Some(*code),
            ExitState::Signaled(_) => None,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exit status {}", code),
            ExitState::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// A child process attached to a PTY
#[derive(Debug)]
pub struct Process {
    /// Child process ID
    pid: u32,
    #[cfg(unix)]
    child: std::process::Child,
    /// Filled by the waiter at the moment it reaps the pid
    #[cfg(unix)]
    reaped: Reaped,
    #[cfg(windows)]
    handle: OwnedHandle,
    /// Recorded once the process has been waited on
    exit: Option<ExitState>,
}

impl Process {
    #[cfg(unix)]
    pub(crate) fn from_child(child: std::process::Child) -> Self {
        Process {
            pid: child.id(),
            child,
            reaped: Reaped::default(),
            exit: None,
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_handle(pid: u32, handle: OwnedHandle) -> Self {
        Process {
            pid,
            handle,
            exit: None,
        }
    }

    /// Get the child process ID
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Exit state, if a wait has already observed it
    pub fn exit_state(&self) -> Option<ExitState> {
        self.exit
    }

    /// Whether the process has been seen exiting
    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// The underlying standard-library child
    #[cfg(unix)]
    pub fn child(&self) -> &std::process::Child {
        &self.child
    }

    /// The process handle
    #[cfg(windows)]
    pub fn handle(&self) -> BorrowedHandle<'_> {
        self.handle.as_handle()
    }

    pub(crate) fn set_exit(&mut self, state: ExitState) {
        self.exit = Some(state);
    }

    /// Forcibly terminate the process.
    ///
    /// A process that has already been reaped is left alone.
    pub fn kill(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.kill_native()
    }

    #[cfg(unix)]
    fn kill_native(&mut self) -> Result<()> {
        // Holding the slot keeps the waiter from reaping (and the kernel
        // from recycling the pid) until the signal is sent.
        let reaped = lock(&self.reaped);
        if reaped.is_some() {
            return Ok(());
        }
        match kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(windows)]
    fn kill_native(&mut self) -> Result<()> {
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::System::Threading::TerminateProcess;

        // SAFETY: the handle is owned by this process descriptor and open.
        let ok = unsafe { TerminateProcess(self.handle.as_raw_handle() as HANDLE, 1) };
        if ok == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn kill_native(&mut self) -> Result<()> {
        Err(crate::error::Error::Unsupported)
    }

    /// Something a background thread can block on until the process exits
    pub(crate) fn waiter(&self) -> io::Result<Waiter> {
        #[cfg(unix)]
        {
            Ok(Waiter {
                pid: Pid::from_raw(self.pid as i32),
                reaped: Arc::clone(&self.reaped),
            })
        }
        #[cfg(windows)]
        {
            Ok(Waiter {
                handle: self.handle.try_clone()?,
            })
        }
        #[cfg(not(any(unix, windows)))]
        {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no process support"))
        }
    }
}

#[cfg(unix)]
type Reaped = Arc<Mutex<Option<ExitState>>>;

#[cfg(unix)]
fn lock(reaped: &Reaped) -> MutexGuard<'_, Option<ExitState>> {
    reaped.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Native blocking wait on one process
pub(crate) struct Waiter {
    #[cfg(unix)]
    pid: Pid,
    #[cfg(unix)]
    reaped: Reaped,
    #[cfg(windows)]
    handle: OwnedHandle,
}

impl Waiter {
    /// Block until the process exits.
    ///
    /// The exit is observed without reaping first, then the pid is reaped
    /// while holding the slot `Process::kill` checks.
    #[cfg(unix)]
    pub(crate) fn wait(self) -> io::Result<ExitState> {
        if let Some(state) = *lock(&self.reaped) {
            return Ok(state);
        }
        loop {
            // SAFETY: `siginfo_t` is plain data and `info` a valid
            // out-pointer; WNOWAIT leaves the child waitable.
            let rc = unsafe {
                let mut info: libc::siginfo_t = std::mem::zeroed();
                libc::waitid(
                    libc::P_PID,
                    self.pid.as_raw() as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        let mut reaped = lock(&self.reaped);
        if let Some(state) = *reaped {
            return Ok(state);
        }
        let state = loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => break ExitState::Exited(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => break ExitState::Signaled(sig as i32),
                // Stopped/continued children are still alive
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };
        *reaped = Some(state);
        Ok(state)
    }

    #[cfg(windows)]
    pub(crate) fn wait(self) -> io::Result<ExitState> {
        use windows_sys::Win32::Foundation::{HANDLE, WAIT_OBJECT_0};
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, WaitForSingleObject, INFINITE,
        };

        let raw = self.handle.as_raw_handle() as HANDLE;
        // SAFETY: `raw` is a duplicated process handle owned by this waiter.
        let event = unsafe { WaitForSingleObject(raw, INFINITE) };
        if event != WAIT_OBJECT_0 {
            return Err(io::Error::last_os_error());
        }
        let mut code: u32 = 0;
        // SAFETY: as above; `code` is a valid out-pointer.
        if unsafe { GetExitCodeProcess(raw, &mut code) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ExitState::Exited(code as i32))
    }

    #[cfg(not(any(unix, windows)))]
    pub(crate) fn wait(self) -> io::Result<ExitState> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no process support"))
    }
}
