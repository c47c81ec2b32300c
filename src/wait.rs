//! Waiting for a PTY child to exit
//!
//! The standard library's `Child::wait` cannot observe processes created
//! through ConPTY, and it offers no way to give up early. `wait` instead
//! parks one background thread on the native wait primitive and races its
//! one-shot result against a caller-supplied `Context`.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::process::{ExitState, Process};

enum Event {
    Exited(io::Result<ExitState>),
    Cancelled,
}

/// Cancellation signal for `wait`
///
/// Clones share state: cancelling one cancels all of them.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    deadline: Option<Instant>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    next_id: u64,
    watchers: Vec<(u64, Sender<Event>)>,
}

/// Registration of one wait; dropping it unregisters the sender
struct Subscription<'a> {
    ctx: &'a Context,
    id: u64,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.ctx.lock().watchers.retain(|(id, _)| *id != self.id);
    }
}

impl Context {
    /// A context that is never cancelled
    pub fn background() -> Self {
        Self::with_optional_deadline(None)
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with_optional_deadline(Some(deadline))
    }

    fn with_optional_deadline(deadline: Option<Instant>) -> Self {
        Context {
            inner: Arc::new(Inner {
                deadline,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Cancel every wait racing against this context
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        for (_, watcher) in state.watchers.drain(..) {
            let _ = watcher.send(Event::Cancelled);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    fn subscribe(&self, watcher: Sender<Event>) -> Subscription<'_> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.cancelled {
            let _ = watcher.send(Event::Cancelled);
        } else {
            state.watchers.push((id, watcher));
        }
        Subscription { ctx: self, id }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Wait for the process started by `cmd` to exit.
///
/// Fails with `Error::NotStarted` if `cmd` has no process yet.
pub fn wait(ctx: &Context, cmd: &mut Command) -> Result<ExitState> {
    let process = cmd.process_mut().ok_or(Error::NotStarted)?;
    wait_process(ctx, process)
}

/// Wait for `process` to exit, or kill it when `ctx` is done first.
///
/// A natural exit is recorded on the process and returned whatever the
/// exit code, including one already queued when the context fires.
/// Otherwise cancellation terminates the process and returns
/// `Error::Cancelled` (or `Error::DeadlineExceeded`).
pub fn wait_process(ctx: &Context, process: &mut Process) -> Result<ExitState> {
    if let Some(state) = process.exit_state() {
        return Ok(state);
    }

    let pid = process.id();
    let waiter = process.waiter().map_err(Error::Wait)?;
    let (tx, rx) = mpsc::channel();
    let exit_tx = tx.clone();
    thread::Builder::new()
        .name(format!("crosspty-wait-{}", pid))
        .spawn(move || {
            let _ = exit_tx.send(Event::Exited(waiter.wait()));
        })?;
    let _subscription = ctx.subscribe(tx);

    let event = match ctx.deadline() {
        Some(deadline) => match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Wait(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "wait thread vanished",
                )))
            }
        },
        None => rx.recv().ok(),
    };

    match event {
        Some(Event::Exited(result)) => {
            let state = result.map_err(Error::Wait)?;
            tracing::debug!(pid, %state, "process exited");
            process.set_exit(state);
            Ok(state)
        }
        Some(Event::Cancelled) => terminate(process, &rx, Error::Cancelled),
        None => terminate(process, &rx, Error::DeadlineExceeded),
    }
}

fn terminate(process: &mut Process, rx: &mpsc::Receiver<Event>, reason: Error) -> Result<ExitState> {
    // An exit that raced the cancellation wins; the pid is already reaped.
    while let Ok(event) = rx.try_recv() {
        if let Event::Exited(result) = event {
            let state = result.map_err(Error::Wait)?;
            tracing::debug!(pid = process.id(), %state, "process exited before cancellation");
            process.set_exit(state);
            return Ok(state);
        }
    }

    tracing::debug!(pid = process.id(), %reason, "terminating process");
    if let Err(e) = process.kill() {
        tracing::warn!(pid = process.id(), error = %e, "failed to terminate process");
        return Err(reason);
    }
    // Let the wait thread reap the child so it does not linger as a zombie.
    while let Ok(event) = rx.recv() {
        if let Event::Exited(result) = event {
            if let Ok(state) = result {
                process.set_exit(state);
            }
            break;
        }
    }
    Err(reason)
}
