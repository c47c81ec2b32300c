//! crosspty - run a command on a PTY and relay its I/O
//!
//! Stdin is copied to the PTY and PTY output to stdout until the child
//! exits. The runner exits with the child's status.

use std::io::{self, IsTerminal, Read, Write};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crosspty::{wait, CliArgs, Context, Error, ExitState, Pty, PtyConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code used when the child is killed by `--timeout`
const TIMEOUT_EXIT: u8 = 124;

/// How long output may keep draining after the child exits
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();
    let config = match PtyConfig::load_with_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        },
    };

    match run(&args, &config) {
        Ok(state) => exit_code(state),
        Err(Error::DeadlineExceeded) => {
            eprintln!("crosspty: timed out");
            ExitCode::from(TIMEOUT_EXIT)
        },
        Err(e) => {
            eprintln!("crosspty: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(args: &CliArgs, config: &PtyConfig) -> crosspty::Result<ExitState> {
    let (mut pty, mut cmd) = Pty::spawn(config)?;
    pty.close_slave()?;
    tracing::info!(
        pty = pty.name(),
        program = cmd.get_program(),
        pid = cmd.process().map(|p| p.id()),
        "child started"
    );

    #[cfg(unix)]
    let raw_guard = if io::stdin().is_terminal() {
        Some(RawModeGuard::new()?)
    } else {
        None
    };

    let reader = pty.try_clone_reader()?;
    let (done_tx, done_rx) = mpsc::channel();
    thread::Builder::new()
        .name("crosspty-output".to_string())
        .spawn(move || {
            pump_output(reader);
            let _ = done_tx.send(());
        })?;

    let writer = pty.try_clone_writer()?;
    // Blocks on stdin for the life of the process; never joined.
    thread::Builder::new()
        .name("crosspty-input".to_string())
        .spawn(move || pump_input(writer))?;

    let ctx = match args.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };
    let result = wait(&ctx, &mut cmd);

    if let Err(e) = pty.close() {
        tracing::warn!("error closing pty: {}", e);
    }
    // The pump reads its own copy of the output handle, which stays readable
    // while any grandchild still holds the terminal open.
    if !wait_for_output(&done_rx, OUTPUT_DRAIN) {
        tracing::debug!("output still open after child exit, not waiting for it");
    }

    #[cfg(unix)]
    drop(raw_guard);

    let state = result?;
    tracing::info!(%state, "child exited");
    Ok(state)
}

fn pump_output(mut reader: std::fs::File) {
    let mut stdout = io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).is_err() {
                    break;
                }
                let _ = stdout.flush();
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO (Unix) or a broken pipe (Windows) once the child is gone
                tracing::debug!("output closed: {}", e);
                break;
            },
        }
    }
}

fn pump_input(mut writer: std::fs::File) {
    let mut stdin = io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if writer.write_all(&buf[..n]).is_err() {
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Whether the output pump finished within `timeout`
fn wait_for_output(done: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match done.recv_timeout(timeout) {
        Ok(()) => true,
        // Pump thread panicked
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            tracing::warn!("output thread panicked");
            true
        },
        Err(mpsc::RecvTimeoutError::Timeout) => false,
    }
}

fn exit_code(state: ExitState) -> ExitCode {
    ExitCode::from(exit_status(state))
}

/// Status byte for the runner. Codes that do not fit, such as Windows
/// NTSTATUS values, become a plain failure.
fn exit_status(state: ExitState) -> u8 {
    match state {
        ExitState::Exited(code) => u8::try_from(code).unwrap_or(1),
        ExitState::Signaled(sig) => u8::try_from(sig).map_or(1, |sig| 128u8.saturating_add(sig)),
    }
}

/// RAII guard for raw terminal mode
#[cfg(unix)]
struct RawModeGuard {
    original: nix::sys::termios::Termios,
}

#[cfg(unix)]
impl RawModeGuard {
    fn new() -> io::Result<Self> {
        use nix::sys::termios::{self, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices};

        let original = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;

        let mut raw = original.clone();
        // The child's terminal does echo and line editing
        raw.local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG | LocalFlags::IEXTEN);
        raw.input_flags.remove(InputFlags::ICRNL | InputFlags::IXON);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        Ok(Self { original })
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use nix::sys::termios::{self, SetArg};
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_passes_small_codes() {
        assert_eq!(exit_status(ExitState::Exited(0)), 0);
        assert_eq!(exit_status(ExitState::Exited(7)), 7);
        assert_eq!(exit_status(ExitState::Exited(255)), 255);
        assert_eq!(exit_status(ExitState::Signaled(9)), 137);
    }

    #[test]
    fn test_exit_status_large_codes_fail() {
        // STATUS_ACCESS_VIOLATION
        assert_eq!(exit_status(ExitState::Exited(0xC000_0005u32 as i32)), 1);
        assert_eq!(exit_status(ExitState::Exited(256)), 1);
        assert_eq!(exit_status(ExitState::Exited(-1)), 1);
    }

    #[test]
    fn test_wait_for_output_gives_up_on_stuck_pump() {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        assert!(!wait_for_output(&done_rx, Duration::from_millis(50)));

        done_tx.send(()).unwrap();
        assert!(wait_for_output(&done_rx, Duration::from_millis(50)));
    }

    #[test]
    fn test_wait_for_output_after_pump_exit() {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let pump = thread::spawn(move || {
            let _ = done_tx.send(());
        });
        pump.join().unwrap();
        assert!(wait_for_output(&done_rx, Duration::from_secs(5)));
    }
}
