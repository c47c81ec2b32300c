//! Description of a child process to start on a PTY
//!
//! A `Command` is built by the caller, handed to `start`, and afterwards
//! owns the spawned `Process` until the caller takes it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::process::Process;

/// Builder for a child process attached to a PTY
#[derive(Debug)]
pub struct Command {
    /// Program to execute
    program: String,
    /// Arguments, not including the program itself
    args: Vec<String>,
    /// Replacement `KEY=VALUE` list; `None` inherits the parent environment
    env: Option<Vec<String>>,
    /// `KEY=VALUE` entries applied on top of `env` or the inherited one
    vars: Vec<String>,
    /// Working directory of the child
    dir: Option<PathBuf>,
    /// Stdio overrides (Unix only; ConPTY always binds the console)
    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,
    /// Windows process-creation attributes
    attrs: SpawnAttrs,
    /// Set once `start` succeeds
    process: Option<Process>,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: Into<String>>(program: S) -> Self {
        Command {
            program: program.into(),
            args: Vec::new(),
            env: None,
            vars: Vec::new(),
            dir: None,
            stdin: None,
            stdout: None,
            stderr: None,
            attrs: SpawnAttrs::default(),
            process: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    ///
    /// The child still inherits everything else from the parent.
    pub fn env<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.vars.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    /// Replace the environment with the given `KEY=VALUE` entries
    pub fn envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = Some(entries.into_iter().map(Into::into).collect());
        self.vars.clear();
        self
    }

    /// Clear all environment variables
    pub fn env_clear(mut self) -> Self {
        self.env = Some(Vec::new());
        self.vars.clear();
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bind the child's stdin instead of the PTY slave
    pub fn stdin<T: Into<Stdio>>(mut self, stdin: T) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Bind the child's stdout instead of the PTY slave
    pub fn stdout<T: Into<Stdio>>(mut self, stdout: T) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Bind the child's stderr instead of the PTY slave
    pub fn stderr<T: Into<Stdio>>(mut self, stderr: T) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Set Windows process-creation attributes
    pub fn spawn_attrs(mut self, attrs: SpawnAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// The child's full `KEY=VALUE` list, or `None` when it inherits the
    /// parent environment untouched.
    ///
    /// Inherited values are converted lossily; Unix children get them
    /// byte for byte regardless.
    pub fn get_env(&self) -> Option<Vec<String>> {
        if self.env.is_none() && self.vars.is_empty() {
            return None;
        }
        let mut env = self.env.clone().unwrap_or_else(crate::windows::env::environ);
        env.extend(self.vars.iter().cloned());
        Some(env)
    }

    /// Replacement list and overrides, kept apart
    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn env_parts(&self) -> (Option<&[String]>, &[String]) {
        (self.env.as_deref(), &self.vars)
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn get_spawn_attrs(&self) -> &SpawnAttrs {
        &self.attrs
    }

    /// Attributes handed to the ConPTY spawner
    pub fn proc_attr(&self) -> ProcAttr {
        ProcAttr {
            dir: self.dir.clone(),
            env: self.get_env(),
            sys: self.attrs,
        }
    }

    /// The spawned process, if `start` succeeded
    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    pub fn process_mut(&mut self) -> Option<&mut Process> {
        self.process.as_mut()
    }

    /// Take ownership of the spawned process
    pub fn take_process(&mut self) -> Option<Process> {
        self.process.take()
    }

    pub(crate) fn set_process(&mut self, process: Process) {
        self.process = Some(process);
    }

    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn take_stdio(&mut self) -> (Option<Stdio>, Option<Stdio>, Option<Stdio>) {
        (self.stdin.take(), self.stdout.take(), self.stderr.take())
    }
}

/// Security attributes for the new process or its primary thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityAttrs {
    /// Whether the returned handle is inheritable
    pub inherit_handle: bool,
    /// Raw `PSECURITY_DESCRIPTOR` value; zero selects the default descriptor
    pub security_descriptor: usize,
}

impl Default for SecurityAttrs {
    fn default() -> Self {
        SecurityAttrs {
            inherit_handle: true,
            security_descriptor: 0,
        }
    }
}

/// Windows-specific process-creation options
///
/// Ignored by the Unix backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnAttrs {
    /// Extra `dwCreationFlags`, OR'd with the flags ConPTY requires
    pub creation_flags: u32,
    /// Raw primary token `HANDLE` to create the process as another user.
    /// The caller keeps the token open for the duration of the call.
    pub token: Option<isize>,
    /// Process security attributes; `None` uses an inheritable default
    pub process_attributes: Option<SecurityAttrs>,
    /// Thread security attributes; `None` uses an inheritable default
    pub thread_attributes: Option<SecurityAttrs>,
    /// `bInheritHandles` for the process-creation call
    pub inherit_handles: bool,
}

/// Everything `ConPty::spawn` needs besides the path and argv
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcAttr {
    /// Working directory
    pub dir: Option<PathBuf>,
    /// `KEY=VALUE` entries; `None` uses the parent (or token) environment
    pub env: Option<Vec<String>>,
    /// Native creation options
    pub sys: SpawnAttrs,
}
