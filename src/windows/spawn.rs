//! Creating a process attached to a pseudo console

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::windows::io::{FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows_sys::Win32::System::Threading::{
    CreateProcessAsUserW, CreateProcessW, CREATE_UNICODE_ENVIRONMENT,
    EXTENDED_STARTUPINFO_PRESENT, PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOEXW,
};

use super::cmdline::{compose_command_line, to_wide};
use super::env::{add_critical_env, create_env_block, dedup_env_case, environ, parse_env_block};
use super::handles::{security_attributes, ProcThreadAttributeList};
use super::path::{join_exe_dir_and_fname, look_extensions};
use crate::command::ProcAttr;
use crate::error::{Error, Result};
use crate::process::Process;

/// Environment block of the user behind `token`
fn token_environment(token: isize) -> Result<Vec<String>> {
    let mut block: *mut c_void = ptr::null_mut();
    // SAFETY: the caller keeps `token` open; `block` is a valid out-pointer.
    if unsafe { CreateEnvironmentBlock(&mut block, token as HANDLE, 0) } == 0 {
        return Err(Error::Spawn(io::Error::last_os_error()));
    }
    // SAFETY: the block is a sequence of NUL-terminated UTF-16 strings
    // closed by an empty one; we stop at that terminator.
    let env = unsafe {
        let start = block as *const u16;
        let mut len = 0usize;
        loop {
            let mut entry = 0usize;
            while *start.add(len + entry) != 0 {
                entry += 1;
            }
            len += entry + 1;
            if entry == 0 {
                break;
            }
        }
        parse_env_block(std::slice::from_raw_parts(start, len))
    };
    // SAFETY: allocated by CreateEnvironmentBlock above.
    unsafe { DestroyEnvironmentBlock(block) };
    Ok(env)
}

/// Start `path` with `args` (program first) on the console behind `attr_list`
pub(crate) fn spawn(
    attr_list: &ProcThreadAttributeList,
    path: &str,
    args: &[String],
    attr: &ProcAttr,
) -> Result<Process> {
    let dir = attr
        .dir
        .as_ref()
        .map(|d| d.to_string_lossy().into_owned())
        .filter(|d| !d.is_empty());

    let path = look_extensions(path, dir.as_deref().unwrap_or(""))?;
    let argv0 = match dir.as_deref() {
        Some(d) => join_exe_dir_and_fname(d, &path)?,
        None => path.clone(),
    };
    let cmdline = compose_command_line(args);
    tracing::debug!(%argv0, %cmdline, dir = ?dir, "creating process");

    let env = match (&attr.env, attr.sys.token) {
        (Some(env), _) => env.clone(),
        (None, Some(token)) => token_environment(token)?,
        (None, None) => environ(),
    };
    let env_block = create_env_block(&add_critical_env(dedup_env_case(true, &env)))?;

    let argv0_w = to_wide(&argv0)?;
    let mut cmdline_w = to_wide(&cmdline)?;
    let dir_w = dir.as_deref().map(to_wide).transpose()?;
    let dir_ptr = dir_w.as_ref().map_or(ptr::null(), |d| d.as_ptr());

    // SAFETY: all-zero is a valid STARTUPINFOEXW.
    let mut si: STARTUPINFOEXW = unsafe { mem::zeroed() };
    si.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
    // Null std handles keep the child off the parent's console.
    si.StartupInfo.dwFlags |= STARTF_USESTDHANDLES;
    si.lpAttributeList = attr_list.as_ptr();

    let flags = CREATE_UNICODE_ENVIRONMENT | EXTENDED_STARTUPINFO_PRESENT | attr.sys.creation_flags;
    let process_sa = security_attributes(attr.sys.process_attributes.unwrap_or_default());
    let thread_sa = security_attributes(attr.sys.thread_attributes.unwrap_or_default());
    let inherit = attr.sys.inherit_handles as i32;

    // SAFETY: all-zero is a valid PROCESS_INFORMATION out-value.
    let mut pi: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    // SAFETY: every pointer refers to a live local for the duration of the
    // call; the attribute list outlives it.
    let ok = unsafe {
        match attr.sys.token {
            Some(token) => CreateProcessAsUserW(
                token as HANDLE,
                argv0_w.as_ptr(),
                cmdline_w.as_mut_ptr(),
                &process_sa,
                &thread_sa,
                inherit,
                flags,
                env_block.as_ptr() as *const c_void,
                dir_ptr,
                &si.StartupInfo,
                &mut pi,
            ),
            None => CreateProcessW(
                argv0_w.as_ptr(),
                cmdline_w.as_mut_ptr(),
                &process_sa,
                &thread_sa,
                inherit,
                flags,
                env_block.as_ptr() as *const c_void,
                dir_ptr,
                &si.StartupInfo,
                &mut pi,
            ),
        }
    };
    if ok == 0 {
        return Err(Error::Spawn(io::Error::last_os_error()));
    }

    // SAFETY: CreateProcess succeeded; both handles are open and ours.
    let (process, thread) = unsafe {
        (
            OwnedHandle::from_raw_handle(pi.hProcess as RawHandle),
            OwnedHandle::from_raw_handle(pi.hThread as RawHandle),
        )
    };
    drop(thread);

    tracing::debug!(pid = pi.dwProcessId, "process created");
    Ok(Process::from_handle(pi.dwProcessId, process))
}
