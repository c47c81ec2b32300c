//! Owned Win32 resources used by a ConPTY session
//!
//! Each wrapper releases its resource on drop, so a session that fails half
//! way through setup frees whatever it had acquired.

use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, FromRawHandle, IntoRawHandle, OwnedHandle, RawHandle};
use std::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    DeleteProcThreadAttributeList, InitializeProcThreadAttributeList, UpdateProcThreadAttribute,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
};

use crate::command::SecurityAttrs;
use crate::size::WindowSize;

/// Build a `SECURITY_ATTRIBUTES` for one call
pub(crate) fn security_attributes(attrs: SecurityAttrs) -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: attrs.security_descriptor as *mut c_void,
        bInheritHandle: attrs.inherit_handle as i32,
    }
}

pub(crate) fn raw(handle: &impl AsRawHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

/// Close a handle, reporting the failure `Drop` would swallow
pub(crate) fn close_handle(handle: impl IntoRawHandle) -> io::Result<()> {
    let raw = handle.into_raw_handle() as HANDLE;
    // SAFETY: ownership of `raw` was just released to us.
    if unsafe { CloseHandle(raw) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close a caller-facing stream endpoint
pub(crate) fn close_file(file: File) -> io::Result<()> {
    close_handle(OwnedHandle::from(file))
}

/// Both ends of an anonymous pipe
pub(crate) struct PipePair {
    pub read: OwnedHandle,
    pub write: OwnedHandle,
}

/// Create an anonymous pipe with the given security attributes
pub(crate) fn create_pipe(sa: &SECURITY_ATTRIBUTES) -> io::Result<PipePair> {
    let mut read: HANDLE = 0;
    let mut write: HANDLE = 0;
    // SAFETY: out-pointers are valid locals; `sa` outlives the call.
    if unsafe { CreatePipe(&mut read, &mut write, sa, 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: CreatePipe succeeded, so both handles are open and ours.
    unsafe {
        Ok(PipePair {
            read: OwnedHandle::from_raw_handle(read as RawHandle),
            write: OwnedHandle::from_raw_handle(write as RawHandle),
        })
    }
}

fn coord(size: WindowSize) -> COORD {
    COORD {
        X: size.cols.min(i16::MAX as u16) as i16,
        Y: size.rows.min(i16::MAX as u16) as i16,
    }
}

/// A pseudo console kernel object
pub(crate) struct PseudoConsole(HPCON);

impl PseudoConsole {
    /// Create a console reading `input` and writing `output`
    pub(crate) fn new(
        size: WindowSize,
        input: &OwnedHandle,
        output: &OwnedHandle,
        flags: u32,
    ) -> io::Result<Self> {
        let mut hpc: HPCON = 0;
        // SAFETY: both pipe handles are open for the duration of the call.
        let hr = unsafe { CreatePseudoConsole(coord(size), raw(input), raw(output), flags, &mut hpc) };
        if hr < 0 {
            return Err(io::Error::from_raw_os_error(hr));
        }
        Ok(PseudoConsole(hpc))
    }

    pub(crate) fn resize(&self, size: WindowSize) -> io::Result<()> {
        // SAFETY: the console is open until drop.
        let hr = unsafe { ResizePseudoConsole(self.0, coord(size)) };
        if hr < 0 {
            return Err(io::Error::from_raw_os_error(hr));
        }
        Ok(())
    }

    pub(crate) fn raw(&self) -> HPCON {
        self.0
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        // SAFETY: created by CreatePseudoConsole and closed only here.
        unsafe { ClosePseudoConsole(self.0) };
    }
}

/// A process-thread attribute list carrying the pseudo console
pub(crate) struct ProcThreadAttributeList {
    /// Backing storage; `usize` elements keep it pointer-aligned
    buf: Vec<usize>,
}

impl ProcThreadAttributeList {
    /// Allocate and initialize a list with room for `count` attributes
    pub(crate) fn with_capacity(count: u32) -> io::Result<Self> {
        let mut size: usize = 0;
        // SAFETY: a null list asks for the required size; failure is expected.
        unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), count, 0, &mut size) };
        if size == 0 {
            return Err(io::Error::last_os_error());
        }

        let words = (size + mem::size_of::<usize>() - 1) / mem::size_of::<usize>();
        let mut buf = vec![0usize; words];
        // SAFETY: `buf` holds at least `size` bytes.
        let ok = unsafe {
            InitializeProcThreadAttributeList(buf.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST, count, 0, &mut size)
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ProcThreadAttributeList { buf })
    }

    /// Associate `console` with processes created through this list
    pub(crate) fn set_pseudo_console(&mut self, console: &PseudoConsole) -> io::Result<()> {
        // SAFETY: the list is initialized; the console value is passed by
        // value as the attribute payload, as the API expects.
        let ok = unsafe {
            UpdateProcThreadAttribute(
                self.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                console.raw() as *const c_void,
                mem::size_of::<HPCON>(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn as_ptr(&self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.buf.as_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST
    }
}

impl Drop for ProcThreadAttributeList {
    fn drop(&mut self) {
        // SAFETY: initialized in `with_capacity` and deleted only here.
        unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
    }
}
